//! Generic Stream Encapsulation (DVB-S2 GSE) parsing.
//!
//! Recovers complete IPv4 datagrams from a GSE byte stream, handling
//! single-segment packets, Start/Middle/End fragmentation with 256
//! Fragment-ID slots, stuffing, and sync acquisition for carriers that do
//! not preserve packet boundaries.

use std::collections::VecDeque;

use bytes::BytesMut;
use log::{debug, trace};

use crate::crc::crc32_gse;

/// Stream buffer cap; overflow clears the buffer and forces a resync.
pub const GSE_BUFFER_MAX: usize = 32 * 1024;

/// Upper bound for a single GSE packet (header + length field).
const GSE_PACKET_MAX: usize = 8192;

/// Number of fragment reassembly slots, indexed by Frag-ID.
const FRAGMENT_SLOTS: usize = 256;

/// IPv4 ethertype carried in the GSE protocol field.
const PROTOCOL_IPV4: u16 = 0x0800;

/// Label length in bytes for each label type.
fn label_len(lt: u8) -> usize {
    match lt & 0x03 {
        0 => 6,
        1 => 3,
        _ => 0,
    }
}

#[derive(Debug, Default)]
struct FragmentSlot {
    active: bool,
    /// Reconstructed single-segment packet: 2-byte header + payload.
    data: Vec<u8>,
    /// Write position within `data`.
    pos: usize,
}

/// Parser statistics.
#[derive(Debug, Clone, Copy, Default)]
pub struct GseStats {
    /// Complete GSE packets processed.
    pub packets: u64,
    /// Fragment packets processed (any of Start/Middle/End).
    pub fragments: u64,
    /// IPv4 datagrams emitted.
    pub datagrams: u64,
    /// Sync losses (bad length, buffer overflow).
    pub sync_losses: u64,
    /// Reassembled datagrams whose trailing CRC-32 did not verify.
    pub crc_mismatches: u64,
}

/// GSE packet and fragment parser.
#[derive(Debug)]
pub struct GseParser {
    buffer: BytesMut,
    synced: bool,
    fragments: Vec<FragmentSlot>,
    datagrams: VecDeque<Vec<u8>>,
    stats: GseStats,
}

impl Default for GseParser {
    fn default() -> Self {
        Self::new()
    }
}

impl GseParser {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
            synced: false,
            fragments: (0..FRAGMENT_SLOTS).map(|_| FragmentSlot::default()).collect(),
            datagrams: VecDeque::new(),
            stats: GseStats::default(),
        }
    }

    /// Drop buffered bytes, fragment state and queued datagrams.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.synced = false;
        for slot in &mut self.fragments {
            slot.active = false;
            slot.data.clear();
            slot.pos = 0;
        }
        self.datagrams.clear();
    }

    pub fn stats(&self) -> GseStats {
        self.stats
    }

    /// Bytes currently buffered awaiting sync or completion.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Take the next recovered IPv4 datagram, in emission order.
    pub fn pop_datagram(&mut self) -> Option<Vec<u8>> {
        self.datagrams.pop_front()
    }

    /// Feed raw GSE stream bytes (sync is acquired if not yet held).
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);

        if !self.synced {
            match self.find_sync() {
                Some(pos) => {
                    let _ = self.buffer.split_to(pos);
                    self.synced = true;
                }
                None => {
                    // Keep a short tail so a header split across feeds can
                    // still be found.
                    if self.buffer.len() > 64 {
                        let drop = self.buffer.len() - 64;
                        let _ = self.buffer.split_to(drop);
                    }
                    return;
                }
            }
        }

        let mut pos = 0;
        while pos + 2 <= self.buffer.len() {
            let header = self.buffer[pos];
            let gse_len = ((header as usize & 0x0F) << 8) | self.buffer[pos + 1] as usize;

            // Stuffing: a header byte with no S/E/LT bits, or 0xFF, ends
            // the GSE data in this chunk.
            if header & 0xF0 == 0 || header == 0xFF {
                self.buffer.clear();
                return;
            }

            let packet_len = gse_len + 2;
            if packet_len > GSE_PACKET_MAX {
                debug!("gse: implausible packet length {packet_len}, resyncing");
                self.stats.sync_losses += 1;
                self.synced = false;
                let _ = self.buffer.split_to(pos + 1);
                return;
            }

            if pos + packet_len > self.buffer.len() {
                break;
            }

            let packet = self.buffer[pos..pos + packet_len].to_vec();
            if self.process_packet(&packet) {
                pos += packet_len;
            } else {
                pos += 1;
            }
        }

        let _ = self.buffer.split_to(pos);

        if self.buffer.len() > GSE_BUFFER_MAX {
            debug!("gse: buffer overflow, clearing and resyncing");
            self.stats.sync_losses += 1;
            self.buffer.clear();
            self.synced = false;
        }
    }

    /// Feed the GSE bytes of one TS payload.
    pub fn feed_ts_payload(&mut self, data: &[u8]) {
        self.feed(data);
    }

    /// Feed GSE data known to start on a packet boundary (BBFrame interior).
    ///
    /// No buffering: an incomplete trailing packet is dropped, as BBFrames
    /// are self-contained.
    pub fn feed_synced(&mut self, data: &[u8]) {
        let mut pos = 0;
        while pos + 2 <= data.len() {
            let header = data[pos];
            let gse_len = ((header as usize & 0x0F) << 8) | data[pos + 1] as usize;

            if header & 0xF0 == 0 || header == 0xFF {
                return;
            }

            let packet_len = gse_len + 2;
            if packet_len > GSE_PACKET_MAX || pos + packet_len > data.len() {
                return;
            }

            if self.process_packet(&data[pos..pos + packet_len]) {
                pos += packet_len;
            } else {
                pos += 1;
            }
        }
    }

    /// Scan for a plausible single-segment IPv4 packet start.
    fn find_sync(&self) -> Option<usize> {
        let buf = &self.buffer;
        if buf.len() < 23 {
            return None;
        }
        for pos in 0..buf.len() - 22 {
            let header = buf[pos];
            if header & 0xF0 == 0 {
                continue;
            }
            let gse_len = ((header as usize & 0x0F) << 8) | buf[pos + 1] as usize;
            let start = header & 0x80 != 0;
            let end = header & 0x40 != 0;
            let lt = (header >> 4) & 0x03;

            if start && end && (22..=2000).contains(&gse_len) {
                let proto_offset = pos + 2 + label_len(lt);
                if proto_offset + 2 < buf.len() {
                    let proto =
                        ((buf[proto_offset] as u16) << 8) | buf[proto_offset + 1] as u16;
                    let ip_offset = proto_offset + 2;
                    if proto == PROTOCOL_IPV4
                        && ip_offset < buf.len()
                        && buf[ip_offset] & 0xF0 == 0x40
                    {
                        return Some(pos);
                    }
                }
            }
        }
        None
    }

    /// Handle one complete GSE packet. Returns false when the packet is
    /// unparseable and the caller should advance a single byte.
    fn process_packet(&mut self, data: &[u8]) -> bool {
        if data.len() < 2 {
            return false;
        }
        let header = data[0];
        if header & 0xF0 == 0 {
            return false;
        }
        let gse_len = ((header as usize & 0x0F) << 8) | data[1] as usize;
        if gse_len + 2 > data.len() {
            return false;
        }

        let start = header & 0x80 != 0;
        let end = header & 0x40 != 0;
        let lt = (header >> 4) & 0x03;

        match (start, end) {
            (true, true) => {
                self.stats.packets += 1;
                self.handle_complete_payload(&data[2..2 + gse_len]);
            }
            (true, false) => self.start_fragment(header, lt, gse_len, data),
            (false, false) => self.middle_fragment(gse_len, data),
            (false, true) => self.end_fragment(gse_len, data),
        }
        true
    }

    /// First fragment: `FragID(1) || TotalLength(2) || Protocol(2) || Label || Data`.
    fn start_fragment(&mut self, header: u8, lt: u8, gse_len: usize, data: &[u8]) {
        self.stats.fragments += 1;
        if gse_len < 7 {
            return;
        }
        let frag_id = data[2] as usize;
        let total_len = ((data[3] as usize) << 8) | data[4] as usize;

        let proto_offset = 5 + label_len(lt);
        if proto_offset + 2 > gse_len + 2 {
            return;
        }
        let protocol = ((data[proto_offset] as u16) << 8) | data[proto_offset + 1] as u16;
        if protocol != PROTOCOL_IPV4 {
            return;
        }
        if !(28..=2000).contains(&total_len) {
            return;
        }

        let slot = &mut self.fragments[frag_id];
        slot.data.clear();
        slot.data.resize(total_len + 2, 0);

        // Rewrite the header as a single-segment packet so the reassembled
        // buffer re-parses uniformly.
        slot.data[0] = header | 0xC0;
        slot.data[1] = data[1];

        // Protocol + label + data follow the FragID/TotalLength fields.
        let payload_len = gse_len - 3;
        if 2 + payload_len <= slot.data.len() {
            slot.data[2..2 + payload_len].copy_from_slice(&data[5..5 + payload_len]);
            slot.pos = 2 + payload_len;
            slot.active = true;
        } else {
            slot.active = false;
        }
    }

    /// Middle fragment: `FragID(1) || Data`.
    fn middle_fragment(&mut self, gse_len: usize, data: &[u8]) {
        self.stats.fragments += 1;
        if gse_len < 1 {
            return;
        }
        let frag_id = data[2] as usize;
        let slot = &mut self.fragments[frag_id];
        if !slot.active {
            return;
        }
        let payload_len = gse_len - 1;
        if slot.pos + payload_len <= slot.data.len() {
            slot.data[slot.pos..slot.pos + payload_len].copy_from_slice(&data[3..3 + payload_len]);
            slot.pos += payload_len;
        }
    }

    /// Last fragment: `FragID(1) || Data || CRC32(4)`.
    fn end_fragment(&mut self, gse_len: usize, data: &[u8]) {
        self.stats.fragments += 1;
        if gse_len < 5 {
            return;
        }
        let frag_id = data[2] as usize;
        let payload_len = gse_len - 5;

        let slot = &mut self.fragments[frag_id];
        if !slot.active {
            return;
        }
        if slot.pos + payload_len <= slot.data.len() {
            slot.data[slot.pos..slot.pos + payload_len]
                .copy_from_slice(&data[3..3 + payload_len]);
            slot.pos += payload_len;
        }
        slot.active = false;
        let body = slot.data[2..slot.pos].to_vec();

        let crc_stored = u32::from_be_bytes([
            data[3 + payload_len],
            data[3 + payload_len + 1],
            data[3 + payload_len + 2],
            data[3 + payload_len + 3],
        ]);
        if crc32_gse(&body) != crc_stored {
            self.stats.crc_mismatches += 1;
            trace!("gse: fragment {frag_id} CRC mismatch, emitting anyway");
        }

        self.stats.packets += 1;
        self.handle_complete_payload(&body);
    }

    /// A complete GSE payload: `Protocol(2) || Label || IPv4`.
    ///
    /// The label type is not tracked through fragmentation, so the IPv4
    /// start is probed at the three possible label lengths.
    fn handle_complete_payload(&mut self, payload: &[u8]) {
        if payload.len() < 4 {
            return;
        }
        let protocol = ((payload[0] as u16) << 8) | payload[1] as u16;
        if protocol != PROTOCOL_IPV4 {
            return;
        }

        for lab in [0usize, 3, 6] {
            let ip_offset = 2 + lab;
            if ip_offset + 20 > payload.len() {
                continue;
            }
            if payload[ip_offset] & 0xF0 == 0x40 {
                self.emit_ipv4(&payload[ip_offset..]);
                return;
            }
        }
    }

    fn emit_ipv4(&mut self, ip: &[u8]) {
        if ip.len() < 20 || ip[0] >> 4 != 4 {
            return;
        }
        let mut total_len = ((ip[2] as usize) << 8) | ip[3] as usize;
        if total_len > ip.len() {
            total_len = ip.len();
        }
        self.stats.datagrams += 1;
        self.datagrams.push_back(ip[..total_len].to_vec());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testdata::ipv4_udp_packet;

    /// Wrap an IPv4 packet as a single-segment GSE packet with LT=2.
    fn gse_single(ip: &[u8]) -> Vec<u8> {
        let gse_len = 2 + ip.len();
        let mut pkt = vec![0xE0 | ((gse_len >> 8) as u8 & 0x0F), gse_len as u8];
        pkt.extend_from_slice(&[0x08, 0x00]);
        pkt.extend_from_slice(ip);
        pkt
    }

    fn gse_fragments(ip: &[u8], frag_id: u8, pieces: usize) -> Vec<Vec<u8>> {
        // PDU as reassembled: protocol + data; total_len covers it.
        let mut pdu = vec![0x08, 0x00];
        pdu.extend_from_slice(ip);
        let total_len = pdu.len();
        let crc = crc32_gse(&pdu);

        let chunk = pdu.len().div_ceil(pieces);
        let mut out = Vec::new();
        for (i, part) in pdu.chunks(chunk).enumerate() {
            let last = (i + 1) * chunk >= pdu.len();
            let mut body = Vec::new();
            let header_bits: u8;
            if i == 0 {
                // Start: FragID + TotalLength + (protocol+label+data slice)
                header_bits = 0xA0; // S=1 E=0 LT=2
                body.push(frag_id);
                body.extend_from_slice(&(total_len as u16).to_be_bytes());
                body.extend_from_slice(part);
            } else if !last {
                header_bits = 0x20; // S=0 E=0 LT=2
                body.push(frag_id);
                body.extend_from_slice(part);
            } else {
                header_bits = 0x60; // S=0 E=1 LT=2
                body.push(frag_id);
                body.extend_from_slice(part);
                body.extend_from_slice(&crc.to_be_bytes());
            }
            let gse_len = body.len();
            let mut pkt = vec![header_bits | ((gse_len >> 8) as u8 & 0x0F), gse_len as u8];
            pkt.extend_from_slice(&body);
            out.push(pkt);
        }
        out
    }

    #[test]
    fn single_segment_emits_ipv4() {
        let ip = ipv4_udp_packet(0xEFC7_0201, 1234, b"payload-bytes-here-1234567");
        let mut parser = GseParser::new();
        parser.feed(&gse_single(&ip));
        assert_eq!(parser.pop_datagram().as_deref(), Some(ip.as_slice()));
        assert!(parser.pop_datagram().is_none());
    }

    #[test]
    fn fragmented_datagram_reassembles() {
        let ip = ipv4_udp_packet(0xEFC7_0201, 1234, &[0x42u8; 300]);
        let frags = gse_fragments(&ip, 7, 3);
        let mut parser = GseParser::new();
        // Sync must first be acquired from a single-segment packet.
        let lead = ipv4_udp_packet(0xEFC7_0201, 1234, &[1u8; 30]);
        parser.feed(&gse_single(&lead));
        assert!(parser.pop_datagram().is_some());

        for (i, frag) in frags.iter().enumerate() {
            parser.feed(frag);
            if i + 1 < frags.len() {
                assert!(parser.pop_datagram().is_none());
            }
        }
        assert_eq!(parser.pop_datagram().as_deref(), Some(ip.as_slice()));
        assert_eq!(parser.stats().crc_mismatches, 0);
    }

    #[test]
    fn end_without_start_is_ignored() {
        let ip = ipv4_udp_packet(0xEFC7_0201, 9, &[9u8; 64]);
        let frags = gse_fragments(&ip, 3, 2);
        let mut parser = GseParser::new();
        parser.feed_synced(frags.last().unwrap());
        assert!(parser.pop_datagram().is_none());
    }

    #[test]
    fn sync_scan_skips_garbage() {
        let ip = ipv4_udp_packet(0xEFC7_0201, 1234, &[7u8; 40]);
        let mut data = vec![0xDE, 0xAD, 0xBE, 0xEF, 0x51, 0x52];
        data.extend_from_slice(&gse_single(&ip));
        let mut parser = GseParser::new();
        parser.feed(&data);
        assert_eq!(parser.pop_datagram().as_deref(), Some(ip.as_slice()));
    }

    #[test]
    fn padding_clears_chunk() {
        let ip = ipv4_udp_packet(0xEFC7_0201, 1234, &[7u8; 40]);
        let mut data = gse_single(&ip);
        data.push(0x00);
        data.extend_from_slice(&[0x55; 20]);
        let mut parser = GseParser::new();
        parser.feed(&data);
        assert!(parser.pop_datagram().is_some());
        assert_eq!(parser.buffered_len(), 0);
    }

    #[test]
    fn buffer_stays_bounded_on_garbage() {
        let mut parser = GseParser::new();
        // A stream that never syncs: no valid single-segment header.
        let junk = vec![0xDEu8; 4096];
        for _ in 0..64 {
            parser.feed(&junk);
            assert!(parser.buffered_len() <= GSE_BUFFER_MAX);
        }
        assert!(parser.pop_datagram().is_none());

        // Valid input afterwards still parses.
        let ip = ipv4_udp_packet(0xEFC7_0201, 1234, &[3u8; 40]);
        parser.feed(&gse_single(&ip));
        assert_eq!(parser.pop_datagram().as_deref(), Some(ip.as_slice()));
    }

    #[test]
    fn feed_synced_handles_back_to_back_packets() {
        let a = ipv4_udp_packet(0xEFC7_0201, 1, &[1u8; 24]);
        let b = ipv4_udp_packet(0xEFC7_0202, 2, &[2u8; 24]);
        let mut data = gse_single(&a);
        data.extend_from_slice(&gse_single(&b));
        let mut parser = GseParser::new();
        parser.feed_synced(&data);
        assert_eq!(parser.pop_datagram().as_deref(), Some(a.as_slice()));
        assert_eq!(parser.pop_datagram().as_deref(), Some(b.as_slice()));
    }

    #[test]
    fn reset_is_idempotent() {
        let mut parser = GseParser::new();
        parser.feed(&[0xAA; 100]);
        parser.reset();
        let after_one = parser.buffered_len();
        parser.reset();
        assert_eq!(parser.buffered_len(), after_one);
        assert_eq!(after_one, 0);
    }
}
