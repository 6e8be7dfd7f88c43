//! Byte-stream to TS packet framing.

use log::trace;

use super::packet::{TsPacket, SYNC_BYTE, TS_PACKET_SIZE};
use super::pid;

/// One TS packet's payload with routing metadata.
#[derive(Debug, Clone)]
pub struct TsPayload<'a> {
    /// Packet identifier.
    pub pid: u16,
    /// Payload unit start indicator.
    pub pusi: bool,
    /// Continuity counter.
    pub cc: u8,
    /// True when the continuity counter broke on this PID.
    pub discontinuity: bool,
    /// Payload bytes.
    pub data: &'a [u8],
}

/// Framing statistics.
#[derive(Debug, Clone, Copy, Default)]
pub struct FramerStats {
    /// Packets emitted.
    pub packets: u64,
    /// Bytes skipped while searching for a sync byte.
    pub resync_bytes: u64,
    /// Packets dropped for TEI or null PID.
    pub dropped: u64,
    /// Continuity breaks observed.
    pub discontinuities: u64,
}

/// Turns an arbitrary byte stream into per-PID payload emissions.
///
/// At most 187 bytes are carried across `feed` calls. A byte that does not
/// start a packet advances the stream by one byte and the search resumes.
#[derive(Debug)]
pub struct TsFramer {
    carry: Vec<u8>,
    last_cc: Vec<u8>,
    stats: FramerStats,
}

const CC_UNKNOWN: u8 = 0xFF;

impl Default for TsFramer {
    fn default() -> Self {
        Self::new()
    }
}

impl TsFramer {
    pub fn new() -> Self {
        Self {
            carry: Vec::with_capacity(TS_PACKET_SIZE),
            last_cc: vec![CC_UNKNOWN; 0x2000],
            stats: FramerStats::default(),
        }
    }

    /// Drop buffered bytes and continuity state.
    pub fn reset(&mut self) {
        self.carry.clear();
        self.last_cc.fill(CC_UNKNOWN);
    }

    pub fn stats(&self) -> FramerStats {
        self.stats
    }

    /// Feed a chunk of the stream, emitting each packet's payload.
    pub fn feed<F: for<'a> FnMut(TsPayload<'a>)>(&mut self, data: &[u8], mut sink: F) {
        self.feed_packets(data, |raw, discontinuity| {
            let packet = match TsPacket::parse(raw) {
                Ok(p) => p,
                Err(_) => return,
            };
            if !packet.header.has_payload() {
                return;
            }
            sink(TsPayload {
                pid: packet.header.pid,
                pusi: packet.header.payload_unit_start,
                cc: packet.header.continuity_counter,
                discontinuity,
                data: packet.payload,
            });
        });
    }

    /// Feed a chunk of the stream, emitting each raw 188-byte packet with
    /// its continuity verdict. TEI and null packets are dropped.
    pub fn feed_packets<F: FnMut(&[u8], bool)>(&mut self, data: &[u8], mut sink: F) {
        let mut pos = 0;

        // Complete a carried partial packet first.
        if !self.carry.is_empty() {
            let needed = TS_PACKET_SIZE - self.carry.len();
            if data.len() < needed {
                self.carry.extend_from_slice(data);
                return;
            }
            self.carry.extend_from_slice(&data[..needed]);
            pos = needed;

            let carry = std::mem::take(&mut self.carry);
            self.emit_packet(&carry, &mut sink);
        }

        while pos < data.len() {
            if data[pos] != SYNC_BYTE {
                pos += 1;
                self.stats.resync_bytes += 1;
                continue;
            }
            if pos + TS_PACKET_SIZE > data.len() {
                break;
            }
            self.emit_packet(&data[pos..pos + TS_PACKET_SIZE], &mut sink);
            pos += TS_PACKET_SIZE;
        }

        if pos < data.len() {
            self.carry.extend_from_slice(&data[pos..]);
        }
    }

    fn emit_packet<F: FnMut(&[u8], bool)>(&mut self, raw: &[u8], sink: &mut F) {
        let hdr = match super::packet::TsHeader::parse(raw) {
            Ok(h) => h,
            Err(_) => return,
        };

        if hdr.transport_error || hdr.pid == pid::NULL {
            self.stats.dropped += 1;
            return;
        }

        let mut discontinuity = false;
        let last = self.last_cc[hdr.pid as usize];
        if last != CC_UNKNOWN && hdr.has_payload() {
            let expected = (last + 1) & 0x0F;
            if hdr.continuity_counter != expected {
                discontinuity = true;
                self.stats.discontinuities += 1;
                trace!(
                    "ts: continuity break on pid {}: {} -> {}",
                    hdr.pid,
                    last,
                    hdr.continuity_counter
                );
            }
        }
        self.last_cc[hdr.pid as usize] = hdr.continuity_counter;

        self.stats.packets += 1;
        sink(raw, discontinuity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_packet(pid: u16, pusi: bool, cc: u8, fill: u8) -> [u8; TS_PACKET_SIZE] {
        let mut pkt = [fill; TS_PACKET_SIZE];
        pkt[0] = SYNC_BYTE;
        pkt[1] = (if pusi { 0x40 } else { 0x00 }) | ((pid >> 8) as u8 & 0x1F);
        pkt[2] = pid as u8;
        pkt[3] = 0x10 | (cc & 0x0F);
        pkt
    }

    fn collect(framer: &mut TsFramer, data: &[u8]) -> Vec<(u16, bool, u8, bool, usize)> {
        let mut out = Vec::new();
        framer.feed(data, |p| {
            out.push((p.pid, p.pusi, p.cc, p.discontinuity, p.data.len()))
        });
        out
    }

    #[test]
    fn partial_packet_boundary() {
        let pkt = make_packet(100, true, 0, 0xAB);
        let mut framer = TsFramer::new();

        // 187 bytes: nothing comes out.
        assert!(collect(&mut framer, &pkt[..187]).is_empty());
        // One more byte completes the packet.
        let out = collect(&mut framer, &pkt[187..]);
        assert_eq!(out, vec![(100, true, 0, false, 184)]);
    }

    #[test]
    fn resync_after_garbage() {
        let pkt = make_packet(100, false, 3, 0x11);
        let mut data = vec![0x00, 0x12, 0x99];
        data.extend_from_slice(&pkt);
        let mut framer = TsFramer::new();
        let out = collect(&mut framer, &data);
        assert_eq!(out.len(), 1);
        assert_eq!(framer.stats().resync_bytes, 3);
    }

    #[test]
    fn null_and_tei_dropped() {
        let null = make_packet(0x1FFF, false, 0, 0);
        let mut tei = make_packet(200, false, 0, 0);
        tei[1] |= 0x80;
        let mut data = Vec::new();
        data.extend_from_slice(&null);
        data.extend_from_slice(&tei);
        let mut framer = TsFramer::new();
        assert!(collect(&mut framer, &data).is_empty());
        assert_eq!(framer.stats().dropped, 2);
    }

    #[test]
    fn continuity_flagging() {
        let mut data = Vec::new();
        data.extend_from_slice(&make_packet(50, false, 4, 0));
        data.extend_from_slice(&make_packet(50, false, 5, 0));
        data.extend_from_slice(&make_packet(50, false, 9, 0));

        let mut framer = TsFramer::new();
        let out = collect(&mut framer, &data);
        assert_eq!(out[0].3, false);
        assert_eq!(out[1].3, false);
        assert_eq!(out[2].3, true);
        assert_eq!(framer.stats().discontinuities, 1);
    }

    #[test]
    fn continuity_is_per_pid() {
        let mut data = Vec::new();
        data.extend_from_slice(&make_packet(50, false, 4, 0));
        data.extend_from_slice(&make_packet(60, false, 11, 0));
        data.extend_from_slice(&make_packet(50, false, 5, 0));
        data.extend_from_slice(&make_packet(60, false, 12, 0));

        let mut framer = TsFramer::new();
        let out = collect(&mut framer, &data);
        assert!(out.iter().all(|e| !e.3));
    }

    #[test]
    fn split_feed_equals_single_feed() {
        let mut data = Vec::new();
        for cc in 0..6u8 {
            data.extend_from_slice(&make_packet(77, cc == 0, cc, cc));
        }

        let mut one = TsFramer::new();
        let whole = collect(&mut one, &data);

        let mut two = TsFramer::new();
        let mut split = Vec::new();
        for chunk in data.chunks(61) {
            split.extend(collect(&mut two, chunk));
        }
        assert_eq!(whole, split);
    }

    #[test]
    fn reset_clears_carry() {
        let pkt = make_packet(10, false, 0, 0);
        let mut framer = TsFramer::new();
        assert!(collect(&mut framer, &pkt[..100]).is_empty());
        framer.reset();
        // The 88 remaining bytes no longer complete anything.
        assert!(collect(&mut framer, &pkt[100..]).is_empty());
    }
}
