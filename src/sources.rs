//! Input-format front-ends.
//!
//! Every supported carriage (MPE-in-TS, GSE-in-TS, BBFrame-in-pseudo-TS)
//! converges on IPv4 packets; the front-ends own the TS framing and
//! continuity discipline and reset their payload parser on a break.

use std::collections::VecDeque;

use crate::bbframe::BbframeExtractor;
use crate::gse::GseParser;
use crate::mpe::{mpe_section_ip, MpeSectionAccumulator};
use crate::ts::TsFramer;

/// DAB carriage formats a transport stream may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    /// IP datagrams in MPE sections (table_id 0x3E).
    MpeTs,
    /// GSE packets directly in TS payloads.
    GseTs,
    /// GSE packets inside BBFrames wrapped in a pseudo-TS.
    BbfTs,
}

/// MPE-in-TS front-end filtered to one PID.
#[derive(Debug)]
pub struct MpeTsSource {
    framer: TsFramer,
    accumulator: MpeSectionAccumulator,
    target_pid: u16,
    /// Optional destination filter; zero fields match anything.
    filter_ip: u32,
    filter_port: u16,
    packets: VecDeque<Vec<u8>>,
}

impl MpeTsSource {
    pub fn new(target_pid: u16) -> Self {
        Self {
            framer: TsFramer::new(),
            accumulator: MpeSectionAccumulator::new(),
            target_pid,
            filter_ip: 0,
            filter_port: 0,
            packets: VecDeque::new(),
        }
    }

    /// Restrict emission to one UDP destination.
    pub fn set_filter(&mut self, ip: u32, port: u16) {
        self.filter_ip = ip;
        self.filter_port = port;
    }

    pub fn reset(&mut self) {
        self.framer.reset();
        self.accumulator.reset();
        self.packets.clear();
    }

    /// Take the next extracted IPv4 packet.
    pub fn pop_packet(&mut self) -> Option<Vec<u8>> {
        self.packets.pop_front()
    }

    pub fn feed(&mut self, data: &[u8]) {
        let accumulator = &mut self.accumulator;
        let packets = &mut self.packets;
        let target_pid = self.target_pid;
        let (filter_ip, filter_port) = (self.filter_ip, self.filter_port);

        self.framer.feed(data, |p| {
            if p.pid != target_pid {
                return;
            }
            if p.discontinuity {
                accumulator.reset();
            }
            accumulator.feed_payload(p.data, p.pusi, p.cc);
            while let Some(section) = accumulator.pop_section() {
                if let Some(ip) = mpe_section_ip(&section) {
                    if matches_filter(ip, filter_ip, filter_port) {
                        packets.push_back(ip.to_vec());
                    }
                }
            }
        });
    }
}

/// Check an IPv4 packet against an optional `(ip, port)` destination
/// filter; zero fields match anything.
fn matches_filter(ip: &[u8], filter_ip: u32, filter_port: u16) -> bool {
    if filter_ip == 0 && filter_port == 0 {
        return true;
    }
    let Some(dg) = crate::udp::extract_udp(ip) else {
        return false;
    };
    if filter_ip != 0 && dg.dst_ip != filter_ip {
        return false;
    }
    if filter_port != 0 && dg.dst_port != filter_port {
        return false;
    }
    true
}

/// GSE-in-TS front-end.
#[derive(Debug, Default)]
pub struct GseTsSource {
    framer: TsFramer,
    gse: GseParser,
}

impl GseTsSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.framer.reset();
        self.gse.reset();
    }

    pub fn pop_packet(&mut self) -> Option<Vec<u8>> {
        self.gse.pop_datagram()
    }

    pub fn feed(&mut self, data: &[u8]) {
        let gse = &mut self.gse;
        self.framer.feed(data, |p| {
            if p.discontinuity {
                gse.reset();
            }
            gse.feed_ts_payload(p.data);
        });
    }
}

/// BBFrame-in-pseudo-TS front-end.
#[derive(Debug, Default)]
pub struct BbfTsSource {
    framer: TsFramer,
    bbframe: BbframeExtractor,
    gse: GseParser,
}

impl BbfTsSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.framer.reset();
        self.bbframe.reset();
        self.gse.reset();
    }

    pub fn pop_packet(&mut self) -> Option<Vec<u8>> {
        self.gse.pop_datagram()
    }

    pub fn feed(&mut self, data: &[u8]) {
        // The BBFrame layer needs the raw 188-byte packet, not just the
        // payload, so this path frames on packet boundaries.
        let bbframe = &mut self.bbframe;
        let gse = &mut self.gse;
        self.framer.feed_packets(data, |pkt, discontinuity| {
            if discontinuity {
                gse.reset();
                bbframe.reset();
            }
            bbframe.feed_packet(pkt, gse);
        });
    }

    /// Deliver a trailing partial BBFrame at end of stream.
    pub fn flush(&mut self) {
        self.bbframe.flush(&mut self.gse);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testdata::{ipv4_udp_packet, mpe_section, section_to_ts};

    #[test]
    fn mpe_source_extracts_ip_packets() {
        let ip = ipv4_udp_packet(0xEFC7_0201, 1234, &[0x42; 64]);
        let section = mpe_section(&ip);
        let (packets, _) = section_to_ts(&section, 3000, 0);

        let mut source = MpeTsSource::new(3000);
        for p in &packets {
            source.feed(p);
        }
        assert_eq!(source.pop_packet().as_deref(), Some(ip.as_slice()));
        assert!(source.pop_packet().is_none());
    }

    #[test]
    fn mpe_source_ignores_other_pids() {
        let ip = ipv4_udp_packet(0xEFC7_0201, 1234, &[0x42; 64]);
        let section = mpe_section(&ip);
        let (packets, _) = section_to_ts(&section, 3001, 0);

        let mut source = MpeTsSource::new(3000);
        for p in &packets {
            source.feed(p);
        }
        assert!(source.pop_packet().is_none());
    }

    /// Wrap a GSE byte stream into 188-byte TS packets on `pid`.
    fn gse_stream_to_ts(pid: u16, stream: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        for (i, chunk) in stream.chunks(184).enumerate() {
            let mut pkt = [0u8; 188];
            pkt[0] = 0x47;
            pkt[1] = ((pid >> 8) as u8) & 0x1F;
            pkt[2] = pid as u8;
            pkt[3] = 0x10 | ((i as u8) & 0x0F);
            pkt[4..4 + chunk.len()].copy_from_slice(chunk);
            if chunk.len() < 184 {
                // GSE stuffing fills the rest of the payload.
                for b in &mut pkt[4 + chunk.len()..] {
                    *b = 0x00;
                }
            }
            out.extend_from_slice(&pkt);
        }
        out
    }

    fn gse_single(ip: &[u8]) -> Vec<u8> {
        let gse_len = 2 + ip.len();
        let mut pkt = vec![0xE0 | ((gse_len >> 8) as u8 & 0x0F), gse_len as u8];
        pkt.extend_from_slice(&[0x08, 0x00]);
        pkt.extend_from_slice(ip);
        pkt
    }

    #[test]
    fn gse_source_extracts_ip_packets() {
        let a = ipv4_udp_packet(0xEFC7_0201, 1234, &[0x11; 200]);
        let b = ipv4_udp_packet(0xEFC7_0201, 1234, &[0x22; 200]);
        let mut stream = gse_single(&a);
        stream.extend_from_slice(&gse_single(&b));

        let mut source = GseTsSource::new();
        source.feed(&gse_stream_to_ts(0x0777, &stream));
        assert_eq!(source.pop_packet().as_deref(), Some(a.as_slice()));
        assert_eq!(source.pop_packet().as_deref(), Some(b.as_slice()));
        assert!(source.pop_packet().is_none());
    }

    #[test]
    fn bbf_source_extracts_ip_packets() {
        let ip = ipv4_udp_packet(0xEFC7_0201, 1234, &[0x33; 300]);
        let gse = gse_single(&ip);

        // BBFrame: sync + 10-byte header with DFL in bits, then GSE data.
        let mut frame = vec![0u8; 11];
        frame[0] = 0xB8;
        let dfl = (gse.len() * 8) as u16;
        frame[5] = (dfl >> 8) as u8;
        frame[6] = dfl as u8;
        frame.extend_from_slice(&gse);

        // Pseudo-TS wrapping: byte 7 length, data from byte 8 (start) or 9.
        let mut ts = Vec::new();
        let mut pos = 0;
        let mut first = true;
        let mut cc = 0u8;
        while pos < frame.len() {
            let mut pkt = [0u8; 188];
            pkt[0] = 0x47;
            pkt[1] = 0x02;
            pkt[2] = 0x00;
            pkt[3] = 0x10 | (cc & 0x0F);
            cc = cc.wrapping_add(1);
            if first {
                let take = (frame.len() - pos).min(180);
                pkt[7] = take as u8;
                pkt[8..8 + take].copy_from_slice(&frame[pos..pos + take]);
                pos += take;
                first = false;
            } else {
                let take = (frame.len() - pos).min(179);
                pkt[7] = (take + 1) as u8;
                pkt[9..9 + take].copy_from_slice(&frame[pos..pos + take]);
                pos += take;
            }
            ts.extend_from_slice(&pkt);
        }

        let mut source = BbfTsSource::new();
        source.feed(&ts);
        source.flush();
        assert_eq!(source.pop_packet().as_deref(), Some(ip.as_slice()));
    }

    #[test]
    fn mpe_source_destination_filter() {
        let wanted = ipv4_udp_packet(0xEFC7_0201, 1234, &[0x01; 32]);
        let other = ipv4_udp_packet(0xEFC7_0202, 9999, &[0x02; 32]);

        let mut source = MpeTsSource::new(3000);
        source.set_filter(0xEFC7_0201, 1234);
        let mut cc = 0;
        for ip in [&other, &wanted] {
            let (packets, next_cc) = section_to_ts(&mpe_section(ip), 3000, cc);
            cc = next_cc;
            for p in &packets {
                source.feed(p);
            }
        }
        assert_eq!(source.pop_packet().as_deref(), Some(wanted.as_slice()));
        assert!(source.pop_packet().is_none());
    }
}
