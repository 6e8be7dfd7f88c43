//! EDI (Encapsulation of DAB over IP) decapsulation, ETSI TS 102 693.
//!
//! PF fragments are reassembled into AF packets, AF tag packets are
//! decoded, and each complete description is synthesized into a canonical
//! 6144-byte ETI-NI frame.

mod builder;
mod pf;

pub use builder::EtiBuilder;
pub use pf::{PfHeader, PfReassembler, PfStats};

use log::{debug, trace};

use crate::crc::check_crc16_dab;
use crate::eti::EtiFrame;

/// AF packet header: magic + length + seq + flags + protocol type.
const AF_HEADER_LEN: usize = 10;

/// Parser statistics.
#[derive(Debug, Clone, Copy, Default)]
pub struct EdiStats {
    /// EDI packets fed.
    pub packets: u64,
    /// AF packets decoded (direct or reassembled).
    pub af_packets: u64,
    /// AF packets rejected (bad header, CRC, protocol type).
    pub af_rejected: u64,
    /// ETI-NI frames synthesized.
    pub frames: u64,
}

/// Parses an EDI packet stream into ETI-NI frames.
#[derive(Debug, Default)]
pub struct EdiParser {
    pf: PfReassembler,
    builder: EtiBuilder,
    stats: EdiStats,
}

impl EdiParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.pf.reset();
        self.builder.reset();
    }

    pub fn stats(&self) -> EdiStats {
        self.stats
    }

    /// True once at least one ETI frame has been produced.
    pub fn has_data(&self) -> bool {
        self.stats.frames > 0
    }

    /// Feed one EDI packet (AF or PF). Returns any ETI-NI frames
    /// completed by it, each with its data flow counter.
    pub fn feed(&mut self, packet: &[u8]) -> Vec<(EtiFrame, u16)> {
        self.stats.packets += 1;
        let mut out = Vec::new();

        if packet.len() < 2 {
            return out;
        }
        if &packet[..2] == b"AF" {
            if self.handle_af(packet) {
                self.try_assemble(&mut out);
            }
        } else if &packet[..2] == b"PF" {
            if let Some(af) = self.pf.add_fragment(packet) {
                if self.handle_af(&af) {
                    self.try_assemble(&mut out);
                }
            }
        } else {
            trace!("edi: unknown packet magic {:02x}{:02x}", packet[0], packet[1]);
        }
        out
    }

    /// Decode an AF packet's tag payload into the builder.
    ///
    /// The AF length field is interpreted as bytes: deployed encoders
    /// write byte counts here even though ETSI TS 102 821 says bits.
    fn handle_af(&mut self, pkt: &[u8]) -> bool {
        if pkt.len() < AF_HEADER_LEN || &pkt[..2] != b"AF" {
            self.stats.af_rejected += 1;
            return false;
        }

        let taglength =
            u32::from_be_bytes([pkt[2], pkt[3], pkt[4], pkt[5]]) as usize;
        let has_crc = pkt[8] & 0x80 != 0;
        let pt = pkt[9];

        if pt != b'T' {
            debug!("edi: AF protocol type {pt:#04x} is not a tag packet");
            self.stats.af_rejected += 1;
            return false;
        }

        let total = AF_HEADER_LEN + taglength + if has_crc { 2 } else { 0 };
        if pkt.len() < total {
            debug!("edi: AF truncated ({} < {})", pkt.len(), total);
            self.stats.af_rejected += 1;
            return false;
        }

        if has_crc && !check_crc16_dab(&pkt[..total]) {
            debug!("edi: AF CRC mismatch");
            self.stats.af_rejected += 1;
            return false;
        }

        self.stats.af_packets += 1;
        self.builder
            .decode_tag_packet(&pkt[AF_HEADER_LEN..AF_HEADER_LEN + taglength]);
        true
    }

    fn try_assemble(&mut self, out: &mut Vec<(EtiFrame, u16)>) {
        if let Some(frame) = self.builder.assemble() {
            self.stats.frames += 1;
            out.push(frame);
        }
    }
}
