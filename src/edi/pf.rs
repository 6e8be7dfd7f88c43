//! PF (Protocol Fragment) reassembly, ETSI TS 102 821.

use std::collections::{BTreeMap, HashMap, VecDeque};

use log::{debug, trace};

use crate::error::FrameError;

/// Cap on concurrently reassembling sequences; the oldest is evicted.
const MAX_COLLECTORS: usize = 64;

/// Parsed PF packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PfHeader {
    /// Packet sequence number; all fragments of one AF packet share it.
    pub pseq: u16,
    /// Fragment index, `0..fcount`.
    pub findex: u32,
    /// Total fragment count.
    pub fcount: u32,
    /// FEC parameters present (2 extra header bytes).
    pub fec: bool,
    /// Address parameters present (4 extra header bytes).
    pub addr: bool,
    /// Fragment payload length.
    pub plen: u16,
}

impl PfHeader {
    /// Parse and validate a PF header.
    pub fn parse(pkt: &[u8]) -> Result<Self, FrameError> {
        if pkt.len() < 14 {
            return Err(FrameError::Truncated {
                need: 14,
                got: pkt.len(),
            });
        }
        if &pkt[..2] != b"PF" {
            return Err(FrameError::BadSync);
        }

        let pseq = u16::from_be_bytes([pkt[2], pkt[3]]);
        let findex = u32::from_be_bytes([0, pkt[4], pkt[5], pkt[6]]);
        let fcount = u32::from_be_bytes([0, pkt[7], pkt[8], pkt[9]]);
        let fec_addr_plen = u16::from_be_bytes([pkt[10], pkt[11]]);

        let header = PfHeader {
            pseq,
            findex,
            fcount,
            fec: fec_addr_plen & 0x8000 != 0,
            addr: fec_addr_plen & 0x4000 != 0,
            plen: fec_addr_plen & 0x3FFF,
        };

        if header.fcount == 0 || header.fcount > 256 || header.findex >= header.fcount {
            return Err(FrameError::OutOfRange);
        }
        if pkt.len() < header.len_with_payload() {
            return Err(FrameError::InvalidLength(header.plen as usize));
        }
        Ok(header)
    }

    /// Header size: 14 bytes plus optional FEC and address parameters.
    pub fn header_len(&self) -> usize {
        14 + if self.fec { 2 } else { 0 } + if self.addr { 4 } else { 0 }
    }

    fn len_with_payload(&self) -> usize {
        self.header_len() + self.plen as usize
    }
}

#[derive(Debug, Default)]
struct PfCollector {
    fcount: u32,
    fragments: BTreeMap<u32, Vec<u8>>,
}

/// Reassembler statistics.
#[derive(Debug, Clone, Copy, Default)]
pub struct PfStats {
    /// Fragments accepted.
    pub fragments: u64,
    /// AF packets delivered.
    pub assembled: u64,
    /// Packets rejected at header parse.
    pub rejected: u64,
    /// Collectors evicted before completing.
    pub evicted: u64,
}

/// Collects PF fragments per `pseq` and delivers AF packets when complete.
#[derive(Debug, Default)]
pub struct PfReassembler {
    collectors: HashMap<u16, PfCollector>,
    order: VecDeque<u16>,
    stats: PfStats,
}

impl PfReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.collectors.clear();
        self.order.clear();
    }

    pub fn stats(&self) -> PfStats {
        self.stats
    }

    /// Number of in-flight sequences.
    pub fn in_flight(&self) -> usize {
        self.collectors.len()
    }

    /// Add one PF packet. Returns the reassembled AF packet once every
    /// fragment of its sequence has arrived.
    pub fn add_fragment(&mut self, pkt: &[u8]) -> Option<Vec<u8>> {
        let header = match PfHeader::parse(pkt) {
            Ok(h) => h,
            Err(e) => {
                debug!("pf: rejecting packet: {e}");
                self.stats.rejected += 1;
                return None;
            }
        };

        let payload = &pkt[header.header_len()..header.len_with_payload()];

        if !self.collectors.contains_key(&header.pseq) {
            self.evict_if_full();
            self.order.push_back(header.pseq);
        }
        let collector = self.collectors.entry(header.pseq).or_default();

        // A pseq reused with a different fragment count starts over.
        if collector.fcount != header.fcount {
            collector.fcount = header.fcount;
            collector.fragments.clear();
        }

        collector
            .fragments
            .entry(header.findex)
            .or_insert_with(|| payload.to_vec());
        self.stats.fragments += 1;

        if collector.fragments.len() as u32 != collector.fcount {
            return None;
        }

        let Some(collector) = self.collectors.remove(&header.pseq) else {
            return None;
        };
        self.order.retain(|&p| p != header.pseq);

        let mut af = Vec::new();
        for (_, frag) in collector.fragments {
            af.extend_from_slice(&frag);
        }
        trace!(
            "pf: pseq {} complete, {} fragments, {} bytes",
            header.pseq,
            collector.fcount,
            af.len()
        );
        self.stats.assembled += 1;
        Some(af)
    }

    fn evict_if_full(&mut self) {
        while self.collectors.len() >= MAX_COLLECTORS {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.collectors.remove(&oldest);
                    self.stats.evicted += 1;
                    debug!("pf: evicted incomplete pseq {oldest}");
                }
                None => break,
            }
        }
    }
}
