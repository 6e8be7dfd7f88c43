//! AF tag-packet decoding and ETI-NI frame synthesis.

use bytes::Bytes;
use log::{debug, trace};

use crate::crc::crc16_dab;
use crate::eti::{EtiFrame, ETI_NI_FRAME_SIZE, PAD_BYTE, SYNC_EVEN, SYNC_ODD};

/// Tag identifiers, big-endian ASCII.
const TAG_PTR: u32 = 0x2A70_7472; // "*ptr"
const TAG_DETI: u32 = 0x6465_7469; // "deti"
const TAG_EST_MASK: u32 = 0x6573_7400; // "est" + stream number

/// Protocol announced by "*ptr" for DAB ETI payloads.
const PROTO_DETI: u32 = 0x4445_5449; // "DETI"

/// One stream's characterization and payload from an `est<n>` tag.
#[derive(Debug, Clone, Default)]
struct StcEntry {
    scid: u8,
    sad: u16,
    tpl: u8,
    mst: Vec<u8>,
}

/// Accumulates tag-packet state for the next ETI-NI frame.
#[derive(Debug)]
pub struct EtiBuilder {
    is_eti: bool,
    fc_valid: bool,
    ficf: bool,
    mid: u8,
    fp: u8,
    err: u8,
    dflc: u16,
    /// 24-bit timestamp from the deti tag; occupies TIST bits 31..8.
    tsta: u32,
    nst: u8,
    mnsc: u16,
    rfu: u16,
    fic: Vec<u8>,
    stc: [StcEntry; 64],
}

impl Default for EtiBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EtiBuilder {
    pub fn new() -> Self {
        Self {
            is_eti: false,
            fc_valid: false,
            ficf: false,
            mid: 0,
            fp: 0,
            err: 0,
            dflc: 0,
            tsta: 0xFF_FFFF,
            nst: 0,
            mnsc: 0,
            rfu: 0xFFFF,
            fic: Vec::new(),
            stc: std::array::from_fn(|_| StcEntry::default()),
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Data flow counter of the last decoded `deti` tag.
    pub fn dflc(&self) -> u16 {
        self.dflc
    }

    /// Decode a tag packet: a concatenation of
    /// `{tag_id(32), tag_length_bits(32), value}` items.
    pub fn decode_tag_packet(&mut self, tags: &[u8]) {
        self.nst = 0;
        let mut i = 0;
        while i + 8 <= tags.len() {
            let tag_id = u32::from_be_bytes([tags[i], tags[i + 1], tags[i + 2], tags[i + 3]]);
            let len_bits =
                u32::from_be_bytes([tags[i + 4], tags[i + 5], tags[i + 6], tags[i + 7]]);
            let len = (len_bits as usize).div_ceil(8);
            if i + 8 + len > tags.len() {
                break;
            }
            let value = &tags[i + 8..i + 8 + len];

            if tag_id == TAG_PTR {
                self.decode_ptr(value);
            } else if tag_id == TAG_DETI {
                self.decode_deti(value);
            } else if tag_id & 0xFFFF_FF00 == TAG_EST_MASK {
                self.decode_est(value, (tag_id & 0xFF) as u8);
            }
            // Other tags (time, network) are not needed here.

            i += 8 + len;
        }
    }

    /// `*ptr`: protocol identification.
    fn decode_ptr(&mut self, value: &[u8]) {
        if value.len() != 8 {
            return;
        }
        let proto = u32::from_be_bytes([value[0], value[1], value[2], value[3]]);
        let major = u16::from_be_bytes([value[4], value[5]]);
        let minor = u16::from_be_bytes([value[6], value[7]]);
        self.is_eti = proto == PROTO_DETI && major == 0 && minor == 0;
    }

    /// `deti`: frame characterization, timestamp and FIC.
    fn decode_deti(&mut self, value: &[u8]) {
        if value.len() < 6 {
            return;
        }
        let deti_header = u16::from_be_bytes([value[0], value[1]]);
        let atstf = deti_header & 0x8000 != 0;
        self.ficf = deti_header & 0x4000 != 0;
        let rfudf = deti_header & 0x2000 != 0;
        let fcth = ((deti_header >> 8) & 0x1F) as u16;
        let fct = (deti_header & 0xFF) as u16;
        self.dflc = fcth * 250 + fct;

        let eti_header = u32::from_be_bytes([value[2], value[3], value[4], value[5]]);
        self.err = (eti_header >> 24) as u8;
        self.mid = ((eti_header >> 22) & 0x03) as u8;
        self.fp = ((eti_header >> 19) & 0x07) as u8;
        let rfu_bit = eti_header & 0x1_0000 != 0;
        self.mnsc = if rfu_bit {
            0xFFFF
        } else {
            (eti_header & 0xFFFF) as u16
        };

        let mut i = 6;
        if atstf {
            // utco + seconds precede the 24-bit TSTA.
            i += 5;
            if value.len() < i + 3 {
                return;
            }
            self.tsta = u32::from_be_bytes([0, value[i], value[i + 1], value[i + 2]]);
            i += 3;
        } else {
            self.tsta = 0xFF_FFFF;
        }

        if self.ficf {
            let fic_len = if self.mid == 3 { 128 } else { 96 };
            if value.len() < i + fic_len {
                debug!("edi: deti too short for {fic_len}-byte FIC");
                return;
            }
            self.fic.clear();
            self.fic.extend_from_slice(&value[i..i + fic_len]);
            i += fic_len;
        }

        self.rfu = 0xFFFF;
        if rfudf && value.len() >= i + 3 {
            let rfud = u32::from_be_bytes([0, value[i], value[i + 1], value[i + 2]]);
            self.rfu = (rfud >> 8) as u16;
        }

        self.fc_valid = true;
    }

    /// `est<n>`: stream characterization and MST payload.
    fn decode_est(&mut self, value: &[u8], n: u8) {
        if value.len() < 3 || n == 0 || n > 64 {
            return;
        }
        let sstc = u32::from_be_bytes([0, value[0], value[1], value[2]]);
        let entry = &mut self.stc[(n - 1) as usize];
        entry.scid = ((sstc >> 18) & 0x3F) as u8;
        entry.sad = ((sstc >> 8) & 0x3FF) as u16;
        entry.tpl = ((sstc >> 2) & 0x3F) as u8;
        entry.mst.clear();
        entry.mst.extend_from_slice(&value[3..]);
        if self.nst < 64 {
            self.nst += 1;
        }
    }

    /// Synthesize the 6144-byte ETI-NI frame from the decoded tags.
    ///
    /// Returns the frame together with its data flow counter, or `None`
    /// when the builder state is not a complete ETI description.
    pub fn assemble(&self) -> Option<(EtiFrame, u16)> {
        if !self.is_eti || !self.fc_valid || self.fic.is_empty() {
            trace!(
                "edi: skipping assembly (is_eti={}, fc_valid={}, fic={})",
                self.is_eti,
                self.fc_valid,
                self.fic.len()
            );
            return None;
        }
        // Mode 3 carries 32 FIC words, all other modes 24.
        let expected_fic = if self.mid == 3 { 128 } else { 96 };
        if self.fic.len() != expected_fic {
            debug!(
                "edi: FIC length {} inconsistent with mode {}",
                self.fic.len(),
                self.mid
            );
            return None;
        }

        let nst = self.nst as usize;
        let mst_total: usize = self.stc[..nst].iter().map(|e| e.mst.len()).sum();
        // SYNC + FC + STC + EOH + FIC + MST + MST CRC + RFU + TIST.
        if 8 + nst * 4 + 4 + self.fic.len() + mst_total + 8 > ETI_NI_FRAME_SIZE {
            debug!("edi: stream payloads exceed the frame size, dropping");
            return None;
        }

        let mut eti = vec![PAD_BYTE; ETI_NI_FRAME_SIZE];
        let fct = (self.dflc % 250) as u8;
        eti[..4].copy_from_slice(if fct % 2 == 1 { &SYNC_ODD } else { &SYNC_EVEN });

        // FC word.
        eti[4] = fct;
        eti[5] = (if self.ficf { 0x80 } else { 0 }) | self.nst;
        let mut fl = self.nst as u16 + 1 + (self.fic.len() / 4) as u16;
        for entry in &self.stc[..nst] {
            fl += (entry.mst.len() / 4) as u16;
        }
        let fp_mid_fl =
            ((self.fp as u16) << 13) | ((self.mid as u16) << 11) | (fl & 0x7FF);
        eti[6..8].copy_from_slice(&fp_mid_fl.to_be_bytes());

        // STC entries.
        for (i, entry) in self.stc[..nst].iter().enumerate() {
            let stl = (entry.mst.len() / 8) as u16;
            let base = 8 + i * 4;
            eti[base] = (entry.scid << 2) | ((entry.sad >> 8) as u8 & 0x03);
            eti[base + 1] = entry.sad as u8;
            eti[base + 2] = (entry.tpl << 2) | ((stl >> 8) as u8 & 0x03);
            eti[base + 3] = stl as u8;
        }

        // EOH: MNSC and header CRC over FC..MNSC.
        let mut idx = 8 + nst * 4;
        eti[idx..idx + 2].copy_from_slice(&self.mnsc.to_be_bytes());
        let eoh_crc = crc16_dab(&eti[4..idx + 2]);
        eti[idx + 2..idx + 4].copy_from_slice(&eoh_crc.to_be_bytes());
        idx += 4;

        // MST: FIC first, then each stream's payload.
        let mst_start = idx;
        eti[idx..idx + self.fic.len()].copy_from_slice(&self.fic);
        idx += self.fic.len();
        for entry in &self.stc[..nst] {
            eti[idx..idx + entry.mst.len()].copy_from_slice(&entry.mst);
            idx += entry.mst.len();
        }

        // EOF: MST CRC and RFU.
        let mst_crc = crc16_dab(&eti[mst_start..idx]);
        eti[idx..idx + 2].copy_from_slice(&mst_crc.to_be_bytes());
        eti[idx + 2..idx + 4].copy_from_slice(&self.rfu.to_be_bytes());

        // TIST: the 24-bit TSTA occupies bits 31..8.
        eti[idx + 4..idx + 8].copy_from_slice(&(self.tsta << 8).to_be_bytes());

        Some((Bytes::from(eti), self.dflc))
    }
}
