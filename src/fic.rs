//! Fast Information Channel decoding (ETSI EN 300 401).
//!
//! Consumes ETI-NI frames, walks the FIBs and FIGs, and builds the
//! ensemble service catalog. Completion is gated on stability: the
//! service count must hold for several consecutive frames before the
//! catalog is published as basic-ready (audio may start) or complete
//! (all labels known).

use std::collections::BTreeMap;

use log::{debug, info, trace};

use crate::charset::decode_label;
use crate::crc::check_crc16_dab;
use crate::ensemble::{DabEnsemble, DabService};
use crate::eti::{sync_valid, FrameChar};

/// Frames the valid-service count must hold before basic-ready.
const BASIC_STABLE_FRAMES: usize = 3;

/// Frames the service count must hold before completion.
const COMPLETE_STABLE_FRAMES: usize = 10;

/// UEP sub-channel bitrates by table index (EN 300 401, table 6).
#[rustfmt::skip]
const UEP_BITRATES: [u32; 64] = [
    32, 32, 32, 32, 32,
    48, 48, 48, 48, 48,
    56, 56, 56, 56,
    64, 64, 64, 64, 64, 64, 64,
    80, 80, 80, 80, 80, 80,
    96, 96, 96, 96, 96, 96,
    112, 112, 112, 112,
    128, 128, 128, 128, 128, 128, 128,
    160, 160, 160, 160, 160, 160,
    192, 192, 192, 192, 192, 192, 192,
    224, 224, 224, 224, 224,
    256, 256,
];

/// EEP size divisors indexed by protection level (1A-4A, 1B-4B).
const EEP_DIVISORS: [u16; 8] = [12, 8, 6, 4, 27, 21, 18, 15];

/// Bitrate in kbps for an EEP sub-channel.
fn eep_bitrate(subchsz: u16, protection_level: u8) -> u32 {
    match EEP_DIVISORS.get(protection_level as usize) {
        Some(&div) => (subchsz / div) as u32 * 8,
        None => 0,
    }
}

/// Sub-channel organization from FIG 0/1.
#[derive(Debug, Clone, Copy, Default)]
struct SubChannel {
    start_addr: u16,
    size: u16,
    bitrate: u32,
    eep: bool,
    protection_level: u8,
    dabplus: bool,
}

/// Service-to-component mapping from FIG 0/2.
#[derive(Debug, Clone, Copy)]
struct ServiceInfo {
    primary_subch: Option<u8>,
    secondary_subch: Option<u8>,
}

/// Packet-mode service component record from FIG 0/3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketModeInfo {
    /// Sub-channel carrying the component.
    pub subchannel_id: u8,
    /// Data service component type.
    pub dscty: u8,
    /// Data-group transport flag.
    pub dg_flag: bool,
}

/// Service component global definition from FIG 0/8.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalComponentInfo {
    /// Service component identifier within the service.
    pub scids: u8,
    /// MSC sub-channel for stream components (short form).
    pub subchannel_id: Option<u8>,
    /// Service component identifier for packet components (long form).
    pub scid: Option<u16>,
}

/// User application record from FIG 0/13.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserApplication {
    /// Service component identifier within the service.
    pub scids: u8,
    /// User application type (11 bits).
    pub ua_type: u16,
}

/// Decoder statistics.
#[derive(Debug, Clone, Copy, Default)]
pub struct FicStats {
    /// ETI frames consumed.
    pub frames: u64,
    /// Frames dropped at the sync word.
    pub bad_sync: u64,
    /// FIBs consumed.
    pub fibs: u64,
    /// FIBs dropped for CRC failure.
    pub fib_crc_errors: u64,
}

/// FIC decoder and ensemble catalog builder.
#[derive(Debug, Default)]
pub struct FicDecoder {
    subchannels: BTreeMap<u8, SubChannel>,
    services: BTreeMap<u32, ServiceInfo>,
    service_labels: BTreeMap<u32, String>,
    packet_mode: BTreeMap<u16, PacketModeInfo>,
    global_components: BTreeMap<u32, Vec<GlobalComponentInfo>>,
    user_applications: BTreeMap<u32, Vec<UserApplication>>,
    ensemble_id: u16,
    ensemble_label: String,

    ensemble: DabEnsemble,
    basic_ready: bool,
    complete: bool,

    last_basic_count: usize,
    basic_stable: usize,
    last_service_count: usize,
    service_stable: usize,

    stats: FicStats,
}

impl FicDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Current ensemble snapshot (services sorted by SID).
    pub fn ensemble(&self) -> &DabEnsemble {
        &self.ensemble
    }

    /// True once services with known sub-channels have been stable for
    /// three frames; audio extraction may start.
    pub fn is_basic_ready(&self) -> bool {
        self.basic_ready
    }

    /// True once every service and the ensemble carry labels and the
    /// service count has been stable for ten frames.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Packet-mode component records (FIG 0/3), keyed by SCId.
    pub fn packet_mode(&self) -> &BTreeMap<u16, PacketModeInfo> {
        &self.packet_mode
    }

    /// Service component global definitions (FIG 0/8), keyed by SID.
    pub fn global_components(&self) -> &BTreeMap<u32, Vec<GlobalComponentInfo>> {
        &self.global_components
    }

    /// User application records (FIG 0/13), keyed by SID.
    pub fn user_applications(&self) -> &BTreeMap<u32, Vec<UserApplication>> {
        &self.user_applications
    }

    pub fn stats(&self) -> FicStats {
        self.stats
    }

    /// Consume one ETI-NI frame. Returns true once the catalog is
    /// complete.
    pub fn feed_eti_frame(&mut self, frame: &[u8]) -> bool {
        self.stats.frames += 1;

        if self.complete {
            return true;
        }
        if frame.len() < 12 {
            return false;
        }
        if !sync_valid(frame) {
            self.stats.bad_sync += 1;
            return false;
        }

        let fc = match FrameChar::parse(&frame[4..8]) {
            Some(fc) => fc,
            None => return false,
        };
        if !fc.ficf {
            return self.complete;
        }

        // FIC follows the STC words and the 4-byte EOH.
        let fic_start = 8 + fc.nst as usize * 4 + 4;
        let fic_len = fc.fic_length();
        if fic_start + fic_len > frame.len() {
            return self.complete;
        }

        self.process_fic(&frame[fic_start..fic_start + fic_len]);

        if !self.services.is_empty() {
            self.build_ensemble();
        }
        self.update_basic_gate();
        self.update_complete_gate();
        self.complete
    }

    fn process_fic(&mut self, fic: &[u8]) {
        for fib in fic.chunks_exact(32) {
            self.process_fib(fib);
        }
    }

    fn process_fib(&mut self, fib: &[u8]) {
        self.stats.fibs += 1;
        if !check_crc16_dab(fib) {
            self.stats.fib_crc_errors += 1;
            return;
        }

        let mut pos = 0;
        while pos < 30 {
            let header = fib[pos];
            if header == 0xFF {
                break;
            }
            let fig_type = (header >> 5) & 0x07;
            let fig_len = (header & 0x1F) as usize;
            if pos + 1 + fig_len > 30 {
                break;
            }
            self.process_fig(fig_type, &fib[pos + 1..pos + 1 + fig_len]);
            pos += 1 + fig_len;
        }
    }

    fn process_fig(&mut self, fig_type: u8, fig: &[u8]) {
        if fig.is_empty() {
            return;
        }
        let ext = fig[0] & 0x1F;
        let pd = (fig[0] >> 5) & 0x01 != 0;
        let data = &fig[1..];

        match fig_type {
            0 => self.process_fig_0(data, ext, pd),
            1 => self.process_fig_1(data, ext),
            // FIG types 2-7 carry nothing the catalog needs.
            _ => {}
        }
    }

    fn process_fig_0(&mut self, data: &[u8], ext: u8, pd: bool) {
        match ext {
            0 => self.fig_0_0(data),
            1 => self.fig_0_1(data),
            2 => self.fig_0_2(data, pd),
            3 => self.fig_0_3(data),
            8 => self.fig_0_8(data, pd),
            13 => self.fig_0_13(data, pd),
            _ => {}
        }
    }

    /// FIG 0/0: ensemble identifier.
    fn fig_0_0(&mut self, data: &[u8]) {
        if data.len() < 4 {
            return;
        }
        let eid = u16::from_be_bytes([data[0], data[1]]);
        if self.ensemble_id != eid {
            trace!("fic: ensemble EID {eid:#06x}");
            self.ensemble_id = eid;
        }
    }

    /// FIG 0/1: sub-channel organization.
    fn fig_0_1(&mut self, data: &[u8]) {
        let mut pos = 0;
        while pos + 3 <= data.len() {
            let subchid = (data[pos] >> 2) & 0x3F;
            let start_addr = (((data[pos] as u16) & 0x03) << 8) | data[pos + 1] as u16;
            let long_form = data[pos + 2] & 0x80 != 0;

            // FIG 0/2 may already have marked this sub-channel DAB+.
            let dabplus = self
                .subchannels
                .get(&subchid)
                .map(|sc| sc.dabplus)
                .unwrap_or(false);

            let sc = if long_form {
                if pos + 4 > data.len() {
                    break;
                }
                let option = (data[pos + 2] >> 4) & 0x07;
                let protlvl = (data[pos + 2] >> 2) & 0x03;
                let size = (((data[pos + 2] as u16) & 0x03) << 8) | data[pos + 3] as u16;
                let protection_level = protlvl + if option != 0 { 4 } else { 0 };
                pos += 4;
                SubChannel {
                    start_addr,
                    size,
                    bitrate: eep_bitrate(size, protection_level),
                    eep: true,
                    protection_level,
                    dabplus,
                }
            } else {
                let table_index = data[pos + 2] & 0x3F;
                pos += 3;
                SubChannel {
                    start_addr,
                    size: 0,
                    bitrate: UEP_BITRATES
                        .get(table_index as usize)
                        .copied()
                        .unwrap_or(0),
                    eep: false,
                    protection_level: table_index,
                    dabplus,
                }
            };
            self.subchannels.insert(subchid, sc);
        }
    }

    /// FIG 0/2: service and component definition.
    fn fig_0_2(&mut self, data: &[u8], pd: bool) {
        let mut pos = 0;
        let sid_len = if pd { 4 } else { 2 };
        while pos + sid_len + 1 <= data.len() {
            let sid = if pd {
                let v = u32::from_be_bytes([
                    data[pos],
                    data[pos + 1],
                    data[pos + 2],
                    data[pos + 3],
                ]);
                pos += 4;
                v
            } else {
                let v = u16::from_be_bytes([data[pos], data[pos + 1]]) as u32;
                pos += 2;
                v
            };

            let num_components = (data[pos] & 0x0F) as usize;
            pos += 1;

            let mut info = ServiceInfo {
                primary_subch: None,
                secondary_subch: None,
            };

            for _ in 0..num_components {
                if pos + 2 > data.len() {
                    break;
                }
                let tmid = (data[pos] >> 6) & 0x03;
                match tmid {
                    0 => {
                        // MSC stream audio.
                        let ascty = data[pos] & 0x3F;
                        let subchid = (data[pos + 1] >> 2) & 0x3F;
                        let primary = data[pos + 1] & 0x02 != 0;

                        // DAB+ announces ASCTy 63 (HE-AAC).
                        if let Some(sc) = self.subchannels.get_mut(&subchid) {
                            sc.dabplus = ascty == 63;
                        }

                        if primary && info.primary_subch.is_none() {
                            info.primary_subch = Some(subchid);
                        } else if info.secondary_subch.is_none() {
                            info.secondary_subch = Some(subchid);
                        }
                    }
                    1 => {
                        // MSC packet data.
                        let subchid = (data[pos + 1] >> 2) & 0x3F;
                        let primary = data[pos + 1] & 0x02 != 0;
                        if primary && info.primary_subch.is_none() {
                            info.primary_subch = Some(subchid);
                        }
                    }
                    _ => {}
                }
                pos += 2;
            }

            if info.primary_subch.is_some() {
                self.services.insert(sid, info);
            }
        }
    }

    /// FIG 0/3: service component in packet mode.
    fn fig_0_3(&mut self, data: &[u8]) {
        let mut pos = 0;
        while pos + 5 <= data.len() {
            let scid = (((data[pos] as u16) & 0x0F) << 8) | data[pos + 1] as u16;
            pos += 2;
            let scca_flag = data[pos] & 0x10 != 0;
            let dg_flag = data[pos] & 0x08 != 0;
            pos += 1;
            let dscty = data[pos] & 0x3F;
            pos += 1;
            let subchannel_id = data[pos] & 0x3F;
            pos += 1;
            if scca_flag && pos + 2 <= data.len() {
                pos += 2;
            }
            self.packet_mode.insert(
                scid,
                PacketModeInfo {
                    subchannel_id,
                    dscty,
                    dg_flag,
                },
            );
        }
    }

    /// FIG 0/8: service component global definition. Links each service
    /// component to its MSC sub-channel (short form) or SCId (long form).
    fn fig_0_8(&mut self, data: &[u8], pd: bool) {
        let mut pos = 0;
        while pos < data.len() {
            let sid_len = if pd { 4 } else { 2 };
            if pos + sid_len > data.len() {
                break;
            }
            let sid = if pd {
                u32::from_be_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]])
            } else {
                u16::from_be_bytes([data[pos], data[pos + 1]]) as u32
            };
            pos += sid_len;

            if pos >= data.len() {
                break;
            }
            let ext_flag = data[pos] & 0x80 != 0;
            let scids = data[pos] & 0x0F;
            pos += 1;

            if pos >= data.len() {
                break;
            }
            let long_form = data[pos] & 0x80 != 0;
            let record = if long_form {
                if pos + 1 >= data.len() {
                    break;
                }
                let scid = (((data[pos] as u16) & 0x0F) << 8) | data[pos + 1] as u16;
                pos += 2;
                GlobalComponentInfo {
                    scids,
                    subchannel_id: None,
                    scid: Some(scid),
                }
            } else {
                let subchannel_id = data[pos] & 0x3F;
                pos += 1;
                GlobalComponentInfo {
                    scids,
                    subchannel_id: Some(subchannel_id),
                    scid: None,
                }
            };

            trace!("fic: FIG 0/8 sid {sid:#x} scids {scids}");
            let components = self.global_components.entry(sid).or_default();
            if !components.contains(&record) {
                components.push(record);
            }

            if ext_flag && pos < data.len() {
                pos += 1;
            }
        }
    }

    /// FIG 0/13: user application information.
    fn fig_0_13(&mut self, data: &[u8], pd: bool) {
        let mut pos = 0;
        while pos < data.len() {
            let sid = if pd {
                if pos + 4 > data.len() {
                    break;
                }
                let v = u32::from_be_bytes([
                    data[pos],
                    data[pos + 1],
                    data[pos + 2],
                    data[pos + 3],
                ]);
                pos += 4;
                v
            } else {
                if pos + 2 > data.len() {
                    break;
                }
                let v = u16::from_be_bytes([data[pos], data[pos + 1]]) as u32;
                pos += 2;
                v
            };

            if pos >= data.len() {
                break;
            }
            let scids = (data[pos] >> 4) & 0x0F;
            let num_apps = (data[pos] & 0x0F) as usize;
            pos += 1;

            for _ in 0..num_apps {
                if pos + 2 > data.len() {
                    return;
                }
                let ua_word = u16::from_be_bytes([data[pos], data[pos + 1]]);
                let ua_type = (ua_word >> 5) & 0x7FF;
                let ua_len = (ua_word & 0x1F) as usize;
                pos += 2;

                trace!("fic: FIG 0/13 sid {sid:#x} ua_type {ua_type:#05x}");
                let apps = self.user_applications.entry(sid).or_default();
                let record = UserApplication { scids, ua_type };
                if !apps.contains(&record) {
                    apps.push(record);
                }
                pos += ua_len;
            }
        }
    }

    fn process_fig_1(&mut self, data: &[u8], ext: u8) {
        if data.len() < 2 {
            return;
        }
        match ext {
            0 => {
                // Ensemble label: EID + 16 chars.
                if data.len() < 18 {
                    return;
                }
                self.ensemble_id = u16::from_be_bytes([data[0], data[1]]);
                let label = decode_label(&data[2..18]);
                if self.ensemble_label != label {
                    debug!(
                        "fic: ensemble {:#06x} label '{label}'",
                        self.ensemble_id
                    );
                    self.ensemble_label = label;
                }
            }
            1 => {
                // Programme service label: SID + 16 chars + flag field.
                if data.len() < 20 {
                    return;
                }
                let sid = u16::from_be_bytes([data[0], data[1]]) as u32;
                let label = decode_label(&data[2..18]);
                if self.service_labels.insert(sid, label).is_none() {
                    debug!(
                        "fic: service {sid:#x} labelled ({} so far)",
                        self.service_labels.len()
                    );
                }
            }
            // Other label kinds (component, data service) not needed.
            _ => {}
        }
    }

    /// Rebuild the published snapshot from the parsed tables.
    fn build_ensemble(&mut self) {
        self.ensemble.eid = self.ensemble_id;
        self.ensemble.label = self.ensemble_label.clone();
        self.ensemble.services.clear();

        // BTreeMap iteration keeps the catalog sorted by SID.
        for (&sid, info) in &self.services {
            let Some(subch) = info.primary_subch else {
                continue;
            };
            let mut svc = DabService {
                sid,
                label: self.service_labels.get(&sid).cloned().unwrap_or_default(),
                subchannel_id: subch,
                ..Default::default()
            };
            if let Some(sc) = self.subchannels.get(&subch) {
                svc.start_addr = sc.start_addr;
                svc.subchannel_size = sc.size;
                svc.bitrate_kbps = sc.bitrate;
                svc.dabplus = sc.dabplus;
                svc.protection_level = sc.protection_level;
                svc.eep_protection = sc.eep;
            }
            self.ensemble.services.push(svc);
        }
    }

    fn update_basic_gate(&mut self) {
        if self.basic_ready || self.services.is_empty() {
            return;
        }
        let valid = self
            .services
            .values()
            .filter(|info| {
                info.primary_subch
                    .map(|s| self.subchannels.contains_key(&s))
                    .unwrap_or(false)
            })
            .count();
        if valid == 0 {
            return;
        }
        if valid != self.last_basic_count {
            self.last_basic_count = valid;
            self.basic_stable = 0;
        } else {
            self.basic_stable += 1;
        }
        if self.basic_stable >= BASIC_STABLE_FRAMES {
            self.basic_ready = true;
            info!("fic: basic ready with {valid} services");
        }
    }

    fn update_complete_gate(&mut self) {
        if self.services.is_empty() {
            return;
        }
        if self.services.len() != self.last_service_count {
            self.last_service_count = self.services.len();
            self.service_stable = 0;
        } else {
            self.service_stable += 1;
        }

        let labelled = self
            .services
            .keys()
            .filter(|sid| self.service_labels.contains_key(sid))
            .count();
        let all_labelled = labelled == self.services.len() && !self.ensemble_label.is_empty();

        if all_labelled && self.service_stable >= COMPLETE_STABLE_FRAMES {
            self.complete = true;
            info!(
                "fic: complete, {} services in ensemble '{}'",
                self.services.len(),
                self.ensemble_label
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testdata::{build_fic_frames, edi_af_for_fic, TestService};

    const SERVICES: [TestService; 2] = [
        TestService {
            sid: 0x2001,
            label: b"News            ",
            subch: 1,
            subchsz: 72,
            dabplus: true,
        },
        TestService {
            sid: 0x2002,
            label: b"Music           ",
            subch: 2,
            subchsz: 72,
            dabplus: true,
        },
    ];

    /// Run an EDI parser over rotating FICs and feed the frames here.
    fn run_frames(decoder: &mut FicDecoder, rounds: usize) {
        let fics = build_fic_frames(0x1001, b"DemoEns         ", &SERVICES);
        let mut edi = crate::edi::EdiParser::new();
        let mut dflc = 0u16;
        for _ in 0..rounds {
            for fic in &fics {
                for (frame, _) in edi.feed(&edi_af_for_fic(dflc, fic, &[&[0u8; 32]])) {
                    decoder.feed_eti_frame(&frame);
                }
                dflc = (dflc + 1) % 5000;
            }
        }
    }

    #[test]
    fn eti_round_trip_builds_catalog() {
        let mut decoder = FicDecoder::new();
        run_frames(&mut decoder, 10);
        assert!(decoder.is_complete());

        let ens = decoder.ensemble();
        assert_eq!(ens.eid, 0x1001);
        assert_eq!(ens.label, "DemoEns");
        assert_eq!(ens.services.len(), 2);

        let news = &ens.services[0];
        assert_eq!(news.sid, 0x2001);
        assert_eq!(news.label, "News");
        assert!(news.dabplus);
        assert_eq!(news.subchannel_id, 1);
        // EEP-3A: bitrate = 72 / 6 * 8 = 96 kbps.
        assert_eq!(news.bitrate_kbps, 96);
        assert!(news.eep_protection);
        assert_eq!(news.protection_level, 2);

        let music = &ens.services[1];
        assert_eq!(music.sid, 0x2002);
        assert_eq!(music.label, "Music");

        // Sorted ascending by SID.
        assert!(ens.services.windows(2).all(|w| w[0].sid < w[1].sid));
    }

    #[test]
    fn basic_ready_fires_before_complete() {
        let mut decoder = FicDecoder::new();
        // Two rounds of two FICs = 4 frames: enough for the 3-frame basic
        // gate but not the 10-frame complete gate.
        run_frames(&mut decoder, 3);
        assert!(decoder.is_basic_ready());
        assert!(!decoder.is_complete());
    }

    #[test]
    fn corrupted_fib_is_ignored() {
        let fics = build_fic_frames(0x1001, b"DemoEns         ", &SERVICES);
        let mut bad_fic = fics[0].clone();
        bad_fic[5] ^= 0xFF; // break FIB 1's CRC

        let mut edi = crate::edi::EdiParser::new();
        let mut decoder = FicDecoder::new();
        for (frame, _) in edi.feed(&edi_af_for_fic(0, &bad_fic, &[&[0u8; 32]])) {
            decoder.feed_eti_frame(&frame);
        }
        assert_eq!(decoder.stats().fib_crc_errors, 1);
        // FIG 0/1 lived in the broken FIB; no sub-channels learned.
        assert!(decoder.subchannels.is_empty());
    }

    #[test]
    fn bad_sync_dropped() {
        let mut decoder = FicDecoder::new();
        let mut frame = vec![0u8; 6144];
        frame[0] = 0xFF;
        frame[1] = 0x12;
        assert!(!decoder.feed_eti_frame(&frame));
        assert_eq!(decoder.stats().bad_sync, 1);
    }

    #[test]
    fn fig_0_8_records_global_components() {
        // One short-form and one long-form entry.
        let mut body = vec![0x08]; // pd=0, ext=8
        body.extend_from_slice(&0x2001u16.to_be_bytes());
        body.push(0x00); // ext_flag=0, scids=0
        body.push(0x05); // short form, sub-channel 5
        body.extend_from_slice(&0x2002u16.to_be_bytes());
        body.push(0x01); // scids=1
        body.push(0x81); // long form, SCId high nibble
        body.push(0x23);

        let mut fib = Vec::new();
        crate::testdata::push_fig(&mut fib, 0, &body);
        let fib = crate::testdata::finish_fib(fib);

        let mut decoder = FicDecoder::new();
        decoder.process_fib(&fib);

        let components = decoder.global_components();
        assert_eq!(
            components[&0x2001],
            vec![GlobalComponentInfo {
                scids: 0,
                subchannel_id: Some(5),
                scid: None,
            }]
        );
        assert_eq!(
            components[&0x2002],
            vec![GlobalComponentInfo {
                scids: 1,
                subchannel_id: None,
                scid: Some(0x123),
            }]
        );

        // A repeat of the same FIB does not duplicate records.
        decoder.process_fib(&fib);
        let components = decoder.global_components();
        assert_eq!(components.len(), 2);
        assert_eq!(components[&0x2001].len(), 1);
    }

    #[test]
    fn uep_table_bitrates() {
        assert_eq!(UEP_BITRATES[0], 32);
        assert_eq!(UEP_BITRATES[27], 96);
        assert_eq!(UEP_BITRATES[63], 256);
    }

    #[test]
    fn eep_bitrate_formula() {
        // EEP-3A (level 2): 72 CUs / 6 * 8 = 96 kbps.
        assert_eq!(eep_bitrate(72, 2), 96);
        // EEP-1A (level 0): 96 CUs / 12 * 8 = 64 kbps.
        assert_eq!(eep_bitrate(96, 0), 64);
        // EEP-4B (level 7): 60 CUs / 15 * 8 = 32 kbps.
        assert_eq!(eep_bitrate(60, 7), 32);
        assert_eq!(eep_bitrate(60, 9), 0);
    }

    #[test]
    fn reset_restarts_gating() {
        let mut decoder = FicDecoder::new();
        run_frames(&mut decoder, 10);
        assert!(decoder.is_complete());
        decoder.reset();
        assert!(!decoder.is_complete());
        assert!(!decoder.is_basic_ready());
        assert!(decoder.ensemble().services.is_empty());
        run_frames(&mut decoder, 10);
        assert!(decoder.is_complete());
    }
}
