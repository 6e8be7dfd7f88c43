//! Whole-transport-stream DAB survey.
//!
//! Scans every PID without prior knowledge: PIDs whose first PUSI payload
//! carries table_id 0x3E become MPE streams feeding the ensemble manager
//! through the UDP extractor; PIDs that stay PUSI-free for 100 packets
//! become ETI-NA candidates and get a recovery pipeline. Scanning ends on
//! timeout, on full discovery, or through a short early-exit window when
//! the stream carries no DAB at all.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use log::{debug, info};

use crate::ensemble::{DabEnsemble, StreamKey};
use crate::etina::{EtiNaDetection, EtiNaPipeline};
use crate::fic::FicDecoder;
use crate::manager::{EnsembleManager, ManagerEvent};
use crate::mpe::{mpe_section_ip, MpeSectionAccumulator};
use crate::ts::TsFramer;
use crate::udp::extract_udp;

/// Packets on a PID with zero PUSI before it becomes an ETI-NA candidate.
const ETINA_PACKET_THRESHOLD: u32 = 100;

/// Search-buffer budget before an ETI-NA candidate is abandoned.
const ETINA_SEARCH_BUDGET: usize = 16 * 1024;

/// Scanner policy knobs, evaluated at each feed entry.
#[derive(Debug, Clone, Copy)]
pub struct ScannerConfig {
    /// Total scan budget.
    pub timeout: Duration,
    /// Give up early when nothing DAB-shaped appeared within this window.
    pub early_exit: Duration,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(500),
            early_exit: Duration::from_millis(1000),
        }
    }
}

/// Result of one feed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStatus {
    /// Keep feeding.
    Continue,
    /// Scanning finished; further feeds are rejected.
    Done,
}

/// ETI-NA recovery parameters for a detected PID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EtiNaDetectionInfo {
    /// PID carrying the ETI-NA stream.
    pub pid: u16,
    /// Leading 0xFF bytes per payload.
    pub padding_bytes: usize,
    /// Bit offset at which E1 sync locked.
    pub sync_bit_offset: u8,
    /// Stream was bitwise inverted.
    pub inverted: bool,
}

/// One service in a discovery result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredService {
    pub sid: u32,
    pub label: String,
    pub bitrate_kbps: u32,
    pub subchannel_id: u8,
    pub dabplus: bool,
}

/// One discovered ensemble with its carriage parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredEnsemble {
    /// Multicast destination (zero for ETI-NA streams).
    pub ip: u32,
    pub port: u16,
    /// PID the stream was found on.
    pub pid: u16,
    pub eid: u16,
    pub label: String,
    pub services: Vec<DiscoveredService>,
    /// True when carried as ETI-NA rather than EDI-over-UDP.
    pub is_etina: bool,
    /// Recovery parameters for ETI-NA streams.
    pub etina_info: Option<EtiNaDetectionInfo>,
}

pub(crate) fn to_discovered(key: StreamKey, pid: u16, ens: &DabEnsemble) -> DiscoveredEnsemble {
    DiscoveredEnsemble {
        ip: key.ip,
        port: key.port,
        pid,
        eid: ens.eid,
        label: ens.label.clone(),
        services: ens
            .services
            .iter()
            .map(|s| DiscoveredService {
                sid: s.sid,
                label: s.label.clone(),
                bitrate_kbps: s.bitrate_kbps,
                subchannel_id: s.subchannel_id,
                dabplus: s.dabplus,
            })
            .collect(),
        is_etina: false,
        etina_info: None,
    }
}

fn to_discovered_etina(
    pid: u16,
    ens: &DabEnsemble,
    info: EtiNaDetectionInfo,
) -> DiscoveredEnsemble {
    let mut de = to_discovered(StreamKey::default(), pid, ens);
    de.pid = pid;
    de.is_etina = true;
    de.etina_info = Some(info);
    de
}

#[derive(Debug, Default)]
struct PidState {
    /// First-PUSI MPE probe done.
    checked: bool,
    is_mpe: bool,
    mpe: Option<MpeSectionAccumulator>,
    packet_count: u32,
    pusi_count: u32,
    etina_checked: bool,
    etina_pipeline: Option<EtiNaPipeline>,
    etina_fic: Option<FicDecoder>,
    etina_streaming: bool,
    etina_reported: bool,
}

/// Surveys a transport stream and enumerates the DAB ensembles it carries.
#[derive(Debug)]
pub struct TsScanner {
    config: ScannerConfig,
    framer: TsFramer,
    pids: Vec<PidState>,
    manager: EnsembleManager,

    mpe_pids: Vec<u16>,
    stream_pid: BTreeMap<StreamKey, u16>,
    results: BTreeMap<StreamKey, DiscoveredEnsemble>,

    etina_detections: Vec<EtiNaDetectionInfo>,
    etina_streaming_pids: Vec<u16>,
    etina_results: BTreeMap<u16, DiscoveredEnsemble>,

    started: Option<Instant>,
    done: bool,
}

impl Default for TsScanner {
    fn default() -> Self {
        Self::new(ScannerConfig::default())
    }
}

impl TsScanner {
    pub fn new(config: ScannerConfig) -> Self {
        let mut pids = Vec::new();
        pids.resize_with(0x2000, PidState::default);
        Self {
            config,
            framer: TsFramer::new(),
            pids,
            manager: EnsembleManager::new(),
            mpe_pids: Vec::new(),
            stream_pid: BTreeMap::new(),
            results: BTreeMap::new(),
            etina_detections: Vec::new(),
            etina_streaming_pids: Vec::new(),
            etina_results: BTreeMap::new(),
            started: None,
            done: false,
        }
    }

    /// Whether scanning has finished.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Whether any TS packets at all were observed.
    pub fn had_traffic(&self) -> bool {
        let stats = self.framer.stats();
        stats.packets + stats.dropped > 0
    }

    /// PIDs confirmed as MPE carriers.
    pub fn mpe_pids(&self) -> &[u16] {
        &self.mpe_pids
    }

    /// Detection parameters of every ETI-NA stream that locked.
    pub fn etina_detections(&self) -> &[EtiNaDetectionInfo] {
        &self.etina_detections
    }

    /// Discovered ensembles (MPE-carried first, then ETI-NA, both in key
    /// order).
    pub fn results(&self) -> Vec<DiscoveredEnsemble> {
        let mut out: Vec<DiscoveredEnsemble> = self.results.values().cloned().collect();
        out.extend(self.etina_results.values().cloned());
        out
    }

    /// Feed raw TS bytes. Partial packets are carried across calls.
    pub fn feed(&mut self, data: &[u8]) -> ScanStatus {
        if self.done {
            return ScanStatus::Done;
        }
        let started = *self.started.get_or_insert_with(Instant::now);

        let mut payloads: Vec<OwnedPayload> = Vec::new();
        self.framer.feed(data, |p| {
            payloads.push(OwnedPayload {
                pid: p.pid,
                pusi: p.pusi,
                cc: p.cc,
                discontinuity: p.discontinuity,
                data: p.data.to_vec(),
            });
        });

        for p in payloads {
            self.process_payload(p.pid, p.pusi, p.cc, p.discontinuity, &p.data);
        }

        self.evaluate_exit(started)
    }

    fn process_payload(
        &mut self,
        pid: u16,
        pusi: bool,
        cc: u8,
        discontinuity: bool,
        payload: &[u8],
    ) {
        let mut sections: Vec<Vec<u8>> = Vec::new();
        let mut etina_outcome = EtiNaOutcome::default();

        {
            let st = &mut self.pids[pid as usize];

            if discontinuity {
                if let Some(acc) = &mut st.mpe {
                    acc.reset();
                }
            }

            // Probe the first PUSI payload for the MPE table id.
            if !st.checked && pusi && payload.len() > 1 {
                st.checked = true;
                let pointer = payload[0] as usize;
                if pointer < payload.len() - 1 && payload[1 + pointer] == 0x3E {
                    info!("scanner: pid {pid} carries MPE");
                    st.is_mpe = true;
                    st.mpe = Some(MpeSectionAccumulator::new());
                    self.mpe_pids.push(pid);
                }
            }

            if st.is_mpe {
                if let Some(acc) = &mut st.mpe {
                    acc.feed_payload(payload, pusi, cc);
                    while let Some(section) = acc.pop_section() {
                        sections.push(section);
                    }
                }
            }

            st.packet_count += 1;
            if pusi {
                st.pusi_count += 1;
            }

            // A PID that never starts a payload unit may be an ETI-NA
            // carrier.
            if !st.etina_checked && !st.is_mpe && st.packet_count >= ETINA_PACKET_THRESHOLD {
                if st.pusi_count == 0 {
                    debug!("scanner: pid {pid} is an ETI-NA candidate");
                    st.etina_pipeline = Some(EtiNaPipeline::new());
                    st.etina_fic = Some(FicDecoder::new());
                }
                st.etina_checked = true;
            }

            if let (Some(pipeline), Some(fic)) = (&mut st.etina_pipeline, &mut st.etina_fic) {
                for frame in pipeline.feed_payload(payload) {
                    if !st.etina_streaming {
                        st.etina_streaming = true;
                        etina_outcome.started_streaming = true;
                    }
                    if !st.etina_reported {
                        st.etina_reported = true;
                        etina_outcome.detection = pipeline.detection();
                    }
                    fic.feed_eti_frame(&frame);
                    if fic.is_complete() {
                        etina_outcome.completed =
                            Some((fic.ensemble().clone(), pipeline.detection()));
                    }
                }

                // Too much buffered data without a frame: not ETI-NA.
                if !st.etina_streaming && pipeline.search_buffer_len() > ETINA_SEARCH_BUDGET {
                    debug!("scanner: pid {pid} abandoned as ETI-NA candidate");
                    st.etina_pipeline = None;
                    st.etina_fic = None;
                }
            }
        }

        for section in sections {
            self.handle_mpe_section(pid, &section);
        }
        self.apply_etina_outcome(pid, etina_outcome);
    }

    fn handle_mpe_section(&mut self, pid: u16, section: &[u8]) {
        let Some(ip) = mpe_section_ip(section) else {
            return;
        };
        let Some(dg) = extract_udp(ip) else {
            return;
        };
        // Only multicast destinations carry EDI ensembles.
        let first_octet = (dg.dst_ip >> 24) as u8;
        if !(224..=239).contains(&first_octet) {
            return;
        }

        let key = StreamKey::new(dg.dst_ip, dg.dst_port);
        self.stream_pid.entry(key).or_insert(pid);

        for event in self.manager.process_udp(dg.dst_ip, dg.dst_port, dg.payload) {
            match event {
                ManagerEvent::BasicReady { key, ensemble }
                | ManagerEvent::Complete { key, ensemble } => {
                    let pid = self.stream_pid.get(&key).copied().unwrap_or(0);
                    self.results
                        .insert(key, to_discovered(key, pid, &ensemble));
                }
                _ => {}
            }
        }
    }

    fn apply_etina_outcome(&mut self, pid: u16, outcome: EtiNaOutcome) {
        if outcome.started_streaming {
            self.etina_streaming_pids.push(pid);
        }
        if let Some(det) = outcome.detection {
            info!(
                "scanner: pid {pid} ETI-NA locked (padding {}, bit offset {}, inverted {})",
                det.padding_bytes, det.sync_bit_offset, det.inverted
            );
            self.etina_detections.push(EtiNaDetectionInfo {
                pid,
                padding_bytes: det.padding_bytes,
                sync_bit_offset: det.sync_bit_offset,
                inverted: det.inverted,
            });
        }
        if let Some((ensemble, det)) = outcome.completed {
            let info = det
                .map(|d| EtiNaDetectionInfo {
                    pid,
                    padding_bytes: d.padding_bytes,
                    sync_bit_offset: d.sync_bit_offset,
                    inverted: d.inverted,
                })
                .unwrap_or(EtiNaDetectionInfo {
                    pid,
                    padding_bytes: 0,
                    sync_bit_offset: 0,
                    inverted: false,
                });
            self.etina_results
                .insert(pid, to_discovered_etina(pid, &ensemble, info));
        }
    }

    fn evaluate_exit(&mut self, started: Instant) -> ScanStatus {
        let elapsed = started.elapsed();

        if elapsed >= self.config.timeout {
            info!("scanner: timeout after {} results", self.results.len());
            self.done = true;
            return ScanStatus::Done;
        }

        // All discovered streams complete?
        let mpe_basic = self.results.len();
        let mpe_complete_count = self.manager.complete_count();
        let mpe_complete = mpe_basic == 0
            || (mpe_complete_count > 0 && mpe_complete_count >= mpe_basic);

        let etina_streaming = self.etina_streaming_pids.len();
        let etina_complete =
            etina_streaming == 0 || self.etina_results.len() >= etina_streaming;

        let has_content = mpe_basic > 0 || etina_streaming > 0;
        if has_content && mpe_complete && etina_complete {
            info!("scanner: discovery complete");
            self.done = true;
            return ScanStatus::Done;
        }

        // Nothing DAB-shaped at all: stop early.
        if elapsed >= self.config.early_exit
            && self.mpe_pids.is_empty()
            && self.etina_streaming_pids.is_empty()
            && self.results.is_empty()
        {
            info!("scanner: no DAB content, exiting early");
            self.done = true;
            return ScanStatus::Done;
        }

        ScanStatus::Continue
    }
}

#[derive(Debug)]
struct OwnedPayload {
    pid: u16,
    pusi: bool,
    cc: u8,
    discontinuity: bool,
    data: Vec<u8>,
}

#[derive(Debug, Default)]
struct EtiNaOutcome {
    started_streaming: bool,
    detection: Option<EtiNaDetection>,
    completed: Option<(DabEnsemble, Option<EtiNaDetection>)>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testdata::{
        build_fic_frames, edi_af_for_fic, interleave_eti_to_multiframe, ipv4_udp_packet,
        mpe_section, section_to_ts, shift_and_invert, TestService,
    };
    use crate::ts::TS_PACKET_SIZE;

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

    fn long_config() -> ScannerConfig {
        ScannerConfig {
            timeout: Duration::from_secs(120),
            early_exit: Duration::from_secs(120),
        }
    }

    #[test]
    fn discovers_mpe_carried_ensemble() {
        let fics = build_fic_frames(0x1001, b"DemoEns         ", &SERVICES);
        let mut scanner = TsScanner::new(long_config());

        let mut cc = 0u8;
        let mut dflc = 0u16;
        let mut finished = false;
        'outer: for _ in 0..20 {
            for fic in &fics {
                let af = edi_af_for_fic(dflc, fic, &[&[0u8; 32]]);
                dflc = (dflc + 1) % 5000;
                let ip = ipv4_udp_packet(0xEFC7_0201, 1234, &af);
                let section = mpe_section(&ip);
                let (packets, next_cc) = section_to_ts(&section, 0x0BB8, cc);
                cc = next_cc;
                let mut stream = Vec::new();
                for p in &packets {
                    stream.extend_from_slice(p);
                }
                if scanner.feed(&stream) == ScanStatus::Done {
                    finished = true;
                    break 'outer;
                }
            }
        }
        assert!(finished, "scanner never finished discovery");

        let results = scanner.results();
        assert_eq!(results.len(), 1);
        let ens = &results[0];
        assert_eq!(ens.ip, 0xEFC7_0201);
        assert_eq!(ens.port, 1234);
        assert_eq!(ens.pid, 0x0BB8);
        assert_eq!(ens.eid, 0x1001);
        assert_eq!(ens.label, "DemoEns");
        assert!(!ens.is_etina);
        assert_eq!(ens.services.len(), 2);
        assert_eq!(ens.services[0].label, "News");
        assert_eq!(ens.services[0].bitrate_kbps, 96);
        assert!(ens.services[0].dabplus);
        assert_eq!(ens.services[1].label, "Music");

        assert_eq!(scanner.mpe_pids(), &[0x0BB8u16][..]);
        assert!(scanner.had_traffic());
    }

    /// Wrap a continuous (PUSI-free) payload stream into TS packets.
    fn continuous_ts(pid: u16, payloads: &[Vec<u8>]) -> Vec<u8> {
        let mut out = Vec::new();
        for (i, payload) in payloads.iter().enumerate() {
            assert_eq!(payload.len(), 184);
            let mut pkt = [0u8; TS_PACKET_SIZE];
            pkt[0] = 0x47;
            pkt[1] = ((pid >> 8) as u8) & 0x1F;
            pkt[2] = pid as u8;
            pkt[3] = 0x10 | ((i as u8) & 0x0F);
            pkt[4..].copy_from_slice(payload);
            out.extend_from_slice(&pkt);
        }
        out
    }

    #[test]
    fn discovers_etina_carried_ensemble() {
        // Deinterleaved multiframe content = real ETI frame bodies built
        // through the EDI path, cycling the FIC rotation.
        let fics = build_fic_frames(0x6000, b"UKDab           ", &SERVICES);
        let mut edi = crate::edi::EdiParser::new();
        let content_len = 3 * (2 * 227 + 6 * 235);

        let mut stream = Vec::new();
        let mut dflc = 0u16;
        for _ in 0..16 {
            for fic in &fics {
                let frames = edi.feed(&edi_af_for_fic(dflc, fic, &[&[0u8; 32]]));
                dflc += 1;
                for (frame, _) in frames {
                    let content = &frame[4..4 + content_len];
                    stream.extend_from_slice(&interleave_eti_to_multiframe(content, false));
                }
            }
        }

        let shifted = shift_and_invert(&stream, 3, true);
        let payloads: Vec<Vec<u8>> = shifted
            .chunks(172)
            .filter(|c| c.len() == 172)
            .map(|c| {
                let mut p = vec![0xFFu8; 12];
                p.extend_from_slice(c);
                p
            })
            .collect();

        let ts = continuous_ts(0x0505, &payloads);
        let mut scanner = TsScanner::new(long_config());
        let mut status = ScanStatus::Continue;
        for chunk in ts.chunks(188 * 64) {
            status = scanner.feed(chunk);
            if status == ScanStatus::Done {
                break;
            }
        }
        assert_eq!(status, ScanStatus::Done);

        let detections = scanner.etina_detections();
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].pid, 0x0505);
        assert_eq!(detections[0].padding_bytes, 12);
        assert_eq!(detections[0].sync_bit_offset, 3);
        assert!(detections[0].inverted);

        let results = scanner.results();
        assert_eq!(results.len(), 1);
        let ens = &results[0];
        assert!(ens.is_etina);
        assert_eq!(ens.pid, 0x0505);
        assert_eq!(ens.eid, 0x6000);
        assert_eq!(ens.label, "UKDab");
        assert_eq!(ens.services.len(), 2);
        assert_eq!(ens.etina_info.unwrap().sync_bit_offset, 3);
    }

    #[test]
    fn zero_timeout_finishes_immediately() {
        let config = ScannerConfig {
            timeout: Duration::ZERO,
            early_exit: Duration::ZERO,
        };
        let mut scanner = TsScanner::new(config);
        let mut pkt = [0u8; TS_PACKET_SIZE];
        pkt[0] = 0x47;
        pkt[3] = 0x10;
        assert_eq!(scanner.feed(&pkt), ScanStatus::Done);
        assert!(scanner.is_done());
        assert_eq!(scanner.feed(&pkt), ScanStatus::Done);
        assert!(scanner.results().is_empty());
    }

    #[test]
    fn early_exit_without_dab_content() {
        let config = ScannerConfig {
            timeout: Duration::from_secs(60),
            early_exit: Duration::ZERO,
        };
        let mut scanner = TsScanner::new(config);
        // Plain data packets on an arbitrary PID, nothing DAB-shaped.
        let mut pkt = [0xABu8; TS_PACKET_SIZE];
        pkt[0] = 0x47;
        pkt[1] = 0x01;
        pkt[2] = 0x00;
        pkt[3] = 0x10;
        assert_eq!(scanner.feed(&pkt), ScanStatus::Done);
    }
}
