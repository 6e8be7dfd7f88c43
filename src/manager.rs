//! Per-stream parser pool and ensemble lifecycle reporting.
//!
//! UDP payloads are routed by `(ip, port)` to a per-stream EDI parser;
//! ETI-NA frames are routed by PID to a per-PID FIC decoder. Lifecycle
//! transitions (basic-ready, complete, sub-channel changes) surface as
//! returned events, each fired once per stream per transition.

use std::collections::BTreeMap;

use log::{debug, info};

use crate::edi::EdiParser;
use crate::ensemble::{DabEnsemble, StreamKey, SubchannelChange, SUBCHANNEL_NONE};
use crate::eti::EtiFrame;
use crate::fic::FicDecoder;
use crate::udp::extract_udp;

/// An observable manager transition or emission.
#[derive(Debug, Clone)]
pub enum ManagerEvent {
    /// A complete ETI-NI frame was recovered for a stream.
    EtiFrame {
        key: StreamKey,
        frame: EtiFrame,
        dflc: u16,
    },
    /// Enough FIC has been decoded to start audio extraction.
    BasicReady { key: StreamKey, ensemble: DabEnsemble },
    /// Every service and the ensemble carry labels.
    Complete { key: StreamKey, ensemble: DabEnsemble },
    /// Sub-channel assignments moved after completion.
    SubchannelChanges {
        key: StreamKey,
        changes: Vec<SubchannelChange>,
    },
}

/// One UDP-carried stream's parsers and lifecycle flags.
#[derive(Debug, Default)]
struct StreamState {
    edi: EdiParser,
    fic: FicDecoder,
    basic_ready_fired: bool,
    complete_fired: bool,
    last_subchannels: BTreeMap<u32, u8>,
}

/// One ETI-NA stream's decoder and lifecycle flags.
#[derive(Debug, Default)]
struct EtiNaState {
    fic: FicDecoder,
    basic_ready_fired: bool,
    complete_fired: bool,
}

/// Routes packets to per-stream parsers and reports ensemble lifecycle.
#[derive(Debug, Default)]
pub struct EnsembleManager {
    streams: BTreeMap<StreamKey, StreamState>,
    etina: BTreeMap<u16, EtiNaState>,
    complete_count: usize,
}

impl EnsembleManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.streams.clear();
        self.etina.clear();
        self.complete_count = 0;
    }

    /// Number of streams seen so far (UDP and ETI-NA).
    pub fn stream_count(&self) -> usize {
        self.streams.len() + self.etina.len()
    }

    /// Number of streams that reached completion.
    pub fn complete_count(&self) -> usize {
        self.complete_count
    }

    /// Whether the given stream reached completion.
    pub fn is_complete(&self, key: &StreamKey) -> bool {
        if let Some(s) = self.streams.get(key) {
            return s.complete_fired;
        }
        if key.port == 0 {
            if let Some(s) = self.etina.get(&(key.ip as u16)) {
                return s.complete_fired;
            }
        }
        false
    }

    /// True when at least one stream exists and all of them completed.
    pub fn all_complete(&self) -> bool {
        if self.streams.is_empty() && self.etina.is_empty() {
            return false;
        }
        self.streams.values().all(|s| s.complete_fired)
            && self.etina.values().all(|s| s.complete_fired)
    }

    /// Current snapshot of every stream's ensemble, complete or not.
    pub fn all_ensembles(&self) -> BTreeMap<StreamKey, DabEnsemble> {
        let mut out = BTreeMap::new();
        for (key, state) in &self.streams {
            out.insert(*key, state.fic.ensemble().clone());
        }
        for (&pid, state) in &self.etina {
            out.insert(StreamKey::from_pid(pid), state.fic.ensemble().clone());
        }
        out
    }

    /// Snapshot of the completed ensembles only.
    pub fn ensembles(&self) -> BTreeMap<StreamKey, DabEnsemble> {
        let mut out = BTreeMap::new();
        for (key, state) in &self.streams {
            if state.complete_fired {
                out.insert(*key, state.fic.ensemble().clone());
            }
        }
        for (&pid, state) in &self.etina {
            if state.complete_fired {
                out.insert(StreamKey::from_pid(pid), state.fic.ensemble().clone());
            }
        }
        out
    }

    /// Feed one UDP payload (EDI PF or AF packet) for `(ip, port)`.
    pub fn process_udp(
        &mut self,
        dst_ip: u32,
        dst_port: u16,
        payload: &[u8],
    ) -> Vec<ManagerEvent> {
        let key = StreamKey::new(dst_ip, dst_port);
        let mut events = Vec::new();

        let state = self.streams.entry(key).or_insert_with(|| {
            debug!("manager: new stream {key}");
            StreamState::default()
        });

        for (frame, dflc) in state.edi.feed(payload) {
            state.fic.feed_eti_frame(&frame);
            events.push(ManagerEvent::EtiFrame { key, frame, dflc });
        }

        if state.fic.is_basic_ready() && !state.basic_ready_fired {
            state.basic_ready_fired = true;
            info!("manager: {key} basic ready");
            events.push(ManagerEvent::BasicReady {
                key,
                ensemble: state.fic.ensemble().clone(),
            });
        }

        if state.fic.is_complete() && !state.complete_fired {
            state.complete_fired = true;
            self.complete_count += 1;
            info!("manager: {key} complete");
            let ensemble = state.fic.ensemble().clone();
            state.last_subchannels = subchannel_map(&ensemble);
            events.push(ManagerEvent::Complete { key, ensemble });
        } else if state.complete_fired {
            let current = subchannel_map(state.fic.ensemble());
            let changes = diff_subchannel_maps(&state.last_subchannels, &current);
            if !changes.is_empty() {
                state.last_subchannels = current;
                events.push(ManagerEvent::SubchannelChanges { key, changes });
            }
        }

        events
    }

    /// Feed a raw IPv4 packet: extract UDP and route it.
    pub fn process_ip_packet(&mut self, ip: &[u8]) -> Vec<ManagerEvent> {
        match extract_udp(ip) {
            Some(dg) if !dg.payload.is_empty() => {
                self.process_udp(dg.dst_ip, dg.dst_port, dg.payload)
            }
            _ => Vec::new(),
        }
    }

    /// Feed an already-recovered ETI-NI frame from the ETI-NA path.
    ///
    /// The basic-ready event precedes the frame event so downstream audio
    /// consumers observe the ensemble before the first audio bytes.
    pub fn process_eti_frame(&mut self, pid: u16, frame: EtiFrame) -> Vec<ManagerEvent> {
        let key = StreamKey::from_pid(pid);
        let mut events = Vec::new();

        let state = self.etina.entry(pid).or_insert_with(|| {
            debug!("manager: new ETI-NA stream on pid {pid}");
            EtiNaState::default()
        });

        state.fic.feed_eti_frame(&frame);

        if state.fic.is_basic_ready() && !state.basic_ready_fired {
            state.basic_ready_fired = true;
            events.push(ManagerEvent::BasicReady {
                key,
                ensemble: state.fic.ensemble().clone(),
            });
        }

        events.push(ManagerEvent::EtiFrame {
            key,
            frame,
            dflc: 0,
        });

        if state.fic.is_complete() && !state.complete_fired {
            state.complete_fired = true;
            self.complete_count += 1;
            events.push(ManagerEvent::Complete {
                key,
                ensemble: state.fic.ensemble().clone(),
            });
        }

        events
    }
}

fn subchannel_map(ensemble: &DabEnsemble) -> BTreeMap<u32, u8> {
    ensemble
        .services
        .iter()
        .map(|s| (s.sid, s.subchannel_id))
        .collect()
}

/// Diff two `sid -> subchannel` maps into change records, using the
/// `SUBCHANNEL_NONE` sentinel for added and removed services.
fn diff_subchannel_maps(
    previous: &BTreeMap<u32, u8>,
    current: &BTreeMap<u32, u8>,
) -> Vec<SubchannelChange> {
    let mut changes = Vec::new();
    for (&sid, &new_subch) in current {
        match previous.get(&sid) {
            None => changes.push(SubchannelChange {
                sid,
                old_subchannel: SUBCHANNEL_NONE,
                new_subchannel: new_subch,
            }),
            Some(&old) if old != new_subch => changes.push(SubchannelChange {
                sid,
                old_subchannel: old,
                new_subchannel: new_subch,
            }),
            _ => {}
        }
    }
    for (&sid, &old) in previous {
        if !current.contains_key(&sid) {
            changes.push(SubchannelChange {
                sid,
                old_subchannel: old,
                new_subchannel: SUBCHANNEL_NONE,
            });
        }
    }
    changes
}
