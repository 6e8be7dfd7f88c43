//! Callback-fed ensemble discovery with a two-tier timeout.
//!
//! For integrations that already demultiplex the transport stream and can
//! hand over IP packets directly. Discovery fails fast when no multicast
//! UDP shows up within the early window, and otherwise runs until every
//! discovered stream is complete or the total window elapses.

use std::time::{Duration, Instant};

use log::{debug, info};

use crate::manager::{EnsembleManager, ManagerEvent};
use crate::scanner::DiscoveredEnsemble;
use crate::udp::UdpExtractor;

/// Outcome of a discovery feed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryStatus {
    /// Keep feeding.
    Continue,
    /// All discovered streams are complete.
    Done,
    /// Timed out (early window without multicast, or total window without
    /// a completed ensemble).
    Failed,
}

/// Feed-driven ensemble discovery.
#[derive(Debug)]
pub struct EnsembleDiscovery {
    manager: EnsembleManager,
    udp: UdpExtractor,
    results: Vec<DiscoveredEnsemble>,
    early_timeout: Duration,
    total_timeout: Duration,
    started: Option<Instant>,
    multicast_seen: bool,
    done: bool,
    failed: bool,
}

impl EnsembleDiscovery {
    pub fn new(early_timeout: Duration, total_timeout: Duration) -> Self {
        Self {
            manager: EnsembleManager::new(),
            udp: UdpExtractor::new(),
            results: Vec::new(),
            early_timeout,
            total_timeout,
            started: None,
            multicast_seen: false,
            done: false,
            failed: false,
        }
    }

    /// Feed one IPv4 packet (for example an MPE section payload).
    pub fn feed_ip_packet(&mut self, ip: &[u8]) -> DiscoveryStatus {
        if self.done {
            return self.status();
        }
        let started = *self.started.get_or_insert_with(Instant::now);

        if let Some(dg) = self.udp.process(ip) {
            let first_octet = (dg.dst_ip >> 24) as u8;
            if (224..=239).contains(&first_octet) {
                self.multicast_seen = true;
                let (dst_ip, dst_port) = (dg.dst_ip, dg.dst_port);
                let payload = dg.payload.to_vec();
                for event in self.manager.process_udp(dst_ip, dst_port, &payload) {
                    if let ManagerEvent::Complete { key, ensemble } = event {
                        info!("discovery: {key} complete");
                        self.results
                            .push(crate::scanner::to_discovered(key, 0, &ensemble));
                    }
                }
            }
        }

        if self.manager.all_complete() && self.manager.complete_count() > 0 {
            self.done = true;
            return DiscoveryStatus::Done;
        }

        let elapsed = started.elapsed();
        if !self.multicast_seen && elapsed >= self.early_timeout {
            debug!("discovery: no multicast within the early window");
            self.done = true;
            self.failed = true;
        } else if elapsed >= self.total_timeout {
            self.done = true;
            self.failed = self.results.is_empty();
        }
        self.status()
    }

    fn status(&self) -> DiscoveryStatus {
        if !self.done {
            DiscoveryStatus::Continue
        } else if self.failed {
            DiscoveryStatus::Failed
        } else {
            DiscoveryStatus::Done
        }
    }

    /// Whether discovery has finished (successfully or not).
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Whether any ensemble was discovered.
    pub fn has_ensembles(&self) -> bool {
        !self.results.is_empty()
    }

    /// The discovered ensembles.
    pub fn results(&self) -> &[DiscoveredEnsemble] {
        &self.results
    }
}
