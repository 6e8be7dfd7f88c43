//! DAB data model: services, ensembles, stream keys.

use std::fmt;

/// A single DAB programme service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DabService {
    /// Service ID (16 bits for audio services, 32 bits for data services).
    pub sid: u32,
    /// Service label, UTF-8, trailing padding removed.
    pub label: String,
    /// Audio bitrate in kbps.
    pub bitrate_kbps: u32,
    /// Sub-channel carrying the primary component.
    pub subchannel_id: u8,
    /// Sub-channel start address in capacity units.
    pub start_addr: u16,
    /// Sub-channel size in capacity units (0 for UEP short form).
    pub subchannel_size: u16,
    /// true for DAB+ (HE-AAC), false for classic DAB (MPEG-1 Layer II).
    pub dabplus: bool,
    /// Protection level (EEP: 0-7 across the A/B option split).
    pub protection_level: u8,
    /// true for EEP long form, false for UEP short form.
    pub eep_protection: bool,
}

/// A DAB ensemble with its service catalog.
///
/// Services are sorted ascending by SID whenever a snapshot is published.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DabEnsemble {
    /// Ensemble identifier.
    pub eid: u16,
    /// Ensemble label, UTF-8.
    pub label: String,
    /// Services, ascending by SID.
    pub services: Vec<DabService>,
}

impl DabEnsemble {
    /// Look up a service by SID.
    pub fn find_service(&self, sid: u32) -> Option<&DabService> {
        self.services.iter().find(|s| s.sid == sid)
    }
}

/// Routing key for a UDP-carried ensemble stream.
///
/// Ordered by IP, then port. ETI-NA streams reuse the key with the PID in
/// the `ip` field and port 0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StreamKey {
    pub ip: u32,
    pub port: u16,
}

impl StreamKey {
    pub fn new(ip: u32, port: u16) -> Self {
        Self { ip, port }
    }

    /// Key form used for ETI-NA streams discovered on a PID.
    pub fn from_pid(pid: u16) -> Self {
        Self {
            ip: pid as u32,
            port: 0,
        }
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}:{}",
            (self.ip >> 24) & 0xFF,
            (self.ip >> 16) & 0xFF,
            (self.ip >> 8) & 0xFF,
            self.ip & 0xFF,
            self.port
        )
    }
}

/// Sentinel sub-channel value for added/removed services in change reports.
pub const SUBCHANNEL_NONE: u8 = 0xFF;

/// One service's sub-channel reassignment, reported after completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubchannelChange {
    /// Service whose mapping changed.
    pub sid: u32,
    /// Previous sub-channel, `SUBCHANNEL_NONE` for a new service.
    pub old_subchannel: u8,
    /// New sub-channel, `SUBCHANNEL_NONE` for a removed service.
    pub new_subchannel: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_key_ordering() {
        let a = StreamKey::new(0xEFC7_0201, 1234);
        let b = StreamKey::new(0xEFC7_0201, 1235);
        let c = StreamKey::new(0xEFC7_0202, 1);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn stream_key_display() {
        let key = StreamKey::new(0xEFC7_0201, 1234);
        assert_eq!(key.to_string(), "239.199.2.1:1234");
    }

    #[test]
    fn find_service() {
        let ens = DabEnsemble {
            eid: 0x1001,
            label: "Demo".into(),
            services: vec![
                DabService {
                    sid: 0x2001,
                    ..Default::default()
                },
                DabService {
                    sid: 0x2002,
                    ..Default::default()
                },
            ],
        };
        assert!(ens.find_service(0x2001).is_some());
        assert!(ens.find_service(0x2003).is_none());
    }
}
