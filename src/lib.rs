//! DAB/DAB+ ensemble extraction from DVB transport streams.
//!
//! A DVB multiplex can carry DAB payload in several encapsulations: IP in
//! MPE sections, IP in GSE (directly in TS payloads or inside BBFrames
//! wrapped in a pseudo-TS), or raw ETI-NA over E1/G.704 framing. This
//! crate peels those layers, recovers canonical 6144-byte ETI-NI frames
//! (EN 300 799), and decodes the Fast Information Channel into an
//! ensemble service catalog.
//!
//! The crate is sans-I/O: every stage is a `feed`-style sink driven by the
//! caller, and output surfaces as returned events or snapshot accessors.
//! No sockets, files, or threads are owned here.
//!
//! # Scanning a transport stream
//!
//! ```ignore
//! use dvbdab::scanner::{ScanStatus, ScannerConfig, TsScanner};
//!
//! let mut scanner = TsScanner::new(ScannerConfig::default());
//! while let Some(chunk) = read_chunk() {
//!     if scanner.feed(&chunk) == ScanStatus::Done {
//!         break;
//!     }
//! }
//! for ensemble in scanner.results() {
//!     println!("{:#06x} {} ({} services)", ensemble.eid, ensemble.label,
//!              ensemble.services.len());
//! }
//! ```
//!
//! # Layer map
//!
//! ```text
//!          +-- MPE sections --+
//! raw TS --+-- GSE packets ---+-- IPv4/UDP -- EDI (PF/AF) -- ETI-NI --+
//!          +-- BBFrames ------+                                       +-- FIC -- ensemble
//! raw TS -- ETI-NA (E1) ---------------------- ETI-NI ----------------+
//! ```

pub mod bbframe;
pub mod charset;
pub mod crc;
pub mod discovery;
pub mod edi;
pub mod ensemble;
pub mod error;
pub mod eti;
pub mod etina;
pub mod fic;
pub mod gse;
pub mod manager;
pub mod mpe;
pub mod scanner;
pub mod sources;
pub mod ts;
pub mod udp;

#[cfg(test)]
mod testdata;

pub use discovery::{DiscoveryStatus, EnsembleDiscovery};
pub use ensemble::{DabEnsemble, DabService, StreamKey, SubchannelChange};
pub use error::FrameError;
pub use eti::{EtiFrame, FrameChar, ETI_NI_FRAME_SIZE};
pub use fic::FicDecoder;
pub use manager::{EnsembleManager, ManagerEvent};
pub use scanner::{
    DiscoveredEnsemble, DiscoveredService, EtiNaDetectionInfo, ScanStatus, ScannerConfig,
    TsScanner,
};
pub use sources::{BbfTsSource, GseTsSource, InputFormat, MpeTsSource};
