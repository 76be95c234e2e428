//! `adsb-relay` - Turns an ADS-B receiver's live feed into per-flight reports
//!
//! This library polls a local decoder's aircraft snapshot, tracks every
//! aircraft while it stays in range, and uploads one summary record per
//! flight once the aircraft is no longer reported.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod cli;
pub mod config;
pub mod error;
pub mod flight;
pub mod logging;
pub mod merge;
pub mod observation;
pub mod processor;
pub mod scheduler;
pub mod sink;
pub mod source;
pub mod store;

pub use config::Config;
pub use error::{Error, Result};
pub use flight::{FlightEvent, FlightState};
pub use logging::init_logging;
pub use observation::{Observation, Snapshot};
pub use processor::{CycleProcessor, CycleReport, ProcessorSettings};
pub use scheduler::{Scheduler, SchedulerStats};
pub use sink::{HttpUploadSink, LogSink, UploadBatch, UploadSink};
pub use source::{HttpSnapshotSource, SnapshotSource};
pub use store::{FlightStore, StoreStats};
