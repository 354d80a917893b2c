//! Streaming stock screener: wires the feed, tracker, rules and alert sink
//! into one supervised scan run.

pub mod backoff;
pub mod clock;
pub mod config;
pub mod counters;
pub mod error;
pub mod health;
pub mod orchestrator;
pub mod router;

pub use config::ScanConfig;
pub use error::ScanError;
pub use health::ScanHealth;
pub use orchestrator::{ScanHandle, ScanOrchestrator, StopSignal};
