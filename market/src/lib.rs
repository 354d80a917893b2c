//! Market-side half of the scan pipeline: raw vendor payloads in, per-symbol
//! rolling statistics out.

pub mod feed;
pub mod normalizer;
pub mod queue;
pub mod rolling_window;
pub mod tracker;
pub mod types;
