//! Threshold rules over rolling symbol statistics.
//!
//! Everything in this crate is pure: no async, no IO, no clocks.

pub mod config;
pub mod evaluator;
pub mod screen;

pub use config::{PriceRange, RuleConfig, RuleConfigError};
pub use evaluator::{Evaluation, RuleId, RuleSet, evaluate};
pub use screen::{ScreenHit, screen};
