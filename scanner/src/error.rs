use thiserror::Error;

/// Errors that reach the operator. Malformed ticks, sink rejections and
/// eviction races are counted and logged instead.
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("feed disconnected after {attempts} attempts: {last_error}")]
    FeedDisconnected { attempts: u32, last_error: String },

    #[error("scan task failed: {0}")]
    TaskFailed(String),
}
