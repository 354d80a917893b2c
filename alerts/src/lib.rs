pub mod dedup;
pub mod model;
pub mod sink;

pub use dedup::{AlertDeduplicator, AlertPhase, Decision};
pub use model::{Alert, AlertKey};
pub use sink::{AlertSink, ChannelSink, LogSink, SinkError, channel_sink};
