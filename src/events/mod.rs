pub mod publisher;

pub use publisher::{BroadcasterStats, PublishError, StatusBroadcaster, StatusEvent, StatusSink};
