//! Change detection engine
//!
//! The snapshot-diffing [`Monitor`], the callbacks it reports through,
//! the consumer-acknowledged [`ChangeQueue`] and the [`MonitorManager`]
//! that runs one monitor thread per root.

pub mod callback;
pub mod manager;
pub mod monitor;
pub mod queue;

pub use callback::{Change, ChangeKind, ChangeSubject, FilteringCallback, MonitorCallback};
pub use manager::{stored_summaries, MonitorManager, MonitorReport};
pub use monitor::{
    shutdown_channel, Monitor, MonitorOptions, MonitorState, MonitorStatus, PassFailure,
    PassStats, ShutdownSignal, ShutdownTrigger,
};
pub use queue::{ChangeQueue, QueueFeed, QueueStats, QueuedChange};
