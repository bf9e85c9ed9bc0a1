//! Dispatch layer: retry policies, wire transports, and the per-host scheduler.

pub mod dispatcher;
pub mod retry;
pub mod transport;

pub use dispatcher::{DispatcherConfig, DispatcherHandle, PendingReply};
pub use retry::{RetryConfig, RetryPolicy};
#[cfg(feature = "http")]
pub use transport::HttpTransport;
pub use transport::Transport;
