//! Output side of the pipeline
//!
//! - `viz` / `jsonl`: visualization feed backends
//! - `notifier`: outbound alert transports
//! - `dispatcher`: ledgered, concurrent, retried alert delivery
//! - `backoff`: retry delays shared by sinks and sources

pub mod backoff;
pub mod dispatcher;
pub mod jsonl;
pub mod notifier;
pub mod viz;

pub use dispatcher::NotificationDispatcher;
pub use jsonl::{JsonlVizSink, RotatingJsonlWriter};
pub use notifier::{LogNotifier, Notifier, NotifyError, WebhookNotifier};
pub use viz::{ChannelVizSink, SinkError, VizEvent, VizSink};
