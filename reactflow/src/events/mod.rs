//! Engine lifecycle events.
//!
//! Every artifact an engine builds reports when it starts and how it ends to
//! the [`EventSink`] injected into its engine. Engines without a sink emit
//! nothing.

mod sink;
mod stream_event;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
pub use stream_event::{StreamEvent, StreamEventKind};
