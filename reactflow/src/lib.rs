//! # Reactflow
//!
//! Declarative reactive-stream graphs with acknowledgement-preserving
//! messages.
//!
//! Reactflow separates describing a stream pipeline from running it:
//!
//! - **Messages**: payloads paired with an acknowledgement action that
//!   survives payload transformations
//! - **Stage graphs**: immutable, reusable descriptions of sources,
//!   operators and sinks
//! - **Engines**: turn a graph into a live publisher, subscriber, processor
//!   or completion handle
//! - **Backpressure**: every artifact honours reactive-streams demand and
//!   propagates cancellation upstream
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use reactflow::prelude::*;
//!
//! let engine = StreamEngine::new();
//!
//! // Describe once
//! let pipeline = streams::of(vec![1, 2, 3])
//!     .map(|n| n * 2)
//!     .filter(|n| *n > 2)
//!     .to_list();
//!
//! // Run any number of times
//! let result = pipeline.run(&engine)?.await?;
//! assert_eq!(result, vec![4, 6]);
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod config;
pub mod engine;
pub mod errors;
pub mod events;
pub mod graph;
pub mod message;
pub mod observability;
pub mod reactive;
pub mod streams;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::EngineConfig;
    pub use crate::engine::{
        CompletionHandle, Engine, ProcessorHandle, PublisherHandle, StreamEngine,
        SubscriberWithCompletion,
    };
    pub use crate::errors::{
        AckError, ContractErrorInfo, EngineError, GraphShapeError, StreamError,
        StreamResult, UnsupportedStageError,
    };
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::graph::{Element, Graph, Shape, Stage, StageKind};
    pub use crate::message::{Envelope, Message, MessageExt};
    pub use crate::reactive::{Processor, Publisher, Subscriber, Subscription};
    pub use crate::streams::{
        self, CompletionRunner, ProcessorBuilder, PublisherBuilder, StreamOps,
        SubscriberBuilder,
    };
}
