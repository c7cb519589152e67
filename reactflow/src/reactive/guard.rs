//! Panic capture for user code and subscriber callbacks.

use crate::errors::{StreamError, StreamResult};
use crate::graph::StageKind;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Runs user code, turning a panic into [`StreamError::Panicked`].
pub(crate) fn guard<R>(stage: StageKind, f: impl FnOnce() -> StreamResult<R>) -> StreamResult<R> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(panicked(stage, &*payload)),
    }
}

/// Builds the error reported for a panic in a stage.
pub(crate) fn panicked(stage: StageKind, payload: &(dyn Any + Send)) -> StreamError {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string());
    StreamError::Panicked { stage, message }
}
