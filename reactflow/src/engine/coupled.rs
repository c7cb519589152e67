//! The coupled stage: a subscriber graph and a publisher graph whose
//! terminations are linked.
//!
//! - upstream completes or fails: the subscriber side sees it, and
//!   downstream receives the same terminal signal
//! - the subscriber side cancels: downstream completes
//! - the publisher side terminates or downstream cancels: the subscriber side
//!   completes and upstream is cancelled

use super::compiler::Compiler;
use super::operators::guarded_future;
use crate::errors::{StreamError, StreamResult};
use crate::graph::{Element, Graph, StageKind};
use crate::reactive::{CancelSignal, ElementStream};
use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use tracing::debug;

#[derive(Default)]
struct Link {
    subscriber_done: CancelSignal,
    subscriber_error: Mutex<Option<StreamError>>,
    publisher_done: CancelSignal,
}

type Start = Box<dyn FnOnce() + Send>;

struct Coupled {
    start: Option<Start>,
    stream: Option<ElementStream>,
    link: Arc<Link>,
}

/// Builds the coupled operator. The subscriber side starts on first poll.
pub(crate) fn coupled(
    compiler: &Compiler,
    upstream: ElementStream,
    subscriber: Graph,
    publisher: &Graph,
) -> ElementStream {
    let link = Arc::new(Link::default());
    let start: Start = {
        let compiler = compiler.clone();
        let link = link.clone();
        Box::new(move || {
            let watched = link.clone();
            let upstream = upstream
                .take_until(async move { watched.publisher_done.cancelled().await })
                .boxed();
            let sink = guarded_future(StageKind::Coupled, compiler.subscriber(&subscriber, upstream));
            compiler.runtime().spawn(async move {
                match sink.await {
                    Ok(_) | Err(StreamError::Cancelled) => {}
                    Err(error) => *link.subscriber_error.lock() = Some(error),
                }
                debug!("Coupled subscriber side finished");
                link.subscriber_done.cancel();
            });
        })
    };

    Coupled {
        start: Some(start),
        stream: Some(compiler.publisher(publisher)),
        link,
    }
    .boxed()
}

impl Coupled {
    fn finish(&mut self, signal: Option<StreamResult<Element>>) -> Poll<Option<StreamResult<Element>>> {
        self.stream = None;
        self.link.publisher_done.cancel();
        Poll::Ready(signal)
    }
}

impl Stream for Coupled {
    type Item = StreamResult<Element>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if let Some(start) = this.start.take() {
            start();
        }
        if this.stream.is_none() {
            return Poll::Ready(None);
        }
        if this.link.subscriber_done.poll_cancelled(cx).is_ready() {
            let error = this.link.subscriber_error.lock().take();
            return this.finish(error.map(Err));
        }
        let Some(stream) = this.stream.as_mut() else {
            return Poll::Ready(None);
        };
        match ready!(stream.poll_next_unpin(cx)) {
            Some(Ok(element)) => Poll::Ready(Some(Ok(element))),
            other => this.finish(other),
        }
    }
}

impl Drop for Coupled {
    fn drop(&mut self) {
        self.link.publisher_done.cancel();
    }
}
