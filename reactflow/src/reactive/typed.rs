//! Adapters between typed endpoints and the type-erased runtime.

use super::{Publisher, Subscriber, Subscription};
use crate::errors::StreamError;
use crate::graph::Element;
use parking_lot::Mutex;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;

/// A `Subscriber<T>` that forwards to a `Subscriber<Element>`.
pub struct TypedSubscriber<T> {
    inner: Arc<dyn Subscriber<Element>>,
    _marker: PhantomData<fn(T)>,
}

impl<T> TypedSubscriber<T> {
    /// Wraps an element subscriber.
    #[must_use]
    pub fn new(inner: Arc<dyn Subscriber<Element>>) -> Self {
        Self {
            inner,
            _marker: PhantomData,
        }
    }
}

impl<T: Send + 'static> Subscriber<T> for TypedSubscriber<T> {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        self.inner.on_subscribe(subscription);
    }

    fn on_next(&self, item: T) {
        self.inner.on_next(Element::new(item));
    }

    fn on_error(&self, error: StreamError) {
        self.inner.on_error(error);
    }

    fn on_complete(&self) {
        self.inner.on_complete();
    }
}

/// A `Subscriber<Element>` that downcasts to `T` before forwarding.
///
/// An element of the wrong type becomes the terminal error and fails the
/// subscription; later signals are dropped.
pub struct DowncastingSubscriber<T> {
    inner: Arc<dyn Subscriber<T>>,
    subscription: Mutex<Option<Arc<dyn Subscription>>>,
    failed: AtomicBool,
}

impl<T> DowncastingSubscriber<T> {
    /// Wraps a typed subscriber.
    #[must_use]
    pub fn new(inner: Arc<dyn Subscriber<T>>) -> Self {
        Self {
            inner,
            subscription: Mutex::new(None),
            failed: AtomicBool::new(false),
        }
    }
}

impl<T: 'static> Subscriber<Element> for DowncastingSubscriber<T> {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        *self.subscription.lock() = Some(subscription.clone());
        self.inner.on_subscribe(subscription);
    }

    fn on_next(&self, item: Element) {
        if self.failed.load(Ordering::SeqCst) {
            return;
        }
        match item.downcast::<T>() {
            Ok(value) => self.inner.on_next(value),
            Err(error) => {
                self.failed.store(true, Ordering::SeqCst);
                warn!(error = %error, "Dropping element of unexpected type");
                self.inner.on_error(error.clone());
                if let Some(subscription) = self.subscription.lock().take() {
                    subscription.fail(error);
                }
            }
        }
    }

    fn on_error(&self, error: StreamError) {
        if !self.failed.swap(true, Ordering::SeqCst) {
            self.inner.on_error(error);
        }
    }

    fn on_complete(&self) {
        if !self.failed.swap(true, Ordering::SeqCst) {
            self.inner.on_complete();
        }
    }
}

/// A `Publisher<Element>` over a `Publisher<T>`.
pub struct ErasedPublisher<T> {
    inner: Arc<dyn Publisher<T>>,
}

impl<T> ErasedPublisher<T> {
    /// Wraps a typed publisher.
    #[must_use]
    pub fn new(inner: Arc<dyn Publisher<T>>) -> Self {
        Self { inner }
    }
}

impl<T: Send + 'static> Publisher<Element> for ErasedPublisher<T> {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<Element>>) {
        self.inner
            .subscribe(Arc::new(TypedSubscriber::<T>::new(subscriber)));
    }
}

/// A `Publisher<T>` over a `Publisher<Element>`.
pub struct TypedPublisher<T> {
    inner: Arc<dyn Publisher<Element>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> TypedPublisher<T> {
    /// Wraps an element publisher.
    #[must_use]
    pub fn new(inner: Arc<dyn Publisher<Element>>) -> Self {
        Self {
            inner,
            _marker: PhantomData,
        }
    }

    /// Returns the underlying element publisher.
    #[must_use]
    pub fn erased(&self) -> Arc<dyn Publisher<Element>> {
        self.inner.clone()
    }
}

impl<T: 'static> Publisher<T> for TypedPublisher<T> {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) {
        self.inner
            .subscribe(Arc::new(DowncastingSubscriber::new(subscriber)));
    }
}

/// A `Processor<T, R>` over an element subscriber and an element publisher.
pub struct TypedProcessor<T, R> {
    subscriber: TypedSubscriber<T>,
    publisher: TypedPublisher<R>,
}

impl<T, R> TypedProcessor<T, R> {
    /// Wraps the two faces of an element processor.
    #[must_use]
    pub fn new(subscriber: Arc<dyn Subscriber<Element>>, publisher: Arc<dyn Publisher<Element>>) -> Self {
        Self {
            subscriber: TypedSubscriber::new(subscriber),
            publisher: TypedPublisher::new(publisher),
        }
    }
}

impl<T: Send + 'static, R> Subscriber<T> for TypedProcessor<T, R> {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        self.subscriber.on_subscribe(subscription);
    }

    fn on_next(&self, item: T) {
        self.subscriber.on_next(item);
    }

    fn on_error(&self, error: StreamError) {
        self.subscriber.on_error(error);
    }

    fn on_complete(&self) {
        self.subscriber.on_complete();
    }
}

impl<T, R: 'static> Publisher<R> for TypedProcessor<T, R> {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<R>>) {
        self.publisher.subscribe(subscriber);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::mock;
    use std::sync::atomic::AtomicUsize;

    mock! {
        pub Sub {}
        impl Subscription for Sub {
            fn request(&self, n: u64);
            fn cancel(&self);
            fn fail(&self, error: StreamError);
        }
    }

    #[derive(Default)]
    struct Counting {
        next: AtomicUsize,
        errors: AtomicUsize,
        completes: AtomicUsize,
    }

    impl Subscriber<i32> for Counting {
        fn on_subscribe(&self, _subscription: Arc<dyn Subscription>) {}

        fn on_next(&self, _item: i32) {
            self.next.fetch_add(1, Ordering::SeqCst);
        }

        fn on_error(&self, _error: StreamError) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }

        fn on_complete(&self) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_mismatch_fails_subscription_once() {
        let counting = Arc::new(Counting::default());
        let downcasting = DowncastingSubscriber::new(counting.clone() as Arc<dyn Subscriber<i32>>);

        let mut subscription = MockSub::new();
        subscription
            .expect_fail()
            .withf(|error| matches!(error, StreamError::TypeMismatch { .. }))
            .times(1)
            .return_const(());
        subscription.expect_cancel().never();
        downcasting.on_subscribe(Arc::new(subscription));

        downcasting.on_next(Element::new(1_i32));
        downcasting.on_next(Element::new("two"));
        downcasting.on_next(Element::new(3_i32));
        downcasting.on_complete();

        assert_eq!(counting.next.load(Ordering::SeqCst), 1);
        assert_eq!(counting.errors.load(Ordering::SeqCst), 1);
        assert_eq!(counting.completes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_typed_subscriber_wraps_elements() {
        struct Expect;
        impl Subscriber<Element> for Expect {
            fn on_subscribe(&self, _subscription: Arc<dyn Subscription>) {}
            fn on_next(&self, item: Element) {
                assert_eq!(item.downcast::<u8>().unwrap(), 7);
            }
            fn on_error(&self, _error: StreamError) {}
            fn on_complete(&self) {}
        }

        let typed = TypedSubscriber::<u8>::new(Arc::new(Expect));
        typed.on_next(7);
    }
}
