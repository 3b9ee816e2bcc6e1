//! Single-shot completion handles.
//!
//! [`WriteCompletion`] is the continuation a sink must invoke exactly once
//! per accepted item; consuming `self` rejects double invocation at the
//! type level, and the take-once cell underneath makes a late duplicate
//! (via a crate-internal mirror) a no-op rather than a double fire.
//!
//! [`Deferred`] is the bridge from event callbacks into linear code: a
//! value resolved exactly once, observable through callbacks or as a
//! `Future`.

use super::error::{StreamError, StreamResult};
use super::{ReadableStream, WritableStream};
use crate::platform::SharedPtr;
use std::cell::{Cell, RefCell};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll, Waker};

type CompletionFn = Box<dyn FnOnce(Option<StreamError>)>;

pub struct WriteCompletion {
    slot: SharedPtr<Cell<Option<CompletionFn>>>,
}

impl WriteCompletion {
    pub(crate) fn new(f: impl FnOnce(Option<StreamError>) + 'static) -> Self {
        Self {
            slot: SharedPtr::new(Cell::new(Some(Box::new(f)))),
        }
    }

    /// A second handle onto the same underlying continuation. Whichever of
    /// the two settles first wins; the other becomes a no-op.
    pub(crate) fn mirror(&self) -> WriteCompletion {
        Self {
            slot: SharedPtr::clone(&self.slot),
        }
    }

    pub fn complete(self, error: Option<StreamError>) {
        if let Some(f) = self.slot.take() {
            f(error);
        }
    }

    pub fn ok(self) {
        self.complete(None);
    }

    pub fn fail(self, error: StreamError) {
        self.complete(Some(error));
    }
}

enum DeferredState<T> {
    Pending,
    Resolved(StreamResult<T>),
}

struct DeferredInner<T> {
    state: RefCell<DeferredState<T>>,
    observers: RefCell<Vec<Box<dyn FnOnce(&StreamResult<T>)>>>,
    wakers: RefCell<Vec<Waker>>,
}

/// A value resolved exactly once. Double resolution is a graceful no-op.
pub struct Deferred<T> {
    inner: SharedPtr<DeferredInner<T>>,
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Self {
            inner: SharedPtr::clone(&self.inner),
        }
    }
}

impl<T: 'static> Default for Deferred<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> Deferred<T> {
    pub fn new() -> Self {
        Self {
            inner: SharedPtr::new(DeferredInner {
                state: RefCell::new(DeferredState::Pending),
                observers: RefCell::new(Vec::new()),
                wakers: RefCell::new(Vec::new()),
            }),
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(&*self.inner.state.borrow(), DeferredState::Resolved(_))
    }

    pub fn succeed(&self, value: T) {
        self.resolve(Ok(value));
    }

    pub fn fail(&self, error: StreamError) {
        self.resolve(Err(error));
    }

    pub fn resolve(&self, result: StreamResult<T>) {
        if self.is_resolved() {
            return;
        }
        *self.inner.state.borrow_mut() = DeferredState::Resolved(result);

        let observers = self.inner.observers.take();
        {
            let state = self.inner.state.borrow();
            let result = match &*state {
                DeferredState::Resolved(result) => result,
                DeferredState::Pending => unreachable!("state set above"),
            };
            for observer in observers {
                observer(result);
            }
        }

        for waker in self.inner.wakers.take() {
            waker.wake();
        }
    }

    /// Observe the resolution; replays immediately if already resolved.
    pub fn when(&self, callback: impl FnOnce(&StreamResult<T>) + 'static) {
        if self.is_resolved() {
            let state = self.inner.state.borrow();
            if let DeferredState::Resolved(result) = &*state {
                callback(result);
            }
            return;
        }
        self.inner.observers.borrow_mut().push(Box::new(callback));
    }

    pub fn try_result(&self) -> Option<StreamResult<T>>
    where
        T: Clone,
    {
        match &*self.inner.state.borrow() {
            DeferredState::Resolved(result) => Some(result.clone()),
            DeferredState::Pending => None,
        }
    }
}

impl<T: Clone + 'static> Future for Deferred<T> {
    type Output = StreamResult<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(result) = self.try_result() {
            return Poll::Ready(result);
        }
        let mut wakers = self.inner.wakers.borrow_mut();
        if !wakers.iter().any(|w| w.will_wake(cx.waker())) {
            wakers.push(cx.waker().clone());
        }
        Poll::Pending
    }
}

/// Collect everything a readable delivers until it ends.
pub fn to_vec<T, R>(stream: &R) -> Deferred<Vec<T>>
where
    T: Clone + 'static,
    R: ReadableStream<T>,
{
    let deferred = Deferred::new();
    let collected: SharedPtr<RefCell<Option<Vec<T>>>> =
        SharedPtr::new(RefCell::new(Some(Vec::new())));

    {
        let collected = SharedPtr::clone(&collected);
        stream.readable_events().data.on(move |item: &T| {
            if let Some(items) = collected.borrow_mut().as_mut() {
                items.push(item.clone());
            }
        });
    }
    {
        let deferred = deferred.clone();
        let collected = SharedPtr::clone(&collected);
        stream.readable_events().end.once(move |_| {
            if let Some(items) = collected.borrow_mut().take() {
                deferred.succeed(items);
            }
        });
    }
    {
        let deferred = deferred.clone();
        stream
            .readable_events()
            .error
            .once(move |error: &StreamError| deferred.fail(error.clone()));
    }
    deferred
}

/// Resolve with the next available item, or `None` if the stream ends
/// first. Waits on `readable` rather than subscribing `data`, so the
/// stream is not pushed into flowing mode behind the caller's back.
pub fn read_one<T, R>(stream: &R) -> Deferred<Option<T>>
where
    T: 'static,
    R: ReadableStream<T> + Clone + 'static,
{
    let deferred = Deferred::new();
    if let Some(item) = stream.read(Some(1)).pop() {
        deferred.succeed(Some(item));
        return deferred;
    }

    let events = stream.readable_events();
    let waiting = {
        let deferred = deferred.clone();
        let stream = stream.clone();
        events.readable.on(move |_| {
            if let Some(item) = stream.read(Some(1)).pop() {
                deferred.succeed(Some(item));
            }
        })
    };
    let ended = {
        let deferred = deferred.clone();
        events.end.once(move |_| deferred.succeed(None))
    };
    let errored = {
        let deferred = deferred.clone();
        events
            .error
            .once(move |error: &StreamError| deferred.fail(error.clone()))
    };

    // Detach everything once settled.
    {
        let readable = events.readable.clone();
        let end = events.end.clone();
        let error = events.error.clone();
        deferred.when(move |_| {
            readable.remove_listener(waiting);
            end.remove_listener(ended);
            error.remove_listener(errored);
        });
    }
    deferred
}

/// Resolve once the readable ends; fail if it errors first.
pub fn when_ended<T, R>(stream: &R) -> Deferred<()>
where
    T: 'static,
    R: ReadableStream<T>,
{
    let deferred = Deferred::new();
    {
        let deferred = deferred.clone();
        stream.readable_events().end.once(move |_| deferred.succeed(()));
    }
    {
        let deferred = deferred.clone();
        stream
            .readable_events()
            .error
            .once(move |error: &StreamError| deferred.fail(error.clone()));
    }
    deferred
}

/// Resolve once the writable finishes; fail if it errors first.
pub fn when_finished<T, W>(stream: &W) -> Deferred<()>
where
    T: 'static,
    W: WritableStream<T>,
{
    let deferred = Deferred::new();
    {
        let deferred = deferred.clone();
        stream
            .writable_events()
            .finish
            .once(move |_| deferred.succeed(()));
    }
    {
        let deferred = deferred.clone();
        stream
            .writable_events()
            .error
            .once(move |error: &StreamError| deferred.fail(error.clone()));
    }
    deferred
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    #[test]
    fn resolves_exactly_once() {
        let deferred = Deferred::new();
        let seen = Rc::new(RefCell::new(Vec::new()));

        let s = Rc::clone(&seen);
        deferred.when(move |r| s.borrow_mut().push(r.clone()));

        deferred.succeed(1);
        deferred.succeed(2); // graceful no-op
        assert_eq!(seen.borrow().len(), 1);
        assert!(matches!(seen.borrow()[0], Ok(1)));
    }

    #[test]
    fn when_replays_after_resolution() {
        let deferred: Deferred<u32> = Deferred::new();
        deferred.fail("boom".into());

        let seen = Rc::new(Cell::new(false));
        let s = Rc::clone(&seen);
        deferred.when(move |r| s.set(r.is_err()));
        assert!(seen.get());
    }

    #[test]
    fn reentrant_resolve_is_ignored() {
        let deferred: Deferred<u32> = Deferred::new();
        let d = deferred.clone();
        deferred.when(move |_| d.succeed(99));

        deferred.succeed(1);
        assert!(matches!(deferred.try_result(), Some(Ok(1))));
    }

    #[test]
    fn completion_settles_once_across_mirrors() {
        let count = Rc::new(Cell::new(0));
        let c = Rc::clone(&count);
        let completion = WriteCompletion::new(move |_| c.set(c.get() + 1));

        let mirror = completion.mirror();
        completion.ok();
        mirror.fail("late".into());
        assert_eq!(count.get(), 1);
    }
}
