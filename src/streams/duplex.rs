//! Duplex composition: one writable and one readable fused behind a
//! single bidirectional facade.
//!
//! The composite owns its own event surface and re-emits what the inner
//! halves fire. Both halves' `error` events merge into one shared slot,
//! and the terminal events stay persistent at the composite level, so a
//! listener attached after the fact still observes them. `data` is
//! forwarded lazily: the inner readable is left untouched until the
//! composite gains its first `data` listener, keeping an unobserved
//! pipeline from being consumed prematurely.

use super::error::StreamError;
use super::events::EventSlot;
use super::pipe::PipeRegistry;
use super::transform::through;
use super::{
    FinishFn, FlushFn, ListenerId, ReadableEvents, ReadableOptions, ReadableStream, StreamId,
    StreamResult, WritableEvents, WritableStream,
};
use crate::platform::SharedPtr;
use std::cell::Cell;
use tracing::trace;

struct DuplexInner<I, O> {
    writable: Box<dyn WritableStream<I>>,
    readable: Box<dyn ReadableStream<O>>,
    writable_events: WritableEvents,
    readable_events: ReadableEvents<O>,
    pipes: PipeRegistry,
    data_forwarding: Cell<bool>,
}

/// A single facade implementing both stream contracts by delegation.
pub struct Duplex<I, O> {
    inner: SharedPtr<DuplexInner<I, O>>,
}

impl<I, O> Clone for Duplex<I, O> {
    fn clone(&self) -> Self {
        Self {
            inner: SharedPtr::clone(&self.inner),
        }
    }
}

impl<I: 'static, O: 'static> Duplex<I, O> {
    /// The composite's merged error surface (both halves feed it).
    pub fn errors(&self) -> &EventSlot<StreamError> {
        &self.inner.readable_events.error
    }

    pub fn on_data(&self, listener: impl Fn(&O) + 'static) -> ListenerId {
        self.inner.readable_events.data.on(listener)
    }

    pub fn on_end(&self, listener: impl FnOnce() + 'static) -> ListenerId {
        self.inner.readable_events.end.once(move |_| listener())
    }

    pub fn on_error(&self, listener: impl Fn(&StreamError) + 'static) -> ListenerId {
        self.errors().on(listener)
    }

    pub fn on_readable(&self, listener: impl Fn() + 'static) -> ListenerId {
        self.inner.readable_events.readable.on(move |_| listener())
    }

    pub fn on_drain(&self, listener: impl Fn() + 'static) -> ListenerId {
        self.inner.writable_events.drain.on(move |_| listener())
    }

    pub fn on_finish(&self, listener: impl FnOnce() + 'static) -> ListenerId {
        self.inner.writable_events.finish.once(move |_| listener())
    }

    /// Pipe this stage into `next` and expose the pair as one duplex
    /// spanning this stage's writable side and `next`'s readable side.
    pub fn chain<U: 'static>(&self, next: &Duplex<O, U>) -> Duplex<I, U>
    where
        O: Clone,
    {
        self.pipe(next);
        composite(self.clone(), next.clone())
    }
}

impl<I: 'static, O: 'static> WritableStream<I> for Duplex<I, O> {
    fn stream_id(&self) -> StreamId {
        self.inner.writable.stream_id()
    }

    fn writable_events(&self) -> &WritableEvents {
        &self.inner.writable_events
    }

    fn write_raw(&self, item: I, on_flush: Option<FlushFn>) -> StreamResult<bool> {
        self.inner.writable.write_raw(item, on_flush)
    }

    fn cork(&self) {
        self.inner.writable.cork();
    }

    fn uncork(&self) {
        self.inner.writable.uncork();
    }

    fn end_raw(&self, item: Option<I>, on_finish: Option<FinishFn>) -> StreamResult<()> {
        self.inner.writable.end_raw(item, on_finish)
    }
}

impl<I: 'static, O: 'static> ReadableStream<O> for Duplex<I, O> {
    fn stream_id(&self) -> StreamId {
        self.inner.readable.stream_id()
    }

    fn readable_events(&self) -> &ReadableEvents<O> {
        &self.inner.readable_events
    }

    fn pipe_registry(&self) -> &PipeRegistry {
        &self.inner.pipes
    }

    fn read(&self, size: Option<usize>) -> Vec<O> {
        self.inner.readable.read(size)
    }

    fn read_exactly(&self, size: usize) -> Vec<O> {
        self.inner.readable.read_exactly(size)
    }

    fn pause(&self) {
        self.inner.readable.pause();
    }

    fn resume(&self) {
        self.inner.readable.resume();
    }

    fn is_paused(&self) -> bool {
        self.inner.readable.is_paused()
    }
}

/// Fuse a writable and a readable (possibly unrelated instances) into one
/// duplex facade, forwarding and replaying their events.
pub fn composite<I, O, W, R>(writable: W, readable: R) -> Duplex<I, O>
where
    I: 'static,
    O: 'static,
    W: WritableStream<I> + 'static,
    R: ReadableStream<O> + 'static,
{
    let shared_error: EventSlot<StreamError> = EventSlot::persistent();
    let writable_events = WritableEvents::with_error(shared_error.clone());
    let readable_events = ReadableEvents::with_error(shared_error);

    // Writable-origin events are re-emitted on the composite.
    forward_unit(&writable.writable_events().drain, &writable_events.drain);
    forward_error(&writable.writable_events().error, &writable_events.error);
    forward_unit(&writable.writable_events().finish, &writable_events.finish);
    forward_id(&writable.writable_events().pipe, &writable_events.pipe);
    forward_id(&writable.writable_events().unpipe, &writable_events.unpipe);

    // Readable-origin events too, except `data`, which is wired lazily.
    forward_unit(&readable.readable_events().end, &readable_events.end);
    forward_error(&readable.readable_events().error, &readable_events.error);
    forward_unit(&readable.readable_events().readable, &readable_events.readable);

    let inner = SharedPtr::new(DuplexInner {
        writable: Box::new(writable),
        readable: Box::new(readable),
        writable_events,
        readable_events,
        pipes: PipeRegistry::new(),
        data_forwarding: Cell::new(false),
    });

    // Subscribe the inner readable's data only once somebody is listening
    // on the composite; this is what keeps an unobserved pipeline idle.
    let weak = SharedPtr::downgrade(&inner);
    inner
        .readable_events
        .data
        .set_listeners_changed(move |count| {
            if count == 0 {
                return;
            }
            let Some(inner) = weak.upgrade() else { return };
            if inner.data_forwarding.get() {
                return;
            }
            inner.data_forwarding.set(true);
            trace!("composite data forwarding attached");
            let slot = inner.readable_events.data.clone();
            inner
                .readable
                .readable_events()
                .data
                .on(move |item| slot.emit(item));
        });

    Duplex { inner }
}

/// Chain duplex stages into a pipeline exposed as a single duplex from
/// the first stage's writable side to the last stage's readable side.
/// Every stage's errors surface on the returned composite.
pub fn pipeline<T: Clone + 'static>(stages: Vec<Duplex<T, T>>) -> Duplex<T, T> {
    let mut stages = stages.into_iter();
    let Some(first) = stages.next() else {
        return through(ReadableOptions::default());
    };
    stages.fold(first, |acc, stage| acc.chain(&stage))
}

fn forward_unit(from: &EventSlot<()>, to: &EventSlot<()>) {
    let to = to.clone();
    from.on(move |_| to.emit(&()));
}

fn forward_error(from: &EventSlot<StreamError>, to: &EventSlot<StreamError>) {
    let to = to.clone();
    from.on(move |error| to.emit(error));
}

fn forward_id(from: &EventSlot<StreamId>, to: &EventSlot<StreamId>) {
    let to = to.clone();
    from.on(move |id| to.emit(id));
}
