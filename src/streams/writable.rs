//! The writable half: a concurrency-limited write/cork/drain/finish engine.
//!
//! Items are handed to a sink closure together with a [`WriteCompletion`]
//! the sink must settle exactly once. The engine tracks the in-flight
//! count, reports backpressure through `write`'s boolean, and notifies
//! `drain` listeners one at a time so a listener that writes synchronously
//! cannot over-admit past the limit.

use super::completion::WriteCompletion;
use super::error::{StreamError, StreamResult};
use super::{FinishFn, FlushFn, StreamId, WritableEvents, WritableOptions, WritableStream};
use crate::platform::SharedPtr;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use tracing::{debug, trace};

type SinkFn<T> = Box<dyn FnMut(T, WriteCompletion) -> StreamResult<()>>;

struct WritableInner<T> {
    id: StreamId,
    limit: usize,
    corked: Cell<bool>,
    ended: Cell<bool>,
    finished: Cell<bool>,
    notify_drain: Cell<bool>,
    pending: Cell<usize>,
    cork_buffer: RefCell<VecDeque<(T, WriteCompletion)>>,
    // Dispatches are queued and driven by a single loop so completions and
    // drain listeners may synchronously re-enter `write` while a sink call
    // is still on the stack.
    dispatch_queue: RefCell<VecDeque<(T, WriteCompletion)>>,
    dispatching: Cell<bool>,
    sink: RefCell<SinkFn<T>>,
    events: WritableEvents,
}

/// Cheap cloneable handle to a writable stream instance.
pub struct Writable<T> {
    inner: SharedPtr<WritableInner<T>>,
}

impl<T> Clone for Writable<T> {
    fn clone(&self) -> Self {
        Self {
            inner: SharedPtr::clone(&self.inner),
        }
    }
}

impl<T: 'static> Writable<T> {
    pub fn new(
        sink: impl FnMut(T, WriteCompletion) -> StreamResult<()> + 'static,
        options: WritableOptions,
    ) -> Self {
        Self::with_parts(StreamId::next(), WritableEvents::new(), sink, options)
    }

    pub(crate) fn with_parts(
        id: StreamId,
        events: WritableEvents,
        sink: impl FnMut(T, WriteCompletion) -> StreamResult<()> + 'static,
        options: WritableOptions,
    ) -> Self {
        Self {
            inner: SharedPtr::new(WritableInner {
                id,
                limit: options.concurrency.max(1),
                corked: Cell::new(false),
                ended: Cell::new(false),
                finished: Cell::new(false),
                notify_drain: Cell::new(false),
                pending: Cell::new(0),
                cork_buffer: RefCell::new(VecDeque::new()),
                dispatch_queue: RefCell::new(VecDeque::new()),
                dispatching: Cell::new(false),
                sink: RefCell::new(Box::new(sink)),
                events,
            }),
        }
    }

    pub fn events(&self) -> &WritableEvents {
        &self.inner.events
    }

    /// Writes accepted but not yet acknowledged by the sink.
    pub fn in_flight(&self) -> usize {
        self.inner.pending.get()
    }

    pub fn is_ended(&self) -> bool {
        self.inner.ended.get()
    }

    pub fn is_finished(&self) -> bool {
        self.inner.finished.get()
    }

    fn flush_completion(&self, on_flush: Option<FlushFn>) -> WriteCompletion {
        let this = self.clone();
        WriteCompletion::new(move |error| {
            if let Some(callback) = on_flush {
                callback(error.clone());
            }
            this.flush_done(error);
        })
    }

    fn flush_done(&self, error: Option<StreamError>) {
        let inner = &self.inner;
        inner.pending.set(inner.pending.get().saturating_sub(1));

        if let Some(error) = error {
            inner.events.error.emit(&error);
        }

        if inner.pending.get() == 0 {
            self.notify_writable();
            if inner.ended.get() {
                self.ensure_finished();
            }
        } else if inner.pending.get() < inner.limit {
            self.notify_writable();
        }
    }

    fn notify_writable(&self) {
        let inner = &self.inner;
        if !inner.notify_drain.get() {
            return;
        }
        inner.notify_drain.set(false);
        trace!(stream = ?inner.id, pending = inner.pending.get(), "drain");
        inner
            .events
            .drain
            .emit_each_while(&(), || inner.pending.get() < inner.limit);
    }

    fn ensure_finished(&self) {
        let inner = &self.inner;
        if inner.finished.get() {
            return;
        }
        inner.finished.set(true);
        debug!(stream = ?inner.id, "finish");
        inner.events.finish.emit(&());
    }

    fn dispatch(&self, item: T, completion: WriteCompletion) {
        self.inner
            .dispatch_queue
            .borrow_mut()
            .push_back((item, completion));
        self.drive_dispatch();
    }

    fn drive_dispatch(&self) {
        let inner = &self.inner;
        if inner.dispatching.get() {
            return;
        }
        inner.dispatching.set(true);
        loop {
            let next = inner.dispatch_queue.borrow_mut().pop_front();
            let Some((item, completion)) = next else { break };
            // A sink that errors out after losing its completion handle
            // still fails this write exactly once, via the mirror.
            let mirror = completion.mirror();
            let result = (inner.sink.borrow_mut())(item, completion);
            if let Err(error) = result {
                mirror.complete(Some(error));
            }
        }
        inner.dispatching.set(false);
    }
}

impl<T: 'static> WritableStream<T> for Writable<T> {
    fn stream_id(&self) -> StreamId {
        self.inner.id
    }

    fn writable_events(&self) -> &WritableEvents {
        &self.inner.events
    }

    fn write_raw(&self, item: T, on_flush: Option<FlushFn>) -> StreamResult<bool> {
        let inner = &self.inner;
        if inner.ended.get() {
            return Err(StreamError::Ended);
        }

        inner.pending.set(inner.pending.get() + 1);
        let completion = self.flush_completion(on_flush);

        if inner.corked.get() {
            inner.cork_buffer.borrow_mut().push_back((item, completion));
        } else {
            self.dispatch(item, completion);
        }

        if inner.pending.get() >= inner.limit {
            inner.notify_drain.set(true);
            trace!(stream = ?inner.id, pending = inner.pending.get(), "backpressure");
            Ok(false)
        } else {
            Ok(true)
        }
    }

    fn cork(&self) {
        self.inner.corked.set(true);
    }

    fn uncork(&self) {
        let inner = &self.inner;
        if !inner.corked.get() {
            return;
        }
        inner.corked.set(false);
        // Flush FIFO; stop if a callback re-corks mid-flush.
        while !inner.corked.get() {
            let next = inner.cork_buffer.borrow_mut().pop_front();
            match next {
                Some((item, completion)) => self.dispatch(item, completion),
                None => break,
            }
        }
    }

    fn end_raw(&self, item: Option<T>, on_finish: Option<FinishFn>) -> StreamResult<()> {
        if let Some(item) = item {
            self.write_raw(item, None)?;
        }

        let inner = &self.inner;
        if let Some(callback) = on_finish {
            inner.events.finish.once(move |_| callback());
        }

        if !inner.ended.get() {
            self.uncork();
            inner.ended.set(true);
            trace!(stream = ?inner.id, pending = inner.pending.get(), "ended");
            if inner.pending.get() == 0 {
                self.ensure_finished();
            }
        }
        Ok(())
    }
}

/// Build a writable stream around a sink closure. The sink receives each
/// item with its completion and must settle the completion exactly once,
/// synchronously or later; returning `Err` fails the write instead.
pub fn writable<T: 'static>(
    sink: impl FnMut(T, WriteCompletion) -> StreamResult<()> + 'static,
    options: WritableOptions,
) -> Writable<T> {
    Writable::new(sink, options)
}
