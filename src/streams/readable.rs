//! The readable half: a bounded queue with paused/flowing delivery.
//!
//! Producers feed the stream through a [`PushHandle`]; consumers either
//! subscribe `data` (flowing mode) or call `read` on demand. Flow is
//! reactive: the drain loop only runs while the stream is unpaused *and*
//! has at least one `data` listener, so nothing is delivered into the void.

use super::completion::WriteCompletion;
use super::error::StreamResult;
use super::pipe::PipeRegistry;
use super::{ReadableEvents, ReadableOptions, ReadableStream, StreamId};
use crate::platform::SharedPtr;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use tracing::{debug, trace};

/// The pull interface: invoked when the engine wants more data; must call
/// the push handle zero or more times and `end` it when exhausted.
pub type PullFn<T> = Box<dyn FnMut(usize, PushHandle<T>) -> StreamResult<()>>;

struct ReadableInner<T> {
    id: StreamId,
    high_water_mark: usize,
    paused: Cell<bool>,
    /// Latch preventing re-entrant resume loops.
    flowing: Cell<bool>,
    /// Latch preventing re-entrant pulls.
    pulling: Cell<bool>,
    ended: Cell<bool>,
    end_emitted: Cell<bool>,
    queue: RefCell<VecDeque<(T, Option<WriteCompletion>)>>,
    pull: RefCell<PullFn<T>>,
    events: ReadableEvents<T>,
    pipes: PipeRegistry,
}

/// Cheap cloneable handle to a readable stream instance.
pub struct Readable<T> {
    inner: SharedPtr<ReadableInner<T>>,
}

impl<T> Clone for Readable<T> {
    fn clone(&self) -> Self {
        Self {
            inner: SharedPtr::clone(&self.inner),
        }
    }
}

impl<T: 'static> Readable<T> {
    /// Create a stream fed exclusively through its push handle.
    pub fn new(options: ReadableOptions) -> Self {
        Self::from_pull(|_, _| Ok(()), options)
    }

    pub fn from_pull(
        pull: impl FnMut(usize, PushHandle<T>) -> StreamResult<()> + 'static,
        options: ReadableOptions,
    ) -> Self {
        Self::with_parts(StreamId::next(), ReadableEvents::new(), Box::new(pull), options)
    }

    pub fn from_vec(items: Vec<T>) -> Self {
        Self::from_iterator(items.into_iter())
    }

    pub fn from_iterator(iter: impl Iterator<Item = T> + 'static) -> Self {
        Self::from_pull(iterator_pull(iter), ReadableOptions::default())
    }

    pub(crate) fn with_parts(
        id: StreamId,
        events: ReadableEvents<T>,
        pull: PullFn<T>,
        options: ReadableOptions,
    ) -> Self {
        let stream = Self {
            inner: SharedPtr::new(ReadableInner {
                id,
                high_water_mark: options.high_water_mark.max(1),
                paused: Cell::new(false),
                flowing: Cell::new(false),
                pulling: Cell::new(false),
                ended: Cell::new(false),
                end_emitted: Cell::new(false),
                queue: RefCell::new(VecDeque::new()),
                pull: RefCell::new(pull),
                events,
                pipes: PipeRegistry::new(),
            }),
        };

        // Flow reacts to the data listener count: gaining the first
        // listener starts delivery, losing the last stops it.
        let weak = SharedPtr::downgrade(&stream.inner);
        stream.inner.events.data.set_listeners_changed(move |count| {
            if count == 0 {
                return;
            }
            if let Some(inner) = weak.upgrade() {
                Readable { inner }.flow();
            }
        });

        stream
    }

    pub fn events(&self) -> &ReadableEvents<T> {
        &self.inner.events
    }

    /// Producer-facing surface of this stream.
    pub fn push_handle(&self) -> PushHandle<T> {
        PushHandle {
            inner: SharedPtr::clone(&self.inner),
        }
    }

    /// Items currently queued awaiting delivery.
    pub fn buffered(&self) -> usize {
        self.inner.queue.borrow().len()
    }

    pub fn is_ended(&self) -> bool {
        self.inner.ended.get()
    }

    fn push_impl(&self, item: T, on_flush: Option<WriteCompletion>) -> bool {
        let inner = &self.inner;
        let deliver = !inner.paused.get()
            && inner.events.data.listener_count() > 0
            && inner.queue.borrow().is_empty();

        if deliver {
            inner.events.data.emit(&item);
            if let Some(completion) = on_flush {
                completion.ok();
            }
        } else {
            let was_empty = inner.queue.borrow().is_empty();
            inner.queue.borrow_mut().push_back((item, on_flush));
            if was_empty {
                inner.events.readable.emit(&());
            }
        }

        let depth = inner.queue.borrow().len();
        if depth >= inner.high_water_mark {
            trace!(stream = ?inner.id, depth, "push backpressure");
        }
        depth < inner.high_water_mark
    }

    pub(crate) fn end_read(&self) {
        let inner = &self.inner;
        inner.ended.set(true);
        if inner.queue.borrow().is_empty() {
            self.ensure_end_emitted();
        }
    }

    fn ensure_end_emitted(&self) {
        let inner = &self.inner;
        if inner.end_emitted.get() {
            return;
        }
        inner.end_emitted.set(true);
        debug!(stream = ?inner.id, "end");
        inner.events.end.emit(&());
    }

    fn read_some(&self, size: Option<usize>, allow_fewer: bool) -> Vec<T> {
        let inner = &self.inner;

        if size == Some(0) {
            // Out-of-band request for one more pull; never consumes.
            if !inner.pulling.get() {
                inner.pulling.set(true);
                let result = (inner.pull.borrow_mut())(1, self.push_handle());
                inner.pulling.set(false);
                if let Err(error) = result {
                    inner.events.error.emit(&error);
                }
            }
            return Vec::new();
        }

        let batch = {
            let mut queue = inner.queue.borrow_mut();
            if queue.is_empty() {
                return Vec::new();
            }
            let want = match size {
                Some(n) if n > queue.len() && !allow_fewer => return Vec::new(),
                Some(n) => n.min(queue.len()),
                None => queue.len(),
            };
            queue.drain(..want).collect::<Vec<_>>()
        };

        let mut items = Vec::with_capacity(batch.len());
        for (item, on_flush) in batch {
            inner.events.data.emit(&item);
            if let Some(completion) = on_flush {
                completion.ok();
            }
            items.push(item);
        }

        if inner.ended.get() && inner.queue.borrow().is_empty() {
            self.ensure_end_emitted();
        }
        items
    }

    /// Drain the queue while unpaused and observed, asking the producer
    /// for more once the queue runs dry. `read(0)` performs exactly one
    /// pull and the following `read(1)` is authoritative.
    fn flow(&self) {
        let inner = &self.inner;
        if inner.flowing.get() || inner.paused.get() {
            return;
        }
        if inner.events.data.listener_count() == 0 {
            return;
        }

        inner.flowing.set(true);
        loop {
            if inner.paused.get() || inner.events.data.listener_count() == 0 {
                break;
            }
            if self.read_some(Some(1), true).is_empty() {
                self.read_some(Some(0), true);
                if self.read_some(Some(1), true).is_empty() {
                    break;
                }
            }
        }
        inner.flowing.set(false);
    }
}

impl<T: 'static> ReadableStream<T> for Readable<T> {
    fn stream_id(&self) -> StreamId {
        self.inner.id
    }

    fn readable_events(&self) -> &ReadableEvents<T> {
        &self.inner.events
    }

    fn pipe_registry(&self) -> &PipeRegistry {
        &self.inner.pipes
    }

    fn read(&self, size: Option<usize>) -> Vec<T> {
        self.read_some(size, true)
    }

    fn read_exactly(&self, size: usize) -> Vec<T> {
        self.read_some(Some(size), false)
    }

    fn pause(&self) {
        trace!(stream = ?self.inner.id, "pause");
        self.inner.paused.set(true);
    }

    fn resume(&self) {
        trace!(stream = ?self.inner.id, "resume");
        self.inner.paused.set(false);
        self.flow();
    }

    fn is_paused(&self) -> bool {
        self.inner.paused.get()
    }
}

/// Producer-facing handle: push items in, signal exhaustion with `end`.
pub struct PushHandle<T> {
    inner: SharedPtr<ReadableInner<T>>,
}

impl<T> Clone for PushHandle<T> {
    fn clone(&self) -> Self {
        Self {
            inner: SharedPtr::clone(&self.inner),
        }
    }
}

impl<T: 'static> PushHandle<T> {
    fn stream(&self) -> Readable<T> {
        Readable {
            inner: SharedPtr::clone(&self.inner),
        }
    }

    /// Feed one item. Returns `false` once the queue is at or past the
    /// high water mark — the producer should pause until demand returns.
    pub fn push(&self, item: T) -> bool {
        self.stream().push_impl(item, None)
    }

    /// Feed one item with a completion fired when it is delivered
    /// downstream.
    pub fn push_with(&self, item: T, on_flush: WriteCompletion) -> bool {
        self.stream().push_impl(item, Some(on_flush))
    }

    /// Signal producer exhaustion (the end sentinel).
    pub fn end(&self) {
        self.stream().end_read();
    }
}

/// A producer definition accepted by [`readable`]: an in-memory sequence,
/// an iterator, a pull closure, or an existing stream (passed through).
pub enum Source<T> {
    Sequence(Vec<T>),
    Iterator(Box<dyn Iterator<Item = T>>),
    Pull(PullFn<T>),
    Stream(Readable<T>),
}

impl<T: 'static> Source<T> {
    pub fn from_iter(iter: impl Iterator<Item = T> + 'static) -> Self {
        Source::Iterator(Box::new(iter))
    }

    pub fn pull(pull: impl FnMut(usize, PushHandle<T>) -> StreamResult<()> + 'static) -> Self {
        Source::Pull(Box::new(pull))
    }
}

impl<T> From<Vec<T>> for Source<T> {
    fn from(items: Vec<T>) -> Self {
        Source::Sequence(items)
    }
}

impl<T> From<Readable<T>> for Source<T> {
    fn from(stream: Readable<T>) -> Self {
        Source::Stream(stream)
    }
}

fn iterator_pull<T: 'static>(mut iter: impl Iterator<Item = T> + 'static) -> PullFn<T> {
    Box::new(move |_size, push| {
        loop {
            match iter.next() {
                Some(item) => {
                    if !push.push(item) {
                        break;
                    }
                }
                None => {
                    push.end();
                    break;
                }
            }
        }
        Ok(())
    })
}

/// Resolve a [`Source`] into a readable stream with default options.
pub fn readable<T: 'static>(source: impl Into<Source<T>>) -> Readable<T> {
    readable_with(source, ReadableOptions::default())
}

pub fn readable_with<T: 'static>(
    source: impl Into<Source<T>>,
    options: ReadableOptions,
) -> Readable<T> {
    match source.into() {
        Source::Stream(stream) => stream,
        Source::Sequence(items) => {
            Readable::with_parts(
                StreamId::next(),
                ReadableEvents::new(),
                iterator_pull(items.into_iter()),
                options,
            )
        }
        Source::Iterator(iter) => {
            Readable::with_parts(StreamId::next(), ReadableEvents::new(), iterator_pull(iter), options)
        }
        Source::Pull(pull) => {
            Readable::with_parts(StreamId::next(), ReadableEvents::new(), pull, options)
        }
    }
}
