pub mod completion;
pub mod duplex;
pub mod error;
pub mod events;
pub mod interop;
pub mod pipe;
pub mod readable;
pub mod transform;
pub mod writable;

pub use completion::{read_one, to_vec, when_ended, when_finished, Deferred, WriteCompletion};
pub use duplex::{composite, pipeline, Duplex};
pub use error::{StreamError, StreamResult};
pub use events::{EventSlot, ListenerId};
pub use interop::{into_sink, into_stream, IntoSink, IntoStream};
pub use pipe::{PipeOptions, PipeRegistry};
pub use readable::{readable, readable_with, PushHandle, Readable, Source};
pub use transform::{
    buffer, concat, filter, filter_sync, flatten, map, map_sync, through, transform,
    FilterResolver, MapResolver, TransformOptions,
};
pub use writable::{writable, Writable};

use std::sync::atomic::{AtomicU64, Ordering};

/// Stable per-stream identity, used as the key for pipe bookkeeping.
/// Identity is allocation-based, never content-based; the two halves of a
/// fused duplex share one id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamId(u64);

impl StreamId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        StreamId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Options for the writable half.
#[derive(Debug, Clone, Copy)]
pub struct WritableOptions {
    /// Maximum number of in-flight (accepted but unacknowledged) writes
    /// before `write` starts returning `false`.
    pub concurrency: usize,
}

impl Default for WritableOptions {
    fn default() -> Self {
        Self { concurrency: 1 }
    }
}

/// Options for the readable half.
#[derive(Debug, Clone, Copy)]
pub struct ReadableOptions {
    /// Target queue depth; pushing at or past it reports backpressure.
    /// A capacity hint, not a hard cap.
    pub high_water_mark: usize,
}

impl Default for ReadableOptions {
    fn default() -> Self {
        Self { high_water_mark: 1 }
    }
}

/// Boxed one-shot write acknowledgement callback.
pub type FlushFn = Box<dyn FnOnce(Option<StreamError>)>;
/// Boxed one-shot finish callback.
pub type FinishFn = Box<dyn FnOnce()>;

/// The writable half's event surface.
pub struct WritableEvents {
    pub drain: EventSlot<()>,
    pub error: EventSlot<StreamError>,
    pub finish: EventSlot<()>,
    pub pipe: EventSlot<StreamId>,
    pub unpipe: EventSlot<StreamId>,
}

impl WritableEvents {
    pub(crate) fn new() -> Self {
        Self::with_error(EventSlot::persistent())
    }

    pub(crate) fn with_error(error: EventSlot<StreamError>) -> Self {
        Self {
            drain: EventSlot::new(),
            error,
            finish: EventSlot::persistent(),
            pipe: EventSlot::new(),
            unpipe: EventSlot::new(),
        }
    }
}

/// The readable half's event surface.
pub struct ReadableEvents<T> {
    pub data: EventSlot<T>,
    pub end: EventSlot<()>,
    pub error: EventSlot<StreamError>,
    pub readable: EventSlot<()>,
}

impl<T: 'static> ReadableEvents<T> {
    pub(crate) fn new() -> Self {
        Self::with_error(EventSlot::persistent())
    }

    pub(crate) fn with_error(error: EventSlot<StreamError>) -> Self {
        Self {
            data: EventSlot::new(),
            end: EventSlot::persistent(),
            error,
            readable: EventSlot::new(),
        }
    }
}

/// The writable stream contract: accept items under a concurrency limit,
/// buffer while corked, and finish once ended with nothing in flight.
pub trait WritableStream<T> {
    fn stream_id(&self) -> StreamId;
    fn writable_events(&self) -> &WritableEvents;

    /// Accept one item. `Ok(false)` tells the producer to stop until
    /// `drain`; `Err(StreamError::Ended)` after `end`.
    fn write_raw(&self, item: T, on_flush: Option<FlushFn>) -> StreamResult<bool>;
    /// Defer subsequent writes into a FIFO buffer.
    fn cork(&self);
    /// Flush corked writes in FIFO order through the regular dispatch path.
    fn uncork(&self);
    /// Optionally write a final item, then mark the stream ended.
    fn end_raw(&self, item: Option<T>, on_finish: Option<FinishFn>) -> StreamResult<()>;

    fn write(&self, item: T) -> StreamResult<bool> {
        self.write_raw(item, None)
    }

    fn write_with<F>(&self, item: T, on_flush: F) -> StreamResult<bool>
    where
        F: FnOnce(Option<StreamError>) + 'static,
        Self: Sized,
    {
        self.write_raw(item, Some(Box::new(on_flush)))
    }

    fn end(&self) {
        let _ = self.end_raw(None, None);
    }

    fn end_with<F>(&self, item: Option<T>, on_finish: F) -> StreamResult<()>
    where
        F: FnOnce() + 'static,
        Self: Sized,
    {
        self.end_raw(item, Some(Box::new(on_finish)))
    }

    fn on_drain(&self, listener: impl Fn() + 'static) -> ListenerId
    where
        Self: Sized,
    {
        self.writable_events().drain.on(move |_| listener())
    }

    fn on_finish(&self, listener: impl FnOnce() + 'static) -> ListenerId
    where
        Self: Sized,
    {
        self.writable_events().finish.once(move |_| listener())
    }
}

/// The readable stream contract: a bounded queue drained on demand or by
/// flowing-mode delivery, with `pipe` wiring into any writable.
pub trait ReadableStream<T> {
    fn stream_id(&self) -> StreamId;
    fn readable_events(&self) -> &ReadableEvents<T>;
    fn pipe_registry(&self) -> &PipeRegistry;

    /// `Some(0)` requests one out-of-band pull and returns nothing;
    /// `None` drains the current queue; `Some(n)` returns up to `n` items.
    fn read(&self, size: Option<usize>) -> Vec<T>;
    /// Like `read(Some(size))` but returns nothing unless `size` items are
    /// buffered.
    fn read_exactly(&self, size: usize) -> Vec<T>;
    fn pause(&self);
    fn resume(&self);
    fn is_paused(&self) -> bool;

    fn pipe<W>(&self, dest: &W) -> W
    where
        T: Clone + 'static,
        W: WritableStream<T> + Clone + 'static,
        Self: Clone + Sized + 'static,
    {
        self.pipe_with(dest, PipeOptions::default())
    }

    fn pipe_with<W>(&self, dest: &W, options: PipeOptions) -> W
    where
        T: Clone + 'static,
        W: WritableStream<T> + Clone + 'static,
        Self: Clone + Sized + 'static,
    {
        pipe::wire(self, dest, options)
    }

    fn unpipe<W>(&self, dest: &W)
    where
        W: WritableStream<T>,
        Self: Sized,
    {
        pipe::sever(self.pipe_registry(), Some(dest.stream_id()));
    }

    fn unpipe_all(&self) {
        pipe::sever(self.pipe_registry(), None);
    }

    fn on_data(&self, listener: impl Fn(&T) + 'static) -> ListenerId
    where
        Self: Sized,
        T: 'static,
    {
        self.readable_events().data.on(listener)
    }

    fn on_end(&self, listener: impl FnOnce() + 'static) -> ListenerId
    where
        Self: Sized,
    {
        self.readable_events().end.once(move |_| listener())
    }

    fn on_readable(&self, listener: impl Fn() + 'static) -> ListenerId
    where
        Self: Sized,
    {
        self.readable_events().readable.on(move |_| listener())
    }
}
