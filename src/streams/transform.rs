//! Stream combinators built entirely on the core contract.
//!
//! Every builder returns a concrete composed [`Duplex`]; none of them
//! reach into another stream's internals. `through`/`buffer` fuse a
//! writable whose sink feeds the paired readable's push surface, and the
//! writable's finish transition doubles as the producer end sentinel.

use super::completion::WriteCompletion;
use super::duplex::{composite, Duplex};
use super::error::{StreamError, StreamResult};
use super::events::EventSlot;
use super::pipe::PipeOptions;
use super::readable::{readable, PushHandle, Readable, Source};
use super::writable::{writable, Writable};
use super::{
    ReadableEvents, ReadableOptions, ReadableStream, StreamId, WritableEvents, WritableOptions,
    WritableStream,
};

/// Options for transforming stages.
#[derive(Debug, Clone, Copy)]
pub struct TransformOptions {
    /// In-flight limit of the writable half; also bounds the readable
    /// queue.
    pub concurrency: usize,
}

impl Default for TransformOptions {
    fn default() -> Self {
        Self { concurrency: 1 }
    }
}

/// An identity stage: whatever is written comes out the readable side,
/// buffered while paused or unobserved. The single `high_water_mark`
/// bounds both the in-flight writes and the readable queue.
pub fn through<T: 'static>(options: ReadableOptions) -> Duplex<T, T> {
    let id = StreamId::next();
    let limit = options.high_water_mark.max(1);
    let readable = Readable::with_parts(
        id,
        ReadableEvents::new(),
        Box::new(|_, _| Ok(())),
        options,
    );
    let push = readable.push_handle();
    let writable = Writable::with_parts(
        id,
        WritableEvents::new(),
        move |item, done| {
            push.push_with(item, done);
            Ok(())
        },
        WritableOptions { concurrency: limit },
    );

    // Once every accepted write has been delivered, the readable side has
    // seen the whole input.
    {
        let readable = readable.clone();
        writable.events().finish.once(move |_| readable.end_read());
    }

    composite(writable, readable)
}

/// An object buffer; alias for [`through`].
pub fn buffer<T: 'static>(options: ReadableOptions) -> Duplex<T, T> {
    through(options)
}

/// A stage applying `transform_fn` to every written item. The function
/// receives the item, the readable side's push handle, the item's
/// completion, and the stage's `drain` slot for producers that need to
/// wait out backpressure.
pub fn transform<I, O, F>(mut transform_fn: F, options: TransformOptions) -> Duplex<I, O>
where
    I: 'static,
    O: 'static,
    F: FnMut(I, PushHandle<O>, WriteCompletion, &EventSlot<()>) -> StreamResult<()> + 'static,
{
    let id = StreamId::next();
    let limit = options.concurrency.max(1);
    let readable = Readable::with_parts(
        id,
        ReadableEvents::new(),
        Box::new(|_, _| Ok(())),
        ReadableOptions {
            high_water_mark: limit,
        },
    );
    let push = readable.push_handle();
    let writable_events = WritableEvents::new();
    let drain = writable_events.drain.clone();
    let writable = Writable::with_parts(
        id,
        writable_events,
        move |item, done| transform_fn(item, push.clone(), done, &drain),
        WritableOptions { concurrency: limit },
    );

    {
        let readable = readable.clone();
        writable.events().finish.once(move |_| readable.end_read());
    }

    composite(writable, readable)
}

/// Single-shot outcome handle given to [`map`] callbacks.
pub struct MapResolver<O> {
    push: PushHandle<O>,
    done: WriteCompletion,
}

impl<O: 'static> MapResolver<O> {
    pub fn succeed(self, value: O) {
        self.resolve(Ok(value));
    }

    pub fn fail(self, error: StreamError) {
        self.resolve(Err(error));
    }

    pub fn resolve(self, result: StreamResult<O>) {
        match result {
            Ok(value) => {
                self.push.push_with(value, self.done);
            }
            Err(error) => self.done.fail(error),
        }
    }
}

/// Map items through an asynchronous callback.
pub fn map<I, O, F>(mut map_fn: F, options: TransformOptions) -> Duplex<I, O>
where
    I: 'static,
    O: 'static,
    F: FnMut(I, MapResolver<O>) + 'static,
{
    transform(
        move |item, push, done, _drain| {
            map_fn(item, MapResolver { push, done });
            Ok(())
        },
        options,
    )
}

/// Map items through a synchronous fallible function.
pub fn map_sync<I, O, F>(mut map_fn: F) -> Duplex<I, O>
where
    I: 'static,
    O: 'static,
    F: FnMut(I) -> StreamResult<O> + 'static,
{
    map(
        move |item, resolver| {
            let result = map_fn(item);
            resolver.resolve(result);
        },
        TransformOptions::default(),
    )
}

/// Single-shot verdict handle given to [`filter`] callbacks.
pub struct FilterResolver<T> {
    item: T,
    push: PushHandle<T>,
    done: WriteCompletion,
}

impl<T: 'static> FilterResolver<T> {
    pub fn item(&self) -> &T {
        &self.item
    }

    pub fn resolve(self, keep: bool) {
        if keep {
            self.push.push_with(self.item, self.done);
        } else {
            self.done.ok();
        }
    }

    pub fn fail(self, error: StreamError) {
        self.done.fail(error);
    }
}

/// Keep only items accepted by an asynchronous predicate.
pub fn filter<T, F>(mut filter_fn: F, options: TransformOptions) -> Duplex<T, T>
where
    T: 'static,
    F: FnMut(FilterResolver<T>) + 'static,
{
    transform(
        move |item, push, done, _drain| {
            filter_fn(FilterResolver { item, push, done });
            Ok(())
        },
        options,
    )
}

/// Keep only items accepted by a synchronous fallible predicate.
pub fn filter_sync<T, F>(mut predicate: F) -> Duplex<T, T>
where
    T: 'static,
    F: FnMut(&T) -> StreamResult<bool> + 'static,
{
    filter(
        move |resolver| match predicate(resolver.item()) {
            Ok(keep) => resolver.resolve(keep),
            Err(error) => resolver.fail(error),
        },
        TransformOptions::default(),
    )
}

/// Concatenate written sources strictly in order: each source is parked
/// in its own paused buffer and replayed into the output only after
/// every earlier source has ended.
pub fn concat<T: Clone + 'static>() -> Duplex<Source<T>, T> {
    let input_map: Duplex<Source<T>, Duplex<T, T>> = map_sync(|source: Source<T>| {
        let source = readable(source);
        let parked = buffer::<T>(ReadableOptions::default());
        parked.pause();
        {
            let parked = parked.clone();
            source
                .events()
                .error
                .once(move |error| parked.errors().emit(error));
        }
        source.pipe(&parked);
        if !source.is_paused() {
            source.resume();
        }
        Ok(parked)
    });

    let output = buffer::<T>(ReadableOptions::default());

    let replay: Writable<Duplex<T, T>> = writable(
        {
            let output = output.clone();
            move |parked: Duplex<T, T>, done: WriteCompletion| {
                {
                    let done = done.mirror();
                    parked.on_end(move || done.complete(None));
                }
                {
                    let done = done.mirror();
                    parked
                        .errors()
                        .once(move |error| done.complete(Some(error.clone())));
                }
                parked.pipe_with(&output, PipeOptions { end: false });
                parked.resume();
                Ok(())
            }
        },
        WritableOptions { concurrency: 1 },
    );

    input_map.pipe(&replay);
    {
        let output = output.clone();
        replay.events().finish.once(move |_| output.end());
    }

    let combined = composite(input_map, output);
    {
        let errors = combined.errors().clone();
        replay.events().error.on(move |error| errors.emit(error));
    }
    combined
}

/// Merge written sources into one output as their items arrive, pausing
/// any source whose push is refused until the stage drains.
pub fn flatten<T: Clone + 'static>(options: TransformOptions) -> Duplex<Source<T>, T> {
    transform(
        move |item: Source<T>, push: PushHandle<T>, done: WriteCompletion, drain: &EventSlot<()>| {
            let source = readable(item);
            {
                let done = done.mirror();
                source.events().end.once(move |_| done.complete(None));
            }
            {
                let done = done.mirror();
                source
                    .events()
                    .error
                    .once(move |error| done.complete(Some(error.clone())));
            }
            {
                let source = source.clone();
                let drain = drain.clone();
                source.clone().events().data.on(move |item: &T| {
                    if !push.push(item.clone()) {
                        source.pause();
                        let source = source.clone();
                        drain.once(move |_| source.resume());
                    }
                });
            }
            if !source.is_paused() {
                source.resume();
            }
            Ok(())
        },
        options,
    )
}
