//! Backpressure-aware object streams for single-threaded, event-driven
//! programs.
//!
//! Producers and consumers of arbitrary typed values are decoupled through
//! readable, writable and duplex endpoints that cooperatively signal flow
//! control without blocking: `write` and `push` return a boolean demand
//! signal, `drain`/`readable` events announce that demand is back, and
//! terminal transitions (`end`, `finish`, `error`) are replayed to
//! listeners that subscribe after the fact.
//!
//! # Example
//!
//! ```
//! use object_stream::{buffer, ReadableOptions, ReadableStream, WritableStream};
//!
//! let stage = buffer::<u32>(ReadableOptions { high_water_mark: 8 });
//! stage.pause();
//!
//! for n in 1..=3 {
//!     stage.write(n).unwrap();
//! }
//!
//! let mut seen = Vec::new();
//! seen.extend(stage.read(None));
//! assert_eq!(seen, vec![1, 2, 3]);
//! ```

pub mod platform;
pub mod streams;

pub use streams::{
    buffer, composite, concat, filter, filter_sync, flatten, into_sink, into_stream, map,
    map_sync, pipeline, read_one, readable, readable_with, through, to_vec, transform, when_ended,
    when_finished, writable, Deferred, Duplex, EventSlot, FilterResolver, FinishFn, FlushFn,
    IntoSink, IntoStream, ListenerId, MapResolver, PipeOptions, PipeRegistry, PushHandle,
    Readable, ReadableEvents, ReadableOptions, ReadableStream, Source, StreamError, StreamId,
    StreamResult, TransformOptions, Writable, WritableEvents, WritableOptions, WritableStream,
    WriteCompletion,
};
