//! The pipe binding: wires a readable's output into a writable's input
//! with backpressure and optional end propagation.
//!
//! Wiring is bookkept on the source, keyed by destination identity; the
//! registry entry holds the teardown closures that detach every listener
//! the binding installed. Errors are deliberately not forwarded — stages
//! are observed individually or through a composite.

use super::{ReadableStream, StreamId, WritableStream};
use std::cell::RefCell;
use std::collections::HashMap;
use tracing::trace;

/// Options accepted by `pipe_with`.
#[derive(Debug, Clone, Copy)]
pub struct PipeOptions {
    /// Propagate the source's `end` into `destination.end()`.
    pub end: bool,
}

impl Default for PipeOptions {
    fn default() -> Self {
        Self { end: true }
    }
}

type Teardown = Box<dyn FnOnce()>;

/// Per-source record of active pipe bindings.
#[derive(Default)]
pub struct PipeRegistry {
    entries: RefCell<HashMap<StreamId, Vec<Teardown>>>,
}

impl PipeRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub fn is_piped_to(&self, destination: StreamId) -> bool {
        self.entries.borrow().contains_key(&destination)
    }

    pub fn active_pipes(&self) -> usize {
        self.entries.borrow().len()
    }

    fn register(&self, destination: StreamId, teardown: Teardown) {
        self.entries
            .borrow_mut()
            .entry(destination)
            .or_default()
            .push(teardown);
    }

    fn take(&self, destination: StreamId) -> Vec<Teardown> {
        self.entries
            .borrow_mut()
            .remove(&destination)
            .unwrap_or_default()
    }

    fn take_all(&self) -> Vec<Teardown> {
        self.entries.take().into_values().flatten().collect()
    }
}

/// Connect `source` to `destination`. Panics on self-piping. Idempotent
/// per destination for the data/drain wiring; end propagation is additive.
pub(crate) fn wire<T, R, W>(source: &R, destination: &W, options: PipeOptions) -> W
where
    T: Clone + 'static,
    R: ReadableStream<T> + Clone + 'static,
    W: WritableStream<T> + Clone + 'static,
{
    let source_id = ReadableStream::stream_id(source);
    let destination_id = WritableStream::stream_id(destination);
    assert!(
        source_id != destination_id,
        "cannot pipe a stream into itself"
    );

    let registry = source.pipe_registry();

    if !registry.is_piped_to(destination_id) {
        destination.writable_events().pipe.emit(&source_id);
    }

    // The pipe emission above may have re-entered and wired this pair.
    if !registry.is_piped_to(destination_id) {
        trace!(source = ?source_id, destination = ?destination_id, "pipe");

        let writer = {
            let writer_source = source.clone();
            let destination = destination.clone();
            source.readable_events().data.on(move |item: &T| {
                match destination.write(item.clone()) {
                    Ok(true) => {}
                    // Refused or failed: stop producing until demand returns.
                    Ok(false) | Err(_) => writer_source.pause(),
                }
            })
        };

        let resumer = {
            let source = source.clone();
            destination
                .writable_events()
                .drain
                .on(move |_| source.resume())
        };

        let teardown: Teardown = {
            let source = source.clone();
            let destination = destination.clone();
            Box::new(move || {
                destination.writable_events().unpipe.emit(&source_id);
                source.readable_events().data.remove_listener(writer);
                destination.writable_events().drain.remove_listener(resumer);
            })
        };
        registry.register(destination_id, teardown);
    }

    if options.end {
        let ender = {
            let destination = destination.clone();
            source
                .readable_events()
                .end
                .once(move |_| destination.end())
        };
        let teardown: Teardown = {
            let source = source.clone();
            Box::new(move || source.readable_events().end.remove_listener(ender))
        };
        registry.register(destination_id, teardown);
    }

    destination.clone()
}

/// Run and discard the teardown closures for one destination, or for all
/// active pipes when `destination` is `None`.
pub(crate) fn sever(registry: &PipeRegistry, destination: Option<StreamId>) {
    let teardowns = match destination {
        Some(id) => registry.take(id),
        None => registry.take_all(),
    };
    for teardown in teardowns {
        teardown();
    }
}
