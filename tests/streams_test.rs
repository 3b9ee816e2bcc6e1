//! End-to-end behavior of the flow-control engine: backpressure, ordering,
//! terminal transitions, piping and composition.

use object_stream::{
    buffer, pipeline, to_vec, when_ended, when_finished, writable, PipeOptions, Readable,
    ReadableOptions, ReadableStream, Source, StreamError, Writable, WritableOptions,
    WritableStream, WriteCompletion,
};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

fn deferred_sink<T: 'static>() -> (
    impl FnMut(T, WriteCompletion) -> Result<(), StreamError>,
    Rc<RefCell<Vec<WriteCompletion>>>,
) {
    let held: Rc<RefCell<Vec<WriteCompletion>>> = Rc::new(RefCell::new(Vec::new()));
    let sink_held = Rc::clone(&held);
    let sink = move |_item: T, done: WriteCompletion| {
        sink_held.borrow_mut().push(done);
        Ok(())
    };
    (sink, held)
}

fn pop_completion(held: &Rc<RefCell<Vec<WriteCompletion>>>) -> Option<WriteCompletion> {
    let mut held = held.borrow_mut();
    if held.is_empty() {
        None
    } else {
        Some(held.remove(0))
    }
}

/// A paused buffer absorbs past its high water mark, emits
/// nothing, and replays everything in order on resume.
#[test]
fn paused_buffer_replays_everything_in_order_on_resume() {
    let stage = buffer::<u32>(ReadableOptions {
        high_water_mark: 20,
    });
    stage.pause();

    let flushes = Rc::new(Cell::new(0u32));
    let mut returns = Vec::new();
    for n in 1..=100 {
        let f = Rc::clone(&flushes);
        returns.push(
            stage
                .write_with(n, move |_| f.set(f.get() + 1))
                .unwrap(),
        );
    }

    // backpressure exactly from the 20th write
    assert!(returns[..19].iter().all(|&accepted| accepted));
    assert!(returns[19..].iter().all(|&accepted| !accepted));
    assert_eq!(flushes.get(), 0);

    let seen = Rc::new(RefCell::new(Vec::new()));
    let s = Rc::clone(&seen);
    stage.on_data(move |n: &u32| s.borrow_mut().push(*n));
    // still paused: attaching the listener must not deliver
    assert!(seen.borrow().is_empty());

    stage.resume();
    assert_eq!(*seen.borrow(), (1..=100).collect::<Vec<u32>>());
    assert_eq!(flushes.get(), 100);
}

/// A two-stage pipeline of single-slot buffers delivers all
/// items in order and ends exactly once.
#[test]
fn two_stage_pipeline_preserves_order_and_ends_once() {
    let line = pipeline(vec![
        buffer::<u32>(ReadableOptions { high_water_mark: 1 }),
        buffer::<u32>(ReadableOptions { high_water_mark: 1 }),
    ]);

    for n in 1..=100 {
        let _ = line.write(n);
    }
    line.end();

    let seen = Rc::new(RefCell::new(Vec::new()));
    let ends = Rc::new(Cell::new(0));

    let s = Rc::clone(&seen);
    line.on_data(move |n: &u32| s.borrow_mut().push(*n));
    {
        let ends = Rc::clone(&ends);
        line.readable_events().end.on(move |_| ends.set(ends.get() + 1));
    }
    line.resume();

    assert_eq!(*seen.borrow(), (1..=100).collect::<Vec<u32>>());
    assert_eq!(ends.get(), 1);

    // a listener subscribing after the fact still observes the end
    let late = Rc::new(Cell::new(false));
    let l = Rc::clone(&late);
    line.on_end(move || l.set(true));
    assert!(late.get());
}

struct Feeder {
    stream: Writable<u32>,
    next: Cell<u32>,
    peak: Cell<usize>,
}

impl Feeder {
    fn pump(&self) {
        while self.next.get() <= 100 {
            let accepted = self.stream.write(self.next.get()).unwrap();
            self.next.set(self.next.get() + 1);
            self.peak.set(self.peak.get().max(self.stream.in_flight()));
            if !accepted {
                break;
            }
        }
    }
}

/// A backpressure-respecting producer against a
/// concurrency-2 writable never exceeds two writes in flight.
#[test]
fn producer_respecting_backpressure_never_exceeds_the_limit() {
    let (sink, held) = deferred_sink::<u32>();
    let stream = writable(sink, WritableOptions { concurrency: 2 });

    let feeder = Rc::new(Feeder {
        stream: stream.clone(),
        next: Cell::new(1),
        peak: Cell::new(0),
    });
    {
        let feeder = Rc::clone(&feeder);
        stream.on_drain(move || feeder.pump());
    }

    feeder.pump();
    // the limit is reached immediately after the first two writes
    assert_eq!(stream.in_flight(), 2);

    let mut completed = 0;
    while let Some(done) = pop_completion(&held) {
        done.ok();
        completed += 1;
        assert!(stream.in_flight() <= 2);
    }

    assert_eq!(completed, 100);
    assert_eq!(feeder.next.get(), 101);
    assert_eq!(feeder.peak.get(), 2);
    assert_eq!(stream.in_flight(), 0);
}

/// A source whose pull fails mid-iteration surfaces the error
/// on its own `error` event exactly once; items pushed before the failure
/// still flow into the piped destination.
#[test]
fn pull_failure_mid_iteration_surfaces_once_on_the_source() {
    let calls = Rc::new(Cell::new(0u32));
    let pull_calls = Rc::clone(&calls);
    let source: Readable<u32> = Readable::from_pull(
        move |_, push| {
            pull_calls.set(pull_calls.get() + 1);
            push.push(1);
            push.push(2);
            Err("iterator exploded".into())
        },
        ReadableOptions { high_water_mark: 4 },
    );

    let errors = Rc::new(Cell::new(0));
    let e = Rc::clone(&errors);
    source.events().error.on(move |_| e.set(e.get() + 1));

    let destination = buffer::<u32>(ReadableOptions { high_water_mark: 8 });
    let seen = Rc::new(RefCell::new(Vec::new()));
    let s = Rc::clone(&seen);
    destination.on_data(move |n: &u32| s.borrow_mut().push(*n));

    source.pipe(&destination);

    assert_eq!(errors.get(), 1);
    assert_eq!(calls.get(), 1);
    assert_eq!(*seen.borrow(), vec![1, 2]);
}

#[test]
fn corked_duplex_holds_writes_until_uncork() {
    let stage = buffer::<u32>(ReadableOptions { high_water_mark: 8 });
    let seen = Rc::new(RefCell::new(Vec::new()));
    let s = Rc::clone(&seen);
    stage.on_data(move |n: &u32| s.borrow_mut().push(*n));

    stage.cork();
    for n in 1..=3 {
        let _ = stage.write(n);
    }
    assert!(seen.borrow().is_empty());

    stage.uncork();
    assert_eq!(*seen.borrow(), vec![1, 2, 3]);
}

#[test]
fn end_flushes_corked_writes_before_finishing() {
    let stage = buffer::<u32>(ReadableOptions { high_water_mark: 8 });
    let seen = Rc::new(RefCell::new(Vec::new()));
    let finished = Rc::new(Cell::new(false));

    let s = Rc::clone(&seen);
    stage.on_data(move |n: &u32| s.borrow_mut().push(*n));

    stage.cork();
    let _ = stage.write(1);
    let _ = stage.write(2);

    let f = Rc::clone(&finished);
    stage.end_with(None, move || f.set(true)).unwrap();

    assert_eq!(*seen.borrow(), vec![1, 2]);
    assert!(finished.get());
}

#[test]
fn unpipe_mid_stream_stops_forwarding() {
    let source: Readable<u32> = Readable::new(ReadableOptions { high_water_mark: 8 });
    let push = source.push_handle();
    let destination = buffer::<u32>(ReadableOptions { high_water_mark: 8 });

    let seen = Rc::new(RefCell::new(Vec::new()));
    let s = Rc::clone(&seen);
    destination.on_data(move |n: &u32| s.borrow_mut().push(*n));

    source.pipe(&destination);
    push.push(1);

    source.unpipe(&destination);
    push.push(2);

    assert_eq!(*seen.borrow(), vec![1]);
    assert_eq!(source.buffered(), 1);
}

#[test]
fn end_propagation_can_be_opted_out_per_pipe() {
    let source = Readable::from_vec(vec![1u32]);
    let destination = buffer::<u32>(ReadableOptions { high_water_mark: 8 });
    let seen = Rc::new(RefCell::new(Vec::new()));
    let s = Rc::clone(&seen);
    destination.on_data(move |n: &u32| s.borrow_mut().push(*n));

    source.pipe_with(&destination, PipeOptions { end: false });

    let ended = when_ended(&source);
    assert!(matches!(ended.try_result(), Some(Ok(()))));

    let finished = when_finished(&destination);
    assert!(!finished.is_resolved());

    destination.end();
    assert!(matches!(finished.try_result(), Some(Ok(()))));
    assert_eq!(*seen.borrow(), vec![1]);
}

#[test]
fn to_vec_collects_until_end() {
    let stage = buffer::<u32>(ReadableOptions { high_water_mark: 8 });
    let collected = to_vec(&stage);

    for n in 1..=4 {
        let _ = stage.write(n);
    }
    assert!(!collected.is_resolved());

    stage.end();
    assert_eq!(collected.try_result().unwrap().unwrap(), vec![1, 2, 3, 4]);
}

#[test]
fn errors_are_persistent_but_each_occurrence_emits() {
    let stream: Writable<u32> = writable(
        |_item, done: WriteCompletion| {
            done.fail("always failing".into());
            Ok(())
        },
        WritableOptions { concurrency: 4 },
    );

    let early = Rc::new(Cell::new(0));
    let e = Rc::clone(&early);
    stream.events().error.on(move |_| e.set(e.get() + 1));

    let _ = stream.write(1);
    let _ = stream.write(2);
    assert_eq!(early.get(), 2);

    // a late subscriber still observes the (latest) prior error
    let late = Rc::new(Cell::new(0));
    let l = Rc::clone(&late);
    stream.events().error.on(move |_| l.set(l.get() + 1));
    assert_eq!(late.get(), 1);
}

#[test]
fn sources_written_into_a_flatten_pipeline_round_trip() {
    let stage = object_stream::flatten::<u32>(object_stream::TransformOptions { concurrency: 2 });
    let collected = to_vec(&stage);

    let _ = stage.write(Source::from(vec![1, 2]));
    let _ = stage.write(Source::from_iter(3..=4));
    stage.end();

    assert_eq!(collected.try_result().unwrap().unwrap(), vec![1, 2, 3, 4]);
}
