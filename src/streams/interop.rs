//! Bridges between the callback engine and the `futures` traits.
//!
//! [`into_stream`] consumes a readable through `read(1)`/`read(0)` and
//! parks the task waker on the `readable`/`end`/`error` slots — it never
//! subscribes `data`, so the underlying stream stays in queue mode and
//! nothing is delivered behind the adapter's back. [`into_sink`] maps
//! `poll_ready` onto the drain protocol and `poll_close` onto the
//! persistent finish transition.

use super::error::{StreamError, StreamResult};
use super::{ReadableStream, WritableStream};
use crate::platform::SharedPtr;
use futures::{Sink, Stream};
use std::cell::{Cell, RefCell};
use std::marker::PhantomData;
use std::pin::Pin;
use std::task::{Context, Poll, Waker};

type SharedWaker = SharedPtr<RefCell<Option<Waker>>>;

fn wake(waker: &SharedWaker) {
    if let Some(waker) = waker.borrow_mut().take() {
        waker.wake();
    }
}

fn park(waker: &SharedWaker, cx: &Context<'_>) {
    *waker.borrow_mut() = Some(cx.waker().clone());
}

/// Adapt a readable stream into a `futures::Stream` of results.
pub fn into_stream<T, R>(stream: R) -> IntoStream<T, R>
where
    T: 'static,
    R: ReadableStream<T> + 'static,
{
    let ended = SharedPtr::new(Cell::new(false));
    let failed: SharedPtr<RefCell<Option<StreamError>>> = SharedPtr::new(RefCell::new(None));
    let waker: SharedWaker = SharedPtr::new(RefCell::new(None));

    {
        let waker = SharedPtr::clone(&waker);
        stream.readable_events().readable.on(move |_| wake(&waker));
    }
    {
        let ended = SharedPtr::clone(&ended);
        let waker = SharedPtr::clone(&waker);
        stream.readable_events().end.once(move |_| {
            ended.set(true);
            wake(&waker);
        });
    }
    {
        let failed = SharedPtr::clone(&failed);
        let waker = SharedPtr::clone(&waker);
        stream.readable_events().error.on(move |error| {
            failed.borrow_mut().get_or_insert_with(|| error.clone());
            wake(&waker);
        });
    }

    IntoStream {
        stream,
        ended,
        failed,
        waker,
        done: false,
        _item: PhantomData,
    }
}

pub struct IntoStream<T, R> {
    stream: R,
    ended: SharedPtr<Cell<bool>>,
    failed: SharedPtr<RefCell<Option<StreamError>>>,
    waker: SharedWaker,
    done: bool,
    _item: PhantomData<fn() -> T>,
}

impl<T, R> Stream for IntoStream<T, R>
where
    T: 'static,
    R: ReadableStream<T> + Unpin + 'static,
{
    type Item = StreamResult<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }

        if let Some(item) = this.stream.read(Some(1)).pop() {
            return Poll::Ready(Some(Ok(item)));
        }
        if let Some(error) = this.failed.borrow_mut().take() {
            this.done = true;
            return Poll::Ready(Some(Err(error)));
        }
        if this.ended.get() {
            this.done = true;
            return Poll::Ready(None);
        }

        // Queue ran dry: ask the producer for more, then re-check.
        this.stream.read(Some(0));
        if let Some(item) = this.stream.read(Some(1)).pop() {
            return Poll::Ready(Some(Ok(item)));
        }
        if let Some(error) = this.failed.borrow_mut().take() {
            this.done = true;
            return Poll::Ready(Some(Err(error)));
        }
        if this.ended.get() {
            this.done = true;
            return Poll::Ready(None);
        }

        park(&this.waker, cx);
        Poll::Pending
    }
}

/// Adapt a writable stream into a `futures::Sink`.
pub fn into_sink<T, W>(sink: W) -> IntoSink<T, W>
where
    T: 'static,
    W: WritableStream<T> + 'static,
{
    let blocked = SharedPtr::new(Cell::new(false));
    let outstanding = SharedPtr::new(Cell::new(0usize));
    let finished = SharedPtr::new(Cell::new(false));
    let failed: SharedPtr<RefCell<Option<StreamError>>> = SharedPtr::new(RefCell::new(None));
    let waker: SharedWaker = SharedPtr::new(RefCell::new(None));

    {
        let blocked = SharedPtr::clone(&blocked);
        let waker = SharedPtr::clone(&waker);
        sink.writable_events().drain.on(move |_| {
            blocked.set(false);
            wake(&waker);
        });
    }
    {
        let finished = SharedPtr::clone(&finished);
        let waker = SharedPtr::clone(&waker);
        sink.writable_events().finish.once(move |_| {
            finished.set(true);
            wake(&waker);
        });
    }
    {
        let failed = SharedPtr::clone(&failed);
        let waker = SharedPtr::clone(&waker);
        sink.writable_events().error.on(move |error| {
            failed.borrow_mut().get_or_insert_with(|| error.clone());
            wake(&waker);
        });
    }

    IntoSink {
        sink,
        blocked,
        outstanding,
        finished,
        failed,
        waker,
        closing: false,
        _item: PhantomData,
    }
}

pub struct IntoSink<T, W> {
    sink: W,
    blocked: SharedPtr<Cell<bool>>,
    outstanding: SharedPtr<Cell<usize>>,
    finished: SharedPtr<Cell<bool>>,
    failed: SharedPtr<RefCell<Option<StreamError>>>,
    waker: SharedWaker,
    closing: bool,
    _item: PhantomData<fn() -> T>,
}

impl<T, W> IntoSink<T, W> {
    fn take_failure(&self) -> Option<StreamError> {
        self.failed.borrow_mut().take()
    }
}

impl<T, W> Sink<T> for IntoSink<T, W>
where
    T: 'static,
    W: WritableStream<T> + Unpin + 'static,
{
    type Error = StreamError;

    fn poll_ready(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        let this = self.get_mut();
        if let Some(error) = this.take_failure() {
            return Poll::Ready(Err(error));
        }
        if !this.blocked.get() {
            return Poll::Ready(Ok(()));
        }
        park(&this.waker, cx);
        // Re-check: drain may have fired between the test and the park.
        if !this.blocked.get() {
            return Poll::Ready(Ok(()));
        }
        Poll::Pending
    }

    fn start_send(self: Pin<&mut Self>, item: T) -> Result<(), Self::Error> {
        let this = self.get_mut();
        this.outstanding.set(this.outstanding.get() + 1);
        let outstanding = SharedPtr::clone(&this.outstanding);
        let waker = SharedPtr::clone(&this.waker);
        let accepted = this.sink.write_raw(
            item,
            Some(Box::new(move |_error| {
                outstanding.set(outstanding.get().saturating_sub(1));
                wake(&waker);
            })),
        );
        match accepted {
            Ok(true) => Ok(()),
            Ok(false) => {
                this.blocked.set(true);
                Ok(())
            }
            Err(error) => {
                this.outstanding.set(this.outstanding.get().saturating_sub(1));
                Err(error)
            }
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        let this = self.get_mut();
        if let Some(error) = this.take_failure() {
            return Poll::Ready(Err(error));
        }
        if this.outstanding.get() == 0 {
            return Poll::Ready(Ok(()));
        }
        park(&this.waker, cx);
        Poll::Pending
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        let this = self.get_mut();
        if let Some(error) = this.take_failure() {
            return Poll::Ready(Err(error));
        }
        if !this.closing {
            this.closing = true;
            this.sink.end();
        }
        if this.finished.get() {
            return Poll::Ready(Ok(()));
        }
        park(&this.waker, cx);
        Poll::Pending
    }
}
