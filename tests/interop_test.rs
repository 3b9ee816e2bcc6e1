//! The futures adapters, driven on a current-thread runtime. The stream
//! handles are deliberately not `Send`, so everything runs on a
//! `LocalSet`.

use futures::{SinkExt, StreamExt};
use object_stream::{
    into_sink, into_stream, writable, Deferred, Readable, ReadableOptions, StreamError, Writable,
    WritableOptions, WriteCompletion,
};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;
use tokio::task::LocalSet;

#[tokio::test]
async fn stream_adapter_yields_items_in_order() {
    LocalSet::new()
        .run_until(async {
            let source = Readable::from_vec(vec![1, 2, 3]);
            let mut adapted = into_stream(source);

            let mut seen = Vec::new();
            while let Some(item) = adapted.next().await {
                seen.push(item.unwrap());
            }
            assert_eq!(seen, vec![1, 2, 3]);
        })
        .await;
}

#[tokio::test]
async fn stream_adapter_waits_for_pushes() {
    LocalSet::new()
        .run_until(async {
            let source: Readable<u32> = Readable::new(ReadableOptions { high_water_mark: 4 });
            let push = source.push_handle();
            let mut adapted = into_stream(source);

            tokio::task::spawn_local(async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                push.push(7);
                tokio::time::sleep(Duration::from_millis(5)).await;
                push.end();
            });

            assert_eq!(adapted.next().await.unwrap().unwrap(), 7);
            assert!(adapted.next().await.is_none());
        })
        .await;
}

#[tokio::test]
async fn stream_adapter_surfaces_pull_errors() {
    LocalSet::new()
        .run_until(async {
            let source: Readable<u32> = Readable::from_pull(
                |_, _| Err("pull broke".into()),
                ReadableOptions::default(),
            );
            let mut adapted = into_stream(source);

            let first = adapted.next().await.unwrap();
            assert_eq!(first.unwrap_err().to_string(), "pull broke");
            assert!(adapted.next().await.is_none());
        })
        .await;
}

#[tokio::test]
async fn sink_adapter_writes_and_closes() {
    LocalSet::new()
        .run_until(async {
            let written = Rc::new(RefCell::new(Vec::new()));
            let sink_written = Rc::clone(&written);
            let stream = writable(
                move |item: u32, done: WriteCompletion| {
                    sink_written.borrow_mut().push(item);
                    done.ok();
                    Ok(())
                },
                WritableOptions { concurrency: 2 },
            );
            let mut adapted = into_sink(stream.clone());

            adapted.send(1).await.unwrap();
            adapted.send(2).await.unwrap();
            adapted.close().await.unwrap();

            assert_eq!(*written.borrow(), vec![1, 2]);
            assert!(stream.is_finished());
        })
        .await;
}

#[tokio::test]
async fn sink_adapter_respects_backpressure() {
    LocalSet::new()
        .run_until(async {
            let held: Rc<RefCell<Vec<WriteCompletion>>> = Rc::new(RefCell::new(Vec::new()));
            let sink_held = Rc::clone(&held);
            let stream: Writable<u32> = writable(
                move |_item, done| {
                    sink_held.borrow_mut().push(done);
                    Ok(())
                },
                WritableOptions { concurrency: 1 },
            );
            let mut adapted = into_sink(stream.clone());

            // acknowledge writes as they arrive, with a delay
            let acker = Rc::clone(&held);
            tokio::task::spawn_local(async move {
                let mut acknowledged = 0;
                while acknowledged < 3 {
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    let next = {
                        let mut held = acker.borrow_mut();
                        if held.is_empty() {
                            None
                        } else {
                            Some(held.remove(0))
                        }
                    };
                    if let Some(done) = next {
                        done.ok();
                        acknowledged += 1;
                    }
                }
            });

            for n in 1..=3 {
                adapted.feed(n).await.unwrap();
                assert!(stream.in_flight() <= 1);
            }
            adapted.flush().await.unwrap();
            assert_eq!(stream.in_flight(), 0);
        })
        .await;
}

#[tokio::test]
async fn deferred_resolves_as_a_future() {
    LocalSet::new()
        .run_until(async {
            let deferred: Deferred<u32> = Deferred::new();

            {
                let deferred = deferred.clone();
                tokio::task::spawn_local(async move {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    deferred.succeed(42);
                });
            }

            assert_eq!(deferred.clone().await.unwrap(), 42);

            let failed: Deferred<u32> = Deferred::new();
            failed.fail(StreamError::Ended);
            assert!(failed.await.is_err());
        })
        .await;
}
