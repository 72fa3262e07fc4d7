#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Task completion pipe behavior across tasks
//!
//! Covers completion-order delivery, termination, and several consumers
//! sharing one pipe.

use fairsync::{TaskCompletionPipe, WaitError, WaitOptions};
use futures::StreamExt;
use std::collections::HashSet;
use std::time::Duration;

async fn finish_after(millis: u64, value: u32) -> u32 {
    tokio::time::sleep(Duration::from_millis(millis)).await;
    value
}

#[tokio::test]
async fn test_consumer_observes_completion_order() {
    let pipe = TaskCompletionPipe::new();
    pipe.add(finish_after(50, 1)).unwrap(); // A
    pipe.add(async { 2 }).unwrap(); // B, already finished
    pipe.add(finish_after(10, 3)).unwrap(); // C
    pipe.complete().unwrap();

    let order: Vec<_> = pipe.into_stream().collect().await;
    assert_eq!(order, vec![2, 3, 1]);
}

#[tokio::test]
async fn test_consumer_started_before_producer() {
    let pipe = TaskCompletionPipe::new();
    let consumer = tokio::spawn({
        let pipe = pipe.clone();
        async move { pipe.into_stream().collect::<Vec<_>>().await }
    });

    for (delay, value) in [(30, 30), (5, 5), (15, 15)] {
        pipe.add(finish_after(delay, value)).unwrap();
    }
    pipe.complete().unwrap();

    assert_eq!(consumer.await.unwrap(), vec![5, 15, 30]);
}

#[tokio::test]
async fn test_complete_with_nothing_scheduled_ends_stream() {
    let pipe = TaskCompletionPipe::<u32>::new();
    let blocked = tokio::spawn({
        let pipe = pipe.clone();
        async move { pipe.wait_to_read(WaitOptions::new()).await }
    });
    while pipe.waiting_consumers() == 0 {
        tokio::task::yield_now().await;
    }

    pipe.complete().unwrap();
    assert_eq!(blocked.await.unwrap(), Ok(false));
    assert_eq!(pipe.wait_to_read(WaitOptions::new()).await, Ok(false));
    assert!(matches!(pipe.complete(), Err(WaitError::InvalidArgument(_))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_multiple_consumers_share_every_item_once() {
    let pipe = TaskCompletionPipe::with_capacity(64);
    let consumers: Vec<_> = (0..4)
        .map(|_| {
            let pipe = pipe.clone();
            tokio::spawn(async move { pipe.into_stream().collect::<Vec<u32>>().await })
        })
        .collect();

    for value in 0..64_u32 {
        pipe.add(finish_after(u64::from(value % 7), value)).unwrap();
    }
    pipe.complete().unwrap();

    let mut seen = HashSet::new();
    let mut total = 0;
    for consumer in consumers {
        for value in consumer.await.unwrap() {
            total += 1;
            assert!(seen.insert(value), "value {value} delivered twice");
        }
    }
    assert_eq!(total, 64);
    assert_eq!(pipe.scheduled(), 0);
}

#[tokio::test]
async fn test_canceled_consumer_leaves_pipe_intact() {
    let pipe = TaskCompletionPipe::new();
    pipe.add(finish_after(40, 7)).unwrap();

    let token = fairsync::CancellationToken::new();
    let canceled = tokio::spawn({
        let pipe = pipe.clone();
        let token = token.clone();
        async move { pipe.wait_to_read(WaitOptions::new().cancellation(token)).await }
    });
    while pipe.waiting_consumers() == 0 {
        tokio::task::yield_now().await;
    }
    token.cancel();
    assert_eq!(canceled.await.unwrap(), Err(WaitError::Canceled));
    assert_eq!(pipe.waiting_consumers(), 0);

    assert_eq!(pipe.wait_to_read(WaitOptions::new()).await, Ok(true));
    assert_eq!(pipe.try_read(), Some(7));
}
