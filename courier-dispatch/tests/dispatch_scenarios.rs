//! End-to-end dispatch behaviour: deduplication, throttling, backoff and
//! provider failover.
#![allow(clippy::expect_used, clippy::unwrap_used)]

mod support;

use std::{sync::Arc, time::Duration};

use courier_common::Signal;
use courier_dispatch::{
    BroadcastSink, DispatchConfig, DispatchError, DispatchOutcome, Dispatcher, EventKind,
    FanoutSink, Message, Provider, RateLimitStrategy, provider::LocalProvider,
};
use pretty_assertions::assert_eq;
use support::{RecordingSink, ScriptedProvider};
use tokio::{
    sync::{broadcast, mpsc},
    time::Instant,
};

fn config(limit: u32) -> DispatchConfig {
    DispatchConfig {
        rate_limit: RateLimitStrategy::FixedWindow {
            limit,
            window_ms: 60_000,
        },
        ..DispatchConfig::default()
    }
}

fn dispatcher(
    limit: u32,
    providers: &[Arc<ScriptedProvider>],
    sink: &Arc<RecordingSink>,
) -> Dispatcher {
    Dispatcher::with_sink(
        config(limit),
        providers
            .iter()
            .map(|p| Arc::clone(p) as Arc<dyn Provider>)
            .collect(),
        sink.clone(),
    )
    .unwrap()
}

fn assert_gap(earlier: Instant, later: Instant, expected_ms: u64) {
    let gap = later.duration_since(earlier);
    let expected = Duration::from_millis(expected_ms);
    assert!(
        gap >= expected && gap < expected + Duration::from_millis(50),
        "gap {gap:?}, expected {expected:?}"
    );
}

#[tokio::test(start_paused = true)]
async fn test_failover_to_second_provider() {
    let p1 = ScriptedProvider::always_failing("p1");
    let p2 = ScriptedProvider::always_succeeding("p2");
    let sink = RecordingSink::new();
    let dispatcher = dispatcher(2, &[p1.clone(), p2.clone()], &sink);

    let outcome = dispatcher
        .dispatch(Message::new("a@x.com", "s", "b"))
        .await;

    assert_eq!(
        outcome,
        DispatchOutcome::Delivered {
            provider: "p2".to_string(),
            attempts: 4,
            rotations: 1,
        }
    );

    // Three attempts on p1, backing off 1s, 2s and 4s
    let p1_calls = p1.call_times();
    let p2_calls = p2.call_times();
    assert_eq!(p1_calls.len(), 3);
    assert_eq!(p2_calls.len(), 1);
    assert_gap(p1_calls[0], p1_calls[1], 1000);
    assert_gap(p1_calls[1], p1_calls[2], 2000);
    assert_gap(p1_calls[2], p2_calls[0], 4000);

    let kinds = sink.kinds();
    assert_eq!(kinds.len(), 5);
    for (i, kind) in kinds[..3].iter().enumerate() {
        let EventKind::AttemptFailed {
            provider,
            attempt,
            max_attempts,
            retry_in,
            ..
        } = kind
        else {
            panic!("expected a failed attempt, got {kind:?}");
        };
        assert_eq!(provider, "p1");
        assert_eq!(*attempt, u32::try_from(i + 1).unwrap());
        assert_eq!(*max_attempts, 3);
        assert_eq!(*retry_in, Some(Duration::from_millis(1000 << i)));
    }
    assert_eq!(
        kinds[3],
        EventKind::ProviderSwitched {
            from: "p1".to_string(),
            to: "p2".to_string(),
        }
    );
    assert_eq!(
        kinds[4],
        EventKind::Delivered {
            provider: "p2".to_string(),
            attempts: 4,
        }
    );

    let last = sink.last_status().unwrap();
    assert!(!last.is_error);
    assert!(last.text.contains("p2"));
    assert_eq!(dispatcher.active_provider(), "p2");
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_is_suppressed() {
    let p1 = ScriptedProvider::always_succeeding("p1");
    let sink = RecordingSink::new();
    let dispatcher = dispatcher(2, &[p1.clone()], &sink);
    let message = Message::new("a@x.com", "s", "b");

    assert!(dispatcher.dispatch(message.clone()).await.is_delivered());
    sink.clear();

    assert_eq!(dispatcher.dispatch(message).await, DispatchOutcome::Duplicate);
    assert_eq!(p1.call_count(), 1);
    assert_eq!(sink.kinds(), [EventKind::Duplicate]);
    assert!(sink.statuses()[0].is_error);
    assert_eq!(dispatcher.stats().outcomes().duplicates, 1);
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_does_not_consume_rate_budget() {
    let p1 = ScriptedProvider::always_succeeding("p1");
    let sink = RecordingSink::new();
    let dispatcher = dispatcher(2, &[p1.clone()], &sink);
    let message = Message::new("a@x.com", "s", "b");

    dispatcher.dispatch(message.clone()).await;
    dispatcher.dispatch(message).await;

    assert!(
        dispatcher
            .dispatch(Message::new("a@x.com", "other", "b"))
            .await
            .is_delivered()
    );
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_within_window() {
    let p1 = ScriptedProvider::always_succeeding("p1");
    let sink = RecordingSink::new();
    let dispatcher = dispatcher(2, &[p1.clone()], &sink);

    for subject in ["one", "two"] {
        assert!(
            dispatcher
                .dispatch(Message::new("a@x.com", subject, "b"))
                .await
                .is_delivered()
        );
    }
    sink.clear();

    let outcome = dispatcher
        .dispatch(Message::new("a@x.com", "three", "b"))
        .await;

    assert_eq!(outcome, DispatchOutcome::RateLimited);
    assert_eq!(p1.call_count(), 2);
    assert!(matches!(
        sink.kinds().as_slice(),
        [EventKind::RateLimited { .. }]
    ));
    assert!(sink.last_status().unwrap().is_error);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_resets_after_window() {
    let p1 = ScriptedProvider::always_succeeding("p1");
    let sink = RecordingSink::new();
    let dispatcher = dispatcher(2, &[p1.clone()], &sink);

    for subject in ["one", "two", "three"] {
        dispatcher
            .dispatch(Message::new("a@x.com", subject, "b"))
            .await;
    }
    assert_eq!(p1.call_count(), 2);

    tokio::time::advance(Duration::from_secs(60)).await;

    assert!(
        dispatcher
            .dispatch(Message::new("a@x.com", "four", "b"))
            .await
            .is_delivered()
    );

    // The rate limited message was recorded and is never retried
    assert_eq!(
        dispatcher
            .dispatch(Message::new("a@x.com", "three", "b"))
            .await,
        DispatchOutcome::Duplicate
    );
    assert_eq!(p1.call_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_all_providers_exhausted_is_bounded() {
    let p1 = ScriptedProvider::always_failing("p1");
    let p2 = ScriptedProvider::always_failing("p2");
    let sink = RecordingSink::new();
    let dispatcher = dispatcher(2, &[p1.clone(), p2.clone()], &sink);
    let message = Message::new("a@x.com", "s", "b");

    let outcome = dispatcher.dispatch(message.clone()).await;

    assert_eq!(
        outcome,
        DispatchOutcome::Failed(DispatchError::AllProvidersExhausted {
            providers: 2,
            attempts: 6,
        })
    );
    assert_eq!(p1.call_count(), 3);
    assert_eq!(p2.call_count(), 3);

    let kinds = sink.kinds();
    let exhausted = kinds
        .iter()
        .filter(|kind| matches!(kind, EventKind::AllProvidersExhausted { .. }))
        .count();
    let switches = kinds
        .iter()
        .filter(|kind| matches!(kind, EventKind::ProviderSwitched { .. }))
        .count();
    assert_eq!(exhausted, 1);
    assert_eq!(switches, 1);
    assert!(sink.last_status().unwrap().is_error);

    // Suppression is based on attempted delivery
    assert_eq!(dispatcher.dispatch(message).await, DispatchOutcome::Duplicate);
    assert_eq!(p1.call_count() + p2.call_count(), 6);
}

#[tokio::test(start_paused = true)]
async fn test_rotation_advances_exactly_one_position() {
    let p1 = ScriptedProvider::always_failing("p1");
    let p2 = ScriptedProvider::always_succeeding("p2");
    let p3 = ScriptedProvider::always_succeeding("p3");
    let sink = RecordingSink::new();
    let dispatcher = dispatcher(10, &[p1.clone(), p2.clone(), p3.clone()], &sink);

    dispatcher
        .dispatch(Message::new("a@x.com", "s", "b"))
        .await;

    assert_eq!(dispatcher.active_index(), 1);
    assert_eq!(p2.call_count(), 1);
    assert_eq!(p3.call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_rotation_wraps_around_roster() {
    let p1 = ScriptedProvider::scripted("p1", &[false, false, false], true);
    let p2 = ScriptedProvider::scripted("p2", &[true], false);
    let sink = RecordingSink::new();
    let dispatcher = dispatcher(10, &[p1.clone(), p2.clone()], &sink);

    assert!(
        dispatcher
            .dispatch(Message::new("a@x.com", "first", "b"))
            .await
            .is_delivered()
    );
    assert_eq!(dispatcher.active_index(), 1);

    // p2 goes down and p1 has recovered, so rotation wraps back to the start
    let outcome = dispatcher
        .dispatch(Message::new("a@x.com", "second", "b"))
        .await;

    assert_eq!(
        outcome,
        DispatchOutcome::Delivered {
            provider: "p1".to_string(),
            attempts: 4,
            rotations: 1,
        }
    );
    assert_eq!(dispatcher.active_index(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_terminates_on_eventual_success() {
    let p1 = ScriptedProvider::always_failing("p1");
    let p2 = ScriptedProvider::scripted("p2", &[false, false], true);
    let sink = RecordingSink::new();
    let dispatcher = dispatcher(2, &[p1.clone(), p2.clone()], &sink);

    let outcome = dispatcher
        .dispatch(Message::new("a@x.com", "s", "b"))
        .await;

    assert_eq!(
        outcome,
        DispatchOutcome::Delivered {
            provider: "p2".to_string(),
            attempts: 6,
            rotations: 1,
        }
    );
    assert!(matches!(
        sink.kinds().last(),
        Some(EventKind::Delivered { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_log_lines_carry_attempt_detail() {
    let p1 = ScriptedProvider::scripted("p1", &[false], true);
    let sink = RecordingSink::new();
    let dispatcher = dispatcher(2, &[p1], &sink);

    dispatcher
        .dispatch(Message::new("a@x.com", "s", "b"))
        .await;

    let logs = sink.logs();
    assert_eq!(logs.len(), 2);
    assert!(logs[0].contains("attempt 1/3 via p1 failed"));
    assert!(logs[0].contains("p1 is down"));
    assert!(logs[1].contains("delivered via p1"));
    assert_eq!(sink.statuses().len(), logs.len());
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_duplicates_dispatch_once() {
    let p1 = ScriptedProvider::always_succeeding("p1");
    let sink = RecordingSink::new();
    let dispatcher = dispatcher(10, &[p1.clone()], &sink);
    let message = Message::new("a@x.com", "s", "b");

    let (first, second) = tokio::join!(
        dispatcher.dispatch(message.clone()),
        dispatcher.dispatch(message)
    );

    let mut outcomes = [first.is_delivered(), second.is_delivered()];
    outcomes.sort_unstable();
    assert_eq!(outcomes, [false, true]);
    assert_eq!(p1.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_send_email_is_fire_and_forget() {
    let mailbox = LocalProvider::new("local");
    let broadcast_sink = BroadcastSink::new(16);
    let mut events = broadcast_sink.subscribe();
    let recorder = RecordingSink::new();
    let dispatcher = Dispatcher::with_sink(
        config(2),
        vec![Arc::new(mailbox.clone()) as Arc<dyn Provider>],
        Arc::new(
            FanoutSink::default()
                .with(recorder.clone())
                .with(Arc::new(broadcast_sink)),
        ),
    )
    .unwrap();

    dispatcher.send_email("a@x.com", "hello", "body");

    let event = events.recv().await.unwrap();
    assert_eq!(
        event.kind,
        EventKind::Delivered {
            provider: "local".to_string(),
            attempts: 1,
        }
    );
    assert_eq!(&*event.recipient, "a@x.com");
    assert_eq!(mailbox.delivered()[0].subject(), "hello");
    assert_eq!(recorder.statuses().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_serve_drains_queue() {
    let mailbox = LocalProvider::new("local");
    let dispatcher =
        Dispatcher::new(config(10), vec![Arc::new(mailbox.clone()) as Arc<dyn Provider>]).unwrap();
    let (sender, queue) = mpsc::channel(8);
    let (_shutdown_tx, shutdown) = broadcast::channel(1);

    sender
        .send(Message::new("a@x.com", "one", "b"))
        .await
        .unwrap();
    sender
        .send(Message::new("a@x.com", "two", "b"))
        .await
        .unwrap();
    drop(sender);

    dispatcher.serve(queue, shutdown).await;

    assert_eq!(mailbox.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_serve_keeps_draining_when_shutdown_channel_closes() {
    // `select!` polls its branches in random order, so repeat to cover both
    for round in 0..20 {
        let mailbox = LocalProvider::new("local");
        let dispatcher = Dispatcher::new(
            config(10),
            vec![Arc::new(mailbox.clone()) as Arc<dyn Provider>],
        )
        .unwrap();
        let (sender, queue) = mpsc::channel(8);
        let (shutdown_tx, shutdown) = broadcast::channel::<Signal>(1);

        for subject in ["one", "two", "three"] {
            sender
                .send(Message::new("a@x.com", subject, "b"))
                .await
                .unwrap();
        }
        drop(sender);
        drop(shutdown_tx);

        dispatcher.serve(queue, shutdown).await;

        assert_eq!(mailbox.len(), 3, "round {round}");
        assert_eq!(dispatcher.stats().outcomes().delivered, 3);
    }
}

#[tokio::test(start_paused = true)]
async fn test_serve_waits_for_in_flight_on_shutdown() {
    let p1 = ScriptedProvider::scripted("p1", &[false], true);
    let sink = RecordingSink::new();
    let dispatcher = dispatcher(10, &[p1.clone()], &sink);
    let (sender, queue) = mpsc::channel(8);
    let (shutdown_tx, shutdown) = broadcast::channel(1);

    let server = {
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move { dispatcher.serve(queue, shutdown).await })
    };

    sender
        .send(Message::new("a@x.com", "s", "b"))
        .await
        .unwrap();
    while p1.call_count() == 0 {
        tokio::task::yield_now().await;
    }

    // The dispatch is now backing off after its first failure
    shutdown_tx.send(Signal::Shutdown).unwrap();
    server.await.unwrap();

    assert_eq!(p1.call_count(), 2);
    assert_eq!(dispatcher.stats().outcomes().delivered, 1);
}
