//! Throughput counter and background lifecycle tests.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use qgate_gateway::dispatch::ThroughputCounter;
use qgate_gateway::lifecycle::{spawn_periodic, BackgroundTasks, Shutdown};

#[test]
fn report_reads_and_resets_nonzero_counters() {
    let c = ThroughputCounter::new();
    c.inc("orders");
    c.inc("orders");
    c.inc("echo");

    assert_eq!(c.report(), vec![("echo".to_string(), 1), ("orders".to_string(), 2)]);

    // reset in place, so an idle interval reports nothing
    assert_eq!(c.get("orders"), 0);
    assert!(c.report().is_empty());

    c.inc("orders");
    assert_eq!(c.take_all(), vec![("orders".to_string(), 1)]);
}

#[test]
fn concurrent_increments_are_not_lost() {
    let c = Arc::new(ThroughputCounter::new());
    let reported = Arc::new(AtomicUsize::new(0));

    let writers: Vec<_> = (0..8)
        .map(|_| {
            let c = Arc::clone(&c);
            std::thread::spawn(move || {
                for _ in 0..1000 {
                    c.inc("svc");
                }
            })
        })
        .collect();
    let reporter = {
        let c = Arc::clone(&c);
        let reported = Arc::clone(&reported);
        std::thread::spawn(move || {
            for _ in 0..50 {
                for (_, n) in c.take_all() {
                    reported.fetch_add(n as usize, Ordering::Relaxed);
                }
            }
        })
    };
    for w in writers {
        w.join().unwrap();
    }
    reporter.join().unwrap();

    let rest: u64 = c.take_all().into_iter().map(|(_, n)| n).sum();
    assert_eq!(reported.load(Ordering::Relaxed) + rest as usize, 8000);
}

#[tokio::test]
async fn periodic_task_ticks_until_shutdown() {
    let shutdown = Shutdown::new();
    let ticks = Arc::new(AtomicUsize::new(0));
    let handle = {
        let ticks = Arc::clone(&ticks);
        spawn_periodic("test", Duration::from_millis(10), shutdown.signal(), move || {
            ticks.fetch_add(1, Ordering::Relaxed);
            async {}
        })
    };

    tokio::time::sleep(Duration::from_millis(55)).await;
    shutdown.trigger();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("task stops promptly")
        .unwrap();

    let seen = ticks.load(Ordering::Relaxed);
    assert!(seen >= 2, "ticked {seen} times");

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(ticks.load(Ordering::Relaxed), seen);
}

#[tokio::test]
async fn background_tasks_stop_joins_everything() {
    let mut tasks = BackgroundTasks::new(Shutdown::new());
    for _ in 0..3 {
        let mut signal = tasks.signal();
        tasks.push("waiter", tokio::spawn(async move { signal.wait().await }));
    }
    assert_eq!(tasks.len(), 3);

    tokio::time::timeout(Duration::from_secs(1), tasks.stop())
        .await
        .expect("all tasks observe shutdown");
}

#[tokio::test]
async fn late_subscribers_see_a_triggered_shutdown() {
    let shutdown = Shutdown::new();
    shutdown.trigger();
    let mut signal = shutdown.signal();
    assert!(signal.is_triggered());
    tokio::time::timeout(Duration::from_millis(100), signal.wait())
        .await
        .expect("already triggered");
}
