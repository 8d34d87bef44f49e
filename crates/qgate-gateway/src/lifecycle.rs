//! Background task lifecycle.
//!
//! Every long-lived loop (permission refresh, policy persister, worker loops,
//! throughput reporting, store sweeping) takes a [`ShutdownSignal`] and is
//! collected into [`BackgroundTasks`], which stops and joins them.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Owner side of the shutdown signal.
#[derive(Debug)]
pub struct Shutdown {
    tx: watch::Sender<bool>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

/// Listener side; cheap to clone into each task.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown is triggered or the owner is gone.
    pub async fn wait(&mut self) {
        while !*self.rx.borrow_and_update() {
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Run `tick` every `every` until shutdown. The first tick fires immediately;
/// a slow tick delays the next one instead of bursting.
pub fn spawn_periodic<F, Fut>(
    name: &'static str,
    every: Duration,
    mut shutdown: ShutdownSignal,
    mut tick: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                _ = interval.tick() => tick().await,
            }
        }
        tracing::debug!(task = name, "periodic task stopped");
    })
}

/// Handles of every spawned background task plus the signal that stops them.
pub struct BackgroundTasks {
    shutdown: Shutdown,
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl BackgroundTasks {
    pub fn new(shutdown: Shutdown) -> Self {
        Self {
            shutdown,
            handles: Vec::new(),
        }
    }

    pub fn signal(&self) -> ShutdownSignal {
        self.shutdown.signal()
    }

    pub fn push(&mut self, name: &'static str, handle: JoinHandle<()>) {
        self.handles.push((name, handle));
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Trigger shutdown and wait for every task to finish.
    pub async fn stop(self) {
        self.shutdown.trigger();
        let (names, handles): (Vec<_>, Vec<_>) = self.handles.into_iter().unzip();
        let results = futures_util::future::join_all(handles).await;
        for (name, res) in names.into_iter().zip(results) {
            if let Err(e) = res {
                tracing::warn!(task = name, error = %e, "background task ended abnormally");
            }
        }
        tracing::info!("background tasks stopped");
    }
}
