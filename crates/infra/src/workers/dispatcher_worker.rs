use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::projections::{CycleReport, DispatchError, JournalDispatcher};
use crate::supervision::{Directive, Supervisor};

/// Counters accumulated by a running dispatcher worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub cycles: u64,
    pub entries_read: u64,
    pub dispatched: u64,
    pub unrouted: u64,
    pub failures: u64,
    pub redispatched: u64,
}

impl DispatchStats {
    fn record(&mut self, report: &CycleReport) {
        self.cycles += 1;
        self.entries_read += report.read as u64;
        self.dispatched += report.dispatched as u64;
        self.unrouted += report.unrouted as u64;
    }
}

type SharedStats = Arc<Mutex<DispatchStats>>;

fn update_stats(stats: &SharedStats, f: impl FnOnce(&mut DispatchStats)) {
    f(&mut stats.lock().unwrap_or_else(PoisonError::into_inner));
}

/// Handle to control and stop a background dispatcher worker.
///
/// Dropping the handle also stops the worker (at its next wake-up).
#[derive(Debug)]
pub struct DispatcherHandle {
    name: String,
    shutdown: watch::Sender<bool>,
    paused: Arc<AtomicBool>,
    stats: SharedStats,
    join: Option<JoinHandle<()>>,
}

impl DispatcherHandle {
    /// Skip cycles until `resume`; an in-flight cycle completes.
    pub fn pause(&self) {
        if !self.paused.swap(true, Ordering::SeqCst) {
            info!(dispatcher = %self.name, "dispatcher paused");
        }
    }

    pub fn resume(&self) {
        if self.paused.swap(false, Ordering::SeqCst) {
            info!(dispatcher = %self.name, "dispatcher resumed");
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> DispatchStats {
        *self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// True once the worker loop has exited (stopped or a `Stop` directive).
    pub fn is_finished(&self) -> bool {
        self.join.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Request graceful shutdown and wait for the worker to stop.
    pub async fn stop(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(join) = self.join.take() {
            let _ = join.await;
        }
    }
}

/// Hosts a [`JournalDispatcher`] on a tokio task.
///
/// - runs one dispatch cycle per `interval` tick unless paused
/// - hands every failure to the [`Supervisor`] and applies its directive
/// - optionally redispatches unconfirmed projectables every
///   `confirmation_check_interval`
#[derive(Debug)]
pub struct DispatcherWorker;

impl DispatcherWorker {
    /// Spawn the worker on the current tokio runtime.
    pub fn spawn(
        dispatcher: Arc<JournalDispatcher>,
        supervisor: Arc<dyn Supervisor>,
    ) -> DispatcherHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let paused = Arc::new(AtomicBool::new(false));
        let stats = SharedStats::default();
        let name = dispatcher.name().to_string();

        let worker = Worker {
            dispatcher,
            supervisor,
            paused: paused.clone(),
            stats: stats.clone(),
            retry: None,
        };
        let join = tokio::spawn(worker.run(shutdown_rx));

        DispatcherHandle {
            name,
            shutdown: shutdown_tx,
            paused,
            stats,
            join: Some(join),
        }
    }
}

/// A failed entry waiting to be dispatched again.
#[derive(Debug, Clone, Copy)]
struct PendingRetry {
    position: Option<u64>,
    attempt: u32,
    not_before: Instant,
}

enum Flow {
    Continue,
    Stop,
}

struct Worker {
    dispatcher: Arc<JournalDispatcher>,
    supervisor: Arc<dyn Supervisor>,
    paused: Arc<AtomicBool>,
    stats: SharedStats,
    retry: Option<PendingRetry>,
}

fn interval(period: Duration) -> Interval {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

impl Worker {
    fn name(&self) -> &str {
        self.dispatcher.name()
    }

    async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let config = self.dispatcher.config().clone();
        info!(
            dispatcher = %config.name,
            position = self.dispatcher.position(),
            interval_ms = config.interval.as_millis() as u64,
            batch_size = config.batch_size,
            "dispatcher worker started"
        );

        let mut cycle = interval(config.interval);
        let mut recheck = config.confirmation_check_interval.map(interval);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = cycle.tick() => {
                    if let Flow::Stop = self.cycle().await {
                        break;
                    }
                }
                _ = tick(&mut recheck) => {
                    if let Flow::Stop = self.redispatch_unconfirmed().await {
                        break;
                    }
                }
            }
        }

        info!(
            dispatcher = %config.name,
            position = self.dispatcher.position(),
            "dispatcher worker stopped"
        );
    }

    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    async fn cycle(&mut self) -> Flow {
        if self.is_paused() {
            return Flow::Continue;
        }
        if self.retry.is_some_and(|r| Instant::now() < r.not_before) {
            return Flow::Continue;
        }

        match self.dispatcher.dispatch_next_batch().await {
            Ok(report) => {
                self.retry = None;
                update_stats(&self.stats, |s| s.record(&report));
                if !report.is_idle() {
                    debug!(
                        dispatcher = %self.name(),
                        read = report.read,
                        dispatched = report.dispatched,
                        unrouted = report.unrouted,
                        "dispatch cycle"
                    );
                }
                Flow::Continue
            }
            Err(err) => self.supervise(err).await,
        }
    }

    async fn redispatch_unconfirmed(&mut self) -> Flow {
        if self.is_paused() {
            return Flow::Continue;
        }

        match self.dispatcher.redispatch_unconfirmed().await {
            Ok(count) => {
                if count > 0 {
                    update_stats(&self.stats, |s| s.redispatched += count as u64);
                }
                Flow::Continue
            }
            // The projectable stays pending, so only restart and stop apply here.
            Err(err) => {
                update_stats(&self.stats, |s| s.failures += 1);
                let directive = self.supervisor.decide(&err, 1);
                warn!(
                    dispatcher = %self.name(),
                    error = %err,
                    ?directive,
                    "redispatch failed"
                );
                match directive {
                    Directive::Restart => {
                        self.reset(&err).await;
                        Flow::Continue
                    }
                    Directive::Stop => {
                        error!(dispatcher = %self.name(), error = %err, "dispatcher stopped by supervisor");
                        Flow::Stop
                    }
                    Directive::Resume | Directive::RetryAfter(_) => Flow::Continue,
                }
            }
        }
    }

    async fn supervise(&mut self, err: DispatchError) -> Flow {
        update_stats(&self.stats, |s| s.failures += 1);

        let position = err.global_position();
        let attempt = match self.retry {
            Some(retry) if retry.position == position => retry.attempt.saturating_add(1),
            _ => 1,
        };
        let directive = self.supervisor.decide(&err, attempt);
        warn!(
            dispatcher = %self.name(),
            error = %err,
            kind = ?err.kind(),
            global_position = ?position,
            attempt,
            ?directive,
            "projection failure handed to supervisor"
        );

        // Without a position the reader already sits at the failed entry.
        let reader = self.dispatcher.reader();
        match directive {
            Directive::Resume => {
                self.retry = None;
                if let Some(p) = position {
                    reader.seek(p + 1);
                }
                Flow::Continue
            }
            Directive::Restart => {
                self.retry = None;
                self.reset(&err).await;
                if let Some(p) = position {
                    reader.seek(p + 1);
                }
                Flow::Continue
            }
            Directive::RetryAfter(delay) => {
                if let Some(p) = position {
                    reader.seek(p);
                }
                self.retry = Some(PendingRetry {
                    position,
                    attempt,
                    not_before: Instant::now() + delay,
                });
                Flow::Continue
            }
            Directive::Stop => {
                if let Some(p) = position {
                    reader.seek(p);
                }
                error!(
                    dispatcher = %self.name(),
                    error = %err,
                    global_position = ?position,
                    "dispatcher stopped by supervisor"
                );
                Flow::Stop
            }
        }
    }

    async fn reset(&self, err: &DispatchError) {
        let Some(projection) = err.projection() else {
            return;
        };
        if let Err(reset_err) = self.dispatcher.reset_projection(projection).await {
            error!(
                dispatcher = %self.name(),
                projection,
                error = %reset_err,
                "projection reset failed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DispatcherConfig;
    use crate::journal::{InMemoryJournal, Journal};
    use crate::projections::{
        InMemoryConfirmer, Projection, ProjectionControl, ProjectionError, ProjectionRouter,
    };
    use crate::supervision::DecisionTable;
    use async_trait::async_trait;
    use chronicle_core::{ExpectedVersion, StreamId};
    use chronicle_events::{Metadata, NewEntry, Projectable};
    use serde_json::json;

    /// Confirms everything, fails with `Misuse`-class errors on "Poison".
    #[derive(Default)]
    struct Counting {
        seen: Mutex<Vec<String>>,
    }

    impl Counting {
        fn seen(&self) -> Vec<String> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Projection for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        async fn project_with(
            &self,
            projectable: &Projectable,
            control: &ProjectionControl,
        ) -> Result<(), ProjectionError> {
            if projectable.because_of().iter().any(|r| r == "Poison") {
                return Err(ProjectionError::Journal(
                    chronicle_core::JournalError::invalid_argument("poison"),
                ));
            }
            self.seen
                .lock()
                .unwrap()
                .push(projectable.because_of()[0].clone());
            control.confirm_projected(projectable);
            Ok(())
        }
    }

    async fn append(journal: &InMemoryJournal, entry_type: &str) {
        journal
            .append(
                &StreamId::new("s"),
                ExpectedVersion::Any,
                NewEntry::new(entry_type, 1, json!({})),
                Metadata::none(),
            )
            .await
            .unwrap();
    }

    async fn eventually(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached within 2s");
    }

    async fn setup() -> (InMemoryJournal, Arc<Counting>, Arc<JournalDispatcher>) {
        let journal = InMemoryJournal::new();
        let projection = Arc::new(Counting::default());
        let router = Arc::new(ProjectionRouter::new());
        router.register_projection(projection.clone(), ["*"], "all").unwrap();
        let config = DispatcherConfig::new("worker-test").with_interval(Duration::from_millis(5));
        let dispatcher = JournalDispatcher::for_journal(
            &journal,
            router,
            Arc::new(InMemoryConfirmer::new()),
            config,
        )
        .await
        .unwrap();
        (journal, projection, Arc::new(dispatcher))
    }

    #[tokio::test]
    async fn dispatches_new_entries_until_stopped() {
        let (journal, projection, dispatcher) = setup().await;
        let handle = DispatcherWorker::spawn(dispatcher.clone(), Arc::new(DecisionTable::default()));

        append(&journal, "A").await;
        append(&journal, "B").await;
        eventually(|| projection.seen().len() == 2).await;

        let stats = handle.stats();
        assert_eq!(stats.entries_read, 2);
        assert_eq!(stats.dispatched, 2);
        assert_eq!(stats.failures, 0);

        handle.stop().await;
        assert_eq!(dispatcher.position(), 2);
    }

    #[tokio::test]
    async fn paused_worker_skips_cycles() {
        let (journal, projection, dispatcher) = setup().await;
        let handle = DispatcherWorker::spawn(dispatcher, Arc::new(DecisionTable::default()));

        handle.pause();
        assert!(handle.is_paused());
        // Let any cycle that started before the pause finish.
        tokio::time::sleep(Duration::from_millis(20)).await;

        append(&journal, "A").await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(projection.seen().is_empty());

        handle.resume();
        eventually(|| projection.seen() == vec!["A".to_string()]).await;
        handle.stop().await;
    }

    #[tokio::test]
    async fn stop_directive_leaves_cursor_at_failed_entry() {
        let (journal, projection, dispatcher) = setup().await;
        append(&journal, "A").await;
        append(&journal, "Poison").await;
        append(&journal, "B").await;

        let handle = DispatcherWorker::spawn(dispatcher.clone(), Arc::new(DecisionTable::default()));
        eventually(|| handle.is_finished()).await;

        assert_eq!(projection.seen(), vec!["A".to_string()]);
        assert_eq!(handle.stats().failures, 1);
        assert_eq!(dispatcher.position(), 1);
    }

    #[tokio::test]
    async fn dropping_the_handle_stops_the_worker() {
        let (journal, projection, dispatcher) = setup().await;
        let handle = DispatcherWorker::spawn(dispatcher, Arc::new(DecisionTable::default()));
        drop(handle);

        tokio::time::sleep(Duration::from_millis(30)).await;
        append(&journal, "A").await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(projection.seen().is_empty());
    }
}
