//! Integration tests for the full pipeline.
//!
//! Tests: typed event → EntryAdapterRegistry → Journal → JournalReader →
//! JournalDispatcher → ProjectionRouter → Projection → Confirmer
//!
//! Verifies:
//! - Optimistic concurrency and lifecycle outcomes end to end
//! - Projections see entries in global order and confirm them
//! - Supervision directives (resume, retry, restart, stop) keep the pipeline moving
//! - Unconfirmed projectables are redispatched

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};

    use chronicle_core::{ExpectedVersion, JournalError, StreamId};
    use chronicle_events::{EntryAdapterRegistry, Event, Metadata, Projectable};

    use crate::config::DispatcherConfig;
    use crate::journal::{InMemoryJournal, Journal, JournalReader, StreamReader};
    use crate::projections::{
        Confirmer, InMemoryConfirmer, JournalDispatcher, Projection, ProjectionControl,
        ProjectionError, ProjectionRouter,
    };
    use crate::supervision::{DecisionTable, RetryPolicy};
    use crate::workers::{DispatcherHandle, DispatcherWorker};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct AccountOpened {
        owner: String,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct FundsDeposited {
        amount: i64,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct FundsWithdrawn {
        amount: i64,
    }

    #[derive(Debug, Clone, PartialEq, Serialize)]
    #[serde(untagged)]
    enum AccountEvent {
        Opened(AccountOpened),
        Deposited(FundsDeposited),
        Withdrawn(FundsWithdrawn),
    }

    impl From<AccountOpened> for AccountEvent {
        fn from(value: AccountOpened) -> Self {
            AccountEvent::Opened(value)
        }
    }

    impl From<FundsDeposited> for AccountEvent {
        fn from(value: FundsDeposited) -> Self {
            AccountEvent::Deposited(value)
        }
    }

    impl From<FundsWithdrawn> for AccountEvent {
        fn from(value: FundsWithdrawn) -> Self {
            AccountEvent::Withdrawn(value)
        }
    }

    impl Event for AccountEvent {
        fn event_type(&self) -> &'static str {
            match self {
                AccountEvent::Opened(_) => "AccountOpened",
                AccountEvent::Deposited(_) => "FundsDeposited",
                AccountEvent::Withdrawn(_) => "FundsWithdrawn",
            }
        }

        fn version(&self) -> u32 {
            1
        }
    }

    fn registry() -> EntryAdapterRegistry<AccountEvent> {
        let mut registry = EntryAdapterRegistry::new();
        registry
            .register_serde::<AccountOpened>("AccountOpened", 1)
            .register_serde::<FundsDeposited>("FundsDeposited", 1)
            .register_serde::<FundsWithdrawn>("FundsWithdrawn", 1);
        registry
    }

    fn deposit(amount: i64) -> AccountEvent {
        AccountEvent::Deposited(FundsDeposited { amount })
    }

    fn withdraw(amount: i64) -> AccountEvent {
        AccountEvent::Withdrawn(FundsWithdrawn { amount })
    }

    fn opened(owner: &str) -> AccountEvent {
        AccountEvent::Opened(AccountOpened {
            owner: owner.to_string(),
        })
    }

    /// Balance per account. Rejects overdrafts as a business error.
    struct Balances {
        registry: EntryAdapterRegistry<AccountEvent>,
        balances: Mutex<HashMap<String, i64>>,
    }

    impl Balances {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                registry: registry(),
                balances: Mutex::new(HashMap::new()),
            })
        }

        fn balance(&self, account: &str) -> Option<i64> {
            self.balances.lock().unwrap().get(account).copied()
        }
    }

    #[async_trait]
    impl Projection for Balances {
        fn name(&self) -> &str {
            "balances"
        }

        async fn project_with(
            &self,
            projectable: &Projectable,
            control: &ProjectionControl,
        ) -> Result<(), ProjectionError> {
            for entry in projectable.entries() {
                let event = self.registry.from_entry(entry)?;
                let mut balances = self.balances.lock().unwrap();
                let balance = balances.entry(entry.stream_id.to_string()).or_insert(0);
                match event {
                    AccountEvent::Opened(_) => {}
                    AccountEvent::Deposited(e) => *balance += e.amount,
                    AccountEvent::Withdrawn(e) if e.amount > *balance => {
                        return Err(ProjectionError::Business(format!(
                            "overdraft on {}",
                            entry.stream_id
                        )));
                    }
                    AccountEvent::Withdrawn(e) => *balance -= e.amount,
                }
            }
            control.confirm_projected(projectable);
            Ok(())
        }

        async fn reset(&self) -> Result<(), ProjectionError> {
            self.balances.lock().unwrap().clear();
            Ok(())
        }
    }

    /// Fails each projectable `failures` times with the given error before accepting it.
    struct Flaky {
        failures: u32,
        error: ProjectionError,
        attempts: AtomicU32,
        accepted: AtomicU32,
        resets: AtomicU32,
    }

    impl Flaky {
        fn new(failures: u32, error: ProjectionError) -> Arc<Self> {
            Arc::new(Self {
                failures,
                error,
                attempts: AtomicU32::new(0),
                accepted: AtomicU32::new(0),
                resets: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl Projection for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn project_with(
            &self,
            projectable: &Projectable,
            control: &ProjectionControl,
        ) -> Result<(), ProjectionError> {
            if self.attempts.fetch_add(1, Ordering::SeqCst) < self.failures {
                return Err(self.error.clone());
            }
            self.accepted.fetch_add(1, Ordering::SeqCst);
            control.confirm_projected(projectable);
            Ok(())
        }

        async fn reset(&self) -> Result<(), ProjectionError> {
            self.resets.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Never confirms.
    #[derive(Default)]
    struct Forgetful {
        calls: AtomicU32,
    }

    #[async_trait]
    impl Projection for Forgetful {
        fn name(&self) -> &str {
            "forgetful"
        }

        async fn project_with(
            &self,
            _projectable: &Projectable,
            _control: &ProjectionControl,
        ) -> Result<(), ProjectionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    async fn append(journal: &InMemoryJournal, account: &str, event: &AccountEvent) {
        let entry = registry().to_entry(event).unwrap();
        journal
            .append(&StreamId::new(account), ExpectedVersion::Any, entry, Metadata::none())
            .await
            .unwrap();
    }

    async fn eventually(mut check: impl FnMut() -> bool) {
        for _ in 0..300 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached within 3s");
    }

    fn fast_config(name: &str) -> DispatcherConfig {
        DispatcherConfig::new(name).with_interval(Duration::from_millis(5))
    }

    async fn start(
        journal: &InMemoryJournal,
        projection: Arc<dyn Projection>,
        config: DispatcherConfig,
        table: DecisionTable,
    ) -> (DispatcherHandle, Arc<JournalDispatcher>, Arc<InMemoryConfirmer>) {
        let router = Arc::new(ProjectionRouter::new());
        router.register_projection(projection, ["*"], "all entries").unwrap();
        let confirmer = Arc::new(InMemoryConfirmer::new());
        let dispatcher = Arc::new(
            JournalDispatcher::for_journal(journal, router, confirmer.clone(), config)
                .await
                .unwrap(),
        );
        let handle = DispatcherWorker::spawn(dispatcher.clone(), Arc::new(table));
        (handle, dispatcher, confirmer)
    }

    #[tokio::test]
    async fn account_lifecycle_end_to_end() {
        chronicle_observability::init_for_tests();

        let journal = InMemoryJournal::new();
        let registry = registry();
        let acc = StreamId::new("acc-1");

        let first = journal
            .append(
                &acc,
                ExpectedVersion::Exact(1),
                registry.to_entry(&opened("alice")).unwrap(),
                Metadata::none(),
            )
            .await
            .unwrap();
        assert_eq!(first.last_version(), Some(1));

        let deposited = journal
            .append(
                &acc,
                ExpectedVersion::Exact(2),
                registry.to_entry(&deposit(100)).unwrap(),
                Metadata::none(),
            )
            .await
            .unwrap();
        assert_eq!(deposited.last_version(), Some(2));

        let err = journal
            .append(
                &acc,
                ExpectedVersion::Exact(5),
                registry.to_entry(&deposit(1)).unwrap(),
                Metadata::none(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, JournalError::ConcurrencyViolation { actual: 2, .. }));
        assert_eq!(journal.stream_info(&acc).await.unwrap().current_version, 2);

        journal.tombstone(&acc).await.unwrap();
        let err = journal
            .append(
                &acc,
                ExpectedVersion::Any,
                registry.to_entry(&deposit(1)).unwrap(),
                Metadata::none(),
            )
            .await
            .unwrap_err();
        assert_eq!(err, JournalError::StreamDeleted(acc.clone()));

        // Per-stream reads hide the tombstoned stream; the global log keeps it.
        let stream = journal
            .stream_reader("audit")
            .await
            .unwrap()
            .stream_for(&acc)
            .await
            .unwrap();
        assert!(stream.is_tombstoned);
        assert!(stream.entries.is_empty());

        let global = journal
            .journal_reader("audit")
            .await
            .unwrap()
            .read_next(10)
            .await
            .unwrap();
        let decoded: Vec<AccountEvent> = global
            .iter()
            .map(|e| registry.from_entry(e).unwrap())
            .collect();
        assert_eq!(decoded, vec![opened("alice"), deposit(100)]);
    }

    #[tokio::test]
    async fn worker_projects_interleaved_streams_in_global_order() {
        chronicle_observability::init_for_tests();

        let journal = InMemoryJournal::new();
        let balances = Balances::new();
        let (handle, dispatcher, confirmer) = start(
            &journal,
            balances.clone(),
            fast_config("balances"),
            DecisionTable::default(),
        )
        .await;

        append(&journal, "acc-1", &opened("alice")).await;
        append(&journal, "acc-2", &opened("bob")).await;
        append(&journal, "acc-1", &deposit(100)).await;
        append(&journal, "acc-2", &deposit(50)).await;
        append(&journal, "acc-1", &withdraw(30)).await;

        eventually(|| dispatcher.position() == 5 && confirmer.confirmed_count() == 5).await;

        assert_eq!(balances.balance("acc-1"), Some(70));
        assert_eq!(balances.balance("acc-2"), Some(50));
        assert_eq!(confirmer.pending_count(), 0);
        assert!(dispatcher.check_unconfirmed().is_empty());

        let stats = handle.stats();
        assert_eq!(stats.entries_read, 5);
        assert_eq!(stats.dispatched, 5);
        assert_eq!(stats.failures, 0);
        handle.stop().await;
    }

    #[tokio::test]
    async fn business_failure_is_skipped_and_stays_unconfirmed() {
        chronicle_observability::init_for_tests();

        let journal = InMemoryJournal::new();
        let balances = Balances::new();
        append(&journal, "acc-1", &deposit(10)).await;
        append(&journal, "acc-1", &withdraw(500)).await;
        append(&journal, "acc-1", &deposit(5)).await;

        let (handle, dispatcher, confirmer) = start(
            &journal,
            balances.clone(),
            fast_config("overdraft"),
            DecisionTable::default(),
        )
        .await;

        eventually(|| dispatcher.position() == 3 && balances.balance("acc-1") == Some(15)).await;

        assert_eq!(handle.stats().failures, 1);
        assert_eq!(confirmer.confirmed_count(), 2);
        assert_eq!(confirmer.pending_count(), 1);
        handle.stop().await;
    }

    #[tokio::test]
    async fn transient_failure_is_retried_with_backoff() {
        chronicle_observability::init_for_tests();

        let journal = InMemoryJournal::new();
        let flaky = Flaky::new(2, ProjectionError::Storage("connection reset".into()));
        append(&journal, "acc-1", &deposit(1)).await;

        let table = DecisionTable::default()
            .with_retry_policy(RetryPolicy::fixed(5, Duration::from_millis(10)));
        let (handle, dispatcher, confirmer) =
            start(&journal, flaky.clone(), fast_config("retry"), table).await;

        eventually(|| flaky.accepted.load(Ordering::SeqCst) == 1).await;

        assert_eq!(flaky.attempts.load(Ordering::SeqCst), 3);
        assert_eq!(handle.stats().failures, 2);
        assert_eq!(dispatcher.position(), 1);
        assert_eq!(confirmer.pending_count(), 0);
        handle.stop().await;
    }

    #[tokio::test]
    async fn exhausted_retries_move_on() {
        chronicle_observability::init_for_tests();

        let journal = InMemoryJournal::new();
        let flaky = Flaky::new(u32::MAX, ProjectionError::Storage("down".into()));
        append(&journal, "acc-1", &deposit(1)).await;

        let table = DecisionTable::default()
            .with_retry_policy(RetryPolicy::fixed(2, Duration::from_millis(5)));
        let (handle, dispatcher, _) =
            start(&journal, flaky.clone(), fast_config("exhaust"), table).await;

        // Two retries, then the third failure resumes past the entry.
        eventually(|| dispatcher.position() == 1 && handle.stats().failures == 3).await;
        assert_eq!(flaky.attempts.load(Ordering::SeqCst), 3);
        handle.stop().await;
    }

    #[tokio::test]
    async fn corruption_restarts_the_projection() {
        chronicle_observability::init_for_tests();

        let journal = InMemoryJournal::new();
        let flaky = Flaky::new(1, ProjectionError::Corruption("checksum mismatch".into()));
        append(&journal, "acc-1", &deposit(1)).await;
        append(&journal, "acc-1", &deposit(2)).await;

        let (handle, dispatcher, _) = start(
            &journal,
            flaky.clone(),
            fast_config("restart"),
            DecisionTable::default(),
        )
        .await;

        eventually(|| dispatcher.position() == 2 && flaky.accepted.load(Ordering::SeqCst) == 1)
            .await;
        assert_eq!(flaky.resets.load(Ordering::SeqCst), 1);
        handle.stop().await;
    }

    #[tokio::test]
    async fn worker_redispatches_unconfirmed_projectables() {
        chronicle_observability::init_for_tests();

        let journal = InMemoryJournal::new();
        let forgetful = Arc::new(Forgetful::default());
        append(&journal, "acc-1", &deposit(1)).await;

        let config = fast_config("redispatch")
            .with_confirmation_timeout(Duration::ZERO)
            .with_confirmation_check_interval(Duration::from_millis(10));
        let (handle, _, confirmer) =
            start(&journal, forgetful.clone(), config, DecisionTable::default()).await;

        eventually(|| forgetful.calls.load(Ordering::SeqCst) >= 3).await;

        assert!(handle.stats().redispatched >= 1);
        assert_eq!(handle.stats().dispatched, 1);
        assert_eq!(confirmer.pending_count(), 1);
        handle.stop().await;
    }

    #[tokio::test]
    async fn stopped_dispatcher_resumes_from_its_cursor() {
        chronicle_observability::init_for_tests();

        let journal = InMemoryJournal::new();
        let balances = Balances::new();
        append(&journal, "acc-1", &deposit(10)).await;

        let (handle, dispatcher, _) = start(
            &journal,
            balances.clone(),
            fast_config("durable-cursor"),
            DecisionTable::default(),
        )
        .await;
        eventually(|| dispatcher.position() == 1).await;
        handle.stop().await;

        append(&journal, "acc-1", &deposit(5)).await;
        let (handle, dispatcher, _) = start(
            &journal,
            balances.clone(),
            fast_config("durable-cursor"),
            DecisionTable::default(),
        )
        .await;

        eventually(|| dispatcher.position() == 2).await;
        assert_eq!(balances.balance("acc-1"), Some(15));
        assert_eq!(handle.stats().entries_read, 1);
        handle.stop().await;
    }
}
