//! Action dispatcher: serializes actions through one rate-limited worker.
//!
//! Each worker generation runs:
//! `Idle → Draining → Executing → WaitingRateLimit → Draining …`
//! and ends in `Cancelled` when `restart()` or `shutdown()` tears it down.
//! The mailbox outlives generations, so an action pending at restart time is
//! the first thing the next worker executes.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::FutureExt;
use serde::Serialize;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::action::Action;
use super::executor::Executor;
use super::mailbox::Mailbox;
use crate::config::ConfigStore;

/// Where the current worker is in its loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    /// Mailbox empty, waiting for an action.
    Idle,
    /// Woken up, acquiring the execution section.
    Draining,
    /// Inside `Executor::execute`.
    Executing,
    /// Sleeping out `message_send_rate` after an execution.
    WaitingRateLimit,
    /// No worker running (before start, after shutdown, or between generations).
    Cancelled,
}

/// Point-in-time dispatcher counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchStats {
    pub generation: u64,
    pub state: WorkerState,
    pub executed: u64,
    pub failed: u64,
    /// Actions overwritten in the mailbox before a worker took them.
    pub superseded: u64,
    pub pending: bool,
}

#[derive(Debug, Default)]
struct Counters {
    executed: AtomicU64,
    failed: AtomicU64,
    superseded: AtomicU64,
}

/// State shared between the dispatcher handle and its worker task.
struct Shared {
    mailbox: Mailbox,
    executor: Arc<dyn Executor>,
    /// Held around execute + rate-limit delay.
    exec_lock: Mutex<()>,
    state: watch::Sender<WorkerState>,
    counters: Counters,
    /// Incremented once per worker launch; read without the restart lock.
    generation: AtomicU64,
}

impl Shared {
    fn set_state(&self, state: WorkerState) {
        self.state.send_replace(state);
    }
}

struct WorkerHandle {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

type WorkerSlot = Arc<Mutex<Option<WorkerHandle>>>;

/// Owned dispatch service. Construct once and share via `Arc`.
pub struct Dispatcher {
    shared: Arc<Shared>,
    config: Arc<dyn ConfigStore>,
    /// Owning the handle behind an async lock serializes restart/shutdown.
    worker: WorkerSlot,
}

impl Dispatcher {
    /// Create a dispatcher without starting a worker. Call [`restart`](Self::restart) to start.
    pub fn new(executor: Arc<dyn Executor>, config: Arc<dyn ConfigStore>) -> Arc<Self> {
        let (state, _) = watch::channel(WorkerState::Cancelled);
        Arc::new(Self {
            shared: Arc::new(Shared {
                mailbox: Mailbox::new(),
                executor,
                exec_lock: Mutex::new(()),
                state,
                counters: Counters::default(),
                generation: AtomicU64::new(0),
            }),
            config,
            worker: Arc::new(Mutex::new(None)),
        })
    }

    /// Create a dispatcher and start its first worker.
    pub async fn start(executor: Arc<dyn Executor>, config: Arc<dyn ConfigStore>) -> Arc<Self> {
        let dispatcher = Self::new(executor, config);
        dispatcher.restart().await;
        dispatcher
    }

    /// Hand an action to the worker. Never blocks.
    ///
    /// Most-recent-wins: if an earlier action is still waiting in the mailbox it
    /// is discarded and only `action` will be executed.
    pub fn enqueue(&self, action: Action) {
        let kind = action.kind();
        let chat_id = action.chat_id();
        if let Some(previous) = self.shared.mailbox.put(action) {
            self.shared
                .counters
                .superseded
                .fetch_add(1, Ordering::Relaxed);
            debug!(
                superseded = previous.kind(),
                superseded_chat_id = previous.chat_id(),
                "Pending action replaced before dispatch"
            );
        }
        debug!(kind, chat_id, "Action enqueued");
    }

    /// Cancel the running worker, wait for it to exit, then start a fresh one
    /// with the current `message_send_rate`.
    ///
    /// An in-flight `execute` call is allowed to finish; cancellation takes
    /// effect at the mailbox wait and the rate-limit delay.
    pub async fn restart(&self) {
        if let Err(e) = self.request_restart().await {
            error!(error = %e, "Dispatcher restart task failed");
        }
    }

    /// Run the stop-and-relaunch sequence of [`restart`](Self::restart) in its
    /// own task and return its handle.
    ///
    /// The sequence completes even when the handle is dropped or the awaiting
    /// caller is cancelled, so the dispatcher is never left without a worker.
    pub fn request_restart(&self) -> JoinHandle<()> {
        let shared = Arc::clone(&self.shared);
        let config = Arc::clone(&self.config);
        let worker = Arc::clone(&self.worker);
        tokio::spawn(async move {
            let mut slot = worker.lock().await;
            stop_worker(&shared, &mut slot).await;

            let interval = config.get().await.message_send_interval();
            let generation = shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
            let token = CancellationToken::new();
            let handle = tokio::spawn(run_worker(
                Arc::clone(&shared),
                token.clone(),
                generation,
                interval,
            ));
            *slot = Some(WorkerHandle { token, handle });
            info!(
                generation,
                interval_ms = interval.as_millis() as u64,
                "Dispatch worker started"
            );
        })
    }

    /// Stop the worker. Pending actions stay in the mailbox until the next `restart()`.
    pub async fn shutdown(&self) {
        let mut slot = self.worker.lock().await;
        if stop_worker(&self.shared, &mut slot).await {
            info!(
                generation = self.shared.generation.load(Ordering::SeqCst),
                "Dispatcher shut down"
            );
        }
    }

    pub fn state(&self) -> WorkerState {
        *self.shared.state.borrow()
    }

    /// Receiver that observes every state transition.
    pub fn watch_state(&self) -> watch::Receiver<WorkerState> {
        self.shared.state.subscribe()
    }

    /// Lock-free snapshot; never waits on a restart in progress.
    pub fn stats(&self) -> DispatchStats {
        let counters = &self.shared.counters;
        DispatchStats {
            generation: self.shared.generation.load(Ordering::SeqCst),
            state: self.state(),
            executed: counters.executed.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
            superseded: counters.superseded.load(Ordering::Relaxed),
            pending: !self.shared.mailbox.is_empty(),
        }
    }
}

async fn stop_worker(shared: &Shared, slot: &mut Option<WorkerHandle>) -> bool {
    let Some(previous) = slot.take() else {
        return false;
    };
    previous.token.cancel();
    if let Err(e) = previous.handle.await {
        error!(
            generation = shared.generation.load(Ordering::SeqCst),
            error = %e,
            "Dispatch worker ended abnormally"
        );
    }
    true
}

async fn run_worker(
    shared: Arc<Shared>,
    token: CancellationToken,
    generation: u64,
    interval: Duration,
) {
    loop {
        if shared.mailbox.is_empty() {
            shared.set_state(WorkerState::Idle);
        }
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = shared.mailbox.wait() => {}
        }

        shared.set_state(WorkerState::Draining);
        let _guard = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            guard = shared.exec_lock.lock() => guard,
        };

        // Taken only once the section is held, so a cancel before this point
        // leaves the action in the mailbox for the next generation.
        let Some(action) = shared.mailbox.take() else {
            continue;
        };

        shared.set_state(WorkerState::Executing);
        let kind = action.kind();
        let chat_id = action.chat_id();
        match AssertUnwindSafe(shared.executor.execute(action))
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => {
                shared.counters.executed.fetch_add(1, Ordering::Relaxed);
                debug!(generation, kind, chat_id, "Action executed");
            }
            Ok(Err(e)) => {
                shared.counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(generation, kind, chat_id, error = %e, "Action failed");
            }
            Err(_) => {
                shared.counters.failed.fetch_add(1, Ordering::Relaxed);
                error!(generation, kind, chat_id, "Executor panicked");
            }
        }

        shared.set_state(WorkerState::WaitingRateLimit);
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    shared.set_state(WorkerState::Cancelled);
    debug!(generation, "Dispatch worker stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use tokio::sync::{Semaphore, mpsc};
    use tokio::time::{Instant, timeout};

    use super::*;
    use crate::config::{BotSettings, ConfigUpdate, MemoryConfigStore};
    use crate::error::DeliveryError;

    const WAIT: Duration = Duration::from_secs(2);

    /// Records every call; fails texts equal to "fail" and panics on "panic".
    struct FakeExecutor {
        calls: StdMutex<Vec<(Instant, Action)>>,
        tx: mpsc::UnboundedSender<Action>,
        /// When set, each call consumes one permit before returning.
        gate: Option<Arc<Semaphore>>,
    }

    impl FakeExecutor {
        fn new(gate: Option<Arc<Semaphore>>) -> (Arc<Self>, mpsc::UnboundedReceiver<Action>) {
            let (tx, rx) = mpsc::unbounded_channel();
            let exec = Arc::new(Self {
                calls: StdMutex::new(Vec::new()),
                tx,
                gate,
            });
            (exec, rx)
        }

        fn call_times(&self) -> Vec<Instant> {
            self.calls.lock().unwrap().iter().map(|(t, _)| *t).collect()
        }
    }

    #[async_trait]
    impl Executor for FakeExecutor {
        async fn execute(&self, action: Action) -> Result<(), DeliveryError> {
            self.calls
                .lock()
                .unwrap()
                .push((Instant::now(), action.clone()));
            let _ = self.tx.send(action.clone());
            if let Some(gate) = &self.gate {
                gate.acquire().await.unwrap().forget();
            }
            match &action {
                Action::SendText { text, .. } if text == "fail" => Err(DeliveryError::Rejected {
                    kind: "text",
                    chat_id: action.chat_id(),
                    reason: "induced".into(),
                }),
                Action::SendText { text, .. } if text == "panic" => panic!("induced panic"),
                _ => Ok(()),
            }
        }
    }

    fn text(t: &str) -> Action {
        Action::SendText {
            referer: "test".into(),
            chat_id: 42,
            text: t.into(),
        }
    }

    fn config(rate_ms: u64) -> Arc<MemoryConfigStore> {
        Arc::new(MemoryConfigStore::new(BotSettings {
            message_send_rate: rate_ms,
            ..BotSettings::default()
        }))
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<Action>) -> Action {
        timeout(WAIT, rx.recv())
            .await
            .expect("executor was not called in time")
            .expect("executor channel closed")
    }

    async fn wait_for_state(dispatcher: &Dispatcher, want: WorkerState) {
        let mut rx = dispatcher.watch_state();
        timeout(WAIT, rx.wait_for(|s| *s == want))
            .await
            .expect("state not reached in time")
            .unwrap();
    }

    #[tokio::test]
    async fn executes_enqueued_action() {
        let (exec, mut rx) = FakeExecutor::new(None);
        let dispatcher = Dispatcher::start(exec.clone(), config(0)).await;

        dispatcher.enqueue(text("hello"));
        assert_eq!(next(&mut rx).await, text("hello"));

        wait_for_state(&dispatcher, WorkerState::Idle).await;
        let stats = dispatcher.stats();
        assert_eq!(stats.executed, 1);
        assert_eq!(stats.generation, 1);
        assert!(!stats.pending);
    }

    #[tokio::test]
    async fn later_action_overwrites_pending_one() {
        let (exec, mut rx) = FakeExecutor::new(None);
        let dispatcher = Dispatcher::new(exec.clone(), config(0));

        dispatcher.enqueue(text("a"));
        dispatcher.enqueue(text("b"));
        dispatcher.restart().await;

        assert_eq!(next(&mut rx).await, text("b"));
        wait_for_state(&dispatcher, WorkerState::Idle).await;
        assert_eq!(exec.calls.lock().unwrap().len(), 1);
        assert_eq!(dispatcher.stats().superseded, 1);
    }

    #[tokio::test]
    async fn overwrite_while_worker_is_busy() {
        let gate = Arc::new(Semaphore::new(0));
        let (exec, mut rx) = FakeExecutor::new(Some(Arc::clone(&gate)));
        let dispatcher = Dispatcher::start(exec.clone(), config(0)).await;

        dispatcher.enqueue(text("first"));
        assert_eq!(next(&mut rx).await, text("first"));

        // Worker is parked inside execute; these two race for the single slot.
        dispatcher.enqueue(text("a"));
        dispatcher.enqueue(text("b"));
        gate.add_permits(2);

        assert_eq!(next(&mut rx).await, text("b"));
        wait_for_state(&dispatcher, WorkerState::Idle).await;
        let seen: Vec<Action> = exec
            .calls
            .lock()
            .unwrap()
            .iter()
            .map(|(_, a)| a.clone())
            .collect();
        assert_eq!(seen, vec![text("first"), text("b")]);
    }

    #[tokio::test]
    async fn keeps_running_after_failure_and_panic() {
        let (exec, mut rx) = FakeExecutor::new(None);
        let dispatcher = Dispatcher::start(exec.clone(), config(0)).await;

        dispatcher.enqueue(text("fail"));
        next(&mut rx).await;
        wait_for_state(&dispatcher, WorkerState::Idle).await;

        dispatcher.enqueue(text("panic"));
        next(&mut rx).await;
        wait_for_state(&dispatcher, WorkerState::Idle).await;

        dispatcher.enqueue(text("after"));
        assert_eq!(next(&mut rx).await, text("after"));
        wait_for_state(&dispatcher, WorkerState::Idle).await;

        let stats = dispatcher.stats();
        assert_eq!(stats.failed, 2);
        assert_eq!(stats.executed, 1);
        assert_eq!(stats.generation, 1);
    }

    #[tokio::test]
    async fn consecutive_calls_respect_send_rate() {
        let rate = Duration::from_millis(80);
        let (exec, mut rx) = FakeExecutor::new(None);
        let dispatcher = Dispatcher::start(exec.clone(), config(80)).await;

        for i in 0..3 {
            dispatcher.enqueue(text(&format!("m{i}")));
            next(&mut rx).await;
        }

        let times = exec.call_times();
        assert_eq!(times.len(), 3);
        for pair in times.windows(2) {
            assert!(pair[1] - pair[0] >= rate, "gap {:?} < {:?}", pair[1] - pair[0], rate);
        }
    }

    #[tokio::test]
    async fn restart_preserves_pending_action() {
        let (exec, mut rx) = FakeExecutor::new(None);
        // Long interval parks the worker in its rate-limit wait, so the next
        // action is still in the mailbox when we restart.
        let dispatcher = Dispatcher::start(exec.clone(), config(60_000)).await;
        dispatcher.enqueue(text("warmup"));
        next(&mut rx).await;
        wait_for_state(&dispatcher, WorkerState::WaitingRateLimit).await;

        dispatcher.enqueue(text("keep"));
        dispatcher.restart().await;

        assert_eq!(next(&mut rx).await, text("keep"));
        assert_eq!(dispatcher.stats().generation, 2);

        // Exactly once: nothing else arrives.
        assert!(timeout(Duration::from_millis(150), rx.recv()).await.is_err());
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn restart_picks_up_new_send_rate() {
        let store = config(60_000);
        let (exec, mut rx) = FakeExecutor::new(None);
        let dispatcher = Dispatcher::start(exec.clone(), store.clone()).await;

        dispatcher.enqueue(text("one"));
        next(&mut rx).await;
        wait_for_state(&dispatcher, WorkerState::WaitingRateLimit).await;

        store.set(ConfigUpdate::MessageSendRate(0)).await.unwrap();
        dispatcher.restart().await;

        dispatcher.enqueue(text("two"));
        dispatcher_next_within(&mut rx, Duration::from_secs(1)).await;
        dispatcher.enqueue(text("three"));
        dispatcher_next_within(&mut rx, Duration::from_secs(1)).await;
    }

    async fn dispatcher_next_within(rx: &mut mpsc::UnboundedReceiver<Action>, limit: Duration) {
        timeout(limit, rx.recv())
            .await
            .expect("new interval was not applied")
            .unwrap();
    }

    #[tokio::test]
    async fn concurrent_restarts_never_overlap_workers() {
        let (exec, mut rx) = FakeExecutor::new(None);
        let dispatcher = Dispatcher::start(exec.clone(), config(0)).await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let d = Arc::clone(&dispatcher);
            handles.push(tokio::spawn(async move { d.restart().await }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(dispatcher.stats().generation, 9);

        dispatcher.enqueue(text("once"));
        assert_eq!(next(&mut rx).await, text("once"));
        assert!(timeout(Duration::from_millis(150), rx.recv()).await.is_err());
    }

    #[tokio::test]
    async fn abandoned_restart_still_relaunches_worker() {
        let gate = Arc::new(Semaphore::new(0));
        let (exec, mut rx) = FakeExecutor::new(Some(Arc::clone(&gate)));
        let dispatcher = Dispatcher::start(exec.clone(), config(0)).await;

        dispatcher.enqueue(text("busy"));
        assert_eq!(next(&mut rx).await, text("busy"));

        // The restart waits on the in-flight execute; its caller gives up.
        let d = Arc::clone(&dispatcher);
        let caller = tokio::spawn(async move { d.restart().await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        caller.abort();
        let _ = caller.await;

        gate.add_permits(10);
        timeout(WAIT, async {
            while dispatcher.stats().generation < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("restart did not complete");

        dispatcher.enqueue(text("after"));
        assert_eq!(next(&mut rx).await, text("after"));
    }

    #[tokio::test]
    async fn stats_do_not_wait_for_pending_restart() {
        let gate = Arc::new(Semaphore::new(0));
        let (exec, mut rx) = FakeExecutor::new(Some(Arc::clone(&gate)));
        let dispatcher = Dispatcher::start(exec.clone(), config(0)).await;

        dispatcher.enqueue(text("busy"));
        next(&mut rx).await;
        let restart = dispatcher.request_restart();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let stats = dispatcher.stats();
        assert_eq!(stats.generation, 1);
        assert_eq!(stats.state, WorkerState::Executing);
        assert!(!restart.is_finished());

        gate.add_permits(1);
        timeout(WAIT, restart).await.unwrap().unwrap();
        assert_eq!(dispatcher.stats().generation, 2);
    }

    #[tokio::test]
    async fn shutdown_leaves_action_for_next_start() {
        let (exec, mut rx) = FakeExecutor::new(None);
        let dispatcher = Dispatcher::start(exec.clone(), config(0)).await;
        dispatcher.shutdown().await;
        assert_eq!(dispatcher.state(), WorkerState::Cancelled);

        dispatcher.enqueue(text("parked"));
        assert!(timeout(Duration::from_millis(100), rx.recv()).await.is_err());
        assert!(dispatcher.stats().pending);

        dispatcher.restart().await;
        assert_eq!(next(&mut rx).await, text("parked"));
    }
}
