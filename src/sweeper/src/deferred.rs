//! Delayed disposal in response to account-removal notifications.
//!
//! When the bouncer reports that an account was removed, its own teardown of
//! that account is still running. Acting right away risks racing with it, so
//! the disposal is scheduled a settle delay later. The delay is a heuristic,
//! not a guarantee that the bouncer is done.
//!
//! Per directory path the lifecycle is `Idle -> Scheduled -> Disposing -> Idle`.
//! A notification for a path that is not idle is ignored: the original fire
//! time stands and no second disposal is scheduled.
//!
//! [`PendingSet`] holds that state machine and knows nothing about time
//! sources or tasks. [`DeferredTrigger`] drives it from the tokio runtime.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::AbortHandle;
use tokio::time::Instant;

use common::DisposalPolicy;

use crate::dispose::{DisposalOutcome, dispose};

/// A disposal waiting for its settle delay to pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingDeletion {
    pub account: String,
    pub path: PathBuf,
    pub fire_at: Instant,
    /// Captured when the notification arrived, not re-read when firing.
    pub policy: DisposalPolicy,
    /// Distinguishes this deletion from earlier, cancelled ones for the same path.
    pub generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingState {
    Scheduled,
    Disposing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    Scheduled,
    /// The path already has a pending or running disposal.
    AlreadyPending,
}

#[derive(Debug)]
struct Slot {
    deletion: PendingDeletion,
    state: PendingState,
}

/// Path-keyed pending disposals.
#[derive(Debug, Default)]
pub struct PendingSet {
    slots: HashMap<PathBuf, Slot>,
    next_generation: u64,
}

impl PendingSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule a disposal of `path`, unless one is already pending.
    pub fn schedule(
        &mut self,
        account: &str,
        path: &Path,
        policy: &DisposalPolicy,
        now: Instant,
        settle_delay: Duration,
    ) -> Option<PendingDeletion> {
        if self.slots.contains_key(path) {
            return None;
        }

        self.next_generation += 1;
        let deletion = PendingDeletion {
            account: account.to_string(),
            path: path.to_path_buf(),
            fire_at: now + settle_delay,
            policy: policy.clone(),
            generation: self.next_generation,
        };
        self.slots.insert(
            path.to_path_buf(),
            Slot {
                deletion: deletion.clone(),
                state: PendingState::Scheduled,
            },
        );
        Some(deletion)
    }

    /// Move a scheduled path to `Disposing` and hand out its deletion.
    ///
    /// Returns `None` unless `path` is scheduled under `generation`, so a
    /// deletion is consumed only once and only by the timer created for it.
    pub fn begin(&mut self, path: &Path, generation: u64) -> Option<PendingDeletion> {
        let slot = self.slots.get_mut(path)?;
        if slot.state != PendingState::Scheduled || slot.deletion.generation != generation {
            return None;
        }
        slot.state = PendingState::Disposing;
        Some(slot.deletion.clone())
    }

    /// Return a disposing path to idle.
    pub fn finish(&mut self, path: &Path, generation: u64) {
        if self.slots.get(path).is_some_and(|slot| {
            slot.state == PendingState::Disposing && slot.deletion.generation == generation
        }) {
            self.slots.remove(path);
        }
    }

    /// Drop a scheduled deletion. A disposal that has begun cannot be cancelled.
    pub fn cancel(&mut self, path: &Path) -> Option<PendingDeletion> {
        match self.slots.get(path) {
            Some(slot) if slot.state == PendingState::Scheduled => {
                self.slots.remove(path).map(|slot| slot.deletion)
            }
            _ => None,
        }
    }

    pub fn state(&self, path: &Path) -> Option<PendingState> {
        self.slots.get(path).map(|slot| slot.state)
    }

    pub fn scheduled_paths(&self) -> Vec<PathBuf> {
        self.slots
            .iter()
            .filter(|(_, slot)| slot.state == PendingState::Scheduled)
            .map(|(path, _)| path.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Where the trigger reports what it did. The host has no caller waiting on
/// a deferred disposal, so failures are broadcast rather than returned.
pub trait Notifier: Send + Sync {
    fn notify(&self, message: &str);
}

/// Notifier that writes to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, message: &str) {
        tracing::info!(target: "dirsweep::notify", "{message}");
    }
}

/// Pending slots and their timer tasks change together under one lock.
#[derive(Default)]
struct TriggerState {
    pending: PendingSet,
    timers: HashMap<PathBuf, AbortHandle>,
}

impl TriggerState {
    fn cancel(&mut self, path: &Path) -> Option<PendingDeletion> {
        let deletion = self.pending.cancel(path)?;
        if let Some(timer) = self.timers.remove(path) {
            timer.abort();
        }
        Some(deletion)
    }
}

struct Shared {
    state: Mutex<TriggerState>,
    /// Number of paths that are not idle, for `wait_idle`.
    active: watch::Sender<usize>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, TriggerState> {
        // A panic while holding the lock cannot leave the maps half-updated
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn publish(&self, state: &TriggerState) {
        self.active.send_replace(state.pending.len());
    }
}

/// Schedules deferred disposals on the current tokio runtime.
#[derive(Clone)]
pub struct DeferredTrigger {
    shared: Arc<Shared>,
    policy: DisposalPolicy,
    settle_delay: Duration,
    notifier: Arc<dyn Notifier>,
}

impl DeferredTrigger {
    pub fn new(
        policy: DisposalPolicy,
        settle_delay: Duration,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let (active, _) = watch::channel(0);
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(TriggerState::default()),
                active,
            }),
            policy,
            settle_delay,
            notifier,
        }
    }

    /// Handle an account-removal notification. Returns without waiting.
    ///
    /// Must be called from within a tokio runtime.
    pub fn on_account_removed(&self, account: &str, path: &Path) -> ScheduleOutcome {
        let scheduled = {
            let mut state = self.shared.state();
            let scheduled = state.pending.schedule(
                account,
                path,
                &self.policy,
                Instant::now(),
                self.settle_delay,
            );
            if let Some(deletion) = &scheduled {
                // The task cannot reach the state before its handle is stored
                let handle = tokio::spawn(fire(
                    self.shared.clone(),
                    self.notifier.clone(),
                    deletion.path.clone(),
                    deletion.generation,
                    deletion.fire_at,
                ));
                state
                    .timers
                    .insert(deletion.path.clone(), handle.abort_handle());
            }
            self.shared.publish(&state);
            scheduled
        };

        let Some(deletion) = scheduled else {
            tracing::info!(
                account = %account,
                path = %path.display(),
                "Disposal already pending, ignoring duplicate notification"
            );
            return ScheduleOutcome::AlreadyPending;
        };

        tracing::info!(
            account = %deletion.account,
            path = %deletion.path.display(),
            settle_delay = ?self.settle_delay,
            policy = %deletion.policy,
            "Scheduled deferred disposal"
        );
        ScheduleOutcome::Scheduled
    }

    /// Cancel the pending disposal of `path` if its timer has not fired yet.
    pub fn cancel(&self, path: &Path) -> bool {
        let cancelled = {
            let mut state = self.shared.state();
            let cancelled = state.cancel(path);
            self.shared.publish(&state);
            cancelled
        };

        match cancelled {
            Some(deletion) => {
                tracing::info!(
                    account = %deletion.account,
                    path = %path.display(),
                    "Cancelled deferred disposal"
                );
                true
            }
            None => false,
        }
    }

    /// Cancel every disposal that has not started. Running ones complete.
    pub fn shutdown(&self) -> usize {
        let mut state = self.shared.state();
        let cancelled = state
            .pending
            .scheduled_paths()
            .iter()
            .filter_map(|path| state.cancel(path))
            .count();
        self.shared.publish(&state);
        cancelled
    }

    pub fn state(&self, path: &Path) -> Option<PendingState> {
        self.shared.state().pending.state(path)
    }

    /// Wait until no disposal is scheduled or running.
    pub async fn wait_idle(&self) {
        let mut active = self.shared.active.subscribe();
        // The sender lives in `shared`, which we hold, so this cannot fail
        let _ = active.wait_for(|count| *count == 0).await;
    }
}

async fn fire(
    shared: Arc<Shared>,
    notifier: Arc<dyn Notifier>,
    path: PathBuf,
    generation: u64,
    fire_at: Instant,
) {
    tokio::time::sleep_until(fire_at).await;

    let deletion = {
        let mut state = shared.state();
        let deletion = state.pending.begin(&path, generation);
        if deletion.is_some() {
            state.timers.remove(&path);
        }
        deletion
    };
    let Some(deletion) = deletion else {
        return;
    };

    let PendingDeletion {
        account,
        path,
        policy,
        ..
    } = deletion;
    let target = path.clone();
    let result = tokio::task::spawn_blocking(move || dispose(&target, &policy)).await;

    let message = match result {
        Ok(Ok(DisposalOutcome::Quarantined(destination))) => format!(
            "Directory for deleted user '{account}' moved to '{}'",
            destination.display()
        ),
        Ok(Ok(_)) => format!("Directory for deleted user '{account}' removed"),
        Ok(Err(e)) => {
            tracing::error!(account = %account, error = %e, "Deferred disposal failed");
            format!("Failed to dispose of directory for deleted user '{account}': {e}")
        }
        Err(e) => {
            tracing::error!(account = %account, error = %e, "Deferred disposal task panicked");
            format!("Failed to dispose of directory for deleted user '{account}': {e}")
        }
    };
    notifier.notify(&message);

    let mut state = shared.state();
    state.pending.finish(&path, generation);
    shared.publish(&state);
}

#[cfg(test)]
mod tests {
    use super::*;
    use ntest::timeout;
    use std::fs;
    use tempfile::TempDir;

    const SETTLE: Duration = Duration::from_millis(50);

    #[derive(Default)]
    struct RecordingNotifier {
        messages: Mutex<Vec<String>>,
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, message: &str) {
            self.messages.lock().unwrap().push(message.to_string());
        }
    }

    impl RecordingNotifier {
        fn messages(&self) -> Vec<String> {
            self.messages.lock().unwrap().clone()
        }
    }

    #[test]
    fn test_pending_set_dedups_by_path() {
        let mut set = PendingSet::new();
        let now = Instant::now();
        let path = Path::new("/users/bob");

        let first = set
            .schedule("bob", path, &DisposalPolicy::Delete, now, SETTLE)
            .unwrap();
        assert_eq!(first.fire_at, now + SETTLE);
        assert!(
            set.schedule("bob", path, &DisposalPolicy::Delete, now + SETTLE / 2, SETTLE)
                .is_none()
        );
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_pending_set_consumes_once() {
        let mut set = PendingSet::new();
        let path = Path::new("/users/bob");
        let deletion = set
            .schedule("bob", path, &DisposalPolicy::Delete, Instant::now(), SETTLE)
            .unwrap();

        assert!(set.begin(path, deletion.generation).is_some());
        assert_eq!(set.state(path), Some(PendingState::Disposing));
        assert!(set.begin(path, deletion.generation).is_none());
        // Duplicates are ignored while disposing, too
        assert!(
            set.schedule("bob", path, &DisposalPolicy::Delete, Instant::now(), SETTLE)
                .is_none()
        );
        assert!(set.cancel(path).is_none());

        set.finish(path, deletion.generation);
        assert!(set.is_empty());
    }

    #[test]
    fn test_pending_set_cancel_before_fire() {
        let mut set = PendingSet::new();
        let path = Path::new("/users/bob");
        set.schedule("bob", path, &DisposalPolicy::Delete, Instant::now(), SETTLE);

        let cancelled = set.cancel(path).unwrap();
        assert_eq!(cancelled.account, "bob");
        assert!(set.begin(path, cancelled.generation).is_none());
        // Finishing something that never began is a no-op
        set.finish(path, cancelled.generation);
        assert!(set.is_empty());
    }

    #[test]
    fn test_stale_timer_cannot_take_a_rescheduled_path() {
        let mut set = PendingSet::new();
        let path = Path::new("/users/bob");
        let now = Instant::now();

        let first = set
            .schedule("bob", path, &DisposalPolicy::Delete, now, SETTLE)
            .unwrap();
        set.cancel(path).unwrap();
        let second = set
            .schedule("bob", path, &DisposalPolicy::Delete, now + SETTLE / 2, SETTLE)
            .unwrap();
        assert_ne!(first.generation, second.generation);

        // The first timer wakes before the second deadline and finds nothing
        assert!(set.begin(path, first.generation).is_none());
        assert_eq!(set.state(path), Some(PendingState::Scheduled));

        let taken = set.begin(path, second.generation).unwrap();
        assert_eq!(taken.fire_at, now + SETTLE / 2 + SETTLE);
        set.finish(path, first.generation);
        assert_eq!(set.state(path), Some(PendingState::Disposing));
        set.finish(path, second.generation);
        assert!(set.is_empty());
    }

    #[tokio::test]
    #[timeout(10000)]
    async fn test_disposes_after_settle_delay() {
        let users = TempDir::new().unwrap();
        let bob = users.path().join("bob");
        fs::create_dir(&bob).unwrap();
        let notifier = Arc::new(RecordingNotifier::default());
        let trigger = DeferredTrigger::new(DisposalPolicy::Delete, SETTLE, notifier.clone());

        let started = Instant::now();
        assert_eq!(
            trigger.on_account_removed("bob", &bob),
            ScheduleOutcome::Scheduled
        );
        // The notification handler returns before anything happens
        assert!(bob.exists());
        assert_eq!(trigger.state(&bob), Some(PendingState::Scheduled));

        trigger.wait_idle().await;

        assert!(started.elapsed() >= SETTLE);
        assert!(!bob.exists());
        assert_eq!(trigger.state(&bob), None);
        assert_eq!(
            notifier.messages(),
            vec!["Directory for deleted user 'bob' removed".to_string()]
        );
    }

    #[tokio::test]
    #[timeout(10000)]
    async fn test_duplicate_notifications_dispose_once() {
        let users = TempDir::new().unwrap();
        let trash = TempDir::new().unwrap();
        let bob = users.path().join("bob");
        fs::create_dir(&bob).unwrap();
        let policy = DisposalPolicy::quarantine(trash.path()).unwrap();
        let notifier = Arc::new(RecordingNotifier::default());
        let trigger = DeferredTrigger::new(policy, SETTLE, notifier.clone());

        assert_eq!(
            trigger.on_account_removed("bob", &bob),
            ScheduleOutcome::Scheduled
        );
        assert_eq!(
            trigger.on_account_removed("bob", &bob),
            ScheduleOutcome::AlreadyPending
        );

        trigger.wait_idle().await;

        let quarantined: Vec<_> = fs::read_dir(trash.path()).unwrap().collect();
        assert_eq!(quarantined.len(), 1);
        assert_eq!(notifier.messages().len(), 1);
        assert!(!bob.exists());
    }

    #[tokio::test]
    #[timeout(10000)]
    async fn test_failure_is_broadcast() {
        let users = TempDir::new().unwrap();
        let notifier = Arc::new(RecordingNotifier::default());
        let trigger = DeferredTrigger::new(DisposalPolicy::Delete, SETTLE, notifier.clone());

        trigger.on_account_removed("ghost", &users.path().join("ghost"));
        trigger.wait_idle().await;

        let messages = notifier.messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].starts_with("Failed to dispose"), "{messages:?}");
    }

    #[tokio::test]
    #[timeout(10000)]
    async fn test_shutdown_cancels_scheduled_disposals() {
        let users = TempDir::new().unwrap();
        let bob = users.path().join("bob");
        let carol = users.path().join("carol");
        fs::create_dir(&bob).unwrap();
        fs::create_dir(&carol).unwrap();
        let notifier = Arc::new(RecordingNotifier::default());
        let trigger =
            DeferredTrigger::new(DisposalPolicy::Delete, Duration::from_secs(60), notifier.clone());

        trigger.on_account_removed("bob", &bob);
        trigger.on_account_removed("carol", &carol);

        assert_eq!(trigger.shutdown(), 2);
        trigger.wait_idle().await;

        assert!(bob.exists());
        assert!(carol.exists());
        assert!(notifier.messages().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_then_renotify_honors_the_new_delay() {
        let users = TempDir::new().unwrap();
        let bob = users.path().join("bob");
        fs::create_dir(&bob).unwrap();
        let settle = Duration::from_secs(10);
        let trigger = DeferredTrigger::new(DisposalPolicy::Delete, settle, Arc::new(LogNotifier));

        let started = Instant::now();
        trigger.on_account_removed("bob", &bob);
        tokio::time::sleep(settle / 2).await;
        assert!(trigger.cancel(&bob));
        assert_eq!(
            trigger.on_account_removed("bob", &bob),
            ScheduleOutcome::Scheduled
        );

        // Past the first deadline, before the second
        tokio::time::sleep(settle / 2 + Duration::from_secs(1)).await;
        assert!(bob.exists());
        assert_eq!(trigger.state(&bob), Some(PendingState::Scheduled));

        trigger.wait_idle().await;
        assert!(!bob.exists());
        assert!(started.elapsed() >= settle / 2 + settle);
    }

    #[tokio::test]
    #[timeout(10000)]
    async fn test_reschedule_after_completion() {
        let users = TempDir::new().unwrap();
        let bob = users.path().join("bob");
        fs::create_dir(&bob).unwrap();
        let trigger = DeferredTrigger::new(DisposalPolicy::Delete, SETTLE, Arc::new(LogNotifier));

        trigger.on_account_removed("bob", &bob);
        trigger.wait_idle().await;
        assert!(!bob.exists());

        // The account was recreated and removed again
        fs::create_dir(&bob).unwrap();
        assert_eq!(
            trigger.on_account_removed("bob", &bob),
            ScheduleOutcome::Scheduled
        );
        trigger.wait_idle().await;
        assert!(!bob.exists());
    }
}
