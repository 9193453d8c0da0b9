//! Cooperative task scheduler (spec §4.10).
//!
//! Grounded on `AutoStarRail/Core/TaskScheduler/include/.../TaskScheduler.h`:
//! a time-ordered queue of `SchedulingUnit`s, a single binding thread that
//! runs at most one task at a time (`is_task_working_`), and cooperative —
//! never forced — cancellation via `OnRequestExit`. The original's
//! `exec::static_thread_pool thread_pool{1}` becomes one plain
//! `std::thread::spawn` here; a pool of size one is just a thread.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;
use serde_json::Value;

use ipc_types::collaborators::Task;
use tracing::{debug, warn};

/// Either half of the original's single polymorphic task pointer, made
/// explicit (§9 "TaskRef" redesign note): a task is either native Rust code
/// or an IPC proxy to a scripted task in a worker process. Both sides
/// implement the same [`Task`] trait, so the queue and executor never need
/// to know which one they're holding.
pub enum TaskRef {
    Native(Arc<dyn Task>),
    Scripted(Arc<crate::scripted::ScriptedTask>),
}

impl TaskRef {
    fn as_task(&self) -> &dyn Task {
        match self {
            TaskRef::Native(t) => t.as_ref(),
            TaskRef::Scripted(t) => t.as_ref(),
        }
    }
}

struct ScheduledTask {
    task_ref: TaskRef,
    settings: Value,
}

#[derive(PartialEq, Eq)]
struct SchedulingUnit {
    next_run_at: Instant,
    task_id: u64,
}

impl Ord for SchedulingUnit {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.next_run_at.cmp(&other.next_run_at).then(self.task_id.cmp(&other.task_id))
    }
}
impl PartialOrd for SchedulingUnit {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// What the most recent task execution produced, retained for introspection
/// (`last_task_execute_message_`, SPEC_FULL.md supplemented feature #5).
#[derive(Debug, Clone)]
pub struct TaskResult {
    pub task_id: u64,
    pub task_name: String,
    pub outcome: Result<(), String>,
    pub finished_at_ms: u64,
}

struct Inner {
    tasks: Mutex<FxHashMap<u64, ScheduledTask>>,
    queue: Mutex<BinaryHeap<Reverse<SchedulingUnit>>>,
    wake: Condvar,
    wake_lock: Mutex<()>,
    next_task_id: AtomicU64,
    is_task_working: AtomicBool,
    last_result: Mutex<Option<TaskResult>>,
    environment: Mutex<Value>,
    stopped: AtomicBool,
    epoch: Instant,
}

/// The scheduler itself. Construct one, `start` its binding thread, call
/// `add_task`/`delete_task`/`update_config` from any thread, `stop` to wind
/// the binding thread down.
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn new() -> Self {
        Scheduler {
            inner: Arc::new(Inner {
                tasks: Mutex::new(FxHashMap::default()),
                queue: Mutex::new(BinaryHeap::new()),
                wake: Condvar::new(),
                wake_lock: Mutex::new(()),
                next_task_id: AtomicU64::new(1),
                is_task_working: AtomicBool::new(false),
                last_result: Mutex::new(None),
                environment: Mutex::new(Value::Null),
                stopped: AtomicBool::new(false),
                epoch: Instant::now(),
            }),
        }
    }

    /// Schedule `task_ref` to run after `initial_delay_ms`, with `settings`
    /// passed to every invocation of `Do`. Returns the task id, used for
    /// `delete_task`.
    pub fn add_task(&self, task_ref: TaskRef, settings: Value, initial_delay_ms: u64) -> u64 {
        let task_id = self.inner.next_task_id.fetch_add(1, Ordering::Relaxed);
        self.inner.tasks.lock().insert(task_id, ScheduledTask { task_ref, settings });
        let next_run_at = Instant::now() + Duration::from_millis(initial_delay_ms);
        self.inner.queue.lock().push(Reverse(SchedulingUnit { next_run_at, task_id }));
        self.wake_executor();
        task_id
    }

    /// Remove a task. Cooperative: if the task is currently executing, this
    /// only asks it to stop (`OnRequestExit`) and unschedules any future
    /// run — it does not interrupt the in-flight `Do` call, which is
    /// allowed to finish naturally (spec §4.10 failure policy).
    pub fn delete_task(&self, task_id: u64) -> bool {
        let removed = self.inner.tasks.lock().remove(&task_id);
        match removed {
            Some(scheduled) => {
                scheduled.task_ref.as_task().on_request_exit();
                true
            }
            None => false,
        }
    }

    /// Replace the process-wide environment blob every task's `Do` receives
    /// from its next invocation onward.
    pub fn update_config(&self, environment: Value) {
        *self.inner.environment.lock() = environment;
    }

    pub fn is_task_working(&self) -> bool {
        self.inner.is_task_working.load(Ordering::Acquire)
    }

    pub fn last_result(&self) -> Option<TaskResult> {
        self.inner.last_result.lock().clone()
    }

    pub fn task_count(&self) -> usize {
        self.inner.tasks.lock().len()
    }

    /// Wake the binding thread immediately, e.g. after adding a task whose
    /// run time is earlier than whatever the thread is currently sleeping
    /// toward.
    fn wake_executor(&self) {
        let _guard = self.inner.wake_lock.lock();
        self.inner.wake.notify_all();
    }

    /// Start the binding thread. Only one task runs at a time on it, in
    /// next-run-time order, matching the original's single-worker
    /// `static_thread_pool`.
    pub fn start(&self) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        std::thread::spawn(move || run_binding_thread(inner))
    }

    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::Release);
        let _guard = self.inner.wake_lock.lock();
        self.inner.wake.notify_all();
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

fn run_binding_thread(inner: Arc<Inner>) {
    loop {
        if inner.stopped.load(Ordering::Acquire) {
            return;
        }

        let next_due = inner.queue.lock().peek().map(|Reverse(unit)| unit.next_run_at);
        let now = Instant::now();
        match next_due {
            Some(at) if at <= now => {}
            Some(at) => {
                let wait_for = at.saturating_duration_since(now).min(Duration::from_millis(200));
                let mut guard = inner.wake_lock.lock();
                inner.wake.wait_for(&mut guard, wait_for);
                continue;
            }
            None => {
                let mut guard = inner.wake_lock.lock();
                inner.wake.wait_for(&mut guard, Duration::from_millis(200));
                continue;
            }
        }

        let Reverse(unit) = match inner.queue.lock().pop() {
            Some(u) => u,
            None => continue,
        };

        let task_snapshot = {
            let tasks = inner.tasks.lock();
            tasks.get(&unit.task_id).map(|t| (t.settings.clone(),))
        };
        let Some((settings,)) = task_snapshot else {
            // Deleted since it was scheduled; drop the stale unit.
            continue;
        };

        inner.is_task_working.store(true, Ordering::Release);
        let environment = inner.environment.lock().clone();
        let (outcome, delay_ms, name) = {
            let tasks = inner.tasks.lock();
            match tasks.get(&unit.task_id) {
                Some(scheduled) => {
                    let task = scheduled.task_ref.as_task();
                    let name = task.name().to_string();
                    drop(tasks);
                    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                        let tasks = inner.tasks.lock();
                        let task = tasks.get(&unit.task_id).expect("checked above").task_ref.as_task();
                        let result = task.do_run(&environment, &settings);
                        let delay = task.next_execution_delay_ms();
                        (result, delay)
                    }))
                    .unwrap_or_else(|_| (Err("task panicked".to_string()), 0));
                    (outcome.0, outcome.1, name)
                }
                None => continue,
            }
        };
        inner.is_task_working.store(false, Ordering::Release);

        match &outcome {
            Ok(()) => debug!(task_id = unit.task_id, "task run completed"),
            Err(message) => warn!(task_id = unit.task_id, %message, "task run failed"),
        }

        *inner.last_result.lock() =
            Some(TaskResult { task_id: unit.task_id, task_name: name, outcome, finished_at_ms: inner.epoch.elapsed().as_millis() as u64 });

        if inner.tasks.lock().contains_key(&unit.task_id) {
            let next_run_at = Instant::now() + Duration::from_millis(delay_ms);
            inner.queue.lock().push(Reverse(SchedulingUnit { next_run_at, task_id: unit.task_id }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingTask {
        runs: Arc<AtomicUsize>,
        delay_ms: u64,
    }

    impl Task for CountingTask {
        fn on_request_exit(&self) {}
        fn do_run(&self, _environment: &Value, _task_settings: &Value) -> Result<(), String> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn next_execution_delay_ms(&self) -> u64 {
            self.delay_ms
        }
        fn name(&self) -> &str {
            "counting-task"
        }
        fn description(&self) -> &str {
            "increments a counter each run"
        }
        fn label(&self) -> &str {
            "counting"
        }
    }

    #[test]
    fn task_runs_after_its_initial_delay() {
        let scheduler = Scheduler::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let task = Arc::new(CountingTask { runs: Arc::clone(&runs), delay_ms: 10_000 });
        scheduler.add_task(TaskRef::Native(task), Value::Null, 10);
        let handle = scheduler.start();

        std::thread::sleep(Duration::from_millis(150));
        assert!(runs.load(Ordering::SeqCst) >= 1);

        scheduler.stop();
        handle.join().unwrap();
    }

    #[test]
    fn only_one_task_runs_at_a_time() {
        struct BlockingTask {
            started: Arc<AtomicUsize>,
            concurrent: Arc<AtomicUsize>,
            max_concurrent: Arc<AtomicUsize>,
        }
        impl Task for BlockingTask {
            fn on_request_exit(&self) {}
            fn do_run(&self, _e: &Value, _s: &Value) -> Result<(), String> {
                self.started.fetch_add(1, Ordering::SeqCst);
                let now = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                self.max_concurrent.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(30));
                self.concurrent.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
            fn next_execution_delay_ms(&self) -> u64 {
                5
            }
            fn name(&self) -> &str {
                "blocking-task"
            }
            fn description(&self) -> &str {
                ""
            }
            fn label(&self) -> &str {
                ""
            }
        }

        let scheduler = Scheduler::new();
        let started = Arc::new(AtomicUsize::new(0));
        let concurrent = Arc::new(AtomicUsize::new(0));
        let max_concurrent = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let task = Arc::new(BlockingTask {
                started: Arc::clone(&started),
                concurrent: Arc::clone(&concurrent),
                max_concurrent: Arc::clone(&max_concurrent),
            });
            scheduler.add_task(TaskRef::Native(task), Value::Null, 0);
        }
        let handle = scheduler.start();
        std::thread::sleep(Duration::from_millis(200));
        scheduler.stop();
        handle.join().unwrap();

        assert!(started.load(Ordering::SeqCst) >= 2);
        assert_eq!(max_concurrent.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn delete_task_prevents_further_runs_and_calls_on_request_exit() {
        struct ExitTrackingTask {
            runs: Arc<AtomicUsize>,
            exit_requested: Arc<AtomicBool>,
        }
        impl Task for ExitTrackingTask {
            fn on_request_exit(&self) {
                self.exit_requested.store(true, Ordering::SeqCst);
            }
            fn do_run(&self, _e: &Value, _s: &Value) -> Result<(), String> {
                self.runs.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            fn next_execution_delay_ms(&self) -> u64 {
                5
            }
            fn name(&self) -> &str {
                "exit-tracking-task"
            }
            fn description(&self) -> &str {
                ""
            }
            fn label(&self) -> &str {
                ""
            }
        }

        let scheduler = Scheduler::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let exit_requested = Arc::new(AtomicBool::new(false));
        let task = Arc::new(ExitTrackingTask { runs: Arc::clone(&runs), exit_requested: Arc::clone(&exit_requested) });
        let task_id = scheduler.add_task(TaskRef::Native(task), Value::Null, 500);

        assert!(scheduler.delete_task(task_id));
        assert!(exit_requested.load(Ordering::SeqCst));
        assert!(!scheduler.delete_task(task_id));

        let handle = scheduler.start();
        std::thread::sleep(Duration::from_millis(100));
        scheduler.stop();
        handle.join().unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn last_result_reflects_the_most_recent_execution() {
        let scheduler = Scheduler::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let task = Arc::new(CountingTask { runs: Arc::clone(&runs), delay_ms: 10_000 });
        scheduler.add_task(TaskRef::Native(task), Value::Null, 0);
        let handle = scheduler.start();
        std::thread::sleep(Duration::from_millis(100));
        scheduler.stop();
        handle.join().unwrap();

        let result = scheduler.last_result().expect("a task ran");
        assert_eq!(result.task_name, "counting-task");
        assert!(result.outcome.is_ok());
    }
}
