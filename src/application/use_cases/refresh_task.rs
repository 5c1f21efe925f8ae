use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

#[derive(Default)]
struct LoopState {
    running: bool,
    stop_requested: bool,
}

/// Shared between the task handle and its loop. The loop's decision to exit
/// and the `running` flag change under one lock, so `start` never races it.
#[derive(Default)]
struct Control {
    state: Mutex<LoopState>,
    wake: Notify,
}

impl Control {
    fn lock(&self) -> MutexGuard<'_, LoopState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn stop_requested(&self) -> bool {
        self.lock().stop_requested
    }

    /// Consume a pending stop and mark the loop finished.
    fn try_exit(&self) -> bool {
        let mut state = self.lock();
        if state.stop_requested {
            state.running = false;
            state.stop_requested = false;
            true
        } else {
            false
        }
    }
}

/// Runs a unit of work on a fixed interval until stopped.
///
/// Each cycle is `work -> wait`. A stop request is honoured at the next cycle
/// boundary: a cycle already in progress runs to completion, a pending wait
/// ends early. A `start` issued before a pending stop takes effect cancels
/// the stop and keeps the current loop. At most one loop runs at a time.
pub struct PeriodicTask {
    name: &'static str,
    interval: Duration,
    control: Arc<Control>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl PeriodicTask {
    pub fn new(name: &'static str, interval: Duration) -> Self {
        Self {
            name,
            interval,
            control: Arc::new(Control::default()),
            handle: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.control.lock().running
    }

    /// Spawn the loop, or re-arm one that is winding down after `stop`.
    ///
    /// Returns false when a loop is already running with no stop pending.
    pub fn start<F, Fut>(&self, work: F) -> bool
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        {
            let mut state = self.control.lock();
            if state.running {
                if state.stop_requested {
                    state.stop_requested = false;
                    info!(task = self.name, "Cancelled pending stop");
                    return true;
                }
                debug!(task = self.name, "Periodic task already running");
                return false;
            }
            state.running = true;
            state.stop_requested = false;
        }

        let control = self.control.clone();
        let interval = self.interval;
        let name = self.name;
        let handle = tokio::spawn(async move {
            info!(task = name, interval_secs = interval.as_secs(), "Started periodic task");
            loop {
                work().await;
                if control.try_exit() {
                    break;
                }
                let deadline = Instant::now() + interval;
                loop {
                    tokio::select! {
                        _ = tokio::time::sleep_until(deadline) => break,
                        _ = control.wake.notified() => {
                            if control.stop_requested() {
                                break;
                            }
                        }
                    }
                }
                if control.try_exit() {
                    break;
                }
            }
            info!(task = name, "Stopped periodic task");
        });
        *self.handle.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
        true
    }

    /// Ask the loop to exit at its next cycle boundary. Returns false when nothing was running.
    pub fn stop(&self) -> bool {
        {
            let mut state = self.control.lock();
            if !state.running || state.stop_requested {
                return false;
            }
            state.stop_requested = true;
        }
        // `notify_one` keeps a permit if the loop is mid-work and not yet waiting.
        self.control.wake.notify_one();
        true
    }

    /// Stop and wait for the loop to exit.
    pub async fn stop_and_wait(&self) {
        self.stop();
        let handle = self.handle.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_work(counter: Arc<AtomicUsize>) -> impl Fn() -> std::future::Ready<()> + Send + Sync {
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
            std::future::ready(())
        }
    }

    async fn wait_for(counter: &AtomicUsize, at_least: usize) {
        for _ in 0..200 {
            if counter.load(Ordering::SeqCst) >= at_least {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("work ran fewer than {} times", at_least);
    }

    #[tokio::test]
    async fn test_runs_repeatedly_and_refuses_second_start() {
        let task = PeriodicTask::new("test", Duration::from_millis(10));
        let counter = Arc::new(AtomicUsize::new(0));

        assert!(task.start(counting_work(counter.clone())));
        assert!(task.is_running());
        assert!(!task.start(counting_work(counter.clone())));

        wait_for(&counter, 3).await;
        task.stop_and_wait().await;
        assert!(!task.is_running());
    }

    #[tokio::test]
    async fn test_stop_interrupts_the_wait() {
        let task = PeriodicTask::new("test", Duration::from_secs(3600));
        let counter = Arc::new(AtomicUsize::new(0));
        task.start(counting_work(counter.clone()));
        wait_for(&counter, 1).await;

        tokio::time::timeout(Duration::from_secs(2), task.stop_and_wait())
            .await
            .expect("loop should exit promptly");
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(!task.is_running());
    }

    #[tokio::test]
    async fn test_restart_after_stop() {
        let task = PeriodicTask::new("test", Duration::from_secs(3600));
        let counter = Arc::new(AtomicUsize::new(0));

        task.start(counting_work(counter.clone()));
        wait_for(&counter, 1).await;
        task.stop_and_wait().await;
        assert!(!task.stop());

        assert!(task.start(counting_work(counter.clone())));
        wait_for(&counter, 2).await;
        task.stop_and_wait().await;
    }

    #[tokio::test]
    async fn test_start_during_pending_stop_keeps_loop_alive() {
        let task = PeriodicTask::new("test", Duration::from_millis(10));
        let counter = Arc::new(AtomicUsize::new(0));
        let slow = {
            let counter = counter.clone();
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(100))
            }
        };

        assert!(task.start(slow.clone()));
        wait_for(&counter, 1).await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(task.stop());
        assert!(task.start(slow));
        assert!(task.is_running());

        wait_for(&counter, 2).await;
        assert!(task.is_running());
        task.stop_and_wait().await;
        assert!(!task.is_running());
    }
}
