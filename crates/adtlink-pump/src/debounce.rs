//! One-shot deadline timer used to coalesce TX flushes.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::trace;

/// A timer thread that runs an action once the earliest armed deadline
/// passes.
///
/// Arming while already armed keeps whichever deadline is sooner, so a
/// burst of sends flushes no later than the tightest latency bound among
/// them.
pub struct Debouncer {
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

struct Shared {
    state: Mutex<State>,
    cond: Condvar,
}

#[derive(Default)]
struct State {
    deadline: Option<Instant>,
    stopped: bool,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Debouncer {
    /// Start the timer thread.
    pub fn spawn<F>(name: &str, action: F) -> std::io::Result<Self>
    where
        F: Fn() + Send + 'static,
    {
        let shared = Arc::new(Shared {
            state: Mutex::new(State::default()),
            cond: Condvar::new(),
        });
        let worker = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run(&worker, action))?;
        Ok(Self {
            shared,
            handle: Some(handle),
        })
    }

    /// Arm for `delay` from now, keeping an earlier pending deadline.
    /// Returns `true` if this moved the deadline.
    pub fn schedule(&self, delay: Duration) -> bool {
        let deadline = Instant::now() + delay;
        let mut state = self.shared.lock();
        if state.stopped {
            return false;
        }
        match state.deadline {
            Some(pending) if pending <= deadline => false,
            _ => {
                state.deadline = Some(deadline);
                self.shared.cond.notify_all();
                true
            }
        }
    }

    /// Stop and join the timer thread. A pending deadline does not fire.
    pub fn shutdown(&mut self) {
        {
            let mut state = self.shared.lock();
            state.stopped = true;
            state.deadline = None;
            self.shared.cond.notify_all();
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run<F: Fn()>(shared: &Shared, action: F) {
    let mut state = shared.lock();
    loop {
        if state.stopped {
            return;
        }
        match state.deadline {
            None => {
                state = shared
                    .cond
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    state.deadline = None;
                    drop(state);
                    trace!("debounce deadline reached");
                    action();
                    state = shared.lock();
                } else {
                    state = shared
                        .cond
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
            }
        }
    }
}
