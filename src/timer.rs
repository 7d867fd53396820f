//! Timer dispatcher.
//!
//! Timers sleep on their own tasks and, when due, post a [`Fired`] entry to
//! the module's fire channel. Callbacks only ever run on the module loop.
//! Recurring timers follow a [`Schedule`]; cron-style evaluators implement
//! that trait.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::recovery;
use crate::types::{Error, Result};

/// Source of firing times for a recurring timer.
pub trait Schedule: Send + Sync + 'static {
    /// First firing strictly after `now`; `None` ends the timer.
    fn next_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>>;
}

/// Fixed-interval schedule.
#[derive(Debug, Clone, Copy)]
pub struct Every(pub Duration);

impl Schedule for Every {
    fn next_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let step = chrono::Duration::from_std(self.0).ok()?;
        now.checked_add_signed(step)
    }
}

/// Handle to an armed timer.
#[derive(Debug, Clone)]
pub struct Timer {
    stopped: Arc<AtomicBool>,
    token: CancellationToken,
}

impl Timer {
    fn new(token: CancellationToken) -> Self {
        Self {
            stopped: Arc::new(AtomicBool::new(false)),
            token,
        }
    }

    /// Prevent any further firing, including one already queued.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        self.token.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

enum Action {
    Once(Box<dyn FnOnce() + Send>),
    Recurring {
        schedule: Arc<dyn Schedule>,
        callback: Box<dyn FnMut() + Send>,
    },
}

/// A due timer waiting on the fire channel.
pub struct Fired {
    timer: Timer,
    action: Action,
}

impl fmt::Debug for Fired {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.action {
            Action::Once(_) => "once",
            Action::Recurring { .. } => "recurring",
        };
        f.debug_struct("Fired")
            .field("kind", &kind)
            .field("stopped", &self.timer.is_stopped())
            .finish()
    }
}

/// Receiving side of a module's timers.
#[derive(Debug)]
pub struct TimerDispatcher {
    handle: TimerHandle,
    rx: mpsc::Receiver<Fired>,
}

impl TimerDispatcher {
    /// `capacity` bounds due timers waiting for the loop; zero disables timers.
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            handle: TimerHandle {
                tx,
                enabled: capacity > 0,
                cancel: CancellationToken::new(),
            },
            rx,
        }
    }

    pub fn handle(&self) -> TimerHandle {
        self.handle.clone()
    }

    pub async fn next_fired(&mut self) -> Option<Fired> {
        self.rx.recv().await
    }

    /// Run a due timer on the calling (module) task; re-arms recurring timers.
    pub fn fire(&self, fired: Fired) {
        let Fired { timer, action } = fired;
        if timer.is_stopped() {
            return;
        }
        match action {
            Action::Once(callback) => {
                if let Err(fault) = recovery::catch(callback) {
                    tracing::error!(trace = fault.trace().unwrap_or(""), "timer {}", fault);
                }
            }
            Action::Recurring {
                schedule,
                mut callback,
            } => {
                if let Err(fault) = recovery::catch(|| callback()) {
                    tracing::error!(trace = fault.trace().unwrap_or(""), "timer {}", fault);
                }
                if !timer.is_stopped() {
                    self.handle.arm_recurring(timer, schedule, callback);
                }
            }
        }
    }

    /// Cancel every armed timer.
    pub fn stop_all(&self) {
        self.handle.cancel.cancel();
    }
}

impl Drop for TimerDispatcher {
    fn drop(&mut self) {
        self.stop_all();
    }
}

/// Cloneable scheduling side of a [`TimerDispatcher`].
#[derive(Debug, Clone)]
pub struct TimerHandle {
    tx: mpsc::Sender<Fired>,
    enabled: bool,
    cancel: CancellationToken,
}

impl TimerHandle {
    /// Run `callback` once after `delay`.
    pub fn after<F>(&self, delay: Duration, callback: F) -> Result<Timer>
    where
        F: FnOnce() + Send + 'static,
    {
        let timer = self.new_timer()?;
        self.arm(
            delay,
            Fired {
                timer: timer.clone(),
                action: Action::Once(Box::new(callback)),
            },
        );
        Ok(timer)
    }

    /// Run `callback` at every time `schedule` yields.
    pub fn schedule<S, F>(&self, schedule: S, callback: F) -> Result<Timer>
    where
        S: Schedule,
        F: FnMut() + Send + 'static,
    {
        let timer = self.new_timer()?;
        self.arm_recurring(timer.clone(), Arc::new(schedule), Box::new(callback));
        Ok(timer)
    }

    fn new_timer(&self) -> Result<Timer> {
        if !self.enabled {
            return Err(Error::Unavailable("timer dispatcher"));
        }
        Ok(Timer::new(self.cancel.child_token()))
    }

    fn arm_recurring(
        &self,
        timer: Timer,
        schedule: Arc<dyn Schedule>,
        callback: Box<dyn FnMut() + Send>,
    ) {
        let now = Utc::now();
        let Some(next) = schedule.next_after(now) else {
            tracing::debug!("schedule exhausted, timer ends");
            return;
        };
        let delay = (next - now).to_std().unwrap_or(Duration::ZERO);
        self.arm(
            delay,
            Fired {
                timer,
                action: Action::Recurring { schedule, callback },
            },
        );
    }

    fn arm(&self, delay: Duration, fired: Fired) {
        let tx = self.tx.clone();
        let token = fired.timer.token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    if tx.send(fired).await.is_err() {
                        tracing::debug!("timer dispatcher gone, firing dropped");
                    }
                }
            }
        });
    }
}
