//! Scheduling handle passed to module handler code.

use std::time::Duration;

use crate::chanrpc::{Args, AsyncCaller, Callback, ServerRef};
use crate::timer::{Schedule, Timer, TimerHandle};
use crate::types::{FunctionId, Result};
use crate::worker::{LinearContext, WorkerHandle};

/// Cloneable handle through which handlers schedule work.
///
/// Every callback registered through it (timer callbacks, worker
/// completions, asynchronous-call callbacks) runs later on the owning
/// module's loop, never on the thread that produced the event.
#[derive(Debug, Clone)]
pub struct ModuleContext {
    module: String,
    timers: TimerHandle,
    workers: WorkerHandle,
    caller: AsyncCaller,
}

impl ModuleContext {
    pub(crate) fn new(
        module: String,
        timers: TimerHandle,
        workers: WorkerHandle,
        caller: AsyncCaller,
    ) -> Self {
        Self {
            module,
            timers,
            workers,
            caller,
        }
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    /// Run `callback` once on the module loop after `delay`.
    pub fn after<F>(&self, delay: Duration, callback: F) -> Result<Timer>
    where
        F: FnOnce() + Send + 'static,
    {
        self.timers.after(delay, callback)
    }

    /// Run `callback` on the module loop at every time `schedule` yields.
    pub fn schedule<S, F>(&self, schedule: S, callback: F) -> Result<Timer>
    where
        S: Schedule,
        F: FnMut() + Send + 'static,
    {
        self.timers.schedule(schedule, callback)
    }

    /// Offload `work` to the worker pool; `done` runs on the module loop.
    pub fn go<T, W, D>(&self, work: W, done: D) -> Result<()>
    where
        T: Send + 'static,
        W: FnOnce() -> T + Send + 'static,
        D: FnOnce(Result<T>) + Send + 'static,
    {
        self.workers.go(work, done)
    }

    pub fn linear(&self) -> Result<LinearContext> {
        self.workers.linear()
    }

    /// Asynchronous call to another module's server. The reply is
    /// dispatched on this module's loop.
    pub fn async_call(
        &self,
        target: &ServerRef,
        id: impl Into<FunctionId>,
        args: Args,
        callback: Callback,
    ) {
        self.caller.call_on(target, id, args, callback);
    }

    /// Asynchronous calls issued by this module and not yet dispatched.
    pub fn pending_calls(&self) -> usize {
        self.caller.pending()
    }
}
