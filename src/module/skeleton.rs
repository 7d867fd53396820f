//! Skeleton: the per-module event loop.
//!
//! State machine: `Created → Running → Draining → Terminated`.

use std::fmt;

use tokio_util::sync::CancellationToken;

use super::context::ModuleContext;
use crate::chanrpc::{Args, CallInfo, Callback, Client, Handler, ReplyInfo, Server, ServerRef, Shape};
use crate::timer::{Fired, Schedule, Timer, TimerDispatcher};
use crate::types::{Error, FunctionId, ModuleConfig, ModuleId, Result};
use crate::worker::{Completion, LinearContext, WorkerPool};

/// Lifecycle state of a [`Skeleton`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkeletonState {
    Created,
    Running,
    Draining,
    Terminated,
}

impl fmt::Display for SkeletonState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SkeletonState::Created => "created",
            SkeletonState::Running => "running",
            SkeletonState::Draining => "draining",
            SkeletonState::Terminated => "terminated",
        })
    }
}

/// A console command registered by a module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandInfo {
    pub name: String,
    pub help: String,
}

/// A module's commands together with the server that executes them.
#[derive(Debug, Clone)]
pub struct CommandSet {
    pub entries: Vec<CommandInfo>,
    pub server: ServerRef,
}

/// The input source that became ready first.
///
/// When several sources are ready at once the choice among them is random;
/// only each source's own FIFO order is guaranteed.
#[derive(Debug)]
pub enum Ready {
    Shutdown,
    Call(CallInfo),
    Command(CallInfo),
    Reply(ReplyInfo),
    Completion(Completion),
    Timer(Fired),
}

/// Per-module scheduler.
#[derive(Debug)]
pub struct Skeleton {
    id: ModuleId,
    name: String,
    server: Server,
    command_server: Server,
    commands: Vec<CommandInfo>,
    client: Client,
    workers: WorkerPool,
    timers: TimerDispatcher,
    state: SkeletonState,
}

impl Skeleton {
    pub fn new(name: impl Into<String>, config: &ModuleConfig) -> Self {
        let name = name.into();
        let server = Server::new(config.chanrpc_len)
            .with_name(name.clone())
            .with_slow_threshold(config.slow_handler_threshold);
        let command_server = Server::new(config.command_len)
            .with_name(format!("{}.command", name))
            .with_slow_threshold(config.slow_handler_threshold);

        Self {
            id: ModuleId::new(),
            name,
            server,
            command_server,
            commands: Vec::new(),
            client: Client::new(config.async_call_len),
            workers: WorkerPool::new(config.go_len, config.worker_threads),
            timers: TimerDispatcher::new(config.timer_dispatcher_len),
            state: SkeletonState::Created,
        }
    }

    pub fn id(&self) -> &ModuleId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> SkeletonState {
        self.state
    }

    /// Register a data-plane handler. Fails once [`Skeleton::server_ref`] was taken.
    pub fn register_chanrpc(&mut self, id: impl Into<FunctionId>, handler: Handler) -> Result<()> {
        self.server.register(id, handler)
    }

    /// Register a console command. Command handlers return their output as
    /// a `String`, so only single-return handlers are accepted.
    pub fn register_command(
        &mut self,
        name: impl Into<String>,
        help: impl Into<String>,
        handler: Handler,
    ) -> Result<()> {
        let name = name.into();
        if handler.shape() != Shape::SingleReturn {
            return Err(Error::ShapeMismatch {
                id: FunctionId::from(name),
                expected: Shape::SingleReturn,
                found: handler.shape(),
            });
        }
        self.command_server.register(name.clone(), handler)?;
        self.commands.push(CommandInfo {
            name,
            help: help.into(),
        });
        Ok(())
    }

    /// Handle other modules use to call this one. Freezes the data-plane registry.
    pub fn server_ref(&self) -> ServerRef {
        self.server.handle()
    }

    /// Registered commands, for a console. Freezes the command registry.
    pub fn command_set(&self) -> CommandSet {
        CommandSet {
            entries: self.commands.clone(),
            server: self.command_server.handle(),
        }
    }

    /// Scheduling handle for handler code.
    pub fn context(&self) -> ModuleContext {
        ModuleContext::new(
            self.name.clone(),
            self.timers.handle(),
            self.workers.handle(),
            self.client.caller(),
        )
    }

    /// Rebind the module client to `target`, then issue an asynchronous call.
    ///
    /// Replies already in flight from the previous target still arrive and
    /// run their own callbacks.
    pub fn async_call(
        &mut self,
        target: &ServerRef,
        id: impl Into<FunctionId>,
        args: Args,
        callback: Callback,
    ) {
        self.client.attach(target.clone());
        self.client.async_call(id, args, callback);
    }

    pub fn after<F>(&self, delay: std::time::Duration, callback: F) -> Result<Timer>
    where
        F: FnOnce() + Send + 'static,
    {
        self.timers.handle().after(delay, callback)
    }

    pub fn schedule<S, F>(&self, schedule: S, callback: F) -> Result<Timer>
    where
        S: Schedule,
        F: FnMut() + Send + 'static,
    {
        self.timers.handle().schedule(schedule, callback)
    }

    pub fn go<T, W, D>(&self, work: W, done: D) -> Result<()>
    where
        T: Send + 'static,
        W: FnOnce() -> T + Send + 'static,
        D: FnOnce(Result<T>) + Send + 'static,
    {
        self.workers.handle().go(work, done)
    }

    pub fn linear(&self) -> Result<LinearContext> {
        self.workers.handle().linear()
    }

    /// Run the loop until `shutdown` fires, then drain.
    pub async fn run(&mut self, shutdown: &CancellationToken) -> Result<()> {
        if self.state != SkeletonState::Created {
            return Err(Error::validation(format!(
                "module {} cannot run: state is {}",
                self.name, self.state
            )));
        }
        self.state = SkeletonState::Running;
        tracing::info!(module = %self.name, id = %self.id, "module_started");

        loop {
            let ready = self.next_ready(shutdown).await;
            if !self.dispatch(ready).await {
                break;
            }
        }

        self.drain().await;
        Ok(())
    }

    /// Wait for the first ready input source.
    pub async fn next_ready(&mut self, shutdown: &CancellationToken) -> Ready {
        tokio::select! {
            _ = shutdown.cancelled() => Ready::Shutdown,
            Some(reply) = self.client.next_reply() => Ready::Reply(reply),
            Some(call) = self.server.next_call() => Ready::Call(call),
            Some(call) = self.command_server.next_call() => Ready::Command(call),
            Some(completion) = self.workers.next_completion() => Ready::Completion(completion),
            Some(fired) = self.timers.next_fired() => Ready::Timer(fired),
        }
    }

    /// Handle one ready item to completion. Returns `false` on shutdown.
    pub async fn dispatch(&mut self, ready: Ready) -> bool {
        match ready {
            Ready::Shutdown => return false,
            Ready::Call(call) => self.server.exec(call).await,
            Ready::Command(call) => self.command_server.exec(call).await,
            Ready::Reply(reply) => self.client.dispatch(reply),
            Ready::Completion(completion) => self.workers.dispatch(completion),
            Ready::Timer(fired) => self.timers.fire(fired),
        }
        true
    }

    /// Close both servers, then flush workers and client until both are idle.
    ///
    /// Flushing one can make the other busy again (a completion issuing an
    /// asynchronous call), hence the loop.
    pub async fn drain(&mut self) {
        self.state = SkeletonState::Draining;
        tracing::info!(module = %self.name, "module_draining");

        self.command_server.close().await;
        self.server.close().await;

        while !self.workers.is_idle() || !self.client.is_idle() {
            self.workers.close().await;
            self.client.close().await;
        }

        self.timers.stop_all();
        self.state = SkeletonState::Terminated;
        tracing::info!(module = %self.name, "module_terminated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chanrpc::downcast;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn config() -> ModuleConfig {
        ModuleConfig {
            chanrpc_len: 8,
            command_len: 8,
            async_call_len: 8,
            go_len: 8,
            timer_dispatcher_len: 8,
            ..ModuleConfig::default()
        }
    }

    #[test]
    fn test_command_must_be_single_return() {
        let mut skeleton = Skeleton::new("game", &config());
        let err = skeleton
            .register_command("reset", "reset state", Handler::no_return(|_| Ok(())))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::ShapeMismatch {
                expected: Shape::SingleReturn,
                found: Shape::NoReturn,
                ..
            }
        ));
        assert!(skeleton.command_set().entries.is_empty());
    }

    #[test]
    fn test_duplicate_chanrpc_registration() {
        let mut skeleton = Skeleton::new("game", &config());
        skeleton
            .register_chanrpc("ping", Handler::no_return(|_| Ok(())))
            .unwrap();
        let err = skeleton
            .register_chanrpc("ping", Handler::no_return(|_| Ok(())))
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyRegistered(_)));
    }

    #[tokio::test]
    async fn test_run_serves_calls_until_shutdown() {
        let mut skeleton = Skeleton::new("game", &config());
        skeleton
            .register_chanrpc("double", Handler::single(|args: Args| Ok(*args.get::<u32>(0)? * 2)))
            .unwrap();
        let handle = skeleton.server_ref();
        let shutdown = CancellationToken::new();

        let token = shutdown.clone();
        let task = tokio::spawn(async move {
            skeleton.run(&token).await.unwrap();
            skeleton
        });

        let value = handle.call1("double", crate::args![21u32]).await.unwrap();
        assert_eq!(downcast::<u32>(value).unwrap(), 42);

        shutdown.cancel();
        let skeleton = task.await.unwrap();
        assert_eq!(skeleton.state(), SkeletonState::Terminated);
        assert!(handle.is_closed());
    }

    #[tokio::test]
    async fn test_run_twice_is_rejected() {
        let mut skeleton = Skeleton::new("game", &config());
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        skeleton.run(&shutdown).await.unwrap();
        assert!(skeleton.run(&shutdown).await.is_err());
    }

    #[tokio::test]
    async fn test_timer_and_worker_callbacks_run_on_loop() {
        let mut skeleton = Skeleton::new("game", &config());
        let hits = Arc::new(AtomicUsize::new(0));
        let ctx = skeleton.context();
        let shutdown = CancellationToken::new();

        let counter = Arc::clone(&hits);
        ctx.after(Duration::from_millis(5), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        let counter = Arc::clone(&hits);
        let token = shutdown.clone();
        ctx.go(
            || 1usize,
            move |r| {
                counter.fetch_add(r.unwrap(), Ordering::SeqCst);
                token.cancel();
            },
        )
        .unwrap();

        let token = shutdown.clone();
        let waiter = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            token.cancel();
        });
        skeleton.run(&shutdown).await.unwrap();
        waiter.abort();

        assert!(hits.load(Ordering::SeqCst) >= 1);
        assert!(skeleton.workers.is_idle());
    }

    #[tokio::test]
    async fn test_drain_flushes_pending_async_calls() {
        let mut target = Server::new(4);
        target
            .register("noop", Handler::no_return(|_| Ok(())))
            .unwrap();
        let target_ref = target.handle();

        let mut skeleton = Skeleton::new("game", &config());
        let settled = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let settled = Arc::clone(&settled);
            skeleton.async_call(
                &target_ref,
                "noop",
                Args::new(),
                Callback::no_return(move |_| {
                    settled.fetch_add(1, Ordering::SeqCst);
                }),
            );
        }
        assert_eq!(skeleton.client.pending(), 3);

        // The target never serves; closing it fails the queued calls.
        target.close().await;
        skeleton.drain().await;

        assert_eq!(settled.load(Ordering::SeqCst), 3);
        assert_eq!(skeleton.state(), SkeletonState::Terminated);
    }
}
