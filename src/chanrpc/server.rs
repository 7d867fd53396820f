//! Call server: owns a registry and the queue calls arrive on.
//!
//! The `Server` value holds the receiving end and executes calls on
//! whichever task drains it (a module loop, or [`Server::serve`]). Callers
//! hold a [`ServerRef`]: the frozen registry plus the sending end.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::client::Client;
use super::envelope::{CallInfo, ReplyInfo};
use super::registry::{FunctionRegistry, Handler};
use super::value::{Args, Value};
use crate::recovery;
use crate::types::{Error, FunctionId, Result};

/// Server half of a call queue.
#[derive(Debug)]
pub struct Server {
    name: String,
    registry: Arc<FunctionRegistry>,
    tx: mpsc::Sender<CallInfo>,
    rx: mpsc::Receiver<CallInfo>,
    slow_threshold: Option<Duration>,
}

impl Server {
    /// Create a server whose queue holds up to `capacity` calls (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            name: "chanrpc".to_string(),
            registry: Arc::new(FunctionRegistry::new()),
            tx,
            rx,
            slow_threshold: None,
        }
    }

    /// Label used in logs.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Log a warning for handlers running longer than `threshold`.
    pub fn with_slow_threshold(mut self, threshold: Duration) -> Self {
        self.slow_threshold = Some(threshold);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register a handler. Must happen before the first [`Server::handle`].
    pub fn register(&mut self, id: impl Into<FunctionId>, handler: Handler) -> Result<()> {
        let id = id.into();
        match Arc::get_mut(&mut self.registry) {
            Some(registry) => registry.register(id, handler),
            None => Err(Error::RegistryFrozen(id)),
        }
    }

    pub fn registry(&self) -> &FunctionRegistry {
        &self.registry
    }

    /// Shareable handle. Freezes the registry.
    pub fn handle(&self) -> ServerRef {
        ServerRef {
            registry: Arc::clone(&self.registry),
            tx: self.tx.clone(),
        }
    }

    /// Open a client attached to this server.
    pub fn open(&self, async_capacity: usize) -> Client {
        self.handle().open(async_capacity)
    }

    /// Number of calls currently queued.
    pub fn queued(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    /// Wait for the next queued call. `None` once closed and drained.
    pub async fn next_call(&mut self) -> Option<CallInfo> {
        self.rx.recv().await
    }

    pub fn try_next_call(&mut self) -> Option<CallInfo> {
        self.rx.try_recv().ok()
    }

    /// Run one call and deliver its reply.
    ///
    /// A panicking handler becomes an error reply; nothing escapes to the
    /// calling task.
    pub async fn exec(&self, call: CallInfo) {
        let CallInfo {
            id,
            handler,
            args,
            reply_to,
            callback,
            seq,
        } = call;

        let started = Instant::now();
        let result = recovery::catch(|| handler.invoke(args)).and_then(|result| result);
        let elapsed = started.elapsed();

        if let Some(threshold) = self.slow_threshold {
            if elapsed > threshold {
                tracing::warn!(
                    server = %self.name,
                    function = %id,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "slow handler"
                );
            }
        }

        if let Err(err @ Error::Fault { .. }) = &result {
            tracing::error!(
                server = %self.name,
                function = %id,
                trace = err.trace().unwrap_or(""),
                "{}",
                err
            );
        } else if let (Err(err), None) = (&result, &reply_to) {
            tracing::warn!(server = %self.name, function = %id, "oneway call failed: {}", err);
        }

        let reply = ReplyInfo::new(result, callback).with_seq(seq);
        deliver(&self.name, &id, reply_to, reply).await;
    }

    /// Close the queue and fail every call still in it with `ServerClosed`.
    pub async fn close(&mut self) {
        self.rx.close();
        let mut drained = 0usize;
        while let Some(call) = self.rx.recv().await {
            drained += 1;
            deliver(
                &self.name,
                &call.id,
                call.reply_to,
                ReplyInfo::new(Err(Error::ServerClosed), call.callback).with_seq(call.seq),
            )
            .await;
        }
        tracing::debug!(server = %self.name, drained, "server closed");
    }

    /// Standalone serve loop for a server not embedded in a module.
    pub async fn serve(&mut self, shutdown: &CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                call = self.rx.recv() => match call {
                    Some(call) => self.exec(call).await,
                    None => break,
                },
            }
        }
        self.close().await;
    }
}

impl Drop for Server {
    /// A server dropped without [`Server::close`] still fails what is queued.
    fn drop(&mut self) {
        self.rx.close();
        let mut drained = 0usize;
        while let Ok(call) = self.rx.try_recv() {
            drained += 1;
            let Some(tx) = call.reply_to else {
                continue;
            };
            let reply = ReplyInfo::new(Err(Error::ServerClosed), call.callback).with_seq(call.seq);
            if tx.try_send(reply).is_err() {
                tracing::warn!(server = %self.name, function = %call.id, "reply destination unavailable, reply dropped");
            }
        }
        if drained > 0 {
            tracing::debug!(server = %self.name, drained, "server dropped with queued calls");
        }
    }
}

/// Post a reply. An abandoned destination is logged, never propagated.
async fn deliver(
    server: &str,
    id: &FunctionId,
    reply_to: Option<mpsc::Sender<ReplyInfo>>,
    reply: ReplyInfo,
) {
    let Some(tx) = reply_to else {
        return;
    };
    if tx.send(reply).await.is_err() {
        tracing::warn!(server, function = %id, "reply destination closed, reply dropped");
    }
}

/// Cloneable handle to a [`Server`], safe to use from any task.
#[derive(Debug, Clone)]
pub struct ServerRef {
    registry: Arc<FunctionRegistry>,
    tx: mpsc::Sender<CallInfo>,
}

impl ServerRef {
    pub fn registry(&self) -> &FunctionRegistry {
        &self.registry
    }

    /// True once the owning server closed its queue.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Open a client attached to this server.
    pub fn open(&self, async_capacity: usize) -> Client {
        let mut client = Client::new(async_capacity);
        client.attach(self.clone());
        client
    }

    /// Fire-and-forget. Waits for queue space; a closed server discards the call.
    pub async fn send(&self, id: impl Into<FunctionId>, args: Args) -> Result<()> {
        let id = id.into();
        let handler = self
            .registry
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotRegistered(id.clone()))?;
        if self.tx.send(CallInfo::new(id, handler, args)).await.is_err() {
            tracing::debug!("server closed, oneway call discarded");
        }
        Ok(())
    }

    pub async fn call0(&self, id: impl Into<FunctionId>, args: Args) -> Result<()> {
        self.open(0).call0(id, args).await
    }

    pub async fn call1(&self, id: impl Into<FunctionId>, args: Args) -> Result<Value> {
        self.open(0).call1(id, args).await
    }

    pub async fn calln(&self, id: impl Into<FunctionId>, args: Args) -> Result<Vec<Value>> {
        self.open(0).calln(id, args).await
    }

    /// Enqueue, waiting for space.
    pub(crate) async fn enqueue(&self, call: CallInfo) -> Result<()> {
        self.tx.send(call).await.map_err(|_| Error::ServerClosed)
    }

    /// Enqueue without waiting. Hands the call back on failure.
    pub(crate) fn try_enqueue(&self, call: CallInfo) -> std::result::Result<(), (Error, CallInfo)> {
        self.tx.try_send(call).map_err(|err| match err {
            mpsc::error::TrySendError::Full(call) => (Error::QueueFull, call),
            mpsc::error::TrySendError::Closed(call) => (Error::ServerClosed, call),
        })
    }
}
