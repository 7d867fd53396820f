//! Call client: issues blocking and callback-based calls against one server.
//!
//! Backpressure differs by call kind. Synchronous calls wait for queue space;
//! asynchronous calls never wait: they are refused when too many are pending
//! and fail with `QueueFull` when the target queue is at capacity.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use super::envelope::{CallInfo, Callback, ReplyInfo};
use super::registry::Shape;
use super::server::ServerRef;
use super::value::{Args, Ret, Value};
use crate::recovery;
use crate::types::{Error, FunctionId, Result};

/// Issues calls against the attached server and collects their replies.
///
/// At most one synchronous call is outstanding at a time (the `&mut self`
/// receivers enforce it). Asynchronous replies arrive on a bounded channel
/// whose owner must feed them to [`Client::dispatch`].
#[derive(Debug)]
pub struct Client {
    server: Option<ServerRef>,
    sync_tx: mpsc::Sender<ReplyInfo>,
    sync_rx: mpsc::Receiver<ReplyInfo>,
    sync_seq: u64,
    caller: AsyncCaller,
    async_rx: mpsc::Receiver<ReplyInfo>,
}

impl Client {
    /// `async_capacity` bounds pending asynchronous calls; zero disables them.
    pub fn new(async_capacity: usize) -> Self {
        let (sync_tx, sync_rx) = mpsc::channel(1);
        let (async_tx, async_rx) = mpsc::channel(async_capacity.max(1));
        Self {
            server: None,
            sync_tx,
            sync_rx,
            sync_seq: 0,
            caller: AsyncCaller {
                tx: async_tx,
                capacity: async_capacity,
                pending: Arc::new(AtomicUsize::new(0)),
            },
            async_rx,
        }
    }

    /// Bind the call target, replacing any previous binding.
    ///
    /// Calls already queued on the previous target still reply here.
    pub fn attach(&mut self, server: ServerRef) {
        self.server = Some(server);
    }

    pub fn server(&self) -> Option<&ServerRef> {
        self.server.as_ref()
    }

    /// Handle for issuing asynchronous calls whose replies come back to this client.
    pub fn caller(&self) -> AsyncCaller {
        self.caller.clone()
    }

    pub async fn call0(&mut self, id: impl Into<FunctionId>, args: Args) -> Result<()> {
        self.call_sync(id.into(), args, Shape::NoReturn).await?.into_unit()
    }

    pub async fn call1(&mut self, id: impl Into<FunctionId>, args: Args) -> Result<Value> {
        self.call_sync(id.into(), args, Shape::SingleReturn)
            .await?
            .into_single()
    }

    pub async fn calln(&mut self, id: impl Into<FunctionId>, args: Args) -> Result<Vec<Value>> {
        self.call_sync(id.into(), args, Shape::MultiReturn)
            .await?
            .into_multi()
    }

    async fn call_sync(&mut self, id: FunctionId, args: Args, shape: Shape) -> Result<Ret> {
        let server = self.server.as_ref().ok_or(Error::NotAttached)?;
        let handler = server.registry().resolve(&id, shape)?;

        self.sync_seq += 1;
        let seq = self.sync_seq;
        let call = CallInfo::new(id.clone(), handler, args)
            .reply_to(self.sync_tx.clone())
            .with_seq(seq);
        server.enqueue(call).await?;

        // Replies to calls whose futures were dropped can still land here.
        loop {
            match self.sync_rx.recv().await {
                Some(reply) if reply.seq == seq => return reply.into_result(),
                Some(stale) => {
                    tracing::warn!(function = %id, "discarding stale synchronous reply: {:?}", stale);
                }
                None => return Err(Error::ServerClosed),
            }
        }
    }

    /// Asynchronous call against the attached server.
    ///
    /// `callback` always runs exactly once: inline if the call is refused for
    /// too many pending calls, otherwise from [`Client::dispatch`].
    pub fn async_call(&self, id: impl Into<FunctionId>, args: Args, callback: Callback) {
        self.caller.call(self.server.as_ref(), id.into(), args, callback);
    }

    /// Wait for the next asynchronous reply.
    pub async fn next_reply(&mut self) -> Option<ReplyInfo> {
        self.async_rx.recv().await
    }

    /// Settle one asynchronous reply: run its callback inside a recovery boundary.
    pub fn dispatch(&self, reply: ReplyInfo) {
        self.caller.settle();
        run_callback(reply);
    }

    /// Flush: dispatch replies until no asynchronous call is pending.
    pub async fn close(&mut self) {
        while !self.is_idle() {
            match self.async_rx.recv().await {
                Some(reply) => self.dispatch(reply),
                None => break,
            }
        }
    }

    pub fn is_idle(&self) -> bool {
        self.caller.pending() == 0
    }

    pub fn pending(&self) -> usize {
        self.caller.pending()
    }
}

fn run_callback(reply: ReplyInfo) {
    let ReplyInfo {
        result, callback, ..
    } = reply;
    let Some(callback) = callback else {
        return;
    };
    if let Err(fault) = recovery::catch(|| callback.invoke(result)) {
        tracing::error!(trace = fault.trace().unwrap_or(""), "callback {}", fault);
    }
}

/// Cloneable sending side of a [`Client`]'s asynchronous calls.
///
/// Every call it admits counts as pending on the owning client until the
/// reply is dispatched there.
#[derive(Debug, Clone)]
pub struct AsyncCaller {
    tx: mpsc::Sender<ReplyInfo>,
    capacity: usize,
    pending: Arc<AtomicUsize>,
}

impl AsyncCaller {
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Asynchronous call against `target`; see [`Client::async_call`].
    pub fn call_on(&self, target: &ServerRef, id: impl Into<FunctionId>, args: Args, callback: Callback) {
        self.call(Some(target), id.into(), args, callback);
    }

    fn call(&self, target: Option<&ServerRef>, id: FunctionId, args: Args, callback: Callback) {
        if !self.admit() {
            run_callback(ReplyInfo::new(
                Err(Error::TooManyCalls(self.capacity)),
                Some(callback),
            ));
            return;
        }

        let Some(server) = target else {
            return self.fail(Error::NotAttached, callback);
        };
        let handler = match server.registry().resolve(&id, callback.shape()) {
            Ok(handler) => handler,
            Err(err) => return self.fail(err, callback),
        };

        let call = CallInfo::new(id, handler, args)
            .reply_to(self.tx.clone())
            .with_callback(callback);
        if let Err((err, call)) = server.try_enqueue(call) {
            match call.callback {
                Some(callback) => self.fail(err, callback),
                None => self.settle(),
            }
        }
    }

    /// Reserve a pending slot, or refuse when all are taken.
    fn admit(&self) -> bool {
        let capacity = self.capacity;
        self.pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < capacity).then_some(n + 1)
            })
            .is_ok()
    }

    /// Post a locally produced error for an admitted call so the callback
    /// still runs from the reply loop.
    fn fail(&self, err: Error, callback: Callback) {
        if let Err(mpsc::error::TrySendError::Full(reply) | mpsc::error::TrySendError::Closed(reply)) =
            self.tx.try_send(ReplyInfo::new(Err(err), Some(callback)))
        {
            self.settle();
            run_callback(reply);
        }
    }

    fn settle(&self) {
        let _ = self
            .pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chanrpc::{downcast, Handler, Server};
    use std::sync::Mutex;

    fn adder() -> Server {
        let mut server = Server::new(8);
        server
            .register(
                "add",
                Handler::single(|args: Args| Ok(*args.get::<i32>(0)? + *args.get::<i32>(1)?)),
            )
            .unwrap();
        server
    }

    #[tokio::test]
    async fn test_not_attached() {
        let mut client = Client::new(1);
        assert!(matches!(
            client.call0("x", Args::new()).await,
            Err(Error::NotAttached)
        ));
    }

    #[tokio::test]
    async fn test_sync_shape_mismatch_checked_before_enqueue() {
        let server = adder();
        let mut client = server.open(1);

        let err = client.call0("add", crate::args![1i32, 2i32]).await.unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));
        assert_eq!(server.queued(), 0);
    }

    #[tokio::test]
    async fn test_async_call_round_trip_through_dispatch() {
        let mut server = adder();
        let mut client = server.open(2);
        let seen = Arc::new(Mutex::new(None));

        let sink = Arc::clone(&seen);
        client.async_call(
            "add",
            crate::args![2i32, 3i32],
            Callback::single_as::<i32, _>(move |r| *sink.lock().unwrap() = Some(r.unwrap())),
        );
        assert_eq!(client.pending(), 1);

        let call = server.next_call().await.unwrap();
        server.exec(call).await;

        let reply = client.next_reply().await.unwrap();
        client.dispatch(reply);
        assert_eq!(*seen.lock().unwrap(), Some(5));
        assert!(client.is_idle());
    }

    #[tokio::test]
    async fn test_async_unregistered_delivered_through_reply_channel() {
        let server = adder();
        let mut client = server.open(2);
        let seen = Arc::new(Mutex::new(None));

        let sink = Arc::clone(&seen);
        client.async_call(
            "missing",
            Args::new(),
            Callback::no_return(move |r| *sink.lock().unwrap() = Some(r.unwrap_err().to_string())),
        );
        assert!(seen.lock().unwrap().is_none());
        assert_eq!(client.pending(), 1);

        client.close().await;
        assert_eq!(
            seen.lock().unwrap().as_deref(),
            Some("function missing: not registered")
        );
    }

    #[tokio::test]
    async fn test_zero_capacity_refuses_every_call() {
        let server = adder();
        let client = server.open(0);
        let refused = Arc::new(Mutex::new(false));

        let sink = Arc::clone(&refused);
        client.async_call(
            "add",
            crate::args![1i32, 1i32],
            Callback::single(move |r| {
                *sink.lock().unwrap() = matches!(r, Err(Error::TooManyCalls(0)));
            }),
        );
        assert!(*refused.lock().unwrap());
        assert!(client.is_idle());
    }

    #[tokio::test]
    async fn test_panicking_callback_is_contained() {
        let mut server = adder();
        let mut client = server.open(1);
        client.async_call(
            "add",
            crate::args![1i32, 1i32],
            Callback::single(|_| panic!("callback blew up")),
        );

        let call = server.next_call().await.unwrap();
        server.exec(call).await;
        let reply = client.next_reply().await.unwrap();
        client.dispatch(reply);
        assert!(client.is_idle());
    }

    #[test]
    fn test_concurrent_admission_never_exceeds_capacity() {
        let mut server = Server::new(64);
        server.register("noop", Handler::no_return(|_| Ok(()))).unwrap();
        let target = server.handle();
        let client = Client::new(4);
        let refused = Arc::new(AtomicUsize::new(0));

        std::thread::scope(|scope| {
            for _ in 0..16 {
                let caller = client.caller();
                let target = target.clone();
                let refused = Arc::clone(&refused);
                scope.spawn(move || {
                    for _ in 0..4 {
                        let refused = Arc::clone(&refused);
                        caller.call_on(
                            &target,
                            "noop",
                            Args::new(),
                            Callback::no_return(move |r| {
                                if matches!(r, Err(Error::TooManyCalls(4))) {
                                    refused.fetch_add(1, Ordering::SeqCst);
                                }
                            }),
                        );
                    }
                });
            }
        });

        assert_eq!(client.pending(), 4);
        assert_eq!(server.queued(), 4);
        assert_eq!(refused.load(Ordering::SeqCst), 60);
    }

    #[tokio::test]
    async fn test_sync_call_values() {
        let mut server = adder();
        let handle = server.handle();
        let task = tokio::spawn(async move {
            let call = server.next_call().await.unwrap();
            server.exec(call).await;
        });

        let mut client = handle.open(0);
        let sum = client.call1("add", crate::args![40i32, 2i32]).await.unwrap();
        assert_eq!(downcast::<i32>(sum).unwrap(), 42);
        task.await.unwrap();
    }
}
