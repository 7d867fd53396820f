//! Call and reply envelopes carried on the queues.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;

use super::registry::{Handler, Shape};
use super::value::{downcast, Args, Ret, Value};
use crate::types::{FunctionId, Result};

/// A queued call. The handler is resolved when the call is built.
pub struct CallInfo {
    pub(crate) id: FunctionId,
    pub(crate) handler: Arc<Handler>,
    pub(crate) args: Args,
    pub(crate) reply_to: Option<mpsc::Sender<ReplyInfo>>,
    pub(crate) callback: Option<Callback>,
    pub(crate) seq: u64,
}

impl CallInfo {
    pub(crate) fn new(id: FunctionId, handler: Arc<Handler>, args: Args) -> Self {
        Self {
            id,
            handler,
            args,
            reply_to: None,
            callback: None,
            seq: 0,
        }
    }

    pub(crate) fn reply_to(mut self, tx: mpsc::Sender<ReplyInfo>) -> Self {
        self.reply_to = Some(tx);
        self
    }

    pub(crate) fn with_callback(mut self, callback: Callback) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Tag echoed back on the reply.
    pub(crate) fn with_seq(mut self, seq: u64) -> Self {
        self.seq = seq;
        self
    }

    pub fn function(&self) -> &FunctionId {
        &self.id
    }

    /// True when the caller expects no reply (fire-and-forget).
    pub fn is_oneway(&self) -> bool {
        self.reply_to.is_none()
    }
}

impl fmt::Debug for CallInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallInfo")
            .field("id", &self.id)
            .field("shape", &self.handler.shape())
            .field("args", &self.args)
            .field("oneway", &self.is_oneway())
            .finish_non_exhaustive()
    }
}

/// Outcome of a call, travelling back with the caller's callback.
pub struct ReplyInfo {
    pub(crate) result: Result<Ret>,
    pub(crate) callback: Option<Callback>,
    pub(crate) seq: u64,
}

impl ReplyInfo {
    pub(crate) fn new(result: Result<Ret>, callback: Option<Callback>) -> Self {
        Self {
            result,
            callback,
            seq: 0,
        }
    }

    pub(crate) fn with_seq(mut self, seq: u64) -> Self {
        self.seq = seq;
        self
    }

    pub fn result(&self) -> &Result<Ret> {
        &self.result
    }

    pub fn into_result(self) -> Result<Ret> {
        self.result
    }
}

impl fmt::Debug for ReplyInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplyInfo")
            .field("result", &self.result)
            .field("has_callback", &self.callback.is_some())
            .field("seq", &self.seq)
            .finish()
    }
}

type NoReturnCb = dyn FnOnce(Result<()>) + Send;
type SingleReturnCb = dyn FnOnce(Result<Value>) + Send;
type MultiReturnCb = dyn FnOnce(Result<Vec<Value>>) + Send;

/// Continuation of an asynchronous call. The variant fixes the expected
/// return shape of the target handler.
pub enum Callback {
    NoReturn(Box<NoReturnCb>),
    SingleReturn(Box<SingleReturnCb>),
    MultiReturn(Box<MultiReturnCb>),
}

impl Callback {
    pub fn no_return<F>(f: F) -> Self
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        Callback::NoReturn(Box::new(f))
    }

    pub fn single<F>(f: F) -> Self
    where
        F: FnOnce(Result<Value>) + Send + 'static,
    {
        Callback::SingleReturn(Box::new(f))
    }

    /// Single-return callback receiving the value downcast to `T`.
    pub fn single_as<T, F>(f: F) -> Self
    where
        T: Any,
        F: FnOnce(Result<T>) + Send + 'static,
    {
        Callback::SingleReturn(Box::new(move |result: Result<Value>| {
            f(result.and_then(downcast::<T>))
        }))
    }

    pub fn multi<F>(f: F) -> Self
    where
        F: FnOnce(Result<Vec<Value>>) + Send + 'static,
    {
        Callback::MultiReturn(Box::new(f))
    }

    pub fn shape(&self) -> Shape {
        match self {
            Callback::NoReturn(_) => Shape::NoReturn,
            Callback::SingleReturn(_) => Shape::SingleReturn,
            Callback::MultiReturn(_) => Shape::MultiReturn,
        }
    }

    pub(crate) fn invoke(self, result: Result<Ret>) {
        match self {
            Callback::NoReturn(cb) => cb(result.and_then(Ret::into_unit)),
            Callback::SingleReturn(cb) => cb(result.and_then(Ret::into_single)),
            Callback::MultiReturn(cb) => cb(result.and_then(Ret::into_multi)),
        }
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Callback").field(&self.shape()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Error;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_callback_receives_matching_shape() {
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        let cb = Callback::single_as::<u32, _>(move |result| {
            *sink.lock().unwrap() = Some(result.unwrap());
        });
        assert_eq!(cb.shape(), Shape::SingleReturn);

        cb.invoke(Ok(Ret::Single(Box::new(5u32))));
        assert_eq!(*seen.lock().unwrap(), Some(5));
    }

    #[test]
    fn test_callback_receives_error() {
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        Callback::no_return(move |result| {
            *sink.lock().unwrap() = Some(result.unwrap_err().to_string());
        })
        .invoke(Err(Error::ServerClosed));
        assert_eq!(seen.lock().unwrap().as_deref(), Some("server closed"));
    }

    #[test]
    fn test_single_as_type_mismatch() {
        let seen = Arc::new(Mutex::new(false));
        let sink = Arc::clone(&seen);
        Callback::single_as::<String, _>(move |result| {
            *sink.lock().unwrap() = matches!(result, Err(Error::TypeMismatch(_)));
        })
        .invoke(Ok(Ret::Single(Box::new(1u8))));
        assert!(*seen.lock().unwrap());
    }
}
