//! Function registry: identifier to handler, tagged by shape.
//!
//! Handlers are validated once, at registration. Calls resolve a handler
//! together with the shape the caller expects, so nothing inspects types
//! dynamically on the execution path.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::value::{Args, Ret, Value};
use crate::types::{Error, FunctionId, Result};

/// Return arity of a handler or callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Shape {
    NoReturn,
    SingleReturn,
    MultiReturn,
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Shape::NoReturn => "no-return",
            Shape::SingleReturn => "single-return",
            Shape::MultiReturn => "multi-return",
        })
    }
}

type NoReturnFn = dyn Fn(Args) -> Result<()> + Send + Sync;
type SingleReturnFn = dyn Fn(Args) -> Result<Value> + Send + Sync;
type MultiReturnFn = dyn Fn(Args) -> Result<Vec<Value>> + Send + Sync;

/// A registered function in one of the three supported shapes.
pub enum Handler {
    NoReturn(Box<NoReturnFn>),
    SingleReturn(Box<SingleReturnFn>),
    MultiReturn(Box<MultiReturnFn>),
}

impl Handler {
    pub fn no_return<F>(f: F) -> Self
    where
        F: Fn(Args) -> Result<()> + Send + Sync + 'static,
    {
        Handler::NoReturn(Box::new(f))
    }

    /// Single-return handler; the returned `T` is boxed into a [`Value`].
    pub fn single<F, T>(f: F) -> Self
    where
        F: Fn(Args) -> Result<T> + Send + Sync + 'static,
        T: Any + Send,
    {
        Handler::SingleReturn(Box::new(move |args| f(args).map(|v| Box::new(v) as Value)))
    }

    pub fn multi<F>(f: F) -> Self
    where
        F: Fn(Args) -> Result<Vec<Value>> + Send + Sync + 'static,
    {
        Handler::MultiReturn(Box::new(f))
    }

    pub fn shape(&self) -> Shape {
        match self {
            Handler::NoReturn(_) => Shape::NoReturn,
            Handler::SingleReturn(_) => Shape::SingleReturn,
            Handler::MultiReturn(_) => Shape::MultiReturn,
        }
    }

    pub(crate) fn invoke(&self, args: Args) -> Result<Ret> {
        match self {
            Handler::NoReturn(f) => f(args).map(|()| Ret::Unit),
            Handler::SingleReturn(f) => f(args).map(Ret::Single),
            Handler::MultiReturn(f) => f(args).map(Ret::Multi),
        }
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Handler").field(&self.shape()).finish()
    }
}

/// Identifier → handler map. Built before serving, read-only afterwards.
#[derive(Debug, Default)]
pub struct FunctionRegistry {
    functions: HashMap<FunctionId, Arc<Handler>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `id`. Each identifier may be registered once.
    pub fn register(&mut self, id: impl Into<FunctionId>, handler: Handler) -> Result<()> {
        let id = id.into();
        if self.functions.contains_key(&id) {
            return Err(Error::AlreadyRegistered(id));
        }
        tracing::debug!(function = %id, shape = %handler.shape(), "registered function");
        self.functions.insert(id, Arc::new(handler));
        Ok(())
    }

    pub fn get(&self, id: &FunctionId) -> Option<&Arc<Handler>> {
        self.functions.get(id)
    }

    pub fn contains(&self, id: &FunctionId) -> bool {
        self.functions.contains_key(id)
    }

    /// Look up `id` and check it has the `expected` shape.
    pub fn resolve(&self, id: &FunctionId, expected: Shape) -> Result<Arc<Handler>> {
        let handler = self
            .functions
            .get(id)
            .ok_or_else(|| Error::NotRegistered(id.clone()))?;
        if handler.shape() != expected {
            return Err(Error::ShapeMismatch {
                id: id.clone(),
                expected,
                found: handler.shape(),
            });
        }
        Ok(Arc::clone(handler))
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chanrpc::downcast;

    fn double() -> Handler {
        Handler::single(|args: Args| Ok(*args.get::<i32>(0)? * 2))
    }

    #[test]
    fn test_register_duplicate() {
        let mut registry = FunctionRegistry::new();
        registry.register("double", double()).unwrap();

        let err = registry.register("double", double()).unwrap_err();
        assert!(matches!(err, Error::AlreadyRegistered(_)));
        assert!(err.to_string().contains("already registered"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_resolve_checks_shape() {
        let mut registry = FunctionRegistry::new();
        registry.register("double", double()).unwrap();

        let id = FunctionId::from("double");
        assert!(registry.resolve(&id, Shape::SingleReturn).is_ok());
        let err = registry.resolve(&id, Shape::MultiReturn).unwrap_err();
        assert!(matches!(
            err,
            Error::ShapeMismatch {
                expected: Shape::MultiReturn,
                found: Shape::SingleReturn,
                ..
            }
        ));
    }

    #[test]
    fn test_resolve_unknown() {
        let registry = FunctionRegistry::new();
        let err = registry
            .resolve(&FunctionId::from("missing"), Shape::NoReturn)
            .unwrap_err();
        assert_eq!(err.to_string(), "function missing: not registered");
    }

    #[test]
    fn test_invoke_each_shape() {
        let ret = double().invoke(crate::args![21i32]).unwrap();
        assert_eq!(downcast::<i32>(ret.into_single().unwrap()).unwrap(), 42);

        let unit = Handler::no_return(|_| Ok(()));
        assert!(unit.invoke(Args::new()).unwrap().into_unit().is_ok());

        let pair = Handler::multi(|_| Ok(vec![Box::new(1u8) as Value, Box::new(2u8)]));
        assert_eq!(pair.invoke(Args::new()).unwrap().into_multi().unwrap().len(), 2);
    }
}
