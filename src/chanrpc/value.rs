//! Opaque call payloads.

use std::any::{type_name, Any};
use std::fmt;

use crate::types::{Error, Result};

/// An opaque, sendable value carried through a call.
pub type Value = Box<dyn Any + Send>;

/// Recover a concrete value from an opaque one.
pub fn downcast<T: Any>(value: Value) -> Result<T> {
    value
        .downcast::<T>()
        .map(|boxed| *boxed)
        .map_err(|_| Error::TypeMismatch(type_name::<T>()))
}

/// Build an [`Args`] list from expressions.
///
/// ```
/// let args = chanrpc::args![1i32, "two".to_string()];
/// assert_eq!(args.len(), 2);
/// ```
#[macro_export]
macro_rules! args {
    () => { $crate::chanrpc::Args::new() };
    ($($value:expr),+ $(,)?) => {
        $crate::chanrpc::Args::from(vec![$(Box::new($value) as $crate::chanrpc::Value),+])
    };
}

/// Ordered argument list of a call.
///
/// Slots become empty once taken; indices of the remaining arguments are
/// stable.
#[derive(Default)]
pub struct Args(Vec<Option<Value>>);

impl Args {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Append an argument.
    pub fn with<T: Any + Send>(mut self, value: T) -> Self {
        self.0.push(Some(Box::new(value)));
        self
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Borrow argument `index` as `T`.
    pub fn get<T: Any>(&self, index: usize) -> Result<&T> {
        let slot = self
            .0
            .get(index)
            .and_then(Option::as_ref)
            .ok_or(Error::MissingArgument(index))?;
        slot.downcast_ref::<T>().ok_or(Error::ArgumentType {
            index,
            expected: type_name::<T>(),
        })
    }

    /// Move argument `index` out as `T`. A type mismatch leaves the slot intact.
    pub fn take<T: Any>(&mut self, index: usize) -> Result<T> {
        let slot = self.0.get_mut(index).ok_or(Error::MissingArgument(index))?;
        match slot.take() {
            None => Err(Error::MissingArgument(index)),
            Some(value) => match value.downcast::<T>() {
                Ok(boxed) => Ok(*boxed),
                Err(value) => {
                    *slot = Some(value);
                    Err(Error::ArgumentType {
                        index,
                        expected: type_name::<T>(),
                    })
                }
            },
        }
    }
}

impl From<Vec<Value>> for Args {
    fn from(values: Vec<Value>) -> Self {
        Self(values.into_iter().map(Some).collect())
    }
}

impl fmt::Debug for Args {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Args").field("len", &self.0.len()).finish()
    }
}

/// What a handler produced.
pub enum Ret {
    Unit,
    Single(Value),
    Multi(Vec<Value>),
}

impl Ret {
    pub(crate) fn into_unit(self) -> Result<()> {
        match self {
            Ret::Unit => Ok(()),
            _ => Err(Error::internal("expected no return value")),
        }
    }

    pub(crate) fn into_single(self) -> Result<Value> {
        match self {
            Ret::Single(value) => Ok(value),
            _ => Err(Error::internal("expected a single return value")),
        }
    }

    pub(crate) fn into_multi(self) -> Result<Vec<Value>> {
        match self {
            Ret::Multi(values) => Ok(values),
            _ => Err(Error::internal("expected multiple return values")),
        }
    }
}

impl fmt::Debug for Ret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ret::Unit => f.write_str("Unit"),
            Ret::Single(_) => f.write_str("Single(..)"),
            Ret::Multi(values) => write!(f, "Multi(len={})", values.len()),
        }
    }
}
