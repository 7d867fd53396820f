//! Strongly-typed identifiers.

use serde::{Deserialize, Serialize};
use std::any::TypeId;
use std::borrow::Cow;
use std::fmt;

/// Macro to define a UUID-backed ID newtype wrapper.
///
/// Generates: struct, `new()` (UUID v4), `from_string()`, `as_str()`, Default, Display.
macro_rules! define_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            pub fn new() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

            pub fn from_string(s: String) -> Result<Self, &'static str> {
                if s.is_empty() {
                    return Err(concat!(stringify!($name), " cannot be empty"));
                }
                Ok(Self(s))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

define_id!(ModuleId);

/// Identifier a handler is registered under.
///
/// Collision domain is a single server registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FunctionId {
    /// Named function, e.g. a console command.
    Name(Cow<'static, str>),
    /// Keyed by a Rust type, used by the message router.
    Type { id: TypeId, name: &'static str },
    /// Numeric message code.
    Code(u64),
}

impl FunctionId {
    /// Identifier for messages of type `T`.
    pub fn of<T: 'static>() -> Self {
        FunctionId::Type {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }
}

impl From<&'static str> for FunctionId {
    fn from(name: &'static str) -> Self {
        FunctionId::Name(Cow::Borrowed(name))
    }
}

impl From<String> for FunctionId {
    fn from(name: String) -> Self {
        FunctionId::Name(Cow::Owned(name))
    }
}

impl From<u64> for FunctionId {
    fn from(code: u64) -> Self {
        FunctionId::Code(code)
    }
}

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FunctionId::Name(name) => f.write_str(name),
            FunctionId::Type { name, .. } => f.write_str(name),
            FunctionId::Code(code) => write!(f, "#{}", code),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Hello;

    #[test]
    fn test_borrowed_and_owned_names_compare_equal() {
        assert_eq!(FunctionId::from("echo"), FunctionId::from("echo".to_string()));
    }

    #[test]
    fn test_type_ids_are_distinct_from_names() {
        let by_type = FunctionId::of::<Hello>();
        assert_eq!(by_type, FunctionId::of::<Hello>());
        assert_ne!(by_type, FunctionId::of::<String>());
        assert!(by_type.to_string().ends_with("Hello"));
    }

    #[test]
    fn test_code_display() {
        assert_eq!(FunctionId::from(7u64).to_string(), "#7");
    }

    #[test]
    fn test_module_id_rejects_empty() {
        assert!(ModuleId::from_string(String::new()).is_err());
        assert_ne!(ModuleId::new(), ModuleId::new());
    }
}
