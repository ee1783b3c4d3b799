//! Execution context
//!
//! The key/value state shared by every step of a single build run. Values are
//! tagged; typed reads check the tag and report a [`ContextError`] when a key
//! is absent or holds a different kind than the caller expects.

pub mod keys;

use crate::error::{BuildError, ContextError};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use tracing::{trace, warn};

/// State of a relationship between the build server and another resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    /// The link operation was never attempted.
    #[default]
    NotAttempted,
    /// The link operation was attempted and failed.
    Failed,
    /// The platform confirmed the link.
    Linked,
}

impl LinkState {
    pub fn is_linked(self) -> bool {
        matches!(self, LinkState::Linked)
    }
}

/// A tagged context value.
pub enum ContextValue {
    Text(String),
    Flag(bool),
    Number(i64),
    Link(LinkState),
    Error(BuildError),
    /// Opaque runtime handle, e.g. an open console session.
    Handle(Box<dyn Any + Send + Sync>),
}

impl ContextValue {
    /// Name of the value's kind, used in mismatch errors.
    pub fn kind(&self) -> &'static str {
        match self {
            ContextValue::Text(_) => "string",
            ContextValue::Flag(_) => "bool",
            ContextValue::Number(_) => "integer",
            ContextValue::Link(_) => "link state",
            ContextValue::Error(_) => "error",
            ContextValue::Handle(_) => "handle",
        }
    }
}

impl fmt::Debug for ContextValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextValue::Text(s) => f.debug_tuple("Text").field(s).finish(),
            ContextValue::Flag(b) => f.debug_tuple("Flag").field(b).finish(),
            ContextValue::Number(n) => f.debug_tuple("Number").field(n).finish(),
            ContextValue::Link(l) => f.debug_tuple("Link").field(l).finish(),
            ContextValue::Error(e) => f.debug_tuple("Error").field(&e.to_string()).finish(),
            ContextValue::Handle(_) => f.write_str("Handle(..)"),
        }
    }
}

impl From<String> for ContextValue {
    fn from(value: String) -> Self {
        ContextValue::Text(value)
    }
}

impl From<&str> for ContextValue {
    fn from(value: &str) -> Self {
        ContextValue::Text(value.to_string())
    }
}

impl From<bool> for ContextValue {
    fn from(value: bool) -> Self {
        ContextValue::Flag(value)
    }
}

impl From<i64> for ContextValue {
    fn from(value: i64) -> Self {
        ContextValue::Number(value)
    }
}

impl From<u16> for ContextValue {
    fn from(value: u16) -> Self {
        ContextValue::Number(i64::from(value))
    }
}

impl From<LinkState> for ContextValue {
    fn from(value: LinkState) -> Self {
        ContextValue::Link(value)
    }
}

/// Types that can be read back from a [`ContextValue`] by reference.
pub trait ContextType {
    const KIND: &'static str;

    fn extract(value: &ContextValue) -> Option<&Self>;
}

impl ContextType for String {
    const KIND: &'static str = "string";

    fn extract(value: &ContextValue) -> Option<&Self> {
        match value {
            ContextValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl ContextType for bool {
    const KIND: &'static str = "bool";

    fn extract(value: &ContextValue) -> Option<&Self> {
        match value {
            ContextValue::Flag(b) => Some(b),
            _ => None,
        }
    }
}

impl ContextType for i64 {
    const KIND: &'static str = "integer";

    fn extract(value: &ContextValue) -> Option<&Self> {
        match value {
            ContextValue::Number(n) => Some(n),
            _ => None,
        }
    }
}

impl ContextType for LinkState {
    const KIND: &'static str = "link state";

    fn extract(value: &ContextValue) -> Option<&Self> {
        match value {
            ContextValue::Link(l) => Some(l),
            _ => None,
        }
    }
}

/// Shared mutable state of one build run.
#[derive(Debug, Default)]
pub struct ExecutionContext {
    values: HashMap<String, ContextValue>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` under `key`, replacing any previous value.
    pub fn put(&mut self, key: impl Into<String>, value: impl Into<ContextValue>) {
        let key = key.into();
        let value = value.into();
        trace!(key = %key, kind = value.kind(), "context put");
        self.values.insert(key, value);
    }

    pub fn get(&self, key: &str) -> Option<&ContextValue> {
        self.values.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<ContextValue> {
        self.values.remove(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Typed read. Absence and kind mismatch are both invariant violations.
    pub fn get_typed<T: ContextType>(&self, key: &str) -> Result<&T, ContextError> {
        let value = self.values.get(key).ok_or_else(|| ContextError::Missing {
            key: key.to_string(),
        })?;
        T::extract(value).ok_or_else(|| ContextError::TypeMismatch {
            key: key.to_string(),
            expected: T::KIND,
            found: value.kind(),
        })
    }

    /// Identifier lookup for cleanup paths: absent or empty means "nothing there".
    pub fn optional_id(&self, key: &str) -> Result<Option<&str>, ContextError> {
        match self.values.get(key) {
            None => Ok(None),
            Some(ContextValue::Text(s)) if s.is_empty() => Ok(None),
            Some(ContextValue::Text(s)) => Ok(Some(s.as_str())),
            Some(other) => Err(ContextError::TypeMismatch {
                key: key.to_string(),
                expected: String::KIND,
                found: other.kind(),
            }),
        }
    }

    /// Identifier lookup for forward paths: the identifier must be present and non-empty.
    pub fn require_id(&self, key: &str) -> Result<&str, ContextError> {
        let id = self.get_typed::<String>(key)?;
        if id.is_empty() {
            return Err(ContextError::Empty {
                key: key.to_string(),
            });
        }
        Ok(id.as_str())
    }

    /// Relationship state under `key`. An absent key means the link was never attempted.
    ///
    /// Plain booleans written by external hooks are accepted: `true` reads as
    /// linked, `false` as never attempted.
    pub fn link_state(&self, key: &str) -> Result<LinkState, ContextError> {
        match self.values.get(key) {
            None => Ok(LinkState::NotAttempted),
            Some(ContextValue::Link(state)) => Ok(*state),
            Some(ContextValue::Flag(true)) => Ok(LinkState::Linked),
            Some(ContextValue::Flag(false)) => Ok(LinkState::NotAttempted),
            Some(other) => Err(ContextError::TypeMismatch {
                key: key.to_string(),
                expected: LinkState::KIND,
                found: other.kind(),
            }),
        }
    }

    pub fn put_handle<T: Any + Send + Sync>(&mut self, key: impl Into<String>, handle: T) {
        self.values
            .insert(key.into(), ContextValue::Handle(Box::new(handle)));
    }

    /// Remove and downcast a handle. On kind mismatch the value is left in place.
    pub fn take_handle<T: Any + Send + Sync>(&mut self, key: &str) -> Result<T, ContextError> {
        match self.values.remove(key) {
            None => Err(ContextError::Missing {
                key: key.to_string(),
            }),
            Some(ContextValue::Handle(boxed)) => match boxed.downcast::<T>() {
                Ok(handle) => Ok(*handle),
                Err(boxed) => {
                    self.values
                        .insert(key.to_string(), ContextValue::Handle(boxed));
                    Err(ContextError::TypeMismatch {
                        key: key.to_string(),
                        expected: std::any::type_name::<T>(),
                        found: "handle",
                    })
                }
            },
            Some(other) => {
                let found = other.kind();
                self.values.insert(key.to_string(), other);
                Err(ContextError::TypeMismatch {
                    key: key.to_string(),
                    expected: "handle",
                    found,
                })
            }
        }
    }

    /// Record the run's terminal error. Only the first error is kept.
    pub fn record_error(&mut self, error: BuildError) -> bool {
        if self.has_error() {
            warn!(error = %error, "error already recorded, keeping the first one");
            return false;
        }
        self.values
            .insert(keys::ERROR.to_string(), ContextValue::Error(error));
        true
    }

    pub fn has_error(&self) -> bool {
        self.values.contains_key(keys::ERROR)
    }

    /// Remove the recorded error, if any.
    pub fn take_error(&mut self) -> Option<BuildError> {
        match self.values.remove(keys::ERROR)? {
            ContextValue::Error(error) => Some(error),
            other => Some(BuildError::Invariant(ContextError::TypeMismatch {
                key: keys::ERROR.to_string(),
                expected: "error",
                found: other.kind(),
            })),
        }
    }
}
