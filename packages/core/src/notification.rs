//! Materialized push events.
//!
//! A [`Notification`] carries one event of a published stream together with
//! the handle it originated from. Completion and errors are ordinary values
//! here so they can flow through an aggregate without terminating it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Handle;

/// What happened on the originating stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Signal {
    /// The stream emitted a value.
    Next { value: Value },
    /// The stream failed. No further events follow from this handle.
    Error { error: String },
    /// The stream completed. No further events follow from this handle.
    Complete,
}

/// A tagged push event: `{handle, kind, value|error}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub handle: Handle,
    #[serde(flatten)]
    pub signal: Signal,
}

impl Notification {
    pub fn next(handle: Handle, value: Value) -> Self {
        Self {
            handle,
            signal: Signal::Next { value },
        }
    }

    pub fn error(handle: Handle, error: impl Into<String>) -> Self {
        Self {
            handle,
            signal: Signal::Error {
                error: error.into(),
            },
        }
    }

    pub fn complete(handle: Handle) -> Self {
        Self {
            handle,
            signal: Signal::Complete,
        }
    }

    /// The emitted value, if this is a `next` notification.
    pub fn value(&self) -> Option<&Value> {
        match &self.signal {
            Signal::Next { value } => Some(value),
            _ => None,
        }
    }

    /// Consume into the emitted value, if this is a `next` notification.
    pub fn into_value(self) -> Option<Value> {
        match self.signal {
            Signal::Next { value } => Some(value),
            _ => None,
        }
    }

    /// True for `error` and `complete`: the last event of its stream.
    pub fn is_terminal(&self) -> bool {
        !matches!(self.signal, Signal::Next { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle;
    use serde_json::json;

    #[test]
    fn wire_format_is_flat() {
        let n = Notification::next(handle!("a.b.c"), json!(1));
        assert_eq!(
            serde_json::to_value(&n).unwrap(),
            json!({"handle": "a.b.c", "kind": "next", "value": 1})
        );

        let n = Notification::error(handle!("a.b.c"), "boom");
        assert_eq!(
            serde_json::to_value(&n).unwrap(),
            json!({"handle": "a.b.c", "kind": "error", "error": "boom"})
        );

        let n = Notification::complete(handle!("a.b.c"));
        assert_eq!(
            serde_json::to_value(&n).unwrap(),
            json!({"handle": "a.b.c", "kind": "complete"})
        );
    }

    #[test]
    fn parses_from_wire() {
        let n: Notification =
            serde_json::from_value(json!({"handle": "x.y.z", "kind": "next", "value": "hi"}))
                .unwrap();
        assert_eq!(n.value(), Some(&json!("hi")));
        assert!(!n.is_terminal());
    }

    #[test]
    fn terminal_kinds() {
        assert!(Notification::complete(handle!("a.b.c")).is_terminal());
        assert!(Notification::error(handle!("a.b.c"), "x").is_terminal());
        assert_eq!(Notification::complete(handle!("a.b.c")).into_value(), None);
    }
}
