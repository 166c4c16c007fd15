//! Handle type: a validated, dot-delimited hierarchical name.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Minimum number of segments a handle needs to be used as a mount point.
pub const MIN_MOUNT_SEGMENTS: usize = 3;

/// Errors related to handle parsing and validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandleError {
    /// A segment is not a valid Unicode identifier.
    #[error("invalid handle segment '{segment}' at position {position}: {message}")]
    InvalidSegment {
        segment: String,
        position: usize,
        message: String,
    },

    /// The handle string is empty.
    #[error("handle must not be empty")]
    Empty,

    /// The handle is too shallow to mount a stream or store.
    #[error("handle '{handle}' has {segments} segments, mount points need at least {MIN_MOUNT_SEGMENTS}")]
    TooShallow { handle: String, segments: usize },
}

/// A validated hierarchical handle, e.g. `app.state.counter`.
///
/// Segments must be valid Unicode identifiers (per UAX#31) or numeric
/// strings. Ancestry is segment-aware: `a.b` is an ancestor of `a.b.c` but
/// not of `a.bc`.
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Handle {
    segments: Vec<String>,
}

impl Handle {
    /// Parse a handle string, validating segments.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use statebus_core::Handle;
    ///
    /// let handle = Handle::parse("app.state.counter").unwrap();
    /// assert_eq!(handle.len(), 3);
    /// assert!(Handle::parse("app..counter").is_err());
    /// ```
    pub fn parse(s: &str) -> Result<Self, HandleError> {
        if s.is_empty() {
            return Err(HandleError::Empty);
        }

        let segments: Vec<String> = s.split('.').map(str::to_string).collect();
        for (i, segment) in segments.iter().enumerate() {
            Self::validate_segment(segment, i)?;
        }

        Ok(Handle { segments })
    }

    /// Parse a handle and require it to be deep enough to mount on.
    pub fn mount(s: &str) -> Result<Self, HandleError> {
        let handle = Self::parse(s)?;
        handle.ensure_mountable()?;
        Ok(handle)
    }

    /// Try to create a handle from segments, validating each.
    pub fn try_from_segments(segments: Vec<String>) -> Result<Self, HandleError> {
        if segments.is_empty() {
            return Err(HandleError::Empty);
        }
        for (i, segment) in segments.iter().enumerate() {
            Self::validate_segment(segment, i)?;
        }
        Ok(Handle { segments })
    }

    fn validate_segment(segment: &str, position: usize) -> Result<(), HandleError> {
        let invalid = |message: String| HandleError::InvalidSegment {
            segment: segment.to_string(),
            position,
            message,
        };

        let mut chars = segment.chars();
        let Some(first) = chars.next() else {
            return Err(invalid("empty segment".to_string()));
        };

        if segment.chars().all(|c| c.is_ascii_digit()) {
            return Ok(());
        }

        let valid_start = unicode_ident::is_xid_start(first)
            || (first == '_'
                && chars
                    .clone()
                    .next()
                    .is_some_and(unicode_ident::is_xid_continue));
        if !valid_start {
            return Err(invalid(
                "must start with a letter or underscore followed by letter/digit".to_string(),
            ));
        }

        for c in chars {
            if !unicode_ident::is_xid_continue(c) {
                return Err(invalid(format!("invalid character '{}' in identifier", c)));
            }
        }

        Ok(())
    }

    /// Fail unless this handle has at least [`MIN_MOUNT_SEGMENTS`] segments.
    pub fn ensure_mountable(&self) -> Result<(), HandleError> {
        if self.is_mountable() {
            Ok(())
        } else {
            Err(HandleError::TooShallow {
                handle: self.to_string(),
                segments: self.len(),
            })
        }
    }

    pub fn is_mountable(&self) -> bool {
        self.segments.len() >= MIN_MOUNT_SEGMENTS
    }

    /// Number of segments.
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Handles are never empty; provided for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().map(String::as_str)
    }

    /// True if `self` equals `other` or is one of its ancestors.
    pub fn contains(&self, other: &Handle) -> bool {
        self.segments.len() <= other.segments.len()
            && self.segments[..] == other.segments[..self.segments.len()]
    }

    /// Append a segment, producing a child handle.
    pub fn child(&self, segment: &str) -> Result<Handle, HandleError> {
        Self::validate_segment(segment, self.segments.len())?;
        let mut segments = self.segments.clone();
        segments.push(segment.to_string());
        Ok(Handle { segments })
    }

    /// The parent handle, or `None` for a single-segment handle.
    pub fn parent(&self) -> Option<Handle> {
        if self.segments.len() < 2 {
            return None;
        }
        Some(Handle {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("."))
    }
}

impl FromStr for Handle {
    type Err = HandleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Handle::parse(s)
    }
}

impl TryFrom<String> for Handle {
    type Error = HandleError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Handle::parse(&value)
    }
}

impl TryFrom<&str> for Handle {
    type Error = HandleError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Handle::parse(value)
    }
}

impl From<Handle> for String {
    fn from(handle: Handle) -> Self {
        handle.to_string()
    }
}

/// Macro for creating handles from literals.
///
/// # Example
///
/// ```rust
/// use statebus_core::handle;
///
/// let h = handle!("app.state.counter");
/// assert_eq!(h.len(), 3);
/// ```
#[macro_export]
macro_rules! handle {
    ($s:expr) => {
        $crate::Handle::parse($s).expect("invalid handle literal")
    };
}
