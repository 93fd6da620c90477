//! Branded ID newtypes.
//!
//! Generated identifiers are UUID v7 strings (time-ordered) with a short
//! prefix so a thread id can never be confused with a run id in logs.
//! [`RunTag`] is different: it is chosen by the caller to name a policy bundle.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new random ID (UUID v7, time-ordered).
            #[must_use]
            pub fn new() -> Self {
                Self(format!(concat!($prefix, "_{}"), Uuid::now_v7()))
            }

            /// Wrap an existing string value.
            #[must_use]
            pub fn from_string(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// Return the inner string as a slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

branded_id!(
    /// Identifier of a conversation thread.
    ThreadId,
    "thr"
);

branded_id!(
    /// Identifier of a persisted message.
    MessageId,
    "msg"
);

branded_id!(
    /// Identifier of one gate → task execution for one bundle.
    RunId,
    "run"
);

branded_id!(
    /// Identifier of one turn (a human message and every run it triggers).
    TurnId,
    "turn"
);

/// Caller-chosen name of a policy bundle; distinguishes concurrent runs.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunTag(String);

impl RunTag {
    /// Tag used when the caller does not name its single bundle.
    pub const DEFAULT: &'static str = "default";

    /// Create a tag from any string.
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    /// The tag of the implicit single bundle.
    #[must_use]
    pub fn default_tag() -> Self {
        Self(Self::DEFAULT.to_owned())
    }

    /// Return the tag as a slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RunTag {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for RunTag {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_carry_prefix() {
        assert!(ThreadId::new().as_str().starts_with("thr_"));
        assert!(MessageId::new().as_str().starts_with("msg_"));
        assert!(RunId::new().as_str().starts_with("run_"));
        assert!(TurnId::new().as_str().starts_with("turn_"));
    }

    #[test]
    fn generated_ids_are_unique() {
        let a = ThreadId::new();
        let b = ThreadId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn ids_serialize_transparently() {
        let id = ThreadId::from_string("thr_abc");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"thr_abc\"");
        let back: ThreadId = serde_json::from_str("\"thr_abc\"").unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn run_tag_default() {
        assert_eq!(RunTag::default_tag().as_str(), "default");
        assert_eq!(RunTag::from("strict").to_string(), "strict");
    }
}
