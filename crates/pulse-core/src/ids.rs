//! Branded ID newtypes for type safety.
//!
//! The subject identity (verified token owner) and the connection identity
//! are distinct `String` newtypes so one can never be passed where the other
//! is expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create from an existing string value.
            #[must_use]
            pub fn from_string(s: String) -> Self {
                Self(s)
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

        impl std::ops::Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
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

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

branded_id! {
    /// Verified identity owning one or more connections. Immutable after
    /// admission.
    SubjectId
}

branded_id! {
    /// Unique identifier for one open connection. Never reused for the
    /// lifetime of the process while any reference to it is live.
    ConnectionId
}

impl ConnectionId {
    /// Derive a fresh connection ID for a subject.
    ///
    /// The subject identity is suffixed with a UUID v7, which is both
    /// time-ordered and collision-free, so concurrent connections from the
    /// same subject always receive distinct IDs.
    #[must_use]
    pub fn for_subject(subject: &SubjectId) -> Self {
        Self(format!("{}-{}", subject.as_str(), Uuid::now_v7()))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
