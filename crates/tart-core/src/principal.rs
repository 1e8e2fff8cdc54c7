//! Acting identity for a command or push.

use std::fmt;

/// Who is performing an operation.
///
/// The management console runs as [`Principal::Trusted`] and bypasses
/// ownership checks. Everyone arriving over the transport is a
/// [`Principal::User`] and must be listed as an owner of the tart they
/// touch.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Principal {
    Trusted,
    User(String),
}

impl Principal {
    /// Map a transport-level username onto a principal.
    ///
    /// The transport hands over an empty username for console sessions.
    pub fn from_username(username: &str) -> Self {
        if username.is_empty() {
            Principal::Trusted
        } else {
            Principal::User(username.to_string())
        }
    }

}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Principal::Trusted => f.write_str("console"),
            Principal::User(name) => f.write_str(name),
        }
    }
}
