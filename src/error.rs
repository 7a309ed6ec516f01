use std::fmt;

use derive_more::{Display, From};

use crate::kind::Kind;

/// Everything that can go wrong inside the store or the repository.
///
/// Only [`Error::Usage`] is meant to be shown to a user as-is; every other
/// variant means an invariant of the store was violated.
#[derive(Debug, From, Display)]
pub enum Error {
    #[from]
    #[display(fmt = "{}", _0)]
    Usage(UsageError),
    /// Another staging session holds the lock for the same target.
    #[display(fmt = "{} is busy: {} is held by another staging session", target, lock)]
    ObjectBusy { target: String, lock: String },
    #[display(fmt = "{} is missing required attributes: {}", kind, missing)]
    IncompleteObject { kind: Kind, missing: Attributes },
    #[display(fmt = "{} has unexpected attributes: {}", kind, unexpected)]
    UnexpectedAttribute { kind: Kind, unexpected: Attributes },
    #[display(fmt = "broken repository: {} is unusable ({})", path, source)]
    BrokenRepository { path: String, source: std::io::Error },
    #[display(fmt = "attribute {} expects {}", attribute, expected)]
    Encoding { attribute: String, expected: String },
    #[display(fmt = "store corruption at {}: {}", path, reason)]
    Corrupt { path: String, reason: String },
    #[display(fmt = "{} is not a {}", reference, expected)]
    WrongKind { reference: String, expected: Kind },
    #[display(fmt = "invalid {} id {:?}", kind, id)]
    InvalidId { kind: Kind, id: String },
    #[from]
    #[display(fmt = "{}", _0)]
    IO(std::io::Error),
    #[from]
    #[display(fmt = "{}", _0)]
    Serde(serde_json::Error),
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::BrokenRepository { source, .. } => Some(source),
            Error::IO(err) => Some(err),
            Error::Serde(err) => Some(err),
            _ => None,
        }
    }
}

impl Error {
    /// Whether this error is the user's to fix rather than a defect.
    pub fn is_usage(&self) -> bool {
        matches!(self, Error::Usage(_))
    }

    pub(crate) fn corrupt(path: &std::path::Path, reason: impl Into<String>) -> Self {
        Error::Corrupt {
            path: path.display().to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn broken(path: &std::path::Path, source: std::io::Error) -> Self {
        Error::BrokenRepository {
            path: path.display().to_string(),
            source,
        }
    }
}

/// Mistakes the user can correct by running a different command.
#[derive(Debug, PartialEq, Eq, Display)]
pub enum UsageError {
    #[display(fmt = "Directory {} is already a wad.", _0)]
    AlreadyInitialized(String),
    #[display(fmt = "Directory {} is not a wad. Try `wad init`.", _0)]
    NotInitialized(String),
    #[display(fmt = "Topic \"{}\" already exists.", _0)]
    TopicAlreadyExists(String),
    #[display(fmt = "\"{}\" is not a valid topic name: {}", name, reason)]
    InvalidName { name: String, reason: String },
    #[display(fmt = "No topic or commit matches \"{}\".", _0)]
    UnknownReference(String),
    #[display(fmt = "There are uncommitted changes.")]
    UncommittedChanges,
    #[display(fmt = "Nothing to commit.")]
    NothingToCommit,
}

/// Attribute names listed in a validation error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attributes(pub Vec<String>);

impl fmt::Display for Attributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join(", "))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
