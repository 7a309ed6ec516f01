use std::{fmt::Display, str::FromStr};

use crate::{
    error::{Error, Result},
    kind::{Kind, ReferenceMode},
};

/// The only way one object points at another: `<kind>/<id>`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Reference {
    kind: Kind,
    id: String,
}

/// Length in bytes of a SHA-1 digest.
pub const DIGEST_LEN: usize = 20;

impl Reference {
    pub fn new(kind: Kind, id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        validate_id(kind, &id)?;
        Ok(Reference { kind, id })
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Parses `<kind>/<id>`, returning `None` when no registered kind owns
    /// the prefix.
    pub fn parse(text: &str) -> Result<Option<Self>> {
        let Some((prefix, id)) = text.trim().split_once('/') else {
            return Ok(None);
        };
        match Kind::from_name(prefix) {
            Some(kind) => Ok(Some(Reference::new(kind, id)?)),
            None => Ok(None),
        }
    }
}

/// Ids become directory names, so they must be a single sane path component;
/// content-derived ids must look like a SHA-1 digest.
fn validate_id(kind: Kind, id: &str) -> Result<()> {
    let valid = match kind.schema().mode {
        ReferenceMode::ContentDerived => crate::hex::Hex::is_encoding_of(id, DIGEST_LEN),
        ReferenceMode::Named => {
            !id.is_empty()
                && !id.starts_with('.')
                && !id.contains('/')
                && !id.contains('\\')
                && !id.chars().any(char::is_whitespace)
        }
    };
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidId {
            kind,
            id: id.to_string(),
        })
    }
}

impl Display for Reference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}

impl FromStr for Reference {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Reference::parse(s)?.ok_or_else(|| Error::Corrupt {
            path: s.to_string(),
            reason: String::from("not a reference"),
        })
    }
}

#[test]
fn test_parse_reference() {
    let topic = Reference::parse("topic/main").unwrap().unwrap();
    assert_eq!(topic.kind(), Kind::Topic);
    assert_eq!(topic.id(), "main");
    assert_eq!(topic.to_string(), "topic/main");

    let digest = "a".repeat(40);
    let commit: Reference = format!("commit/{}\n", digest).parse().unwrap();
    assert_eq!(commit.kind(), Kind::Commit);
    assert_eq!(commit.id(), digest);
}

#[test]
fn test_parse_reference_rejects() {
    assert!(Reference::parse("blob/xyz").unwrap().is_none());
    assert!(Reference::parse("main").unwrap().is_none());
    assert!(Reference::parse("commit/not-a-digest").is_err());
    assert!(Reference::parse("topic/..").is_err());
    assert!(Reference::parse("topic/a/b").is_err());
    assert!(Reference::parse("topic/").is_err());
}
