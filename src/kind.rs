//! The fixed table of object kinds and the attribute schema each one declares.

use std::{collections::BTreeMap, fmt::Display, path::Path};

use crate::{
    attribute::AttributeType,
    error::{Attributes, Error, Result},
};

/// Every kind of object the store knows how to hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Kind {
    Topic,
    Commit,
    Entry,
}

/// How the id half of an object's reference comes to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceMode {
    /// Chosen by the caller, e.g. a topic's name.
    Named,
    /// The SHA-1 of the object's published contents.
    ContentDerived,
}

/// One declared attribute: its name and the encoding its values use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeSpec {
    pub name: &'static str,
    pub ty: AttributeType,
}

/// The attribute contract of one [`Kind`].
#[derive(Debug)]
pub struct Schema {
    pub required: &'static [AttributeSpec],
    pub optional: &'static [AttributeSpec],
    /// Groups of optional attributes of which exactly one group must be
    /// present, and then in full.
    pub exclusive: &'static [&'static [&'static str]],
    pub mode: ReferenceMode,
}

const fn attr(name: &'static str, ty: AttributeType) -> AttributeSpec {
    AttributeSpec { name, ty }
}

static TOPIC: Schema = Schema {
    required: &[
        attr("description", AttributeType::Text),
        attr("tip", AttributeType::ObjectRef(Kind::Commit)),
    ],
    optional: &[],
    exclusive: &[],
    mode: ReferenceMode::Named,
};

static COMMIT: Schema = Schema {
    required: &[
        attr("description", AttributeType::Text),
        attr("root", AttributeType::ObjectRef(Kind::Entry)),
    ],
    optional: &[attr("parent", AttributeType::ObjectRef(Kind::Commit))],
    exclusive: &[],
    mode: ReferenceMode::ContentDerived,
};

static ENTRY: Schema = Schema {
    required: &[
        attr("name", AttributeType::Text),
        attr("permissions", AttributeType::Text),
    ],
    optional: &[
        attr("contents", AttributeType::Blob),
        attr("contents_hash", AttributeType::Text),
        attr("children", AttributeType::ObjectRefSet(Kind::Entry)),
    ],
    exclusive: &[&["contents", "contents_hash"], &["children"]],
    mode: ReferenceMode::ContentDerived,
};

impl Kind {
    pub const ALL: [Kind; 3] = [Kind::Topic, Kind::Commit, Kind::Entry];

    /// The lower-cased name used as the reference prefix and directory name.
    pub fn name(&self) -> &'static str {
        match self {
            Kind::Topic => "topic",
            Kind::Commit => "commit",
            Kind::Entry => "entry",
        }
    }

    pub fn from_name(name: &str) -> Option<Kind> {
        Kind::ALL.into_iter().find(|kind| kind.name() == name)
    }

    pub fn schema(&self) -> &'static Schema {
        match self {
            Kind::Topic => &TOPIC,
            Kind::Commit => &COMMIT,
            Kind::Entry => &ENTRY,
        }
    }
}

impl Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl Schema {
    /// Looks up a declared attribute, required or optional.
    pub fn attribute(&self, name: &str) -> Option<&'static AttributeSpec> {
        self.required
            .iter()
            .chain(self.optional.iter())
            .find(|spec| spec.name == name)
    }

    /// Checks the attributes found in an object directory against the
    /// contract: every required one present, nothing undeclared, each stored
    /// with its declared encoding, and exactly one exclusive group complete.
    pub fn validate(
        &self,
        kind: Kind,
        present: &BTreeMap<String, AttributeType>,
        dir: &Path,
    ) -> Result<()> {
        let mut unexpected = Vec::new();
        for (name, ty) in present {
            match self.attribute(name) {
                Some(spec) if spec.ty == *ty => {}
                Some(spec) => {
                    return Err(Error::corrupt(
                        dir,
                        format!("{} stored as .{}, declared .{}", name, ty.suffix(), spec.ty.suffix()),
                    ))
                }
                None => unexpected.push(name.clone()),
            }
        }
        if !unexpected.is_empty() {
            return Err(Error::UnexpectedAttribute {
                kind,
                unexpected: Attributes(unexpected),
            });
        }

        let mut missing: Vec<String> = self
            .required
            .iter()
            .filter(|spec| !present.contains_key(spec.name))
            .map(|spec| spec.name.to_string())
            .collect();

        if !self.exclusive.is_empty() {
            let touched: Vec<&[&str]> = self
                .exclusive
                .iter()
                .copied()
                .filter(|group| group.iter().any(|name| present.contains_key(*name)))
                .collect();
            match touched.as_slice() {
                [] => missing.push(
                    self.exclusive
                        .iter()
                        .map(|group| group.join("+"))
                        .collect::<Vec<_>>()
                        .join(" or "),
                ),
                [group] => missing.extend(
                    group
                        .iter()
                        .filter(|name| !present.contains_key(**name))
                        .map(|name| name.to_string()),
                ),
                [_, rest @ ..] => {
                    return Err(Error::UnexpectedAttribute {
                        kind,
                        unexpected: Attributes(
                            rest.iter()
                                .flat_map(|group| group.iter())
                                .filter(|name| present.contains_key(**name))
                                .map(|name| name.to_string())
                                .collect(),
                        ),
                    })
                }
            }
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::IncompleteObject {
                kind,
                missing: Attributes(missing),
            })
        }
    }
}

#[test]
fn test_kind_names_round_trip() {
    for kind in Kind::ALL {
        assert_eq!(Kind::from_name(kind.name()), Some(kind));
    }
    assert_eq!(Kind::from_name("blob"), None);
}

#[test]
fn test_schema_lookup() {
    let entry = Kind::Entry.schema();
    assert_eq!(
        entry.attribute("children").map(|spec| spec.ty),
        Some(AttributeType::ObjectRefSet(Kind::Entry))
    );
    assert!(entry.attribute("tip").is_none());
    assert_eq!(Kind::Topic.schema().mode, ReferenceMode::Named);
}

#[cfg(test)]
fn present(names: &[&str]) -> BTreeMap<String, AttributeType> {
    let schema = Kind::Entry.schema();
    names
        .iter()
        .map(|name| {
            let ty = schema
                .attribute(name)
                .map(|spec| spec.ty)
                .unwrap_or(AttributeType::Text);
            (name.to_string(), ty)
        })
        .collect()
}

#[test]
fn test_entry_validation() {
    let schema = Kind::Entry.schema();
    let dir = Path::new("entry");
    let file = present(&["name", "permissions", "contents", "contents_hash"]);
    assert!(schema.validate(Kind::Entry, &file, dir).is_ok());
    let directory = present(&["name", "permissions", "children"]);
    assert!(schema.validate(Kind::Entry, &directory, dir).is_ok());

    match schema.validate(Kind::Entry, &present(&["name", "contents"]), dir) {
        Err(Error::IncompleteObject { missing, .. }) => {
            assert_eq!(missing.0, vec!["permissions", "contents_hash"])
        }
        other => panic!("unexpected {:?}", other),
    }
    assert!(matches!(
        schema.validate(Kind::Entry, &present(&["name", "permissions"]), dir),
        Err(Error::IncompleteObject { .. })
    ));
    match schema.validate(
        Kind::Entry,
        &present(&["name", "permissions", "contents", "contents_hash", "children"]),
        dir,
    ) {
        Err(Error::UnexpectedAttribute { unexpected, .. }) => {
            assert_eq!(unexpected.0, vec!["children"])
        }
        other => panic!("unexpected {:?}", other),
    }
    match schema.validate(Kind::Entry, &present(&["name", "permissions", "children", "author"]), dir) {
        Err(Error::UnexpectedAttribute { unexpected, .. }) => {
            assert_eq!(unexpected.0, vec!["author"])
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_validation_catches_wrong_encoding() {
    let mut attributes = present(&["name", "permissions", "children"]);
    attributes.insert(String::from("children"), AttributeType::ObjectRefSet(Kind::Commit));
    assert!(matches!(
        Kind::Entry.schema().validate(Kind::Entry, &attributes, Path::new("entry")),
        Err(Error::Corrupt { .. })
    ));
}
