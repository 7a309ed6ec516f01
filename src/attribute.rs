//! Attribute encodings: how a typed value becomes a file in an object's
//! directory and how it is read back.
//!
//! Each attribute is stored as `<name>.<suffix>`, where the suffix names the
//! encoding: `str`, `file`, `<kind>_ref` or `<kind>_ref_set`.

use std::{
    collections::BTreeSet,
    fs,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};

use derive_more::From;

use crate::{
    error::{Error, Result},
    kind::Kind,
    reference::Reference,
};

/// The encodings an attribute can be declared with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeType {
    /// UTF-8 text.
    Text,
    /// Opaque bytes, usually copied straight from a working-tree file.
    Blob,
    /// A single reference to an object of the given kind.
    ObjectRef(Kind),
    /// A sorted set of references to objects of the given kind.
    ObjectRefSet(Kind),
}

/// A decoded (or to-be-encoded) attribute value.
#[derive(Debug, Clone, PartialEq, Eq, From)]
pub enum AttributeValue {
    Text(String),
    Blob(Blob),
    ObjectRef(Reference),
    ObjectRefSet(BTreeSet<Reference>),
}

/// Bytes held either in memory or in a file on disk.
///
/// Decoding a blob attribute yields [`Blob::File`] pointing into the object's
/// directory; nothing is read until [`Blob::read`] is called.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Blob {
    Bytes(Vec<u8>),
    File(PathBuf),
}

impl Blob {
    pub fn read(&self) -> io::Result<Vec<u8>> {
        match self {
            Blob::Bytes(bytes) => Ok(bytes.clone()),
            Blob::File(path) => fs::read(path),
        }
    }

    fn write_to(&self, dest: &Path) -> io::Result<()> {
        match self {
            Blob::Bytes(bytes) => fs::write(dest, bytes),
            Blob::File(source) => fs::copy(source, dest).map(|_| ()),
        }
    }
}

impl AttributeValue {
    pub fn into_text(self) -> Option<String> {
        match self {
            AttributeValue::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn into_blob(self) -> Option<Blob> {
        match self {
            AttributeValue::Blob(blob) => Some(blob),
            _ => None,
        }
    }

    pub fn into_reference(self) -> Option<Reference> {
        match self {
            AttributeValue::ObjectRef(reference) => Some(reference),
            _ => None,
        }
    }

    pub fn into_reference_set(self) -> Option<BTreeSet<Reference>> {
        match self {
            AttributeValue::ObjectRefSet(set) => Some(set),
            _ => None,
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(text: &str) -> Self {
        AttributeValue::Text(text.to_string())
    }
}

impl AttributeType {
    /// Every encoding the store can read, one per suffix.
    pub fn registered() -> impl Iterator<Item = AttributeType> {
        [AttributeType::Text, AttributeType::Blob]
            .into_iter()
            .chain(Kind::ALL.into_iter().map(AttributeType::ObjectRef))
            .chain(Kind::ALL.into_iter().map(AttributeType::ObjectRefSet))
    }

    pub fn suffix(&self) -> String {
        match self {
            AttributeType::Text => String::from("str"),
            AttributeType::Blob => String::from("file"),
            AttributeType::ObjectRef(kind) => format!("{}_ref", kind),
            AttributeType::ObjectRefSet(kind) => format!("{}_ref_set", kind),
        }
    }

    /// The file an attribute of this type is stored in.
    pub fn file_name(&self, attribute: &str) -> String {
        format!("{}.{}", attribute, self.suffix())
    }

    /// Finds the one registered encoding owning `suffix`. No match, or more
    /// than one, means the store holds something it didn't write.
    pub fn from_suffix(suffix: &str, path: &Path) -> Result<AttributeType> {
        let matches: Vec<AttributeType> = AttributeType::registered()
            .filter(|ty| ty.suffix() == suffix)
            .collect();
        match matches.as_slice() {
            [ty] => Ok(*ty),
            [] => Err(Error::corrupt(path, format!("no attribute type for .{}", suffix))),
            _ => Err(Error::corrupt(
                path,
                format!("ambiguous attribute type for .{}", suffix),
            )),
        }
    }

    fn describe(&self) -> String {
        match self {
            AttributeType::Text => String::from("text"),
            AttributeType::Blob => String::from("a blob"),
            AttributeType::ObjectRef(kind) => format!("a {} reference", kind),
            AttributeType::ObjectRefSet(kind) => format!("a set of {} references", kind),
        }
    }

    /// Writes `value` to `dest`, refusing values whose shape doesn't fit.
    pub fn encode(&self, attribute: &str, value: &AttributeValue, dest: &Path) -> Result<()> {
        let mismatch = || Error::Encoding {
            attribute: attribute.to_string(),
            expected: self.describe(),
        };
        match (self, value) {
            (AttributeType::Text, AttributeValue::Text(text)) => fs::write(dest, text)?,
            (AttributeType::Blob, AttributeValue::Blob(blob)) => blob.write_to(dest)?,
            (AttributeType::ObjectRef(kind), AttributeValue::ObjectRef(reference)) => {
                if reference.kind() != *kind {
                    return Err(mismatch());
                }
                fs::write(dest, reference.to_string())?
            }
            (AttributeType::ObjectRefSet(kind), AttributeValue::ObjectRefSet(set)) => {
                if set.iter().any(|reference| reference.kind() != *kind) {
                    return Err(mismatch());
                }
                let mut text = String::new();
                for reference in set {
                    text.push_str(&reference.to_string());
                    text.push('\n');
                }
                fs::write(dest, text)?
            }
            _ => return Err(mismatch()),
        }
        Ok(())
    }

    /// Reads the value stored at `path`. References come back unresolved.
    pub fn decode(&self, path: &Path) -> Result<AttributeValue> {
        if let AttributeType::Blob = self {
            return Ok(AttributeValue::Blob(Blob::File(path.to_path_buf())));
        }
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == ErrorKind::InvalidData => {
                return Err(Error::corrupt(path, "attribute is not UTF-8"))
            }
            Err(err) => return Err(err.into()),
        };
        let reference = |line: &str, kind: Kind| -> Result<Reference> {
            match Reference::parse(line)? {
                Some(reference) if reference.kind() == kind => Ok(reference),
                _ => Err(Error::corrupt(
                    path,
                    format!("{:?} is not a {} reference", line, kind),
                )),
            }
        };
        Ok(match self {
            AttributeType::Blob | AttributeType::Text => AttributeValue::Text(text),
            AttributeType::ObjectRef(kind) => AttributeValue::ObjectRef(reference(&text, *kind)?),
            AttributeType::ObjectRefSet(kind) => AttributeValue::ObjectRefSet(
                text.lines()
                    .filter(|line| !line.is_empty())
                    .map(|line| reference(line, *kind))
                    .collect::<Result<_>>()?,
            ),
        })
    }
}

/// Splits `<name>.<suffix>` into its halves.
pub fn split_file_name(file_name: &str) -> Option<(&str, &str)> {
    file_name.split_once('.')
}

#[cfg(test)]
fn digest_reference(kind: Kind, fill: char) -> Reference {
    Reference::new(kind, fill.to_string().repeat(40)).unwrap()
}

#[test]
fn test_every_suffix_has_one_type() {
    let path = Path::new("x");
    for ty in AttributeType::registered() {
        assert_eq!(AttributeType::from_suffix(&ty.suffix(), path).unwrap(), ty);
    }
    assert!(matches!(
        AttributeType::from_suffix("json", path),
        Err(Error::Corrupt { .. })
    ));
}

#[test]
fn test_reference_set_encoding() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("children.entry_ref_set");
    let ty = AttributeType::ObjectRefSet(Kind::Entry);
    let set: BTreeSet<Reference> = [
        digest_reference(Kind::Entry, 'b'),
        digest_reference(Kind::Entry, 'a'),
    ]
    .into_iter()
    .collect();
    ty.encode("children", &set.clone().into(), &path).unwrap();
    assert_eq!(ty.decode(&path).unwrap(), AttributeValue::ObjectRefSet(set));

    let empty = BTreeSet::new();
    ty.encode("children", &empty.clone().into(), &path).unwrap();
    assert_eq!(ty.decode(&path).unwrap(), AttributeValue::ObjectRefSet(empty));
}

#[test]
fn test_encoding_rejects_wrong_shape() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tip.commit_ref");
    let ty = AttributeType::ObjectRef(Kind::Commit);
    let entry: AttributeValue = digest_reference(Kind::Entry, 'c').into();
    assert!(matches!(
        ty.encode("tip", &entry, &path),
        Err(Error::Encoding { .. })
    ));
    assert!(matches!(
        ty.encode("tip", &"text".into(), &path),
        Err(Error::Encoding { .. })
    ));
    let mixed: BTreeSet<Reference> = [
        digest_reference(Kind::Entry, 'a'),
        digest_reference(Kind::Commit, 'b'),
    ]
    .into_iter()
    .collect();
    assert!(matches!(
        AttributeType::ObjectRefSet(Kind::Entry).encode("children", &mixed.into(), &path),
        Err(Error::Encoding { .. })
    ));
    assert!(!path.exists());
}

#[test]
fn test_blob_decodes_lazily() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("contents.file");
    let ty = AttributeType::Blob;
    ty.encode("contents", &Blob::Bytes(b"bytes".to_vec()).into(), &path)
        .unwrap();
    let blob = ty.decode(&path).unwrap().into_blob().unwrap();
    assert_eq!(blob, Blob::File(path.clone()));
    assert_eq!(blob.read().unwrap(), b"bytes");
}
