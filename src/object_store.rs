use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::{
    commit::Commit,
    entry::Entry,
    error::{Error, Result},
    kind::{Kind, ReferenceMode},
    reference::Reference,
    topic::Topic,
};

mod digest;
mod object;
pub mod staging;

pub use object::Object;

/// A persistent store of typed objects kept in a directory:
/// `<root>/<kind>/<id>/` holds one file per attribute of a published object,
/// and `<root>/stage/<kind>/` holds scratch areas of objects being built.
#[derive(Debug, Clone)]
pub struct Store {
    root: PathBuf,
}

/// A looked-up object, already cast to its kind.
#[derive(Debug)]
pub enum Resolved {
    Topic(Topic),
    Commit(Commit),
    Entry(Entry),
}

impl Store {
    pub fn new(root: PathBuf) -> Result<Self> {
        if !root.try_exists()? {
            log::info!("creating object store root: {:?}", root);
            fs::create_dir_all(&root)?;
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub(crate) fn object_dir(&self, reference: &Reference) -> PathBuf {
        self.root.join(reference.kind().name()).join(reference.id())
    }

    pub(crate) fn stage_dir(&self, kind: Kind) -> PathBuf {
        self.root.join("stage").join(kind.name())
    }

    pub fn has(&self, reference: &Reference) -> Result<bool> {
        Ok(self.object_dir(reference).try_exists()?)
    }

    /// Opens an object of `kind`.
    ///
    /// With no id this begins a brand-new object in staging (only possible
    /// for content-derived kinds, whose id comes later). With an id it
    /// returns a read-only handle on the published object; the first
    /// [`Object::set`] moves it into staging.
    pub fn open(&self, kind: Kind, id: Option<&str>) -> Result<Object> {
        match id {
            Some(id) => {
                let reference = Reference::new(kind, id)?;
                Ok(Object::new(
                    self.clone(),
                    kind,
                    Some(reference.id().to_string()),
                ))
            }
            None => {
                if kind.schema().mode == ReferenceMode::Named {
                    return Err(Error::InvalidId {
                        kind,
                        id: String::new(),
                    });
                }
                let mut object = Object::new(self.clone(), kind, None);
                object.stage()?;
                Ok(object)
            }
        }
    }

    /// Finds the published object `reference` names. Text whose prefix is no
    /// registered kind, or a reference with nothing published behind it, is
    /// absent rather than an error.
    pub fn lookup(&self, reference: &str) -> Result<Option<Resolved>> {
        match Reference::parse(reference)? {
            Some(reference) => self.resolve(&reference),
            None => Ok(None),
        }
    }

    pub fn resolve(&self, reference: &Reference) -> Result<Option<Resolved>> {
        if !self.has(reference)? {
            return Ok(None);
        }
        let object = self.open(reference.kind(), Some(reference.id()))?;
        Ok(Some(match reference.kind() {
            Kind::Topic => Resolved::Topic(Topic::from_object(object)),
            Kind::Commit => Resolved::Commit(Commit::from_object(object)),
            Kind::Entry => Resolved::Entry(Entry::from_object(object)),
        }))
    }

    /// Every published object of `kind`, in id order.
    pub fn iterate(&self, kind: Kind) -> Result<Vec<Object>> {
        let dir = self.root.join(kind.name());
        if !dir.try_exists()? {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(id) = name.to_str() else {
                return Err(Error::corrupt(&entry.path(), "id is not UTF-8"));
            };
            ids.push(id.to_string());
        }
        ids.sort();
        ids.iter().map(|id| self.open(kind, Some(id.as_str()))).collect()
    }
}

impl Resolved {
    pub fn reference(&self) -> Reference {
        match self {
            Resolved::Topic(topic) => topic.reference(),
            Resolved::Commit(commit) => commit.reference(),
            Resolved::Entry(entry) => entry.reference(),
        }
    }
}

macro_rules! cast {
    ($variant:ident, $kind:expr) => {
        impl TryFrom<Resolved> for $variant {
            type Error = Error;

            fn try_from(resolved: Resolved) -> Result<Self> {
                match resolved {
                    Resolved::$variant(object) => Ok(object),
                    other => Err(Error::WrongKind {
                        reference: other.reference().to_string(),
                        expected: $kind,
                    }),
                }
            }
        }
    };
}

cast!(Topic, Kind::Topic);
cast!(Commit, Kind::Commit);
cast!(Entry, Kind::Entry);

#[cfg(test)]
fn test_store() -> (tempfile::TempDir, Store) {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::new(dir.path().join(".wad")).unwrap();
    (dir, store)
}

#[cfg(test)]
fn file_entry(store: &Store, name: &str, contents: &[u8]) -> Result<Object> {
    use crate::{attribute::Blob, content_hash::ContentHash};

    let mut entry = store.open(Kind::Entry, None)?;
    entry.set("name", name)?;
    entry.set("permissions", "rw")?;
    entry.set("contents", Blob::Bytes(contents.to_vec()))?;
    entry.set("contents_hash", ContentHash::from(contents).to_string())?;
    Ok(entry)
}

#[test]
fn test_content_addressing_is_deterministic() -> Result<()> {
    let (_dir, store) = test_store();
    let first = file_entry(&store, "a", b"1")?.publish()?;
    let second = file_entry(&store, "a", b"1")?.publish()?;
    assert_eq!(first, second);
    assert_eq!(first.kind(), Kind::Entry);
    assert!(store.has(&first)?);
    assert_eq!(store.iterate(Kind::Entry)?.len(), 1);
    Ok(())
}

#[test]
fn test_content_addressing_changes_with_any_attribute() -> Result<()> {
    let (_dir, store) = test_store();
    let original = file_entry(&store, "a", b"1")?.publish()?;
    assert_ne!(original, file_entry(&store, "a", b"2")?.publish()?);
    assert_ne!(original, file_entry(&store, "b", b"1")?.publish()?);
    let mut read_only = file_entry(&store, "a", b"1")?;
    read_only.set("permissions", "r")?;
    assert_ne!(original, read_only.publish()?);
    Ok(())
}

#[test]
fn test_republishing_same_contents_keeps_published_copy() -> Result<()> {
    let (_dir, store) = test_store();
    let entry = file_entry(&store, "a", b"1")?.publish()?;
    let published = store.object_dir(&entry);
    let before = fs::read_dir(&published)?.count();
    fs::write(published.join("marker"), b"")?;

    assert_eq!(file_entry(&store, "a", b"1")?.publish()?, entry);
    assert!(published.join("marker").exists());
    assert_eq!(fs::read_dir(&published)?.count(), before + 1);
    Ok(())
}

#[test]
fn test_publish_rejects_missing_required() -> Result<()> {
    let (_dir, store) = test_store();
    let mut commit = store.open(Kind::Commit, None)?;
    commit.set("description", "no root")?;
    match commit.publish() {
        Err(Error::IncompleteObject { kind, missing }) => {
            assert_eq!(kind, Kind::Commit);
            assert_eq!(missing.0, vec!["root"]);
        }
        other => panic!("unexpected {:?}", other),
    }
    assert!(store.iterate(Kind::Commit)?.is_empty());
    assert_eq!(fs::read_dir(store.stage_dir(Kind::Commit))?.count(), 0);
    Ok(())
}

#[test]
fn test_publish_rejects_undeclared_attribute() -> Result<()> {
    let (_dir, store) = test_store();
    let mut entry = file_entry(&store, "a", b"1")?;
    assert!(matches!(
        entry.set("author", "me"),
        Err(Error::UnexpectedAttribute { .. })
    ));
    let scratch = entry.staging_dir().unwrap();
    fs::write(scratch.join("author.str"), b"me")?;
    match entry.publish() {
        Err(Error::UnexpectedAttribute { unexpected, .. }) => {
            assert_eq!(unexpected.0, vec!["author"])
        }
        other => panic!("unexpected {:?}", other),
    }
    Ok(())
}

#[test]
fn test_staging_is_isolated_until_publish() -> Result<()> {
    let (_dir, store) = test_store();
    let root = file_entry(&store, ".", b"")?.publish()?;
    let mut commit = store.open(Kind::Commit, None)?;
    commit.set("description", "one")?;
    commit.set("root", root.clone())?;
    let one = commit.publish()?;
    let mut commit = store.open(Kind::Commit, None)?;
    commit.set("description", "two")?;
    commit.set("root", root)?;
    let two = commit.publish()?;

    let mut topic = store.open(Kind::Topic, Some("main"))?;
    topic.set("description", "main topic")?;
    topic.set("tip", one.clone())?;
    topic.publish()?;

    let mut writer = store.open(Kind::Topic, Some("main"))?;
    writer.set("tip", two.clone())?;
    let reader = store.open(Kind::Topic, Some("main"))?;
    assert_eq!(reader.reference_attribute("tip")?, Some(one));
    assert_eq!(writer.reference_attribute("tip")?, Some(two.clone()));

    writer.publish()?;
    assert_eq!(reader.reference_attribute("tip")?, Some(two));
    assert_eq!(reader.text("description")?, "main topic");
    Ok(())
}

#[test]
fn test_lock_contention_is_object_busy() -> Result<()> {
    let (_dir, store) = test_store();
    let mut first = store.open(Kind::Topic, Some("main"))?;
    first.set("description", "first writer")?;
    let mut second = store.open(Kind::Topic, Some("main"))?;
    assert!(matches!(
        second.set("description", "second writer"),
        Err(Error::ObjectBusy { .. })
    ));
    assert!(!second.is_staged());
    assert!(first.is_staged());
    Ok(())
}

#[test]
fn test_lookup_dispatches_on_prefix() -> Result<()> {
    let (_dir, store) = test_store();
    let entry = file_entry(&store, "a", b"1")?.publish()?;
    match store.lookup(&entry.to_string())? {
        Some(Resolved::Entry(found)) => assert_eq!(found.reference(), entry),
        other => panic!("unexpected {:?}", other),
    }
    assert!(store.lookup("topic/missing")?.is_none());
    assert!(store.lookup("branch/main")?.is_none());
    assert!(store.lookup(&format!("commit/{}", "0".repeat(40)))?.is_none());

    let resolved = store.resolve(&entry)?.unwrap();
    assert!(matches!(
        Commit::try_from(resolved),
        Err(Error::WrongKind { .. })
    ));
    Ok(())
}

#[test]
fn test_named_kinds_need_an_id() {
    let (_dir, store) = test_store();
    assert!(matches!(
        store.open(Kind::Topic, None),
        Err(Error::InvalidId { .. })
    ));
}
