use std::{
    collections::BTreeSet,
    fs::{self, Metadata},
    path::Path,
};

use crate::{
    attribute::{AttributeValue, Blob},
    config::Config,
    content_hash::ContentHash,
    error::{Error, Result},
    kind::Kind,
    object_store::{Object, Store},
    reference::Reference,
};

/// One node of a snapshot tree: a file with its contents, or a directory
/// with the set of its children. Entries carry their own name and never
/// point back at their parent, so identical subtrees are shared.
#[derive(Debug)]
pub struct Entry {
    object: Object,
}

/// What an [`Entry`] holds besides its name.
#[derive(PartialEq, Eq, Debug, Clone)]
pub enum EntryNode {
    File {
        contents: Blob,
        contents_hash: ContentHash,
    },
    Directory {
        children: BTreeSet<Reference>,
    },
}

impl Entry {
    pub(crate) fn from_object(object: Object) -> Self {
        Entry { object }
    }

    pub fn open(store: &Store, reference: &Reference) -> Result<Self> {
        if reference.kind() != Kind::Entry {
            return Err(Error::WrongKind {
                reference: reference.to_string(),
                expected: Kind::Entry,
            });
        }
        let object = store.open(Kind::Entry, Some(reference.id()))?;
        if !object.exists()? {
            return Err(Error::Corrupt {
                path: reference.to_string(),
                reason: String::from("dangling entry reference"),
            });
        }
        Ok(Entry::from_object(object))
    }

    pub fn create_file(store: &Store, name: &str, permissions: &str, source: &Path) -> Result<Self> {
        let contents_hash = ContentHash::try_from(source)?;
        let mut object = store.open(Kind::Entry, None)?;
        object.set("name", name)?;
        object.set("permissions", permissions)?;
        object.set("contents", Blob::File(source.to_path_buf()))?;
        object.set("contents_hash", contents_hash.to_string())?;
        object.publish()?;
        Ok(Entry::from_object(object))
    }

    pub fn create_directory(
        store: &Store,
        name: &str,
        permissions: &str,
        children: &BTreeSet<Reference>,
    ) -> Result<Self> {
        let mut object = store.open(Kind::Entry, None)?;
        object.set("name", name)?;
        object.set("permissions", permissions)?;
        object.set("children", children.clone())?;
        object.publish()?;
        Ok(Entry::from_object(object))
    }

    /// Records the file or directory at `path` (and everything below it) as
    /// published entries. Nodes that are neither files nor directories, and
    /// ignored names, are skipped; `None` means `path` itself was skipped.
    pub fn record(store: &Store, path: &Path, name: &str, config: &Config) -> Result<Option<Self>> {
        let metadata = fs::symlink_metadata(path)?;
        let permissions = permissions(&metadata);
        let file_type = metadata.file_type();
        if file_type.is_dir() {
            let mut children = BTreeSet::new();
            for f in fs::read_dir(path)? {
                let dir_entry = f?;
                let file_name = dir_entry.file_name();
                if config.is_ignored(&file_name) {
                    continue;
                }
                let Some(child_name) = file_name.to_str() else {
                    log::warn!("skipping {:?}: name is not UTF-8", dir_entry.path());
                    continue;
                };
                if let Some(child) = Entry::record(store, &dir_entry.path(), child_name, config)? {
                    children.insert(child.reference());
                }
            }
            log::debug!("recorded directory {:?}", path);
            Ok(Some(Entry::create_directory(store, name, &permissions, &children)?))
        } else if file_type.is_file() {
            log::debug!("recorded file {:?}", path);
            Ok(Some(Entry::create_file(store, name, &permissions, path)?))
        } else {
            log::warn!("skipping {:?}: not a file or directory", path);
            Ok(None)
        }
    }

    pub fn reference(&self) -> Reference {
        self.object
            .reference()
            .unwrap_or_else(|| unreachable!("entries are only handed out once published"))
    }

    pub fn name(&self) -> Result<String> {
        self.object.text("name")
    }

    pub fn permissions(&self) -> Result<String> {
        self.object.text("permissions")
    }

    /// A directory iff `children` is set, a file iff `contents` is.
    pub fn node(&self) -> Result<EntryNode> {
        if let Some(children) = self.object.get("children")? {
            let children = children
                .into_reference_set()
                .ok_or_else(|| self.corrupt("children decoded to the wrong shape"))?;
            return Ok(EntryNode::Directory { children });
        }
        let contents = self
            .object
            .blob("contents")?
            .ok_or_else(|| self.corrupt("neither contents nor children"))?;
        let contents_hash = self
            .object
            .get("contents_hash")?
            .and_then(AttributeValue::into_text)
            .ok_or_else(|| self.corrupt("missing contents_hash"))?
            .parse::<ContentHash>()
            .map_err(|_| self.corrupt("contents_hash is not a content hash"))?;
        Ok(EntryNode::File {
            contents,
            contents_hash,
        })
    }

    fn corrupt(&self, reason: &str) -> Error {
        Error::Corrupt {
            path: self.reference().to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Placeholder permissions: only whether the node is writable.
fn permissions(metadata: &Metadata) -> String {
    if metadata.permissions().readonly() {
        String::from("r")
    } else {
        String::from("rw")
    }
}

#[test]
fn test_record() -> Result<()> {
    let work = tempfile::tempdir()?;
    let store = Store::new(work.path().join(".wad"))?;
    fs::write(work.path().join("README.md"), b"# readme")?;
    fs::create_dir_all(work.path().join("src").join("empty"))?;
    fs::write(work.path().join("src").join("lib.rs"), b"fn main() {}")?;

    let root = Entry::record(&store, work.path(), ".", &Config::default())?.unwrap();
    assert_eq!(root.name()?, ".");
    let EntryNode::Directory { children } = root.node()? else {
        panic!("root must be a directory");
    };
    let mut names = Vec::new();
    for child in &children {
        names.push(Entry::open(&store, child)?.name()?);
    }
    names.sort();
    // The store's own directory is never part of a snapshot.
    assert_eq!(names, vec!["README.md", "src"]);

    let readme = children
        .iter()
        .map(|child| Entry::open(&store, child))
        .collect::<Result<Vec<_>>>()?
        .into_iter()
        .find(|entry| entry.name().map(|name| name == "README.md").unwrap_or(false))
        .unwrap();
    match readme.node()? {
        EntryNode::File {
            contents,
            contents_hash,
        } => {
            assert_eq!(contents.read()?, b"# readme");
            let b: &[u8] = b"# readme";
            assert_eq!(contents_hash, ContentHash::from(b));
        }
        other => panic!("unexpected {:?}", other),
    }
    Ok(())
}

#[test]
fn test_empty_directories_are_shared() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let store = Store::new(dir.path().to_path_buf())?;
    let a = Entry::create_directory(&store, "empty", "rw", &BTreeSet::new())?;
    let b = Entry::create_directory(&store, "empty", "rw", &BTreeSet::new())?;
    assert_eq!(a.reference(), b.reference());
    assert_eq!(a.node()?, EntryNode::Directory { children: BTreeSet::new() });
    Ok(())
}
