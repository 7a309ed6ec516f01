//! Decoded commits and entries, loaded once and shared by reference.
//!
//! Records only point forward, at older content, through [`Reference`]s, so
//! the arena is a plain map with no cycles to worry about.

use std::{collections::BTreeMap, rc::Rc};

use crate::{
    commit::Commit,
    entry::{Entry, EntryNode},
    error::Result,
    object_store::Store,
    reference::Reference,
};

#[derive(PartialEq, Eq, Debug, Clone)]
pub struct CommitRecord {
    pub reference: Reference,
    pub description: String,
    pub parent: Option<Reference>,
    pub root: Reference,
}

#[derive(PartialEq, Eq, Debug, Clone)]
pub struct EntryRecord {
    pub reference: Reference,
    pub name: String,
    pub permissions: String,
    pub node: EntryNode,
}

impl EntryRecord {
    pub fn is_directory(&self) -> bool {
        matches!(self.node, EntryNode::Directory { .. })
    }
}

#[derive(Debug, Default)]
pub struct Arena {
    commits: BTreeMap<Reference, Rc<CommitRecord>>,
    entries: BTreeMap<Reference, Rc<EntryRecord>>,
}

impl Arena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commit(&mut self, store: &Store, reference: &Reference) -> Result<Rc<CommitRecord>> {
        if let Some(record) = self.commits.get(reference) {
            return Ok(record.clone());
        }
        let commit = Commit::open(store, reference)?;
        let record = Rc::new(CommitRecord {
            reference: reference.clone(),
            description: commit.description()?,
            parent: commit.parent()?,
            root: commit.root()?,
        });
        self.commits.insert(reference.clone(), record.clone());
        Ok(record)
    }

    pub fn entry(&mut self, store: &Store, reference: &Reference) -> Result<Rc<EntryRecord>> {
        if let Some(record) = self.entries.get(reference) {
            return Ok(record.clone());
        }
        let entry = Entry::open(store, reference)?;
        let record = Rc::new(EntryRecord {
            reference: reference.clone(),
            name: entry.name()?,
            permissions: entry.permissions()?,
            node: entry.node()?,
        });
        self.entries.insert(reference.clone(), record.clone());
        Ok(record)
    }

    /// The children of a directory record, keyed by name. Files have none.
    pub fn children(
        &mut self,
        store: &Store,
        record: &EntryRecord,
    ) -> Result<BTreeMap<String, Rc<EntryRecord>>> {
        let mut children = BTreeMap::new();
        if let EntryNode::Directory { children: references } = &record.node {
            for reference in references {
                let child = self.entry(store, reference)?;
                children.insert(child.name.clone(), child);
            }
        }
        Ok(children)
    }
}

#[test]
fn test_arena_loads_once() -> Result<()> {
    use std::collections::BTreeSet;

    let dir = tempfile::tempdir()?;
    let store = Store::new(dir.path().to_path_buf())?;
    let empty = Entry::create_directory(&store, "empty", "rw", &BTreeSet::new())?;
    let root = Entry::create_directory(
        &store,
        ".",
        "rw",
        &[empty.reference()].into_iter().collect(),
    )?;
    let commit = Commit::create(&store, "first", None, &root.reference())?;

    let mut arena = Arena::new();
    let record = arena.commit(&store, &commit.reference())?;
    assert_eq!(record.description, "first");
    assert!(Rc::ptr_eq(&record, &arena.commit(&store, &commit.reference())?));

    let root = arena.entry(&store, &record.root)?;
    assert!(root.is_directory());
    let children = arena.children(&store, &root)?;
    assert_eq!(children.keys().collect::<Vec<_>>(), vec!["empty"]);
    Ok(())
}
