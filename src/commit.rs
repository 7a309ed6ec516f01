use std::rc::Rc;

use crate::{
    arena::{Arena, CommitRecord},
    entry::Entry,
    error::{Error, Result},
    kind::Kind,
    object_store::{Object, Store},
    reference::Reference,
};

/// An immutable snapshot: a description, the root [`Entry`] of the tree and,
/// except for the first one, the commit it was made on top of.
#[derive(Debug)]
pub struct Commit {
    object: Object,
}

impl Commit {
    pub(crate) fn from_object(object: Object) -> Self {
        Commit { object }
    }

    pub fn open(store: &Store, reference: &Reference) -> Result<Self> {
        if reference.kind() != Kind::Commit {
            return Err(Error::WrongKind {
                reference: reference.to_string(),
                expected: Kind::Commit,
            });
        }
        let object = store.open(Kind::Commit, Some(reference.id()))?;
        if !object.exists()? {
            return Err(Error::Corrupt {
                path: reference.to_string(),
                reason: String::from("dangling commit reference"),
            });
        }
        Ok(Commit::from_object(object))
    }

    pub fn create(
        store: &Store,
        description: &str,
        parent: Option<&Reference>,
        root: &Reference,
    ) -> Result<Self> {
        let mut object = store.open(Kind::Commit, None)?;
        object.set("description", description)?;
        object.set("root", root.clone())?;
        if let Some(parent) = parent {
            object.set("parent", parent.clone())?;
        }
        let reference = object.publish()?;
        log::info!("committed {} ({:?})", reference, description);
        Ok(Commit::from_object(object))
    }

    pub fn reference(&self) -> Reference {
        self.object
            .reference()
            .unwrap_or_else(|| unreachable!("commits are only handed out once published"))
    }

    pub fn description(&self) -> Result<String> {
        self.object.text("description")
    }

    pub fn parent(&self) -> Result<Option<Reference>> {
        self.object.reference_attribute("parent")
    }

    pub fn root(&self) -> Result<Reference> {
        self.object
            .reference_attribute("root")?
            .ok_or_else(|| Error::Corrupt {
                path: self.reference().to_string(),
                reason: String::from("missing root"),
            })
    }

    pub fn root_entry(&self) -> Result<Entry> {
        Entry::open(self.object.store(), &self.root()?)
    }
}

/// Walks a commit chain from newest to oldest, stopping after the commit
/// without a parent.
pub struct History<'a> {
    store: &'a Store,
    arena: Arena,
    next: Option<Reference>,
}

impl<'a> History<'a> {
    pub fn new(store: &'a Store, start: Reference) -> Self {
        History {
            store,
            arena: Arena::new(),
            next: Some(start),
        }
    }
}

impl<'a> Iterator for History<'a> {
    type Item = Result<Rc<CommitRecord>>;

    fn next(&mut self) -> Option<Self::Item> {
        let reference = self.next.take()?;
        match self.arena.commit(self.store, &reference) {
            Ok(record) => {
                self.next = record.parent.clone();
                Some(Ok(record))
            }
            Err(err) => Some(Err(err)),
        }
    }
}

#[test]
fn test_history_walks_back_to_the_first_commit() -> Result<()> {
    use std::collections::BTreeSet;

    let dir = tempfile::tempdir()?;
    let store = Store::new(dir.path().to_path_buf())?;
    let root = Entry::create_directory(&store, ".", "rw", &BTreeSet::new())?.reference();
    let c1 = Commit::create(&store, "C1", None, &root)?;
    let c2 = Commit::create(&store, "C2", Some(&c1.reference()), &root)?;
    let c3 = Commit::create(&store, "C3", Some(&c2.reference()), &root)?;

    let descriptions: Vec<String> = History::new(&store, c3.reference())
        .map(|record| record.map(|record| record.description.clone()))
        .collect::<Result<_>>()?;
    assert_eq!(descriptions, vec!["C3", "C2", "C1"]);
    assert_eq!(c1.parent()?, None);
    assert_eq!(c3.parent()?, Some(c2.reference()));
    assert_eq!(c2.root_entry()?.reference(), root);
    Ok(())
}

#[test]
fn test_open_rejects_other_kinds() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let store = Store::new(dir.path().to_path_buf())?;
    let topic = Reference::new(Kind::Topic, "main")?;
    assert!(matches!(
        Commit::open(&store, &topic),
        Err(Error::WrongKind { .. })
    ));
    let missing = Reference::new(Kind::Commit, "0".repeat(40))?;
    assert!(matches!(
        Commit::open(&store, &missing),
        Err(Error::Corrupt { .. })
    ));
    Ok(())
}
