//! Comparison of a working directory against a recorded [`Entry`] tree.
//!
//! [`Diff`] walks both trees depth first and yields changes bottom-up: every
//! change below a directory comes before any change to the directory itself.
//!
//! [`Entry`]: crate::entry::Entry

use std::{
    collections::{BTreeMap, VecDeque},
    ffi::OsStr,
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    rc::Rc,
};

use serde::Serialize;

use crate::{
    arena::{Arena, EntryRecord},
    config::Config,
    content_hash::ContentHash,
    entry::EntryNode,
    error::Result,
    object_store::Store,
    reference::Reference,
};

#[derive(PartialEq, Eq, Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Create,
    Delete,
    Modify,
}

#[derive(PartialEq, Eq, Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    File,
    Directory,
}

/// One difference, at a path relative to the compared root.
#[derive(PartialEq, Eq, Debug, Clone, Serialize)]
pub struct Change {
    pub kind: ChangeKind,
    pub node: NodeType,
    pub path: PathBuf,
}

#[derive(PartialEq, Eq, Debug, Clone, Copy)]
enum OnDisk {
    File,
    Directory,
    Absent,
}

struct Frame {
    path: PathBuf,
    disk: OnDisk,
    entry: Option<Rc<EntryRecord>>,
    /// Children still to visit; `None` until the frame has been expanded.
    pending: Option<VecDeque<(String, Option<Rc<EntryRecord>>)>>,
}

/// A lazy, depth-first sequence of [`Change`]s.
pub struct Diff<'a> {
    store: &'a Store,
    config: &'a Config,
    workdir: PathBuf,
    arena: Arena,
    stack: Vec<Frame>,
    ready: VecDeque<Change>,
}

impl<'a> Diff<'a> {
    /// Compares `workdir` with the tree rooted at `root`; with no root every
    /// file on disk is new.
    pub fn new(
        store: &'a Store,
        config: &'a Config,
        workdir: &Path,
        root: Option<&Reference>,
    ) -> Result<Self> {
        let mut arena = Arena::new();
        let entry = match root {
            Some(root) => Some(arena.entry(store, root)?),
            None => None,
        };
        let frame = Frame {
            path: PathBuf::new(),
            disk: classify(workdir)?,
            entry,
            pending: None,
        };
        Ok(Diff {
            store,
            config,
            workdir: workdir.to_path_buf(),
            arena,
            stack: vec![frame],
            ready: VecDeque::new(),
        })
    }

    fn expand(&mut self, frame: &Frame) -> Result<VecDeque<(String, Option<Rc<EntryRecord>>)>> {
        let mut children: BTreeMap<String, Option<Rc<EntryRecord>>> = BTreeMap::new();
        if frame.disk == OnDisk::Directory {
            for f in fs::read_dir(self.workdir.join(&frame.path))? {
                let dir_entry = f?;
                let file_name = dir_entry.file_name();
                if self.config.is_ignored(&file_name) {
                    continue;
                }
                match file_name.into_string() {
                    Ok(name) => {
                        children.insert(name, None);
                    }
                    Err(name) => log::warn!("skipping {:?}: name is not UTF-8", name),
                }
            }
        }
        if let Some(entry) = &frame.entry {
            for (name, child) in self.arena.children(self.store, entry)? {
                if self.config.is_ignored(OsStr::new(&name)) {
                    continue;
                }
                children.insert(name, Some(child));
            }
        }
        Ok(children.into_iter().collect())
    }

    /// Queues the changes for `frame` itself, once its children are done.
    fn settle(&mut self, frame: Frame) -> Result<()> {
        if frame.path.as_os_str().is_empty() {
            return Ok(());
        }
        let change = |kind, node| Change {
            kind,
            node,
            path: frame.path.clone(),
        };
        let recorded = frame.entry.as_ref().map(|entry| match &entry.node {
            EntryNode::File { contents_hash, .. } => (NodeType::File, Some(*contents_hash)),
            EntryNode::Directory { .. } => (NodeType::Directory, None),
        });
        match (frame.disk, recorded) {
            (OnDisk::Absent, None) => {}
            (OnDisk::File, None) => self.ready.push_back(change(ChangeKind::Create, NodeType::File)),
            (OnDisk::Directory, None) => {
                self.ready.push_back(change(ChangeKind::Create, NodeType::Directory))
            }
            (OnDisk::Absent, Some((node, _))) => self.ready.push_back(change(ChangeKind::Delete, node)),
            (OnDisk::Directory, Some((NodeType::Directory, _))) => {}
            (OnDisk::File, Some((NodeType::File, recorded_hash))) => {
                let current = ContentHash::try_from(self.workdir.join(&frame.path).as_path())?;
                if Some(current) != recorded_hash {
                    self.ready.push_back(change(ChangeKind::Modify, NodeType::File));
                }
            }
            (OnDisk::File, Some((NodeType::Directory, _))) => {
                self.ready.push_back(change(ChangeKind::Delete, NodeType::Directory));
                self.ready.push_back(change(ChangeKind::Create, NodeType::File));
            }
            (OnDisk::Directory, Some((NodeType::File, _))) => {
                self.ready.push_back(change(ChangeKind::Delete, NodeType::File));
                self.ready.push_back(change(ChangeKind::Create, NodeType::Directory));
            }
        }
        Ok(())
    }

    fn step(&mut self) -> Result<()> {
        let Some(mut top) = self.stack.pop() else {
            return Ok(());
        };
        if top.pending.is_none() {
            top.pending = Some(self.expand(&top)?);
        }
        let next = top.pending.as_mut().and_then(VecDeque::pop_front);
        match next {
            Some((name, entry)) => {
                let path = top.path.join(&name);
                let disk = classify(&self.workdir.join(&path))?;
                self.stack.push(top);
                self.stack.push(Frame {
                    path,
                    disk,
                    entry,
                    pending: None,
                });
            }
            None => self.settle(top)?,
        }
        Ok(())
    }
}

impl<'a> Iterator for Diff<'a> {
    type Item = Result<Change>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(change) = self.ready.pop_front() {
                return Some(Ok(change));
            }
            if self.stack.is_empty() {
                return None;
            }
            if let Err(err) = self.step() {
                self.stack.clear();
                return Some(Err(err));
            }
        }
    }
}

fn classify(path: &Path) -> Result<OnDisk> {
    match fs::symlink_metadata(path) {
        Ok(metadata) if metadata.is_dir() => Ok(OnDisk::Directory),
        Ok(metadata) if metadata.is_file() => Ok(OnDisk::File),
        Ok(_) => {
            log::warn!("ignoring {:?}: not a file or directory", path);
            Ok(OnDisk::Absent)
        }
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(OnDisk::Absent),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
fn snapshot(store: &Store, workdir: &Path, config: &Config) -> Reference {
    crate::entry::Entry::record(store, workdir, ".", config)
        .unwrap()
        .unwrap()
        .reference()
}

#[cfg(test)]
fn changes(store: &Store, workdir: &Path, config: &Config, root: &Reference) -> Vec<Change> {
    Diff::new(store, config, workdir, Some(root))
        .unwrap()
        .collect::<Result<Vec<_>>>()
        .unwrap()
}

#[cfg(test)]
fn change(kind: ChangeKind, node: NodeType, path: &str) -> Change {
    Change {
        kind,
        node,
        path: PathBuf::from(path),
    }
}

#[test]
fn test_unchanged_tree_has_no_changes() {
    let work = tempfile::tempdir().unwrap();
    let store = Store::new(work.path().join(".wad")).unwrap();
    let config = Config::default();
    fs::write(work.path().join("a"), "1").unwrap();
    fs::create_dir(work.path().join("dir")).unwrap();
    fs::write(work.path().join("dir").join("b"), "2").unwrap();
    let root = snapshot(&store, work.path(), &config);
    assert!(changes(&store, work.path(), &config, &root).is_empty());
    assert!(changes(&store, work.path(), &config, &root).is_empty());
}

#[test]
fn test_diff_classifies_changes() {
    let work = tempfile::tempdir().unwrap();
    let store = Store::new(work.path().join(".wad")).unwrap();
    let config = Config::default();
    fs::write(work.path().join("a"), "1").unwrap();
    fs::create_dir(work.path().join("dir")).unwrap();
    fs::write(work.path().join("dir").join("b"), "2").unwrap();
    let root = snapshot(&store, work.path(), &config);

    fs::remove_file(work.path().join("a")).unwrap();
    fs::write(work.path().join("dir").join("b"), "3").unwrap();
    fs::write(work.path().join("dir").join("c"), "4").unwrap();

    let mut found = changes(&store, work.path(), &config, &root);
    found.sort_by(|x, y| x.path.cmp(&y.path));
    assert_eq!(
        found,
        vec![
            change(ChangeKind::Delete, NodeType::File, "a"),
            change(ChangeKind::Modify, NodeType::File, "dir/b"),
            change(ChangeKind::Create, NodeType::File, "dir/c"),
        ]
    );
}

#[test]
fn test_children_come_before_their_directory() {
    let work = tempfile::tempdir().unwrap();
    let store = Store::new(work.path().join(".wad")).unwrap();
    let config = Config::default();
    fs::create_dir_all(work.path().join("gone").join("deeper")).unwrap();
    fs::write(work.path().join("gone").join("deeper").join("x"), "x").unwrap();
    let root = snapshot(&store, work.path(), &config);

    fs::remove_dir_all(work.path().join("gone")).unwrap();
    fs::create_dir(work.path().join("new")).unwrap();
    fs::write(work.path().join("new").join("y"), "y").unwrap();

    assert_eq!(
        changes(&store, work.path(), &config, &root),
        vec![
            change(ChangeKind::Delete, NodeType::File, "gone/deeper/x"),
            change(ChangeKind::Delete, NodeType::Directory, "gone/deeper"),
            change(ChangeKind::Delete, NodeType::Directory, "gone"),
            change(ChangeKind::Create, NodeType::File, "new/y"),
            change(ChangeKind::Create, NodeType::Directory, "new"),
        ]
    );
}

#[test]
fn test_type_change_is_delete_then_create() {
    let work = tempfile::tempdir().unwrap();
    let store = Store::new(work.path().join(".wad")).unwrap();
    let config = Config::default();
    fs::write(work.path().join("thing"), "file").unwrap();
    let root = snapshot(&store, work.path(), &config);

    fs::remove_file(work.path().join("thing")).unwrap();
    fs::create_dir(work.path().join("thing")).unwrap();
    fs::write(work.path().join("thing").join("inner"), "i").unwrap();

    assert_eq!(
        changes(&store, work.path(), &config, &root),
        vec![
            change(ChangeKind::Create, NodeType::File, "thing/inner"),
            change(ChangeKind::Delete, NodeType::File, "thing"),
            change(ChangeKind::Create, NodeType::Directory, "thing"),
        ]
    );
}

#[test]
fn test_ignored_names_and_store_are_excluded() {
    let work = tempfile::tempdir().unwrap();
    let store = Store::new(work.path().join(".wad")).unwrap();
    let config = Config::default();
    let root = snapshot(&store, work.path(), &config);

    fs::create_dir_all(work.path().join("sub").join(".git")).unwrap();
    fs::write(work.path().join("sub").join(".git").join("HEAD"), "x").unwrap();
    fs::create_dir_all(work.path().join("sub").join(".wad")).unwrap();

    assert_eq!(
        changes(&store, work.path(), &config, &root),
        vec![change(ChangeKind::Create, NodeType::Directory, "sub")]
    );
}

#[test]
fn test_diff_without_a_recorded_tree() {
    let work = tempfile::tempdir().unwrap();
    let store = Store::new(work.path().join(".wad")).unwrap();
    let config = Config::default();
    fs::write(work.path().join("a"), "1").unwrap();
    let found: Vec<Change> = Diff::new(&store, &config, work.path(), None)
        .unwrap()
        .collect::<Result<_>>()
        .unwrap();
    assert_eq!(found, vec![change(ChangeKind::Create, NodeType::File, "a")]);
}
