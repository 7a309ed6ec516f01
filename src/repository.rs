use std::{
    fs,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};

use crate::{
    commit::{Commit, History},
    config::{Config, ADMIN_DIR},
    diff::{Change, Diff},
    entry::Entry,
    error::{Error, Result, UsageError},
    kind::Kind,
    object_store::{Resolved, Store},
    reference::Reference,
    topic::{self, Topic},
};

/// Description given to topics when they are created.
pub const NEW_TOPIC_DESCRIPTION: &str = "new topic";

/// A working directory together with the `.wad` directory inside it, which
/// holds the object store, the config and the head pointer.
#[derive(Debug)]
pub struct Repository {
    workdir: PathBuf,
    store: Store,
    config: Config,
}

impl Repository {
    pub fn is_initialized(workdir: &Path) -> bool {
        workdir.join(ADMIN_DIR).is_dir()
    }

    /// Creates `.wad` in `workdir`, records everything already there as the
    /// first commit and starts out on topic `main`.
    pub fn init(workdir: PathBuf) -> Result<Self> {
        let root = workdir.join(ADMIN_DIR);
        if root.try_exists()? {
            return Err(UsageError::AlreadyInitialized(workdir.display().to_string()).into());
        }
        let store = Store::new(root.clone())?;
        let config = Config::default();
        config.write(&root.join("config"))?;
        let repository = Repository {
            workdir,
            store,
            config,
        };

        let snapshot = repository.record_snapshot()?;
        let commit = repository.create_commit("wad init", None, &snapshot.reference())?;
        let main = repository.create_topic("main", Some(&commit.reference()))?;
        repository.set_head(&main.reference())?;
        log::info!("initialized {:?}", repository.workdir);
        Ok(repository)
    }

    pub fn open(workdir: PathBuf) -> Result<Self> {
        if !Repository::is_initialized(&workdir) {
            return Err(UsageError::NotInitialized(workdir.display().to_string()).into());
        }
        let root = workdir.join(ADMIN_DIR);
        let config = Config::read(&root.join("config"))?;
        let store = Store::new(root)?;
        Ok(Repository {
            workdir,
            store,
            config,
        })
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn head_path(&self) -> PathBuf {
        self.store.root().join("head")
    }

    /// The persisted head: a topic, or a commit when detached.
    pub fn head(&self) -> Result<Reference> {
        let path = self.head_path();
        let text = fs::read_to_string(&path).map_err(|err| Error::broken(&path, err))?;
        match Reference::parse(&text) {
            Ok(Some(reference)) if matches!(reference.kind(), Kind::Topic | Kind::Commit) => {
                Ok(reference)
            }
            _ => Err(Error::broken(
                &path,
                io::Error::new(
                    ErrorKind::InvalidData,
                    format!("{:?} is not a topic or commit", text.trim()),
                ),
            )),
        }
    }

    pub fn set_head(&self, reference: &Reference) -> Result<()> {
        let path = self.head_path();
        fs::write(&path, reference.to_string()).map_err(|err| Error::broken(&path, err))?;
        log::info!("head is now {}", reference);
        Ok(())
    }

    /// The commit a topic or commit reference stands for, if it exists.
    fn commit_at(&self, reference: &Reference) -> Result<Option<Commit>> {
        match self.store.resolve(reference)? {
            Some(Resolved::Topic(topic)) => Ok(Some(topic.commit()?)),
            Some(Resolved::Commit(commit)) => Ok(Some(commit)),
            Some(Resolved::Entry(entry)) => Err(Error::WrongKind {
                reference: entry.reference().to_string(),
                expected: Kind::Commit,
            }),
            None => Ok(None),
        }
    }

    pub fn head_commit(&self) -> Result<Commit> {
        let head = self.head()?;
        self.commit_at(&head)?.ok_or_else(|| {
            Error::broken(
                &self.head_path(),
                io::Error::new(ErrorKind::NotFound, format!("{} does not exist", head)),
            )
        })
    }

    /// Publishes a topic at `starting` (head's commit by default).
    pub fn create_topic(&self, name: &str, starting: Option<&Reference>) -> Result<Topic> {
        let start = match starting {
            Some(start) => start.clone(),
            None => self.head_commit()?.reference(),
        };
        Topic::create(&self.store, name, NEW_TOPIC_DESCRIPTION, &start)
    }

    /// Publishes the whole working directory as an entry tree.
    pub fn record_snapshot(&self) -> Result<Entry> {
        Entry::record(&self.store, &self.workdir, ".", &self.config)?
            .ok_or_else(|| Error::corrupt(&self.workdir, "working directory is not a directory"))
    }

    pub fn create_commit(
        &self,
        description: &str,
        parent: Option<&Reference>,
        root: &Reference,
    ) -> Result<Commit> {
        Commit::create(&self.store, description, parent, root)
    }

    /// The changes between the working directory and the tree recorded by
    /// the commit `head` stands for.
    pub fn diff_against(&self, head: &Reference) -> Result<Diff<'_>> {
        let commit = self
            .commit_at(head)?
            .ok_or_else(|| UsageError::UnknownReference(head.to_string()))?;
        let root = commit.root()?;
        Diff::new(&self.store, &self.config, &self.workdir, Some(&root))
    }

    /// Every change against the current head.
    pub fn changes(&self) -> Result<Vec<Change>> {
        self.diff_against(&self.head()?)?.collect()
    }

    pub fn list_topics(&self) -> Result<Vec<Topic>> {
        Ok(self
            .store
            .iterate(Kind::Topic)?
            .into_iter()
            .map(Topic::from_object)
            .collect())
    }

    pub fn lookup(&self, reference: &str) -> Result<Option<Resolved>> {
        self.store.lookup(reference)
    }

    /// Commits from the one `from` stands for back to the first.
    pub fn history(&self, from: &Reference) -> Result<History<'_>> {
        let commit = self
            .commit_at(from)?
            .ok_or_else(|| UsageError::UnknownReference(from.to_string()))?;
        Ok(History::new(&self.store, commit.reference()))
    }

    /// Records the working directory as a commit on top of head. On a topic
    /// the topic moves; when detached, head itself moves.
    pub fn new_commit(&self, description: &str) -> Result<Commit> {
        let head = self.head()?;
        let parent = self.head_commit()?;
        if !self.has_changes()? {
            return Err(UsageError::NothingToCommit.into());
        }
        let snapshot = self.record_snapshot()?;
        let commit = self.create_commit(
            description,
            Some(&parent.reference()),
            &snapshot.reference(),
        )?;
        match self.store.resolve(&head)? {
            Some(Resolved::Topic(mut topic)) => topic.set_tip(&commit.reference())?,
            _ => self.set_head(&commit.reference())?,
        }
        Ok(commit)
    }

    /// Creates a topic at head's commit and goes to it.
    pub fn new_topic(&self, name: &str) -> Result<Topic> {
        topic::validate_name(name)?;
        self.ensure_clean()?;
        let topic = self.create_topic(name, None)?;
        self.set_head(&topic.reference())?;
        Ok(topic)
    }

    /// Moves head to `target`, a reference or a bare topic name. Only the
    /// head pointer moves; the working directory is left as it is.
    pub fn goto(&self, target: &str) -> Result<Reference> {
        let unknown = || Error::from(UsageError::UnknownReference(target.to_string()));
        let parsed = if target.contains('/') {
            Reference::parse(target).ok().flatten()
        } else {
            Reference::new(Kind::Topic, target).ok()
        };
        let reference = parsed.ok_or_else(unknown)?;
        if reference.kind() == Kind::Entry || self.commit_at(&reference)?.is_none() {
            return Err(unknown());
        }
        self.ensure_clean()?;
        self.set_head(&reference)?;
        Ok(reference)
    }

    /// Whether the working directory differs from head, stopping at the
    /// first change found.
    pub fn has_changes(&self) -> Result<bool> {
        match self.diff_against(&self.head()?)?.next() {
            None => Ok(false),
            Some(change) => change.map(|_| true),
        }
    }

    fn ensure_clean(&self) -> Result<()> {
        if self.has_changes()? {
            return Err(UsageError::UncommittedChanges.into());
        }
        Ok(())
    }
}

#[cfg(test)]
fn write(repository: &Repository, path: &str, contents: &str) {
    let path = repository.workdir().join(path);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, contents).unwrap();
}

#[test]
fn test_init() -> Result<()> {
    let work = tempfile::tempdir()?;
    fs::write(work.path().join("existing"), "already here")?;
    let repository = Repository::init(work.path().to_path_buf())?;
    assert!(Repository::is_initialized(work.path()));
    assert_eq!(repository.head()?.to_string(), "topic/main");
    assert_eq!(repository.head_commit()?.description()?, "wad init");
    assert!(repository.changes()?.is_empty());

    match Repository::init(work.path().to_path_buf()) {
        Err(Error::Usage(UsageError::AlreadyInitialized(_))) => {}
        other => panic!("unexpected {:?}", other),
    }
    Ok(())
}

#[test]
fn test_open_requires_init() {
    let work = tempfile::tempdir().unwrap();
    match Repository::open(work.path().to_path_buf()) {
        Err(err) => assert!(err.is_usage()),
        Ok(_) => panic!("opened an uninitialized directory"),
    }
}

#[test]
fn test_broken_head() -> Result<()> {
    let work = tempfile::tempdir()?;
    let repository = Repository::init(work.path().to_path_buf())?;
    fs::write(repository.head_path(), "garbage")?;
    assert!(matches!(
        repository.head(),
        Err(Error::BrokenRepository { .. })
    ));
    fs::remove_file(repository.head_path())?;
    assert!(matches!(
        repository.head(),
        Err(Error::BrokenRepository { .. })
    ));
    Ok(())
}

#[test]
fn test_new_commit_moves_the_topic() -> Result<()> {
    let work = tempfile::tempdir()?;
    let repository = Repository::init(work.path().to_path_buf())?;
    let init = repository.head_commit()?.reference();
    match repository.new_commit("nothing") {
        Err(Error::Usage(UsageError::NothingToCommit)) => {}
        other => panic!("unexpected {:?}", other),
    }

    write(&repository, "new_file", "a");
    assert_eq!(repository.changes()?.len(), 1);
    let commit = repository.new_commit("new file")?;
    assert_eq!(repository.head()?.to_string(), "topic/main");
    assert_eq!(repository.head_commit()?.reference(), commit.reference());
    assert_eq!(commit.parent()?, Some(init));
    assert!(repository.changes()?.is_empty());

    let descriptions: Vec<String> = repository
        .history(&repository.head()?)?
        .map(|record| record.map(|record| record.description.clone()))
        .collect::<Result<_>>()?;
    assert_eq!(descriptions, vec!["new file", "wad init"]);
    Ok(())
}

#[test]
fn test_new_commit_when_detached_moves_head() -> Result<()> {
    let work = tempfile::tempdir()?;
    let repository = Repository::init(work.path().to_path_buf())?;
    let init = repository.head_commit()?.reference();
    repository.goto(&init.to_string())?;
    write(&repository, "detached", "d");
    let commit = repository.new_commit("detached work")?;
    assert_eq!(repository.head()?, commit.reference());
    let main = Topic::open(repository.store(), "main")?;
    assert_eq!(main.tip()?, init);
    Ok(())
}

#[test]
fn test_topics() -> Result<()> {
    let work = tempfile::tempdir()?;
    let repository = Repository::init(work.path().to_path_buf())?;
    let topic = repository.new_topic("test")?;
    assert_eq!(repository.head()?, topic.reference());
    assert_eq!(topic.description()?, NEW_TOPIC_DESCRIPTION);
    let names: Vec<String> = repository
        .list_topics()?
        .iter()
        .map(Topic::name)
        .collect();
    assert_eq!(names, vec!["main", "test"]);

    match repository.new_topic("main") {
        Err(Error::Usage(UsageError::TopicAlreadyExists(_))) => {}
        other => panic!("unexpected {:?}", other),
    }

    write(&repository, "dirty", "x");
    match repository.new_topic("other") {
        Err(Error::Usage(UsageError::UncommittedChanges)) => {}
        other => panic!("unexpected {:?}", other),
    }
    assert!(!Topic::open(repository.store(), "other")?.exists()?);
    Ok(())
}

#[test]
fn test_goto() -> Result<()> {
    let work = tempfile::tempdir()?;
    let repository = Repository::init(work.path().to_path_buf())?;
    repository.new_topic("test")?;
    write(&repository, "a", "a");
    repository.new_commit("test")?;

    assert_eq!(repository.goto("main")?.to_string(), "topic/main");
    assert_eq!(repository.head()?.to_string(), "topic/main");
    // No checkout happens, so the file committed on `test` now shows as new.
    assert_eq!(repository.changes()?.len(), 1);
    match repository.goto("test") {
        Err(Error::Usage(UsageError::UncommittedChanges)) => {}
        other => panic!("unexpected {:?}", other),
    }

    for unknown in ["missing", "topic/missing", "nonsense/x", "commit/abc"] {
        match repository.goto(unknown) {
            Err(Error::Usage(UsageError::UnknownReference(_))) => {}
            other => panic!("unexpected {:?} for {}", other, unknown),
        }
    }
    Ok(())
}

#[test]
fn test_lookup_through_repository() -> Result<()> {
    let work = tempfile::tempdir()?;
    let repository = Repository::init(work.path().to_path_buf())?;
    match repository.lookup("topic/main")? {
        Some(Resolved::Topic(topic)) => assert_eq!(topic.name(), "main"),
        other => panic!("unexpected {:?}", other),
    }
    assert!(repository.lookup("topic/nope")?.is_none());
    Ok(())
}
