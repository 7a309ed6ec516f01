use crate::{
    commit::Commit,
    error::{Error, Result, UsageError},
    kind::Kind,
    object_store::{Object, Store},
    reference::Reference,
};

/// A named, movable pointer to a [`Commit`].
#[derive(Debug)]
pub struct Topic {
    object: Object,
}

impl Topic {
    pub(crate) fn from_object(object: Object) -> Self {
        Topic { object }
    }

    /// A handle on the topic called `name`, whether or not it exists yet.
    pub fn open(store: &Store, name: &str) -> Result<Self> {
        validate_name(name)?;
        Ok(Topic::from_object(store.open(Kind::Topic, Some(name))?))
    }

    /// Publishes a new topic. An existing topic of the same name is left
    /// untouched and reported as a usage error.
    pub fn create(store: &Store, name: &str, description: &str, tip: &Reference) -> Result<Self> {
        let mut topic = Topic::open(store, name)?;
        if topic.object.exists()? {
            return Err(UsageError::TopicAlreadyExists(name.to_string()).into());
        }
        topic.object.set("description", description)?;
        topic.object.set("tip", tip.clone())?;
        topic.object.publish()?;
        log::info!("created topic {} at {}", name, tip);
        Ok(topic)
    }

    pub fn exists(&self) -> Result<bool> {
        self.object.exists()
    }

    pub fn reference(&self) -> Reference {
        self.object
            .reference()
            .unwrap_or_else(|| unreachable!("topics always have a name"))
    }

    pub fn name(&self) -> String {
        self.reference().id().to_string()
    }

    pub fn description(&self) -> Result<String> {
        self.object.text("description")
    }

    pub fn tip(&self) -> Result<Reference> {
        self.object
            .reference_attribute("tip")?
            .ok_or_else(|| Error::Corrupt {
                path: self.reference().to_string(),
                reason: String::from("missing tip"),
            })
    }

    /// Repoints the topic, staging and publishing it in one go.
    pub fn set_tip(&mut self, commit: &Reference) -> Result<()> {
        self.object.set("tip", commit.clone())?;
        self.object.publish()?;
        log::info!("moved {} to {}", self.reference(), commit);
        Ok(())
    }

    /// The commit the topic points at.
    pub fn commit(&self) -> Result<Commit> {
        Commit::open(self.object.store(), &self.tip()?)
    }
}

/// Topic names become directory names and must also read unambiguously on
/// the command line.
pub fn validate_name(name: &str) -> Result<()> {
    let reason = if name.is_empty() {
        Some("must not be empty")
    } else if name.starts_with('.') {
        Some("must not start with '.'")
    } else if name.contains('/') || name.contains('\\') {
        Some("must not contain a path separator")
    } else if name.chars().any(|c| c.is_whitespace() || c.is_control()) {
        Some("must not contain whitespace")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(UsageError::InvalidName {
            name: name.to_string(),
            reason: reason.to_string(),
        }
        .into()),
        None => Ok(()),
    }
}

#[cfg(test)]
fn some_commit(store: &Store, description: &str) -> Reference {
    use crate::entry::Entry;
    use std::collections::BTreeSet;

    let root = Entry::create_directory(store, ".", "rw", &BTreeSet::new()).unwrap();
    Commit::create(store, description, None, &root.reference())
        .unwrap()
        .reference()
}

#[test]
fn test_create_topic_fails_on_collision() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::new(dir.path().to_path_buf()).unwrap();
    let first = some_commit(&store, "first");
    let second = some_commit(&store, "second");
    Topic::create(&store, "main", "main topic", &first).unwrap();

    match Topic::create(&store, "main", "again", &second) {
        Err(Error::Usage(UsageError::TopicAlreadyExists(name))) => assert_eq!(name, "main"),
        other => panic!("unexpected {:?}", other),
    }
    let main = Topic::open(&store, "main").unwrap();
    assert_eq!(main.tip().unwrap(), first);
    assert_eq!(main.description().unwrap(), "main topic");
}

#[test]
fn test_set_tip() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::new(dir.path().to_path_buf()).unwrap();
    let first = some_commit(&store, "first");
    let second = some_commit(&store, "second");
    let mut topic = Topic::create(&store, "feature", "a feature", &first).unwrap();
    topic.set_tip(&second).unwrap();
    assert_eq!(Topic::open(&store, "feature").unwrap().tip().unwrap(), second);
    assert_eq!(topic.commit().unwrap().description().unwrap(), "second");
}

#[test]
fn test_set_tip_after_interrupted_publish() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::new(dir.path().to_path_buf()).unwrap();
    let first = some_commit(&store, "first");
    let second = some_commit(&store, "second");
    let mut topic = Topic::create(&store, "main", "main topic", &first).unwrap();

    let leftover = store
        .stage_dir(Kind::Topic)
        .join(".replaced")
        .join("main")
        .join("old-x")
        .join("object");
    std::fs::create_dir_all(&leftover).unwrap();
    std::fs::write(leftover.join("tip.commit_ref"), first.to_string()).unwrap();

    topic.set_tip(&second).unwrap();
    assert_eq!(Topic::open(&store, "main").unwrap().tip().unwrap(), second);
    topic.set_tip(&first).unwrap();
    assert_eq!(Topic::open(&store, "main").unwrap().tip().unwrap(), first);
}

#[test]
fn test_validate_name() {
    assert!(validate_name("main").is_ok());
    assert!(validate_name("fix-1.2").is_ok());
    for bad in ["", ".hidden", "a/b", "two words"] {
        assert!(matches!(
            validate_name(bad),
            Err(Error::Usage(UsageError::InvalidName { .. }))
        ));
    }
}
