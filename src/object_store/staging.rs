//! Scratch directories for objects under construction.
//!
//! Every staging session owns a fresh directory `stage/<kind>/new-*` with a
//! `lock` file inside it, exclusively locked until the session publishes. The
//! canonical store is only touched when the session is relocated.
//!
//! Named targets also hold `stage/<kind>/.locks/<id>` from the start of the
//! session until the object has been relocated or the session dropped, so a
//! second writer for the same target fails with [`Error::ObjectBusy`] even
//! while the first one is publishing.
//!
//! Replacing a published named object moves the old copy into
//! `stage/<kind>/.replaced/<id>/old-*` first. Whatever a crashed writer left
//! there is put back or discarded the next time the target is staged.

use std::{
    fs::{self, File},
    io::ErrorKind,
    path::{Path, PathBuf},
};

use fs2::FileExt;
use walkdir::WalkDir;

use crate::error::{Error, Result};

pub const LOCK_FILE: &str = "lock";
const LOCKS_DIR: &str = ".locks";
const REPLACED_DIR: &str = ".replaced";
const DISPLACED: &str = "object";

#[derive(Debug)]
pub struct StagingSession {
    dir: PathBuf,
    lock: Option<File>,
    // Declared after `lock` so it is released last.
    target: Option<TargetLock>,
    relocated: bool,
}

/// Exclusive claim on one named target, held for a whole session.
#[derive(Debug)]
struct TargetLock {
    _file: File,
    replaced: PathBuf,
}

impl StagingSession {
    /// Starts staging under `stage_root`.
    ///
    /// `named` is the id of a named target, which is locked for the lifetime
    /// of the session. When `published` exists its contents seed the session.
    pub fn begin(
        stage_root: &Path,
        target: &str,
        named: Option<&str>,
        published: Option<&Path>,
    ) -> Result<Self> {
        fs::create_dir_all(stage_root)?;
        let target_lock = match named {
            Some(id) => Some(TargetLock::acquire(stage_root, target, id, published)?),
            None => None,
        };
        let dir = tempfile::Builder::new()
            .prefix("new-")
            .tempdir_in(stage_root)?
            .into_path();
        let mut session = StagingSession {
            dir,
            lock: None,
            target: target_lock,
            relocated: false,
        };

        let lock_path = session.dir.join(LOCK_FILE);
        let lock = File::options()
            .create(true)
            .write(true)
            .open(&lock_path)?;
        lock_exclusive(&lock, target, &lock_path)?;
        session.lock = Some(lock);
        log::debug!("staging {} in {:?}", target, session.dir);

        if let Some(published) = published {
            if published.try_exists()? {
                copy_tree(published, &session.dir)?;
            }
        }
        Ok(session)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Unlocks and deletes the scratch lock file. The directory stays put, and
    /// a named target stays claimed until the session ends.
    pub fn release_lock(&mut self) -> Result<()> {
        if let Some(lock) = self.lock.take() {
            lock.unlock()?;
            drop(lock);
            match fs::remove_file(self.dir.join(LOCK_FILE)) {
                Err(err) if err.kind() != ErrorKind::NotFound => return Err(err.into()),
                _ => {}
            }
        }
        Ok(())
    }

    /// Moves the scratch directory to `dest`.
    ///
    /// A named target replaces whatever is published there; the old copy is
    /// moved aside first and moved back if the replacement fails. Anonymous
    /// targets are content-addressed, so an existing `dest` already holds the
    /// same bytes and is left alone.
    pub fn relocate(mut self, dest: &Path) -> Result<()> {
        self.release_lock()?;
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        match self.target.as_ref().map(|target| target.replaced.clone()) {
            Some(replaced) => self.replace(dest, &replaced),
            None => self.install(dest),
        }
    }

    fn install(&mut self, dest: &Path) -> Result<()> {
        if dest.try_exists()? {
            log::debug!("{:?} is already published", dest);
            return Ok(());
        }
        if let Err(err) = fs::rename(&self.dir, dest) {
            // Lost a race against a writer publishing the same contents.
            if !dest.try_exists()? {
                return Err(err.into());
            }
            log::debug!("{:?} was published concurrently", dest);
            return Ok(());
        }
        self.relocated = true;
        Ok(())
    }

    fn replace(&mut self, dest: &Path, replaced: &Path) -> Result<()> {
        if !dest.try_exists()? {
            fs::rename(&self.dir, dest)?;
            self.relocated = true;
            return Ok(());
        }
        fs::create_dir_all(replaced)?;
        let aside = tempfile::Builder::new()
            .prefix("old-")
            .tempdir_in(replaced)?;
        let displaced = aside.path().join(DISPLACED);
        fs::rename(dest, &displaced)?;
        if let Err(err) = fs::rename(&self.dir, dest) {
            if let Err(restore) = fs::rename(&displaced, dest) {
                let kept = aside.into_path();
                log::error!("could not restore {:?}, left in {:?}: {}", dest, kept, restore);
            }
            return Err(err.into());
        }
        self.relocated = true;
        if let Err(err) = aside.close() {
            log::warn!("could not remove the replaced copy of {:?}: {}", dest, err);
        }
        Ok(())
    }
}

impl Drop for StagingSession {
    fn drop(&mut self) {
        // Closing the file releases the lock.
        self.lock.take();
        if self.relocated {
            return;
        }
        match fs::remove_dir_all(&self.dir) {
            Ok(()) => log::debug!("abandoned staging directory {:?}", self.dir),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => log::warn!("could not remove staging directory {:?}: {}", self.dir, err),
        }
    }
}

impl TargetLock {
    fn acquire(
        stage_root: &Path,
        target: &str,
        id: &str,
        published: Option<&Path>,
    ) -> Result<Self> {
        let locks = stage_root.join(LOCKS_DIR);
        fs::create_dir_all(&locks)?;
        // Never deleted: a second writer must always find the same file.
        let path = locks.join(id);
        let file = File::options().create(true).write(true).open(&path)?;
        lock_exclusive(&file, target, &path)?;
        let lock = TargetLock {
            _file: file,
            replaced: stage_root.join(REPLACED_DIR).join(id),
        };
        lock.recover(published)?;
        Ok(lock)
    }

    /// Cleans up after a writer that died while replacing this target, putting
    /// the displaced copy back if the published one went missing.
    fn recover(&self, published: Option<&Path>) -> Result<()> {
        if !self.replaced.try_exists()? {
            return Ok(());
        }
        for entry in fs::read_dir(&self.replaced)? {
            let leftover = entry?.path();
            let displaced = leftover.join(DISPLACED);
            if let Some(published) = published {
                if !published.try_exists()? && displaced.try_exists()? {
                    log::warn!("restoring {:?} after an interrupted publish", published);
                    if let Some(parent) = published.parent() {
                        fs::create_dir_all(parent)?;
                    }
                    fs::rename(&displaced, published)?;
                }
            }
            log::warn!("reclaiming abandoned staging leftover {:?}", leftover);
            fs::remove_dir_all(&leftover)?;
        }
        Ok(())
    }
}

fn lock_exclusive(file: &File, target: &str, path: &Path) -> Result<()> {
    match file.try_lock_exclusive() {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == fs2::lock_contended_error().kind() => Err(Error::ObjectBusy {
            target: target.to_string(),
            lock: path.display().to_string(),
        }),
        Err(err) => Err(err.into()),
    }
}

/// Deep-copies the directory tree at `from` into the existing `to`.
fn copy_tree(from: &Path, to: &Path) -> Result<()> {
    for entry in WalkDir::new(from).min_depth(1) {
        let entry = entry.map_err(std::io::Error::from)?;
        let relative = entry
            .path()
            .strip_prefix(from)
            .map_err(|_| Error::corrupt(entry.path(), "escaped its object directory"))?;
        let target = to.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
fn scratch_dirs(stage: &Path) -> usize {
    fs::read_dir(stage)
        .unwrap()
        .filter(|entry| {
            let name = entry.as_ref().unwrap().file_name();
            name.to_string_lossy().starts_with("new-")
        })
        .count()
}

#[cfg(test)]
fn published_topic(root: &Path, tip: &[u8]) -> PathBuf {
    let published = root.join("topic").join("main");
    fs::create_dir_all(&published).unwrap();
    fs::write(published.join("description.str"), b"main topic").unwrap();
    fs::write(published.join("tip.commit_ref"), tip).unwrap();
    published
}

#[test]
fn test_second_session_on_same_target_is_busy() {
    let dir = tempfile::tempdir().unwrap();
    let first = StagingSession::begin(dir.path(), "topic/main", Some("main"), None).unwrap();
    let second = StagingSession::begin(dir.path(), "topic/main", Some("main"), None);
    assert!(matches!(second, Err(Error::ObjectBusy { .. })));
    // The failed attempt must not have disturbed the live session.
    assert!(first.dir().join(LOCK_FILE).exists());
    let scratch = first.dir().to_path_buf();
    drop(first);
    assert!(!scratch.exists());
    StagingSession::begin(dir.path(), "topic/main", Some("main"), None).unwrap();
}

#[test]
fn test_anonymous_sessions_do_not_contend() {
    let dir = tempfile::tempdir().unwrap();
    let first = StagingSession::begin(dir.path(), "new commit", None, None).unwrap();
    let second = StagingSession::begin(dir.path(), "new commit", None, None).unwrap();
    assert_ne!(first.dir(), second.dir());
    drop(first);
    assert!(second.dir().join(LOCK_FILE).exists());
}

#[test]
fn test_target_stays_locked_while_publishing() {
    let dir = tempfile::tempdir().unwrap();
    let published = published_topic(dir.path(), b"old tip");
    let stage = dir.path().join("stage").join("topic");

    let mut writer =
        StagingSession::begin(&stage, "topic/main", Some("main"), Some(published.as_path()))
            .unwrap();
    fs::write(writer.dir().join("tip.commit_ref"), b"new tip").unwrap();
    writer.release_lock().unwrap();

    let late = StagingSession::begin(&stage, "topic/main", Some("main"), Some(published.as_path()));
    assert!(matches!(late, Err(Error::ObjectBusy { .. })));

    writer.relocate(&published).unwrap();
    assert_eq!(fs::read(published.join("tip.commit_ref")).unwrap(), b"new tip");
    assert_eq!(fs::read(published.join("description.str")).unwrap(), b"main topic");

    let next =
        StagingSession::begin(&stage, "topic/main", Some("main"), Some(published.as_path()))
            .unwrap();
    assert_eq!(fs::read(next.dir().join("tip.commit_ref")).unwrap(), b"new tip");
}

#[test]
fn test_relocate_replaces_destination() {
    let dir = tempfile::tempdir().unwrap();
    let published = published_topic(dir.path(), b"old tip");
    let stage = dir.path().join("stage").join("topic");
    let session =
        StagingSession::begin(&stage, "topic/main", Some("main"), Some(published.as_path()))
            .unwrap();
    assert_eq!(fs::read(session.dir().join("description.str")).unwrap(), b"main topic");
    fs::write(session.dir().join("tip.commit_ref"), b"new tip").unwrap();
    session.relocate(&published).unwrap();

    assert_eq!(fs::read(published.join("tip.commit_ref")).unwrap(), b"new tip");
    assert_eq!(fs::read(published.join("description.str")).unwrap(), b"main topic");
    assert!(!published.join(LOCK_FILE).exists());
    assert_eq!(scratch_dirs(&stage), 0);
    assert_eq!(fs::read_dir(stage.join(REPLACED_DIR).join("main")).unwrap().count(), 0);
}

#[test]
fn test_failed_replace_keeps_published_copy() {
    let dir = tempfile::tempdir().unwrap();
    let published = published_topic(dir.path(), b"old tip");
    let stage = dir.path().join("stage").join("topic");
    let session =
        StagingSession::begin(&stage, "topic/main", Some("main"), Some(published.as_path()))
            .unwrap();
    fs::remove_dir_all(session.dir()).unwrap();

    assert!(session.relocate(&published).is_err());
    assert_eq!(fs::read(published.join("tip.commit_ref")).unwrap(), b"old tip");
    assert_eq!(fs::read_dir(stage.join(REPLACED_DIR).join("main")).unwrap().count(), 0);
}

#[test]
fn test_existing_content_addressed_destination_is_kept() {
    let dir = tempfile::tempdir().unwrap();
    let published = dir.path().join("entry").join("abc");
    fs::create_dir_all(&published).unwrap();
    fs::write(published.join("name.str"), b"a").unwrap();
    fs::write(published.join("marker"), b"").unwrap();

    let stage = dir.path().join("stage").join("entry");
    let session = StagingSession::begin(&stage, "new entry", None, None).unwrap();
    fs::write(session.dir().join("name.str"), b"a").unwrap();
    session.relocate(&published).unwrap();

    assert!(published.join("marker").exists());
    assert_eq!(fs::read(published.join("name.str")).unwrap(), b"a");
    assert_eq!(scratch_dirs(&stage), 0);
}

#[test]
fn test_interrupted_replace_is_restored() {
    let dir = tempfile::tempdir().unwrap();
    let published = dir.path().join("topic").join("main");
    let stage = dir.path().join("stage").join("topic");
    // A writer died after moving the published copy aside.
    let displaced = stage.join(REPLACED_DIR).join("main").join("old-x").join(DISPLACED);
    fs::create_dir_all(&displaced).unwrap();
    fs::write(displaced.join("description.str"), b"main topic").unwrap();
    fs::write(displaced.join("tip.commit_ref"), b"old tip").unwrap();

    let session =
        StagingSession::begin(&stage, "topic/main", Some("main"), Some(published.as_path()))
            .unwrap();
    assert_eq!(fs::read(published.join("tip.commit_ref")).unwrap(), b"old tip");
    assert_eq!(fs::read(session.dir().join("tip.commit_ref")).unwrap(), b"old tip");
    assert_eq!(fs::read_dir(stage.join(REPLACED_DIR).join("main")).unwrap().count(), 0);
}

#[test]
fn test_stale_replaced_copy_is_discarded() {
    let dir = tempfile::tempdir().unwrap();
    let published = published_topic(dir.path(), b"current tip");
    let stage = dir.path().join("stage").join("topic");
    let stale = stage.join(REPLACED_DIR).join("main").join("old-x").join(DISPLACED);
    fs::create_dir_all(&stale).unwrap();
    fs::write(stale.join("tip.commit_ref"), b"stale tip").unwrap();

    for tip in [&b"second tip"[..], &b"third tip"[..]] {
        let session =
            StagingSession::begin(&stage, "topic/main", Some("main"), Some(published.as_path()))
                .unwrap();
        fs::write(session.dir().join("tip.commit_ref"), tip).unwrap();
        session.relocate(&published).unwrap();
        assert_eq!(fs::read(published.join("tip.commit_ref")).unwrap(), tip);
    }
    assert_eq!(fs::read_dir(stage.join(REPLACED_DIR).join("main")).unwrap().count(), 0);
}
