//! Reading a staged object's directory back: which attributes were written,
//! and the canonical SHA-1 over everything in it.

use std::{
    collections::BTreeMap,
    fs::File,
    io,
    path::{Path, PathBuf},
};

use sha1::{Digest, Sha1};
use walkdir::WalkDir;

use crate::{
    attribute::{split_file_name, AttributeType},
    error::{Error, Result},
    hex::Hex,
};

/// Every file below `dir`, keyed by its `/`-separated path relative to `dir`.
fn files(dir: &Path) -> Result<BTreeMap<String, PathBuf>> {
    let mut files = BTreeMap::new();
    for entry in WalkDir::new(dir).min_depth(1) {
        let entry = entry.map_err(io::Error::from)?;
        if entry.file_type().is_dir() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(dir)
            .map_err(|_| Error::corrupt(entry.path(), "escaped its object directory"))?;
        let key: Vec<String> = relative
            .components()
            .map(|component| component.as_os_str().to_string_lossy().into_owned())
            .collect();
        files.insert(key.join("/"), entry.path().to_path_buf());
    }
    Ok(files)
}

/// The attributes actually present in `dir`, with the encoding each file's
/// suffix names.
pub fn attributes(dir: &Path) -> Result<BTreeMap<String, AttributeType>> {
    let mut attributes = BTreeMap::new();
    for (relative, path) in files(dir)? {
        let top = relative.split('/').next().unwrap_or_default();
        let Some((name, suffix)) = split_file_name(top) else {
            return Err(Error::corrupt(&path, "attribute file has no type suffix"));
        };
        let ty = AttributeType::from_suffix(suffix, &path)?;
        attributes.insert(name.to_string(), ty);
    }
    Ok(attributes)
}

/// Hex SHA-1 over the sorted `(path, content)` pairs below `dir`, each half
/// prefixed with its length as a big-endian `u64`.
pub fn canonical_digest(dir: &Path) -> Result<String> {
    let mut hasher = Sha1::new();
    for (relative, path) in files(dir)? {
        hasher.update((relative.len() as u64).to_be_bytes());
        hasher.update(relative.as_bytes());
        let mut file = File::open(&path)?;
        let len = file.metadata()?.len();
        hasher.update(len.to_be_bytes());
        let copied = io::copy(&mut file, &mut hasher)?;
        if copied != len {
            return Err(Error::corrupt(&path, "changed while being hashed"));
        }
    }
    let digest = hasher.finalize();
    Ok(Hex::from(&digest[..]).to_string())
}

#[test]
fn test_digest_depends_on_paths_and_contents() {
    let a = tempfile::tempdir().unwrap();
    let b = tempfile::tempdir().unwrap();
    std::fs::write(a.path().join("name.str"), b"x").unwrap();
    std::fs::write(b.path().join("name.str"), b"x").unwrap();
    let digest = canonical_digest(a.path()).unwrap();
    assert_eq!(digest.len(), 40);
    assert_eq!(digest, canonical_digest(b.path()).unwrap());

    std::fs::write(b.path().join("name.str"), b"y").unwrap();
    assert_ne!(digest, canonical_digest(b.path()).unwrap());

    // Moving bytes between the path and the content must not collide.
    let c = tempfile::tempdir().unwrap();
    std::fs::write(c.path().join("name.strx"), b"").unwrap();
    assert_ne!(digest, canonical_digest(c.path()).unwrap());
}

#[test]
fn test_attributes_reads_suffixes() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("description.str"), b"d").unwrap();
    std::fs::write(dir.path().join("root.entry_ref"), b"r").unwrap();
    let attributes = attributes(dir.path()).unwrap();
    assert_eq!(attributes.get("description"), Some(&AttributeType::Text));
    assert_eq!(
        attributes.get("root"),
        Some(&AttributeType::ObjectRef(crate::kind::Kind::Entry))
    );

    std::fs::write(dir.path().join("notes.txt"), b"?").unwrap();
    assert!(matches!(
        self::attributes(dir.path()),
        Err(Error::Corrupt { .. })
    ));
}
