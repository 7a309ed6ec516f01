use std::{
    collections::BTreeSet,
    ffi::OsStr,
    fs::File,
    io::ErrorKind,
    path::Path,
};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// The directory inside a working tree that holds the repository itself.
pub const ADMIN_DIR: &str = ".wad";

/// Per-repository settings, kept as pretty JSON in `.wad/config`.
#[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// File and directory names left out of snapshots and diffs, at any depth.
    #[serde(default)]
    pub ignores: BTreeSet<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            ignores: [String::from(".git")].into_iter().collect(),
        }
    }
}

impl Config {
    /// Reads the config at `path`; a missing file means the defaults.
    pub fn read(path: &Path) -> Result<Self> {
        match File::options().read(true).open(path) {
            Ok(file) => Ok(serde_json::from_reader(file)?),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(Config::default()),
            Err(err) => Err(err.into()),
        }
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let file = File::options()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(serde_json::to_writer_pretty(file, self)?)
    }

    /// The administrative directory is always ignored.
    pub fn is_ignored(&self, name: &OsStr) -> bool {
        name == ADMIN_DIR
            || name
                .to_str()
                .map(|name| self.ignores.contains(name))
                .unwrap_or(false)
    }
}

#[test]
fn test_config_round_trip() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("config");
    assert_eq!(Config::read(&path)?, Config::default());

    let mut config = Config::default();
    config.ignores.insert(String::from("target"));
    config.write(&path)?;
    assert_eq!(Config::read(&path)?, config);
    assert!(config.is_ignored(OsStr::new("target")));
    assert!(config.is_ignored(OsStr::new(ADMIN_DIR)));
    assert!(!config.is_ignored(OsStr::new("src")));
    Ok(())
}

#[test]
fn test_config_tolerates_missing_fields() -> Result<()> {
    let config: Config = serde_json::from_str("{}")?;
    assert!(config.ignores.is_empty());
    Ok(())
}
