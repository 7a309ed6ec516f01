use crate::hex::Hex;
use blake3::Hash;

use std::{fmt::Display, fs::File, io, path::Path, str::FromStr};

/// The hash of a file's bytes, recorded on every file [`Entry`](crate::entry::Entry)
/// so a working copy can be compared without reading stored contents.
/// Under the hood, this is a [`blake3`] hash.
///
/// It is displayed in hexadecimal format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentHash(Hash);

impl Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let b: &[u8] = self.0.as_bytes();
        write!(f, "{}", Hex::from(b))
    }
}

impl FromStr for ContentHash {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes: [u8; 32] = Hex::decode(s.trim())
            .ok_or(())?
            .try_into()
            .map_err(|_| ())?;
        Ok(ContentHash(Hash::from(bytes)))
    }
}

impl From<&[u8]> for ContentHash {
    fn from(bytes: &[u8]) -> Self {
        ContentHash(blake3::hash(bytes))
    }
}

impl TryFrom<File> for ContentHash {
    type Error = io::Error;

    fn try_from(mut f: File) -> Result<Self, Self::Error> {
        let mut hasher = blake3::Hasher::new();
        io::copy(&mut f, &mut hasher)?;
        Ok(ContentHash(hasher.finalize()))
    }
}

impl TryFrom<&Path> for ContentHash {
    type Error = io::Error;

    fn try_from(p: &Path) -> Result<Self, Self::Error> {
        let f = File::options().read(true).open(p)?;
        ContentHash::try_from(f)
    }
}

#[test]
fn test_try_from() -> Result<(), io::Error> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("a");
    std::fs::write(&path, b"hello, world")?;
    let from_file = ContentHash::try_from(File::options().read(true).open(&path)?)?;
    let from_path = ContentHash::try_from(path.as_path())?;
    let b: &[u8] = b"hello, world";
    assert_eq!(from_file, from_path);
    assert_eq!(from_file, ContentHash::from(b));
    Ok(())
}

#[test]
fn test_parse_display() {
    let b: &[u8] = b"some bytes";
    let hash = ContentHash::from(b);
    let parsed: ContentHash = hash.to_string().parse().unwrap();
    assert_eq!(hash, parsed);
    assert!("not hex".parse::<ContentHash>().is_err());
}
