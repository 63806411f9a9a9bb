use std::fmt::{Debug, Formatter};
use std::fs::File;
use std::io;
use std::path::Path;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::fs::{metadata, open_if_file};

/// Strategy for summarizing the state of a file (or directory) so that later changes can be detected.
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStamper {
  Exists,
  #[default]
  Modified,
  Hash,
}

impl FileStamper {
  /// Stamps the file or directory at `path`. Directories are stamped recursively: the latest modification time of
  /// anything below them, or the hash of all file contents below them.
  pub fn stamp(&self, path: impl AsRef<Path>) -> Result<FileStamp, io::Error> {
    let path = path.as_ref();
    match self {
      FileStamper::Exists => {
        Ok(FileStamp::Exists(path.try_exists()?))
      }
      FileStamper::Modified => {
        let Some(metadata) = metadata(path)? else {
          return Ok(FileStamp::Modified(None));
        };
        if !metadata.is_dir() {
          return Ok(FileStamp::Modified(Some(metadata.modified()?)));
        }
        let mut latest_modification_date = SystemTime::UNIX_EPOCH;
        for entry in WalkDir::new(path).into_iter() {
          let entry_modification_date = entry?.metadata()?.modified()?;
          if entry_modification_date > latest_modification_date {
            latest_modification_date = entry_modification_date;
          }
        }
        Ok(FileStamp::Modified(Some(latest_modification_date)))
      }
      FileStamper::Hash => {
        if metadata(path)?.is_none() {
          return Ok(FileStamp::Hash(None));
        }
        let mut hasher = Sha256::new();
        for entry in WalkDir::new(path).sort_by_file_name().into_iter() {
          let entry = entry?;
          if let Some(mut file) = open_if_file(entry.path())? {
            hasher.update(entry.path().strip_prefix(path).unwrap_or(entry.path()).to_string_lossy().as_bytes());
            io::copy(&mut file, &mut hasher)?;
          }
        }
        Ok(FileStamp::Hash(Some(hasher.finalize().into())))
      }
    }
  }
}

#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum FileStamp {
  Exists(bool),
  Modified(Option<SystemTime>),
  Hash(Option<[u8; 32]>),
}

impl FileStamp {
  /// Modification time, for stamps that carry one.
  #[inline]
  pub fn modified(&self) -> Option<SystemTime> {
    match self {
      FileStamp::Modified(modified) => *modified,
      _ => None,
    }
  }
}

impl Debug for FileStamp {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    match self {
      FileStamp::Exists(b) => write!(f, "Exists({:?})", b),
      FileStamp::Modified(st) => write!(f, "Modified({:?})", st),
      FileStamp::Hash(Some(h)) => write!(f, "Hash({})", hex::encode(h)),
      FileStamp::Hash(None) => write!(f, "Hash(None)"),
    }
  }
}
