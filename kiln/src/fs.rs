use std::{fs, io};
use std::fs::{File, Metadata};
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

/// Metadata of the file or directory at `path`, or `None` when nothing exists there.
pub fn metadata(path: impl AsRef<Path>) -> Result<Option<Metadata>, io::Error> {
  match fs::metadata(path) {
    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
    Err(e) => Err(e),
    Ok(m) => Ok(Some(m))
  }
}

/// Opens the file at `path`, or returns `None` when `path` does not exist or is a directory. Windows refuses to open
/// directories, so they are filtered out before opening.
pub fn open_if_file(path: impl AsRef<Path>) -> Result<Option<File>, io::Error> {
  let file = match metadata(&path)? {
    Some(metadata) if metadata.is_file() => Some(File::open(&path)?),
    _ => None,
  };
  Ok(file)
}

/// Expands `paths` into the files they denote: files as is, directories recursively into the files below them (sorted
/// by path), and non-existent paths as is.
pub fn expand_files<'a>(paths: impl IntoIterator<Item=&'a PathBuf>) -> Result<Vec<PathBuf>, io::Error> {
  let mut files = Vec::new();
  for path in paths {
    match metadata(path)? {
      Some(metadata) if metadata.is_dir() => {
        for entry in WalkDir::new(path).sort_by_file_name() {
          let entry = entry.map_err(io::Error::from)?;
          if entry.file_type().is_file() {
            files.push(entry.into_path());
          }
        }
      }
      _ => files.push(path.clone()),
    }
  }
  Ok(files)
}

/// Copies `source` to `destination`, creating the parent directories of `destination`.
pub fn copy_file(source: &Path, destination: &Path) -> Result<(), io::Error> {
  if let Some(parent) = destination.parent() {
    fs::create_dir_all(parent)?;
  }
  fs::copy(source, destination)?;
  Ok(())
}
