use std::fmt::{Display, Formatter};

use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};

/// Checksum algorithms a repository may publish next to an artifact, in order of preference.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum ChecksumAlgorithm {
  Sha512,
  Sha256,
  Sha1,
  Md5,
}

impl ChecksumAlgorithm {
  /// Strongest first: verification uses the first of these the repository provides.
  pub const PREFERENCE: [ChecksumAlgorithm; 4] =
    [ChecksumAlgorithm::Sha512, ChecksumAlgorithm::Sha256, ChecksumAlgorithm::Sha1, ChecksumAlgorithm::Md5];

  /// Extension of the sidecar file, appended to the artifact path.
  #[inline]
  pub fn extension(&self) -> &'static str {
    match self {
      ChecksumAlgorithm::Sha512 => "sha512",
      ChecksumAlgorithm::Sha256 => "sha256",
      ChecksumAlgorithm::Sha1 => "sha1",
      ChecksumAlgorithm::Md5 => "md5",
    }
  }

  /// Lowercase hexadecimal digest of `bytes`.
  pub fn digest(&self, bytes: &[u8]) -> String {
    match self {
      ChecksumAlgorithm::Sha512 => hex::encode(Sha512::digest(bytes)),
      ChecksumAlgorithm::Sha256 => hex::encode(Sha256::digest(bytes)),
      ChecksumAlgorithm::Sha1 => hex::encode(Sha1::digest(bytes)),
      ChecksumAlgorithm::Md5 => format!("{:x}", md5::compute(bytes)),
    }
  }
}

impl Display for ChecksumAlgorithm {
  #[inline]
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result { f.write_str(self.extension()) }
}

/// Expected digest of an artifact, as published by a repository.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct Checksum {
  pub algorithm: ChecksumAlgorithm,
  pub expected: String,
}

impl Checksum {
  /// Parses the content of a checksum sidecar file. Sidecars contain the hex digest, optionally followed by whitespace
  /// and a file name. Returns `None` if the content holds no digest of the right length.
  pub fn parse(algorithm: ChecksumAlgorithm, content: &[u8]) -> Option<Self> {
    let content = std::str::from_utf8(content).ok()?;
    let expected = content.split_whitespace().next()?.to_ascii_lowercase();
    let length = match algorithm {
      ChecksumAlgorithm::Sha512 => 128,
      ChecksumAlgorithm::Sha256 => 64,
      ChecksumAlgorithm::Sha1 => 40,
      ChecksumAlgorithm::Md5 => 32,
    };
    if expected.len() != length || !expected.bytes().all(|b| b.is_ascii_hexdigit()) {
      return None;
    }
    Some(Self { algorithm, expected })
  }

  /// Computes the digest of `bytes`, returning `Err(actual)` if it does not match.
  pub fn verify(&self, bytes: &[u8]) -> Result<(), String> {
    let actual = self.algorithm.digest(bytes);
    if actual == self.expected { Ok(()) } else { Err(actual) }
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn known_digests() {
    assert_eq!(ChecksumAlgorithm::Md5.digest(b"abc"), "900150983cd24fb0d6963f7d28e17f72");
    assert_eq!(ChecksumAlgorithm::Sha1.digest(b"abc"), "a9993e364706816aba3e25717850c26c9cd0d89d");
    assert_eq!(
      ChecksumAlgorithm::Sha256.digest(b"abc"),
      "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
    );
    assert_eq!(ChecksumAlgorithm::Sha512.digest(b"abc").len(), 128);
  }

  #[test]
  fn parse_sidecar() {
    let sidecar = b"A9993E364706816ABA3E25717850C26C9CD0D89D  library-1.0.jar\n";
    let checksum = Checksum::parse(ChecksumAlgorithm::Sha1, sidecar).unwrap();
    assert_eq!(checksum.expected, "a9993e364706816aba3e25717850c26c9cd0d89d");
    assert!(checksum.verify(b"abc").is_ok());
    assert!(checksum.verify(b"abd").is_err());
  }

  #[test]
  fn parse_rejects_garbage() {
    assert!(Checksum::parse(ChecksumAlgorithm::Sha256, b"<html>not found</html>").is_none());
    assert!(Checksum::parse(ChecksumAlgorithm::Md5, b"").is_none());
  }

  #[test]
  fn preference_order() {
    let extensions: Vec<_> = ChecksumAlgorithm::PREFERENCE.iter().map(|a| a.extension()).collect();
    assert_eq!(extensions, ["sha512", "sha256", "sha1", "md5"]);
  }
}
