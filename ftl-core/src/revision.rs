//! Revision identity for FTL packages
//!
//! A revision token is `YYYYMMDD` + zero-padded seconds since midnight UTC +
//! the first two characters of the content's SHA-1, encoded with a base64
//! alphabet that is safe for file names and object keys. Fixed-width fields
//! make lexicographic order of tokens match spool order.

use base64::alphabet::Alphabet;
use base64::engine::general_purpose::{GeneralPurpose, PAD};
use base64::Engine;
use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::fmt;
use std::io::{self, Read, Seek, SeekFrom};
use std::str::FromStr;

use crate::error::FtlError;

/// Separator between package name and revision token.
pub const SEPARATOR: char = '.';

/// Number of encoded digest characters carried in a revision token.
pub const HASH_PREFIX_LEN: usize = 2;

const REVISION_ALPHABET: Alphabet =
    match Alphabet::new("-0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ_abcdefghijklmnopqrstuvwxyz") {
        Ok(alphabet) => alphabet,
        Err(_) => panic!("invalid revision alphabet"),
    };

const REVISION_ENGINE: GeneralPurpose = GeneralPurpose::new(&REVISION_ALPHABET, PAD);

/// A single immutable revision of a package.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RevisionInfo {
    pub package_name: String,
    pub revision: String,
}

impl RevisionInfo {
    pub fn new(package_name: impl Into<String>, revision: impl Into<String>) -> Self {
        Self {
            package_name: package_name.into(),
            revision: revision.into(),
        }
    }

    /// Parse `<package>.<revision>`, splitting on the first separator.
    pub fn parse(name: &str) -> Result<Self, FtlError> {
        match name.trim().split_once(SEPARATOR) {
            Some((package, revision)) if !package.is_empty() && !revision.is_empty() => {
                Ok(Self::new(package, revision))
            }
            _ => Err(FtlError::Parse(format!(
                "'{}' is not of the form <package>.<revision>",
                name
            ))),
        }
    }

    /// `<package>.<revision>`: the pointer payload and the local directory name.
    pub fn name(&self) -> String {
        format!("{}{}{}", self.package_name, SEPARATOR, self.revision)
    }

    /// The digest prefix encoded at the end of the revision token.
    pub fn hash_prefix(&self) -> Option<&str> {
        revision_hash_prefix(&self.revision)
    }
}

impl fmt::Display for RevisionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.package_name, SEPARATOR, self.revision)
    }
}

impl FromStr for RevisionInfo {
    type Err = FtlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Incremental content digest used both when spooling and when verifying a
/// downloaded artifact.
#[derive(Default)]
pub struct ContentDigest(Sha1);

impl ContentDigest {
    pub fn new() -> Self {
        Self(Sha1::new())
    }

    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    /// Encoded digest truncated to the revision token's prefix length.
    pub fn hash_prefix(self) -> String {
        let encoded = REVISION_ENGINE.encode(self.0.finalize());
        encoded[..HASH_PREFIX_LEN].to_string()
    }
}

/// Read `reader` to the end and return its encoded digest prefix.
pub fn content_hash_prefix<R: Read + ?Sized>(reader: &mut R) -> io::Result<String> {
    let mut digest = ContentDigest::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        digest.update(&buf[..n]);
    }
    Ok(digest.hash_prefix())
}

/// Trailing digest prefix of a revision token, if it is long enough to have one.
pub fn revision_hash_prefix(revision: &str) -> Option<&str> {
    revision
        .len()
        .checked_sub(HASH_PREFIX_LEN)
        .and_then(|start| revision.get(start..))
}

/// `YYYYMMDD` followed by five digits of seconds since midnight.
pub fn timestamp_token(now: DateTime<Utc>) -> String {
    format!("{}{:05}", now.format("%Y%m%d"), now.num_seconds_from_midnight())
}

/// Compute a new revision token for `content` using the current UTC time.
///
/// The content is hashed from the start and the read position is restored
/// afterwards so the caller can upload the same handle.
pub fn build_revision_id<R: Read + Seek>(content: &mut R) -> io::Result<String> {
    build_revision_id_at(content, Utc::now())
}

pub fn build_revision_id_at<R: Read + Seek>(
    content: &mut R,
    now: DateTime<Utc>,
) -> io::Result<String> {
    let position = content.stream_position()?;
    content.seek(SeekFrom::Start(0))?;
    let prefix = content_hash_prefix(content);
    content.seek(SeekFrom::Start(position))?;
    Ok(format!("{}{}", timestamp_token(now), prefix?))
}
