// Copyright 2026 The Treesync Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Repository-internal path types.
//!
//! Paths are stored as slash-separated strings relative to the repository
//! root. The empty string is the root itself. Components may not be empty
//! and `.`/`..` are rejected, so a validated path can be compared and
//! prefix-matched textually.

use std::borrow::Borrow;
use std::fmt;
use std::ops::Deref;

use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde::Serializer;
use thiserror::Error;

/// Error returned when a string is not a valid repository path.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid repository path {input:?}: {message}")]
pub struct InvalidRepoPathError {
    /// The rejected input.
    pub input: String,
    /// Description of the violation.
    pub message: &'static str,
}

/// A borrowed repository-internal path.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct RepoPath(str);

/// An owned repository-internal path.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RepoPathBuf(String);

fn validate(value: &str) -> Result<(), InvalidRepoPathError> {
    let err = |message| InvalidRepoPathError {
        input: value.to_string(),
        message,
    };
    if value.is_empty() {
        // The root path.
        return Ok(());
    }
    if value.starts_with('/') || value.ends_with('/') {
        return Err(err("leading or trailing slash"));
    }
    for component in value.split('/') {
        match component {
            "" => return Err(err("empty path component")),
            "." | ".." => return Err(err("relative path component")),
            _ => {}
        }
    }
    Ok(())
}

impl RepoPath {
    fn from_valid(value: &str) -> &RepoPath {
        // SAFETY: RepoPath is a repr(transparent) wrapper around str.
        unsafe { &*(value as *const str as *const RepoPath) }
    }

    /// The repository root path.
    pub fn root() -> &'static RepoPath {
        RepoPath::from_valid("")
    }

    /// Parses a slash-separated internal path string.
    pub fn from_internal_string(value: &str) -> Result<&RepoPath, InvalidRepoPathError> {
        validate(value)?;
        Ok(RepoPath::from_valid(value))
    }

    /// Whether this is the repository root.
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// The path as a slash-separated string.
    pub fn as_internal_file_string(&self) -> &str {
        &self.0
    }

    /// Whether `self` is `base` or is contained in the directory `base`.
    pub fn starts_with(&self, base: &RepoPath) -> bool {
        self.strip_prefix(base).is_some()
    }

    /// Strips the directory prefix `base`, returning the remainder.
    ///
    /// Returns the root path when `self == base`, and `None` when `self` is
    /// not under `base`. Prefixes match whole components only, so
    /// `foo/barbaz` does not start with `foo/bar`.
    pub fn strip_prefix(&self, base: &RepoPath) -> Option<&RepoPath> {
        if base.is_root() {
            return Some(self);
        }
        let rest = self.0.strip_prefix(&base.0)?;
        if rest.is_empty() {
            Some(RepoPath::root())
        } else {
            rest.strip_prefix('/').map(RepoPath::from_valid)
        }
    }

    /// Iterates `self` and its ancestor directories, ending at the root.
    pub fn ancestors(&self) -> impl Iterator<Item = &RepoPath> {
        std::iter::successors(Some(self), |path| path.parent())
    }

    /// The parent directory, or `None` for the root.
    pub fn parent(&self) -> Option<&RepoPath> {
        if self.is_root() {
            return None;
        }
        match self.0.rsplit_once('/') {
            Some((parent, _)) => Some(RepoPath::from_valid(parent)),
            None => Some(RepoPath::root()),
        }
    }

    /// Joins a relative path onto `self`.
    pub fn join(&self, suffix: &RepoPath) -> RepoPathBuf {
        if self.is_root() {
            suffix.to_owned()
        } else if suffix.is_root() {
            self.to_owned()
        } else {
            RepoPathBuf(format!("{}/{}", &self.0, &suffix.0))
        }
    }

    /// Converts to an owned path.
    pub fn to_owned(&self) -> RepoPathBuf {
        RepoPathBuf(self.0.to_string())
    }
}

impl RepoPathBuf {
    /// The repository root path.
    pub fn root() -> RepoPathBuf {
        RepoPathBuf(String::new())
    }

    /// Parses a slash-separated internal path string.
    pub fn from_internal_string(value: impl Into<String>) -> Result<RepoPathBuf, InvalidRepoPathError> {
        let value = value.into();
        validate(&value)?;
        Ok(RepoPathBuf(value))
    }
}

impl Deref for RepoPathBuf {
    type Target = RepoPath;

    fn deref(&self) -> &RepoPath {
        RepoPath::from_valid(&self.0)
    }
}

impl Borrow<RepoPath> for RepoPathBuf {
    fn borrow(&self) -> &RepoPath {
        self
    }
}

impl AsRef<RepoPath> for RepoPathBuf {
    fn as_ref(&self) -> &RepoPath {
        self
    }
}

impl PartialEq<RepoPath> for RepoPathBuf {
    fn eq(&self, other: &RepoPath) -> bool {
        self.0 == other.0
    }
}

impl fmt::Display for RepoPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for RepoPathBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for RepoPathBuf {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for RepoPathBuf {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        RepoPathBuf::from_internal_string(value).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_paths() {
        assert!(RepoPath::from_internal_string("cores/alpha").is_ok());
        assert!(RepoPath::from_internal_string("a").is_ok());
        assert!(RepoPath::from_internal_string("").unwrap().is_root());
    }

    #[test]
    fn test_parse_invalid_paths() {
        assert!(RepoPath::from_internal_string("/abs").is_err());
        assert!(RepoPath::from_internal_string("trailing/").is_err());
        assert!(RepoPath::from_internal_string("a//b").is_err());
        assert!(RepoPath::from_internal_string("a/./b").is_err());
        assert!(RepoPath::from_internal_string("../up").is_err());
    }

    #[test]
    fn test_strip_prefix_whole_components() {
        let path = RepoPath::from_internal_string("cores/alpha/x.txt").unwrap();
        let base = RepoPath::from_internal_string("cores/alpha").unwrap();
        let stripped = path.strip_prefix(base).unwrap();
        assert_eq!(stripped.as_internal_file_string(), "x.txt");

        let not_base = RepoPath::from_internal_string("cores/alp").unwrap();
        assert!(path.strip_prefix(not_base).is_none());
    }

    #[test]
    fn test_strip_prefix_exact_match_is_root() {
        let path = RepoPath::from_internal_string("cores/alpha").unwrap();
        assert!(path.strip_prefix(path).unwrap().is_root());
    }

    #[test]
    fn test_ancestors() {
        let path = RepoPath::from_internal_string("a/b/c").unwrap();
        let ancestors: Vec<_> = path
            .ancestors()
            .map(|p| p.as_internal_file_string().to_string())
            .collect();
        assert_eq!(ancestors, ["a/b/c", "a/b", "a", ""]);
    }

    #[test]
    fn test_join() {
        let prefix = RepoPath::from_internal_string("vendor/lib").unwrap();
        let suffix = RepoPath::from_internal_string("src/main.rs").unwrap();
        assert_eq!(
            prefix.join(suffix).as_internal_file_string(),
            "vendor/lib/src/main.rs"
        );
        assert_eq!(RepoPath::root().join(suffix), *suffix);
        assert_eq!(prefix.join(RepoPath::root()), *prefix);
    }
}
