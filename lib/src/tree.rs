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

//! Tree snapshots and prefix operations.
//!
//! A [`Tree`] is an immutable mapping from repository paths to file
//! entries. The prefix operations are the core of subtree handling:
//!
//! - [`Tree::move_to_prefix`] - relocate all entries under a prefix path
//! - [`Tree::extract_at_prefix`] - extract entries at a prefix to root level
//! - [`Tree::replace_at_prefix`] - replace the subtree at a prefix wholesale

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::repo_path::RepoPath;
use crate::repo_path::RepoPathBuf;

/// Errors from tree prefix operations.
#[derive(Debug, Error)]
pub enum TreeError {
    /// The prefix path is invalid (the repository root).
    #[error("Invalid prefix path: {message}")]
    InvalidPrefix {
        /// Description of why the prefix is invalid.
        message: String,
    },
}

/// A single file in a tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// File content.
    pub content: String,
    /// Executable bit.
    #[serde(default)]
    pub executable: bool,
}

impl FileEntry {
    /// Creates a regular (non-executable) file entry.
    pub fn new(content: impl Into<String>) -> Self {
        FileEntry {
            content: content.into(),
            executable: false,
        }
    }
}

/// An immutable snapshot of repository content: path -> file entry.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tree {
    entries: BTreeMap<RepoPathBuf, FileEntry>,
}

impl Tree {
    /// The empty tree.
    pub fn empty() -> Tree {
        Tree::default()
    }

    /// Builds a tree from `(path, content)` pairs.
    pub fn from_entries<'a>(
        entries: impl IntoIterator<Item = (&'a RepoPath, &'a str)>,
    ) -> Tree {
        let entries = entries
            .into_iter()
            .map(|(path, content)| (path.to_owned(), FileEntry::new(content)))
            .collect();
        Tree { entries }
    }

    /// Whether the tree contains no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of file entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Iterates entries in path order.
    pub fn entries(&self) -> impl Iterator<Item = (&RepoPath, &FileEntry)> {
        self.entries.iter().map(|(path, entry)| (&**path, entry))
    }

    /// The file entry at `path`, if any.
    pub fn value_at(&self, path: &RepoPath) -> Option<&FileEntry> {
        self.entries.get(path)
    }

    /// Returns a new tree with `entry` stored at `path`.
    pub fn with_entry(&self, path: RepoPathBuf, entry: FileEntry) -> Tree {
        let mut entries = self.entries.clone();
        entries.insert(path, entry);
        Tree { entries }
    }

    /// Returns a new tree without the entry at `path`.
    pub fn without_entry(&self, path: &RepoPath) -> Tree {
        let mut entries = self.entries.clone();
        entries.remove(path);
        Tree { entries }
    }

    /// Moves all entries under a prefix path.
    ///
    /// If the tree contains `src/lib.rs` and `README.md` and the prefix is
    /// `vendor/lib`, the result contains `vendor/lib/src/lib.rs` and
    /// `vendor/lib/README.md`.
    ///
    /// # Errors
    ///
    /// Returns `TreeError::InvalidPrefix` if the prefix is the root path.
    pub fn move_to_prefix(&self, prefix: &RepoPath) -> Result<Tree, TreeError> {
        check_prefix(prefix)?;
        let entries = self
            .entries
            .iter()
            .map(|(path, entry)| (prefix.join(path), entry.clone()))
            .collect();
        Ok(Tree { entries })
    }

    /// Extracts entries under a prefix path to root level.
    ///
    /// The inverse of [`Tree::move_to_prefix`]. Entries not under the
    /// prefix are excluded from the result. A missing prefix yields the
    /// empty tree, not an error.
    ///
    /// # Errors
    ///
    /// Returns `TreeError::InvalidPrefix` if the prefix is the root path.
    pub fn extract_at_prefix(&self, prefix: &RepoPath) -> Result<Tree, TreeError> {
        check_prefix(prefix)?;
        let mut entries = BTreeMap::new();
        for (path, entry) in &self.entries {
            if let Some(relative) = path.strip_prefix(prefix) {
                // Skip a file sitting at the prefix path itself.
                if !relative.is_root() {
                    entries.insert(relative.to_owned(), entry.clone());
                }
            }
        }
        Ok(Tree { entries })
    }

    /// Replaces the subtree at `prefix` wholesale with `subtree`.
    ///
    /// Every entry under the prefix is removed, then `subtree` (whose paths
    /// are relative to the prefix) is inserted under it. This is the graft
    /// primitive used when pulling external commits back into the monorepo.
    ///
    /// # Errors
    ///
    /// Returns `TreeError::InvalidPrefix` if the prefix is the root path.
    pub fn replace_at_prefix(&self, prefix: &RepoPath, subtree: &Tree) -> Result<Tree, TreeError> {
        check_prefix(prefix)?;
        let mut entries: BTreeMap<RepoPathBuf, FileEntry> = self
            .entries
            .iter()
            .filter(|(path, _)| !path.starts_with(prefix))
            .map(|(path, entry)| (path.clone(), entry.clone()))
            .collect();
        for (path, entry) in &subtree.entries {
            entries.insert(prefix.join(path), entry.clone());
        }
        Ok(Tree { entries })
    }

    /// Whether any entry exists at or under the given prefix.
    pub fn has_content_at_prefix(&self, prefix: &RepoPath) -> bool {
        self.entries.keys().any(|path| path.starts_with(prefix))
    }

    /// Checks if the prefix path conflicts with an existing file.
    ///
    /// A conflict occurs when a file (not a directory) exists at any point
    /// along the prefix path, which would prevent placing a subtree there.
    pub fn prefix_conflicts_with_file(&self, prefix: &RepoPath) -> Option<RepoPathBuf> {
        for ancestor in prefix.ancestors() {
            if ancestor.is_root() {
                continue;
            }
            if self.entries.contains_key(ancestor) {
                return Some(ancestor.to_owned());
            }
        }
        None
    }
}

fn check_prefix(prefix: &RepoPath) -> Result<(), TreeError> {
    if prefix.is_root() {
        return Err(TreeError::InvalidPrefix {
            message: "prefix cannot be the repository root".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(value: &str) -> &RepoPath {
        RepoPath::from_internal_string(value).unwrap()
    }

    #[test]
    fn test_move_to_prefix() {
        let tree = Tree::from_entries([
            (path("src/main.rs"), "fn main() {}"),
            (path("README.md"), "# Project"),
        ]);
        let moved = tree.move_to_prefix(path("vendor/lib")).unwrap();
        assert!(moved.value_at(path("vendor/lib/src/main.rs")).is_some());
        assert!(moved.value_at(path("vendor/lib/README.md")).is_some());
        assert!(moved.value_at(path("src/main.rs")).is_none());
    }

    #[test]
    fn test_move_to_prefix_root_error() {
        let tree = Tree::from_entries([(path("file.txt"), "content")]);
        assert!(matches!(
            tree.move_to_prefix(RepoPath::root()),
            Err(TreeError::InvalidPrefix { .. })
        ));
    }

    #[test]
    fn test_extract_at_prefix() {
        let tree = Tree::from_entries([
            (path("vendor/lib/src/lib.rs"), "lib content"),
            (path("vendor/lib/README.md"), "readme"),
            (path("other/file.txt"), "other"),
        ]);
        let extracted = tree.extract_at_prefix(path("vendor/lib")).unwrap();
        assert!(extracted.value_at(path("src/lib.rs")).is_some());
        assert!(extracted.value_at(path("README.md")).is_some());
        assert!(extracted.value_at(path("other/file.txt")).is_none());
        assert_eq!(extracted.len(), 2);
    }

    #[test]
    fn test_extract_at_missing_prefix_is_empty() {
        let tree = Tree::from_entries([(path("src/main.rs"), "content")]);
        let extracted = tree.extract_at_prefix(path("vendor/lib")).unwrap();
        assert!(extracted.is_empty());
    }

    #[test]
    fn test_roundtrip_move_and_extract() {
        let tree = Tree::from_entries([
            (path("src/lib.rs"), "lib content"),
            (path("README.md"), "readme"),
        ]);
        let prefix = path("vendor/lib");
        let moved = tree.move_to_prefix(prefix).unwrap();
        let extracted = moved.extract_at_prefix(prefix).unwrap();
        assert_eq!(extracted, tree);
    }

    #[test]
    fn test_replace_at_prefix() {
        let tree = Tree::from_entries([
            (path("cores/alpha/x.txt"), "old"),
            (path("cores/alpha/stale.txt"), "gone"),
            (path("docs/readme.md"), "docs"),
        ]);
        let subtree = Tree::from_entries([(path("x.txt"), "new")]);
        let replaced = tree.replace_at_prefix(path("cores/alpha"), &subtree).unwrap();
        assert_eq!(replaced.value_at(path("cores/alpha/x.txt")).unwrap().content, "new");
        assert!(replaced.value_at(path("cores/alpha/stale.txt")).is_none());
        assert!(replaced.value_at(path("docs/readme.md")).is_some());
    }

    #[test]
    fn test_prefix_conflicts_with_file() {
        let tree = Tree::from_entries([(path("vendor"), "this is a file")]);
        let conflict = tree.prefix_conflicts_with_file(path("vendor/lib/subdir"));
        assert_eq!(conflict.unwrap().as_internal_file_string(), "vendor");

        let tree = Tree::from_entries([(path("vendor/lib/file.rs"), "content")]);
        assert!(tree.prefix_conflicts_with_file(path("vendor/lib")).is_none());
    }

    #[test]
    fn test_has_content_at_prefix() {
        let tree = Tree::from_entries([(path("vendor/lib/file.rs"), "content")]);
        assert!(tree.has_content_at_prefix(path("vendor/lib")));
        assert!(tree.has_content_at_prefix(path("vendor")));
        assert!(!tree.has_content_at_prefix(path("src")));
    }
}
