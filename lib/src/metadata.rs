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

//! Subtree metadata stored in commit messages.
//!
//! Sync operations track provenance using trailers in commit messages,
//! in the style of `git subtree`:
//!
//! ```text
//! Commit message here
//!
//! subtree-dir: cores/alpha
//! subtree-mainline: abc123...
//! subtree-source: def456...
//! ```
//!
//! The merger annotates every grafted commit with `subtree-dir` and
//! `subtree-source`, and the splitter uses those trailers to avoid echoing
//! pulled commits back out to the remote they came from.

use crate::repo_path::RepoPath;
use crate::repo_path::RepoPathBuf;
use crate::store::CommitId;

const DIR_KEY: &str = "subtree-dir";
const MAINLINE_KEY: &str = "subtree-mainline";
const SOURCE_KEY: &str = "subtree-source";

/// Subtree provenance parsed from a commit message.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SubtreeMetadata {
    /// Path to the subtree directory the commit belongs to.
    pub subtree_dir: Option<RepoPathBuf>,

    /// Monorepo commit a synthetic merge commit reconciled against.
    pub mainline_commit: Option<CommitId>,

    /// Remote commit a grafted monorepo commit was derived from.
    pub source_commit: Option<CommitId>,
}

/// A single `Key: value` trailer line.
struct Trailer {
    key: String,
    value: String,
}

/// Parses trailers from the final paragraph of a message.
///
/// A line is a trailer when it has the form `token: value` with a
/// non-empty token containing no whitespace. The final paragraph counts
/// only if every line in it parses as a trailer.
fn parse_trailers(message: &str) -> Vec<Trailer> {
    let trimmed = message.trim_end_matches('\n');
    let last_paragraph = match trimmed.rsplit_once("\n\n") {
        Some((_, paragraph)) => paragraph,
        None => trimmed,
    };
    let mut trailers = Vec::new();
    for line in last_paragraph.lines() {
        let Some((key, value)) = line.split_once(':') else {
            return Vec::new();
        };
        let key = key.trim();
        if key.is_empty() || key.contains(char::is_whitespace) {
            return Vec::new();
        }
        trailers.push(Trailer {
            key: key.to_string(),
            value: value.trim().to_string(),
        });
    }
    trailers
}

impl SubtreeMetadata {
    /// Creates empty subtree metadata.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates metadata recording a graft from a remote commit.
    pub fn grafted(dir: RepoPathBuf, source: CommitId) -> Self {
        Self {
            subtree_dir: Some(dir),
            source_commit: Some(source),
            ..Self::default()
        }
    }

    /// Parse metadata from a commit message.
    pub fn parse(message: &str) -> Self {
        let mut metadata = Self::default();
        for trailer in parse_trailers(message) {
            if DIR_KEY == trailer.key
                && let Ok(path) = RepoPath::from_internal_string(&trailer.value)
            {
                metadata.subtree_dir = Some(path.to_owned());
            } else if MAINLINE_KEY == trailer.key
                && let Some(id) = CommitId::try_from_hex(&trailer.value)
            {
                metadata.mainline_commit = Some(id);
            } else if SOURCE_KEY == trailer.key
                && let Some(id) = CommitId::try_from_hex(&trailer.value)
            {
                metadata.source_commit = Some(id);
            }
        }
        metadata
    }

    /// Format metadata as trailer lines (without the message body).
    pub fn format_trailers(&self) -> String {
        let mut lines = Vec::new();
        if let Some(dir) = &self.subtree_dir {
            lines.push(format!("{DIR_KEY}: {}", dir.as_internal_file_string()));
        }
        if let Some(id) = &self.mainline_commit {
            lines.push(format!("{MAINLINE_KEY}: {}", id.hex()));
        }
        if let Some(id) = &self.source_commit {
            lines.push(format!("{SOURCE_KEY}: {}", id.hex()));
        }
        if lines.is_empty() {
            String::new()
        } else {
            lines.join("\n") + "\n"
        }
    }

    /// Append metadata trailers to a commit message.
    ///
    /// Inserts a blank line separator unless the message already ends with
    /// one.
    pub fn add_to_message(&self, message: &str) -> String {
        let trailers = self.format_trailers();
        if trailers.is_empty() {
            return message.to_string();
        }
        let message = message.trim_end();
        if message.is_empty() {
            trailers
        } else {
            format!("{message}\n\n{trailers}")
        }
    }

    /// Whether a commit was grafted into `dir` from an external repository.
    pub fn is_grafted_into(&self, dir: &RepoPath) -> bool {
        self.source_commit.is_some() && self.subtree_dir.as_deref() == Some(dir)
    }

    /// Check if this metadata is empty (no fields set).
    pub fn is_empty(&self) -> bool {
        self.subtree_dir.is_none() && self.mainline_commit.is_none() && self.source_commit.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dir_only() {
        let msg = "Message\n\nsubtree-dir: cores/alpha\n";
        let meta = SubtreeMetadata::parse(msg);
        assert_eq!(
            meta.subtree_dir,
            Some(RepoPathBuf::from_internal_string("cores/alpha").unwrap())
        );
        assert!(meta.mainline_commit.is_none());
        assert!(meta.source_commit.is_none());
    }

    #[test]
    fn test_parse_all_fields() {
        let msg = format!(
            "Message\n\nsubtree-dir: cores/alpha\nsubtree-mainline: {}\nsubtree-source: {}\n",
            "ab".repeat(32),
            "cd".repeat(32),
        );
        let meta = SubtreeMetadata::parse(&msg);
        assert!(meta.subtree_dir.is_some());
        assert!(meta.mainline_commit.is_some());
        assert!(meta.source_commit.is_some());
    }

    #[test]
    fn test_parse_no_metadata() {
        let meta = SubtreeMetadata::parse("Just a regular commit message\n\nWith body text.");
        assert!(meta.is_empty());
    }

    #[test]
    fn test_parse_ignores_other_trailers() {
        let meta = SubtreeMetadata::parse("Message\n\nSigned-off-by: A <a@example.com>\n");
        assert!(meta.is_empty());
    }

    #[test]
    fn test_parse_mixed_paragraph_is_not_trailers() {
        let meta = SubtreeMetadata::parse("Message\n\nprose line\nsubtree-dir: cores/alpha\n");
        assert!(meta.is_empty());
    }

    #[test]
    fn test_add_to_message() {
        let meta = SubtreeMetadata::grafted(
            RepoPathBuf::from_internal_string("cores/alpha").unwrap(),
            CommitId::try_from_hex(&"ab".repeat(32)).unwrap(),
        );
        let msg = meta.add_to_message("Original message");
        assert!(msg.starts_with("Original message\n\nsubtree-dir: cores/alpha\n"));
        assert!(msg.contains("subtree-source: "));
    }

    #[test]
    fn test_add_to_message_trims_trailing_newlines() {
        let meta = SubtreeMetadata {
            subtree_dir: Some(RepoPathBuf::from_internal_string("cores/alpha").unwrap()),
            ..Default::default()
        };
        let msg = meta.add_to_message("Original message\n\n");
        assert!(msg.contains("message\n\nsubtree-dir:"));
    }

    #[test]
    fn test_roundtrip_through_message() {
        let meta = SubtreeMetadata::grafted(
            RepoPathBuf::from_internal_string("cores/alpha").unwrap(),
            CommitId::try_from_hex(&"ef".repeat(32)).unwrap(),
        );
        let parsed = SubtreeMetadata::parse(&meta.add_to_message("Fix the widget"));
        assert_eq!(parsed, meta);
    }

    #[test]
    fn test_is_grafted_into() {
        let dir = RepoPathBuf::from_internal_string("cores/alpha").unwrap();
        let meta = SubtreeMetadata::grafted(dir.clone(), CommitId::try_from_hex(&"ab".repeat(32)).unwrap());
        assert!(meta.is_grafted_into(&dir));
        let other = RepoPathBuf::from_internal_string("cores/beta").unwrap();
        assert!(!meta.is_grafted_into(&other));
    }
}
