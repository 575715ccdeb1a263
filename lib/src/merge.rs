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

//! Grafting: re-rooting external commits under a subtree path and
//! appending them to the monorepo's history.
//!
//! Each incoming remote commit becomes a new monorepo commit whose tree is
//! the previous step's tree with the subtree replaced wholesale by the
//! incoming tree. When the monorepo head advanced outside the subtree
//! since the last sync, a synthetic two-parent merge commit reconciles the
//! grafted chain with the head, so unrelated concurrent monorepo work is
//! neither lost nor silently rebased.
//!
//! Independent edits to the same subtree on both sides are never
//! auto-resolved: the merge fails with [`MergeError::DivergedSubtree`]
//! before anything is written.

use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::metadata::SubtreeMetadata;
use crate::registry::SubtreeMapping;
use crate::repo_path::RepoPathBuf;
use crate::store::Commit;
use crate::store::CommitId;
use crate::store::Store;
use crate::store::StoreError;
use crate::sync::SyncPair;
use crate::tree::TreeError;

/// Errors from merge operations.
#[derive(Debug, Error)]
pub enum MergeError {
    /// Both the monorepo and the remote changed the subtree since the
    /// last sync point. Requires manual resolution.
    #[error(
        "Subtree {path} diverged: {local_commits} monorepo commit(s) and \
         {incoming_commits} remote commit(s) both changed it since the last sync"
    )]
    DivergedSubtree {
        /// The subtree path.
        path: RepoPathBuf,
        /// Number of conflicting monorepo commits.
        local_commits: usize,
        /// Number of incoming remote commits.
        incoming_commits: usize,
    },

    /// The mapping was never synced and the subtree already has content,
    /// so there is no common base to graft onto.
    #[error("Subtree {path} already has monorepo content but no sync point; push it first")]
    NoSyncBase {
        /// The subtree path.
        path: RepoPathBuf,
    },

    /// A store operation failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A tree prefix operation failed.
    #[error(transparent)]
    Tree(#[from] TreeError),
}

/// The result of grafting incoming commits into the monorepo.
#[derive(Debug)]
pub struct MergeResult {
    /// Newly created monorepo commits, oldest-first. Includes the final
    /// synthetic merge commit when one was needed.
    pub commits: Vec<Arc<Commit>>,
    /// The new monorepo head candidate. Equals the prior head when the
    /// incoming set was empty.
    pub head: CommitId,
    /// The remote commit the graft stopped at, recorded as the new remote
    /// side of the sync pair.
    pub remote_head: Option<CommitId>,
}

impl MergeResult {
    /// Whether nothing was grafted (no incoming commits).
    pub fn is_noop(&self) -> bool {
        self.commits.is_empty()
    }
}

/// Grafts `incoming` remote commits into the monorepo under
/// `mapping.local_path`.
///
/// `incoming` must be ordered oldest-first, as produced by a remote fetch.
/// The grafted chain is based on the last-synced local commit
/// (`since.local`), so grafted trees never pick up unrelated monorepo
/// content that landed after the sync point; the final synthetic merge
/// commit reconciles with `head` when it advanced outside the subtree.
///
/// Nothing durable is produced on failure: the divergence check runs
/// before any commit is created.
pub fn merge(
    store: &Store,
    mapping: &SubtreeMapping,
    head: &CommitId,
    since: Option<&SyncPair>,
    incoming: &[Commit],
) -> Result<MergeResult, MergeError> {
    let prefix = &mapping.local_path;
    if incoming.is_empty() {
        return Ok(MergeResult {
            commits: Vec::new(),
            head: head.clone(),
            remote_head: since.map(|pair| pair.remote.clone()),
        });
    }

    let base = match since {
        Some(pair) => pair.local.clone(),
        None => {
            // First-ever pull: only legal into a path with no content.
            let head_commit = store.get_commit(head)?;
            if head_commit.tree.has_content_at_prefix(prefix) {
                return Err(MergeError::NoSyncBase {
                    path: prefix.clone(),
                });
            }
            head.clone()
        }
    };

    // Conflict policy: independent monorepo edits to the subtree since the
    // last sync are surfaced, never auto-resolved. Commits that were
    // grafted from this same remote are not independent edits.
    if let Some(pair) = since {
        let local_edits: Vec<_> = store
            .commits_touching(prefix, Some(&pair.local), head)?
            .into_iter()
            .filter(|commit| !SubtreeMetadata::parse(&commit.message).is_grafted_into(prefix))
            .collect();
        if !local_edits.is_empty() {
            return Err(MergeError::DivergedSubtree {
                path: prefix.clone(),
                local_commits: local_edits.len(),
                incoming_commits: incoming.len(),
            });
        }
    }

    debug!(
        mapping = mapping.name,
        incoming = incoming.len(),
        "grafting remote commits"
    );

    let mut commits = Vec::new();
    let mut prev_id = base.clone();
    let mut prev_tree = store.get_commit(&base)?.tree.clone();
    for remote_commit in incoming {
        let grafted_tree = prev_tree.replace_at_prefix(prefix, &remote_commit.tree)?;
        let meta = SubtreeMetadata::grafted(prefix.clone(), remote_commit.id.clone());
        let grafted = store.create_commit(
            vec![prev_id],
            remote_commit.author.clone(),
            meta.add_to_message(&remote_commit.message),
            grafted_tree.clone(),
        )?;
        prev_id = grafted.id.clone();
        prev_tree = grafted_tree;
        commits.push(grafted);
    }
    let last_incoming = incoming.last().expect("incoming is non-empty");

    // When the monorepo advanced since the sync point, reconcile with a
    // synthetic merge commit instead of a linear append.
    let new_head = if base != *head {
        let head_tree = store.get_commit(head)?.tree.clone();
        let merged_tree = head_tree.replace_at_prefix(prefix, &last_incoming.tree)?;
        let meta = SubtreeMetadata {
            subtree_dir: Some(prefix.clone()),
            mainline_commit: Some(head.clone()),
            source_commit: Some(last_incoming.id.clone()),
        };
        let message = meta.add_to_message(&format!(
            "Merge subtree '{}' from {}",
            prefix.as_internal_file_string(),
            mapping.remote
        ));
        let merge_commit = store.create_commit(
            vec![head.clone(), prev_id],
            last_incoming.author.clone(),
            message,
            merged_tree,
        )?;
        commits.push(merge_commit.clone());
        merge_commit.id.clone()
    } else {
        prev_id
    };

    debug!(
        mapping = mapping.name,
        grafted = commits.len(),
        head = new_head.hex(),
        "graft complete"
    );
    Ok(MergeResult {
        commits,
        head: new_head,
        remote_head: Some(last_incoming.id.clone()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo_path::RepoPath;
    use crate::split::split;
    use crate::store::Signature;
    use crate::store::Timestamp;
    use crate::tree::Tree;

    fn path(value: &str) -> &RepoPath {
        RepoPath::from_internal_string(value).unwrap()
    }

    fn signature(seconds: i64) -> Signature {
        Signature {
            name: "Test Author".to_string(),
            email: "test@example.com".to_string(),
            timestamp: Timestamp {
                millis_since_epoch: seconds * 1000,
                tz_offset: 0,
            },
        }
    }

    fn mapping() -> SubtreeMapping {
        SubtreeMapping {
            name: "alpha".to_string(),
            local_path: RepoPathBuf::from_internal_string("cores/alpha").unwrap(),
            remote: "remotes/alpha".to_string(),
        }
    }

    /// Monorepo with one synced commit; returns (monorepo head, pair).
    fn synced_monorepo(store: &Store) -> (CommitId, SyncPair) {
        let tree = Tree::from_entries([
            (path("cores/alpha/x.txt"), "v1"),
            (path("docs/readme.md"), "docs"),
        ]);
        let head = store
            .create_commit(vec![], signature(1), "initial".to_string(), tree)
            .unwrap();
        let result = split(store, &mapping(), &head.id, None).unwrap();
        let pair = SyncPair {
            local: head.id.clone(),
            remote: result.head.unwrap(),
        };
        (head.id.clone(), pair)
    }

    /// A remote commit editing x.txt on top of the split head.
    fn remote_edit(store: &Store, pair: &SyncPair, seconds: i64, content: &str) -> Commit {
        let tree = Tree::from_entries([(path("x.txt"), content)]);
        let commit = store
            .create_commit(
                vec![pair.remote.clone()],
                signature(seconds),
                "remote edit".to_string(),
                tree,
            )
            .unwrap();
        (*commit).clone()
    }

    #[test]
    fn test_merge_empty_incoming_is_noop() {
        let store = Store::new();
        let (head, pair) = synced_monorepo(&store);
        let result = merge(&store, &mapping(), &head, Some(&pair), &[]).unwrap();
        assert!(result.is_noop());
        assert_eq!(result.head, head);
    }

    #[test]
    fn test_merge_linear_graft() {
        let store = Store::new();
        let (head, pair) = synced_monorepo(&store);
        let incoming = remote_edit(&store, &pair, 2, "v2");

        let result = merge(&store, &mapping(), &head, Some(&pair), &[incoming.clone()]).unwrap();
        assert_eq!(result.commits.len(), 1);
        let grafted = &result.commits[0];
        // Linear append: the monorepo had not advanced.
        assert_eq!(grafted.parents, [head.clone()]);
        assert_eq!(
            grafted.tree.value_at(path("cores/alpha/x.txt")).unwrap().content,
            "v2"
        );
        // Unrelated monorepo content is preserved.
        assert!(grafted.tree.value_at(path("docs/readme.md")).is_some());
        // Provenance trailers recorded.
        let meta = SubtreeMetadata::parse(&grafted.message);
        assert_eq!(meta.source_commit, Some(incoming.id.clone()));
        assert_eq!(result.remote_head, Some(incoming.id));
    }

    #[test]
    fn test_merge_reconciles_advanced_head() {
        let store = Store::new();
        let (head, pair) = synced_monorepo(&store);
        // Monorepo advances outside the subtree.
        let head_commit = store.get_commit(&head).unwrap();
        let new_tree = head_commit.tree.with_entry(
            RepoPathBuf::from_internal_string("docs/changelog.md").unwrap(),
            crate::tree::FileEntry::new("changelog"),
        );
        let advanced = store
            .create_commit(vec![head.clone()], signature(5), "docs".to_string(), new_tree)
            .unwrap();
        let incoming = remote_edit(&store, &pair, 2, "v2");

        let result = merge(
            &store,
            &mapping(),
            &advanced.id,
            Some(&pair),
            &[incoming.clone()],
        )
        .unwrap();
        // One grafted commit plus the synthetic merge commit.
        assert_eq!(result.commits.len(), 2);
        let merge_commit = result.commits.last().unwrap();
        assert_eq!(merge_commit.parents.len(), 2);
        assert_eq!(merge_commit.parents[0], advanced.id);
        assert_eq!(merge_commit.parents[1], result.commits[0].id);
        // The merged tree has both sides' work.
        assert_eq!(
            merge_commit.tree.value_at(path("cores/alpha/x.txt")).unwrap().content,
            "v2"
        );
        assert!(merge_commit.tree.value_at(path("docs/changelog.md")).is_some());
        let meta = SubtreeMetadata::parse(&merge_commit.message);
        assert_eq!(meta.mainline_commit, Some(advanced.id.clone()));
    }

    #[test]
    fn test_merge_detects_diverged_subtree() {
        let store = Store::new();
        let (head, pair) = synced_monorepo(&store);
        // Monorepo edits the subtree directly.
        let head_commit = store.get_commit(&head).unwrap();
        let new_tree = head_commit.tree.with_entry(
            RepoPathBuf::from_internal_string("cores/alpha/x.txt").unwrap(),
            crate::tree::FileEntry::new("local edit"),
        );
        let local_edit = store
            .create_commit(vec![head.clone()], signature(5), "local".to_string(), new_tree)
            .unwrap();
        let incoming = remote_edit(&store, &pair, 2, "remote edit");

        let result = merge(
            &store,
            &mapping(),
            &local_edit.id,
            Some(&pair),
            &[incoming],
        );
        assert!(matches!(
            result,
            Err(MergeError::DivergedSubtree { .. })
        ));
    }

    #[test]
    fn test_merge_never_synced_into_populated_path() {
        let store = Store::new();
        let (head, pair) = synced_monorepo(&store);
        let incoming = remote_edit(&store, &pair, 2, "v2");
        let result = merge(&store, &mapping(), &head, None, &[incoming]);
        assert!(matches!(result, Err(MergeError::NoSyncBase { .. })));
    }

    #[test]
    fn test_merge_first_pull_into_empty_path() {
        let store = Store::new();
        let tree = Tree::from_entries([(path("docs/readme.md"), "docs")]);
        let head = store
            .create_commit(vec![], signature(1), "initial".to_string(), tree)
            .unwrap();
        let remote_tree = Tree::from_entries([(path("x.txt"), "imported")]);
        let remote_commit = Commit {
            id: CommitId::try_from_hex(&"00".repeat(32)).unwrap(),
            parents: vec![],
            author: signature(2),
            message: "import".to_string(),
            tree: remote_tree,
        };
        let remote_commit = Commit {
            id: remote_commit.computed_id(),
            ..remote_commit
        };

        let result = merge(&store, &mapping(), &head.id, None, &[remote_commit]).unwrap();
        assert_eq!(result.commits.len(), 1);
        let grafted = &result.commits[0];
        assert_eq!(
            grafted.tree.value_at(path("cores/alpha/x.txt")).unwrap().content,
            "imported"
        );
        assert!(grafted.tree.value_at(path("docs/readme.md")).is_some());
    }
}
