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

//! Splitting: deriving a path-filtered, independent history for one
//! subtree.
//!
//! The splitter walks the monorepo history in topological order and
//! rewrites each commit that changed the subtree into a new commit whose
//! tree is the source tree relativized to the subtree path. Commits that
//! did not change the subtree are elided; their surviving split ancestor
//! becomes the parent of the next retained commit. Retained commits keep
//! the source author, timestamp and message, so re-running a split over
//! the same range yields bit-identical commit ids. That determinism is
//! what makes repeated pushes idempotent.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::metadata::SubtreeMetadata;
use crate::registry::SubtreeMapping;
use crate::store::Commit;
use crate::store::CommitId;
use crate::store::Store;
use crate::store::StoreError;
use crate::sync::SyncPair;
use crate::tree::Tree;
use crate::tree::TreeError;

/// Errors from split operations.
#[derive(Debug, Error)]
pub enum SplitError {
    /// A store operation failed (including `PathNeverExisted`).
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A tree prefix operation failed.
    #[error(transparent)]
    Tree(#[from] TreeError),
}

/// A derived, independent commit DAG for one subtree.
#[derive(Debug)]
pub struct SplitResult {
    /// Newly created split commits, oldest-first.
    pub commits: Vec<Arc<Commit>>,
    /// The split counterpart of the monorepo head, if the subtree has any
    /// history at all. Equals the previous remote head when the range
    /// contained no subtree changes.
    pub head: Option<CommitId>,
}

impl SplitResult {
    /// Whether the range contained no subtree changes.
    pub fn is_empty(&self) -> bool {
        self.commits.is_empty()
    }
}

/// Splits the subtree history of `mapping` out of the monorepo.
///
/// Walks commits between `since.local` (exclusive, or the root if never
/// synced) and `head`, rewriting each commit that changed the subtree.
/// The `since` pair seeds the rewrite map so that the first retained
/// commit is parented on the remote commit the last sync stopped at.
///
/// Commits that were themselves grafted from this mapping's remote are
/// elided and resolve to their recorded source commit, so pulled history
/// is never echoed back outward.
///
/// # Errors
///
/// `PathNeverExisted` (via [`StoreError`]) when the mapping's path is
/// absent from every tree in the walked range and there is no previous
/// sync point. An empty range is an empty result, not an error.
pub fn split(
    store: &Store,
    mapping: &SubtreeMapping,
    head: &CommitId,
    since: Option<&SyncPair>,
) -> Result<SplitResult, SplitError> {
    let prefix = &mapping.local_path;
    let range = store.topo_range(since.map(|pair| &pair.local), head)?;
    debug!(
        mapping = mapping.name,
        range = range.len(),
        "splitting subtree history"
    );

    // Maps source monorepo commit ids to their surviving split ancestor
    // (None when the subtree does not exist on that line yet).
    let mut rewritten: HashMap<CommitId, Option<CommitId>> = HashMap::new();
    if let Some(pair) = since {
        rewritten.insert(pair.local.clone(), Some(pair.remote.clone()));
    }

    let mut commits = Vec::new();
    let mut ever_existed = since.is_some();
    for commit in &range {
        // A commit pulled from this remote resolves to the remote commit
        // it was grafted from.
        let meta = SubtreeMetadata::parse(&commit.message);
        if meta.is_grafted_into(prefix) {
            rewritten.insert(commit.id.clone(), meta.source_commit);
            ever_existed = true;
            continue;
        }

        let restricted = commit.tree.extract_at_prefix(prefix)?;
        if restricted.is_empty() {
            // The subtree does not exist at this commit. A deletion starts
            // a fresh span: ancestry is not carried across it.
            rewritten.insert(commit.id.clone(), None);
            continue;
        }
        ever_existed = true;

        // Resolve parents through the rewrite map, preserving order and
        // dropping duplicates.
        let mut mapped: Vec<CommitId> = Vec::new();
        for parent in &commit.parents {
            if let Some(Some(id)) = rewritten.get(parent)
                && !mapped.contains(id)
            {
                mapped.push(id.clone());
            }
        }

        // Elide when one mapped parent already has exactly this subtree
        // state and subsumes every other mapped parent. This covers both
        // linear commits with no subtree change and spurious merges.
        let elide_to = mapped.iter().find(|parent| {
            split_tree(store, parent).is_some_and(|tree| tree == restricted)
                && mapped
                    .iter()
                    .all(|other| other == *parent || store.is_ancestor(other, parent))
        });
        if let Some(target) = elide_to {
            rewritten.insert(commit.id.clone(), Some(target.clone()));
            continue;
        }

        // Retain. Unrelated merge parents that are subsumed by another
        // kept parent are dropped to keep the split graph free of
        // spurious merges.
        let kept: Vec<CommitId> = mapped
            .iter()
            .filter(|parent| {
                !mapped
                    .iter()
                    .any(|other| other != *parent && store.is_ancestor(parent, other))
            })
            .cloned()
            .collect();
        let split_commit = store.create_commit(
            kept,
            commit.author.clone(),
            commit.message.clone(),
            restricted,
        )?;
        rewritten.insert(commit.id.clone(), Some(split_commit.id.clone()));
        commits.push(split_commit);
    }

    if !ever_existed {
        return Err(StoreError::PathNeverExisted(prefix.clone()).into());
    }

    let head = match rewritten.get(head) {
        Some(resolved) => resolved.clone(),
        None => since.map(|pair| pair.remote.clone()),
    };
    debug!(
        mapping = mapping.name,
        retained = commits.len(),
        head = head.as_ref().map(|id| id.hex()),
        "split complete"
    );
    Ok(SplitResult { commits, head })
}

/// The tree of a split commit, when the commit is present in the store.
fn split_tree(store: &Store, id: &CommitId) -> Option<Tree> {
    store.get_commit(id).ok().map(|commit| commit.tree.clone())
}
