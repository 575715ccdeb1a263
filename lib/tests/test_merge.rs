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

//! End-to-end tests for grafting remote subtree history back into the
//! monorepo.

use std::sync::Arc;

use treesync_lib::merge::MergeError;
use treesync_lib::merge::merge;
use treesync_lib::metadata::SubtreeMetadata;
use treesync_lib::registry::SubtreeMapping;
use treesync_lib::repo_path::RepoPath;
use treesync_lib::split::split;
use treesync_lib::store::Commit;
use treesync_lib::store::CommitId;
use treesync_lib::store::Signature;
use treesync_lib::store::Store;
use treesync_lib::store::Timestamp;
use treesync_lib::sync::SyncPair;
use treesync_lib::tree::FileEntry;
use treesync_lib::tree::Tree;

fn repo_path(value: &str) -> &RepoPath {
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
        local_path: repo_path("cores/alpha").to_owned(),
        remote: "remotes/alpha".to_string(),
    }
}

fn commit(
    store: &Store,
    parents: Vec<CommitId>,
    seconds: i64,
    message: &str,
    entries: &[(&str, &str)],
) -> Arc<Commit> {
    let tree = Tree::from_entries(
        entries
            .iter()
            .map(|(path, content)| (repo_path(path), *content)),
    );
    store
        .create_commit(parents, signature(seconds), message.to_string(), tree)
        .unwrap()
}

/// A standalone-repository commit, built outside any store the way a
/// fetch would deliver it.
fn remote_commit(
    parents: Vec<CommitId>,
    seconds: i64,
    message: &str,
    entries: &[(&str, &str)],
) -> Commit {
    let commit = Commit {
        id: CommitId::try_from_hex(&"00".repeat(32)).unwrap(),
        parents,
        author: signature(seconds),
        message: message.to_string(),
        tree: Tree::from_entries(
            entries
                .iter()
                .map(|(path, content)| (repo_path(path), *content)),
        ),
    };
    Commit {
        id: commit.computed_id(),
        ..commit
    }
}

/// Monorepo with alpha already synced once: returns (head, pair).
fn synced_monorepo(store: &Store) -> (Arc<Commit>, SyncPair) {
    let head = commit(
        store,
        vec![],
        1,
        "import alpha core",
        &[("cores/alpha/top.v", "module top;"), ("README.md", "# mono")],
    );
    let result = split(store, &mapping(), &head.id, None).unwrap();
    let pair = SyncPair {
        local: head.id.clone(),
        remote: result.head.unwrap(),
    };
    (head, pair)
}

#[test]
fn test_merge_grafts_chain_under_prefix() {
    let store = Store::new();
    let (head, pair) = synced_monorepo(&store);

    let r1 = remote_commit(
        vec![pair.remote.clone()],
        2,
        "add clock domain",
        &[("top.v", "module top; // clk"), ("clk.v", "module clk;")],
    );
    let r2 = remote_commit(
        vec![r1.id.clone()],
        3,
        "document clock",
        &[
            ("top.v", "module top; // clk"),
            ("clk.v", "module clk;"),
            ("doc/clk.md", "# clk"),
        ],
    );
    let result = merge(
        &store,
        &mapping(),
        &head.id,
        Some(&pair),
        &[r1.clone(), r2.clone()],
    )
    .unwrap();

    // Head has not moved, so the chain itself is the result: no
    // synthetic merge commit.
    assert_eq!(result.commits.len(), 2);
    assert_eq!(result.head, result.commits[1].id);
    assert_eq!(result.remote_head, Some(r2.id.clone()));

    let g1 = &result.commits[0];
    assert_eq!(g1.parents, vec![head.id.clone()]);
    assert_eq!(g1.author, r1.author);
    assert_eq!(
        g1.tree.value_at(repo_path("cores/alpha/clk.v")),
        Some(&FileEntry::new("module clk;"))
    );
    // Content outside the subtree is untouched.
    assert_eq!(
        g1.tree.value_at(repo_path("README.md")),
        Some(&FileEntry::new("# mono"))
    );

    // Grafted commits carry provenance trailers pointing at their
    // remote source.
    let meta = SubtreeMetadata::parse(&g1.message);
    assert!(meta.is_grafted_into(repo_path("cores/alpha")));
    assert_eq!(meta.source_commit, Some(r1.id.clone()));
}

#[test]
fn test_merge_creates_synthetic_merge_when_head_advanced() {
    let store = Store::new();
    let (synced_head, pair) = synced_monorepo(&store);
    // The monorepo moves on outside the subtree.
    let head = commit(
        &store,
        vec![synced_head.id.clone()],
        2,
        "update monorepo readme",
        &[("cores/alpha/top.v", "module top;"), ("README.md", "# mono v2")],
    );

    let r1 = remote_commit(
        vec![pair.remote.clone()],
        3,
        "fix top module",
        &[("top.v", "module top; // fixed")],
    );
    let result = merge(&store, &mapping(), &head.id, Some(&pair), &[r1.clone()]).unwrap();

    // One graft plus the synthetic merge.
    assert_eq!(result.commits.len(), 2);
    let merge_commit = result.commits.last().unwrap();
    assert_eq!(result.head, merge_commit.id);
    assert_eq!(
        merge_commit.parents,
        vec![head.id.clone(), result.commits[0].id.clone()]
    );
    // The merge tree combines the advanced mainline with the incoming
    // subtree content.
    assert_eq!(
        merge_commit.tree.value_at(repo_path("README.md")),
        Some(&FileEntry::new("# mono v2"))
    );
    assert_eq!(
        merge_commit.tree.value_at(repo_path("cores/alpha/top.v")),
        Some(&FileEntry::new("module top; // fixed"))
    );

    let meta = SubtreeMetadata::parse(&merge_commit.message);
    assert_eq!(meta.mainline_commit, Some(head.id.clone()));
    assert_eq!(meta.source_commit, Some(r1.id.clone()));
}

#[test]
fn test_merge_diverged_subtree_mutates_nothing() {
    let store = Store::new();
    let (synced_head, pair) = synced_monorepo(&store);
    // Local subtree edit after the sync point.
    let head = commit(
        &store,
        vec![synced_head.id.clone()],
        2,
        "local alpha edit",
        &[("cores/alpha/top.v", "module top; // local"), ("README.md", "# mono")],
    );
    let r1 = remote_commit(
        vec![pair.remote.clone()],
        3,
        "remote alpha edit",
        &[("top.v", "module top; // remote")],
    );

    let before = store.commit_count();
    let result = merge(&store, &mapping(), &head.id, Some(&pair), &[r1]);
    match result {
        Err(MergeError::DivergedSubtree {
            path,
            local_commits,
            incoming_commits,
        }) => {
            assert_eq!(&*path, repo_path("cores/alpha"));
            assert_eq!(local_commits, 1);
            assert_eq!(incoming_commits, 1);
        }
        other => panic!("expected DivergedSubtree, got {other:?}"),
    }
    // The failed merge created no commits.
    assert_eq!(store.commit_count(), before);
}

#[test]
fn test_merge_initial_import_requires_absent_subtree() {
    let store = Store::new();
    let head = commit(&store, vec![], 1, "init", &[("README.md", "# mono")]);
    let r1 = remote_commit(vec![], 2, "initial", &[("top.v", "module top;")]);

    // No sync pair and no local subtree content: the graft is an import.
    let result = merge(&store, &mapping(), &head.id, None, &[r1.clone()]).unwrap();
    assert_eq!(result.commits.len(), 1);
    assert_eq!(
        result.commits[0].tree.value_at(repo_path("cores/alpha/top.v")),
        Some(&FileEntry::new("module top;"))
    );

    // But with local subtree content and no recorded sync, there is no
    // base to reason from.
    let occupied = commit(
        &store,
        vec![head.id.clone()],
        3,
        "handwritten alpha",
        &[("README.md", "# mono"), ("cores/alpha/top.v", "module other;")],
    );
    let result = merge(&store, &mapping(), &occupied.id, None, &[r1]);
    assert!(matches!(result, Err(MergeError::NoSyncBase { .. })));
}

#[test]
fn test_merge_then_split_does_not_echo() {
    let store = Store::new();
    let (head, pair) = synced_monorepo(&store);
    let r1 = remote_commit(
        vec![pair.remote.clone()],
        2,
        "remote edit",
        &[("top.v", "module top; // v2")],
    );
    let result = merge(&store, &mapping(), &head.id, Some(&pair), &[r1.clone()]).unwrap();

    // Accept the merge: the pair now spans the grafted head and the
    // remote commit it came from.
    let pair = SyncPair {
        local: result.head.clone(),
        remote: result.remote_head.clone().unwrap(),
    };
    // A later outbound pass over the accepted merge derives nothing:
    // the grafted commits resolve back to their remote source.
    let outbound = split(&store, &mapping(), &result.head, Some(&pair)).unwrap();
    assert!(outbound.is_empty());
    assert_eq!(outbound.head, Some(r1.id));
}
