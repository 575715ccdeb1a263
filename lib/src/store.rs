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

//! Content-addressed commit storage.
//!
//! The store is an append-only map from [`CommitId`] to immutable
//! [`Commit`] nodes. A commit id is a deterministic hash of the commit's
//! parents, tree, author and message, so creating the same commit twice
//! yields the identical id. This is what makes repeated split/push passes
//! idempotent: re-deriving a history produces bit-identical commits.
//!
//! A store may be backed by an on-disk object directory (one JSON file per
//! commit plus a `HEAD` ref), in which case created commits are persisted
//! with atomic writes.

use std::collections::HashMap;
use std::collections::HashSet;
use std::collections::VecDeque;
use std::fmt;
use std::fs;
use std::io::Write as _;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde::Serializer;
use thiserror::Error;
use tracing::debug;

use crate::repo_path::RepoPath;
use crate::repo_path::RepoPathBuf;
use crate::tree::Tree;
use crate::tree::TreeError;

/// Errors from store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested commit does not exist in this store.
    #[error("Commit not found: {0}")]
    NotFound(CommitId),

    /// A parent referenced by a new commit does not exist.
    #[error("Missing parent commit: {0}")]
    MissingParent(CommitId),

    /// The path is absent from every tree in the walked range.
    #[error("Path never existed in history: {0}")]
    PathNeverExisted(RepoPathBuf),

    /// An object file could not be read or written.
    #[error("Object store I/O error at {path}: {source}")]
    Io {
        /// The file or directory involved.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// An object file is malformed or its content does not match its id.
    #[error("Corrupt object at {path}: {message}")]
    Corrupt {
        /// The file involved.
        path: PathBuf,
        /// Description of the corruption.
        message: String,
    },

    /// A tree prefix operation failed.
    #[error(transparent)]
    Tree(#[from] TreeError),
}

/// Content-addressed commit identifier (blake3 of the commit fields).
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CommitId([u8; 32]);

impl CommitId {
    /// Parses a 64-character lowercase hex string.
    pub fn try_from_hex(hex: &str) -> Option<CommitId> {
        if hex.len() != 64 {
            return None;
        }
        let mut bytes = [0u8; 32];
        for (i, chunk) in hex.as_bytes().chunks(2).enumerate() {
            let hi = (chunk[0] as char).to_digit(16)?;
            let lo = (chunk[1] as char).to_digit(16)?;
            bytes[i] = (hi * 16 + lo) as u8;
        }
        Some(CommitId(bytes))
    }

    /// The id as a lowercase hex string.
    pub fn hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hex())
    }
}

impl fmt::Debug for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CommitId({})", &self.hex()[..12])
    }
}

impl Serialize for CommitId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.hex())
    }
}

impl<'de> Deserialize<'de> for CommitId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let hex = String::deserialize(deserializer)?;
        CommitId::try_from_hex(&hex)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid commit id: {hex}")))
    }
}

/// A commit timestamp: epoch milliseconds plus a UTC offset in minutes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp {
    /// Milliseconds since the Unix epoch.
    pub millis_since_epoch: i64,
    /// Timezone offset from UTC in minutes.
    pub tz_offset: i32,
}

/// Commit authorship.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    /// Author name.
    pub name: String,
    /// Author email.
    pub email: String,
    /// Author timestamp.
    pub timestamp: Timestamp,
}

/// An immutable commit node.
///
/// The `id` field is derived from the other fields and verified when
/// commits are loaded from disk or fetched from a remote.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    /// Content-addressed id.
    pub id: CommitId,
    /// Parent commit ids, ordered. Empty for a root commit.
    pub parents: Vec<CommitId>,
    /// Authorship.
    pub author: Signature,
    /// Commit message, possibly carrying subtree trailers.
    pub message: String,
    /// Tree snapshot.
    pub tree: Tree,
}

impl Commit {
    /// The first parent, if any.
    pub fn first_parent(&self) -> Option<&CommitId> {
        self.parents.first()
    }

    /// Recomputes the content-addressed id from the commit fields.
    pub fn computed_id(&self) -> CommitId {
        hash_commit(&self.parents, &self.author, &self.message, &self.tree)
    }
}

fn hash_commit(parents: &[CommitId], author: &Signature, message: &str, tree: &Tree) -> CommitId {
    let mut hasher = blake3::Hasher::new();
    let mut field = |bytes: &[u8]| {
        hasher.update(&(bytes.len() as u64).to_le_bytes());
        hasher.update(bytes);
    };
    field(b"treesync.commit.v1");
    field(&(parents.len() as u64).to_le_bytes());
    for parent in parents {
        field(&parent.0);
    }
    field(author.name.as_bytes());
    field(author.email.as_bytes());
    field(&author.timestamp.millis_since_epoch.to_le_bytes());
    field(&author.timestamp.tz_offset.to_le_bytes());
    field(message.as_bytes());
    field(&(tree.len() as u64).to_le_bytes());
    for (path, entry) in tree.entries() {
        field(path.as_internal_file_string().as_bytes());
        field(entry.content.as_bytes());
        field(&[entry.executable as u8]);
    }
    CommitId(*hasher.finalize().as_bytes())
}

#[derive(Default)]
struct StoreInner {
    commits: HashMap<CommitId, Arc<Commit>>,
}

/// Append-only, read-concurrent commit store.
pub struct Store {
    inner: RwLock<StoreInner>,
    dir: Option<PathBuf>,
}

impl Store {
    /// Creates an empty in-memory store.
    pub fn new() -> Arc<Store> {
        Arc::new(Store {
            inner: RwLock::new(StoreInner::default()),
            dir: None,
        })
    }

    /// Opens (creating if needed) a store backed by an object directory.
    ///
    /// Every object file is loaded and its id verified against its content.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Arc<Store>, StoreError> {
        let dir = dir.into();
        let commits_dir = dir.join("commits");
        fs::create_dir_all(&commits_dir).map_err(|source| StoreError::Io {
            path: commits_dir.clone(),
            source,
        })?;
        let mut inner = StoreInner::default();
        let read_dir = fs::read_dir(&commits_dir).map_err(|source| StoreError::Io {
            path: commits_dir.clone(),
            source,
        })?;
        for dir_entry in read_dir {
            let dir_entry = dir_entry.map_err(|source| StoreError::Io {
                path: commits_dir.clone(),
                source,
            })?;
            let path = dir_entry.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            let commit = read_commit_file(&path)?;
            inner.commits.insert(commit.id.clone(), Arc::new(commit));
        }
        debug!(commits = inner.commits.len(), dir = %dir.display(), "opened object store");
        Ok(Arc::new(Store {
            inner: RwLock::new(inner),
            dir: Some(dir),
        }))
    }

    /// Creates a commit from its constituent parts.
    ///
    /// Pure function of its inputs: re-invoking with identical inputs
    /// yields the identical id and is a no-op on the store.
    pub fn create_commit(
        &self,
        parents: Vec<CommitId>,
        author: Signature,
        message: String,
        tree: Tree,
    ) -> Result<Arc<Commit>, StoreError> {
        {
            let inner = self.inner.read();
            for parent in &parents {
                if !inner.commits.contains_key(parent) {
                    return Err(StoreError::MissingParent(parent.clone()));
                }
            }
        }
        let id = hash_commit(&parents, &author, &message, &tree);
        let mut inner = self.inner.write();
        if let Some(existing) = inner.commits.get(&id) {
            return Ok(existing.clone());
        }
        let commit = Arc::new(Commit {
            id: id.clone(),
            parents,
            author,
            message,
            tree,
        });
        if let Some(dir) = &self.dir {
            write_commit_file(dir, &commit)?;
        }
        inner.commits.insert(id, commit.clone());
        Ok(commit)
    }

    /// Imports an existing commit (e.g. fetched from a remote), verifying
    /// its id.
    pub fn import_commit(&self, commit: Commit) -> Result<Arc<Commit>, StoreError> {
        let computed = commit.computed_id();
        if computed != commit.id {
            return Err(StoreError::Corrupt {
                path: PathBuf::new(),
                message: format!("commit id {} does not match content {computed}", commit.id),
            });
        }
        self.create_commit(commit.parents, commit.author, commit.message, commit.tree)
    }

    /// Looks up a commit by id.
    pub fn get_commit(&self, id: &CommitId) -> Result<Arc<Commit>, StoreError> {
        self.inner
            .read()
            .commits
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    /// Whether the store holds the given commit.
    pub fn has_commit(&self, id: &CommitId) -> bool {
        self.inner.read().commits.contains_key(id)
    }

    /// Number of commits the store holds.
    pub fn commit_count(&self) -> usize {
        self.inner.read().commits.len()
    }

    /// The tree of `commit` restricted to `path`, relative to `path`.
    ///
    /// Fails with `PathNeverExisted` when nothing exists under the path in
    /// that commit.
    pub fn tree_at(&self, id: &CommitId, path: &RepoPath) -> Result<Tree, StoreError> {
        let commit = self.get_commit(id)?;
        if !commit.tree.has_content_at_prefix(path) {
            return Err(StoreError::PathNeverExisted(path.to_owned()));
        }
        Ok(commit.tree.extract_at_prefix(path)?)
    }

    /// Commits between `since` (exclusive) and `head` (inclusive) whose
    /// tree restricted to `path` differs from their first parent's.
    ///
    /// The walk follows the first-parent chain from `head`, descending into
    /// merge parents whose restricted tree differs from the merge's first
    /// parent. Results are oldest-first. Fails with `PathNeverExisted` when
    /// the path is absent from every tree the walk examines.
    pub fn commits_touching(
        &self,
        path: &RepoPath,
        since: Option<&CommitId>,
        head: &CommitId,
    ) -> Result<Vec<Arc<Commit>>, StoreError> {
        let mut touching = Vec::new();
        let mut ever_existed = false;
        let mut examined = 0usize;
        let mut visited = HashSet::new();
        let mut queue = VecDeque::from([head.clone()]);
        while let Some(id) = queue.pop_front() {
            if Some(&id) == since || !visited.insert(id.clone()) {
                continue;
            }
            examined += 1;
            let commit = self.get_commit(&id)?;
            let restricted = commit.tree.extract_at_prefix(path)?;
            ever_existed |= !restricted.is_empty();
            let first_parent_restricted = match commit.first_parent() {
                Some(parent_id) if Some(parent_id) != since => {
                    let parent = self.get_commit(parent_id)?;
                    queue.push_back(parent_id.clone());
                    parent.tree.extract_at_prefix(path)?
                }
                Some(parent_id) => {
                    let parent = self.get_commit(parent_id)?;
                    parent.tree.extract_at_prefix(path)?
                }
                None => Tree::empty(),
            };
            ever_existed |= !first_parent_restricted.is_empty();
            if restricted != first_parent_restricted {
                touching.push(commit.clone());
            }
            // Descend into merge parents that changed the subtree relative
            // to the first parent.
            for parent_id in commit.parents.iter().skip(1) {
                let parent = self.get_commit(parent_id)?;
                if parent.tree.extract_at_prefix(path)? != first_parent_restricted {
                    queue.push_back(parent_id.clone());
                }
            }
        }
        // An empty range is an empty result; the error is reserved for a
        // path absent from every tree the walk actually examined.
        if examined > 0 && !ever_existed {
            return Err(StoreError::PathNeverExisted(path.to_owned()));
        }
        touching.reverse();
        Ok(touching)
    }

    /// All ancestors of `head` that are not ancestors of `since`, in
    /// topological order (parents before children).
    ///
    /// The order is deterministic: ready commits are emitted in
    /// (timestamp, id) order.
    pub fn topo_range(
        &self,
        since: Option<&CommitId>,
        head: &CommitId,
    ) -> Result<Vec<Arc<Commit>>, StoreError> {
        let excluded = match since {
            Some(since) => self.ancestor_set(since)?,
            None => HashSet::new(),
        };
        // Collect the range.
        let mut range = HashMap::new();
        let mut queue = VecDeque::from([head.clone()]);
        while let Some(id) = queue.pop_front() {
            if excluded.contains(&id) || range.contains_key(&id) {
                continue;
            }
            let commit = self.get_commit(&id)?;
            for parent in &commit.parents {
                queue.push_back(parent.clone());
            }
            range.insert(id, commit);
        }
        Ok(topo_sort(range.into_values().collect()))
    }

    /// The set of `id` and all its ancestors. Commits absent from the
    /// store (e.g. a bookmark from another repository) terminate the walk.
    fn ancestor_set(&self, id: &CommitId) -> Result<HashSet<CommitId>, StoreError> {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([id.clone()]);
        while let Some(id) = queue.pop_front() {
            if !seen.insert(id.clone()) {
                continue;
            }
            if let Ok(commit) = self.get_commit(&id) {
                for parent in &commit.parents {
                    queue.push_back(parent.clone());
                }
            }
        }
        Ok(seen)
    }

    /// Whether `ancestor` is an ancestor of (or equal to) `descendant`.
    ///
    /// Commits absent from the store terminate the walk.
    pub fn is_ancestor(&self, ancestor: &CommitId, descendant: &CommitId) -> bool {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([descendant.clone()]);
        while let Some(id) = queue.pop_front() {
            if id == *ancestor {
                return true;
            }
            if !seen.insert(id.clone()) {
                continue;
            }
            if let Ok(commit) = self.get_commit(&id) {
                for parent in &commit.parents {
                    queue.push_back(parent.clone());
                }
            }
        }
        false
    }
}

/// Sorts commits parents-before-children, deterministically.
///
/// Parents outside the given set are treated as already emitted. Ready
/// commits are emitted in (timestamp, id) order so repeated runs over the
/// same set produce the same sequence.
pub fn topo_sort(commits: Vec<Arc<Commit>>) -> Vec<Arc<Commit>> {
    let by_id: HashMap<CommitId, Arc<Commit>> = commits
        .into_iter()
        .map(|commit| (commit.id.clone(), commit))
        .collect();
    let mut pending: HashMap<CommitId, usize> = by_id
        .values()
        .map(|commit| {
            let in_set = commit
                .parents
                .iter()
                .filter(|parent| by_id.contains_key(parent))
                .count();
            (commit.id.clone(), in_set)
        })
        .collect();
    let mut children: HashMap<CommitId, Vec<CommitId>> = HashMap::new();
    for commit in by_id.values() {
        for parent in &commit.parents {
            if by_id.contains_key(parent) {
                children
                    .entry(parent.clone())
                    .or_default()
                    .push(commit.id.clone());
            }
        }
    }
    let mut ready: Vec<&Arc<Commit>> = pending
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(id, _)| &by_id[id])
        .collect();
    let mut sorted = Vec::with_capacity(by_id.len());
    while !ready.is_empty() {
        ready.sort_by_key(|commit| (commit.author.timestamp, commit.id.clone()));
        let next = ready.remove(0).clone();
        for child in children.get(&next.id).into_iter().flatten() {
            let count = pending.get_mut(child).unwrap();
            *count -= 1;
            if *count == 0 {
                ready.push(&by_id[child]);
            }
        }
        sorted.push(next);
    }
    sorted
}

/// Reads the `HEAD` ref of an object directory, if present.
pub fn read_head(dir: &Path) -> Result<Option<CommitId>, StoreError> {
    let path = dir.join("HEAD");
    match fs::read_to_string(&path) {
        Ok(text) => {
            let hex = text.trim();
            CommitId::try_from_hex(hex)
                .map(Some)
                .ok_or_else(|| StoreError::Corrupt {
                    path,
                    message: format!("invalid HEAD ref: {hex:?}"),
                })
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(StoreError::Io { path, source }),
    }
}

/// Atomically updates the `HEAD` ref of an object directory.
pub fn write_head(dir: &Path, id: &CommitId) -> Result<(), StoreError> {
    let path = dir.join("HEAD");
    atomic_write(dir, &path, format!("{}\n", id.hex()).as_bytes())
}

fn read_commit_file(path: &Path) -> Result<Commit, StoreError> {
    let text = fs::read_to_string(path).map_err(|source| StoreError::Io {
        path: path.to_owned(),
        source,
    })?;
    let commit: Commit = serde_json::from_str(&text).map_err(|err| StoreError::Corrupt {
        path: path.to_owned(),
        message: err.to_string(),
    })?;
    let computed = commit.computed_id();
    if computed != commit.id {
        return Err(StoreError::Corrupt {
            path: path.to_owned(),
            message: format!("commit id {} does not match content {computed}", commit.id),
        });
    }
    Ok(commit)
}

fn write_commit_file(dir: &Path, commit: &Commit) -> Result<(), StoreError> {
    let commits_dir = dir.join("commits");
    let path = commits_dir.join(format!("{}.json", commit.id.hex()));
    if path.exists() {
        return Ok(());
    }
    let json = serde_json::to_string_pretty(commit).map_err(|err| StoreError::Corrupt {
        path: path.clone(),
        message: err.to_string(),
    })?;
    atomic_write(&commits_dir, &path, json.as_bytes())
}

fn atomic_write(dir: &Path, path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let io_err = |source| StoreError::Io {
        path: path.to_owned(),
        source,
    };
    fs::create_dir_all(dir).map_err(io_err)?;
    let mut temp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
    temp.write_all(bytes).map_err(io_err)?;
    temp.persist(path).map_err(|err| StoreError::Io {
        path: path.to_owned(),
        source: err.error,
    })?;
    Ok(())
}
