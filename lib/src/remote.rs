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

//! The remote repository boundary.
//!
//! The sync core only ever sees a remote through [`SubtreeRemote`]:
//! something that has a head, can report commits newer than a bookmark,
//! and accepts a batch of commits. All methods are async so network-bound
//! implementations can suspend; synchronous callers block on the returned
//! futures.
//!
//! Pushes are idempotent by construction: commits already present on the
//! remote are skipped and counted in [`PushOutcome::skipped`], so
//! re-pushing a previously derived range is a detectable no-op.

use std::collections::HashMap;
use std::collections::HashSet;
use std::collections::VecDeque;
use std::fs;
use std::future::Future;
use std::io::Write as _;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;
use tracing::debug;

use crate::store::topo_sort;
use crate::store::Commit;
use crate::store::CommitId;

/// Errors from remote operations.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The remote could not be reached or an I/O operation failed.
    /// Transient: the whole pass is safe to retry.
    #[error("Network failure talking to '{repository}': {message}")]
    Network {
        /// The repository URL or path that failed.
        repository: String,
        /// Description of the failure.
        message: String,
    },

    /// Some but not all commits reached the remote. The sync pair must
    /// not be advanced; a retry re-derives and re-pushes the full range.
    #[error("Partial push to '{repository}': {pushed} of {total} commit(s) transferred")]
    PartialPush {
        /// The repository URL or path.
        repository: String,
        /// Commits that reached the remote.
        pushed: usize,
        /// Commits in the attempted range.
        total: usize,
    },

    /// The requested ref or bookmark does not exist on the remote.
    #[error("Remote ref not found on '{repository}': {ref_name}")]
    RefNotFound {
        /// The repository URL or path.
        repository: String,
        /// The missing ref.
        ref_name: String,
    },

    /// A fetched object is malformed or fails id verification.
    #[error("Corrupt object from '{repository}': {message}")]
    Corrupt {
        /// The repository URL or path.
        repository: String,
        /// Description of the corruption.
        message: String,
    },
}

/// Result type for remote operations.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Boxed future type for async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Outcome of a push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushOutcome {
    /// Commits transferred by this push.
    pub pushed: usize,
    /// Commits that were already present and skipped.
    pub skipped: usize,
    /// The remote head after the push.
    pub head: CommitId,
}

/// An external repository holding one subtree's standalone history.
pub trait SubtreeRemote: Send + Sync {
    /// The repository URL or path, for reporting.
    fn url(&self) -> &str;

    /// The remote's current head, if the repository is non-empty.
    fn head<'a>(&'a self) -> BoxFuture<'a, RemoteResult<Option<CommitId>>>;

    /// Commits newer than `since` (exclusive), oldest-first, verified
    /// against their content-addressed ids. `since = None` fetches the
    /// full history.
    fn fetch_new<'a>(
        &'a self,
        since: Option<&'a CommitId>,
    ) -> BoxFuture<'a, RemoteResult<Vec<Commit>>>;

    /// Pushes `commits` (oldest-first) and advances the remote head to
    /// `head`. Already-present commits are skipped.
    fn push<'a>(
        &'a self,
        commits: &'a [Arc<Commit>],
        head: &'a CommitId,
    ) -> BoxFuture<'a, RemoteResult<PushOutcome>>;
}

/// Walks a remote commit set backward from `head`, returning commits newer
/// than `since`, oldest-first.
fn new_commits_since(
    repository: &str,
    commits: &HashMap<CommitId, Commit>,
    head: Option<&CommitId>,
    since: Option<&CommitId>,
) -> RemoteResult<Vec<Commit>> {
    let Some(head) = head else {
        return Ok(Vec::new());
    };
    let mut new = Vec::new();
    let mut seen = HashSet::new();
    let mut queue = VecDeque::from([head.clone()]);
    while let Some(id) = queue.pop_front() {
        if Some(&id) == since || !seen.insert(id.clone()) {
            continue;
        }
        let Some(commit) = commits.get(&id) else {
            // A parent beyond the local bookmark that the remote no
            // longer has is a broken remote.
            return Err(RemoteError::Corrupt {
                repository: repository.to_string(),
                message: format!("missing commit object {id}"),
            });
        };
        for parent in &commit.parents {
            queue.push_back(parent.clone());
        }
        new.push(Arc::new(commit.clone()));
    }
    Ok(topo_sort(new)
        .into_iter()
        .map(|commit| (*commit).clone())
        .collect())
}

#[derive(Default)]
struct MemoryRemoteState {
    commits: HashMap<CommitId, Commit>,
    head: Option<CommitId>,
}

/// An in-process remote, used in tests and for same-process wiring.
pub struct MemoryRemote {
    url: String,
    state: RwLock<MemoryRemoteState>,
}

impl MemoryRemote {
    /// Creates an empty in-process remote.
    pub fn new(url: impl Into<String>) -> Arc<MemoryRemote> {
        Arc::new(MemoryRemote {
            url: url.into(),
            state: RwLock::new(MemoryRemoteState::default()),
        })
    }

    /// Number of commits the remote holds.
    pub fn commit_count(&self) -> usize {
        self.state.read().commits.len()
    }

    /// The current head, synchronously (test convenience).
    pub fn current_head(&self) -> Option<CommitId> {
        self.state.read().head.clone()
    }

    /// Appends a commit directly, as if committed against the standalone
    /// repository (test convenience).
    pub fn commit_directly(&self, commit: Commit) {
        let mut state = self.state.write();
        state.head = Some(commit.id.clone());
        state.commits.insert(commit.id.clone(), commit);
    }
}

impl SubtreeRemote for MemoryRemote {
    fn url(&self) -> &str {
        &self.url
    }

    fn head<'a>(&'a self) -> BoxFuture<'a, RemoteResult<Option<CommitId>>> {
        Box::pin(async move { Ok(self.state.read().head.clone()) })
    }

    fn fetch_new<'a>(
        &'a self,
        since: Option<&'a CommitId>,
    ) -> BoxFuture<'a, RemoteResult<Vec<Commit>>> {
        Box::pin(async move {
            let state = self.state.read();
            new_commits_since(&self.url, &state.commits, state.head.as_ref(), since)
        })
    }

    fn push<'a>(
        &'a self,
        commits: &'a [Arc<Commit>],
        head: &'a CommitId,
    ) -> BoxFuture<'a, RemoteResult<PushOutcome>> {
        Box::pin(async move {
            let mut state = self.state.write();
            let mut pushed = 0;
            let mut skipped = 0;
            for commit in commits {
                if state.commits.contains_key(&commit.id) {
                    skipped += 1;
                } else {
                    state.commits.insert(commit.id.clone(), (**commit).clone());
                    pushed += 1;
                }
            }
            state.head = Some(head.clone());
            Ok(PushOutcome {
                pushed,
                skipped,
                head: head.clone(),
            })
        })
    }
}

/// A standalone repository stored as an object directory on disk:
/// `commits/<id>.json` plus a `HEAD` ref.
///
/// This is the same object format the monorepo store uses, so a subtree
/// repository published this way can itself be opened as a store. I/O
/// failures surface as transient [`RemoteError::Network`] errors; a
/// failure partway through transferring a range surfaces as
/// [`RemoteError::PartialPush`].
pub struct FileRemote {
    url: String,
    dir: PathBuf,
}

impl FileRemote {
    /// Opens (creating if needed) an on-disk remote.
    pub fn open(dir: impl Into<PathBuf>) -> RemoteResult<Arc<FileRemote>> {
        let dir = dir.into();
        let url = dir.display().to_string();
        fs::create_dir_all(dir.join("commits")).map_err(|err| RemoteError::Network {
            repository: url.clone(),
            message: err.to_string(),
        })?;
        Ok(Arc::new(FileRemote { url, dir }))
    }

    fn network_err(&self, err: impl ToString) -> RemoteError {
        RemoteError::Network {
            repository: self.url.clone(),
            message: err.to_string(),
        }
    }

    fn read_head_ref(&self) -> RemoteResult<Option<CommitId>> {
        let path = self.dir.join("HEAD");
        match fs::read_to_string(&path) {
            Ok(text) => {
                let hex = text.trim();
                CommitId::try_from_hex(hex)
                    .map(Some)
                    .ok_or_else(|| RemoteError::Corrupt {
                        repository: self.url.clone(),
                        message: format!("invalid HEAD ref: {hex:?}"),
                    })
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(self.network_err(err)),
        }
    }

    fn load_commits(&self) -> RemoteResult<HashMap<CommitId, Commit>> {
        let commits_dir = self.dir.join("commits");
        let mut commits = HashMap::new();
        let read_dir = fs::read_dir(&commits_dir).map_err(|err| self.network_err(err))?;
        for dir_entry in read_dir {
            let dir_entry = dir_entry.map_err(|err| self.network_err(err))?;
            let path = dir_entry.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            let text = fs::read_to_string(&path).map_err(|err| self.network_err(err))?;
            let commit: Commit =
                serde_json::from_str(&text).map_err(|err| RemoteError::Corrupt {
                    repository: self.url.clone(),
                    message: format!("{}: {err}", path.display()),
                })?;
            if commit.computed_id() != commit.id {
                return Err(RemoteError::Corrupt {
                    repository: self.url.clone(),
                    message: format!("commit id {} does not match content", commit.id),
                });
            }
            commits.insert(commit.id.clone(), commit);
        }
        Ok(commits)
    }

    fn write_commit(&self, commit: &Commit) -> RemoteResult<bool> {
        let path = self.dir.join("commits").join(format!("{}.json", commit.id.hex()));
        if path.exists() {
            return Ok(false);
        }
        let json = serde_json::to_string_pretty(commit).map_err(|err| self.network_err(err))?;
        let mut temp = tempfile::NamedTempFile::new_in(self.dir.join("commits"))
            .map_err(|err| self.network_err(err))?;
        temp.write_all(json.as_bytes())
            .map_err(|err| self.network_err(err))?;
        temp.persist(&path)
            .map_err(|err| self.network_err(err.error))?;
        Ok(true)
    }

    fn write_head_ref(&self, head: &CommitId) -> RemoteResult<()> {
        let path = self.dir.join("HEAD");
        let mut temp =
            tempfile::NamedTempFile::new_in(&self.dir).map_err(|err| self.network_err(err))?;
        temp.write_all(format!("{}\n", head.hex()).as_bytes())
            .map_err(|err| self.network_err(err))?;
        temp.persist(&path)
            .map_err(|err| self.network_err(err.error))?;
        Ok(())
    }

    fn push_impl(&self, commits: &[Arc<Commit>], head: &CommitId) -> RemoteResult<PushOutcome> {
        let mut pushed = 0;
        let mut skipped = 0;
        for commit in commits {
            match self.write_commit(commit) {
                Ok(true) => pushed += 1,
                Ok(false) => skipped += 1,
                Err(RemoteError::Network { repository, message }) if pushed > 0 => {
                    debug!(repository, message, "push interrupted mid-transfer");
                    return Err(RemoteError::PartialPush {
                        repository,
                        pushed,
                        total: commits.len(),
                    });
                }
                Err(err) => return Err(err),
            }
        }
        self.write_head_ref(head)?;
        Ok(PushOutcome {
            pushed,
            skipped,
            head: head.clone(),
        })
    }
}

impl SubtreeRemote for FileRemote {
    fn url(&self) -> &str {
        &self.url
    }

    fn head<'a>(&'a self) -> BoxFuture<'a, RemoteResult<Option<CommitId>>> {
        Box::pin(async move { self.read_head_ref() })
    }

    fn fetch_new<'a>(
        &'a self,
        since: Option<&'a CommitId>,
    ) -> BoxFuture<'a, RemoteResult<Vec<Commit>>> {
        Box::pin(async move {
            let head = self.read_head_ref()?;
            let commits = self.load_commits()?;
            new_commits_since(&self.url, &commits, head.as_ref(), since)
        })
    }

    fn push<'a>(
        &'a self,
        commits: &'a [Arc<Commit>],
        head: &'a CommitId,
    ) -> BoxFuture<'a, RemoteResult<PushOutcome>> {
        Box::pin(async move { self.push_impl(commits, head) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pollster::FutureExt as _;

    use crate::repo_path::RepoPath;
    use crate::store::Signature;
    use crate::store::Timestamp;
    use crate::tree::Tree;

    fn path(value: &str) -> &RepoPath {
        RepoPath::from_internal_string(value).unwrap()
    }

    fn make_commit(parents: Vec<CommitId>, seconds: i64, message: &str) -> Commit {
        let commit = Commit {
            id: CommitId::try_from_hex(&"00".repeat(32)).unwrap(),
            parents,
            author: Signature {
                name: "Test Author".to_string(),
                email: "test@example.com".to_string(),
                timestamp: Timestamp {
                    millis_since_epoch: seconds * 1000,
                    tz_offset: 0,
                },
            },
            message: message.to_string(),
            tree: Tree::from_entries([(path("x.txt"), message)]),
        };
        Commit {
            id: commit.computed_id(),
            ..commit
        }
    }

    #[test]
    fn test_memory_remote_push_is_idempotent() {
        let remote = MemoryRemote::new("remotes/alpha");
        let a = Arc::new(make_commit(vec![], 1, "a"));
        let b = Arc::new(make_commit(vec![a.id.clone()], 2, "b"));
        let commits = vec![a, b.clone()];

        let first = remote.push(&commits, &b.id).block_on().unwrap();
        assert_eq!(first.pushed, 2);
        assert_eq!(first.skipped, 0);

        let second = remote.push(&commits, &b.id).block_on().unwrap();
        assert_eq!(second.pushed, 0);
        assert_eq!(second.skipped, 2);
        assert_eq!(remote.current_head(), Some(b.id.clone()));
        assert_eq!(remote.commit_count(), 2);
    }

    #[test]
    fn test_memory_remote_fetch_since() {
        let remote = MemoryRemote::new("remotes/alpha");
        let a = make_commit(vec![], 1, "a");
        let b = make_commit(vec![a.id.clone()], 2, "b");
        remote.commit_directly(a.clone());
        remote.commit_directly(b.clone());

        let all = remote.fetch_new(None).block_on().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, a.id);
        assert_eq!(all[1].id, b.id);

        let new = remote.fetch_new(Some(&a.id)).block_on().unwrap();
        assert_eq!(new.len(), 1);
        assert_eq!(new[0].id, b.id);
    }

    #[test]
    fn test_file_remote_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let a = Arc::new(make_commit(vec![], 1, "a"));
        let b = Arc::new(make_commit(vec![a.id.clone()], 2, "b"));
        {
            let remote = FileRemote::open(dir.path()).unwrap();
            let outcome = remote.push(&[a.clone(), b.clone()], &b.id).block_on().unwrap();
            assert_eq!(outcome.pushed, 2);
        }
        let remote = FileRemote::open(dir.path()).unwrap();
        assert_eq!(remote.head().block_on().unwrap(), Some(b.id.clone()));
        let fetched = remote.fetch_new(Some(&a.id)).block_on().unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].message, "b");
    }

    #[test]
    fn test_file_remote_rejects_tampered_commit() {
        let dir = tempfile::tempdir().unwrap();
        let a = Arc::new(make_commit(vec![], 1, "a"));
        let remote = FileRemote::open(dir.path()).unwrap();
        remote.push(&[a.clone()], &a.id).block_on().unwrap();

        // Tamper with the stored object.
        let object = dir
            .path()
            .join("commits")
            .join(format!("{}.json", a.id.hex()));
        let text = std::fs::read_to_string(&object).unwrap();
        std::fs::write(&object, text.replace("\"a\"", "\"tampered\"")).unwrap();

        let result = remote.fetch_new(None).block_on();
        assert!(matches!(result, Err(RemoteError::Corrupt { .. })));
    }
}
