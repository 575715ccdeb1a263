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

//! The sync orchestrator.
//!
//! Drives the split/push (outbound) and fetch/merge (inbound) passes for
//! every registered mapping, and owns the durable per-mapping sync pairs.
//! A sync pair `(local, remote)` records the last monorepo commit and
//! remote commit known to hold the same subtree content; every pass
//! derives its range from the pair and advances it only after the pass
//! has fully succeeded, so an interrupted pass leaves a retryable state
//! rather than a half-recorded one.
//!
//! Inbound changes are staged rather than applied: `pull_one` creates
//! grafted commits in the store and returns a [`StagedMerge`], but the
//! monorepo head and the sync pair only move when the staged merge is
//! explicitly accepted.

use std::collections::HashMap;
use std::fs;
use std::io::Write as _;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use pollster::FutureExt as _;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use tracing::info;
use tracing::instrument;
use tracing::warn;

use crate::merge;
use crate::merge::MergeError;
use crate::registry::SubtreeMapping;
use crate::registry::SubtreeRegistry;
use crate::remote::RemoteError;
use crate::remote::SubtreeRemote;
use crate::split;
use crate::split::SplitError;
use crate::store::Commit;
use crate::store::CommitId;
use crate::store::Store;
use crate::store::StoreError;

/// The last-synced commit pair for one mapping: the monorepo commit and
/// the remote commit whose subtree content matched after the last
/// successful sync.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPair {
    /// The monorepo side.
    pub local: CommitId,
    /// The remote side.
    pub remote: CommitId,
}

/// Errors from sync passes.
#[derive(Debug, Error)]
pub enum SyncError {
    /// No remote is wired up for the mapping's remote URL.
    #[error("No remote configured for '{remote}' (mapping '{mapping}')")]
    UnknownRemote {
        /// The mapping name.
        mapping: String,
        /// The unmatched remote URL.
        remote: String,
    },

    /// The mapping name is not in the registry.
    #[error("No subtree mapping named '{0}'")]
    UnknownMapping(String),

    /// The monorepo has no head commit yet.
    #[error("The monorepo has no commits")]
    EmptyRepo,

    /// No staged merge exists to accept.
    #[error("Nothing staged for mapping '{0}'")]
    NothingStaged(String),

    #[error(transparent)]
    Split(#[from] SplitError),

    #[error(transparent)]
    Merge(#[from] MergeError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// Reading or writing the sync state file failed.
    #[error("Failed to access sync state file {path}")]
    StateIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The sync state file is not valid TOML.
    #[error("Invalid sync state file {path}")]
    StateParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// The in-memory sync state could not be encoded as TOML.
    #[error("Failed to encode sync state file {path}")]
    StateSerialize {
        path: PathBuf,
        #[source]
        source: toml::ser::Error,
    },
}

pub type SyncResult<T> = Result<T, SyncError>;

#[derive(Default, Serialize, Deserialize)]
struct SyncStateDoc {
    #[serde(default)]
    pair: HashMap<String, SyncPair>,
}

/// Durable sync pairs, one per mapping name, stored as a TOML sidecar
/// next to the repository.
pub struct SyncStateFile {
    path: PathBuf,
    doc: Mutex<SyncStateDoc>,
}

impl SyncStateFile {
    /// Loads the state file, treating a missing file as empty state.
    pub fn load(path: impl Into<PathBuf>) -> SyncResult<SyncStateFile> {
        let path = path.into();
        let doc = match fs::read_to_string(&path) {
            Ok(text) => toml::from_str(&text).map_err(|err| SyncError::StateParse {
                path: path.clone(),
                source: err,
            })?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => SyncStateDoc::default(),
            Err(err) => {
                return Err(SyncError::StateIo {
                    path,
                    source: err,
                });
            }
        };
        Ok(SyncStateFile {
            path,
            doc: Mutex::new(doc),
        })
    }

    /// The sync pair for `mapping`, if it has ever synced.
    pub fn pair(&self, mapping: &str) -> Option<SyncPair> {
        self.doc.lock().pair.get(mapping).cloned()
    }

    /// Records a new pair for `mapping` and persists the whole file
    /// atomically.
    pub fn advance(&self, mapping: &str, pair: SyncPair) -> SyncResult<()> {
        let mut doc = self.doc.lock();
        doc.pair.insert(mapping.to_string(), pair);
        self.persist(&doc)
    }

    fn persist(&self, doc: &SyncStateDoc) -> SyncResult<()> {
        let text = toml::to_string_pretty(doc).map_err(|err| SyncError::StateSerialize {
            path: self.path.clone(),
            source: err,
        })?;
        let io_err = |source| SyncError::StateIo {
            path: self.path.clone(),
            source,
        };
        let dir = self.path.parent().unwrap_or(Path::new("."));
        let mut temp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
        temp.write_all(text.as_bytes()).map_err(io_err)?;
        temp.persist(&self.path)
            .map_err(|err| io_err(err.error))?;
        Ok(())
    }
}

/// Where a mapping's pass ended up.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PassState {
    /// Nothing to transfer; the pair already covers the head.
    Synced,
    /// Outbound commits were derived and pushed, pair advanced.
    Pushed {
        /// Newly transferred split commits.
        pushed: usize,
        /// Split commits the remote already had.
        skipped: usize,
    },
    /// Inbound commits were grafted and await acceptance.
    Staged {
        /// Grafted commits (plus the synthetic merge, if any).
        commits: usize,
    },
    /// The pass failed; the pair was not advanced.
    Failed(String),
}

/// Per-mapping outcome of a multi-mapping pass.
#[derive(Clone, Debug)]
pub struct MappingReport {
    pub mapping: String,
    pub state: PassState,
}

/// Outcome of a whole outbound or inbound pass.
#[derive(Clone, Debug, Default)]
pub struct SyncReport {
    pub mappings: Vec<MappingReport>,
}

impl SyncReport {
    /// Whether every mapping completed without failure.
    pub fn all_ok(&self) -> bool {
        self.mappings
            .iter()
            .all(|report| !matches!(report.state, PassState::Failed(_)))
    }
}

/// Inbound commits grafted into the store, awaiting acceptance.
///
/// Accepting moves the monorepo head to `head` and advances the sync
/// pair; discarding it simply leaves the grafted commits unreferenced.
#[derive(Clone, Debug)]
pub struct StagedMerge {
    /// The mapping this merge belongs to.
    pub mapping: String,
    /// The head candidate (the synthetic merge or last grafted commit).
    pub head: CommitId,
    /// The remote commit the graft stopped at.
    pub remote_head: CommitId,
    /// The grafted commits, oldest-first.
    pub commits: Vec<Arc<Commit>>,
}

/// Drives sync passes over a store, a registry, and a set of wired-up
/// remotes keyed by their registry URL.
pub struct SyncOrchestrator {
    store: Arc<Store>,
    registry: SubtreeRegistry,
    state: SyncStateFile,
    remotes: HashMap<String, Arc<dyn SubtreeRemote>>,
    staged: Mutex<HashMap<String, StagedMerge>>,
    // One lock per mapping so concurrent passes over different mappings
    // don't serialize, while two passes over the same mapping do.
    locks: HashMap<String, Mutex<()>>,
}

impl SyncOrchestrator {
    pub fn new(
        store: Arc<Store>,
        registry: SubtreeRegistry,
        state: SyncStateFile,
        remotes: HashMap<String, Arc<dyn SubtreeRemote>>,
    ) -> SyncOrchestrator {
        let locks = registry
            .list()
            .iter()
            .map(|mapping| (mapping.name.clone(), Mutex::new(())))
            .collect();
        SyncOrchestrator {
            store,
            registry,
            state,
            remotes,
            staged: Mutex::new(HashMap::new()),
            locks,
        }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn registry(&self) -> &SubtreeRegistry {
        &self.registry
    }

    /// The current sync pair for `mapping`, if any.
    pub fn pair(&self, mapping: &str) -> Option<SyncPair> {
        self.state.pair(mapping)
    }

    fn mapping(&self, name: &str) -> SyncResult<&SubtreeMapping> {
        self.registry
            .lookup_by_name(name)
            .ok_or_else(|| SyncError::UnknownMapping(name.to_string()))
    }

    fn remote_for(&self, mapping: &SubtreeMapping) -> SyncResult<&Arc<dyn SubtreeRemote>> {
        self.remotes
            .get(&mapping.remote)
            .ok_or_else(|| SyncError::UnknownRemote {
                mapping: mapping.name.clone(),
                remote: mapping.remote.clone(),
            })
    }

    fn head(&self, head: &Option<CommitId>) -> SyncResult<CommitId> {
        head.clone().ok_or(SyncError::EmptyRepo)
    }

    /// Runs the outbound pass for one mapping: split new subtree history
    /// out of `head`, push it, and advance the sync pair.
    ///
    /// The pair advances only after the push has fully succeeded. When
    /// the range contains no subtree changes the pair's local side still
    /// advances to `head` so later passes walk shorter ranges. When the
    /// subtree is deleted at `head`, any history derived before the
    /// deletion is still published, with the last derived commit as the
    /// remote head.
    #[instrument(skip_all, fields(mapping = name))]
    pub fn push_one(&self, name: &str, head: &Option<CommitId>) -> SyncResult<PassState> {
        let mapping = self.mapping(name)?;
        let _guard = self.locks[&mapping.name].lock();
        let remote = self.remote_for(mapping)?;
        let head = self.head(head)?;
        let pair = self.state.pair(name);

        if pair.as_ref().is_some_and(|pair| pair.local == head) {
            return Ok(PassState::Synced);
        }

        let result = split::split(&self.store, mapping, &head, pair.as_ref())?;
        let remote_head = if let Some(split_head) = &result.head {
            split_head.clone()
        } else if let Some(last) = result.commits.last() {
            // The subtree is deleted at `head` but earlier commits still
            // derived history. Publish it with the last derived commit as
            // the remote head so it stays reachable; deleting the local
            // directory never rewinds the standalone repository.
            last.id.clone()
        } else if let Some(pair) = &pair {
            // Empty split with a prior sync: the remote side stays put.
            pair.remote.clone()
        } else {
            // Nothing to push and nothing ever synced: the subtree is
            // brand new on the remote side only after it gains content.
            return Ok(PassState::Synced);
        };

        let outcome = if result.is_empty() && pair.is_some() {
            // No new subtree commits; only the pair's local side moves.
            None
        } else {
            Some(remote.push(&result.commits, &remote_head).block_on()?)
        };

        self.state.advance(
            name,
            SyncPair {
                local: head,
                remote: remote_head,
            },
        )?;
        match outcome {
            Some(outcome) => {
                info!(
                    pushed = outcome.pushed,
                    skipped = outcome.skipped,
                    "pushed subtree history"
                );
                Ok(PassState::Pushed {
                    pushed: outcome.pushed,
                    skipped: outcome.skipped,
                })
            }
            None => Ok(PassState::Synced),
        }
    }

    /// Runs the inbound pass for one mapping: fetch remote commits newer
    /// than the pair, graft them under the subtree path, and stage the
    /// result. The sync pair is not advanced until the staged merge is
    /// accepted.
    #[instrument(skip_all, fields(mapping = name))]
    pub fn pull_one(&self, name: &str, head: &Option<CommitId>) -> SyncResult<PassState> {
        let mapping = self.mapping(name)?;
        let _guard = self.locks[&mapping.name].lock();
        let remote = self.remote_for(mapping)?;
        let head = self.head(head)?;
        let pair = self.state.pair(name);

        let incoming = remote
            .fetch_new(pair.as_ref().map(|pair| &pair.remote))
            .block_on()?;
        if incoming.is_empty() {
            return Ok(PassState::Synced);
        }

        // Grafted commits name these as their sources, and later splits
        // resolve those sources through the store.
        for commit in &incoming {
            self.store.import_commit(commit.clone())?;
        }

        let result = merge::merge(&self.store, mapping, &head, pair.as_ref(), &incoming)?;
        if result.is_noop() {
            return Ok(PassState::Synced);
        }
        let remote_head = result
            .remote_head
            .clone()
            .unwrap_or_else(|| incoming.last().unwrap().id.clone());
        let staged = StagedMerge {
            mapping: name.to_string(),
            head: result.head.clone(),
            remote_head,
            commits: result.commits,
        };
        let count = staged.commits.len();
        info!(commits = count, "staged inbound subtree history");
        self.staged.lock().insert(name.to_string(), staged);
        Ok(PassState::Staged { commits: count })
    }

    /// The staged merge for `mapping`, if an inbound pass produced one.
    pub fn staged(&self, mapping: &str) -> Option<StagedMerge> {
        self.staged.lock().get(mapping).cloned()
    }

    /// Accepts the staged merge for `mapping`: advances the sync pair to
    /// the staged heads and returns the merge for the caller to point
    /// the monorepo head at.
    pub fn accept_inbound(&self, mapping: &str) -> SyncResult<StagedMerge> {
        let staged = self
            .staged
            .lock()
            .remove(mapping)
            .ok_or_else(|| SyncError::NothingStaged(mapping.to_string()))?;
        self.state.advance(
            mapping,
            SyncPair {
                local: staged.head.clone(),
                remote: staged.remote_head.clone(),
            },
        )?;
        info!(mapping, head = %staged.head, "accepted inbound merge");
        Ok(staged)
    }

    /// Runs the outbound pass for every registered mapping. A failure in
    /// one mapping is reported and does not stop the others.
    pub fn push_all(&self, head: &Option<CommitId>) -> SyncReport {
        self.run_all(head, |name, head| self.push_one(name, head))
    }

    /// Runs the inbound pass for every registered mapping, staging each
    /// mapping's incoming history. Failures are isolated per mapping.
    pub fn pull_all(&self, head: &Option<CommitId>) -> SyncReport {
        self.run_all(head, |name, head| self.pull_one(name, head))
    }

    fn run_all(
        &self,
        head: &Option<CommitId>,
        pass: impl Fn(&str, &Option<CommitId>) -> SyncResult<PassState>,
    ) -> SyncReport {
        let mut report = SyncReport::default();
        for mapping in self.registry.list() {
            let state = match pass(&mapping.name, head) {
                Ok(state) => state,
                Err(err) => {
                    warn!(mapping = mapping.name, error = %err, "sync pass failed");
                    PassState::Failed(err.to_string())
                }
            };
            report.mappings.push(MappingReport {
                mapping: mapping.name.clone(),
                state,
            });
        }
        report
    }
}
