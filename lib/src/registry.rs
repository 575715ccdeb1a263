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

//! The subtree registry: which monorepo directories map to which external
//! repositories.
//!
//! The registry is loaded once per run from a declarative TOML file and is
//! read-only afterwards. A malformed registry is a fatal configuration
//! error, never retried:
//!
//! ```toml
//! [[subtree]]
//! name = "alpha"
//! path = "cores/alpha"
//! remote = "remotes/alpha"
//! ```

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use thiserror::Error;

use crate::repo_path::InvalidRepoPathError;
use crate::repo_path::RepoPath;
use crate::repo_path::RepoPathBuf;

/// Fatal registry configuration errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The registry file could not be read.
    #[error("Cannot read registry file {path}: {source}")]
    Io {
        /// The registry file path.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The registry file is not valid TOML.
    #[error("Malformed registry: {0}")]
    Parse(#[from] toml::de::Error),

    /// A mapping's local path is invalid.
    #[error(transparent)]
    InvalidPath(#[from] InvalidRepoPathError),

    /// A mapping's local path is the repository root.
    #[error("Mapping {name:?} must name a subdirectory, not the repository root")]
    RootPath {
        /// The offending mapping.
        name: String,
    },

    /// Two mappings share a name.
    #[error("Duplicate mapping name: {0:?}")]
    DuplicateName(String),

    /// Two mappings share a local path.
    #[error("Duplicate local path: {0}")]
    DuplicateLocalPath(RepoPathBuf),

    /// Two mappings share a remote identity.
    #[error("Duplicate remote: {0:?}")]
    DuplicateRemote(String),
}

/// One registered subtree: a monorepo directory and its external
/// repository identity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubtreeMapping {
    /// Short mapping name, used for selection and state bookkeeping.
    pub name: String,
    /// Monorepo directory holding the subtree.
    pub local_path: RepoPathBuf,
    /// URL or path identifying the external repository.
    pub remote: String,
}

#[derive(Deserialize)]
struct RegistryFile {
    #[serde(default, rename = "subtree")]
    subtrees: Vec<MappingRecord>,
}

#[derive(Deserialize)]
struct MappingRecord {
    name: String,
    path: String,
    remote: String,
}

/// The authoritative set of subtree mappings.
#[derive(Debug, Default)]
pub struct SubtreeRegistry {
    mappings: Vec<SubtreeMapping>,
}

impl SubtreeRegistry {
    /// Loads and validates a registry file.
    pub fn load(path: &Path) -> Result<SubtreeRegistry, RegistryError> {
        let text = fs::read_to_string(path).map_err(|source| RegistryError::Io {
            path: path.to_owned(),
            source,
        })?;
        SubtreeRegistry::parse(&text)
    }

    /// Parses and validates registry TOML.
    pub fn parse(text: &str) -> Result<SubtreeRegistry, RegistryError> {
        let file: RegistryFile = toml::from_str(text)?;
        let mut names = HashSet::new();
        let mut paths = HashSet::new();
        let mut remotes = HashSet::new();
        let mut mappings = Vec::with_capacity(file.subtrees.len());
        for record in file.subtrees {
            let local_path = RepoPathBuf::from_internal_string(record.path)?;
            if local_path.is_root() {
                return Err(RegistryError::RootPath { name: record.name });
            }
            if !names.insert(record.name.clone()) {
                return Err(RegistryError::DuplicateName(record.name));
            }
            if !paths.insert(local_path.clone()) {
                return Err(RegistryError::DuplicateLocalPath(local_path));
            }
            if !remotes.insert(record.remote.clone()) {
                return Err(RegistryError::DuplicateRemote(record.remote));
            }
            mappings.push(SubtreeMapping {
                name: record.name,
                local_path,
                remote: record.remote,
            });
        }
        Ok(SubtreeRegistry { mappings })
    }

    /// All mappings, in registry order.
    pub fn list(&self) -> &[SubtreeMapping] {
        &self.mappings
    }

    /// Looks up a mapping by name.
    pub fn lookup_by_name(&self, name: &str) -> Option<&SubtreeMapping> {
        self.mappings.iter().find(|mapping| mapping.name == name)
    }

    /// Looks up a mapping by local path.
    pub fn lookup(&self, local_path: &RepoPath) -> Option<&SubtreeMapping> {
        self.mappings
            .iter()
            .find(|mapping| *mapping.local_path == *local_path)
    }

    /// Looks up a mapping by remote identity.
    pub fn lookup_by_remote(&self, remote: &str) -> Option<&SubtreeMapping> {
        self.mappings.iter().find(|mapping| mapping.remote == remote)
    }
}
