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

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use tracing::debug;
use treesync_lib::registry::RegistryError;
use treesync_lib::registry::SubtreeRegistry;
use treesync_lib::remote::FileRemote;
use treesync_lib::remote::SubtreeRemote;
use treesync_lib::store;
use treesync_lib::store::CommitId;
use treesync_lib::store::Store;
use treesync_lib::store::StoreError;
use treesync_lib::sync::SyncError;
use treesync_lib::sync::SyncOrchestrator;
use treesync_lib::sync::SyncStateFile;

/// An error from running a command, carrying the process exit code.
#[derive(Debug)]
pub struct CommandError {
    pub message: String,
    pub exit_code: ExitCode,
}

impl CommandError {
    pub fn failed(message: impl Into<String>) -> CommandError {
        CommandError {
            message: message.into(),
            exit_code: ExitCode::FAILURE,
        }
    }
}

fn chain_message(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(err) = source {
        message.push_str(&format!(": {err}"));
        source = err.source();
    }
    message
}

impl From<RegistryError> for CommandError {
    fn from(err: RegistryError) -> CommandError {
        CommandError::failed(chain_message(&err))
    }
}

impl From<StoreError> for CommandError {
    fn from(err: StoreError) -> CommandError {
        CommandError::failed(chain_message(&err))
    }
}

impl From<SyncError> for CommandError {
    fn from(err: SyncError) -> CommandError {
        CommandError::failed(chain_message(&err))
    }
}

/// Global options shared by every command.
#[derive(clap::Args, Clone, Debug)]
pub struct GlobalArgs {
    /// Path to the subtree registry file
    #[arg(long, global = true, value_name = "FILE", default_value = "subtrees.toml")]
    pub registry: PathBuf,

    /// Path to the monorepo commit store
    #[arg(long, global = true, value_name = "DIR", default_value = ".")]
    pub repo: PathBuf,

    /// Path to the sync state file
    #[arg(long, global = true, value_name = "FILE", default_value = "sync-state.toml")]
    pub state: PathBuf,

    /// Enable verbose logging
    #[arg(long, short = 'v', global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Loaded store, registry, state, and wired-up remotes for one command
/// invocation.
pub struct CommandHelper {
    repo_dir: PathBuf,
    orchestrator: SyncOrchestrator,
}

impl CommandHelper {
    /// Loads everything the sync commands need. Remote URLs in the
    /// registry are interpreted as on-disk repository paths.
    pub fn load(args: &GlobalArgs) -> Result<CommandHelper, CommandError> {
        let registry = SubtreeRegistry::load(&args.registry)?;
        let store = Store::open(&args.repo)?;
        let state = SyncStateFile::load(&args.state)?;
        let mut remotes: HashMap<String, Arc<dyn SubtreeRemote>> = HashMap::new();
        for mapping in registry.list() {
            let remote = FileRemote::open(&mapping.remote)
                .map_err(|err| CommandError::failed(chain_message(&err)))?;
            remotes.insert(mapping.remote.clone(), remote);
        }
        let orchestrator = SyncOrchestrator::new(store, registry, state, remotes);
        debug!(
            registry = %args.registry.display(),
            repo = %args.repo.display(),
            "loaded workspace"
        );
        Ok(CommandHelper {
            repo_dir: args.repo.clone(),
            orchestrator,
        })
    }

    pub fn orchestrator(&self) -> &SyncOrchestrator {
        &self.orchestrator
    }

    /// The monorepo head, if any commit exists.
    pub fn head(&self) -> Result<Option<CommitId>, CommandError> {
        Ok(store::read_head(&self.repo_dir)?)
    }

    /// Points the monorepo head at `id`.
    pub fn set_head(&self, id: &CommitId) -> Result<(), CommandError> {
        Ok(store::write_head(&self.repo_dir, id)?)
    }
}
