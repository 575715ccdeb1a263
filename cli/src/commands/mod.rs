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

mod list;
mod pull;
mod push;

use clap::Subcommand;

use self::list::ListSubtreesArgs;
use self::list::cmd_list_subtrees;
use self::pull::PullArgs;
use self::pull::cmd_pull;
use self::push::PushArgs;
use self::push::cmd_push;
use crate::cli_util::CommandError;
use crate::cli_util::GlobalArgs;

/// Subtree synchronization commands
#[derive(Subcommand, Clone, Debug)]
pub enum Command {
    /// List registered subtree mappings
    ListSubtrees(ListSubtreesArgs),
    /// Split new subtree history and push it to the remotes
    Push(PushArgs),
    /// Fetch remote history and stage it under the subtree paths
    Pull(PullArgs),
}

pub fn dispatch(globals: &GlobalArgs, command: &Command) -> Result<(), CommandError> {
    match command {
        Command::ListSubtrees(args) => cmd_list_subtrees(globals, args),
        Command::Push(args) => cmd_push(globals, args),
        Command::Pull(args) => cmd_pull(globals, args),
    }
}
