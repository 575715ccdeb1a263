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

use clap::Args;
use treesync_lib::registry::SubtreeRegistry;

use crate::cli_util::CommandError;
use crate::cli_util::GlobalArgs;

/// List registered subtree mappings
///
/// Prints each mapping's name, local path, and remote, one per line.
#[derive(Args, Clone, Debug)]
pub struct ListSubtreesArgs {}

pub fn cmd_list_subtrees(
    globals: &GlobalArgs,
    _args: &ListSubtreesArgs,
) -> Result<(), CommandError> {
    let registry = SubtreeRegistry::load(&globals.registry)?;
    for mapping in registry.list() {
        println!("{}\t{}\t{}", mapping.name, mapping.local_path, mapping.remote);
    }
    Ok(())
}
