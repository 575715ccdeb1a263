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
use treesync_lib::sync::MappingReport;
use treesync_lib::sync::PassState;
use treesync_lib::sync::SyncReport;

use super::push::print_report;
use crate::cli_util::CommandError;
use crate::cli_util::CommandHelper;
use crate::cli_util::GlobalArgs;

/// Fetch remote history and stage it under the subtree paths
///
/// For every registered mapping (or just the named one), fetches remote
/// commits newer than the last sync and grafts them under the mapping's
/// local path. The grafted history is staged; pass `--accept` to advance
/// the monorepo head and the sync bookkeeping once the result has been
/// validated.
#[derive(Args, Clone, Debug)]
pub struct PullArgs {
    /// Sync only the named mapping
    #[arg(long, value_name = "NAME")]
    mapping: Option<String>,

    /// Accept staged merges: move the monorepo head and record the sync
    #[arg(long)]
    accept: bool,
}

pub fn cmd_pull(globals: &GlobalArgs, args: &PullArgs) -> Result<(), CommandError> {
    let helper = CommandHelper::load(globals)?;
    let head = helper.head()?;
    let report = match &args.mapping {
        Some(name) => {
            let state = helper.orchestrator().pull_one(name, &head)?;
            SyncReport {
                mappings: vec![MappingReport {
                    mapping: name.clone(),
                    state,
                }],
            }
        }
        None => helper.orchestrator().pull_all(&head),
    };
    print_report(&report);

    if args.accept {
        for entry in &report.mappings {
            if matches!(entry.state, PassState::Staged { .. }) {
                let staged = helper.orchestrator().accept_inbound(&entry.mapping)?;
                helper.set_head(&staged.head)?;
                println!("{}: accepted, head is now {}", entry.mapping, staged.head);
            }
        }
    }

    if report.all_ok() {
        Ok(())
    } else {
        Err(CommandError::failed("some mappings failed to pull"))
    }
}
