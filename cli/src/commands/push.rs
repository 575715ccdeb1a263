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

use crate::cli_util::CommandError;
use crate::cli_util::CommandHelper;
use crate::cli_util::GlobalArgs;

/// Split new subtree history and push it to the remotes
///
/// For every registered mapping (or just the named one), derives the
/// standalone history of monorepo commits since the last sync and pushes
/// it to the mapping's remote. Mappings with no new subtree changes are
/// reported as up to date.
#[derive(Args, Clone, Debug)]
pub struct PushArgs {
    /// Sync only the named mapping
    #[arg(long, value_name = "NAME")]
    mapping: Option<String>,
}

pub fn cmd_push(globals: &GlobalArgs, args: &PushArgs) -> Result<(), CommandError> {
    let helper = CommandHelper::load(globals)?;
    let head = helper.head()?;
    let report = match &args.mapping {
        Some(name) => {
            let state = helper.orchestrator().push_one(name, &head)?;
            SyncReport {
                mappings: vec![MappingReport {
                    mapping: name.clone(),
                    state,
                }],
            }
        }
        None => helper.orchestrator().push_all(&head),
    };
    print_report(&report);
    if report.all_ok() {
        Ok(())
    } else {
        Err(CommandError::failed("some mappings failed to push"))
    }
}

pub(super) fn print_report(report: &SyncReport) {
    for entry in &report.mappings {
        match &entry.state {
            PassState::Synced => println!("{}: up to date", entry.mapping),
            PassState::Pushed { pushed, skipped } => {
                println!(
                    "{}: pushed {} commit(s), {} already present",
                    entry.mapping, pushed, skipped
                );
            }
            PassState::Staged { commits } => {
                println!("{}: staged {} commit(s)", entry.mapping, commits);
            }
            PassState::Failed(message) => println!("{}: failed: {}", entry.mapping, message),
        }
    }
}
