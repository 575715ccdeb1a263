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

//! Subtree synchronization between a monorepo and standalone per-project
//! repositories.
//!
//! A monorepo directory (a "subtree") can be mapped to an external
//! repository. The [`split`] module derives the subtree's standalone
//! history from monorepo commits; the [`merge`] module grafts external
//! commits back in under the subtree path; the [`sync`] module drives
//! both directions per registered mapping and keeps the durable
//! last-synced bookkeeping.

pub mod merge;
pub mod metadata;
pub mod registry;
pub mod remote;
pub mod repo_path;
pub mod split;
pub mod store;
pub mod sync;
pub mod tree;
