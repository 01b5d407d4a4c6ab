// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Git integration.
//!
//! Observations remember the commit they were recorded at. When context is
//! built on a branch, only observations whose commit is an ancestor of the
//! current HEAD are shown, so work from an unmerged sibling branch never
//! leaks into the prompt.
//!
//! All git access goes through [`GitRunner`]; [`CommandGitRunner`] shells out
//! to the `git` binary.

mod ancestry;
mod runner;

pub use ancestry::{AncestryConfig, AncestryResolver};
pub use runner::{CommandGitRunner, GitError, GitOutput, GitRunner};
