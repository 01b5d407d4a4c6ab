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

//! Commit ancestry resolution.
//!
//! Given the commits that observations were recorded at, decide which of
//! them are reachable from the working tree's HEAD. The cost of the check
//! scales with the number of candidates:
//!
//! | candidates        | strategy                                          |
//! |-------------------|---------------------------------------------------|
//! | up to `batch_size`| one concurrent `merge-base --is-ancestor` each    |
//! | up to `bulk_threshold` | the same, in sequential batches              |
//! | more              | one `git log` walk, intersected in memory        |

use super::runner::{CommandGitRunner, GitError, GitRunner, DEFAULT_MAX_OUTPUT_BYTES};
use crate::error::Degradation;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Tuning for [`AncestryResolver`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AncestryConfig {
    /// Timeout for one `rev-parse` or `merge-base` call.
    #[serde(with = "millis", default = "default_single_timeout")]
    pub single_timeout: Duration,
    /// Timeout for the bulk `git log` walk.
    #[serde(with = "millis", default = "default_log_timeout")]
    pub log_timeout: Duration,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Above this many candidates the bulk walk is used.
    #[serde(default = "default_bulk_threshold")]
    pub bulk_threshold: usize,
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
}

fn default_single_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_log_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_batch_size() -> usize {
    100
}

fn default_bulk_threshold() -> usize {
    500
}

fn default_max_output_bytes() -> usize {
    DEFAULT_MAX_OUTPUT_BYTES
}

impl Default for AncestryConfig {
    fn default() -> Self {
        Self {
            single_timeout: default_single_timeout(),
            log_timeout: default_log_timeout(),
            batch_size: default_batch_size(),
            bulk_threshold: default_bulk_threshold(),
            max_output_bytes: default_max_output_bytes(),
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Decides which recorded commits are visible from the current HEAD.
#[derive(Clone)]
pub struct AncestryResolver {
    runner: Arc<dyn GitRunner>,
    config: AncestryConfig,
}

impl std::fmt::Debug for AncestryResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AncestryResolver")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl AncestryResolver {
    pub fn new(runner: Arc<dyn GitRunner>, config: AncestryConfig) -> Self {
        Self { runner, config }
    }

    /// Resolver that shells out to the `git` binary.
    pub fn with_git_binary(config: AncestryConfig) -> Self {
        let runner = CommandGitRunner::new().with_max_output_bytes(config.max_output_bytes);
        Self::new(Arc::new(runner), config)
    }

    pub fn config(&self) -> &AncestryConfig {
        &self.config
    }

    /// Filter `candidates` down to the commits reachable from HEAD.
    ///
    /// Returns `None` when `working_dir` is not inside a git work tree, and
    /// `Some(vec![])` inside a repository where nothing is reachable,
    /// including a repository without any commit yet.
    pub async fn resolve_visible_commit_shas(
        &self,
        candidates: &[String],
        working_dir: &Path,
    ) -> Option<Vec<String>> {
        if !self.is_inside_work_tree(working_dir).await {
            return None;
        }

        let head = match self.get_current_head(working_dir).await {
            Some(head) => head,
            None => return Some(Vec::new()),
        };

        Some(
            self.resolve_ancestor_commits(&head, candidates, working_dir)
                .await,
        )
    }

    pub async fn is_inside_work_tree(&self, dir: &Path) -> bool {
        match self
            .runner
            .run(
                &["rev-parse", "--is-inside-work-tree"],
                dir,
                self.config.single_timeout,
            )
            .await
        {
            Ok(output) => output.success() && output.stdout.trim() == "true",
            Err(e) => {
                debug!(dir = %dir.display(), error = %e, "git work tree check failed");
                false
            }
        }
    }

    /// The full object name of HEAD, or `None` outside a repository or
    /// before the first commit.
    pub async fn get_current_head(&self, dir: &Path) -> Option<String> {
        let output = self
            .runner
            .run(&["rev-parse", "HEAD"], dir, self.config.single_timeout)
            .await
            .ok()?;
        if !output.success() {
            return None;
        }
        let head = output.stdout.trim();
        is_object_name(head).then(|| head.to_string())
    }

    /// Short name of the checked-out branch. `None` on a detached HEAD or
    /// outside a repository.
    pub async fn get_current_branch(&self, dir: &Path) -> Option<String> {
        let output = self
            .runner
            .run(
                &["rev-parse", "--abbrev-ref", "HEAD"],
                dir,
                self.config.single_timeout,
            )
            .await
            .ok()?;
        if !output.success() {
            return None;
        }
        match output.stdout.trim() {
            "" | "HEAD" => None,
            branch => Some(branch.to_string()),
        }
    }

    /// The subset of `candidates` that are ancestors of `head`.
    ///
    /// Duplicates are collapsed and input order is preserved. A candidate
    /// that cannot be checked is treated as unreachable.
    pub async fn resolve_ancestor_commits(
        &self,
        head: &str,
        candidates: &[String],
        dir: &Path,
    ) -> Vec<String> {
        let mut seen = HashSet::with_capacity(candidates.len());
        let unique: Vec<&str> = candidates
            .iter()
            .map(String::as_str)
            .filter(|sha| seen.insert(*sha))
            .filter(|sha| {
                let valid = is_object_name(sha);
                if !valid {
                    debug!(
                        candidate = %sha,
                        degradation = %Degradation::AncestryUnresolvable,
                        "Skipping malformed commit name"
                    );
                }
                valid
            })
            .collect();

        if unique.is_empty() {
            return Vec::new();
        }

        if unique.len() <= self.config.batch_size {
            return self.check_concurrently(head, &unique, dir).await;
        }

        if unique.len() <= self.config.bulk_threshold {
            return self.check_in_batches(head, &unique, dir).await;
        }

        match self.reachable_from(head, dir).await {
            Ok(reachable) => unique
                .into_iter()
                .filter(|sha| reachable.contains(*sha))
                .map(str::to_string)
                .collect(),
            Err(e) => {
                warn!(
                    head = %head,
                    candidates = unique.len(),
                    error = %e,
                    "git log walk failed, falling back to per-commit checks"
                );
                self.check_in_batches(head, &unique, dir).await
            }
        }
    }

    async fn check_in_batches(&self, head: &str, candidates: &[&str], dir: &Path) -> Vec<String> {
        let mut ancestors = Vec::new();
        for batch in candidates.chunks(self.config.batch_size.max(1)) {
            ancestors.extend(self.check_concurrently(head, batch, dir).await);
        }
        ancestors
    }

    async fn check_concurrently(&self, head: &str, candidates: &[&str], dir: &Path) -> Vec<String> {
        let checks = candidates
            .iter()
            .map(|candidate| self.is_ancestor(candidate, head, dir));
        let verdicts = join_all(checks).await;

        candidates
            .iter()
            .zip(verdicts)
            .filter(|(_, is_ancestor)| *is_ancestor)
            .map(|(sha, _)| sha.to_string())
            .collect()
    }

    async fn is_ancestor(&self, candidate: &str, head: &str, dir: &Path) -> bool {
        let result = self
            .runner
            .run(
                &["merge-base", "--is-ancestor", candidate, head],
                dir,
                self.config.single_timeout,
            )
            .await;

        match result {
            Ok(output) if output.success() => true,
            // Exit 1 is git's "not an ancestor" answer.
            Ok(output) if output.code == Some(1) => false,
            Ok(output) => {
                debug!(
                    candidate = %candidate,
                    code = ?output.code,
                    stderr = %output.stderr.trim(),
                    degradation = %Degradation::AncestryUnresolvable,
                    "Ancestry check failed"
                );
                false
            }
            // Spawn failures and timeouts count as unreachable.
            Err(e) => {
                debug!(
                    candidate = %candidate,
                    error = %e,
                    degradation = %Degradation::AncestryUnresolvable,
                    "Ancestry check failed"
                );
                false
            }
        }
    }

    async fn reachable_from(&self, head: &str, dir: &Path) -> Result<HashSet<String>, GitError> {
        let args = ["log", "--format=%H", head];
        let output = self
            .runner
            .run(&args, dir, self.config.log_timeout)
            .await?
            .into_checked(&args)?;

        Ok(output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }
}

/// Full hex object name, SHA-1 or SHA-256. Abbreviated names never match.
fn is_object_name(sha: &str) -> bool {
    matches!(sha.len(), 40 | 64) && sha.bytes().all(|b| b.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::GitOutput;
    use async_trait::async_trait;
    use proptest::prelude::*;
    use std::sync::Mutex;

    const HEAD: &str = "ffff000000000000000000000000000000000000";
    const ABC: &str = "abc1230000000000000000000000000000000000";
    const DEF: &str = "def4560000000000000000000000000000000000";

    /// Scripted repository: a fixed HEAD and a fixed ancestor set.
    struct FakeGitRunner {
        inside_repo: bool,
        head: Option<String>,
        ancestors: HashSet<String>,
        log_fails: bool,
        calls: Mutex<Vec<String>>,
    }

    impl FakeGitRunner {
        fn repo(ancestors: &[&str]) -> Self {
            Self {
                inside_repo: true,
                head: Some(HEAD.to_string()),
                ancestors: ancestors.iter().map(|s| s.to_string()).collect(),
                log_fails: false,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls_to(&self, subcommand: &str) -> usize {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|c| c.as_str() == subcommand)
                .count()
        }
    }

    fn exit(code: i32, stdout: &str) -> GitOutput {
        GitOutput {
            code: Some(code),
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }

    #[async_trait]
    impl GitRunner for FakeGitRunner {
        async fn run(
            &self,
            args: &[&str],
            _dir: &Path,
            _timeout: Duration,
        ) -> Result<GitOutput, GitError> {
            self.calls.lock().unwrap().push(args[0].to_string());
            if !self.inside_repo {
                return Ok(exit(128, ""));
            }
            match args {
                ["rev-parse", "--is-inside-work-tree"] => Ok(exit(0, "true\n")),
                ["rev-parse", "HEAD"] => match &self.head {
                    Some(head) => Ok(exit(0, &format!("{head}\n"))),
                    None => Ok(exit(128, "")),
                },
                ["merge-base", "--is-ancestor", candidate, _] => {
                    if self.ancestors.contains(*candidate) {
                        Ok(exit(0, ""))
                    } else {
                        Ok(exit(1, ""))
                    }
                }
                ["log", ..] if self.log_fails => Ok(GitOutput {
                    code: Some(128),
                    stdout: String::new(),
                    stderr: "fatal: shallow file has changed".to_string(),
                }),
                ["log", ..] => {
                    let listing: Vec<&str> = self.ancestors.iter().map(String::as_str).collect();
                    Ok(exit(0, &listing.join("\n")))
                }
                _ => Ok(exit(2, "")),
            }
        }
    }

    fn resolver(fake: Arc<FakeGitRunner>) -> AncestryResolver {
        AncestryResolver::new(fake, AncestryConfig::default())
    }

    fn sha(n: usize) -> String {
        format!("{n:040x}")
    }

    #[tokio::test]
    async fn test_only_ancestors_are_visible() {
        let fake = Arc::new(FakeGitRunner::repo(&[ABC]));
        let visible = resolver(fake)
            .resolve_visible_commit_shas(
                &[ABC.to_string(), DEF.to_string()],
                Path::new("/repo"),
            )
            .await;
        assert_eq!(visible, Some(vec![ABC.to_string()]));
    }

    #[tokio::test]
    async fn test_outside_repository_returns_none() {
        let mut fake = FakeGitRunner::repo(&[ABC]);
        fake.inside_repo = false;
        let visible = resolver(Arc::new(fake))
            .resolve_visible_commit_shas(&[ABC.to_string()], Path::new("/tmp"))
            .await;
        assert_eq!(visible, None);
    }

    #[tokio::test]
    async fn test_repository_without_head_sees_nothing() {
        let mut fake = FakeGitRunner::repo(&[ABC]);
        fake.head = None;
        let visible = resolver(Arc::new(fake))
            .resolve_visible_commit_shas(&[ABC.to_string()], Path::new("/repo"))
            .await;
        assert_eq!(visible, Some(Vec::new()));
    }

    #[tokio::test]
    async fn test_duplicates_and_malformed_names_are_dropped() {
        let fake = Arc::new(FakeGitRunner::repo(&[ABC]));
        let ancestors = resolver(fake.clone())
            .resolve_ancestor_commits(
                HEAD,
                &[
                    ABC.to_string(),
                    ABC.to_string(),
                    "--all".to_string(),
                    "HEAD~1".to_string(),
                ],
                Path::new("/repo"),
            )
            .await;
        assert_eq!(ancestors, vec![ABC.to_string()]);
        assert_eq!(fake.calls_to("merge-base"), 1);
    }

    #[tokio::test]
    async fn test_small_sets_use_per_commit_checks() {
        let fake = Arc::new(FakeGitRunner::repo(&[]));
        let candidates: Vec<String> = (0..50).map(sha).collect();
        resolver(fake.clone())
            .resolve_ancestor_commits(HEAD, &candidates, Path::new("/repo"))
            .await;
        assert_eq!(fake.calls_to("merge-base"), 50);
        assert_eq!(fake.calls_to("log"), 0);
    }

    #[tokio::test]
    async fn test_large_sets_use_one_log_walk() {
        let reachable: Vec<String> = (0..300).map(sha).collect();
        let refs: Vec<&str> = reachable.iter().map(String::as_str).collect();
        let fake = Arc::new(FakeGitRunner::repo(&refs));

        let candidates: Vec<String> = (0..600).map(sha).collect();
        let ancestors = resolver(fake.clone())
            .resolve_ancestor_commits(HEAD, &candidates, Path::new("/repo"))
            .await;

        assert_eq!(ancestors, reachable);
        assert_eq!(fake.calls_to("log"), 1);
        assert_eq!(fake.calls_to("merge-base"), 0);
    }

    #[tokio::test]
    async fn test_failed_log_walk_falls_back_to_batches() {
        let reachable: Vec<String> = (0..10).map(sha).collect();
        let refs: Vec<&str> = reachable.iter().map(String::as_str).collect();
        let mut fake = FakeGitRunner::repo(&refs);
        fake.log_fails = true;
        let fake = Arc::new(fake);

        let candidates: Vec<String> = (0..600).map(sha).collect();
        let ancestors = resolver(fake.clone())
            .resolve_ancestor_commits(HEAD, &candidates, Path::new("/repo"))
            .await;

        assert_eq!(ancestors, reachable);
        assert_eq!(fake.calls_to("log"), 1);
        assert_eq!(fake.calls_to("merge-base"), 600);
    }

    #[tokio::test]
    async fn test_abbreviated_names_are_excluded_at_every_size() {
        let fake = Arc::new(FakeGitRunner::repo(&[ABC]));
        let short = ABC[..12].to_string();

        let small = resolver(fake.clone())
            .resolve_ancestor_commits(
                HEAD,
                &[short.clone(), ABC.to_string()],
                Path::new("/repo"),
            )
            .await;
        assert_eq!(small, vec![ABC.to_string()]);
        assert_eq!(fake.calls_to("merge-base"), 1);

        let mut candidates: Vec<String> = (1..=600).map(sha).collect();
        candidates.push(short);
        candidates.push(ABC.to_string());
        let large = resolver(fake.clone())
            .resolve_ancestor_commits(HEAD, &candidates, Path::new("/repo"))
            .await;
        assert_eq!(large, small);
    }

    proptest! {
        #[test]
        fn prop_result_is_subset_of_candidates(
            picks in proptest::collection::vec((0usize..40, any::<bool>()), 0..60)
        ) {
            let ancestors: Vec<String> = picks
                .iter()
                .filter(|(_, reachable)| *reachable)
                .map(|(n, _)| sha(*n))
                .collect();
            let refs: Vec<&str> = ancestors.iter().map(String::as_str).collect();
            let fake = Arc::new(FakeGitRunner::repo(&refs));
            let candidates: Vec<String> = picks.iter().map(|(n, _)| sha(*n)).collect();

            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let result = runtime.block_on(
                resolver(fake).resolve_ancestor_commits(HEAD, &candidates, Path::new("/repo")),
            );

            let unique: HashSet<&String> = result.iter().collect();
            prop_assert_eq!(unique.len(), result.len());
            for sha in &result {
                prop_assert!(candidates.contains(sha));
                prop_assert!(ancestors.contains(sha));
            }
        }
    }
}
