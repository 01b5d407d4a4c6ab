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

//! Ancestry resolution against real repositories.
//!
//! Every test returns early when no `git` binary is available.

use recall_core::{AncestryConfig, AncestryResolver};
use std::path::Path;
use std::process::Command;
use tempfile::TempDir;

fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args([
            "-c",
            "user.email=test@example.com",
            "-c",
            "user.name=Test",
            "-c",
            "commit.gpgsign=false",
        ])
        .args(args)
        .current_dir(dir)
        .output()
        .expect("git should run");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

fn commit(dir: &Path, line: &str) -> String {
    let file = dir.join("file.txt");
    let mut content = std::fs::read_to_string(&file).unwrap_or_default();
    content.push_str(line);
    content.push('\n');
    std::fs::write(&file, content).unwrap();
    git(dir, &["add", "file.txt"]);
    git(dir, &["commit", "-q", "-m", line]);
    git(dir, &["rev-parse", "HEAD"])
}

fn init_repo() -> TempDir {
    let dir = TempDir::new().unwrap();
    git(dir.path(), &["init", "-q"]);
    dir
}

fn resolver() -> AncestryResolver {
    AncestryResolver::with_git_binary(AncestryConfig::default())
}

#[tokio::test]
async fn test_head_and_first_commit_are_ancestors() {
    if !git_available() {
        return;
    }
    let repo = init_repo();
    let first = commit(repo.path(), "v1");
    commit(repo.path(), "v2");
    let head = commit(repo.path(), "v3");

    let resolver = resolver();
    assert_eq!(resolver.get_current_head(repo.path()).await, Some(head.clone()));

    let ancestors = resolver
        .resolve_ancestor_commits(&head, &[head.clone(), first.clone()], repo.path())
        .await;
    assert_eq!(ancestors, vec![head, first]);
}

#[tokio::test]
async fn test_sibling_branch_commits_are_hidden() {
    if !git_available() {
        return;
    }
    let repo = init_repo();
    let base = commit(repo.path(), "base");
    git(repo.path(), &["checkout", "-q", "-b", "feature"]);
    let feature_only = commit(repo.path(), "feature work");
    git(repo.path(), &["checkout", "-q", "-"]);
    let main_only = commit(repo.path(), "main work");

    let visible = resolver()
        .resolve_visible_commit_shas(
            &[base.clone(), feature_only, main_only.clone()],
            repo.path(),
        )
        .await;
    assert_eq!(visible, Some(vec![base, main_only]));
}

#[tokio::test]
async fn test_unknown_and_truncated_names_are_excluded() {
    if !git_available() {
        return;
    }
    let repo = init_repo();
    let head = commit(repo.path(), "only");

    let ancestors = resolver()
        .resolve_ancestor_commits(
            &head,
            &[
                "0000000000000000000000000000000000000000".to_string(),
                "abcdef1234567890".to_string(),
                head.clone(),
            ],
            repo.path(),
        )
        .await;
    assert_eq!(ancestors, vec![head]);
}

#[tokio::test]
async fn test_repository_without_commits_sees_nothing() {
    if !git_available() {
        return;
    }
    let repo = init_repo();
    let visible = resolver()
        .resolve_visible_commit_shas(
            &["0000000000000000000000000000000000000001".to_string()],
            repo.path(),
        )
        .await;
    assert_eq!(visible, Some(Vec::new()));
}

#[tokio::test]
async fn test_plain_directory_is_not_filtered() {
    if !git_available() {
        return;
    }
    let dir = TempDir::new().unwrap();
    let resolver = resolver();
    // Skip when the temp root itself sits inside a checkout.
    if resolver.is_inside_work_tree(dir.path()).await {
        return;
    }
    let visible = resolver
        .resolve_visible_commit_shas(&["abc123".to_string()], dir.path())
        .await;
    assert_eq!(visible, None);
    assert_eq!(resolver.get_current_head(dir.path()).await, None);
}

#[tokio::test]
async fn test_shallow_clone_degrades_gracefully() {
    if !git_available() {
        return;
    }
    let origin = init_repo();
    let oldest = commit(origin.path(), "first");
    commit(origin.path(), "second");
    let tip = commit(origin.path(), "third");

    let shallow = TempDir::new().unwrap();
    let url = format!("file://{}", origin.path().display());
    let cloned = Command::new("git")
        .args(["clone", "-q", "--depth", "1", &url])
        .arg(shallow.path())
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false);
    if !cloned {
        return;
    }

    let ancestors = resolver()
        .resolve_ancestor_commits(&tip, &[tip.clone(), oldest], shallow.path())
        .await;
    assert!(ancestors.contains(&tip));
    assert!(ancestors.len() <= 2);
}

#[tokio::test]
async fn test_current_branch_and_detached_head() {
    if !git_available() {
        return;
    }
    let repo = init_repo();
    let first = commit(repo.path(), "one");
    git(repo.path(), &["checkout", "-q", "-b", "topic"]);
    commit(repo.path(), "two");

    let resolver = resolver();
    assert_eq!(
        resolver.get_current_branch(repo.path()).await.as_deref(),
        Some("topic")
    );

    git(repo.path(), &["checkout", "-q", "--detach", &first]);
    assert_eq!(resolver.get_current_branch(repo.path()).await, None);
}

#[tokio::test]
async fn test_visibility_does_not_depend_on_candidate_count() {
    if !git_available() {
        return;
    }
    let repo = init_repo();
    let head = commit(repo.path(), "only");
    let short = head[..12].to_string();

    let resolver = resolver();
    let small = resolver
        .resolve_visible_commit_shas(&[short.clone(), head.clone()], repo.path())
        .await;

    let mut many: Vec<String> = (1..=600).map(|n| format!("{n:040x}")).collect();
    many.push(short);
    many.push(head.clone());
    let large = resolver.resolve_visible_commit_shas(&many, repo.path()).await;

    assert_eq!(small, Some(vec![head]));
    assert_eq!(large, small);
}
