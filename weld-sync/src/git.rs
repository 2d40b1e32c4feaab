//! Blocking wrapper over the `git` executable.
//!
//! Every function takes the working directory explicitly and runs exactly one
//! git process (a few run two). Output paths are never octal-quoted
//! (`core.quotePath=false`), and terminal prompts are disabled so a missing
//! credential fails instead of hanging.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use thiserror::Error;

use weld_core::markers::HistoryEntry;

/// Errors from git operations.
#[derive(Debug, Error)]
pub enum GitError {
    /// Git command failed.
    #[error("git command failed: {command}\nstderr: {stderr}")]
    CommandFailed { command: String, stderr: String },

    /// The git executable could not be run at all.
    #[error("failed to run git: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for git operations.
pub type GitResult<T> = Result<T, GitError>;

/// Result of a merge operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeResult {
    /// Merge completed, producing a new commit.
    Success { commit: String },

    /// Merge stopped with conflicts; the repository is mid-merge.
    Conflict { conflicting_files: Vec<String> },

    /// The target was already an ancestor of HEAD.
    AlreadyUpToDate,
}

/// Identity used for creating commits.
///
/// Passed via `-c` flags so commits work in mirrors and test repositories
/// without a configured `user.name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitIdentity {
    pub name: String,
    pub email: String,
}

impl From<&weld_core::manifest::Identity> for CommitIdentity {
    fn from(id: &weld_core::manifest::Identity) -> Self {
        Self {
            name: id.name.clone(),
            email: id.email.clone(),
        }
    }
}

/// Flags for [`commit`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CommitOptions {
    /// Stage modified and deleted tracked files (`-a`).
    pub all: bool,
    pub allow_empty: bool,
    /// Open the operator's editor on the message.
    pub edit: bool,
}

// ---------------------------------------------------------------------------
// Process plumbing
// ---------------------------------------------------------------------------

/// A git command rooted at `workdir` with prompts disabled.
pub(crate) fn git_command(workdir: &Path) -> Command {
    let mut cmd = Command::new("git");
    cmd.current_dir(workdir);
    cmd.env("GIT_TERMINAL_PROMPT", "0");
    cmd.env("LC_ALL", "C");
    cmd.args(["-c", "core.quotePath=false"]);
    cmd
}

/// [`git_command`] plus the commit identity, when one is configured.
pub(crate) fn git_commit_command(workdir: &Path, identity: Option<&CommitIdentity>) -> Command {
    let mut cmd = git_command(workdir);
    if let Some(id) = identity {
        cmd.arg("-c");
        cmd.arg(format!("user.name={}", id.name));
        cmd.arg("-c");
        cmd.arg(format!("user.email={}", id.email));
    }
    cmd
}

fn describe(args: &[&str]) -> String {
    format!("git {}", args.join(" "))
}

fn exec(mut cmd: Command, workdir: &Path, args: &[&str]) -> GitResult<Output> {
    tracing::debug!("{} (in {})", describe(args), workdir.display());
    Ok(cmd.args(args).stdin(Stdio::null()).output()?)
}

fn exec_with_input(
    mut cmd: Command,
    workdir: &Path,
    args: &[&str],
    input: &[u8],
) -> GitResult<Output> {
    tracing::debug!(
        "{} (in {}, {} bytes on stdin)",
        describe(args),
        workdir.display(),
        input.len()
    );
    let mut child = cmd
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;
    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(input)?;
    }
    Ok(child.wait_with_output()?)
}

fn check(args: &[&str], output: Output) -> GitResult<Output> {
    if output.status.success() {
        Ok(output)
    } else {
        Err(GitError::CommandFailed {
            command: describe(args),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

/// Run a git command in the given working directory.
pub fn run_git_sync(workdir: &Path, args: &[&str]) -> GitResult<Output> {
    check(args, exec(git_command(workdir), workdir, args)?)
}

/// Run a git command and return stdout as a trimmed string.
pub fn run_git_stdout(workdir: &Path, args: &[&str]) -> GitResult<String> {
    let output = run_git_sync(workdir, args)?;
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Run a git command whose non-zero exit means "no" rather than failure.
fn run_git_probe(workdir: &Path, args: &[&str]) -> GitResult<Option<Output>> {
    let output = exec(git_command(workdir), workdir, args)?;
    Ok(output.status.success().then_some(output))
}

fn split_z(bytes: &[u8]) -> Vec<String> {
    bytes
        .split(|b| *b == 0)
        .filter(|s| !s.is_empty())
        .map(|s| String::from_utf8_lossy(s).into_owned())
        .collect()
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// Resolve `rev` to a full commit id.
pub fn rev_parse(workdir: &Path, rev: &str) -> GitResult<String> {
    let spec = format!("{rev}^{{commit}}");
    run_git_stdout(workdir, &["rev-parse", "--verify", "--quiet", &spec])
}

/// Like [`rev_parse`], but a missing revision is `None`.
pub fn try_rev_parse(workdir: &Path, rev: &str) -> GitResult<Option<String>> {
    let spec = format!("{rev}^{{commit}}");
    Ok(run_git_probe(workdir, &["rev-parse", "--verify", "--quiet", &spec])?
        .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string()))
}

/// The checked-out branch, or `None` on a detached HEAD.
pub fn current_branch(workdir: &Path) -> GitResult<Option<String>> {
    Ok(run_git_probe(workdir, &["symbolic-ref", "--short", "-q", "HEAD"])?
        .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string()))
}

pub fn branch_exists(workdir: &Path, branch: &str) -> GitResult<bool> {
    Ok(try_rev_parse(workdir, &format!("refs/heads/{branch}"))?.is_some())
}

/// True when the work tree or index differ from HEAD, untracked files included.
pub fn has_local_changes(workdir: &Path) -> GitResult<bool> {
    let out = run_git_stdout(workdir, &["status", "--porcelain", "--untracked-files=all"])?;
    Ok(!out.is_empty())
}

pub fn git_dir(workdir: &Path) -> GitResult<PathBuf> {
    Ok(PathBuf::from(run_git_stdout(
        workdir,
        &["rev-parse", "--absolute-git-dir"],
    )?))
}

pub fn is_merge_in_progress(workdir: &Path) -> GitResult<bool> {
    Ok(git_dir(workdir)?.join("MERGE_HEAD").exists())
}

pub fn is_rebase_in_progress(workdir: &Path) -> GitResult<bool> {
    let dir = git_dir(workdir)?;
    Ok(dir.join("rebase-merge").exists() || dir.join("rebase-apply").exists())
}

/// True when `ancestor` is reachable from `descendant`.
pub fn is_ancestor(workdir: &Path, ancestor: &str, descendant: &str) -> GitResult<bool> {
    let args = ["merge-base", "--is-ancestor", ancestor, descendant];
    let output = exec(git_command(workdir), workdir, &args)?;
    match output.status.code() {
        Some(0) => Ok(true),
        Some(1) => Ok(false),
        _ => check(&args, output).map(|_| false),
    }
}

/// The id of the empty tree in this repository's hash format.
pub fn empty_tree(workdir: &Path) -> GitResult<String> {
    let args = ["hash-object", "-t", "tree", "--stdin"];
    let output = check(&args, exec(git_command(workdir), workdir, &args)?)?;
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// First parent of `commit`, or `None` for a root commit.
pub fn first_parent(workdir: &Path, commit: &str) -> GitResult<Option<String>> {
    try_rev_parse(workdir, &format!("{commit}^"))
}

/// Binary-safe diff between two tree-ish points, limited to `paths`.
pub fn diff_range(workdir: &Path, from: &str, to: &str, paths: &[String]) -> GitResult<Vec<u8>> {
    let mut args = vec![
        "diff",
        "--binary",
        "--full-index",
        "--no-renames",
        "--no-color",
        "--no-ext-diff",
        from,
        to,
        "--",
    ];
    args.extend(paths.iter().map(String::as_str));
    Ok(run_git_sync(workdir, &args)?.stdout)
}

/// Paths that differ between two tree-ish points.
pub fn changed_paths(workdir: &Path, from: &str, to: &str) -> GitResult<Vec<String>> {
    let args = ["diff", "--name-only", "--no-renames", "-z", from, to];
    Ok(split_z(&run_git_sync(workdir, &args)?.stdout))
}

/// First-parent commits in `(from, to]`, oldest first. `from = None` lists
/// everything reachable from `to`.
pub fn rev_list_first_parent(
    workdir: &Path,
    from: Option<&str>,
    to: &str,
) -> GitResult<Vec<String>> {
    let range = match from {
        Some(from) => format!("{from}..{to}"),
        None => to.to_string(),
    };
    let out = run_git_stdout(workdir, &["rev-list", "--reverse", "--first-parent", &range])?;
    Ok(out.lines().map(str::to_string).collect())
}

/// Commits reachable from `rev` with their messages, newest first.
pub fn log_history(workdir: &Path, rev: &str) -> GitResult<Vec<HistoryEntry>> {
    let output = run_git_sync(
        workdir,
        &["log", "--topo-order", "--format=%H%x00%B%x1e", rev],
    )?;
    let text = String::from_utf8_lossy(&output.stdout);
    Ok(text
        .split('\x1e')
        .filter_map(|record| {
            let record = record.trim_start_matches('\n');
            let (commit, message) = record.split_once('\0')?;
            Some(HistoryEntry {
                commit: commit.to_string(),
                message: message.to_string(),
            })
        })
        .collect())
}

pub fn commit_message(workdir: &Path, rev: &str) -> GitResult<String> {
    let output = run_git_sync(workdir, &["log", "-1", "--format=%B", rev])?;
    Ok(String::from_utf8_lossy(&output.stdout)
        .trim_end()
        .to_string())
}

/// Tracked files under `paths`, relative to the repository root.
pub fn ls_files(workdir: &Path, paths: &[String]) -> GitResult<Vec<String>> {
    let mut args = vec!["ls-files", "-z", "--"];
    args.extend(paths.iter().map(String::as_str));
    Ok(split_z(&run_git_sync(workdir, &args)?.stdout))
}

/// Files left unmerged by a conflicted merge or rebase.
pub fn conflicting_files(workdir: &Path) -> GitResult<Vec<String>> {
    let args = ["diff", "--name-only", "--diff-filter=U", "-z"];
    Ok(split_z(&run_git_sync(workdir, &args)?.stdout))
}

// ---------------------------------------------------------------------------
// Branches and the work tree
// ---------------------------------------------------------------------------

pub fn checkout(workdir: &Path, rev: &str) -> GitResult<()> {
    run_git_sync(workdir, &["checkout", "-q", rev, "--"])?;
    Ok(())
}

/// Create (or reset) `branch` at `start` and check it out.
pub fn checkout_new_branch(workdir: &Path, branch: &str, start: &str) -> GitResult<()> {
    run_git_sync(workdir, &["checkout", "-q", "-B", branch, start, "--"])?;
    Ok(())
}

pub fn delete_branch(workdir: &Path, branch: &str) -> GitResult<()> {
    run_git_sync(workdir, &["branch", "-q", "-D", branch])?;
    Ok(())
}

pub fn reset_hard(workdir: &Path, rev: &str) -> GitResult<()> {
    run_git_sync(workdir, &["reset", "-q", "--hard", rev])?;
    Ok(())
}

/// Remove untracked files and directories. Ignored files survive.
pub fn clean(workdir: &Path) -> GitResult<()> {
    run_git_sync(workdir, &["clean", "-q", "-f", "-d"])?;
    Ok(())
}

/// Stage additions, modifications and deletions under `paths`.
///
/// Paths missing from the work tree are skipped; `commit` with `all` picks
/// up their deletions.
pub fn add_all(workdir: &Path, paths: &[String]) -> GitResult<()> {
    let present: Vec<&str> = paths
        .iter()
        .map(String::as_str)
        .filter(|p| workdir.join(p).exists())
        .collect();
    if present.is_empty() {
        return Ok(());
    }
    let mut args = vec!["add", "-A", "--"];
    args.extend(present);
    run_git_sync(workdir, &args)?;
    Ok(())
}

/// `git rm -r` that tolerates paths with nothing tracked.
pub fn remove_paths(workdir: &Path, paths: &[String]) -> GitResult<()> {
    let mut args = vec!["rm", "-r", "-q", "--ignore-unmatch", "--"];
    args.extend(paths.iter().map(String::as_str));
    run_git_sync(workdir, &args)?;
    Ok(())
}

/// Commit with `message` and return the new HEAD.
///
/// Without `edit` the message goes through stdin. With `edit` it is written
/// to the git directory and the editor inherits the terminal.
pub fn commit(
    workdir: &Path,
    identity: Option<&CommitIdentity>,
    message: &str,
    opts: CommitOptions,
) -> GitResult<String> {
    let mut flags: Vec<&str> = Vec::new();
    if opts.all {
        flags.push("-a");
    }
    if opts.allow_empty {
        flags.push("--allow-empty");
    }

    if opts.edit {
        let msg_path = git_dir(workdir)?.join("WELD_COMMIT_MSG");
        std::fs::write(&msg_path, message)?;
        let msg_arg = msg_path.to_string_lossy().into_owned();
        let mut args = vec!["commit", "-q", "-e", "-F", msg_arg.as_str()];
        args.extend(&flags);
        tracing::debug!("{} (in {})", describe(&args), workdir.display());
        let status = git_commit_command(workdir, identity).args(&args).status()?;
        let _ = std::fs::remove_file(&msg_path);
        if !status.success() {
            return Err(GitError::CommandFailed {
                command: describe(&args),
                stderr: format!("exited with {status}"),
            });
        }
    } else {
        let mut args = vec!["commit", "-q", "-F", "-"];
        args.extend(&flags);
        let output = exec_with_input(
            git_commit_command(workdir, identity),
            workdir,
            &args,
            message.as_bytes(),
        )?;
        check(&args, output)?;
    }
    rev_parse(workdir, "HEAD")
}

/// Apply a patch to the work tree. `Ok(false)` means git rejected it.
pub fn apply_patch(workdir: &Path, patch: &[u8]) -> GitResult<bool> {
    let args = ["apply", "--whitespace=nowarn", "-"];
    let output = exec_with_input(git_command(workdir), workdir, &args, patch)?;
    if !output.status.success() {
        tracing::debug!(
            "git apply rejected patch: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(output.status.success())
}

// ---------------------------------------------------------------------------
// Combining histories
// ---------------------------------------------------------------------------

/// Merge `rev` into the checked-out branch.
///
/// `no_ff` always creates a merge commit carrying `message`.
pub fn merge(
    workdir: &Path,
    identity: Option<&CommitIdentity>,
    rev: &str,
    message: &str,
    no_ff: bool,
) -> GitResult<MergeResult> {
    if is_ancestor(workdir, rev, "HEAD")? {
        return Ok(MergeResult::AlreadyUpToDate);
    }

    let mut args = vec!["merge", "-q", "--no-edit", "-m", message];
    if no_ff {
        args.push("--no-ff");
    }
    args.push(rev);

    let output = exec(git_commit_command(workdir, identity), workdir, &args)?;
    if output.status.success() {
        let commit = rev_parse(workdir, "HEAD")?;
        return Ok(MergeResult::Success { commit });
    }

    if is_merge_in_progress(workdir)? {
        let conflicting_files = conflicting_files(workdir)?;
        return Ok(MergeResult::Conflict { conflicting_files });
    }
    check(&args, output).map(|_| MergeResult::AlreadyUpToDate)
}

pub fn merge_ff_only(workdir: &Path, rev: &str) -> GitResult<()> {
    run_git_sync(workdir, &["merge", "-q", "--ff-only", rev])?;
    Ok(())
}

pub fn merge_abort(workdir: &Path) -> GitResult<()> {
    run_git_sync(workdir, &["merge", "--abort"])?;
    Ok(())
}

/// Rebase the checked-out branch onto `onto`. `Ok(false)` means it stopped
/// with conflicts and is still in progress.
pub fn rebase(workdir: &Path, identity: Option<&CommitIdentity>, onto: &str) -> GitResult<bool> {
    let args = ["rebase", "-q", onto];
    let output = exec(git_commit_command(workdir, identity), workdir, &args)?;
    if output.status.success() {
        return Ok(true);
    }
    if is_rebase_in_progress(workdir)? {
        return Ok(false);
    }
    check(&args, output).map(|_| true)
}

pub fn rebase_abort(workdir: &Path) -> GitResult<()> {
    run_git_sync(workdir, &["rebase", "--abort"])?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Remotes
// ---------------------------------------------------------------------------

/// Clone `uri` into `dest`, optionally checking out `branch`.
pub fn clone(workdir: &Path, uri: &str, dest: &Path, branch: Option<&str>) -> GitResult<()> {
    let dest = dest.to_string_lossy();
    let mut args = vec!["clone", "-q"];
    if let Some(branch) = branch {
        args.extend(["--branch", branch]);
    }
    args.extend(["--", uri, &*dest]);
    run_git_sync(workdir, &args)?;
    Ok(())
}

pub fn fetch(workdir: &Path) -> GitResult<()> {
    run_git_sync(workdir, &["fetch", "-q", "--tags", "origin"])?;
    Ok(())
}

pub fn pull_ff_only(workdir: &Path) -> GitResult<()> {
    run_git_sync(workdir, &["pull", "-q", "--ff-only"])?;
    Ok(())
}

pub fn push(workdir: &Path, remote: &str, branch: &str) -> GitResult<()> {
    run_git_sync(workdir, &["push", "-q", remote, branch])?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn test_identity() -> CommitIdentity {
        CommitIdentity {
            name: "Test".to_string(),
            email: "test@test.com".to_string(),
        }
    }

    /// A fresh repository on `main` with identity configured.
    pub fn init_repo(dir: &Path) {
        std::fs::create_dir_all(dir).unwrap();
        run_git_sync(dir, &["init", "-q"]).unwrap();
        run_git_sync(dir, &["symbolic-ref", "HEAD", "refs/heads/main"]).unwrap();
        run_git_sync(dir, &["config", "user.name", "Test"]).unwrap();
        run_git_sync(dir, &["config", "user.email", "test@test.com"]).unwrap();
        run_git_sync(dir, &["config", "commit.gpgsign", "false"]).unwrap();
    }

    /// Write `files`, stage everything and commit; returns the new HEAD.
    pub fn commit_files(dir: &Path, files: &[(&str, &str)], message: &str) -> String {
        for (path, content) in files {
            let full = dir.join(path);
            std::fs::create_dir_all(full.parent().unwrap()).unwrap();
            std::fs::write(full, content).unwrap();
        }
        run_git_sync(dir, &["add", "-A"]).unwrap();
        commit(dir, None, message, CommitOptions::default()).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn commit_and_history_round_trip() {
        let tmp = TempDir::new().unwrap();
        init_repo(tmp.path());
        let c1 = commit_files(tmp.path(), &[("a.txt", "one\n")], "first\n\nbody line");
        let c2 = commit_files(tmp.path(), &[("a.txt", "two\n")], "second");

        let history = log_history(tmp.path(), "HEAD").unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].commit, c2);
        assert_eq!(history[1].commit, c1);
        assert!(history[1].message.contains("body line"));

        assert_eq!(
            rev_list_first_parent(tmp.path(), Some(&c1), "HEAD").unwrap(),
            vec![c2.clone()]
        );
        assert_eq!(
            rev_list_first_parent(tmp.path(), None, "HEAD").unwrap(),
            vec![c1, c2]
        );
        assert_eq!(current_branch(tmp.path()).unwrap().as_deref(), Some("main"));
    }

    #[test]
    fn local_changes_and_apply() {
        let tmp = TempDir::new().unwrap();
        init_repo(tmp.path());
        let c1 = commit_files(tmp.path(), &[("a.txt", "one\n")], "first");
        let c2 = commit_files(tmp.path(), &[("a.txt", "two\n")], "second");
        assert!(!has_local_changes(tmp.path()).unwrap());

        let patch = diff_range(tmp.path(), &c2, &c1, &["a.txt".to_string()]).unwrap();
        assert!(apply_patch(tmp.path(), &patch).unwrap());
        assert!(has_local_changes(tmp.path()).unwrap());
        assert_eq!(std::fs::read_to_string(tmp.path().join("a.txt")).unwrap(), "one\n");
        assert!(!apply_patch(tmp.path(), &patch).unwrap());
    }

    #[test]
    fn merge_reports_conflicts_and_up_to_date() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path();
        init_repo(dir);
        let base = commit_files(dir, &[("a.txt", "base\n")], "base");
        checkout_new_branch(dir, "side", &base).unwrap();
        commit_files(dir, &[("a.txt", "side\n")], "side");
        checkout(dir, "main").unwrap();
        commit_files(dir, &[("a.txt", "main\n")], "main");

        let id = test_identity();
        let result = merge(dir, Some(&id), "side", "merge side", true).unwrap();
        match result {
            MergeResult::Conflict { conflicting_files } => {
                assert_eq!(conflicting_files, vec!["a.txt".to_string()]);
            }
            other => panic!("expected conflict, got {other:?}"),
        }
        assert!(is_merge_in_progress(dir).unwrap());
        merge_abort(dir).unwrap();

        assert_eq!(
            merge(dir, Some(&id), &base, "noop", true).unwrap(),
            MergeResult::AlreadyUpToDate
        );
    }

    #[test]
    fn empty_tree_diff_lists_everything() {
        let tmp = TempDir::new().unwrap();
        init_repo(tmp.path());
        commit_files(tmp.path(), &[("src/a.rs", "a\n"), ("b.txt", "b\n")], "init");
        let empty = empty_tree(tmp.path()).unwrap();
        let mut paths = changed_paths(tmp.path(), &empty, "HEAD").unwrap();
        paths.sort();
        assert_eq!(paths, vec!["b.txt".to_string(), "src/a.rs".to_string()]);
        assert_eq!(first_parent(tmp.path(), "HEAD").unwrap(), None);
    }
}
