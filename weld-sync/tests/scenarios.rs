use std::fs;
use std::path::{Path, PathBuf};

use rstest::rstest;
use tempfile::TempDir;
use weld_core::markers::EventVerb;
use weld_core::{BaseName, CombineStyle};
use weld_sync::git::{self, run_git_stdout, run_git_sync};
use weld_sync::history::{latest_event, pull_sync_point};
use weld_sync::{pull, push, workflow, Outcome, Session, Stepping, SyncOptions, Verb};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn git_init(dir: &Path) {
    fs::create_dir_all(dir).expect("create repo dir");
    run_git_sync(dir, &["init", "-q"]).expect("git init");
    run_git_sync(dir, &["symbolic-ref", "HEAD", "refs/heads/main"]).expect("main");
    run_git_sync(dir, &["config", "user.name", "Test"]).expect("user.name");
    run_git_sync(dir, &["config", "user.email", "test@test.com"]).expect("user.email");
    run_git_sync(dir, &["config", "commit.gpgsign", "false"]).expect("gpgsign");
}

fn write(dir: &Path, files: &[(&str, &str)]) {
    for (path, content) in files {
        let full = dir.join(path);
        fs::create_dir_all(full.parent().expect("parent")).expect("create parent");
        fs::write(full, content).expect("write file");
    }
}

fn commit(dir: &Path, files: &[(&str, &str)], message: &str) -> String {
    write(dir, files);
    run_git_sync(dir, &["add", "-A"]).expect("git add");
    run_git_sync(dir, &["commit", "-q", "-m", message]).expect("git commit");
    git::rev_parse(dir, "HEAD").expect("HEAD")
}

fn read(path: PathBuf) -> String {
    fs::read_to_string(&path).unwrap_or_else(|e| panic!("read {}: {e}", path.display()))
}

struct Fixture {
    _tmp: TempDir,
    lib: PathBuf,
    weld: PathBuf,
}

impl Fixture {
    /// A base `lib` with `src/` and `docs/`, and a weld seaming `src` into
    /// `vendor/lib`.
    fn new() -> Self {
        init_logging();
        let tmp = TempDir::new().expect("tmp");
        let lib = tmp.path().join("lib");
        let weld = tmp.path().join("weld");

        git_init(&lib);
        commit(
            &lib,
            &[
                ("src/a.txt", "one\n"),
                ("docs/guide.md", "# guide\n"),
                ("README", "lib\n"),
            ],
            "lib: first",
        );

        git_init(&weld);
        let fixture = Fixture {
            _tmp: tmp,
            lib,
            weld,
        };
        fixture.write_manifest(&[("src", "vendor/lib")]);
        commit(&fixture.weld, &[], "Initialise weld\n\nX-Weld-State: Init");
        fixture
    }

    fn write_manifest(&self, seams: &[(&str, &str)]) {
        let seams: String = seams
            .iter()
            .map(|(s, d)| format!("      - {{ source: {s}, dest: {d} }}\n"))
            .collect();
        let manifest = format!(
            "name: demo\n\
             settings:\n  identity: {{ name: Weld Test, email: weld@test.invalid }}\n\
             bases:\n  - name: lib\n    uri: {}\n    branch: main\n    seams:\n{seams}",
            self.lib.display()
        );
        write(&self.weld, &[(".weld/welded.yaml", &manifest)]);
    }

    fn session(&self) -> Session {
        Session::open(&self.weld).expect("open session")
    }

    fn mirror(&self) -> PathBuf {
        self.weld.join(".weld/bases/lib")
    }

    fn pull(&self, options: SyncOptions) -> Outcome {
        pull::start(&self.session(), &BaseName::from("lib"), options).expect("pull")
    }

    fn head_message(&self) -> String {
        git::commit_message(&self.weld, "HEAD").expect("HEAD message")
    }
}

fn auto() -> SyncOptions {
    SyncOptions {
        auto: true,
        ..SyncOptions::default()
    }
}

fn lib() -> BaseName {
    BaseName::from("lib")
}

#[test]
fn first_pull_imports_the_seam_and_records_merged() {
    let fx = Fixture::new();

    let outcome = fx.pull(auto());
    assert!(matches!(outcome, Outcome::Finished(_)), "{outcome:?}");

    assert_eq!(read(fx.weld.join("vendor/lib/a.txt")), "one\n");
    assert!(!fx.weld.join("vendor/lib/README").exists());
    assert!(fx.head_message().contains("X-Weld-State: Merged lib/"));
    assert_eq!(git::current_branch(&fx.weld).unwrap().as_deref(), Some("main"));
    assert!(!git::branch_exists(&fx.weld, "weld-pull-lib").unwrap());
    assert!(!fx.session().store.exists());

    let log = run_git_stdout(&fx.weld, &["log", "--format=%B", "HEAD^2"]).unwrap();
    assert!(log.contains("X-Weld-State: Seam-Added lib/"));
    assert!(log.contains("X-Weld-State: PortedCommit lib/"));
}

#[test]
fn stepwise_pull_ports_only_commits_touching_seams() {
    let fx = Fixture::new();
    fx.pull(auto());

    commit(&fx.lib, &[("src/a.txt", "two\n")], "lib: edit a");
    commit(&fx.lib, &[("README", "changed\n")], "lib: readme only");
    let last = commit(&fx.lib, &[("src/b.txt", "bee\n")], "lib: add b");

    let outcome = fx.pull(auto());
    assert!(matches!(outcome, Outcome::Finished(_)), "{outcome:?}");

    assert_eq!(read(fx.weld.join("vendor/lib/a.txt")), "two\n");
    assert_eq!(read(fx.weld.join("vendor/lib/b.txt")), "bee\n");
    let ported = run_git_stdout(&fx.weld, &["rev-list", "--count", "HEAD^1..HEAD^2"]).unwrap();
    assert_eq!(ported, "2");

    let point = pull_sync_point(&fx.weld, &lib(), false).unwrap();
    assert_eq!(point.verb, EventVerb::Merged);
    assert_eq!(point.base_commit.as_deref(), Some(last.as_str()));
}

#[rstest]
#[case::stepwise(Stepping::Stepwise)]
#[case::bulk(Stepping::Bulk)]
fn later_pull_carries_edits_and_deletions(#[case] stepping: Stepping) {
    let fx = Fixture::new();
    fx.pull(auto());

    commit(&fx.lib, &[("src/nested/b.txt", "bee\n")], "lib: add b");
    run_git_sync(&fx.lib, &["rm", "-q", "src/a.txt"]).unwrap();
    run_git_sync(&fx.lib, &["commit", "-q", "-m", "lib: drop a"]).unwrap();

    let outcome = fx.pull(SyncOptions {
        stepping,
        ..auto()
    });
    assert!(matches!(outcome, Outcome::Finished(_)), "{outcome:?}");
    assert_eq!(read(fx.weld.join("vendor/lib/nested/b.txt")), "bee\n");
    assert!(!fx.weld.join("vendor/lib/a.txt").exists());
    assert!(!git::has_local_changes(&fx.weld).unwrap());
}

#[test]
fn pull_with_nothing_new_is_already_up_to_date() {
    let fx = Fixture::new();
    fx.pull(auto());
    let head = git::rev_parse(&fx.weld, "HEAD").unwrap();

    let outcome = fx.pull(auto());
    assert!(outcome.message().contains("already up to date"), "{outcome}");
    assert_eq!(git::rev_parse(&fx.weld, "HEAD").unwrap(), head);
}

#[test]
fn markers_in_base_content_and_messages_are_escaped() {
    let fx = Fixture::new();
    fx.pull(auto());

    commit(
        &fx.lib,
        &[("src/notes.txt", "X-Weld-State: Init\n")],
        "lib: talk about markers\n\nX-Weld-State: Init",
    );
    fx.pull(auto());

    assert_eq!(
        read(fx.weld.join("vendor/lib/notes.txt")),
        "X-Escaped-Weld-State: Init\n"
    );
    let ported = run_git_stdout(&fx.weld, &["log", "-1", "--format=%B", "HEAD^2"]).unwrap();
    assert!(ported.contains("X-Escaped-Weld-State: Init"));
    assert!(!ported.lines().any(|l| l == "X-Weld-State: Init"));
}

#[test]
fn manual_pull_waits_and_abort_restores_everything() {
    let fx = Fixture::new();
    fx.pull(auto());
    let before = git::rev_parse(&fx.weld, "HEAD").unwrap();
    let mirror_before = git::rev_parse(&fx.mirror(), "HEAD").unwrap();
    commit(&fx.lib, &[("src/a.txt", "two\n")], "lib: edit a");

    let outcome = fx.pull(SyncOptions::default());
    assert!(matches!(outcome, Outcome::Progressed(_)), "{outcome:?}");
    assert!(outcome.message().contains("waiting"));

    let session = fx.session();
    let err = workflow::invoke(&session, Verb::Finish).unwrap_err();
    assert!(err.is_user_error());

    workflow::invoke(&session, Verb::Step).unwrap();
    assert_eq!(read(fx.weld.join("vendor/lib/a.txt")), "two\n");

    let outcome = workflow::invoke(&session, Verb::Abort).unwrap();
    assert!(matches!(outcome, Outcome::Aborted(_)), "{outcome:?}");
    assert_eq!(git::current_branch(&fx.weld).unwrap().as_deref(), Some("main"));
    assert_eq!(git::rev_parse(&fx.weld, "HEAD").unwrap(), before);
    assert_eq!(read(fx.weld.join("vendor/lib/a.txt")), "one\n");
    assert!(!git::branch_exists(&fx.weld, "weld-pull-lib").unwrap());
    assert_eq!(git::rev_parse(&fx.mirror(), "HEAD").unwrap(), mirror_before);
    assert!(!session.store.exists());
}

#[test]
fn second_operation_is_refused_while_one_is_in_progress() {
    let fx = Fixture::new();
    fx.pull(auto());
    commit(&fx.lib, &[("src/a.txt", "two\n")], "lib: edit a");
    fx.pull(SyncOptions::default());

    let err = pull::start(&fx.session(), &lib(), auto()).unwrap_err();
    assert!(err.to_string().contains("already in progress"));
    workflow::invoke(&fx.session(), Verb::Abort).unwrap();
}

/// Pull a base edit over a conflicting weld edit and resolve the merge by
/// hand, leaving the weld's copy of `a.txt` different from the base's.
fn resolved_by_hand(fx: &Fixture) -> String {
    fx.pull(auto());
    commit(&fx.weld, &[("vendor/lib/a.txt", "weld side\n")], "weld: local edit");
    let base_head = commit(&fx.lib, &[("src/a.txt", "base side\n")], "lib: edit a");

    let outcome = fx.pull(auto());
    assert!(matches!(outcome, Outcome::Halted(_)), "{outcome:?}");
    assert!(outcome.message().contains("vendor/lib/a.txt"));

    write(&fx.weld, &[("vendor/lib/a.txt", "resolved\n")]);
    run_git_sync(&fx.weld, &["add", "vendor/lib/a.txt"]).unwrap();
    run_git_sync(&fx.weld, &["commit", "-q", "--no-edit"]).unwrap();

    let outcome = workflow::invoke(&fx.session(), Verb::Finish).unwrap();
    assert!(matches!(outcome, Outcome::Finished(_)), "{outcome:?}");
    base_head
}

fn legal_verbs(fx: &Fixture) -> Vec<Verb> {
    let (_, legal) = fx.session().store.load().unwrap().expect("operation in progress");
    legal.into_iter().collect()
}

#[test]
fn finish_conflict_halts_and_resumes_after_resolution() {
    let fx = Fixture::new();
    let base_head = resolved_by_hand(&fx);
    assert_eq!(read(fx.weld.join("vendor/lib/a.txt")), "resolved\n");

    let latest = latest_event(&fx.weld, &lib(), &[EventVerb::Merged]).unwrap().unwrap();
    assert_eq!(
        latest.event.data().map(|d| d.commit.as_str()),
        Some(base_head.as_str())
    );
}

#[test]
fn halted_step_cannot_be_stepped_or_finished_past() {
    let fx = Fixture::new();
    resolved_by_hand(&fx);
    let skipped = commit(
        &fx.lib,
        &[("src/a.txt", "next\n"), ("src/c.txt", "sea\n")],
        "lib: edit a, add c",
    );

    let outcome = fx.pull(auto());
    assert!(matches!(outcome, Outcome::Halted(_)), "{outcome:?}");
    assert!(outcome.message().contains("weld commit"));
    assert!(!git::has_local_changes(&fx.weld).unwrap());
    assert_eq!(legal_verbs(&fx), vec![Verb::Commit, Verb::Inspect, Verb::Abort]);

    let session = fx.session();
    assert!(workflow::invoke(&session, Verb::Step).unwrap_err().is_user_error());
    assert!(workflow::invoke(&session, Verb::Finish).unwrap_err().is_user_error());

    let waiting = workflow::drive(&session).unwrap();
    assert!(waiting.message().contains("waiting"), "{waiting}");
    let bad = fx.weld.join(".weld/bad-patches/vendor-lib.patch");
    assert!(read(bad.clone()).contains("vendor/lib/c.txt"));

    write(&fx.weld, &[("vendor/lib/a.txt", "next\n"), ("vendor/lib/c.txt", "sea\n")]);
    workflow::invoke(&session, Verb::Commit).unwrap();
    let outcome = workflow::drive(&session).unwrap();
    assert!(matches!(outcome, Outcome::Finished(_)), "{outcome:?}");
    assert_eq!(read(fx.weld.join("vendor/lib/c.txt")), "sea\n");
    assert!(!bad.exists());

    let point = pull_sync_point(&fx.weld, &lib(), false).unwrap();
    assert_eq!(point.base_commit.as_deref(), Some(skipped.as_str()));
}

#[test]
fn halted_step_resolved_without_changes_commits_empty() {
    let fx = Fixture::new();
    resolved_by_hand(&fx);
    commit(&fx.lib, &[("src/a.txt", "next\n")], "lib: edit a");
    fx.pull(auto());

    let session = fx.session();
    let outcome = workflow::invoke(&session, Verb::Commit).unwrap();
    assert!(matches!(outcome, Outcome::Progressed(_)), "{outcome:?}");
    let ported = git::commit_message(&fx.weld, "HEAD").unwrap();
    assert!(ported.contains("lib: edit a"));
    assert!(ported.contains("X-Weld-State: PortedCommit lib/"));

    let outcome = workflow::drive(&session).unwrap();
    assert!(matches!(outcome, Outcome::Finished(_)), "{outcome:?}");
    assert_eq!(read(fx.weld.join("vendor/lib/a.txt")), "resolved\n");
}

#[test]
fn bad_patch_keeps_earlier_sections_and_records_the_rest_per_seam() {
    let fx = Fixture::new();
    resolved_by_hand(&fx);
    commit(
        &fx.lib,
        &[("src/0.txt", "zero\n"), ("src/a.txt", "next\n"), ("src/c.txt", "sea\n")],
        "lib: three files",
    );

    let outcome = fx.pull(auto());
    assert!(matches!(outcome, Outcome::Halted(_)), "{outcome:?}");
    assert!(outcome.message().contains("1 failed, 1 not attempted"), "{outcome}");

    assert_eq!(read(fx.weld.join("vendor/lib/0.txt")), "zero\n");
    assert_eq!(read(fx.weld.join("vendor/lib/a.txt")), "resolved\n");
    assert!(!fx.weld.join("vendor/lib/c.txt").exists());

    let bad = read(fx.weld.join(".weld/bad-patches/vendor-lib.patch"));
    assert!(bad.contains("diff --git a/vendor/lib/a.txt b/vendor/lib/a.txt"));
    assert!(bad.contains("vendor/lib/c.txt"));
    assert!(!bad.contains("vendor/lib/0.txt"));
    assert_eq!(legal_verbs(&fx), vec![Verb::Commit, Verb::Inspect, Verb::Abort]);

    workflow::invoke(&fx.session(), Verb::Abort).unwrap();
    assert!(!fx.weld.join("vendor/lib/0.txt").exists());
}

#[test]
fn rebase_finish_halts_on_conflict_and_resumes() {
    let fx = Fixture::new();
    fx.pull(auto());
    commit(&fx.weld, &[("vendor/lib/a.txt", "weld side\n")], "weld: local edit");
    let base_head = commit(&fx.lib, &[("src/a.txt", "base side\n")], "lib: edit a");

    let rebase = SyncOptions {
        combine: CombineStyle::Rebase,
        ..auto()
    };
    let outcome = fx.pull(rebase);
    assert!(matches!(outcome, Outcome::Halted(_)), "{outcome:?}");
    assert!(git::is_rebase_in_progress(&fx.weld).unwrap());

    let session = fx.session();
    let still = workflow::invoke(&session, Verb::Finish).unwrap();
    assert!(matches!(still, Outcome::Halted(_)), "{still:?}");

    write(&fx.weld, &[("vendor/lib/a.txt", "resolved\n")]);
    run_git_sync(&fx.weld, &["add", "vendor/lib/a.txt"]).unwrap();
    run_git_sync(&fx.weld, &["-c", "core.editor=true", "rebase", "--continue"]).unwrap();

    let outcome = workflow::invoke(&session, Verb::Finish).unwrap();
    assert!(matches!(outcome, Outcome::Finished(_)), "{outcome:?}");
    assert_eq!(git::current_branch(&fx.weld).unwrap().as_deref(), Some("main"));
    assert_eq!(read(fx.weld.join("vendor/lib/a.txt")), "resolved\n");
    assert!(git::try_rev_parse(&fx.weld, "HEAD^2").unwrap().is_none());
    assert!(git::commit_message(&fx.weld, "HEAD^")
        .unwrap()
        .contains("X-Weld-State: PortedCommit lib/"));

    let point = pull_sync_point(&fx.weld, &lib(), false).unwrap();
    assert_eq!(point.marker_commit, git::rev_parse(&fx.weld, "HEAD").unwrap());
    assert_eq!(point.base_commit.as_deref(), Some(base_head.as_str()));
}

#[test]
fn two_bases_with_disjoint_seams_share_one_weld() {
    let fx = Fixture::new();
    let tool = fx.lib.parent().expect("tmp").join("tool");
    git_init(&tool);
    let tool_head = commit(&tool, &[("bin/t.sh", "echo t\n"), ("NOTES", "n\n")], "tool: first");

    let manifest = read(fx.weld.join(".weld/welded.yaml"))
        + &format!(
            "  - name: tool\n    uri: {}\n    branch: main\n    seams:\n      \
             - {{ source: bin, dest: vendor/tool }}\n",
            tool.display()
        );
    write(&fx.weld, &[(".weld/welded.yaml", &manifest)]);
    commit(&fx.weld, &[], "weld: add tool");

    let outcome = fx.pull(auto());
    assert!(matches!(outcome, Outcome::Finished(_)), "{outcome:?}");
    let outcome = pull::start(&fx.session(), &BaseName::from("tool"), auto()).unwrap();
    assert!(matches!(outcome, Outcome::Finished(_)), "{outcome:?}");

    assert_eq!(read(fx.weld.join("vendor/lib/a.txt")), "one\n");
    assert_eq!(read(fx.weld.join("vendor/tool/t.sh")), "echo t\n");
    assert!(!fx.weld.join("vendor/tool/NOTES").exists());

    let point = pull_sync_point(&fx.weld, &BaseName::from("tool"), false).unwrap();
    assert_eq!(point.base_commit.as_deref(), Some(tool_head.as_str()));
    let again = fx.pull(auto());
    assert!(again.message().contains("already up to date"), "{again}");
}

#[test]
fn added_seam_is_populated_and_recorded() {
    let fx = Fixture::new();
    fx.pull(auto());

    fx.write_manifest(&[("src", "vendor/lib"), ("docs", "docs/lib")]);
    commit(&fx.weld, &[], "weld: seam lib docs");

    let outcome = fx.pull(auto());
    assert!(matches!(outcome, Outcome::Finished(_)), "{outcome:?}");
    assert_eq!(read(fx.weld.join("docs/lib/guide.md")), "# guide\n");

    let adjust = run_git_stdout(&fx.weld, &["log", "-1", "--format=%B", "HEAD^2"]).unwrap();
    assert!(adjust.contains("X-Weld-State: Seam-Added lib/"));
    let point = pull_sync_point(&fx.weld, &lib(), false).unwrap();
    assert_eq!(point.seams.len(), 2);
}

#[test]
fn push_without_weld_changes_has_nothing_to_do() {
    let fx = Fixture::new();
    fx.pull(auto());

    let outcome = push::start(&fx.session(), &lib(), auto()).unwrap();
    assert!(outcome.message().contains("nothing to push"), "{outcome}");
    assert!(!fx.session().store.exists());
}

#[test]
fn push_before_any_pull_gives_up() {
    let fx = Fixture::new();
    let err = push::start(&fx.session(), &lib(), auto()).unwrap_err();
    assert!(err.is_user_error());
    assert!(err.to_string().contains("weld pull lib"));
}

#[test]
fn push_replays_weld_commits_into_the_mirror() {
    let fx = Fixture::new();
    fx.pull(auto());
    commit(&fx.weld, &[("vendor/lib/a.txt", "from the weld\n")], "weld: fix a");
    commit(&fx.weld, &[("unrelated.txt", "x\n")], "weld: unrelated");

    let outcome = push::start(&fx.session(), &lib(), auto()).unwrap();
    assert!(matches!(outcome, Outcome::Finished(_)), "{outcome:?}");

    let mirror = fx.mirror();
    assert_eq!(read(mirror.join("src/a.txt")), "from the weld\n");
    assert!(!mirror.join("unrelated.txt").exists());
    assert_eq!(git::current_branch(&mirror).unwrap().as_deref(), Some("main"));
    assert!(!git::branch_exists(&mirror, "weld-push-lib").unwrap());
    assert!(git::commit_message(&mirror, "HEAD").unwrap().contains("weld: fix a"));

    let pushed = latest_event(&fx.weld, &lib(), &[EventVerb::Pushed]).unwrap().unwrap();
    assert_eq!(
        pushed.event.data().map(|d| d.commit.clone()),
        Some(git::rev_parse(&mirror, "HEAD").unwrap())
    );

    let again = fx.pull(auto());
    assert!(again.message().contains("already up to date"), "{again}");
}

#[test]
fn pinned_base_cannot_be_pushed() {
    let fx = Fixture::new();
    let manifest = read(fx.weld.join(".weld/welded.yaml")).replace("branch: main", "tag: v1");
    write(&fx.weld, &[(".weld/welded.yaml", &manifest)]);
    commit(&fx.weld, &[], "weld: pin lib");

    let err = push::start(&fx.session(), &lib(), auto()).unwrap_err();
    assert!(err.to_string().contains("pinned"));
}

#[test]
fn push_abort_restores_the_mirror_and_leaves_the_weld() {
    let fx = Fixture::new();
    fx.pull(auto());
    let weld_head = commit(&fx.weld, &[("vendor/lib/a.txt", "from the weld\n")], "weld: fix a");
    let mirror_head = git::rev_parse(&fx.mirror(), "HEAD").unwrap();

    let outcome = push::start(&fx.session(), &lib(), SyncOptions::default()).unwrap();
    assert!(outcome.message().contains("waiting"), "{outcome}");
    assert_eq!(
        git::current_branch(&fx.mirror()).unwrap().as_deref(),
        Some("weld-push-lib")
    );
    workflow::invoke(&fx.session(), Verb::Step).unwrap();

    let outcome = workflow::invoke(&fx.session(), Verb::Abort).unwrap();
    assert!(matches!(outcome, Outcome::Aborted(_)), "{outcome:?}");
    assert_eq!(git::current_branch(&fx.mirror()).unwrap().as_deref(), Some("main"));
    assert_eq!(git::rev_parse(&fx.mirror(), "HEAD").unwrap(), mirror_head);
    assert!(!git::branch_exists(&fx.mirror(), "weld-push-lib").unwrap());
    assert!(!git::has_local_changes(&fx.mirror()).unwrap());
    assert_eq!(git::rev_parse(&fx.weld, "HEAD").unwrap(), weld_head);
    assert!(!fx.session().store.exists());
}

#[test]
fn push_halts_on_a_bad_patch_until_committed() {
    let fx = Fixture::new();
    resolved_by_hand(&fx);
    commit(&fx.weld, &[("vendor/lib/a.txt", "weld again\n")], "weld: edit a again");

    // The earlier weld edit replays cleanly; the later one expects the
    // hand-resolved text, which the base never had.
    let outcome = push::start(&fx.session(), &lib(), auto()).unwrap();
    assert!(matches!(outcome, Outcome::Halted(_)), "{outcome:?}");
    let bad = read(fx.weld.join(".weld/bad-patches/vendor-lib.patch"));
    assert!(bad.contains("src/a.txt"));
    assert_eq!(read(fx.mirror().join("src/a.txt")), "weld side\n");
    assert_eq!(legal_verbs(&fx), vec![Verb::Commit, Verb::Inspect, Verb::Abort]);

    write(&fx.mirror(), &[("src/a.txt", "weld again\n")]);
    let session = fx.session();
    workflow::invoke(&session, Verb::Commit).unwrap();

    let outcome = workflow::drive(&session).unwrap();
    assert!(matches!(outcome, Outcome::Halted(_)), "{outcome:?}");
    assert!(outcome.message().contains("src/a.txt"));
    run_git_sync(&fx.mirror(), &["add", "src/a.txt"]).unwrap();
    run_git_sync(&fx.mirror(), &["commit", "-q", "--no-edit"]).unwrap();

    let outcome = workflow::invoke(&session, Verb::Finish).unwrap();
    assert!(matches!(outcome, Outcome::Finished(_)), "{outcome:?}");
    assert_eq!(read(fx.mirror().join("src/a.txt")), "weld again\n");
    assert!(git::commit_message(&fx.mirror(), "HEAD^2")
        .unwrap()
        .contains("weld: edit a again"));
    assert!(latest_event(&fx.weld, &lib(), &[EventVerb::Pushed]).unwrap().is_some());
}

#[test]
fn push_includes_weld_edits_made_before_the_last_pull() {
    let fx = Fixture::new();
    fx.pull(auto());
    commit(&fx.weld, &[("vendor/lib/a.txt", "from the weld\n")], "weld: fix a");
    commit(&fx.lib, &[("src/b.txt", "bee\n")], "lib: add b");
    let outcome = fx.pull(auto());
    assert!(matches!(outcome, Outcome::Finished(_)), "{outcome:?}");

    let outcome = push::start(&fx.session(), &lib(), auto()).unwrap();
    assert!(matches!(outcome, Outcome::Finished(_)), "{outcome:?}");
    assert!(outcome.message().contains("pushed 1 weld commit(s)"), "{outcome}");

    let mirror = fx.mirror();
    assert_eq!(read(mirror.join("src/a.txt")), "from the weld\n");
    assert_eq!(read(mirror.join("src/b.txt")), "bee\n");
}
