//! End-to-end tests: two agents, each with its own git working copy, sharing
//! one in-process store.
//!
//! Each agent diffs a real throwaway repository, publishes its edit-set and
//! reports overlaps with the other agent to its own output buffer.

use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use git2::{IndexAddOption, Repository, RepositoryInitOptions, Signature};
use tempfile::TempDir;

use mergewarn_core::agent::{Agent, AgentStats};
use mergewarn_core::config::AppConfig;
use mergewarn_core::errors::CoreError;
use mergewarn_core::shutdown;
use mergewarn_core::store::{MemoryStore, SharedStore};
use mergewarn_core::EditSet;

// ===========================================================================
// Helpers
// ===========================================================================

const BASE: &str = "line 1\nline 2\nline 3\nline 4\nline 5\nline 6\nline 7\nline 8\nline 9\nline 10\n";

/// Clone of the shared base: `a.txt` committed on `master`.
fn working_copy() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    let mut opts = RepositoryInitOptions::new();
    opts.initial_head("master");
    let repo = Repository::init_opts(dir.path(), &opts).unwrap();
    std::fs::write(dir.path().join("a.txt"), BASE).unwrap();

    let mut index = repo.index().unwrap();
    index.add_all(["*"].iter(), IndexAddOption::DEFAULT, None).unwrap();
    index.write().unwrap();
    let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
    let sig = Signature::now("Test", "test@example.com").unwrap();
    repo.commit(Some("HEAD"), &sig, &sig, "initial", &tree, &[])
        .unwrap();
    dir
}

/// Rewrite the given 1-based lines of `a.txt`.
fn edit_lines(dir: &Path, lines: &[usize]) {
    let edited: String = BASE
        .lines()
        .enumerate()
        .map(|(i, l)| {
            if lines.contains(&(i + 1)) {
                format!("{} edited\n", l)
            } else {
                format!("{}\n", l)
            }
        })
        .collect();
    std::fs::write(dir.join("a.txt"), edited).unwrap();
}

#[derive(Clone, Default)]
struct Output(Arc<Mutex<Vec<u8>>>);

impl Output {
    fn lines(&self) -> Vec<String> {
        String::from_utf8(self.0.lock().unwrap().clone())
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }
}

impl Write for Output {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn config(participant: &str, dir: &Path) -> AppConfig {
    let mut config = AppConfig::default();
    config.agent.participant = Some(participant.into());
    config.agent.poll_interval_secs = 1;
    config.repo.path = dir.to_path_buf();
    config
}

/// Run two agents against one store for `run_for`, then stop them both.
async fn run_pair(
    alice: (AppConfig, Output),
    bob: (AppConfig, Output),
    store: &MemoryStore,
    run_for: Duration,
) -> Vec<Result<AgentStats, CoreError>> {
    let (trigger, shutdown) = shutdown::channel();
    let mut handles = Vec::new();
    for (config, out) in [alice, bob] {
        let agent = Agent::with_writer(config, Arc::new(store.clone()), out).unwrap();
        handles.push(tokio::spawn(agent.run(shutdown.clone())));
    }

    tokio::time::sleep(run_for).await;
    trigger.trigger();

    let mut results = Vec::new();
    for handle in handles {
        let joined = tokio::time::timeout(Duration::from_secs(10), handle)
            .await
            .expect("agent did not stop");
        results.push(joined.unwrap());
    }
    results
}

// ===========================================================================
// Tests
// ===========================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_overlapping_edits_are_reported_to_both_sides() {
    let alice_dir = working_copy();
    let bob_dir = working_copy();
    edit_lines(alice_dir.path(), &[3, 7]);
    edit_lines(bob_dir.path(), &[7, 9]);

    let store = MemoryStore::new();
    let alice_out = Output::default();
    let bob_out = Output::default();
    let results = run_pair(
        (config("alice", alice_dir.path()), alice_out.clone()),
        (config("bob", bob_dir.path()), bob_out.clone()),
        &store,
        Duration::from_millis(1500),
    )
    .await;
    for result in results {
        let stats = result.unwrap();
        assert_eq!(stats.publish.published, 1);
        assert_eq!(stats.publish.total_errors, 0);
    }

    // Both edit-sets landed in the store under their own keys.
    let stored = store.get_all().await.unwrap();
    let alice = EditSet::from_wire("alice", &stored["alice"]).unwrap();
    let bob = EditSet::from_wire("bob", &stored["bob"]).unwrap();
    assert_eq!(alice.entries["a.txt"], vec![3, 7]);
    assert_eq!(bob.entries["a.txt"], vec![7, 9]);
    assert_eq!(alice.branch.as_deref(), Some("master"));

    let expect_bob = "|[{\"peer\":\"bob\",\"file\":\"a.txt\",\"line\":7}]";
    let expect_alice = "|[{\"peer\":\"alice\",\"file\":\"a.txt\",\"line\":7}]";
    assert!(
        alice_out.lines().iter().any(|l| l.ends_with(expect_bob)),
        "alice output: {:?}",
        alice_out.lines()
    );
    assert!(
        bob_out.lines().iter().any(|l| l.ends_with(expect_alice)),
        "bob output: {:?}",
        bob_out.lines()
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_disjoint_edits_report_once_and_stay_quiet() {
    let alice_dir = working_copy();
    let bob_dir = working_copy();
    edit_lines(alice_dir.path(), &[2]);
    edit_lines(bob_dir.path(), &[9]);

    let store = MemoryStore::new();
    let alice_out = Output::default();
    let bob_out = Output::default();
    let results = run_pair(
        (config("alice", alice_dir.path()), alice_out.clone()),
        (config("bob", bob_dir.path()), bob_out.clone()),
        &store,
        Duration::from_millis(1500),
    )
    .await;
    for result in results {
        assert!(result.is_ok());
    }

    // First evaluation is always written; later empty results are not.
    for out in [alice_out, bob_out] {
        let lines = out.lines();
        assert_eq!(lines.len(), 1, "output: {:?}", lines);
        assert!(lines[0].ends_with("|[]"));
    }
}
