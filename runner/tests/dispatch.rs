use nix::{
    errno::Errno,
    sys::signal::{kill, Signal},
    unistd::Pid,
};
use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
    path::Path,
    process::Command,
    thread,
    time::{Duration, Instant},
};
use testbed_runner::{
    executors::{ExecutorError, LocalExecutor, Progress, WorkerCommand},
    experiments::probe::Probe,
};

const TESTBED: &str = env!("CARGO_BIN_EXE_testbed");

#[derive(Debug, Default)]
struct Recorder {
    started: Option<(usize, usize)>,
    finished: Vec<String>,
    done: bool,
    abandoned: bool,
}

impl Progress for Recorder {
    fn start(&mut self, units: usize, processes: usize) {
        self.started = Some((units, processes));
    }

    fn advance(&mut self, last_finished: &str) {
        self.finished.push(last_finished.to_string());
    }

    fn finish(&mut self) {
        self.done = true;
    }

    fn abandon(&mut self) {
        self.abandoned = true;
    }
}

fn executor(processes: Option<usize>) -> LocalExecutor {
    LocalExecutor::new(WorkerCommand::new(TESTBED), processes)
        .unwrap()
        .with_shutdown_grace(Duration::from_millis(500))
}

fn units(count: usize) -> Vec<String> {
    (0..count).map(|index| format!("unit/{index}")).collect()
}

/// (pid, input) for every recorded invocation
fn ledger(path: &Path) -> Vec<(i32, String)> {
    fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .map(|line| {
            let (pid, input) = line.split_once('\t').unwrap();
            (pid.parse().unwrap(), input.to_string())
        })
        .collect()
}

fn assert_gone(pid: i32) {
    assert_eq!(
        kill(Pid::from_raw(pid), None),
        Err(Errno::ESRCH),
        "worker {pid} survived the dispatch"
    );
}

#[test]
fn every_unit_runs_exactly_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.tsv");
    let items = units(24);
    let mut progress = Recorder::default();

    executor(Some(4))
        .map(&Probe::default().with_ledger(&path), &items, &mut progress)
        .unwrap();

    let mut invocations: BTreeMap<String, usize> = BTreeMap::new();
    for (_, input) in ledger(&path) {
        *invocations.entry(input).or_default() += 1;
    }

    assert_eq!(invocations.len(), items.len());
    assert!(invocations.values().all(|count| *count == 1));
    assert_eq!(progress.started, Some((24, 4)));
    assert_eq!(progress.finished, items);
    assert!(progress.done);
    assert!(!progress.abandoned);
}

#[test]
fn progress_follows_submission_order() {
    let items = units(6);
    // the first units finish last
    let probe = Probe::default()
        .with_delay("unit/0", 600)
        .with_delay("unit/1", 400)
        .with_delay("unit/2", 200);
    let mut progress = Recorder::default();

    executor(Some(3)).map(&probe, &items, &mut progress).unwrap();

    assert_eq!(progress.finished, items);
}

#[test]
fn single_process_keeps_the_same_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.tsv");
    let items = units(5);
    let probe = Probe::default()
        .with_delay("unit/1", 100)
        .with_ledger(&path);
    let mut progress = Recorder::default();

    executor(Some(1)).map(&probe, &items, &mut progress).unwrap();

    assert_eq!(progress.started, Some((5, 1)));
    assert_eq!(progress.finished, items);

    let invocations = ledger(&path);
    let pids: BTreeSet<i32> = invocations.iter().map(|(pid, _)| *pid).collect();
    assert_eq!(invocations.len(), 5);
    assert_eq!(pids.len(), 1);
}

#[test]
fn empty_input_runs_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.tsv");
    let mut progress = Recorder::default();

    executor(Some(2))
        .map(&Probe::default().with_ledger(&path), &[], &mut progress)
        .unwrap();

    assert!(!path.exists());
    assert_eq!(progress.started, Some((0, 2)));
    assert!(progress.finished.is_empty());
    assert!(progress.done);
}

#[test]
fn process_count_defaults_to_logical_cpus() {
    assert_eq!(executor(None).processes(), num_cpus::get());
    assert_eq!(executor(Some(3)).processes(), 3);
}

#[test]
fn failing_unit_stops_dispatch_without_leaking_workers() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.tsv");
    let items = units(12);
    let probe = items
        .iter()
        .fold(Probe::default().with_ledger(&path), |probe, item| {
            probe.with_delay(item.clone(), 150)
        })
        .with_failure("unit/3");
    let mut progress = Recorder::default();

    let result = executor(Some(4)).map(&probe, &items, &mut progress);

    match result {
        Err(ExecutorError::UnitFailed {
            index,
            unit,
            message,
        }) => {
            assert_eq!(index, 3);
            assert_eq!(unit, "unit/3");
            assert!(message.contains("unit/3"));
        }
        other => panic!("expected the unit to fail, got {other:?}"),
    }

    assert_eq!(progress.finished, units(3));
    assert!(progress.abandoned);
    assert!(!progress.done);

    let invocations = ledger(&path);
    assert!(!invocations.is_empty());
    for (pid, _) in invocations {
        assert_gone(pid);
    }
}

#[test]
fn terminating_the_dispatcher_stops_its_workers() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.tsv");

    let mut dispatcher = Command::new(TESTBED)
        .args(["probe", "a", "b", "--processes", "2"])
        .args(["--delay", "a=5000", "--delay", "b=5000", "--ledger"])
        .arg(&path)
        .spawn()
        .unwrap();

    // both workers are inside their unit once both are in the ledger
    let deadline = Instant::now() + Duration::from_secs(5);
    while ledger(&path).len() < 2 {
        assert!(Instant::now() < deadline, "workers never started");
        thread::sleep(Duration::from_millis(20));
    }

    kill(Pid::from_raw(dispatcher.id() as i32), Signal::SIGTERM).unwrap();
    let status = dispatcher.wait().unwrap();

    assert_eq!(status.code(), Some(1));
    for (pid, _) in ledger(&path) {
        assert_gone(pid);
    }
}

#[test]
fn worker_exiting_early_is_reported() {
    // `worker probe` ends up as positional arguments of the script
    let command = WorkerCommand::new("/bin/sh").arg("-c").arg("exit 0");
    let executor = LocalExecutor::new(command, Some(2)).unwrap();

    let result = executor.map(&Probe::default(), &units(4), &mut ());

    assert!(matches!(result, Err(ExecutorError::WorkerExited { .. })));
}

#[test]
fn garbled_responses_are_rejected() {
    // echoing the request back is not a valid response
    let command = WorkerCommand::new("/bin/sh").arg("-c").arg("exec cat");
    let executor = LocalExecutor::new(command, Some(1)).unwrap();

    let result = executor.map(&Probe::default(), &units(2), &mut ());

    assert!(matches!(result, Err(ExecutorError::Protocol { seq: 0, .. })));
}

#[test]
fn probe_command_reports_failures_with_exit_status() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.tsv");

    let status = Command::new(TESTBED)
        .args(["probe", "a", "b", "c", "--processes", "2", "--ledger"])
        .arg(&path)
        .status()
        .unwrap();
    assert!(status.success());
    assert_eq!(ledger(&path).len(), 3);

    let status = Command::new(TESTBED)
        .args(["probe", "a", "b", "--fail", "b", "--delay", "a=50"])
        .status()
        .unwrap();
    assert_eq!(status.code(), Some(1));

    let status = Command::new(TESTBED)
        .args(["probe", "a", "--processes", "0"])
        .status()
        .unwrap();
    assert_eq!(status.code(), Some(1));
}

#[test]
fn catalog_commands_print_yaml() {
    let output = Command::new(TESTBED).args(["sweep", "knn"]).output().unwrap();
    assert!(output.status.success());

    let catalog: serde_yaml::Value = serde_yaml::from_slice(&output.stdout).unwrap();
    assert_eq!(catalog["agent"].as_str(), Some("knn"));
    assert_eq!(catalog["sweep"].as_sequence().map(Vec::len), Some(12));

    let output = Command::new(TESTBED).arg("datasets").output().unwrap();
    assert!(output.status.success());

    let datasets: serde_yaml::Value = serde_yaml::from_slice(&output.stdout).unwrap();
    assert_eq!(datasets["emnist/digits"]["num_classes"].as_u64(), Some(10));
    assert_eq!(datasets["kin8nm"]["kind"].as_str(), Some("regression"));

    let output = Command::new(TESTBED)
        .args(["datasets", "--kind", "image", "--original"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let names: Vec<String> = serde_yaml::from_slice(&output.stdout).unwrap();
    assert_eq!(names, ["cifar10", "fashion_mnist", "mnist"]);

    let output = Command::new(TESTBED)
        .args(["datasets", "--settings"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let settings: serde_yaml::Value = serde_yaml::from_slice(&output.stdout).unwrap();
    assert_eq!(settings.as_sequence().map(Vec::len), Some(25));
}
