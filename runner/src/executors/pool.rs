use super::ExecutorError;
use nix::{
    errno::Errno,
    sys::signal::{killpg, Signal},
    unistd::Pid,
};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::{
    collections::BTreeSet,
    env,
    ffi::OsString,
    io::BufReader,
    os::unix::process::CommandExt,
    path::PathBuf,
    process::{Child, ChildStdin, ChildStdout, Command, Stdio},
    sync::atomic::{AtomicBool, Ordering},
    time::{Duration, Instant},
};
use tracing::{debug, trace, warn};
use wait_timeout::ChildExt;

/// process groups of all live workers in this process, keyed by the pid of the worker
static LIVE_GROUPS: Lazy<Mutex<BTreeSet<i32>>> = Lazy::new(|| Mutex::new(BTreeSet::new()));
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Stop all worker pools of this process.
///
/// Every live worker group receives SIGTERM, dispatches still running fail with
/// `ExecutorError::Interrupted` and no new pool can be started afterwards.
pub fn interrupt() {
    INTERRUPTED.store(true, Ordering::SeqCst);

    for group in LIVE_GROUPS.lock().iter() {
        signal_group(*group, Signal::SIGTERM);
    }
}

pub fn interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

fn signal_group(group: i32, signal: Signal) {
    match killpg(Pid::from_raw(group), signal) {
        Ok(()) => trace!(group, signal = ?signal, "Signalled worker group"),
        Err(Errno::ESRCH) => {}
        Err(errno) => debug!(group, errno = ?errno, "Failed to signal worker group"),
    }
}

/// Program and leading arguments used to start a worker process
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    program: PathBuf,
    args: Vec<OsString>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// re-execute the running binary
    pub fn current_exe() -> Result<Self, ExecutorError> {
        env::current_exe()
            .map(Self::new)
            .map_err(ExecutorError::CurrentExe)
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            // anything the worker starts stays in its group and goes down with it
            .process_group(0);

        command
    }
}

/// Parent side of a single worker process, owned by exactly one feeder thread
#[derive(Debug)]
pub struct WorkerHandle {
    pub id: usize,
    pub pid: u32,
    pub stdin: ChildStdin,
    pub stdout: BufReader<ChildStdout>,
}

/// Fixed set of worker processes, reaped on `shutdown` or at the latest on drop
#[derive(Debug)]
pub struct WorkerPool {
    children: Mutex<Vec<Child>>,
    grace: Duration,
}

impl WorkerPool {
    /// spawn `size` workers, nothing is left running if any of them fails to start
    pub fn spawn(
        command: &WorkerCommand,
        size: usize,
        grace: Duration,
    ) -> Result<(Self, Vec<WorkerHandle>), ExecutorError> {
        let pool = Self {
            children: Mutex::new(Vec::with_capacity(size)),
            grace,
        };
        let mut handles = Vec::with_capacity(size);

        for id in 0..size {
            let mut child = command
                .command()
                .spawn()
                .map_err(|source| ExecutorError::Spawn {
                    program: command.program.clone(),
                    source,
                })?;
            let pid = child.id();
            let pipes = (child.stdin.take(), child.stdout.take());

            pool.children.lock().push(child);
            LIVE_GROUPS.lock().insert(pid as i32);

            if interrupted() {
                return Err(ExecutorError::Interrupted);
            }

            match pipes {
                (Some(stdin), Some(stdout)) => {
                    debug!(worker = id, pid, "Spawned worker process");

                    handles.push(WorkerHandle {
                        id,
                        pid,
                        stdin,
                        stdout: BufReader::new(stdout),
                    });
                }
                _ => return Err(ExecutorError::MissingPipes { pid }),
            }
        }

        Ok((pool, handles))
    }

    pub fn pids(&self) -> Vec<u32> {
        self.children.lock().iter().map(Child::id).collect()
    }

    /// Wait for all workers to exit and reap them.
    ///
    /// With `terminate` the process group of every worker receives SIGTERM first, which
    /// also reaches processes the worker started. Groups that outlive the grace period
    /// are killed.
    pub fn shutdown(&self, terminate: bool) {
        let mut children = self.children.lock();

        if children.is_empty() {
            return;
        }

        if terminate {
            for child in children.iter() {
                signal_group(child.id() as i32, Signal::SIGTERM);
            }
        }

        let deadline = Instant::now() + self.grace;

        for mut child in children.drain(..) {
            let pid = child.id();
            let remaining = deadline.saturating_duration_since(Instant::now());

            match child.wait_timeout(remaining) {
                Ok(Some(status)) => trace!(pid, status = ?status, "Worker exited"),
                Ok(None) | Err(_) => {
                    warn!(pid, "Worker did not exit within {:?}, killing it", self.grace);

                    signal_group(pid as i32, Signal::SIGKILL);
                    if let Err(error) = child.kill() {
                        debug!(pid, error = ?error, "Failed to kill worker");
                    }
                    if let Err(error) = child.wait() {
                        warn!(pid, error = ?error, "Failed to reap worker");
                    }
                }
            }

            // leftovers of an interrupted unit, the worker itself is reaped already
            if terminate {
                signal_group(pid as i32, Signal::SIGKILL);
            }
            LIVE_GROUPS.lock().remove(&(pid as i32));
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown(true);
    }
}
