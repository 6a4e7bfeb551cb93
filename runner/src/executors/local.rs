use super::{
    pool::{interrupted, WorkerCommand, WorkerHandle, WorkerPool},
    progress::Progress,
    protocol::{Outcome, Request, Response},
    ExecutorError,
};
use crate::experiments::Experiment;
use parking_lot::Mutex;
use std::{
    collections::{BTreeMap, VecDeque},
    io::{BufRead, Write},
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Receiver, Sender},
    },
    thread,
    time::Duration,
};
use tracing::{debug, info, instrument, trace, warn};

pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// resolve the number of worker processes, defaulting to the logical cpus of the host
pub fn resolve_processes(processes: Option<usize>) -> Result<usize, ExecutorError> {
    match processes {
        Some(0) => Err(ExecutorError::InvalidProcessCount),
        Some(number) => Ok(number),
        None => Ok(num_cpus::get()),
    }
}

/// Executor that maps an experiment over a local pool of worker processes
#[derive(Debug, Clone)]
pub struct LocalExecutor {
    command: WorkerCommand,
    processes: usize,
    grace: Duration,
}

/// result of one unit as seen by a feeder thread, the raw response line on success
#[derive(Debug)]
struct Completion {
    seq: usize,
    result: Result<String, ExecutorError>,
}

/// Buffers out-of-order completions and releases them in submission order
#[derive(Debug)]
pub(crate) struct Reorder<T> {
    next: usize,
    total: usize,
    pending: BTreeMap<usize, T>,
}

impl<T> Reorder<T> {
    pub fn new(total: usize) -> Self {
        Self {
            next: 0,
            total,
            pending: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, seq: usize, value: T) {
        self.pending.insert(seq, value);
    }

    /// next value in submission order, if it already arrived
    pub fn pop(&mut self) -> Option<(usize, T)> {
        let value = self.pending.remove(&self.next)?;
        let seq = self.next;
        self.next += 1;

        Some((seq, value))
    }

    pub fn released(&self) -> usize {
        self.next
    }

    pub fn is_done(&self) -> bool {
        self.next >= self.total
    }
}

/// tears the pool down before the surrounding scope joins the feeders on error or unwind
struct Teardown<'a> {
    pool: &'a WorkerPool,
    cancelled: &'a AtomicBool,
}

impl Drop for Teardown<'_> {
    fn drop(&mut self) {
        if thread::panicking() || self.cancelled.load(Ordering::SeqCst) {
            self.cancelled.store(true, Ordering::SeqCst);
            self.pool.shutdown(true);
        }
    }
}

impl LocalExecutor {
    pub fn new(command: WorkerCommand, processes: Option<usize>) -> Result<Self, ExecutorError> {
        Ok(Self {
            command,
            processes: resolve_processes(processes)?,
            grace: DEFAULT_SHUTDOWN_GRACE,
        })
    }

    /// how long workers get to exit on their own before they are killed
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn processes(&self) -> usize {
        self.processes
    }

    /// Run `run_fn` once per item on the worker pool.
    ///
    /// Results are consumed in the order of `items`, regardless of which worker finishes
    /// first. Returns once every unit finished, or with the first error met in that order.
    /// The pool is gone by the time this returns, on every path.
    #[instrument(skip_all, fields(experiment = E::NAME, units = items.len(), processes = self.processes))]
    pub fn map<E, P>(&self, run_fn: &E, items: &[E::Input], progress: &mut P) -> Result<(), ExecutorError>
    where
        E: Experiment,
        P: Progress,
    {
        let queue = items
            .iter()
            .enumerate()
            .map(|(seq, input)| {
                serde_json::to_string(&Request { seq, input })
                    .map(|line| (seq, line))
                    .map_err(ExecutorError::Serialize)
            })
            .collect::<Result<VecDeque<_>, _>>()?;

        progress.start(items.len(), self.processes);

        if items.is_empty() {
            progress.finish();

            return Ok(());
        }

        if interrupted() {
            progress.abandon();

            return Err(ExecutorError::Interrupted);
        }

        let command = self
            .command
            .clone()
            .arg("worker")
            .arg(E::NAME)
            .args(run_fn.worker_args());
        let (pool, workers) = WorkerPool::spawn(&command, self.processes.min(items.len()), self.grace)?;
        debug!(pids = ?pool.pids(), "Worker pool started");

        let queue = Mutex::new(queue);
        let cancelled = AtomicBool::new(false);
        let (sender, receiver) = mpsc::channel();

        let result = thread::scope(|scope| {
            let _teardown = Teardown {
                pool: &pool,
                cancelled: &cancelled,
            };

            for worker in workers {
                let sender = sender.clone();
                let queue = &queue;
                let cancelled = &cancelled;

                scope.spawn(move || feed(worker, queue, cancelled, sender));
            }
            drop(sender);

            let result = consume::<E, P>(items, receiver, &mut *progress);

            if result.is_err() {
                cancelled.store(true, Ordering::SeqCst);
            }

            result
        });

        pool.shutdown(false);

        // workers killed from outside surface as lost workers
        let result = match result {
            Err(_) if interrupted() => Err(ExecutorError::Interrupted),
            result => result,
        };

        match &result {
            Ok(()) => {
                progress.finish();
                info!("Done with processing");
            }
            Err(error) => {
                progress.abandon();
                warn!("Stopped dispatch: {error}");
            }
        }

        result
    }
}

/// hand units from the shared queue to one worker until the queue runs dry
fn feed(
    mut worker: WorkerHandle,
    queue: &Mutex<VecDeque<(usize, String)>>,
    cancelled: &AtomicBool,
    sender: Sender<Completion>,
) {
    let mut line = String::new();

    while !cancelled.load(Ordering::SeqCst) {
        let Some((seq, request)) = queue.lock().pop_front() else {
            break;
        };
        trace!(worker = worker.id, seq, "Dispatching unit");

        line.clear();
        let received = writeln!(worker.stdin, "{request}")
            .and_then(|()| worker.stdin.flush())
            .and_then(|()| worker.stdout.read_line(&mut line));

        let result = match received {
            Ok(0) => Err(ExecutorError::WorkerExited {
                worker: worker.id,
                pid: worker.pid,
            }),
            Ok(_) => Ok(line.trim_end().to_owned()),
            Err(error) => {
                debug!(worker = worker.id, error = ?error, "Lost connection to worker");

                Err(ExecutorError::WorkerExited {
                    worker: worker.id,
                    pid: worker.pid,
                })
            }
        };
        let failed = result.is_err();

        if sender.send(Completion { seq, result }).is_err() || failed {
            break;
        }
    }

    // dropping the handle closes stdin, which ends the serve loop of the worker
    debug!(worker = worker.id, "Feeder done");
}

/// consume completions in submission order and report each one
fn consume<E, P>(
    items: &[E::Input],
    receiver: Receiver<Completion>,
    progress: &mut P,
) -> Result<(), ExecutorError>
where
    E: Experiment,
    P: Progress,
{
    let mut reorder = Reorder::new(items.len());

    while !reorder.is_done() {
        let Some((index, completion)) = reorder.pop() else {
            match receiver.recv() {
                Ok(completion) => {
                    reorder.insert(completion.seq, completion.result);

                    continue;
                }
                Err(_) => {
                    return Err(ExecutorError::PoolExhausted {
                        completed: reorder.released(),
                        total: items.len(),
                    })
                }
            }
        };

        let line = completion?;
        let response: Response<E::Output> =
            serde_json::from_str(&line).map_err(|source| ExecutorError::Protocol {
                seq: index,
                source,
            })?;

        if response.seq != index {
            return Err(ExecutorError::SequenceMismatch {
                expected: index,
                received: response.seq,
            });
        }

        match response.outcome {
            Outcome::Ok(output) => progress.advance(&output.to_string()),
            Outcome::Err(message) => {
                return Err(ExecutorError::UnitFailed {
                    index,
                    unit: items[index].to_string(),
                    message,
                })
            }
        }
    }

    Ok(())
}

#[cfg(test)]
#[path = "local_test.rs"]
mod local_test;
