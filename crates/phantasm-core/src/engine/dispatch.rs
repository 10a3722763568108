use super::backend::EngineFactory;
use super::config::{ClusterConfig, ExecutionMode};
use super::context::SimulationContext;
use super::error::EngineError;
use super::frame::{FrameResult, FrameTask};
use super::progress::Progress;
use super::sink::{ResultSink, check_shape};
use crossbeam_channel::{Receiver, Sender};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use tracing::{debug, info, instrument, warn};

/// A shared flag that tells running and queued frames to stop.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Checkpoint for frame `index`: fails with [`EngineError::Cancelled`] once cancelled.
    pub fn check(&self, index: usize) -> Result<(), EngineError> {
        if self.is_cancelled() {
            Err(EngineError::Cancelled { index })
        } else {
            Ok(())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Sequential,
    Pooled { max_workers: usize },
}

impl From<ClusterConfig> for RunMode {
    fn from(cluster: ClusterConfig) -> Self {
        match cluster.mode {
            ExecutionMode::Sequential => RunMode::Sequential,
            ExecutionMode::Pooled => RunMode::Pooled {
                max_workers: cluster.max_workers,
            },
        }
    }
}

impl RunMode {
    /// Number of workers used for `num_frames` frames, never less than one.
    pub fn workers_for(&self, num_frames: usize) -> usize {
        match *self {
            RunMode::Sequential => 1,
            RunMode::Pooled { max_workers } => max_workers.min(num_frames).max(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub frames_written: usize,
    pub workers: usize,
}

enum Outcome {
    Completed(FrameResult),
    Failed {
        index: Option<usize>,
        error: EngineError,
    },
    Skipped(usize),
}

/// Runs a [`FrameTask`] for every frame of a scan and stores the results in a sink.
///
/// Only the calling thread touches the sink. In pooled mode frames are written in the order
/// they complete, each into its own slot.
#[derive(Debug, Clone, Copy)]
pub struct Dispatcher {
    mode: RunMode,
}

impl Dispatcher {
    pub fn new(mode: RunMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> RunMode {
        self.mode
    }

    #[instrument(skip_all, name = "dispatcher", fields(mode = ?self.mode))]
    pub fn run<F, T, S>(
        &self,
        ctx: &SimulationContext<'_>,
        factory: &F,
        task: &T,
        sink: &mut S,
    ) -> Result<RunSummary, EngineError>
    where
        F: EngineFactory,
        T: FrameTask<F::Engine>,
        S: ResultSink + ?Sized,
    {
        check_shape(sink, ctx.output_shape())?;

        let total = ctx.num_frames();
        if total == 0 {
            return Ok(RunSummary {
                frames_written: 0,
                workers: 0,
            });
        }

        ctx.reporter.report(Progress::TaskStart {
            total_steps: total as u64,
        });
        let summary = match self.mode {
            RunMode::Sequential => run_sequential(ctx, factory, task, sink),
            RunMode::Pooled { .. } => {
                run_pooled(ctx, factory, task, sink, self.mode.workers_for(total))
            }
        }?;
        ctx.reporter.report(Progress::TaskFinish);
        Ok(summary)
    }
}

fn deliver<S: ResultSink + ?Sized>(
    ctx: &SimulationContext<'_>,
    sink: &mut S,
    result: FrameResult,
) -> Result<(), EngineError> {
    let FrameResult {
        index,
        angle,
        image,
    } = result;
    sink.write(index, angle, image.as_ref())
        .map_err(|e| EngineError::from(e).in_frame(index))?;
    info!("Finished frame {}/{}", index + 1, ctx.num_frames());
    ctx.reporter
        .report(Progress::FrameCompleted { index, angle });
    Ok(())
}

fn run_sequential<F, T, S>(
    ctx: &SimulationContext<'_>,
    factory: &F,
    task: &T,
    sink: &mut S,
) -> Result<RunSummary, EngineError>
where
    F: EngineFactory,
    T: FrameTask<F::Engine>,
    S: ResultSink + ?Sized,
{
    let total = ctx.num_frames();
    let aborted = |written: usize, cancelled: usize, source: EngineError| EngineError::RunAborted {
        written,
        total,
        cancelled,
        source: Box::new(source),
    };

    let mut engine = factory
        .create(&ctx.system)
        .map_err(|e| aborted(0, total, e.into()))?;
    let cancel = CancellationToken::new();

    for index in 0..total {
        let outcome = task
            .run(ctx, &mut engine, index, &cancel)
            .and_then(|result| deliver(ctx, sink, result));
        if let Err(e) = outcome {
            return Err(aborted(index, total - index - 1, e.in_frame(index)));
        }
    }

    Ok(RunSummary {
        frames_written: total,
        workers: 1,
    })
}

fn run_pooled<F, T, S>(
    ctx: &SimulationContext<'_>,
    factory: &F,
    task: &T,
    sink: &mut S,
    workers: usize,
) -> Result<RunSummary, EngineError>
where
    F: EngineFactory,
    T: FrameTask<F::Engine>,
    S: ResultSink + ?Sized,
{
    let total = ctx.num_frames();
    let cancel = CancellationToken::new();

    let (job_tx, job_rx) = crossbeam_channel::bounded::<usize>(total);
    for index in 0..total {
        job_tx
            .send(index)
            .map_err(|_| EngineError::Pool("job queue closed before submission".to_string()))?;
    }
    drop(job_tx);
    let (result_tx, result_rx) = crossbeam_channel::unbounded::<Outcome>();

    info!("Dispatching {} frames to {} workers.", total, workers);

    thread::scope(|scope| {
        let mut handles = Vec::with_capacity(workers);
        for worker in 0..workers {
            let jobs = job_rx.clone();
            let results = result_tx.clone();
            let cancel = &cancel;
            let spawned = thread::Builder::new()
                .name(worker_thread_name(worker))
                .spawn_scoped(scope, move || {
                    worker_loop(worker, ctx, factory, task, jobs, results, cancel)
                });
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    cancel.cancel();
                    let _ = result_tx.send(Outcome::Failed {
                        index: None,
                        error: EngineError::Pool(format!("failed to spawn worker {worker}: {e}")),
                    });
                    break;
                }
            }
        }
        drop(result_tx);

        let mut written = 0;
        let mut failed = 0;
        let mut skipped = 0;
        let mut root_cause: Option<EngineError> = None;

        for outcome in result_rx.iter() {
            match outcome {
                Outcome::Completed(result) => {
                    let index = result.index;
                    match deliver(ctx, sink, result) {
                        Ok(()) => written += 1,
                        Err(e) => {
                            cancel.cancel();
                            failed += 1;
                            warn!("Frame {} could not be stored; cancelling run.", index + 1);
                            root_cause.get_or_insert(e);
                        }
                    }
                }
                Outcome::Failed { error, .. } if error.is_cancellation() => skipped += 1,
                Outcome::Failed { index, error } => {
                    cancel.cancel();
                    let error = match index {
                        Some(index) => {
                            failed += 1;
                            warn!("Frame {} failed; cancelling run: {}", index + 1, error);
                            error.in_frame(index)
                        }
                        None => {
                            warn!("Worker failed to start; cancelling run: {}", error);
                            error
                        }
                    };
                    if root_cause.is_some() {
                        debug!("Additional failure after cancellation: {}", error);
                    } else {
                        root_cause = Some(error);
                    }
                }
                Outcome::Skipped(index) => {
                    debug!("Frame {} skipped after cancellation.", index + 1);
                    skipped += 1;
                }
            }
        }

        let mut panicked = 0;
        for handle in handles {
            if handle.join().is_err() {
                panicked += 1;
            }
        }
        if panicked > 0 && root_cause.is_none() {
            root_cause = Some(EngineError::Pool(format!(
                "{panicked} worker thread(s) panicked"
            )));
        }

        match root_cause {
            None if written == total => Ok(RunSummary {
                frames_written: written,
                workers,
            }),
            None => Err(EngineError::Pool(format!(
                "workers exited after writing {written} of {total} frames"
            ))),
            Some(source) => {
                debug!("Run aborted: {written} written, {failed} failed, {skipped} skipped.");
                Err(EngineError::RunAborted {
                    written,
                    total,
                    cancelled: total - written - failed,
                    source: Box::new(source),
                })
            }
        }
    })
}

/// Pool threads are named so log lines can be traced back to their worker.
pub fn worker_thread_name(worker: usize) -> String {
    format!("frame-worker-{worker}")
}

#[instrument(skip_all, name = "frame_worker", fields(worker = worker))]
fn worker_loop<F, T>(
    worker: usize,
    ctx: &SimulationContext<'_>,
    factory: &F,
    task: &T,
    jobs: Receiver<usize>,
    results: Sender<Outcome>,
    cancel: &CancellationToken,
) where
    F: EngineFactory,
    T: FrameTask<F::Engine>,
{
    let mut engine = match factory.create(&ctx.system) {
        Ok(engine) => engine,
        Err(e) => {
            cancel.cancel();
            let _ = results.send(Outcome::Failed {
                index: None,
                error: e.into(),
            });
            return;
        }
    };
    debug!("Worker {} ready.", worker);

    for index in jobs.iter() {
        let outcome = if cancel.is_cancelled() {
            Outcome::Skipped(index)
        } else {
            match task.run(ctx, &mut engine, index, cancel) {
                Ok(result) => Outcome::Completed(result),
                Err(error) => {
                    if !error.is_cancellation() {
                        cancel.cancel();
                    }
                    Outcome::Failed {
                        index: Some(index),
                        error,
                    }
                }
            }
        };
        if results.send(outcome).is_err() {
            break;
        }
    }
}
