//! Lifecycle controller.
//!
//! A [`CompositorSession`] owns one dedicated GPU thread fed by a task queue.
//! `start` and `stop` post a single task and block on a one-shot reply; frame
//! notifications from producers go through the same queue, which serialises
//! every GPU call on that thread.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use tracing::{debug, error, info, warn};

use crate::backend::BackendFactory;
use crate::compositor::CompositePlan;
use crate::config::CompositorConfig;
use crate::error::{CompositorError, InitStage, Result};
use crate::ingest::{InputEndpoints, SessionStats, SharedState, SourceInput};
use crate::runtime::{BoxedClock, MonotonicClock, RenderGate, RenderLoop};
use crate::types::{Size, SourceRole};

pub(crate) enum GpuTask {
    Start {
        config: CompositorConfig,
        factory: Box<dyn BackendFactory>,
        clock: BoxedClock,
        shared: Arc<SharedState>,
        reply: Sender<Result<()>>,
    },
    FrameReady(SourceRole),
    Stop {
        reply: Sender<()>,
    },
    Shutdown,
}

/// Handle to the GPU thread and, while started, the running session.
pub struct CompositorSession {
    tasks: Sender<GpuTask>,
    faults: Receiver<CompositorError>,
    join_handle: Option<JoinHandle<()>>,
    active: Option<Arc<SharedState>>,
}

impl CompositorSession {
    /// Spawns the GPU thread. No GPU work happens until [`start`](Self::start).
    pub fn new() -> Result<Self> {
        let (task_tx, task_rx) = unbounded();
        let (fault_tx, fault_rx) = unbounded();
        let handle = thread::Builder::new()
            .name("compositor-gpu".into())
            .spawn(move || run_gpu_thread(task_rx, fault_tx))
            .map_err(|err| {
                CompositorError::init(
                    InitStage::Thread,
                    format!("failed to spawn GPU thread: {err}"),
                )
            })?;

        Ok(Self {
            tasks: task_tx,
            faults: fault_rx,
            join_handle: Some(handle),
            active: None,
        })
    }

    /// Starts a session with the default layout for the given sizes.
    pub fn start_with_sizes(
        &mut self,
        primary: Size,
        secondary: Size,
        output: Size,
        factory: impl BackendFactory + 'static,
    ) -> Result<InputEndpoints> {
        self.start(CompositorConfig::with_sizes(primary, secondary, output), factory)
    }

    /// Initializes the backend on the GPU thread and waits for it.
    ///
    /// Initialization and shader errors from the backend come back here as
    /// the typed error; nothing is left allocated when this fails.
    pub fn start(
        &mut self,
        config: CompositorConfig,
        factory: impl BackendFactory + 'static,
    ) -> Result<InputEndpoints> {
        self.start_with_clock(config, factory, Box::new(MonotonicClock::new()))
    }

    /// Like [`start`](Self::start) with a caller-supplied presentation clock.
    pub fn start_with_clock(
        &mut self,
        config: CompositorConfig,
        factory: impl BackendFactory + 'static,
        clock: BoxedClock,
    ) -> Result<InputEndpoints> {
        if self.active.is_some() {
            return Err(CompositorError::AlreadyStarted);
        }
        config.validate()?;

        let shared = Arc::new(SharedState::new(&config));
        let (reply_tx, reply_rx) = bounded(1);
        self.tasks
            .send(GpuTask::Start {
                config,
                factory: Box::new(factory),
                clock,
                shared: Arc::clone(&shared),
                reply: reply_tx,
            })
            .map_err(|_| CompositorError::init(InitStage::Thread, "GPU thread is not running"))?;

        reply_rx.recv().map_err(|err| {
            CompositorError::init(
                InitStage::Thread,
                format!("GPU thread failed to initialise: {err}"),
            )
        })??;

        self.active = Some(Arc::clone(&shared));
        Ok(InputEndpoints {
            primary: SourceInput::new(SourceRole::Primary, Arc::clone(&shared), self.tasks.clone()),
            secondary: SourceInput::new(SourceRole::Secondary, shared, self.tasks.clone()),
        })
    }

    /// Tears the running session down on the GPU thread and waits for it.
    ///
    /// Safe to call repeatedly and before any `start`; without a running
    /// session it returns immediately.
    pub fn stop(&mut self) -> Result<()> {
        let Some(shared) = self.active.take() else {
            return Ok(());
        };
        shared.request_stop();

        let (reply_tx, reply_rx) = bounded(1);
        if self.tasks.send(GpuTask::Stop { reply: reply_tx }).is_err() || reply_rx.recv().is_err() {
            warn!("GPU thread exited before teardown completed");
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.active.is_some()
    }

    /// Counters of the running session, if any.
    pub fn stats(&self) -> Option<SessionStats> {
        self.active.as_ref().map(|shared| shared.stats())
    }

    /// Fatal steady-state errors raised on the GPU thread.
    ///
    /// After a fault the session ignores further frames; call
    /// [`stop`](Self::stop) to release it.
    pub fn faults(&self) -> &Receiver<CompositorError> {
        &self.faults
    }
}

impl Drop for CompositorSession {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            warn!(error = %err, "failed to stop compositor session");
        }
        if let Some(handle) = self.join_handle.take() {
            let _ = self.tasks.send(GpuTask::Shutdown);
            if handle.join().is_err() {
                error!("GPU thread panicked");
            }
        }
    }
}

fn run_gpu_thread(tasks: Receiver<GpuTask>, faults: Sender<CompositorError>) {
    let mut active: Option<RenderLoop> = None;

    for task in tasks.iter() {
        match task {
            GpuTask::Start {
                config,
                factory,
                clock,
                shared,
                reply,
            } => {
                let result = start_session(config, factory, clock, shared).map(|render_loop| {
                    active = Some(render_loop);
                });
                let _ = reply.send(result);
            }
            GpuTask::FrameReady(role) => {
                let Some(render_loop) = active.as_mut() else {
                    continue;
                };
                // A faulted session is marked stopping, so later frames are discarded.
                if let Err(err) = render_loop.handle_frame(role) {
                    error!(source = %role, error = %err, "compositor session faulted");
                    render_loop.shared().request_stop();
                    render_loop.shared().clear_slots();
                    let _ = faults.send(err);
                }
            }
            GpuTask::Stop { reply } => {
                if let Some(render_loop) = active.take() {
                    render_loop.shared().clear_slots();
                    let stats = render_loop.shared().stats();
                    drop(render_loop);
                    info!(
                        rendered = stats.rendered,
                        primary = stats.primary.uploaded,
                        secondary = stats.secondary.uploaded,
                        "compositor session stopped"
                    );
                }
                let _ = reply.send(());
            }
            GpuTask::Shutdown => break,
        }
    }
    debug!("GPU thread exiting");
}

fn start_session(
    config: CompositorConfig,
    factory: Box<dyn BackendFactory>,
    clock: BoxedClock,
    shared: Arc<SharedState>,
) -> Result<RenderLoop> {
    let plan = CompositePlan::from_config(&config);
    let backend = factory.create(&config, &plan)?;
    info!(
        primary = %config.primary.size,
        secondary = %config.secondary.size,
        output = %config.output,
        background = %config.layout.background,
        startup = ?config.startup,
        "compositor session started"
    );
    Ok(RenderLoop::new(
        backend,
        plan,
        RenderGate::new(config.startup, config.mandatory_source()),
        shared,
        clock,
        config.diagnostics_interval,
    ))
}
