use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::backend::{FrameOutcome, RenderBackend};
use crate::compositor::{CompositePlan, Residency};
use crate::error::Result;
use crate::ingest::SharedState;
use crate::types::{SourceRole, StartupPolicy};

/// Presentation timestamp attached to an output frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameStamp {
    /// Monotonic time since the session started.
    pub timestamp: Duration,
    /// Index of the composite within the session, starting at zero.
    pub frame_index: u64,
}

/// Where presentation timestamps come from.
///
/// Producer capture times are deliberately ignored: the two sources run on
/// unrelated clocks, so the composite is stamped when it is drawn.
pub trait PresentationClock: Send {
    /// Produces the stamp for the next composite.
    fn sample(&mut self) -> FrameStamp;
}

/// Clock backed by [`Instant`], starting at zero when created.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
    frame: u64,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
            frame: 0,
        }
    }
}

impl PresentationClock for MonotonicClock {
    fn sample(&mut self) -> FrameStamp {
        let stamp = FrameStamp {
            timestamp: self.origin.elapsed(),
            frame_index: self.frame,
        };
        self.frame = self.frame.saturating_add(1);
        stamp
    }
}

pub type BoxedClock = Box<dyn PresentationClock>;

/// Startup gate: decides whether enough sources are resident to draw.
#[derive(Debug, Clone, Copy)]
pub struct RenderGate {
    policy: StartupPolicy,
    mandatory: SourceRole,
    residency: Residency,
}

impl RenderGate {
    pub fn new(policy: StartupPolicy, mandatory: SourceRole) -> Self {
        Self {
            policy,
            mandatory,
            residency: Residency::default(),
        }
    }

    pub fn record_upload(&mut self, role: SourceRole) {
        self.residency.mark(role);
    }

    pub fn residency(&self) -> Residency {
        self.residency
    }

    pub fn ready(&self) -> bool {
        match self.policy {
            StartupPolicy::Strict => self.residency.contains(self.mandatory),
            StartupPolicy::BestEffort => self.residency.any(),
        }
    }
}

/// What a single render trigger ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderAttempt {
    /// The startup gate held the frame back.
    Withheld,
    Rendered(FrameStamp),
    /// The output declined the frame; freshness is left untouched.
    Skipped,
}

/// Everything the GPU thread owns for one running session.
pub(crate) struct RenderLoop {
    backend: Box<dyn RenderBackend>,
    plan: CompositePlan,
    gate: RenderGate,
    shared: Arc<SharedState>,
    clock: BoxedClock,
    diagnostics_interval: u64,
}

impl RenderLoop {
    pub(crate) fn new(
        backend: Box<dyn RenderBackend>,
        plan: CompositePlan,
        gate: RenderGate,
        shared: Arc<SharedState>,
        clock: BoxedClock,
        diagnostics_interval: u64,
    ) -> Self {
        Self {
            backend,
            plan,
            gate,
            shared,
            clock,
            diagnostics_interval,
        }
    }

    fn periodic(&self, count: u64) -> bool {
        self.diagnostics_interval > 0 && count % self.diagnostics_interval == 0
    }

    /// Uploads the parked frame for `role`, marks it fresh and tries to render.
    ///
    /// Malformed frames are logged and dropped; any other error is fatal for
    /// the session and returned to the caller.
    pub(crate) fn handle_frame(&mut self, role: SourceRole) -> Result<Option<RenderAttempt>> {
        if self.shared.is_stopping() {
            self.shared.clear_slots();
            return Ok(None);
        }
        let Some(frame) = self.shared.take_frame(role) else {
            return Ok(None);
        };

        match self.backend.upload(role, &frame) {
            Ok(()) => {}
            Err(err) if !err.is_fatal() => {
                self.shared.count_rejected(role);
                warn!(source = %role, error = %err, "dropping frame the backend rejected");
                return Ok(None);
            }
            Err(err) => return Err(err),
        }
        drop(frame);

        self.gate.record_upload(role);
        self.shared.mark_fresh(role);
        let count = self.shared.count_upload(role);
        if self.periodic(count) {
            info!(source = %role, frames = count, "source frames uploaded");
        }

        self.try_render().map(Some)
    }

    /// Composites whatever is resident, if the startup gate allows it.
    pub(crate) fn try_render(&mut self) -> Result<RenderAttempt> {
        if !self.gate.ready() {
            debug!(
                policy = ?self.gate.policy,
                mandatory = %self.gate.mandatory,
                "render withheld until the mandatory source delivers"
            );
            return Ok(RenderAttempt::Withheld);
        }

        let ops = self.plan.draw_ops(self.gate.residency());
        let stamp = self.clock.sample();
        match self.backend.render(&ops, stamp)? {
            FrameOutcome::Presented => {
                let [primary_fresh, secondary_fresh] = self.shared.take_fresh();
                let rendered = self.shared.count_rendered();
                debug!(
                    frame = stamp.frame_index,
                    timestamp_us = stamp.timestamp.as_micros() as u64,
                    primary_fresh,
                    secondary_fresh,
                    layers = ops.len(),
                    "composite presented"
                );
                if self.periodic(rendered) {
                    let stats = self.shared.stats();
                    info!(
                        rendered,
                        skipped = stats.skipped,
                        primary_dropped = stats.primary.dropped,
                        secondary_dropped = stats.secondary.dropped,
                        "render loop"
                    );
                }
                Ok(RenderAttempt::Rendered(stamp))
            }
            FrameOutcome::Skipped => {
                self.shared.count_skipped();
                debug!(
                    primary_fresh = self.shared.is_fresh(SourceRole::Primary),
                    secondary_fresh = self.shared.is_fresh(SourceRole::Secondary),
                    "output declined frame"
                );
                Ok(RenderAttempt::Skipped)
            }
        }
    }

    pub(crate) fn shared(&self) -> &Arc<SharedState> {
        &self.shared
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::buffer::{PixelBuffer, PlanarFrame, SourceFrame};
    use crate::compositor::DrawOp;
    use crate::config::CompositorConfig;
    use crate::types::{ChromaSubsampling, Size};

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Upload(SourceRole),
        Render(usize),
    }

    struct Recorder {
        calls: Arc<Mutex<Vec<Call>>>,
        outcome: FrameOutcome,
    }

    impl RenderBackend for Recorder {
        fn upload(&mut self, role: SourceRole, _frame: &SourceFrame) -> Result<()> {
            self.calls.lock().unwrap().push(Call::Upload(role));
            Ok(())
        }

        fn render(&mut self, ops: &[DrawOp<'_>], _stamp: FrameStamp) -> Result<FrameOutcome> {
            self.calls.lock().unwrap().push(Call::Render(ops.len()));
            Ok(self.outcome)
        }
    }

    struct StepClock(u64);

    impl PresentationClock for StepClock {
        fn sample(&mut self) -> FrameStamp {
            self.0 += 1;
            FrameStamp {
                timestamp: Duration::from_millis(self.0 * 10),
                frame_index: self.0 - 1,
            }
        }
    }

    fn render_loop(policy: StartupPolicy, outcome: FrameOutcome) -> (RenderLoop, Arc<Mutex<Vec<Call>>>) {
        let mut config =
            CompositorConfig::with_sizes(Size::new(8, 8), Size::new(8, 8), Size::new(16, 16));
        config.startup = policy;
        let calls = Arc::new(Mutex::new(Vec::new()));
        let backend = Recorder {
            calls: Arc::clone(&calls),
            outcome,
        };
        let shared = Arc::new(SharedState::new(&config));
        let render_loop = RenderLoop::new(
            Box::new(backend),
            CompositePlan::from_config(&config),
            RenderGate::new(policy, config.mandatory_source()),
            shared,
            Box::new(StepClock(0)),
            30,
        );
        (render_loop, calls)
    }

    fn park(render_loop: &RenderLoop, role: SourceRole) {
        let frame = match role {
            SourceRole::Primary => SourceFrame::Packed(PixelBuffer::filled(8, 8, &[255, 0, 0, 255])),
            SourceRole::Secondary => SourceFrame::Planar(PlanarFrame::filled(
                Size::new(8, 8),
                ChromaSubsampling::Yuv420,
                128,
                128,
                128,
            )),
        };
        render_loop.shared().park(role, frame);
    }

    #[test]
    fn strict_policy_waits_for_mandatory_source() {
        let (mut render_loop, calls) = render_loop(StartupPolicy::Strict, FrameOutcome::Presented);

        park(&render_loop, SourceRole::Primary);
        let attempt = render_loop.handle_frame(SourceRole::Primary).expect("frame");
        assert_eq!(attempt, Some(RenderAttempt::Withheld));
        assert!(render_loop.shared().is_fresh(SourceRole::Primary));

        park(&render_loop, SourceRole::Secondary);
        let attempt = render_loop.handle_frame(SourceRole::Secondary).expect("frame");
        assert!(matches!(attempt, Some(RenderAttempt::Rendered(_))));

        // After first light every trigger renders, reusing the resident texture.
        park(&render_loop, SourceRole::Primary);
        let attempt = render_loop.handle_frame(SourceRole::Primary).expect("frame");
        assert!(matches!(attempt, Some(RenderAttempt::Rendered(stamp)) if stamp.frame_index == 1));

        assert_eq!(
            *calls.lock().unwrap(),
            vec![
                Call::Upload(SourceRole::Primary),
                Call::Upload(SourceRole::Secondary),
                Call::Render(2),
                Call::Upload(SourceRole::Primary),
                Call::Render(2),
            ]
        );
    }

    #[test]
    fn best_effort_renders_with_either_source() {
        let (mut render_loop, calls) =
            render_loop(StartupPolicy::BestEffort, FrameOutcome::Presented);
        park(&render_loop, SourceRole::Primary);
        let attempt = render_loop.handle_frame(SourceRole::Primary).expect("frame");
        assert!(matches!(attempt, Some(RenderAttempt::Rendered(_))));
        // Only the overlay is resident, so the background layer is left out.
        assert_eq!(calls.lock().unwrap().last(), Some(&Call::Render(1)));
    }

    #[test]
    fn freshness_cleared_once_per_render() {
        let (mut render_loop, _calls) =
            render_loop(StartupPolicy::Strict, FrameOutcome::Presented);
        park(&render_loop, SourceRole::Secondary);
        render_loop.handle_frame(SourceRole::Secondary).expect("frame");
        assert!(!render_loop.shared().is_fresh(SourceRole::Primary));
        assert!(!render_loop.shared().is_fresh(SourceRole::Secondary));

        // A render with no new upload leaves nothing fresh behind.
        render_loop.try_render().expect("render");
        assert_eq!(render_loop.shared().take_fresh(), [false, false]);
        assert_eq!(render_loop.shared().stats().rendered, 2);
    }

    #[test]
    fn skipped_output_keeps_freshness() {
        let (mut render_loop, _calls) = render_loop(StartupPolicy::Strict, FrameOutcome::Skipped);
        park(&render_loop, SourceRole::Secondary);
        let attempt = render_loop.handle_frame(SourceRole::Secondary).expect("frame");
        assert_eq!(attempt, Some(RenderAttempt::Skipped));
        assert!(render_loop.shared().is_fresh(SourceRole::Secondary));
        assert_eq!(render_loop.shared().stats().skipped, 1);
    }

    #[test]
    fn stopping_session_uploads_nothing() {
        let (mut render_loop, calls) = render_loop(StartupPolicy::Strict, FrameOutcome::Presented);
        park(&render_loop, SourceRole::Secondary);
        render_loop.shared().request_stop();
        assert_eq!(render_loop.handle_frame(SourceRole::Secondary).expect("frame"), None);
        assert!(calls.lock().unwrap().is_empty());
        assert!(render_loop.shared().take_frame(SourceRole::Secondary).is_none());
    }

    #[test]
    fn monotonic_clock_counts_frames() {
        let mut clock = MonotonicClock::new();
        let first = clock.sample();
        let second = clock.sample();
        assert_eq!(first.frame_index, 0);
        assert_eq!(second.frame_index, 1);
        assert!(second.timestamp >= first.timestamp);
    }
}
