//! Producer-facing input endpoints.
//!
//! Producers call [`SourceInput::submit`] from their own threads. The frame is
//! validated there, parked in a one-frame slot and the GPU thread is poked;
//! no GPU state is touched off the GPU thread. A frame still parked when the
//! next one arrives is replaced, so frames can be dropped but never shown
//! twice.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crossbeam_channel::Sender;

use crate::buffer::SourceFrame;
use crate::config::{CompositorConfig, SourceConfig};
use crate::error::Result;
use crate::session::GpuTask;
use crate::types::SourceRole;

/// What happened to a submitted frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// Parked and the GPU thread notified.
    Queued,
    /// Parked in place of an older frame the GPU thread had not picked up yet.
    Replaced,
    /// The session is stopping or gone; the frame was discarded.
    Ignored,
}

/// Counters for one source, readable from any thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourceStats {
    /// Frames uploaded to the GPU.
    pub uploaded: u64,
    /// Frames replaced in the slot before the GPU thread consumed them.
    pub dropped: u64,
    /// Frames rejected as malformed.
    pub rejected: u64,
}

/// Snapshot of a running session's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionStats {
    pub primary: SourceStats,
    pub secondary: SourceStats,
    /// Composites presented to the output.
    pub rendered: u64,
    /// Render attempts the output declined.
    pub skipped: u64,
}

#[derive(Default)]
struct SourceState {
    fresh: AtomicBool,
    slot: Mutex<Option<SourceFrame>>,
    uploaded: AtomicU64,
    dropped: AtomicU64,
    rejected: AtomicU64,
}

impl SourceState {
    fn stats(&self) -> SourceStats {
        SourceStats {
            uploaded: self.uploaded.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

/// State shared between the producers, the GPU thread and the session owner.
pub(crate) struct SharedState {
    stopping: AtomicBool,
    sources: [SourceState; 2],
    declared: [SourceConfig; 2],
    rendered: AtomicU64,
    skipped: AtomicU64,
}

impl SharedState {
    pub(crate) fn new(config: &CompositorConfig) -> Self {
        Self {
            stopping: AtomicBool::new(false),
            sources: Default::default(),
            declared: [config.primary, config.secondary],
            rendered: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
        }
    }

    fn source(&self, role: SourceRole) -> &SourceState {
        &self.sources[role.index()]
    }

    pub(crate) fn request_stop(&self) {
        self.stopping.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    pub(crate) fn take_frame(&self, role: SourceRole) -> Option<SourceFrame> {
        self.source(role)
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Parks `frame` for the GPU thread, returning the frame it displaced.
    pub(crate) fn park(&self, role: SourceRole, frame: SourceFrame) -> Option<SourceFrame> {
        self.source(role)
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(frame)
    }

    pub(crate) fn clear_slots(&self) {
        for role in SourceRole::ALL {
            self.take_frame(role);
        }
    }

    pub(crate) fn mark_fresh(&self, role: SourceRole) {
        self.source(role).fresh.store(true, Ordering::Release);
    }

    pub(crate) fn is_fresh(&self, role: SourceRole) -> bool {
        self.source(role).fresh.load(Ordering::Acquire)
    }

    /// Test-and-clear of both freshness flags, returning what was set.
    pub(crate) fn take_fresh(&self) -> [bool; 2] {
        SourceRole::ALL.map(|role| self.source(role).fresh.swap(false, Ordering::AcqRel))
    }

    pub(crate) fn count_upload(&self, role: SourceRole) -> u64 {
        self.source(role).uploaded.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn count_rejected(&self, role: SourceRole) {
        self.source(role).rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn count_rendered(&self) -> u64 {
        self.rendered.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn count_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn stats(&self) -> SessionStats {
        SessionStats {
            primary: self.source(SourceRole::Primary).stats(),
            secondary: self.source(SourceRole::Secondary).stats(),
            rendered: self.rendered.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
        }
    }
}

/// Writable endpoint for one source, handed out by `start`.
///
/// Cheap to clone; every clone feeds the same slot. Once the session that
/// created it stops, every submit is ignored, even after a restart.
#[derive(Clone)]
pub struct SourceInput {
    role: SourceRole,
    shared: Arc<SharedState>,
    tasks: Sender<GpuTask>,
}

impl SourceInput {
    pub(crate) fn new(role: SourceRole, shared: Arc<SharedState>, tasks: Sender<GpuTask>) -> Self {
        Self {
            role,
            shared,
            tasks,
        }
    }

    pub fn role(&self) -> SourceRole {
        self.role
    }

    /// Hands a frame to the compositor without blocking on the GPU thread.
    ///
    /// Malformed frames are rejected here with
    /// [`CompositorError::InvalidBuffer`](crate::CompositorError::InvalidBuffer)
    /// and never reach the GPU.
    pub fn submit(&self, frame: impl Into<SourceFrame>) -> Result<Submission> {
        if self.shared.is_stopping() {
            return Ok(Submission::Ignored);
        }

        let frame = frame.into();
        let source = self.shared.source(self.role);
        if let Err(err) = frame.validate_for(self.role, &self.shared.declared[self.role.index()]) {
            source.rejected.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(source = %self.role, error = %err, "dropping malformed frame");
            return Err(err.into());
        }

        let displaced = self.shared.park(self.role, frame);
        if self.shared.is_stopping() {
            // Lost a race with `stop`; nothing will consume the slot now.
            self.shared.take_frame(self.role);
            return Ok(Submission::Ignored);
        }
        if displaced.is_some() {
            source.dropped.fetch_add(1, Ordering::Relaxed);
            return Ok(Submission::Replaced);
        }

        if self.tasks.send(GpuTask::FrameReady(self.role)).is_err() {
            self.shared.take_frame(self.role);
            return Ok(Submission::Ignored);
        }
        Ok(Submission::Queued)
    }
}

impl std::fmt::Debug for SourceInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceInput")
            .field("role", &self.role)
            .field("stopping", &self.shared.is_stopping())
            .finish()
    }
}

/// The two endpoints returned by a successful `start`.
#[derive(Debug, Clone)]
pub struct InputEndpoints {
    pub primary: SourceInput,
    pub secondary: SourceInput,
}

impl InputEndpoints {
    pub fn get(&self, role: SourceRole) -> &SourceInput {
        match role {
            SourceRole::Primary => &self.primary,
            SourceRole::Secondary => &self.secondary,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{PixelBuffer, PlanarFrame};
    use crate::types::{ChromaSubsampling, Size};
    use crate::CompositorError;
    use crossbeam_channel::unbounded;

    fn endpoint(role: SourceRole) -> (SourceInput, crossbeam_channel::Receiver<GpuTask>) {
        let config = CompositorConfig::with_sizes(Size::new(4, 4), Size::new(4, 4), Size::new(8, 8));
        let (tx, rx) = unbounded();
        let shared = Arc::new(SharedState::new(&config));
        (SourceInput::new(role, shared, tx), rx)
    }

    fn red() -> PixelBuffer {
        PixelBuffer::filled(4, 4, &[255, 0, 0, 255])
    }

    #[test]
    fn second_frame_replaces_unconsumed_first() {
        let (input, rx) = endpoint(SourceRole::Primary);
        assert_eq!(input.submit(red()).expect("submit"), Submission::Queued);
        assert_eq!(input.submit(red()).expect("submit"), Submission::Replaced);
        assert_eq!(rx.try_iter().count(), 1);
        assert_eq!(input.shared.stats().primary.dropped, 1);

        assert!(input.shared.take_frame(SourceRole::Primary).is_some());
        assert_eq!(input.submit(red()).expect("submit"), Submission::Queued);
        assert_eq!(rx.try_iter().count(), 1);
    }

    #[test]
    fn malformed_frame_is_rejected_before_queueing() {
        let (input, rx) = endpoint(SourceRole::Primary);
        let err = input
            .submit(PixelBuffer::filled(3, 4, &[0, 0, 0, 255]))
            .unwrap_err();
        assert!(matches!(err, CompositorError::InvalidBuffer(_)));
        assert!(!err.is_fatal());
        assert_eq!(rx.try_iter().count(), 0);
        assert_eq!(input.shared.stats().primary.rejected, 1);
    }

    #[test]
    fn stopping_session_ignores_frames() {
        let (input, rx) = endpoint(SourceRole::Secondary);
        input.shared.request_stop();
        let frame = PlanarFrame::filled(Size::new(4, 4), ChromaSubsampling::Yuv420, 128, 128, 128);
        assert_eq!(input.submit(frame).expect("submit"), Submission::Ignored);
        assert!(rx.try_recv().is_err());
        assert!(input.shared.take_frame(SourceRole::Secondary).is_none());
    }

    #[test]
    fn freshness_is_test_and_clear() {
        let (input, _rx) = endpoint(SourceRole::Primary);
        input.shared.mark_fresh(SourceRole::Primary);
        assert!(input.shared.is_fresh(SourceRole::Primary));
        assert_eq!(input.shared.take_fresh(), [true, false]);
        assert_eq!(input.shared.take_fresh(), [false, false]);
    }
}
