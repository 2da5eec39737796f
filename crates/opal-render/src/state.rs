//! Frame-scoped render state: the baseline applied at frame start and the
//! saved snapshot restored at frame end.

use opal_core::geometry::Rect;
use tracing::warn;

pub use opal_test_utils::BlendMode;

/// Mutable render state the renderer carries between frames.
///
/// Kept deliberately small: everything pass-scoped (pipeline, bindings,
/// vertex buffers) is re-established per pass and needs no save/restore.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderState {
    pub blend: BlendMode,
    /// Scissor override in target pixels; `None` means the full target
    /// area.
    pub scissor: Option<Rect<f32>>,
}

impl Default for RenderState {
    fn default() -> Self {
        RenderState {
            blend: BlendMode::Normal,
            scissor: None,
        }
    }
}

/// Snapshot of [`RenderState`] taken when a frame begins.
///
/// The snapshot is consumed by value exactly once when the frame ends;
/// ownership makes an unbalanced or doubled restore unrepresentable.
#[must_use = "a saved state must be restored by end_rendering"]
#[derive(Debug)]
pub struct SavedState {
    state: RenderState,
}

/// Applies the 2D baseline at frame start and restores the caller-visible
/// state at frame end.
pub struct StateGuard {
    /// Extra defaults forced at frame start for hosts that leave unusual
    /// state behind between frames.
    extra_reset: bool,
}

impl StateGuard {
    pub fn new() -> Self {
        StateGuard { extra_reset: false }
    }

    /// Enable forcing the full set of defaults each frame, for embedding
    /// hosts whose own drawing leaves state the baseline does not touch.
    pub fn set_extra_state_reset(&mut self, enabled: bool) {
        self.extra_reset = enabled;
    }

    pub fn extra_state_reset(&self) -> bool {
        self.extra_reset
    }

    /// Snapshot the current state and install the known-good baseline.
    ///
    /// The baseline drops any scissor override; with extra reset enabled
    /// the blend mode is also forced back to the default.
    pub fn begin(&self, state: &mut RenderState) -> SavedState {
        let saved = SavedState { state: *state };
        state.scissor = None;
        if self.extra_reset {
            state.blend = BlendMode::Normal;
        }
        saved
    }

    /// Restore the snapshot taken at frame start.
    pub fn end(&self, state: &mut RenderState, saved: SavedState) {
        *state = saved.state;
    }
}

impl Default for StateGuard {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks the begin/end pairing of frames and complains about misuse
/// instead of corrupting state.
pub struct FrameTracker {
    saved: Option<SavedState>,
}

impl FrameTracker {
    pub fn new() -> Self {
        FrameTracker { saved: None }
    }

    pub fn in_frame(&self) -> bool {
        self.saved.is_some()
    }

    /// Record a frame start. A doubled begin keeps the original snapshot
    /// so the eventual end still restores the pre-frame state.
    pub fn frame_started(&mut self, saved: SavedState) {
        if self.saved.is_some() {
            warn!("begin_rendering called while a frame is already open");
            return;
        }
        self.saved = Some(saved);
    }

    /// Take the snapshot for restoration, or `None` on an unmatched end.
    pub fn frame_ended(&mut self) -> Option<SavedState> {
        let saved = self.saved.take();
        if saved.is_none() {
            warn!("end_rendering called without a matching begin_rendering");
        }
        saved
    }
}

impl Default for FrameTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_applies_baseline_and_end_restores() {
        let guard = StateGuard::new();
        let mut state = RenderState {
            blend: BlendMode::Premultiplied,
            scissor: Some(Rect::new(1.0, 2.0, 3.0, 4.0)),
        };
        let before = state;

        let saved = guard.begin(&mut state);
        assert_eq!(state.scissor, None);
        assert_eq!(state.blend, BlendMode::Premultiplied);

        guard.end(&mut state, saved);
        assert_eq!(state, before);
    }

    #[test]
    fn extra_reset_also_forces_default_blend() {
        let mut guard = StateGuard::new();
        guard.set_extra_state_reset(true);
        let mut state = RenderState {
            blend: BlendMode::Premultiplied,
            scissor: None,
        };
        let saved = guard.begin(&mut state);
        assert_eq!(state, RenderState::default());
        guard.end(&mut state, saved);
        assert_eq!(state.blend, BlendMode::Premultiplied);
    }

    #[test]
    fn tracker_flags_unbalanced_frames() {
        let guard = StateGuard::new();
        let mut state = RenderState::default();
        let mut tracker = FrameTracker::new();

        tracker.frame_started(guard.begin(&mut state));
        assert!(tracker.in_frame());
        // A second begin does not displace the original snapshot.
        tracker.frame_started(guard.begin(&mut state));

        assert!(tracker.frame_ended().is_some());
        assert!(!tracker.in_frame());
        assert!(tracker.frame_ended().is_none());
    }
}
