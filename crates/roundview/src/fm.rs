//! Feature-match gating.
//!
//! The stitcher never runs feature matching itself; it only decides,
//! per frame, whether the backend should run it (`need_fm`) and whether
//! the stitched result is trustworthy enough to emit
//! (`complete_stitch`). The decision depends on the matching mode, on
//! whether matching runs for the whole stream or only a warm-up window,
//! and on the frame counter.
//!
//! Reads and advancement are separate: [`FmGate::tick`] moves the frame
//! counter exactly once per frame, the predicate getters are pure.

use serde::{Deserialize, Serialize};

/// Which feature-match implementation the backend drives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FmMode {
    /// Matching disabled.
    #[default]
    None,
    /// Default single-process matcher.
    Default,
    /// Cluster-based matcher.
    Cluster,
    /// Matcher driven through the C API.
    Capi,
}

/// When matching runs relative to the stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FmStatus {
    /// Match on every frame.
    #[default]
    WholeWay,
    /// Match during the warm-up window, stitch throughout.
    HalfWay,
    /// Match during the warm-up window and suppress output until it
    /// converged.
    FmFirst,
}

/// Fraction of each overlap window handed to the matcher.
///
/// All four values are ratios in [0, 1] relative to the overlap
/// rectangle; position plus extent must not leave the rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FmRegionRatio {
    pub pos_x: f32,
    pub width: f32,
    pub pos_y: f32,
    pub height: f32,
}

impl Default for FmRegionRatio {
    fn default() -> Self {
        // Whole overlap window.
        Self {
            pos_x: 0.0,
            width: 1.0,
            pos_y: 0.0,
            height: 1.0,
        }
    }
}

impl FmRegionRatio {
    /// `true` when every ratio is in range and position plus extent
    /// stays within the window.
    pub fn is_valid(&self) -> bool {
        self.pos_x >= 0.0
            && self.width >= 0.0
            && self.pos_y >= 0.0
            && self.height >= 0.0
            && self.pos_x + self.width <= 1.0
            && self.pos_y + self.height <= 1.0
    }
}

/// Per-frame feature-match gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FmGate {
    mode: FmMode,
    status: FmStatus,
    frames: u32,
    frame_count: u32,
    complete_stitch: bool,
    need_fm: bool,
}

impl Default for FmGate {
    fn default() -> Self {
        Self {
            mode: FmMode::None,
            status: FmStatus::WholeWay,
            frames: 100,
            frame_count: 1,
            complete_stitch: true,
            need_fm: false,
        }
    }
}

impl FmGate {
    pub fn new(mode: FmMode, status: FmStatus, frames: u32) -> Self {
        Self {
            mode,
            status,
            frames,
            ..Self::default()
        }
    }

    /// Reconfigure the matching mode. Restarts the warm-up window.
    pub fn set_mode(&mut self, mode: FmMode) {
        self.mode = mode;
        self.reset();
    }

    /// Reconfigure the matching schedule. Restarts the warm-up window.
    pub fn set_status(&mut self, status: FmStatus) {
        self.status = status;
        self.reset();
    }

    /// Reconfigure the warm-up length. Restarts the warm-up window.
    pub fn set_frames(&mut self, frames: u32) {
        self.frames = frames;
        self.reset();
    }

    /// Restart the warm-up window; the next [`tick`](Self::tick) is
    /// frame 1 again.
    pub fn reset(&mut self) {
        self.frame_count = 1;
        self.complete_stitch = true;
        self.need_fm = false;
    }

    pub fn mode(&self) -> FmMode {
        self.mode
    }

    pub fn status(&self) -> FmStatus {
        self.status
    }

    pub fn frames(&self) -> u32 {
        self.frames
    }

    /// Should the backend run feature matching on this frame?
    pub fn need_fm(&self) -> bool {
        self.need_fm
    }

    /// May the backend emit the stitched frame?
    pub fn complete_stitch(&self) -> bool {
        self.complete_stitch
    }

    /// Advance to the next frame, recomputing both predicates.
    ///
    /// Once the counter passes the warm-up window in non-whole-way
    /// schedules the gate latches: further ticks are no-ops and both
    /// predicates keep their settled values.
    pub fn tick(&mut self) {
        if self.frame_count > self.frames + 1 {
            return;
        }

        self.complete_stitch = self.mode == FmMode::None
            || self.status != FmStatus::FmFirst
            || self.frame_count > self.frames;

        self.need_fm = self.mode != FmMode::None
            && (self.status == FmStatus::WholeWay || self.frame_count <= self.frames);

        self.frame_count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_gate_is_constant() {
        let mut gate = FmGate::new(FmMode::None, FmStatus::FmFirst, 10);
        for _ in 0..50 {
            gate.tick();
            assert!(gate.complete_stitch());
            assert!(!gate.need_fm());
        }
    }

    #[test]
    fn whole_way_always_matches_and_always_emits() {
        let mut gate = FmGate::new(FmMode::Default, FmStatus::WholeWay, 5);
        for _ in 0..20 {
            gate.tick();
            assert!(gate.complete_stitch());
            assert!(gate.need_fm());
        }
    }

    #[test]
    fn fm_first_flips_exactly_once() {
        let mut gate = FmGate::new(FmMode::Cluster, FmStatus::FmFirst, 100);
        for frame in 1..=200u32 {
            gate.tick();
            if frame <= 100 {
                assert!(!gate.complete_stitch(), "frame {frame}");
                assert!(gate.need_fm(), "frame {frame}");
            } else {
                assert!(gate.complete_stitch(), "frame {frame}");
                assert!(!gate.need_fm(), "frame {frame}");
            }
            // Never both "emit this frame" and "still matching" under
            // fm-first.
            assert!(!(gate.complete_stitch() && gate.need_fm()));
        }
    }

    #[test]
    fn half_way_stops_matching_after_warmup_but_always_emits() {
        let mut gate = FmGate::new(FmMode::Default, FmStatus::HalfWay, 3);
        let expectations = [
            (true, true),
            (true, true),
            (true, true),
            (true, false),
            (true, false),
        ];
        for (frame, (complete, need)) in expectations.iter().enumerate() {
            gate.tick();
            assert_eq!(gate.complete_stitch(), *complete, "frame {}", frame + 1);
            assert_eq!(gate.need_fm(), *need, "frame {}", frame + 1);
        }
    }

    #[test]
    fn latch_freezes_after_the_window() {
        let mut gate = FmGate::new(FmMode::Cluster, FmStatus::FmFirst, 2);
        for _ in 0..10 {
            gate.tick();
        }
        let frozen = gate;
        gate.tick();
        assert_eq!(gate, frozen);
    }

    #[test]
    fn reconfiguration_restarts_the_warmup() {
        let mut gate = FmGate::new(FmMode::Cluster, FmStatus::FmFirst, 2);
        for _ in 0..5 {
            gate.tick();
        }
        assert!(gate.complete_stitch());

        gate.set_frames(4);
        gate.tick();
        assert!(!gate.complete_stitch());
        assert!(gate.need_fm());
    }

    #[test]
    fn region_ratio_validation() {
        assert!(FmRegionRatio::default().is_valid());
        assert!(FmRegionRatio {
            pos_x: 0.0,
            width: 1.0,
            pos_y: 1.0 / 3.0,
            height: 1.0 / 3.0,
        }
        .is_valid());
        assert!(!FmRegionRatio {
            pos_x: 0.5,
            width: 0.6,
            pos_y: 0.0,
            height: 1.0,
        }
        .is_valid());
        assert!(!FmRegionRatio {
            pos_x: -0.1,
            width: 0.5,
            pos_y: 0.0,
            height: 0.5,
        }
        .is_valid());
    }
}
