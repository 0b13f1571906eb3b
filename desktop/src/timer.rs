//! Timing the host loop against the GBA frame rate.

use std::time::{Duration, Instant};


/// Paces the main loop: one emulated frame per `wait_for_frame` call, with
/// the remainder of the frame period spent in an accurate sleep.
pub(crate) struct LoopTimer {
    /// The time an emulated frame should last. (This stays constant.)
    frame_time: Duration,

    /// When the current frame is allowed to end.
    deadline: Instant,
}

impl LoopTimer {
    pub(crate) fn new(fps: f64) -> Self {
        let frame_time = Duration::from_secs(1).div_f64(fps);
        Self {
            frame_time,
            deadline: Instant::now() + frame_time,
        }
    }

    /// Sleeps until the end of the current frame period. If the emulation
    /// fell behind by more than a frame, the deadline is resynchronized
    /// instead of trying to catch up with a burst.
    pub(crate) fn wait_for_frame(&mut self) {
        let now = Instant::now();
        if self.deadline > now {
            spin_sleep::sleep(self.deadline - now);
            self.deadline += self.frame_time;
        } else {
            self.deadline = now + self.frame_time;
        }
    }
}
