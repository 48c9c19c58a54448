//! Frame timing statistics.

use std::time::{Duration, Instant};

/// Averaged frame timing over one reporting interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameReport {
    /// Frames counted in the interval.
    pub frames: u32,
    /// Wall time the interval covered.
    pub elapsed: Duration,
}

impl FrameReport {
    /// Frames per second over the interval.
    pub fn fps(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            f64::from(self.frames) / secs
        } else {
            0.0
        }
    }

    /// Mean frame time in milliseconds.
    pub fn average_frame_ms(&self) -> f64 {
        if self.frames == 0 {
            0.0
        } else {
            self.elapsed.as_secs_f64() * 1000.0 / f64::from(self.frames)
        }
    }
}

/// Counts frames and emits a [`FrameReport`] once per interval.
#[derive(Debug)]
pub struct FrameStats {
    interval: Duration,
    window_start: Instant,
    frames: u32,
    total_frames: u64,
}

impl FrameStats {
    /// Create a counter that reports every `interval`.
    pub fn new(interval: Duration) -> Self {
        Self::starting_at(interval, Instant::now())
    }

    fn starting_at(interval: Duration, now: Instant) -> Self {
        Self {
            interval,
            window_start: now,
            frames: 0,
            total_frames: 0,
        }
    }

    /// Record one frame. Returns a report when the interval has elapsed.
    pub fn frame(&mut self) -> Option<FrameReport> {
        self.frame_at(Instant::now())
    }

    fn frame_at(&mut self, now: Instant) -> Option<FrameReport> {
        self.frames += 1;
        self.total_frames += 1;

        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed < self.interval {
            return None;
        }

        let report = FrameReport {
            frames: self.frames,
            elapsed,
        };
        self.window_start = now;
        self.frames = 0;
        Some(report)
    }

    /// Frames recorded since creation.
    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }
}

impl Default for FrameStats {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_report_before_interval() {
        let start = Instant::now();
        let mut stats = FrameStats::starting_at(Duration::from_secs(1), start);
        for i in 1..10 {
            assert!(stats.frame_at(start + Duration::from_millis(i * 50)).is_none());
        }
        assert_eq!(stats.total_frames(), 9);
    }

    #[test]
    fn test_report_after_interval_resets_window() {
        let start = Instant::now();
        let mut stats = FrameStats::starting_at(Duration::from_secs(1), start);
        for i in 1..60 {
            assert!(stats.frame_at(start + Duration::from_millis(i * 16)).is_none());
        }

        let report = stats
            .frame_at(start + Duration::from_millis(1000))
            .expect("interval elapsed");
        assert_eq!(report.frames, 60);
        assert!((report.fps() - 60.0).abs() < 1e-9);
        assert!((report.average_frame_ms() - 1000.0 / 60.0).abs() < 1e-9);

        // Next window starts fresh
        assert!(stats.frame_at(start + Duration::from_millis(1010)).is_none());
        assert_eq!(stats.total_frames(), 61);
    }

    #[test]
    fn test_empty_report_is_zero() {
        let report = FrameReport {
            frames: 0,
            elapsed: Duration::ZERO,
        };
        assert_eq!(report.fps(), 0.0);
        assert_eq!(report.average_frame_ms(), 0.0);
    }
}
