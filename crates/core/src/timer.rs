//! High-resolution timer and smoothed frame statistics.

use std::time::{Duration, Instant};

/// Weight of the newest sample in the smoothed frame time.
pub const FRAME_TIME_ALPHA: f64 = 0.1;

/// High-resolution timer for measuring elapsed time.
#[derive(Debug)]
pub struct Timer {
    start: Instant,
    last_tick: Instant,
}

impl Timer {
    /// Create a new timer, starting from now.
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last_tick: now,
        }
    }

    /// Get the total elapsed time since the timer was created.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Get the elapsed time in seconds since the timer was created.
    pub fn elapsed_secs(&self) -> f32 {
        self.elapsed().as_secs_f32()
    }

    /// Get the time elapsed since the last call to `tick()`.
    pub fn tick(&mut self) -> Duration {
        let now = Instant::now();
        let delta = now - self.last_tick;
        self.last_tick = now;
        delta
    }

    /// Get the delta time in seconds since the last tick.
    pub fn delta_secs(&mut self) -> f32 {
        self.tick().as_secs_f32()
    }

    /// Reset the timer to the current time.
    pub fn reset(&mut self) {
        let now = Instant::now();
        self.start = now;
        self.last_tick = now;
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

/// Exponentially smoothed frame time, used for the window caption.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameStats {
    smoothed_ms: Option<f64>,
}

impl FrameStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the duration of the frame that just finished.
    pub fn record(&mut self, frame: Duration) {
        let sample = frame.as_secs_f64() * 1000.0;
        self.smoothed_ms = Some(match self.smoothed_ms {
            Some(prev) => (1.0 - FRAME_TIME_ALPHA) * prev + FRAME_TIME_ALPHA * sample,
            None => sample,
        });
    }

    /// Smoothed frame time in milliseconds, zero before the first sample.
    pub fn frame_ms(&self) -> f64 {
        self.smoothed_ms.unwrap_or(0.0)
    }

    /// Frames per second derived from the smoothed frame time.
    pub fn fps(&self) -> f64 {
        match self.smoothed_ms {
            Some(ms) if ms > 0.0 => 1000.0 / ms,
            _ => 0.0,
        }
    }

    /// Format the window caption, e.g. `"Cube - 16.7 ms  60 fps"`.
    pub fn caption(&self, title: &str) -> String {
        format!("{} - {:4.1} ms  {:.0} fps", title, self.frame_ms(), self.fps())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_sample_seeds_average() {
        let mut stats = FrameStats::new();
        assert_eq!(stats.frame_ms(), 0.0);
        assert_eq!(stats.fps(), 0.0);

        stats.record(Duration::from_millis(20));
        assert!((stats.frame_ms() - 20.0).abs() < 1e-9);
        assert!((stats.fps() - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_smoothing_weights_new_sample_by_alpha() {
        let mut stats = FrameStats::new();
        stats.record(Duration::from_millis(10));
        stats.record(Duration::from_millis(20));
        // 0.9 * 10 + 0.1 * 20
        assert!((stats.frame_ms() - 11.0).abs() < 1e-9);
    }

    #[test]
    fn test_caption_format() {
        let mut stats = FrameStats::new();
        stats.record(Duration::from_millis(4));
        assert_eq!(stats.caption("Cube"), "Cube -  4.0 ms  250 fps");
    }

    #[test]
    fn test_timer_tick_is_monotonic() {
        let mut timer = Timer::new();
        let first = timer.tick();
        let second = timer.tick();
        assert!(first >= Duration::ZERO);
        assert!(second >= Duration::ZERO);
        assert!(timer.elapsed() >= first);
    }
}
