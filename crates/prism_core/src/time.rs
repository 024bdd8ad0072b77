use std::time::{Duration, Instant};

/// Frame clock driving the render loop.
///
/// `elapsed` is the sum of all deltas handed to the simulation, not wall time
/// since startup, so a paused or stepped loop stays deterministic.
#[derive(Debug, Clone)]
pub struct Time {
    last_update: Instant,
    delta: Duration,
    elapsed: Duration,
    frame_count: u64,
}

impl Default for Time {
    fn default() -> Self {
        Self {
            last_update: Instant::now(),
            delta: Duration::ZERO,
            elapsed: Duration::ZERO,
            frame_count: 0,
        }
    }
}

impl Time {
    /// Called by the window loop once per frame
    pub fn update(&mut self) {
        let now = Instant::now();
        let delta = now - self.last_update;
        self.last_update = now;
        self.advance(delta);
    }

    /// Steps the clock by a fixed amount (tests, offline rendering).
    pub fn advance(&mut self, delta: Duration) {
        self.delta = delta;
        self.elapsed += delta;
        self.frame_count += 1;
    }

    /// Returns time in seconds since last frame (e.g., 0.016 for 60fps)
    pub fn delta_seconds(&self) -> f32 {
        self.delta.as_secs_f32()
    }

    /// Returns total simulated time
    pub fn elapsed_seconds(&self) -> f32 {
        self.elapsed.as_secs_f32()
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Frames per second derived from the last delta; zero before the first frame.
    pub fn fps(&self) -> f32 {
        let dt = self.delta_seconds();
        if dt > 0.0 { 1.0 / dt } else { 0.0 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance_accumulates_elapsed() {
        let mut time = Time::default();
        time.advance(Duration::from_millis(250));
        time.advance(Duration::from_millis(500));

        assert!((time.delta_seconds() - 0.5).abs() < 1e-6);
        assert!((time.elapsed_seconds() - 0.75).abs() < 1e-6);
        assert_eq!(time.frame_count(), 2);
        assert!((time.fps() - 2.0).abs() < 1e-4);
    }

    #[test]
    fn test_fps_before_first_frame_is_zero() {
        assert_eq!(Time::default().fps(), 0.0);
    }
}
