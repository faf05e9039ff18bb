//! Frame rate sampling over fixed windows.
use std::time::{Duration, Instant};

use tokio::sync::watch;

/// What [FrameRateMonitor::fps] reports before the first window closes.
pub const DEFAULT_FPS: u32 = 60;

/// The reference measurement window.
pub const DEFAULT_FPS_WINDOW: Duration = Duration::from_millis(1000);

/// Counts frames and turns them into a frames-per-second figure once per window.
///
/// [FrameRateMonitor::on_frame] is meant to be called from the render loop every frame, so it does nothing but count
/// until a window closes.  New readings are also published on a watch channel for anyone who wants them.
#[derive(Debug)]
pub struct FrameRateMonitor {
    window: Duration,
    window_start: Instant,
    frames: u32,
    fps: u32,
    sender: watch::Sender<u32>,
}

impl FrameRateMonitor {
    pub fn new(start: Instant, window: Duration) -> FrameRateMonitor {
        let (sender, _) = watch::channel(DEFAULT_FPS);
        FrameRateMonitor {
            window,
            window_start: start,
            frames: 0,
            fps: DEFAULT_FPS,
            sender,
        }
    }

    /// Count a frame.  Returns the new reading if this frame closed a window.
    pub fn on_frame(&mut self, now: Instant) -> Option<u32> {
        self.frames += 1;
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed < self.window || elapsed.is_zero() {
            return None;
        }

        let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
        self.fps = (self.frames as f64 * 1000.0 / elapsed_ms).round() as u32;
        self.frames = 0;
        self.window_start = now;
        self.sender.send_replace(self.fps);
        Some(self.fps)
    }

    /// The last completed reading.
    pub fn fps(&self) -> u32 {
        self.fps
    }

    pub fn subscribe(&self) -> watch::Receiver<u32> {
        self.sender.subscribe()
    }
}
