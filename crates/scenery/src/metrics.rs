use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use tracing::warn;

static METRICS_LOCK_POISON_WARNED: AtomicBool = AtomicBool::new(false);

fn warn_metrics_lock_poison_once(operation: &'static str) {
    if METRICS_LOCK_POISON_WARNED
        .compare_exchange(false, true, Ordering::Relaxed, Ordering::Relaxed)
        .is_ok()
    {
        warn!(operation, "metrics lock poisoned; recovered inner value");
    }
}

/// What the last closed metrics window looked like. `entity_count` is the
/// count observed on the window's final frame, not an average.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameMetricsSnapshot {
    pub fps: f32,
    pub events_per_sec: f32,
    pub frame_time_ms: f32,
    pub max_frame_time_ms: f32,
    pub entity_count: usize,
}

/// Shared read handle onto the most recent metrics window. Cloneable across
/// threads; a telemetry publisher reads while the frame loop writes.
#[derive(Clone, Debug)]
pub struct MetricsHandle {
    snapshot: Arc<RwLock<FrameMetricsSnapshot>>,
}

impl Default for MetricsHandle {
    fn default() -> Self {
        Self {
            snapshot: Arc::new(RwLock::new(FrameMetricsSnapshot::default())),
        }
    }
}

impl MetricsHandle {
    pub fn snapshot(&self) -> FrameMetricsSnapshot {
        match self.snapshot.read() {
            Ok(guard) => *guard,
            Err(poisoned) => {
                warn_metrics_lock_poison_once("read");
                *poisoned.into_inner()
            }
        }
    }

    pub(crate) fn publish(&self, snapshot: FrameMetricsSnapshot) {
        match self.snapshot.write() {
            Ok(mut guard) => *guard = snapshot,
            Err(poisoned) => {
                warn_metrics_lock_poison_once("write");
                let mut guard = poisoned.into_inner();
                *guard = snapshot;
            }
        }
    }
}

/// One open observation window. Every frame is `observe`d; `roll_over`
/// closes the window once its interval has elapsed, yielding a snapshot and
/// starting the next window from `now`.
#[derive(Debug)]
pub(crate) struct MetricsWindow {
    opened_at: Instant,
    interval: Duration,
    frames: u32,
    events_applied: u32,
    frame_time_sum: Duration,
    slowest_frame: Duration,
    entity_count: usize,
}

impl MetricsWindow {
    pub(crate) fn new(interval: Duration) -> Self {
        Self {
            opened_at: Instant::now(),
            interval,
            frames: 0,
            events_applied: 0,
            frame_time_sum: Duration::ZERO,
            slowest_frame: Duration::ZERO,
            entity_count: 0,
        }
    }

    pub(crate) fn observe(&mut self, frame_dt: Duration, events_applied: u32, entity_count: usize) {
        self.frames = self.frames.saturating_add(1);
        self.events_applied = self.events_applied.saturating_add(events_applied);
        self.frame_time_sum = self.frame_time_sum.saturating_add(frame_dt);
        self.slowest_frame = self.slowest_frame.max(frame_dt);
        self.entity_count = entity_count;
    }

    pub(crate) fn roll_over(&mut self, now: Instant) -> Option<FrameMetricsSnapshot> {
        let elapsed = now.saturating_duration_since(self.opened_at);
        if elapsed < self.interval {
            return None;
        }

        let elapsed_seconds = elapsed.as_secs_f32().max(f32::EPSILON);
        let frame_time_ms = if self.frames == 0 {
            0.0
        } else {
            (self.frame_time_sum.as_secs_f32() / self.frames as f32) * 1000.0
        };

        let snapshot = FrameMetricsSnapshot {
            fps: self.frames as f32 / elapsed_seconds,
            events_per_sec: self.events_applied as f32 / elapsed_seconds,
            frame_time_ms,
            max_frame_time_ms: self.slowest_frame.as_secs_f32() * 1000.0,
            entity_count: self.entity_count,
        };

        self.opened_at = now;
        self.frames = 0;
        self.events_applied = 0;
        self.frame_time_sum = Duration::ZERO;
        self.slowest_frame = Duration::ZERO;

        Some(snapshot)
    }
}
