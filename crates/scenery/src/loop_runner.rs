use std::thread;
use std::time::{Duration, Instant};

use tracing::info;

use super::metrics::MetricsWindow;
use super::MetricsHandle;

#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub target_fps: u32,
    pub max_frame_delta: Duration,
    pub metrics_log_interval: Duration,
    /// Frame cap for bounded runs (scripted playback, tests). `None` runs
    /// until the handler asks to stop.
    pub max_frames: Option<u64>,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            target_fps: 30,
            max_frame_delta: Duration::from_millis(250),
            metrics_log_interval: Duration::from_secs(5),
            max_frames: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameCommand {
    Continue,
    Stop,
}

/// What one frame did: whether to keep running, how many inbound events the
/// handler applied (for the metrics window), and how many entities are live.
#[derive(Debug, Clone, Copy)]
pub struct FrameOutcome {
    pub command: FrameCommand,
    pub events_applied: u32,
    pub entity_count: usize,
}

impl FrameOutcome {
    pub fn running(events_applied: u32, entity_count: usize) -> Self {
        Self {
            command: FrameCommand::Continue,
            events_applied,
            entity_count,
        }
    }

    pub fn stopping(entity_count: usize) -> Self {
        Self {
            command: FrameCommand::Stop,
            events_applied: 0,
            entity_count,
        }
    }
}

/// One frame of work. `delta_ms` is the wall-clock time since the previous
/// frame, already clamped to the loop's `max_frame_delta`.
pub trait FrameHandler {
    fn frame(&mut self, delta_ms: f32) -> FrameOutcome;

    /// Called once after the loop exits, whatever the exit reason.
    fn shutdown(&mut self) {}
}

pub fn run_loop(config: LoopConfig, handler: &mut dyn FrameHandler) {
    run_loop_with_metrics(config, handler, MetricsHandle::default());
}

/// Single-threaded cooperative frame loop: exactly one frame in flight at a
/// time, paced by sleeping toward `target_fps`. A stalled frame delays the
/// next one rather than overlapping it.
pub fn run_loop_with_metrics(
    config: LoopConfig,
    handler: &mut dyn FrameHandler,
    metrics_handle: MetricsHandle,
) {
    let target_fps = config.target_fps.max(1);
    let max_frame_delta =
        normalize_non_zero_duration(config.max_frame_delta, Duration::from_millis(250));
    let metrics_log_interval =
        normalize_non_zero_duration(config.metrics_log_interval, Duration::from_secs(5));
    let frame_target = Duration::from_secs_f64(1.0 / target_fps as f64);

    info!(
        target_fps,
        max_frame_delta_ms = max_frame_delta.as_millis() as u64,
        metrics_log_interval_ms = metrics_log_interval.as_millis() as u64,
        max_frames = ?config.max_frames,
        "loop_config"
    );

    let mut metrics_window = MetricsWindow::new(metrics_log_interval);
    let mut last_frame_instant = Instant::now();
    let mut frames_run: u64 = 0;

    loop {
        let now = Instant::now();
        let raw_frame_dt = now.saturating_duration_since(last_frame_instant);
        last_frame_instant = now;
        let clamped_dt = clamp_frame_delta(raw_frame_dt, max_frame_delta);

        let outcome = handler.frame(clamped_dt.as_secs_f32() * 1000.0);
        frames_run = frames_run.saturating_add(1);
        metrics_window.observe(raw_frame_dt, outcome.events_applied, outcome.entity_count);

        if let Some(snapshot) = metrics_window.roll_over(Instant::now()) {
            metrics_handle.publish(snapshot);
            info!(
                fps = snapshot.fps,
                events_per_sec = snapshot.events_per_sec,
                frame_time_ms = snapshot.frame_time_ms,
                max_frame_time_ms = snapshot.max_frame_time_ms,
                entity_count = snapshot.entity_count,
                "loop_metrics"
            );
        }

        if outcome.command == FrameCommand::Stop {
            info!(frames_run, reason = "handler_stop", "loop_exit");
            break;
        }
        if config.max_frames.is_some_and(|cap| frames_run >= cap) {
            info!(frames_run, reason = "frame_cap", "loop_exit");
            break;
        }

        let elapsed = Instant::now().saturating_duration_since(last_frame_instant);
        let cap_sleep = compute_cap_sleep(elapsed, frame_target);
        if cap_sleep > Duration::ZERO {
            thread::sleep(cap_sleep);
        }
    }

    handler.shutdown();
}

fn clamp_frame_delta(frame_dt: Duration, max_frame_delta: Duration) -> Duration {
    frame_dt.min(max_frame_delta)
}

fn normalize_non_zero_duration(value: Duration, fallback: Duration) -> Duration {
    if value.is_zero() {
        fallback
    } else {
        value
    }
}

fn compute_cap_sleep(elapsed: Duration, frame_target: Duration) -> Duration {
    if elapsed < frame_target {
        frame_target - elapsed
    } else {
        Duration::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingHandler {
        frames: u32,
        stop_after: u32,
        shutdowns: u32,
        deltas: Vec<f32>,
    }

    impl CountingHandler {
        fn new(stop_after: u32) -> Self {
            Self {
                frames: 0,
                stop_after,
                shutdowns: 0,
                deltas: Vec::new(),
            }
        }
    }

    impl FrameHandler for CountingHandler {
        fn frame(&mut self, delta_ms: f32) -> FrameOutcome {
            self.frames += 1;
            self.deltas.push(delta_ms);
            if self.frames >= self.stop_after {
                FrameOutcome::stopping(0)
            } else {
                FrameOutcome::running(1, 0)
            }
        }

        fn shutdown(&mut self) {
            self.shutdowns += 1;
        }
    }

    fn fast_config() -> LoopConfig {
        LoopConfig {
            target_fps: 1_000,
            max_frame_delta: Duration::from_millis(250),
            metrics_log_interval: Duration::from_secs(60),
            max_frames: None,
        }
    }

    #[test]
    fn clamp_frame_delta_caps_large_frame() {
        let max_frame_delta = Duration::from_millis(250);
        let raw_frame_dt = Duration::from_millis(600);

        assert_eq!(
            clamp_frame_delta(raw_frame_dt, max_frame_delta),
            max_frame_delta
        );
    }

    #[test]
    fn compute_cap_sleep_zero_when_over_budget() {
        let sleep = compute_cap_sleep(Duration::from_millis(20), Duration::from_millis(16));
        assert_eq!(sleep, Duration::ZERO);
    }

    #[test]
    fn compute_cap_sleep_positive_when_under_budget() {
        let sleep = compute_cap_sleep(Duration::from_millis(5), Duration::from_millis(16));
        assert_eq!(sleep, Duration::from_millis(11));
    }

    #[test]
    fn normalize_duration_falls_back_on_zero() {
        let fallback = Duration::from_secs(5);
        assert_eq!(
            normalize_non_zero_duration(Duration::ZERO, fallback),
            fallback
        );
        assert_eq!(
            normalize_non_zero_duration(Duration::from_secs(1), fallback),
            Duration::from_secs(1)
        );
    }

    #[test]
    fn handler_stop_exits_loop_and_calls_shutdown_once() {
        let mut handler = CountingHandler::new(3);
        run_loop(fast_config(), &mut handler);

        assert_eq!(handler.frames, 3);
        assert_eq!(handler.shutdowns, 1);
    }

    #[test]
    fn frame_cap_bounds_the_run() {
        let mut handler = CountingHandler::new(u32::MAX);
        let config = LoopConfig {
            max_frames: Some(5),
            ..fast_config()
        };
        run_loop(config, &mut handler);

        assert_eq!(handler.frames, 5);
        assert_eq!(handler.shutdowns, 1);
    }

    #[test]
    fn frame_deltas_are_never_negative_or_unclamped() {
        let mut handler = CountingHandler::new(4);
        run_loop(fast_config(), &mut handler);

        for delta in &handler.deltas {
            assert!(*delta >= 0.0);
            assert!(*delta <= 250.0);
        }
    }
}
