use std::time::{Duration, Instant};

use scenery::{
    FrameHandler, FrameOutcome, GridError, LoopConfig, MetricsHandle, Projection, ProjectionError,
    RecordingSurface, SpatialGrid, Vec2,
};
use thiserror::Error;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use super::feedport::FeedPort;
use super::protocol::ProtocolAdapter;
use super::stage::{OfficeTheme, SceneSynchronizer, SyncConfig};

const GRID_ENV_VAR: &str = "AGENT_STAGE_GRID";
const MAX_FRAMES_ENV_VAR: &str = "AGENT_STAGE_MAX_FRAMES";
const DEFAULT_GRID_WIDTH: i32 = 12;
const DEFAULT_GRID_HEIGHT: i32 = 12;
const TILE_WIDTH: f32 = 64.0;
const TILE_HEIGHT: f32 = 32.0;
const TELEMETRY_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid {GRID_ENV_VAR} value {value:?}: expected WIDTHxHEIGHT, e.g. 12x12")]
    InvalidGridSpec { value: String },
    #[error(transparent)]
    Projection(#[from] ProjectionError),
    #[error(transparent)]
    Grid(#[from] GridError),
}

pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true)
        .compact()
        .init();
}

/// Grid dimensions are structural config: a malformed value fails startup
/// rather than silently rendering the wrong stage.
fn parse_grid_spec(raw: Option<&str>) -> Result<(i32, i32), AppError> {
    let Some(value) = raw else {
        return Ok((DEFAULT_GRID_WIDTH, DEFAULT_GRID_HEIGHT));
    };
    let invalid = || AppError::InvalidGridSpec {
        value: value.to_string(),
    };
    let (width_raw, height_raw) = value.split_once(['x', 'X']).ok_or_else(invalid)?;
    let width: i32 = width_raw.trim().parse().map_err(|_| invalid())?;
    let height: i32 = height_raw.trim().parse().map_err(|_| invalid())?;
    if width <= 0 || height <= 0 {
        return Err(invalid());
    }
    Ok((width, height))
}

fn parse_max_frames(raw: Option<&str>) -> Option<u64> {
    let value = raw?;
    match value.parse::<u64>() {
        Ok(frames) => Some(frames),
        Err(_) => {
            warn!(value, "invalid max-frames env var value; running unbounded");
            None
        }
    }
}

/// The stage application driven by the frame loop: drains the feed port,
/// runs every line through the adapter, mirrors the resulting domain
/// events onto the scene and back out to feed subscribers.
pub struct StageApp {
    adapter: ProtocolAdapter,
    synchronizer: SceneSynchronizer,
    feedport: FeedPort,
    surface: RecordingSurface,
    metrics_handle: MetricsHandle,
    last_telemetry: Instant,
    inbound_lines: Vec<String>,
}

impl StageApp {
    pub fn new(
        synchronizer: SceneSynchronizer,
        feedport: FeedPort,
        metrics_handle: MetricsHandle,
    ) -> Self {
        Self {
            adapter: ProtocolAdapter::new(),
            synchronizer,
            feedport,
            surface: RecordingSurface::new(),
            metrics_handle,
            last_telemetry: Instant::now(),
            inbound_lines: Vec::new(),
        }
    }

    pub fn adapter(&self) -> &ProtocolAdapter {
        &self.adapter
    }

    pub fn synchronizer(&self) -> &SceneSynchronizer {
        &self.synchronizer
    }

    fn telemetry_line(&self) -> String {
        let metrics = self.metrics_handle.snapshot();
        format!(
            "stage.frame v1 fps:{:.1} eps:{:.1} entities:{} agents:{} tasks:{} messages:{} dropped:{}",
            metrics.fps,
            metrics.events_per_sec,
            self.synchronizer.entity_count(),
            self.adapter.state().agent_count(),
            self.adapter.state().task_count(),
            self.adapter.state().message_count(),
            self.adapter.malformed_dropped(),
        )
    }
}

impl FrameHandler for StageApp {
    fn frame(&mut self, delta_ms: f32) -> FrameOutcome {
        self.inbound_lines.clear();
        self.feedport.poll_lines(&mut self.inbound_lines);

        let mut events_applied = 0u32;
        let mut outbound = Vec::new();
        let lines = std::mem::take(&mut self.inbound_lines);
        for line in &lines {
            for record in self.adapter.apply_line(line) {
                self.synchronizer.apply(&record);
                events_applied = events_applied.saturating_add(1);
                match serde_json::to_string(&record) {
                    Ok(json) => outbound.push(json),
                    Err(error) => warn!(error = %error, "domain_event_encode_failed"),
                }
            }
        }
        self.inbound_lines = lines;
        if !outbound.is_empty() {
            self.feedport.send_event_lines(&outbound);
        }

        self.synchronizer.frame(delta_ms, &mut self.surface);

        let now = Instant::now();
        if now.saturating_duration_since(self.last_telemetry) >= TELEMETRY_INTERVAL {
            self.feedport.send_telemetry_line(&self.telemetry_line());
            self.last_telemetry = now;
        }

        if self.synchronizer.stop_requested() {
            FrameOutcome::stopping(self.synchronizer.entity_count())
        } else {
            FrameOutcome::running(events_applied, self.synchronizer.entity_count())
        }
    }

    fn shutdown(&mut self) {
        info!(
            events_applied = self.adapter.events_applied(),
            malformed_dropped = self.adapter.malformed_dropped(),
            entity_count = self.synchronizer.entity_count(),
            "stage_shutdown"
        );
    }
}

pub struct AppWiring {
    pub config: LoopConfig,
    pub app: StageApp,
    pub metrics_handle: MetricsHandle,
}

pub fn build_app() -> Result<AppWiring, AppError> {
    let grid_raw = std::env::var(GRID_ENV_VAR).ok();
    let (width, height) = parse_grid_spec(grid_raw.as_deref())?;

    // Center the stage footprint horizontally above the screen origin.
    let origin = Vec2 {
        x: 0.0,
        y: TILE_HEIGHT * 2.0,
    };
    let projection = Projection::new(TILE_WIDTH, TILE_HEIGHT, origin)?;
    let grid = SpatialGrid::new(width, height, projection)?;
    let synchronizer = SceneSynchronizer::new(
        grid,
        Box::new(OfficeTheme::new()),
        SyncConfig::default(),
    );
    let feedport = FeedPort::from_env();
    let metrics_handle = MetricsHandle::default();

    info!(
        grid_width = width,
        grid_height = height,
        feedport_enabled = feedport.is_enabled(),
        "stage_startup"
    );

    let config = LoopConfig {
        max_frames: parse_max_frames(std::env::var(MAX_FRAMES_ENV_VAR).ok().as_deref()),
        ..LoopConfig::default()
    };
    let app = StageApp::new(synchronizer, feedport, metrics_handle.clone());

    Ok(AppWiring {
        config,
        app,
        metrics_handle,
    })
}
