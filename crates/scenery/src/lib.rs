pub mod animation;
pub mod draw;
pub mod entity;
pub mod grid;
pub mod iso;
pub mod loop_runner;
pub mod metrics;
pub mod theme;

pub use animation::{advance, AnimProperty, Animation, CompletionHook, Track};
pub use draw::{draw_world, DrawCall, DrawSurface, RecordingSurface};
pub use entity::{ViewEntity, ViewEntityId, ViewEntityIdAllocator, ViewEntityKind, ViewWorld};
pub use grid::{CellKind, GridError, SpatialGrid};
pub use iso::{depth, draw_order, GridPos, Projection, ProjectionError, Vec2, LAYER_DRAW_STRIDE};
pub use loop_runner::{
    run_loop, run_loop_with_metrics, FrameCommand, FrameHandler, FrameOutcome, LoopConfig,
};
pub use metrics::{FrameMetricsSnapshot, MetricsHandle};
pub use theme::{AgentSeed, MessageSeed, TaskSeed, Theme};
