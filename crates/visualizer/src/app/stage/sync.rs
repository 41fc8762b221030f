use std::collections::HashMap;

use scenery::{
    advance, AgentSeed, AnimProperty, Animation, DrawSurface, GridPos, MessageSeed, SpatialGrid,
    TaskSeed, Theme, Vec2, ViewEntityId, ViewWorld,
};
use tracing::{debug, info, warn};

use crate::app::protocol::{AgentStatus, DomainEvent, DomainEventRecord, GridPoint};

/// Passthrough kind that asks the stage to stop its loop.
pub const SHUTDOWN_KIND: &str = "system:shutdown";

#[derive(Debug, Clone, Copy)]
pub struct SyncConfig {
    /// Movement animations scale with Chebyshev grid distance.
    pub move_ms_per_cell: f32,
    pub message_lifetime_ms: f32,
    /// How long a hidden message lingers in bookkeeping before deletion.
    pub message_grace_ms: f32,
    pub status_fade_ms: f32,
    pub task_retire_fade_ms: f32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            move_ms_per_cell: 180.0,
            message_lifetime_ms: 4_000.0,
            message_grace_ms: 750.0,
            status_fade_ms: 200.0,
            task_retire_fade_ms: 600.0,
        }
    }
}

#[derive(Debug)]
struct MessageView {
    entity: ViewEntityId,
    hidden_for_ms: f32,
}

/// Consumes domain events and keeps the visual stage in step: creates,
/// moves, and retires view entities, drives their animations, and redraws
/// in grid depth order once per frame. Owns the world and the grid.
pub struct SceneSynchronizer {
    world: ViewWorld,
    grid: SpatialGrid,
    theme: Box<dyn Theme>,
    config: SyncConfig,
    agent_views: HashMap<String, ViewEntityId>,
    task_views: HashMap<String, ViewEntityId>,
    message_views: Vec<MessageView>,
    retiring_tasks: Vec<ViewEntityId>,
    stop_requested: bool,
}

impl SceneSynchronizer {
    pub fn new(grid: SpatialGrid, mut theme: Box<dyn Theme>, config: SyncConfig) -> Self {
        let mut world = ViewWorld::new();
        let mut grid = grid;
        theme.initialize(&mut world, &mut grid);
        Self {
            world,
            grid,
            theme,
            config,
            agent_views: HashMap::new(),
            task_views: HashMap::new(),
            message_views: Vec::new(),
            retiring_tasks: Vec::new(),
            stop_requested: false,
        }
    }

    pub fn world(&self) -> &ViewWorld {
        &self.world
    }

    pub fn grid(&self) -> &SpatialGrid {
        &self.grid
    }

    pub fn entity_count(&self) -> usize {
        self.world.len()
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested
    }

    /// Idempotent. Applied state stays intact; in-flight animations are
    /// simply abandoned at their last computed values.
    pub fn request_stop(&mut self) {
        if !self.stop_requested {
            self.stop_requested = true;
            info!("stage_stop_requested");
        }
    }

    pub fn agent_view(&self, agent_id: &str) -> Option<ViewEntityId> {
        self.agent_views.get(agent_id).copied()
    }

    pub fn task_view(&self, task_id: &str) -> Option<ViewEntityId> {
        self.task_views.get(task_id).copied()
    }

    pub fn live_message_views(&self) -> usize {
        self.message_views.len()
    }

    pub fn apply(&mut self, record: &DomainEventRecord) {
        match &record.event {
            DomainEvent::AgentRegistered { agent } => {
                if let Some(&existing) = self.agent_views.get(&agent.id) {
                    // Last-write-wins registration refreshes the view.
                    if let Some(entity) = self.world.entity_mut(existing) {
                        entity.label = agent.name.clone();
                        entity.color = agent.color.clone();
                    }
                } else {
                    let seed = AgentSeed {
                        name: agent.name.clone(),
                        color: agent.color.clone(),
                    };
                    if let Some(id) =
                        self.theme
                            .create_agent_view(&mut self.world, &mut self.grid, &seed)
                    {
                        self.agent_views.insert(agent.id.clone(), id);
                    }
                }
                if let Some(position) = agent.position {
                    self.move_view(self.agent_views.get(&agent.id).copied(), position);
                }
            }
            DomainEvent::AgentLeft { agent_id } => {
                if let Some(id) = self.agent_views.remove(agent_id) {
                    self.grid.remove(&mut self.world, id);
                    self.world.despawn(id);
                }
            }
            DomainEvent::AgentStateChanged { agent_id, to, .. } => {
                let Some(&id) = self.agent_views.get(agent_id) else {
                    return;
                };
                let target = status_opacity(*to);
                let settle = self.settle_target(id);
                if let Some(entity) = self.world.entity_mut(id) {
                    let current = entity.opacity;
                    let mut fade = Animation::new(self.config.status_fade_ms)
                        .with_track(AnimProperty::Opacity, current, target);
                    // Installing the fade discards any in-flight glide, so
                    // carry the remaining travel to the placed cell along.
                    if let Some(dest) = settle {
                        if entity.screen_pos != dest {
                            fade = fade
                                .with_track(AnimProperty::ScreenX, entity.screen_pos.x, dest.x)
                                .with_track(AnimProperty::ScreenY, entity.screen_pos.y, dest.y);
                        }
                    }
                    entity.animation = Some(fade);
                }
            }
            // View mutations key off the state-changed granularity.
            DomainEvent::AgentUpdated { .. } => {}
            DomainEvent::AgentMoved { agent_id, position } => {
                self.move_view(self.agent_views.get(agent_id).copied(), *position);
            }
            DomainEvent::MessageAdded { message } => {
                let seed = MessageSeed {
                    text: message.content.clone(),
                    sender: Some(message.from.clone()),
                };
                let Some(id) =
                    self.theme
                        .create_message_view(&mut self.world, &mut self.grid, &seed)
                else {
                    return;
                };
                if let Some(entity) = self.world.entity_mut(id) {
                    entity.animation = Some(
                        Animation::new(self.config.message_lifetime_ms)
                            .with_track(AnimProperty::Opacity, 1.0, 0.0)
                            .with_completion(Box::new(|done| done.visible = false)),
                    );
                }
                self.message_views.push(MessageView {
                    entity: id,
                    hidden_for_ms: 0.0,
                });
            }
            DomainEvent::MessagesCleared => {
                for view in self.message_views.drain(..) {
                    self.grid.remove(&mut self.world, view.entity);
                    self.world.despawn(view.entity);
                }
            }
            DomainEvent::TaskAdded { task } => {
                if self.task_views.contains_key(&task.id) {
                    return;
                }
                let seed = TaskSeed {
                    summary: task.description.clone(),
                };
                if let Some(id) =
                    self.theme
                        .create_task_view(&mut self.world, &mut self.grid, &seed)
                {
                    self.task_views.insert(task.id.clone(), id);
                }
            }
            DomainEvent::TaskAssigned { task_id, agent_id } => {
                let Some(&id) = self.task_views.get(task_id) else {
                    return;
                };
                let agent_color = self
                    .agent_views
                    .get(agent_id)
                    .and_then(|view| self.world.entity(*view))
                    .and_then(|entity| entity.color.clone());
                if let Some(entity) = self.world.entity_mut(id) {
                    if agent_color.is_some() {
                        entity.color = agent_color;
                    }
                    let scale = entity.scale;
                    entity.animation = Some(
                        Animation::new(self.config.status_fade_ms)
                            .with_track(AnimProperty::Scale, scale, scale * 1.2)
                            .with_completion(Box::new(move |done| {
                                done.animation = Some(
                                    Animation::new(150.0)
                                        .with_track(AnimProperty::Scale, done.scale, scale),
                                );
                            })),
                    );
                }
            }
            DomainEvent::TaskCompleted { task_id, .. } => self.retire_task(task_id),
            DomainEvent::TaskCancelled { task_id } => self.retire_task(task_id),
            DomainEvent::TaskMoved { task_id, position } => {
                self.move_view(self.task_views.get(task_id).copied(), *position);
            }
            DomainEvent::SystemReset => self.reset(),
            DomainEvent::Passthrough { kind, .. } => {
                if kind == SHUTDOWN_KIND {
                    self.request_stop();
                } else {
                    debug!(kind = %kind, "passthrough_ignored_by_stage");
                }
            }
        }
    }

    /// One cooperative tick: advance every animation, run theme motion,
    /// prune expired views, and redraw in grid depth order.
    pub fn frame(&mut self, delta_ms: f32, surface: &mut dyn DrawSurface) {
        for entity in self.world.iter_mut() {
            advance(entity, delta_ms);
        }
        self.theme
            .update(&mut self.world, &mut self.grid, delta_ms);
        self.prune_messages(delta_ms);
        self.prune_retired_tasks();
        self.theme.render(&self.world, &self.grid, surface);
    }

    /// Screen position of the cell the grid currently records for `id`.
    fn settle_target(&self, id: ViewEntityId) -> Option<Vec2> {
        let cell = self.grid.position_of(id)?;
        Some(
            self.grid
                .projection()
                .grid_to_screen_elevated(cell.x, cell.y, cell.layer),
        )
    }

    fn retire_task(&mut self, task_id: &str) {
        let Some(id) = self.task_views.remove(task_id) else {
            return;
        };
        if let Some(entity) = self.world.entity_mut(id) {
            let opacity = entity.opacity;
            entity.animation = Some(
                Animation::new(self.config.task_retire_fade_ms)
                    .with_track(AnimProperty::Opacity, opacity, 0.0)
                    .with_completion(Box::new(|done| done.visible = false)),
            );
        }
        self.retiring_tasks.push(id);
    }

    fn move_view(&mut self, view: Option<ViewEntityId>, position: GridPoint) {
        let Some(id) = view else {
            return;
        };
        let cell = GridPos {
            x: position.x,
            y: position.y,
            layer: position.z.unwrap_or(0),
        };
        if !self.grid.in_bounds(cell.x, cell.y) {
            warn!(x = cell.x, y = cell.y, "move_target_out_of_bounds_ignored");
            return;
        }
        let Some(start) = self.world.entity(id).map(|entity| entity.screen_pos) else {
            return;
        };
        let from_cell = self.grid.position_of(id);
        let target = match self.grid.place(&mut self.world, id, cell) {
            Ok(screen) => screen,
            Err(error) => {
                warn!(error = %error, "move_placement_failed");
                return;
            }
        };

        let cells_moved = from_cell
            .map(|from| {
                let dx = (cell.x - from.x).abs();
                let dy = (cell.y - from.y).abs();
                dx.max(dy).max(1) as f32
            })
            .unwrap_or(1.0);
        let duration = cells_moved * self.config.move_ms_per_cell;

        if let Some(entity) = self.world.entity_mut(id) {
            // The grid snapped the entity to the target; rewind and glide.
            entity.screen_pos = start;
            entity.animation = Some(
                Animation::new(duration)
                    .with_track(AnimProperty::ScreenX, start.x, target.x)
                    .with_track(AnimProperty::ScreenY, start.y, target.y),
            );
        }
    }

    fn prune_messages(&mut self, delta_ms: f32) {
        let world = &mut self.world;
        let grid = &mut self.grid;
        self.message_views.retain_mut(|view| {
            let hidden = world
                .entity(view.entity)
                .map(|entity| !entity.visible)
                .unwrap_or(true);
            if !hidden {
                return true;
            }
            view.hidden_for_ms += delta_ms;
            if view.hidden_for_ms < self.config.message_grace_ms {
                return true;
            }
            grid.remove(world, view.entity);
            world.despawn(view.entity);
            false
        });
    }

    fn prune_retired_tasks(&mut self) {
        let world = &mut self.world;
        let grid = &mut self.grid;
        self.retiring_tasks.retain(|&id| {
            let Some(entity) = world.entity(id) else {
                return false;
            };
            if entity.visible || entity.has_active_animation() {
                return true;
            }
            grid.remove(world, id);
            world.despawn(id);
            false
        });
    }

    fn reset(&mut self) {
        for (_, id) in self.agent_views.drain() {
            self.grid.remove(&mut self.world, id);
            self.world.despawn(id);
        }
        for (_, id) in self.task_views.drain() {
            self.grid.remove(&mut self.world, id);
            self.world.despawn(id);
        }
        for view in self.message_views.drain(..) {
            self.grid.remove(&mut self.world, view.entity);
            self.world.despawn(view.entity);
        }
        for id in self.retiring_tasks.drain(..) {
            self.grid.remove(&mut self.world, id);
            self.world.despawn(id);
        }
        self.theme.cleanup(&mut self.world, &mut self.grid);
        self.grid.clear();
        self.theme.initialize(&mut self.world, &mut self.grid);
        info!("stage_reset");
    }
}

fn status_opacity(status: AgentStatus) -> f32 {
    match status {
        AgentStatus::Idle => 0.85,
        AgentStatus::Active | AgentStatus::Working => 1.0,
        AgentStatus::Thinking => 0.9,
        AgentStatus::Waiting => 0.6,
        AgentStatus::Disconnected => 0.4,
    }
}
