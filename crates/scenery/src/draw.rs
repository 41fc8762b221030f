use serde::Serialize;

use crate::entity::{ViewEntity, ViewEntityId, ViewEntityKind, ViewWorld};
use crate::grid::SpatialGrid;
use crate::iso::Vec2;

/// One resolved draw of one entity. Everything a backend needs, with no
/// reference back into the world, so a surface may buffer calls freely.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DrawCall {
    pub id: ViewEntityId,
    pub kind: ViewEntityKind,
    pub screen_pos: Vec2,
    pub size: Option<Vec2>,
    pub rotation: f32,
    pub scale: f32,
    pub opacity: f32,
    pub label: String,
    pub color: Option<String>,
}

impl DrawCall {
    pub fn from_entity(entity: &ViewEntity) -> Self {
        Self {
            id: entity.id,
            kind: entity.kind,
            screen_pos: entity.screen_pos,
            size: entity.size,
            rotation: entity.rotation,
            scale: entity.scale,
            opacity: entity.opacity,
            label: entity.label.clone(),
            color: entity.color.clone(),
        }
    }
}

/// Backend seam. The synchronizer draws through this; pixel backends,
/// terminal dashboards, and test recorders all sit behind it.
pub trait DrawSurface {
    fn begin_frame(&mut self);
    fn draw(&mut self, call: DrawCall);
    fn end_frame(&mut self);
}

/// Buffers the most recent frame's calls in submission order.
#[derive(Debug, Default)]
pub struct RecordingSurface {
    current: Vec<DrawCall>,
    last_frame: Vec<DrawCall>,
    frames_ended: u64,
}

impl RecordingSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_frame(&self) -> &[DrawCall] {
        &self.last_frame
    }

    pub fn frames_ended(&self) -> u64 {
        self.frames_ended
    }
}

impl DrawSurface for RecordingSurface {
    fn begin_frame(&mut self) {
        self.current.clear();
    }

    fn draw(&mut self, call: DrawCall) {
        self.current.push(call);
    }

    fn end_frame(&mut self) {
        self.last_frame = std::mem::take(&mut self.current);
        self.frames_ended = self.frames_ended.saturating_add(1);
    }
}

/// Draws every visible placed entity in grid paint order. Invisible
/// entities are skipped but keep their grid cells.
pub fn draw_world(world: &ViewWorld, grid: &SpatialGrid, surface: &mut dyn DrawSurface) {
    surface.begin_frame();
    for id in grid.entities_in_draw_order(world) {
        let Some(entity) = world.entity(id) else {
            continue;
        };
        if !entity.visible {
            continue;
        }
        surface.draw(DrawCall::from_entity(entity));
    }
    surface.end_frame();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iso::{GridPos, Projection};

    fn world_and_grid() -> (ViewWorld, SpatialGrid) {
        let projection = Projection::new(64.0, 32.0, Vec2::default()).expect("projection");
        (
            ViewWorld::new(),
            SpatialGrid::new(8, 8, projection).expect("grid"),
        )
    }

    #[test]
    fn draw_world_emits_visible_entities_in_paint_order() {
        let (mut world, mut grid) = world_and_grid();
        let near = world.spawn(ViewEntityKind::Agent, "near".to_string());
        let far = world.spawn(ViewEntityKind::Agent, "far".to_string());
        grid.place(&mut world, near, GridPos { x: 5, y: 5, layer: 0 })
            .expect("near");
        grid.place(&mut world, far, GridPos { x: 0, y: 0, layer: 0 })
            .expect("far");

        let mut surface = RecordingSurface::new();
        draw_world(&world, &grid, &mut surface);

        let ids: Vec<_> = surface.last_frame().iter().map(|call| call.id).collect();
        assert_eq!(ids, vec![far, near]);
        assert_eq!(surface.frames_ended(), 1);
    }

    #[test]
    fn invisible_entities_are_skipped() {
        let (mut world, mut grid) = world_and_grid();
        let id = world.spawn(ViewEntityKind::Task, "t".to_string());
        grid.place(&mut world, id, GridPos { x: 1, y: 1, layer: 0 })
            .expect("place");
        world.entity_mut(id).expect("entity").visible = false;

        let mut surface = RecordingSurface::new();
        draw_world(&world, &grid, &mut surface);
        assert!(surface.last_frame().is_empty());
    }

    #[test]
    fn each_frame_replaces_the_previous_recording() {
        let (mut world, mut grid) = world_and_grid();
        let id = world.spawn(ViewEntityKind::Message, "m".to_string());
        grid.place(&mut world, id, GridPos { x: 2, y: 2, layer: 1 })
            .expect("place");

        let mut surface = RecordingSurface::new();
        draw_world(&world, &grid, &mut surface);
        assert_eq!(surface.last_frame().len(), 1);

        grid.remove(&mut world, id);
        draw_world(&world, &grid, &mut surface);
        assert!(surface.last_frame().is_empty());
        assert_eq!(surface.frames_ended(), 2);
    }
}
