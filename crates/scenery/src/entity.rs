use std::collections::HashMap;

use serde::Serialize;

use crate::animation::Animation;
use crate::iso::{GridPos, Vec2};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ViewEntityId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ViewEntityKind {
    Agent,
    Task,
    Message,
    Prop,
}

/// One drawable element of the stage. Presentation state (screen position,
/// opacity, scale) lives here; logical placement lives in the spatial grid,
/// which writes `grid_pos` and `draw_order` back on placement.
#[derive(Debug)]
pub struct ViewEntity {
    pub id: ViewEntityId,
    pub kind: ViewEntityKind,
    pub label: String,
    pub color: Option<String>,
    pub screen_pos: Vec2,
    pub size: Option<Vec2>,
    pub rotation: f32,
    pub scale: f32,
    pub opacity: f32,
    pub visible: bool,
    pub draw_order: i64,
    pub grid_pos: Option<GridPos>,
    pub animation: Option<Animation>,
}

impl ViewEntity {
    pub fn new(id: ViewEntityId, kind: ViewEntityKind, label: String) -> Self {
        Self {
            id,
            kind,
            label,
            color: None,
            screen_pos: Vec2::default(),
            size: None,
            rotation: 0.0,
            scale: 1.0,
            opacity: 1.0,
            visible: true,
            draw_order: 0,
            grid_pos: None,
            animation: None,
        }
    }

    pub fn has_active_animation(&self) -> bool {
        self.animation.as_ref().is_some_and(Animation::is_active)
    }
}

/// Hands out view entity ids, never reusing one within a run. Saturates at
/// `u64::MAX` rather than wrapping back into live ids.
#[derive(Debug, Default)]
pub struct ViewEntityIdAllocator {
    next: u64,
}

impl ViewEntityIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&mut self) -> ViewEntityId {
        let id = ViewEntityId(self.next);
        self.next = self.next.saturating_add(1);
        id
    }
}

/// Flat store of every live view entity, keyed by id. Iteration order is
/// unspecified; depth-sorted traversal is the grid's job.
#[derive(Debug, Default)]
pub struct ViewWorld {
    entities: HashMap<ViewEntityId, ViewEntity>,
    allocator: ViewEntityIdAllocator,
}

impl ViewWorld {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn(&mut self, kind: ViewEntityKind, label: String) -> ViewEntityId {
        let id = self.allocator.allocate();
        self.entities.insert(id, ViewEntity::new(id, kind, label));
        id
    }

    pub fn despawn(&mut self, id: ViewEntityId) -> Option<ViewEntity> {
        self.entities.remove(&id)
    }

    pub fn entity(&self, id: ViewEntityId) -> Option<&ViewEntity> {
        self.entities.get(&id)
    }

    pub fn entity_mut(&mut self, id: ViewEntityId) -> Option<&mut ViewEntity> {
        self.entities.get_mut(&id)
    }

    pub fn contains(&self, id: ViewEntityId) -> bool {
        self.entities.contains_key(&id)
    }

    pub fn ids(&self) -> impl Iterator<Item = ViewEntityId> + '_ {
        self.entities.keys().copied()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ViewEntity> {
        self.entities.values_mut()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn clear(&mut self) {
        self.entities.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_assigns_unique_ids_and_defaults() {
        let mut world = ViewWorld::new();
        let a = world.spawn(ViewEntityKind::Agent, "ada".to_string());
        let b = world.spawn(ViewEntityKind::Task, "t-1".to_string());
        assert_ne!(a, b);

        let entity = world.entity(a).expect("spawned");
        assert_eq!(entity.kind, ViewEntityKind::Agent);
        assert_eq!(entity.scale, 1.0);
        assert_eq!(entity.opacity, 1.0);
        assert!(entity.visible);
        assert!(entity.grid_pos.is_none());
    }

    #[test]
    fn despawn_removes_and_returns_the_entity() {
        let mut world = ViewWorld::new();
        let id = world.spawn(ViewEntityKind::Message, "hello".to_string());
        assert_eq!(world.len(), 1);

        let removed = world.despawn(id).expect("removed");
        assert_eq!(removed.label, "hello");
        assert!(world.is_empty());
        assert!(world.despawn(id).is_none());
    }

    #[test]
    fn allocator_never_reuses_ids_after_despawn() {
        let mut world = ViewWorld::new();
        let first = world.spawn(ViewEntityKind::Prop, "desk".to_string());
        world.despawn(first);
        let second = world.spawn(ViewEntityKind::Prop, "desk".to_string());
        assert_ne!(first, second);
    }

    #[test]
    fn allocator_saturates_at_max() {
        let mut allocator = ViewEntityIdAllocator { next: u64::MAX };
        assert_eq!(allocator.allocate(), ViewEntityId(u64::MAX));
        assert_eq!(allocator.allocate(), ViewEntityId(u64::MAX));
    }
}
