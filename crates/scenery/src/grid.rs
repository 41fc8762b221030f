use std::collections::HashMap;

use thiserror::Error;

use crate::entity::{ViewEntityId, ViewWorld};
use crate::iso::{draw_order, GridPos, Projection, Vec2};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum GridError {
    #[error("grid dimensions must be positive, got {width}x{height}")]
    EmptyFootprint { width: i32, height: i32 },
    #[error("cell ({x}, {y}, layer {layer}) is outside the {width}x{height} footprint")]
    OutOfBounds {
        x: i32,
        y: i32,
        layer: u16,
        width: i32,
        height: i32,
    },
    #[error("cell kind {kind:?} can never be walkable")]
    NeverWalkable { kind: CellKind },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CellKind {
    Floor,
    Wall,
    Object,
    Empty,
}

impl CellKind {
    /// Walls and objects are solid regardless of any walkability override.
    pub fn forces_blocked(self) -> bool {
        matches!(self, CellKind::Wall | CellKind::Object)
    }
}

#[derive(Debug, Clone)]
struct GridCell {
    kind: CellKind,
    walkable: bool,
    occupants: Vec<ViewEntityId>,
}

impl GridCell {
    /// Ground-layer cells start as walkable floor; elevated cells start
    /// empty and blocked until something materializes them.
    fn default_for_layer(layer: u16) -> Self {
        if layer == 0 {
            Self {
                kind: CellKind::Floor,
                walkable: true,
                occupants: Vec::new(),
            }
        } else {
            Self {
                kind: CellKind::Empty,
                walkable: false,
                occupants: Vec::new(),
            }
        }
    }
}

/// Sparse 3D occupancy index over a fixed `width x height` footprint with
/// unbounded elevation layers. Cells materialize lazily on first write;
/// reads on untouched cells answer from the per-layer defaults.
///
/// Placement and walkability are independent: entities may be placed on
/// blocked cells (an agent standing on a desk), and walkability only
/// answers pathing-style queries.
#[derive(Debug)]
pub struct SpatialGrid {
    width: i32,
    height: i32,
    projection: Projection,
    cells: HashMap<GridPos, GridCell>,
    placements: HashMap<ViewEntityId, GridPos>,
}

impl SpatialGrid {
    pub fn new(width: i32, height: i32, projection: Projection) -> Result<Self, GridError> {
        if width <= 0 || height <= 0 {
            return Err(GridError::EmptyFootprint { width, height });
        }
        Ok(Self {
            width,
            height,
            projection,
            cells: HashMap::new(),
            placements: HashMap::new(),
        })
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    pub fn projection(&self) -> &Projection {
        &self.projection
    }

    pub fn in_bounds(&self, x: i32, y: i32) -> bool {
        x >= 0 && x < self.width && y >= 0 && y < self.height
    }

    fn check_bounds(&self, pos: GridPos) -> Result<(), GridError> {
        if self.in_bounds(pos.x, pos.y) {
            Ok(())
        } else {
            Err(GridError::OutOfBounds {
                x: pos.x,
                y: pos.y,
                layer: pos.layer,
                width: self.width,
                height: self.height,
            })
        }
    }

    fn cell_mut(&mut self, pos: GridPos) -> &mut GridCell {
        self.cells
            .entry(pos)
            .or_insert_with(|| GridCell::default_for_layer(pos.layer))
    }

    pub fn cell_kind(&self, pos: GridPos) -> Result<CellKind, GridError> {
        self.check_bounds(pos)?;
        Ok(self
            .cells
            .get(&pos)
            .map(|cell| cell.kind)
            .unwrap_or_else(|| GridCell::default_for_layer(pos.layer).kind))
    }

    /// Re-typing a cell to wall or object drops its walkability; other
    /// kinds keep whatever walkability the cell already had.
    pub fn set_cell_kind(&mut self, pos: GridPos, kind: CellKind) -> Result<(), GridError> {
        self.check_bounds(pos)?;
        let cell = self.cell_mut(pos);
        cell.kind = kind;
        if kind.forces_blocked() {
            cell.walkable = false;
        }
        Ok(())
    }

    pub fn is_walkable(&self, pos: GridPos) -> Result<bool, GridError> {
        self.check_bounds(pos)?;
        Ok(self
            .cells
            .get(&pos)
            .map(|cell| cell.walkable)
            .unwrap_or_else(|| GridCell::default_for_layer(pos.layer).walkable))
    }

    pub fn set_walkable(&mut self, pos: GridPos, walkable: bool) -> Result<(), GridError> {
        self.check_bounds(pos)?;
        let cell = self.cell_mut(pos);
        if walkable && cell.kind.forces_blocked() {
            return Err(GridError::NeverWalkable { kind: cell.kind });
        }
        cell.walkable = walkable;
        Ok(())
    }

    /// Places (or re-places) an entity at `pos`, updating its screen
    /// position, grid position, and draw order in the world. An entity
    /// occupies at most one cell; placing again moves it.
    pub fn place(
        &mut self,
        world: &mut ViewWorld,
        id: ViewEntityId,
        pos: GridPos,
    ) -> Result<Vec2, GridError> {
        self.check_bounds(pos)?;
        if let Some(previous) = self.placements.insert(id, pos) {
            if let Some(cell) = self.cells.get_mut(&previous) {
                cell.occupants.retain(|occupant| *occupant != id);
            }
        }
        self.cell_mut(pos).occupants.push(id);

        let screen = self
            .projection
            .grid_to_screen_elevated(pos.x, pos.y, pos.layer);
        if let Some(entity) = world.entity_mut(id) {
            entity.grid_pos = Some(pos);
            entity.screen_pos = screen;
            entity.draw_order = draw_order(pos.x, pos.y, pos.layer);
        }
        Ok(screen)
    }

    /// Removes an entity from the grid. The entity keeps its last screen
    /// position so a departure animation can still play.
    pub fn remove(&mut self, world: &mut ViewWorld, id: ViewEntityId) -> bool {
        let Some(pos) = self.placements.remove(&id) else {
            return false;
        };
        if let Some(cell) = self.cells.get_mut(&pos) {
            cell.occupants.retain(|occupant| *occupant != id);
        }
        if let Some(entity) = world.entity_mut(id) {
            entity.grid_pos = None;
        }
        true
    }

    pub fn position_of(&self, id: ViewEntityId) -> Option<GridPos> {
        self.placements.get(&id).copied()
    }

    pub fn occupants(&self, pos: GridPos) -> Result<&[ViewEntityId], GridError> {
        self.check_bounds(pos)?;
        Ok(self
            .cells
            .get(&pos)
            .map(|cell| cell.occupants.as_slice())
            .unwrap_or(&[]))
    }

    /// Every placed entity in paint order: ascending draw order, ties
    /// broken by id so repeated frames enumerate identically.
    pub fn entities_in_draw_order(&self, world: &ViewWorld) -> Vec<ViewEntityId> {
        let mut ordered: Vec<(i64, ViewEntityId)> = self
            .placements
            .iter()
            .map(|(id, pos)| (draw_order(pos.x, pos.y, pos.layer), *id))
            .collect();
        ordered.sort_unstable();
        ordered
            .into_iter()
            .map(|(_, id)| id)
            .filter(|id| world.contains(*id))
            .collect()
    }

    pub fn placed_len(&self) -> usize {
        self.placements.len()
    }

    pub fn clear(&mut self) {
        self.cells.clear();
        self.placements.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::ViewEntityKind;
    use crate::iso::Vec2;

    fn grid() -> SpatialGrid {
        let projection = Projection::new(64.0, 32.0, Vec2::default()).expect("projection");
        SpatialGrid::new(10, 10, projection).expect("grid")
    }

    fn at(x: i32, y: i32, layer: u16) -> GridPos {
        GridPos { x, y, layer }
    }

    #[test]
    fn new_rejects_empty_footprints() {
        let projection = Projection::new(64.0, 32.0, Vec2::default()).expect("projection");
        assert!(SpatialGrid::new(0, 10, projection).is_err());
        assert!(SpatialGrid::new(10, -3, projection).is_err());
    }

    #[test]
    fn untouched_ground_cells_are_walkable_floor() {
        let g = grid();
        assert_eq!(g.cell_kind(at(4, 4, 0)).expect("kind"), CellKind::Floor);
        assert!(g.is_walkable(at(4, 4, 0)).expect("walkable"));
    }

    #[test]
    fn untouched_elevated_cells_are_blocked_empty() {
        let g = grid();
        assert_eq!(g.cell_kind(at(4, 4, 2)).expect("kind"), CellKind::Empty);
        assert!(!g.is_walkable(at(4, 4, 2)).expect("walkable"));
    }

    #[test]
    fn wall_cells_refuse_walkability() {
        let mut g = grid();
        g.set_cell_kind(at(1, 1, 0), CellKind::Wall).expect("set");
        assert!(!g.is_walkable(at(1, 1, 0)).expect("walkable"));
        assert_eq!(
            g.set_walkable(at(1, 1, 0), true),
            Err(GridError::NeverWalkable {
                kind: CellKind::Wall
            })
        );
    }

    #[test]
    fn floor_walkability_can_be_toggled() {
        let mut g = grid();
        g.set_walkable(at(2, 2, 0), false).expect("block");
        assert!(!g.is_walkable(at(2, 2, 0)).expect("walkable"));
        g.set_walkable(at(2, 2, 0), true).expect("unblock");
        assert!(g.is_walkable(at(2, 2, 0)).expect("walkable"));
    }

    #[test]
    fn out_of_bounds_queries_fail() {
        let g = grid();
        assert!(matches!(
            g.cell_kind(at(10, 0, 0)),
            Err(GridError::OutOfBounds { .. })
        ));
        assert!(matches!(
            g.is_walkable(at(0, -1, 0)),
            Err(GridError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn place_writes_screen_position_and_draw_order() {
        let mut g = grid();
        let mut world = ViewWorld::new();
        let id = world.spawn(ViewEntityKind::Agent, "ada".to_string());

        let screen = g.place(&mut world, id, at(3, 1, 0)).expect("place");
        let entity = world.entity(id).expect("entity");
        assert_eq!(entity.grid_pos, Some(at(3, 1, 0)));
        assert_eq!(entity.screen_pos, screen);
        assert_eq!(entity.draw_order, crate::iso::draw_order(3, 1, 0));
        assert_eq!(g.occupants(at(3, 1, 0)).expect("occupants"), &[id]);
    }

    #[test]
    fn replacing_moves_the_entity_to_one_cell_only() {
        let mut g = grid();
        let mut world = ViewWorld::new();
        let id = world.spawn(ViewEntityKind::Agent, "ada".to_string());

        g.place(&mut world, id, at(1, 1, 0)).expect("first");
        g.place(&mut world, id, at(5, 5, 0)).expect("second");

        assert!(g.occupants(at(1, 1, 0)).expect("old").is_empty());
        assert_eq!(g.occupants(at(5, 5, 0)).expect("new"), &[id]);
        assert_eq!(g.position_of(id), Some(at(5, 5, 0)));
    }

    #[test]
    fn placement_on_blocked_cells_is_allowed() {
        let mut g = grid();
        let mut world = ViewWorld::new();
        g.set_cell_kind(at(2, 2, 0), CellKind::Object).expect("set");

        let id = world.spawn(ViewEntityKind::Agent, "ada".to_string());
        assert!(g.place(&mut world, id, at(2, 2, 0)).is_ok());
        assert!(!g.is_walkable(at(2, 2, 0)).expect("walkable"));
    }

    #[test]
    fn remove_keeps_last_screen_position() {
        let mut g = grid();
        let mut world = ViewWorld::new();
        let id = world.spawn(ViewEntityKind::Task, "t-1".to_string());
        let screen = g.place(&mut world, id, at(4, 6, 0)).expect("place");

        assert!(g.remove(&mut world, id));
        assert!(!g.remove(&mut world, id));
        let entity = world.entity(id).expect("entity");
        assert_eq!(entity.grid_pos, None);
        assert_eq!(entity.screen_pos, screen);
    }

    #[test]
    fn draw_order_enumeration_is_depth_then_id() {
        let mut g = grid();
        let mut world = ViewWorld::new();
        let near = world.spawn(ViewEntityKind::Agent, "near".to_string());
        let far = world.spawn(ViewEntityKind::Agent, "far".to_string());
        let high = world.spawn(ViewEntityKind::Prop, "lamp".to_string());

        g.place(&mut world, near, at(6, 6, 0)).expect("near");
        g.place(&mut world, far, at(0, 1, 0)).expect("far");
        g.place(&mut world, high, at(0, 0, 1)).expect("high");

        assert_eq!(g.entities_in_draw_order(&world), vec![far, near, high]);
    }

    #[test]
    fn same_cell_ties_break_by_id() {
        let mut g = grid();
        let mut world = ViewWorld::new();
        let a = world.spawn(ViewEntityKind::Agent, "a".to_string());
        let b = world.spawn(ViewEntityKind::Agent, "b".to_string());
        g.place(&mut world, b, at(3, 3, 0)).expect("b");
        g.place(&mut world, a, at(3, 3, 0)).expect("a");

        assert_eq!(g.entities_in_draw_order(&world), vec![a, b]);
    }
}
