use scenery::{
    AgentSeed, AnimProperty, Animation, CellKind, GridPos, MessageSeed, SpatialGrid, TaskSeed,
    Theme, ViewEntityId, ViewEntityKind, ViewWorld,
};
use tracing::warn;

const LABEL_MAX_CHARS: usize = 24;
const SPAWN_FADE_MS: f32 = 250.0;

fn truncated_label(text: &str) -> String {
    if text.chars().count() <= LABEL_MAX_CHARS {
        return text.to_string();
    }
    let head: String = text.chars().take(LABEL_MAX_CHARS - 1).collect();
    format!("{head}\u{2026}")
}

/// Walled office floor: desks on the ground layer, agents seated beside
/// them, a task board column along the east wall, messages floating on
/// layer 1 above the middle row.
pub struct OfficeTheme {
    /// Set-piece props only. Agent/task/message views are handed to the
    /// caller, which owns their lifetime.
    props: Vec<ViewEntityId>,
    seat_cells: Vec<GridPos>,
    board_cells: Vec<GridPos>,
    message_cells: Vec<GridPos>,
    next_seat: usize,
    next_board_slot: usize,
    next_message_slot: usize,
}

impl OfficeTheme {
    pub fn new() -> Self {
        Self {
            props: Vec::new(),
            seat_cells: Vec::new(),
            board_cells: Vec::new(),
            message_cells: Vec::new(),
            next_seat: 0,
            next_board_slot: 0,
            next_message_slot: 0,
        }
    }

    fn spawn_prop(
        &mut self,
        world: &mut ViewWorld,
        grid: &mut SpatialGrid,
        label: &str,
        cell: GridPos,
    ) {
        let id = world.spawn(ViewEntityKind::Prop, label.to_string());
        if grid.place(world, id, cell).is_err() {
            warn!(label, x = cell.x, y = cell.y, "theme_prop_placement_failed");
            world.despawn(id);
            return;
        }
        self.props.push(id);
    }
}

impl Default for OfficeTheme {
    fn default() -> Self {
        Self::new()
    }
}

impl Theme for OfficeTheme {
    fn initialize(&mut self, world: &mut ViewWorld, grid: &mut SpatialGrid) {
        let width = grid.width();
        let height = grid.height();

        for x in 0..width {
            for y in 0..height {
                let on_edge = x == 0 || y == 0 || x == width - 1 || y == height - 1;
                if !on_edge {
                    continue;
                }
                let cell = GridPos { x, y, layer: 0 };
                if grid.set_cell_kind(cell, CellKind::Wall).is_ok() {
                    self.spawn_prop(world, grid, "wall", cell);
                }
            }
        }

        // Desks every third interior column/row, with the seat just east
        // of each desk. The board column hugs the east wall.
        let board_x = (width - 2).max(1);
        let mut x = 2;
        while x + 1 < board_x {
            let mut y = 2;
            while y < height - 2 {
                let desk = GridPos { x, y, layer: 0 };
                if grid.set_cell_kind(desk, CellKind::Object).is_ok() {
                    self.spawn_prop(world, grid, "desk", desk);
                    let seat = GridPos { x: x + 1, y, layer: 0 };
                    if grid.is_walkable(seat).unwrap_or(false) {
                        self.seat_cells.push(seat);
                    }
                }
                y += 3;
            }
            x += 3;
        }

        for y in 1..height - 1 {
            self.board_cells.push(GridPos {
                x: board_x,
                y,
                layer: 0,
            });
        }

        let mid_y = height / 2;
        for slot_x in 1..width - 1 {
            self.message_cells.push(GridPos {
                x: slot_x,
                y: mid_y,
                layer: 1,
            });
        }
    }

    fn create_agent_view(
        &mut self,
        world: &mut ViewWorld,
        grid: &mut SpatialGrid,
        seed: &AgentSeed,
    ) -> Option<ViewEntityId> {
        if self.seat_cells.is_empty() {
            warn!(agent = %seed.name, "theme_no_seats_available");
            return None;
        }
        let seat = self.seat_cells[self.next_seat % self.seat_cells.len()];
        self.next_seat += 1;

        let id = world.spawn(ViewEntityKind::Agent, truncated_label(&seed.name));
        if grid.place(world, id, seat).is_err() {
            world.despawn(id);
            return None;
        }
        if let Some(entity) = world.entity_mut(id) {
            entity.color = seed.color.clone();
            entity.opacity = 0.0;
            entity.animation =
                Some(Animation::new(SPAWN_FADE_MS).with_track(AnimProperty::Opacity, 0.0, 1.0));
        }
        Some(id)
    }

    fn create_task_view(
        &mut self,
        world: &mut ViewWorld,
        grid: &mut SpatialGrid,
        seed: &TaskSeed,
    ) -> Option<ViewEntityId> {
        if self.board_cells.is_empty() {
            return None;
        }
        let slot = self.board_cells[self.next_board_slot % self.board_cells.len()];
        self.next_board_slot += 1;

        let id = world.spawn(ViewEntityKind::Task, truncated_label(&seed.summary));
        if grid.place(world, id, slot).is_err() {
            world.despawn(id);
            return None;
        }
        if let Some(entity) = world.entity_mut(id) {
            entity.scale = 0.8;
        }
        Some(id)
    }

    fn create_message_view(
        &mut self,
        world: &mut ViewWorld,
        grid: &mut SpatialGrid,
        seed: &MessageSeed,
    ) -> Option<ViewEntityId> {
        if self.message_cells.is_empty() {
            return None;
        }
        let slot = self.message_cells[self.next_message_slot % self.message_cells.len()];
        self.next_message_slot += 1;

        let label = match &seed.sender {
            Some(sender) => format!("{sender}: {}", truncated_label(&seed.text)),
            None => truncated_label(&seed.text),
        };
        let id = world.spawn(ViewEntityKind::Message, label);
        if grid.place(world, id, slot).is_err() {
            world.despawn(id);
            return None;
        }
        Some(id)
    }

    fn cleanup(&mut self, world: &mut ViewWorld, grid: &mut SpatialGrid) {
        for id in self.props.drain(..) {
            grid.remove(world, id);
            world.despawn(id);
        }
        self.seat_cells.clear();
        self.board_cells.clear();
        self.message_cells.clear();
        self.next_seat = 0;
        self.next_board_slot = 0;
        self.next_message_slot = 0;
    }
}
