use crate::draw::{draw_world, DrawSurface};
use crate::entity::{ViewEntityId, ViewWorld};
use crate::grid::SpatialGrid;

/// Everything a theme is told about a newly registered agent.
#[derive(Debug, Clone)]
pub struct AgentSeed {
    pub name: String,
    pub color: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TaskSeed {
    pub summary: String,
}

#[derive(Debug, Clone)]
pub struct MessageSeed {
    pub text: String,
    pub sender: Option<String>,
}

/// A visual style for the stage. Themes are plain structs injected into the
/// synchronizer; each capability takes the world and grid explicitly, and a
/// theme only ever touches entities it created.
pub trait Theme {
    /// Builds the static set piece (floors, walls, props). Called once on
    /// startup and again after a full reset.
    fn initialize(&mut self, world: &mut ViewWorld, grid: &mut SpatialGrid);

    fn create_agent_view(
        &mut self,
        world: &mut ViewWorld,
        grid: &mut SpatialGrid,
        seed: &AgentSeed,
    ) -> Option<ViewEntityId>;

    fn create_task_view(
        &mut self,
        world: &mut ViewWorld,
        grid: &mut SpatialGrid,
        seed: &TaskSeed,
    ) -> Option<ViewEntityId>;

    fn create_message_view(
        &mut self,
        world: &mut ViewWorld,
        grid: &mut SpatialGrid,
        seed: &MessageSeed,
    ) -> Option<ViewEntityId>;

    /// Per-frame theme-owned motion (idle sway, prop effects). Entity
    /// animations are advanced by the synchronizer, not here.
    fn update(&mut self, world: &mut ViewWorld, grid: &mut SpatialGrid, delta_ms: f32) {
        let _ = (world, grid, delta_ms);
    }

    /// Default render walks the grid in paint order and draws every visible
    /// entity; themes override only for custom framing.
    fn render(&mut self, world: &ViewWorld, grid: &SpatialGrid, surface: &mut dyn DrawSurface) {
        draw_world(world, grid, surface);
    }

    fn resize(&mut self, world: &mut ViewWorld, grid: &mut SpatialGrid, width: u32, height: u32) {
        let _ = (world, grid, width, height);
    }

    /// Tears down theme-owned set pieces. Views returned from the `create_*`
    /// hooks belong to the caller; the theme must not despawn those. After
    /// cleanup a fresh `initialize` can follow.
    fn cleanup(&mut self, world: &mut ViewWorld, grid: &mut SpatialGrid);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::draw::RecordingSurface;
    use crate::entity::ViewEntityKind;
    use crate::iso::{GridPos, Projection, Vec2};

    struct BareTheme {
        props: Vec<ViewEntityId>,
    }

    impl Theme for BareTheme {
        fn initialize(&mut self, world: &mut ViewWorld, grid: &mut SpatialGrid) {
            let id = world.spawn(ViewEntityKind::Prop, "floor-mark".to_string());
            let _ = grid.place(world, id, GridPos { x: 0, y: 0, layer: 0 });
            self.props.push(id);
        }

        fn create_agent_view(
            &mut self,
            world: &mut ViewWorld,
            grid: &mut SpatialGrid,
            seed: &AgentSeed,
        ) -> Option<ViewEntityId> {
            let id = world.spawn(ViewEntityKind::Agent, seed.name.clone());
            grid.place(world, id, GridPos { x: 1, y: 1, layer: 0 }).ok()?;
            Some(id)
        }

        fn create_task_view(
            &mut self,
            _world: &mut ViewWorld,
            _grid: &mut SpatialGrid,
            _seed: &TaskSeed,
        ) -> Option<ViewEntityId> {
            None
        }

        fn create_message_view(
            &mut self,
            _world: &mut ViewWorld,
            _grid: &mut SpatialGrid,
            _seed: &MessageSeed,
        ) -> Option<ViewEntityId> {
            None
        }

        fn cleanup(&mut self, world: &mut ViewWorld, grid: &mut SpatialGrid) {
            for id in self.props.drain(..) {
                grid.remove(world, id);
                world.despawn(id);
            }
        }
    }

    #[test]
    fn default_render_draws_through_the_surface() {
        let mut theme = BareTheme { props: Vec::new() };
        let mut world = ViewWorld::new();
        let projection = Projection::new(64.0, 32.0, Vec2::default()).expect("projection");
        let mut grid = SpatialGrid::new(4, 4, projection).expect("grid");

        theme.initialize(&mut world, &mut grid);
        let mut surface = RecordingSurface::new();
        theme.render(&world, &grid, &mut surface);
        assert_eq!(surface.last_frame().len(), 1);

        theme.cleanup(&mut world, &mut grid);
        theme.render(&world, &grid, &mut surface);
        assert!(surface.last_frame().is_empty());
        assert!(world.is_empty());
    }
}
