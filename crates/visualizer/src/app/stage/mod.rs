pub mod sync;
pub mod theme;

pub use sync::{SceneSynchronizer, SyncConfig, SHUTDOWN_KIND};
pub use theme::OfficeTheme;
