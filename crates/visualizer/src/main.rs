mod app;

use tracing::{error, info};

use app::bootstrap;

fn main() {
    bootstrap::init_tracing();
    info!("=== Agent Stage Startup ===");

    match bootstrap::build_app() {
        Ok(wiring) => {
            let mut app = wiring.app;
            scenery::run_loop_with_metrics(wiring.config, &mut app, wiring.metrics_handle);
        }
        Err(err) => {
            error!(error = %err, "startup_failed");
            std::process::exit(1);
        }
    }
}
