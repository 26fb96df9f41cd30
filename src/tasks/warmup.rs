//! Cache Warm-Up Task
//!
//! Loads the active-pipeline set and the histories of active runs into the
//! cache after startup, off the async workers.

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::dao::PipelineDao;

/// Spawns the warm-up on the blocking pool.
///
/// Failures are logged and otherwise ignored: a cold cache still serves
/// every read, only slower. The handle resolves to the number of pipeline
/// runs primed.
pub fn spawn_warmup_task(pipelines: PipelineDao) -> JoinHandle<usize> {
    tokio::task::spawn_blocking(move || {
        info!("Starting cache warm-up");
        match pipelines.warm_up() {
            Ok(primed) => primed,
            Err(err) => {
                warn!("Cache warm-up failed: {}", err);
                0
            }
        }
    })
}
