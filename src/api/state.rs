use crate::scheduler::Scheduler;
use crate::storage::Pool;

/// Shared handles for request handlers. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub pool: Pool,
    pub scheduler: Scheduler,
}

impl AppState {
    pub fn new(pool: Pool, scheduler: Scheduler) -> Self {
        Self { pool, scheduler }
    }
}
