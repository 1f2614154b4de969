use std::sync::Arc;
use std::time::{Instant, SystemTime};

use crate::curriculum::CurriculumRegistry;
use crate::db::DatabaseProxy;
use crate::memory::SchedulerPolicy;
use crate::response::AppError;

#[derive(Clone)]
pub struct AppState {
    started_at: Instant,
    started_at_system: SystemTime,
    db_proxy: Option<Arc<DatabaseProxy>>,
    curriculum: Arc<CurriculumRegistry>,
    policy: Arc<SchedulerPolicy>,
}

impl AppState {
    pub fn new(
        db_proxy: Option<Arc<DatabaseProxy>>,
        curriculum: Arc<CurriculumRegistry>,
        policy: SchedulerPolicy,
    ) -> Self {
        Self {
            started_at: Instant::now(),
            started_at_system: SystemTime::now(),
            db_proxy,
            curriculum,
            policy: Arc::new(policy),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub fn started_at_system(&self) -> SystemTime {
        self.started_at_system
    }

    pub fn db_proxy(&self) -> Option<Arc<DatabaseProxy>> {
        self.db_proxy.clone()
    }

    /// The store handle, or the 503 every store-backed route returns without one.
    pub fn require_db(&self) -> Result<Arc<DatabaseProxy>, AppError> {
        self.db_proxy
            .clone()
            .ok_or_else(|| AppError::service_unavailable("database not configured"))
    }

    pub fn curriculum(&self) -> Arc<CurriculumRegistry> {
        Arc::clone(&self.curriculum)
    }

    pub fn policy(&self) -> &SchedulerPolicy {
        &self.policy
    }
}
