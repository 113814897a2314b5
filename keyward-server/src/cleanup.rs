//! Background cleanup: prune expired pending logins and deny-list rows.

use crate::storage::ServerStorage;
use chrono::Utc;
use std::time::Duration;
use tokio::time;

pub fn spawn_cleanup_task(storage: ServerStorage) {
    tokio::spawn(async move {
        let mut interval = time::interval(Duration::from_secs(3600)); // hourly
        loop {
            interval.tick().await;
            if let Err(e) = storage.prune_expired(Utc::now().timestamp()) {
                tracing::error!("Cleanup error: {}", e);
            } else {
                tracing::debug!("Cleanup completed");
            }
        }
    });
}
