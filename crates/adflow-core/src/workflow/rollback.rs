//! Reverses the side effects of a failed workflow.
//!
//! Resources are deleted in strict reverse creation order, so children
//! always go before their parents. A deletion that still fails after its
//! retries is recorded as orphaned and rollback moves on; it never aborts
//! half-way.

use std::sync::Arc;

use adflow_types::workflow::{CreatedResource, OrphanedResource, RollbackReport};

use super::retry::Retrier;
use crate::platform::AdPlatform;

pub struct RollbackManager<P> {
    platform: Arc<P>,
    retrier: Retrier,
}

impl<P: AdPlatform> RollbackManager<P> {
    pub fn new(platform: Arc<P>, retrier: Retrier) -> Self {
        Self { platform, retrier }
    }

    /// Delete `resources` (oldest first as recorded) newest first. Resources
    /// flagged `keep` are reported as kept and left in place.
    pub async fn rollback(&self, request_id: &str, resources: &[CreatedResource]) -> RollbackReport {
        let mut report = RollbackReport::default();
        let platform = self.platform.as_ref();

        tracing::info!(request_id, resources = resources.len(), "rolling back workflow");

        for resource in resources.iter().rev() {
            if resource.keep {
                tracing::debug!(
                    request_id,
                    external_id = %resource.external_id,
                    "keeping resource flagged keep"
                );
                report.kept.push(resource.clone());
                continue;
            }

            let label = format!("rollback:{}", resource.external_id);
            // Rollback is never halted: every resource gets its full retry budget.
            let outcome = self
                .retrier
                .call(platform, None, &label, |_| async {
                    platform
                        .delete(resource.resource_type, &resource.external_id)
                        .await
                })
                .await;

            match outcome.result {
                Ok(()) => {
                    tracing::debug!(
                        request_id,
                        resource_type = resource.resource_type.as_str(),
                        external_id = %resource.external_id,
                        "rolled back resource"
                    );
                    report.deleted.push(resource.clone());
                }
                Err(err) => {
                    tracing::warn!(
                        request_id,
                        resource_type = resource.resource_type.as_str(),
                        external_id = %resource.external_id,
                        attempts = outcome.attempts,
                        error = %err,
                        "rollback left resource orphaned"
                    );
                    report.orphaned.push(OrphanedResource {
                        resource: resource.clone(),
                        error: err.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            request_id,
            deleted = report.deleted.len(),
            orphaned = report.orphaned.len(),
            kept = report.kept.len(),
            "rollback finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{EntityCreator, EntityPayload};
    use crate::workflow::testing::{MockPlatform, test_retrier};
    use adflow_types::error::PlatformError;
    use adflow_types::workflow::EntityType;
    use chrono::Utc;

    async fn create(platform: &MockPlatform, entity_type: EntityType, keep: bool) -> CreatedResource {
        let external_id = platform
            .create(entity_type, &EntityPayload::default(), None)
            .await
            .unwrap();
        CreatedResource {
            resource_type: entity_type,
            external_id: external_id.clone(),
            parent_id: None,
            created_at: Utc::now(),
            task_id: format!("{}:{external_id}", entity_type.as_str()),
            keep,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn deletes_in_reverse_creation_order() {
        let platform = Arc::new(MockPlatform::new());
        let resources = vec![
            create(&platform, EntityType::Campaign, false).await,
            create(&platform, EntityType::AdSet, false).await,
            create(&platform, EntityType::Ad, false).await,
        ];

        let manager = RollbackManager::new(platform.clone(), test_retrier());
        let report = manager.rollback("r1", &resources).await;

        assert!(report.is_complete());
        assert_eq!(platform.deleted(), vec!["ad-3", "ad_set-2", "campaign-1"]);
        assert!(platform.live().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn keep_flag_is_honoured() {
        let platform = Arc::new(MockPlatform::new());
        let resources = vec![
            create(&platform, EntityType::Campaign, true).await,
            create(&platform, EntityType::AdSet, false).await,
        ];

        let manager = RollbackManager::new(platform.clone(), test_retrier());
        let report = manager.rollback("r1", &resources).await;

        assert_eq!(report.deleted.len(), 1);
        assert_eq!(report.kept[0].external_id, "campaign-1");
        assert_eq!(platform.deleted(), vec!["ad_set-2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_deletion_is_orphaned_and_rollback_continues() {
        let platform = Arc::new(MockPlatform::new());
        let resources = vec![
            create(&platform, EntityType::Campaign, false).await,
            create(&platform, EntityType::AdSet, false).await,
            create(&platform, EntityType::AdSet, false).await,
        ];
        platform.fail_delete("ad_set-2", PlatformError::transient("503"));

        let manager = RollbackManager::new(platform.clone(), test_retrier());
        let report = manager.rollback("r1", &resources).await;

        assert!(!report.is_complete());
        assert_eq!(report.orphaned.len(), 1);
        assert_eq!(report.orphaned[0].resource.external_id, "ad_set-2");
        assert!(report.orphaned[0].error.contains("503"));
        let deleted: Vec<&str> = report.deleted.iter().map(|r| r.external_id.as_str()).collect();
        assert_eq!(deleted, vec!["ad_set-3", "campaign-1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_deletion_failure_is_retried() {
        let platform = Arc::new(MockPlatform::new());
        let resources = vec![create(&platform, EntityType::Campaign, false).await];
        platform.script_delete("campaign-1", vec![PlatformError::transient("502")]);

        let manager = RollbackManager::new(platform.clone(), test_retrier());
        let report = manager.rollback("r1", &resources).await;

        assert!(report.is_complete());
        assert_eq!(platform.deleted(), vec!["campaign-1", "campaign-1"]);
    }
}
