//! Production bundle attachment
//!
//! After a successful delivery, copies the shared production bundle into a
//! subfolder of the delivered folder. Best effort: failures are counted and
//! logged but never change the delivery outcome.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use proofline_content::{ContentError, ContentService, CopyOptions, CopyReport, FolderRef};

use crate::domain::outcome::AttachmentOutcome;

pub struct ProductionAssetAttachment {
    content: Arc<dyn ContentService>,
    bundle_ref: Option<String>,
    subfolder: String,
    failures: AtomicU64,
}

impl ProductionAssetAttachment {
    pub fn new(
        content: Arc<dyn ContentService>,
        bundle_ref: Option<String>,
        subfolder: impl Into<String>,
    ) -> Self {
        Self {
            content,
            bundle_ref,
            subfolder: subfolder.into(),
            failures: AtomicU64::new(0),
        }
    }

    /// Attach the production bundle to a delivered folder
    pub async fn attach(&self, delivered: &FolderRef) -> AttachmentOutcome {
        let Some(bundle) = self.bundle_ref.as_deref() else {
            return AttachmentOutcome::Skipped;
        };

        let result: Result<CopyReport, ContentError> = async {
            let target = self
                .content
                .ensure_child_folder(&delivered.id, &self.subfolder)
                .await?;
            self.content
                .copy_folder_tree(bundle, &target.id, CopyOptions::default())
                .await
        }
        .await;

        match result {
            Ok(report) if report.is_complete() => {
                tracing::debug!(
                    folder = %delivered.id,
                    items_copied = report.items_copied,
                    "Attached production bundle"
                );
                AttachmentOutcome::Attached {
                    items_copied: report.items_copied,
                }
            }
            Ok(report) => self.fail(
                &delivered.id,
                format!(
                    "{} of {} bundle items failed",
                    report.items_failed.len(),
                    report.total_items()
                ),
            ),
            Err(e) => self.fail(&delivered.id, e.to_string()),
        }
    }

    /// Attachment failures since startup
    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    fn fail(&self, folder: &str, reason: String) -> AttachmentOutcome {
        let failures = self.failures.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::warn!(folder, reason = %reason, failures, "Production bundle attachment failed");
        AttachmentOutcome::Failed { reason }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proofline_content::mock::MockContentService;

    fn delivered(content: &MockContentService) -> FolderRef {
        content.seed_folder("delivered", &[]);
        FolderRef {
            id: "delivered".to_string(),
            url: "https://content.mock/folders/delivered".to_string(),
        }
    }

    #[tokio::test]
    async fn test_skipped_without_bundle() {
        let content = MockContentService::new();
        let folder = delivered(&content);
        let attachment =
            ProductionAssetAttachment::new(Arc::new(content.clone()), None, "Production Assets");

        assert_eq!(attachment.attach(&folder).await, AttachmentOutcome::Skipped);
        assert_eq!(content.copy_call_count(), 0);
    }

    #[tokio::test]
    async fn test_bundle_copied_into_subfolder() {
        let content = MockContentService::new();
        content.seed_folder("bundle", &[("lut.cube", "L"), ("fonts.zip", "F")]);
        let folder = delivered(&content);
        let attachment = ProductionAssetAttachment::new(
            Arc::new(content.clone()),
            Some("bundle".to_string()),
            "Production Assets",
        );

        let outcome = attachment.attach(&folder).await;
        assert_eq!(outcome, AttachmentOutcome::Attached { items_copied: 2 });
        let sub = content.child_folder("delivered", "Production Assets").unwrap();
        assert_eq!(content.items_in(&sub).len(), 2);
        assert_eq!(attachment.failure_count(), 0);
    }

    #[tokio::test]
    async fn test_failures_are_counted() {
        let content = MockContentService::new();
        let folder = delivered(&content);
        let attachment = ProductionAssetAttachment::new(
            Arc::new(content.clone()),
            Some("missing-bundle".to_string()),
            "Production Assets",
        );

        assert!(matches!(
            attachment.attach(&folder).await,
            AttachmentOutcome::Failed { .. }
        ));

        content.seed_folder("missing-bundle", &[("a", "1"), ("b", "2")]);
        content.fail_next_copy_items(1);
        assert!(matches!(
            attachment.attach(&folder).await,
            AttachmentOutcome::Failed { ref reason } if reason.starts_with("1 of 2")
        ));
        assert_eq!(attachment.failure_count(), 2);
    }
}
