use async_trait::async_trait;
use sentinel_core::Alert;

use crate::error::NotifyError;

/// Notification transport (webhook, message queue, pager...)
///
/// The core guarantees at-least-once publish to its own bus; delivery to
/// external recipients is the transport's responsibility.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, alert: &Alert) -> Result<(), NotifyError>;

    fn name(&self) -> &str {
        "Notifier"
    }
}
