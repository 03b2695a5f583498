use std::future::Future;

use super::types::DeveloperIds;
use crate::types::UserId;

/// Consumer-provided lookup of the merchant and organization behind a user.
///
/// Called by `GET /api/developer-info` once the session is confirmed. The
/// access token is passed through so the lookup runs with the user's own
/// row-level permissions.
///
/// # Example
///
/// ```rust,ignore
/// impl DeveloperDirectory for MyDirectory {
///     async fn fetch_developer_ids(
///         &self,
///         access_token: &str,
///         user_id: UserId,
///     ) -> Result<Option<DeveloperIds>, Box<dyn std::error::Error + Send + Sync>> {
///         Ok(self.db.developer_ids(user_id).await?)
///     }
/// }
/// ```
pub trait DeveloperDirectory: Send + Sync + 'static {
    /// `Ok(None)` when the user has no developer record yet.
    fn fetch_developer_ids(
        &self,
        access_token: &str,
        user_id: UserId,
    ) -> impl Future<Output = Result<Option<DeveloperIds>, Box<dyn std::error::Error + Send + Sync>>>
           + Send;
}
