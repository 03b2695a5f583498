use serde::{Deserialize, Serialize};

use crate::types::UserId;

/// One row of the developer directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DeveloperIds {
    #[serde(default)]
    pub merchant_id: Option<String>,
    #[serde(default)]
    pub organization_id: Option<String>,
}

/// Body of `GET /api/developer-info`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeveloperInfo {
    pub user_id: UserId,
    /// The user's own id unless the directory names another merchant.
    pub merchant_id: String,
    pub organization_id: Option<String>,
}

impl DeveloperInfo {
    #[must_use]
    pub fn resolve(user_id: UserId, ids: Option<DeveloperIds>) -> Self {
        let ids = ids.unwrap_or_default();
        Self {
            user_id,
            merchant_id: ids.merchant_id.unwrap_or_else(|| user_id.to_string()),
            organization_id: ids.organization_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_merchant_falls_back_to_user() {
        let user_id = UserId(Uuid::from_u128(7));
        let info = DeveloperInfo::resolve(user_id, None);
        assert_eq!(info.merchant_id, user_id.to_string());
        assert_eq!(info.organization_id, None);
    }

    #[test]
    fn test_serializes_camel_case() {
        let user_id = UserId(Uuid::from_u128(7));
        let info = DeveloperInfo::resolve(
            user_id,
            Some(DeveloperIds {
                merchant_id: Some("m-1".into()),
                organization_id: Some("o-1".into()),
            }),
        );
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "userId": user_id.to_string(),
                "merchantId": "m-1",
                "organizationId": "o-1",
            })
        );
    }
}
