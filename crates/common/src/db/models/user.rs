//! User profile entity

use sea_orm::entity::prelude::*;
use sea_orm::FromJsonQueryResult;
use serde::{Deserialize, Serialize};

/// Administrative role, independent of the subscription tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[sea_orm(string_value = "user")]
    User,
    #[sea_orm(string_value = "admin")]
    Admin,
}

/// Subscription tier gating feature access and upload limits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum Subscription {
    #[sea_orm(string_value = "free")]
    Free,
    #[sea_orm(string_value = "premium")]
    Premium,
    #[sea_orm(string_value = "enterprise")]
    Enterprise,
}

impl Subscription {
    pub const ALL: [Subscription; 3] = [
        Subscription::Free,
        Subscription::Premium,
        Subscription::Enterprise,
    ];

    /// Tiers allowed to use risk assessment, comparison and reanalysis
    pub const PAID: &'static [Subscription] = &[Subscription::Premium, Subscription::Enterprise];

    /// Tiers allowed to submit batch processing
    pub const ENTERPRISE_ONLY: &'static [Subscription] = &[Subscription::Enterprise];

    /// Maximum size of a single upload in bytes
    pub fn max_upload_bytes(&self) -> u64 {
        match self {
            Subscription::Free => 5 * 1024 * 1024,
            Subscription::Premium => 50 * 1024 * 1024,
            Subscription::Enterprise => 500 * 1024 * 1024,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Subscription::Free => "free",
            Subscription::Premium => "premium",
            Subscription::Enterprise => "enterprise",
        }
    }
}

/// Usage counters. Increments are best-effort.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, FromJsonQueryResult)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    #[serde(default)]
    pub storage_used: i64,
    #[serde(default)]
    pub api_calls: i64,
    #[serde(default)]
    pub documents_this_month: i64,
    /// Calendar month (`YYYY-MM`, UTC) that `documents_this_month` counts
    #[serde(default)]
    pub usage_month: String,
}

/// A change applied to the usage counters of one user
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UsageDelta {
    pub storage_bytes: i64,
    pub api_calls: i64,
    pub documents: i64,
}

impl UsageDelta {
    pub fn storage(bytes: i64) -> Self {
        Self { storage_bytes: bytes, ..Default::default() }
    }

    pub fn api_call() -> Self {
        Self { api_calls: 1, ..Default::default() }
    }

    pub fn document() -> Self {
        Self { documents: 1, ..Default::default() }
    }
}

impl Usage {
    /// Apply a delta, rolling the monthly document counter over when the month changed
    pub fn apply(&mut self, delta: UsageDelta, month: &str) {
        if self.usage_month != month {
            self.usage_month = month.to_string();
            self.documents_this_month = 0;
        }
        self.storage_used = (self.storage_used + delta.storage_bytes).max(0);
        self.api_calls += delta.api_calls;
        self.documents_this_month += delta.documents;
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "users")]
#[serde(rename_all = "camelCase")]
pub struct Model {
    /// Identity provider uid
    #[sea_orm(primary_key, auto_increment = false, column_type = "Text")]
    pub id: String,

    #[sea_orm(column_type = "Text", unique)]
    pub email: String,

    #[sea_orm(column_type = "Text")]
    pub display_name: String,

    pub role: Role,

    pub subscription: Subscription,

    pub is_active: bool,

    #[sea_orm(column_type = "JsonBinary")]
    pub usage: Usage,

    /// Free-form client preferences
    #[sea_orm(column_type = "JsonBinary")]
    pub preferences: Json,

    pub created_at: DateTimeUtc,

    pub updated_at: DateTimeUtc,

    pub last_login_at: Option<DateTimeUtc>,
}

impl Model {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::document::Entity")]
    Documents,
}

impl Related<super::document::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Documents.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_limits() {
        assert_eq!(Subscription::Free.max_upload_bytes(), 5_242_880);
        assert_eq!(Subscription::Premium.max_upload_bytes(), 52_428_800);
        assert_eq!(Subscription::Enterprise.max_upload_bytes(), 524_288_000);
    }

    #[test]
    fn test_usage_month_rollover() {
        let mut usage = Usage::default();
        usage.apply(UsageDelta::document(), "2026-09");
        usage.apply(UsageDelta::document(), "2026-09");
        assert_eq!(usage.documents_this_month, 2);

        usage.apply(UsageDelta::document(), "2026-10");
        assert_eq!(usage.documents_this_month, 1);
        assert_eq!(usage.usage_month, "2026-10");
    }

    #[test]
    fn test_storage_never_negative() {
        let mut usage = Usage::default();
        usage.apply(UsageDelta::storage(-100), "2026-10");
        assert_eq!(usage.storage_used, 0);
    }
}
