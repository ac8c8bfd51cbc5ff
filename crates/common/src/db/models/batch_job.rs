//! Batch processing job entity

use sea_orm::entity::prelude::*;
use sea_orm::FromJsonQueryResult;
use serde::{Deserialize, Serialize};

use super::document::ProcessingOptions;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    #[sea_orm(string_value = "queued")]
    Queued,
    #[sea_orm(string_value = "processing")]
    Processing,
    #[sea_orm(string_value = "completed")]
    Completed,
    #[sea_orm(string_value = "partial")]
    Partial,
    #[sea_orm(string_value = "failed")]
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchItemStatus {
    Completed,
    Failed,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItemResult {
    pub document_id: Uuid,
    pub status: BatchItemStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, FromJsonQueryResult)]
#[serde(rename_all = "camelCase")]
pub struct BatchProgress {
    pub total: u32,
    pub completed: u32,
    pub failed: u32,
    #[serde(default)]
    pub results: Vec<BatchItemResult>,
}

impl BatchProgress {
    pub fn new(total: u32) -> Self {
        Self { total, ..Default::default() }
    }

    pub fn record(&mut self, result: BatchItemResult) {
        match result.status {
            BatchItemStatus::Completed => self.completed += 1,
            BatchItemStatus::Failed => self.failed += 1,
        }
        self.results.push(result);
    }

    pub fn is_finished(&self) -> bool {
        self.completed + self.failed >= self.total
    }

    /// Terminal status once every member has reported
    pub fn final_status(&self) -> BatchStatus {
        if self.failed == 0 {
            BatchStatus::Completed
        } else if self.completed == 0 {
            BatchStatus::Failed
        } else {
            BatchStatus::Partial
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, FromJsonQueryResult)]
pub struct IdList(pub Vec<Uuid>);

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "batch_jobs")]
#[serde(rename_all = "camelCase")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(column_type = "Text")]
    pub owner_id: String,

    #[sea_orm(column_type = "JsonBinary")]
    pub document_ids: IdList,

    pub status: BatchStatus,

    #[sea_orm(column_type = "JsonBinary")]
    pub progress: BatchProgress,

    #[sea_orm(column_type = "JsonBinary")]
    pub options: ProcessingOptions,

    pub created_at: DateTimeUtc,

    pub updated_at: DateTimeUtc,

    pub completed_at: Option<DateTimeUtc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
