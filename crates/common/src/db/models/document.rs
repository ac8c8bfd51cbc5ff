//! Document entity and its lifecycle states

use sea_orm::entity::prelude::*;
use sea_orm::FromJsonQueryResult;
use serde::{Deserialize, Serialize};

use super::analysis::{AnalysisType, RiskLevel};

/// Lifecycle status of a document
///
/// `uploading -> uploaded -> processing -> {processed | error}`, with
/// `processed | error -> processing` reserved for reanalysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    #[sea_orm(string_value = "uploading")]
    Uploading,
    #[sea_orm(string_value = "uploaded")]
    Uploaded,
    #[sea_orm(string_value = "processing")]
    Processing,
    #[sea_orm(string_value = "processed")]
    Processed,
    #[sea_orm(string_value = "error")]
    Error,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Uploading => "uploading",
            DocumentStatus::Uploaded => "uploaded",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Processed => "processed",
            DocumentStatus::Error => "error",
        }
    }

    /// Whether `self -> next` is an edge of the lifecycle graph
    pub fn can_transition_to(&self, next: DocumentStatus, reanalysis: bool) -> bool {
        use DocumentStatus::*;
        match (self, next) {
            (Uploading, Uploaded) => true,
            (Uploaded, Processing) => !reanalysis,
            (Processed | Error, Processing) => reanalysis,
            (Processing, Processed | Error) => true,
            _ => false,
        }
    }
}

/// Progress of the processing pipeline for the current run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingState {
    Queued,
    Started,
    Completed,
    Error,
}

/// Options forwarded to the extraction service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromJsonQueryResult)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingOptions {
    #[serde(default = "default_true")]
    pub extract_text: bool,
    #[serde(default = "default_true")]
    pub extract_entities: bool,
    #[serde(default = "default_true")]
    pub analyze_risks: bool,
    #[serde(default = "default_true")]
    pub generate_summary: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

fn default_true() -> bool {
    true
}

impl Default for ProcessingOptions {
    fn default() -> Self {
        Self {
            extract_text: true,
            extract_entities: true,
            analyze_risks: true,
            generate_summary: true,
            language: None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, FromJsonQueryResult)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingInfo {
    pub status: Option<ProcessingState>,
    pub started_at: Option<DateTimeUtc>,
    pub completed_at: Option<DateTimeUtc>,
    pub error: Option<String>,
    #[serde(default)]
    pub options: ProcessingOptions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<Uuid>,
}

impl ProcessingInfo {
    pub fn started(options: ProcessingOptions, at: DateTimeUtc) -> Self {
        Self {
            status: Some(ProcessingState::Started),
            started_at: Some(at),
            completed_at: None,
            error: None,
            options,
            batch_id: None,
        }
    }

    pub fn queued(options: ProcessingOptions, batch_id: Uuid, at: DateTimeUtc) -> Self {
        Self {
            status: Some(ProcessingState::Queued),
            started_at: Some(at),
            completed_at: None,
            error: None,
            options,
            batch_id: Some(batch_id),
        }
    }
}

/// Denormalized projection of the latest analysis record.
/// Written only by the processing completion transaction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, FromJsonQueryResult)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisPointer {
    pub analysis_id: Uuid,
    pub analysis_type: AnalysisType,
    pub summary: String,
    pub risk_level: RiskLevel,
    pub risk_count: u32,
    pub entity_count: u32,
    pub confidence: f64,
    pub analyzed_at: DateTimeUtc,
}

/// Ordered, de-duplicated tag list
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, FromJsonQueryResult)]
pub struct TagList(pub Vec<String>);

impl TagList {
    pub fn normalized<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut out: Vec<String> = Vec::new();
        for tag in tags {
            let tag = tag.as_ref().trim().to_lowercase();
            if !tag.is_empty() && !out.contains(&tag) {
                out.push(tag);
            }
        }
        Self(out)
    }

    pub fn contains_all(&self, wanted: &[String]) -> bool {
        wanted.iter().all(|t| self.0.contains(t))
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "documents")]
#[serde(rename_all = "camelCase")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(column_type = "Text")]
    pub owner_id: String,

    #[sea_orm(column_type = "Text")]
    pub file_name: String,

    #[sea_orm(column_type = "Text")]
    pub title: String,

    #[sea_orm(column_type = "Text", nullable)]
    pub description: Option<String>,

    pub file_size: i64,

    #[sea_orm(column_type = "Text")]
    pub content_type: String,

    #[sea_orm(column_type = "JsonBinary")]
    pub tags: TagList,

    pub is_public: bool,

    pub status: DocumentStatus,

    pub upload_progress: i32,

    #[sea_orm(column_type = "JsonBinary")]
    pub processing: ProcessingInfo,

    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub analysis: Option<AnalysisPointer>,

    pub views: i64,

    pub questions_asked: i64,

    pub last_viewed_at: Option<DateTimeUtc>,

    pub created_at: DateTimeUtc,

    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::OwnerId",
        to = "super::user::Column::Id"
    )]
    Owner,

    #[sea_orm(has_many = "super::analysis::Entity")]
    Analyses,

    #[sea_orm(has_many = "super::qa_session::Entity")]
    QaSessions,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Owner.def()
    }
}

impl Related<super::analysis::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Analyses.def()
    }
}

impl Related<super::qa_session::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::QaSessions.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_edges() {
        use DocumentStatus::*;
        assert!(Uploading.can_transition_to(Uploaded, false));
        assert!(Uploaded.can_transition_to(Processing, false));
        assert!(!Uploaded.can_transition_to(Processing, true));
        assert!(!Uploading.can_transition_to(Processing, false));
        assert!(!Uploading.can_transition_to(Processing, true));
        assert!(Processed.can_transition_to(Processing, true));
        assert!(Error.can_transition_to(Processing, true));
        assert!(!Processed.can_transition_to(Processing, false));
        assert!(!Processing.can_transition_to(Processing, true));
        assert!(Processing.can_transition_to(Processed, false));
        assert!(Processing.can_transition_to(Error, false));
    }

    #[test]
    fn test_tags_normalized() {
        let tags = TagList::normalized(["NDA", " nda ", "", "Vendor"]);
        assert_eq!(tags.0, vec!["nda".to_string(), "vendor".to_string()]);
        assert!(tags.contains_all(&["vendor".to_string()]));
        assert!(!tags.contains_all(&["lease".to_string()]));
    }

    #[test]
    fn test_processing_options_defaults() {
        let opts: ProcessingOptions = serde_json::from_str(r#"{"extractText": true}"#).unwrap();
        assert!(opts.analyze_risks);
        assert!(opts.language.is_none());
    }
}
