//! Analysis history and the derived views built from it

use crate::db::models::*;
use crate::errors::{AppError, Result};
use crate::policy::{authorize, require_subscription, Action, Caller, ResourceRef};
use crate::store::Store;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

/// Documents accepted by one comparison
pub const COMPARE_MIN: usize = 2;
pub const COMPARE_MAX: usize = 5;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskAssessment {
    pub document_id: Uuid,
    pub analysis_id: Uuid,
    pub risk_score: u32,
    pub risk_level: RiskLevel,
    pub total_risks: usize,
    pub by_severity: BTreeMap<Severity, usize>,
    pub by_category: BTreeMap<RiskType, usize>,
    pub risks: Vec<RiskFactor>,
    /// Recommendations ordered by severity, highest first, de-duplicated
    pub recommendations: Vec<String>,
}

impl RiskAssessment {
    pub fn from_record(record: &AnalysisRecord) -> Self {
        let result = &record.result;

        let mut by_severity = BTreeMap::new();
        let mut by_category = BTreeMap::new();
        for risk in &result.risks {
            *by_severity.entry(risk.severity).or_insert(0) += 1;
            *by_category.entry(risk.risk_type).or_insert(0) += 1;
        }

        let mut ranked: Vec<&RiskFactor> = result.risks.iter().collect();
        ranked.sort_by(|a, b| b.severity.cmp(&a.severity));
        let mut recommendations: Vec<String> = Vec::new();
        for risk in ranked {
            if !risk.recommendation.is_empty() && !recommendations.contains(&risk.recommendation) {
                recommendations.push(risk.recommendation.clone());
            }
        }

        Self {
            document_id: record.document_id,
            analysis_id: record.id,
            risk_score: result.risk_score(),
            risk_level: result.risk_level(),
            total_risks: result.risks.len(),
            by_severity,
            by_category,
            risks: result.risks.clone(),
            recommendations,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparedDocument {
    pub document_id: Uuid,
    pub title: String,
    pub summary: String,
    pub risk_score: u32,
    pub risk_level: RiskLevel,
    pub risk_categories: Vec<RiskType>,
    pub entities: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Comparison {
    pub documents: Vec<ComparedDocument>,
    /// Risk categories present in every document
    pub shared_risk_categories: Vec<RiskType>,
    /// Per document, categories no other document has
    pub unique_risk_categories: BTreeMap<Uuid, Vec<RiskType>>,
    pub shared_entities: Vec<String>,
    pub unique_entities: BTreeMap<Uuid, Vec<String>>,
}

impl Comparison {
    fn build(documents: Vec<ComparedDocument>) -> Self {
        let category_sets: Vec<BTreeSet<RiskType>> = documents
            .iter()
            .map(|d| d.risk_categories.iter().copied().collect())
            .collect();
        let entity_sets: Vec<BTreeSet<String>> = documents
            .iter()
            .map(|d| d.entities.iter().cloned().collect())
            .collect();

        let (shared_risk_categories, unique_cats) = shared_and_unique(&category_sets);
        let (shared_entities, unique_ents) = shared_and_unique(&entity_sets);

        let ids: Vec<Uuid> = documents.iter().map(|d| d.document_id).collect();
        Self {
            unique_risk_categories: ids.iter().copied().zip(unique_cats).collect(),
            unique_entities: ids.iter().copied().zip(unique_ents).collect(),
            shared_risk_categories,
            shared_entities,
            documents,
        }
    }
}

/// Items in every set, and for each set the items in no other set
fn shared_and_unique<T: Ord + Clone>(sets: &[BTreeSet<T>]) -> (Vec<T>, Vec<Vec<T>>) {
    let shared = match sets.split_first() {
        Some((first, rest)) => first
            .iter()
            .filter(|item| rest.iter().all(|s| s.contains(*item)))
            .cloned()
            .collect(),
        None => Vec::new(),
    };

    let unique = sets
        .iter()
        .enumerate()
        .map(|(i, set)| {
            set.iter()
                .filter(|item| {
                    sets.iter()
                        .enumerate()
                        .all(|(j, other)| i == j || !other.contains(*item))
                })
                .cloned()
                .collect()
        })
        .collect();

    (shared, unique)
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompareInput {
    pub document_ids: Vec<Uuid>,
}

#[derive(Clone)]
pub struct AnalysisService {
    store: Arc<dyn Store>,
}

impl AnalysisService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    async fn load_document(&self, caller: Option<&Caller>, id: Uuid, action: Action) -> Result<Document> {
        let doc = self
            .store
            .get_document(id)
            .await?
            .ok_or_else(|| AppError::DocumentNotFound { id: id.to_string() })?;
        authorize(caller, action, ResourceRef::from(&doc))?;
        Ok(doc)
    }

    async fn latest_for(&self, doc: &Document) -> Result<AnalysisRecord> {
        self.store
            .latest_analysis(doc.id)
            .await?
            .ok_or_else(|| AppError::AnalysisNotFound {
                document_id: doc.id.to_string(),
            })
    }

    /// Latest analysis of a document visible to the caller
    pub async fn latest(&self, caller: Option<&Caller>, document_id: Uuid) -> Result<AnalysisRecord> {
        let doc = self.load_document(caller, document_id, Action::ListAnalyses).await?;
        self.latest_for(&doc).await
    }

    /// Every analysis of a document, newest first. Does not count a view.
    pub async fn list_by_document(&self, caller: Option<&Caller>, document_id: Uuid) -> Result<Vec<AnalysisRecord>> {
        self.load_document(caller, document_id, Action::ListAnalyses).await?;
        self.store.list_analyses(document_id).await
    }

    /// Processed, owned by the caller, and on a paid plan
    async fn derivable(&self, caller: &Caller, document_id: Uuid) -> Result<(Document, AnalysisRecord)> {
        let doc = self
            .load_document(Some(caller), document_id, Action::DeriveAnalysis)
            .await?;
        require_subscription(caller, Subscription::PAID)?;
        if doc.status != DocumentStatus::Processed {
            return Err(AppError::DocumentNotProcessed {
                status: doc.status.as_str().to_string(),
            });
        }
        let record = self.latest_for(&doc).await?;
        Ok((doc, record))
    }

    #[instrument(skip(self, caller), fields(user_id = %caller.uid))]
    pub async fn risk_assessment(&self, caller: &Caller, document_id: Uuid) -> Result<RiskAssessment> {
        let (_, record) = self.derivable(caller, document_id).await?;
        Ok(RiskAssessment::from_record(&record))
    }

    #[instrument(skip(self, caller, input), fields(user_id = %caller.uid))]
    pub async fn compare(&self, caller: &Caller, input: CompareInput) -> Result<Comparison> {
        let mut ids: Vec<Uuid> = Vec::with_capacity(input.document_ids.len());
        for id in input.document_ids {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        if ids.len() < COMPARE_MIN || ids.len() > COMPARE_MAX {
            return Err(AppError::validation(
                "documentIds",
                format!("Provide between {} and {} distinct documents", COMPARE_MIN, COMPARE_MAX),
            ));
        }

        let mut documents = Vec::with_capacity(ids.len());
        for id in ids {
            let (doc, record) = self.derivable(caller, id).await?;
            let result = &record.result;
            let categories: BTreeSet<RiskType> = result.risks.iter().map(|r| r.risk_type).collect();
            let entities: BTreeSet<String> = result.entities.iter().map(|e| e.name.clone()).collect();
            documents.push(ComparedDocument {
                document_id: doc.id,
                title: doc.title,
                summary: result.summary.clone(),
                risk_score: result.risk_score(),
                risk_level: result.risk_level(),
                risk_categories: categories.into_iter().collect(),
                entities: entities.into_iter().collect(),
            });
        }

        Ok(Comparison::build(documents))
    }
}
