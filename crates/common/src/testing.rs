//! Fixtures shared by unit tests

use crate::db::models::*;
use chrono::Utc;
use uuid::Uuid;

pub fn sample_user(id: &str, subscription: Subscription) -> User {
    let now = Utc::now();
    User {
        id: id.to_string(),
        email: format!("{}@example.com", id),
        display_name: id.to_string(),
        role: Role::User,
        subscription,
        is_active: true,
        usage: Usage::default(),
        preferences: serde_json::json!({}),
        created_at: now,
        updated_at: now,
        last_login_at: None,
    }
}

pub fn sample_document(owner_id: &str, status: DocumentStatus) -> Document {
    let now = Utc::now();
    Document {
        id: Uuid::new_v4(),
        owner_id: owner_id.to_string(),
        file_name: "contract.txt".to_string(),
        title: "contract.txt".to_string(),
        description: None,
        file_size: 1024,
        content_type: "text/plain".to_string(),
        tags: TagList::default(),
        is_public: false,
        status,
        upload_progress: 0,
        processing: ProcessingInfo::default(),
        analysis: None,
        views: 0,
        questions_asked: 0,
        last_viewed_at: None,
        created_at: now,
        updated_at: now,
    }
}

pub fn sample_result() -> AnalysisResult {
    AnalysisResult {
        extracted_text: "The Supplier shall be paid within 30 days.".to_string(),
        risks: vec![RiskFactor {
            risk_type: RiskType::Payment,
            severity: Severity::Medium,
            description: "Payment term".to_string(),
            location: None,
            recommendation: "Confirm the payment schedule".to_string(),
        }],
        entities: vec![ExtractedEntity {
            entity_type: EntityType::Party,
            name: "Supplier".to_string(),
            confidence: 0.9,
        }],
        summary: "Supply agreement".to_string(),
        confidence: 0.8,
        page_count: Some(1),
        language: Some("en".to_string()),
    }
}
