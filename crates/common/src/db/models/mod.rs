//! SeaORM entity models
//!
//! Database entities for LexDesk

mod analysis;
mod batch_job;
mod document;
mod identity;
mod notification;
mod qa_session;
mod user;

pub use user::{
    Entity as UserEntity,
    Model as User,
    ActiveModel as UserActiveModel,
    Column as UserColumn,
    Role,
    Subscription,
    Usage,
    UsageDelta,
};

pub use document::{
    Entity as DocumentEntity,
    Model as Document,
    ActiveModel as DocumentActiveModel,
    Column as DocumentColumn,
    AnalysisPointer,
    DocumentStatus,
    ProcessingInfo,
    ProcessingOptions,
    ProcessingState,
    TagList,
};

pub use analysis::{
    Entity as AnalysisEntity,
    Model as AnalysisRecord,
    ActiveModel as AnalysisActiveModel,
    Column as AnalysisColumn,
    AnalysisResult,
    AnalysisType,
    EntityType,
    ExtractedEntity,
    RiskFactor,
    RiskLevel,
    RiskType,
    Severity,
};

pub use qa_session::{
    Entity as QaSessionEntity,
    Model as QaSession,
    ActiveModel as QaSessionActiveModel,
    Column as QaSessionColumn,
    Answer,
    AnswerSource,
    Feedback,
    Question,
};

pub use batch_job::{
    Entity as BatchJobEntity,
    Model as BatchJob,
    ActiveModel as BatchJobActiveModel,
    Column as BatchJobColumn,
    BatchItemResult,
    BatchItemStatus,
    BatchProgress,
    BatchStatus,
    IdList,
};

pub use identity::{
    Entity as IdentityEntity,
    Model as IdentityAccount,
    ActiveModel as IdentityActiveModel,
    Column as IdentityColumn,
};

pub use notification::{
    Entity as NotificationEntity,
    Model as Notification,
    ActiveModel as NotificationActiveModel,
    Column as NotificationColumn,
};
