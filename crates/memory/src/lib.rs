pub mod event_log;
pub mod feedback;
pub mod insights;
pub mod manager;
pub mod profile;
pub mod schema;
pub mod store;
pub mod topics;

pub use feedback::{FeedbackSentiment, classify_feedback};
pub use insights::{FeedbackInsights, Recommendations, SatisfactionTrend, TrendDirection};
pub use manager::{
    CleanupReport, FeedbackOutcome, MemoryManager, MemoryStats, ResponseContext, UserStats,
    short_id, truncate_chars,
};
pub use profile::format_profile_block;
pub use schema::{
    CommunicationStyle, ConversationTurn, EventCategory, LearningEvent, LearningKind, Profile,
    ReplySource, Topic, TurnMetadata,
};
pub use topics::primary_topic;
