use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::feedback::FeedbackSentiment;

// ── Topics and style ─────────────────────────────────────────────────────────

/// Finance topic buckets a message can fall into.  Declaration order is the
/// tie-break order when ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    FluxoCaixa,
    ConciliacaoBancaria,
    Relatorios,
    Dre,
    BalancoPatrimonial,
    Compliance,
    General,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FluxoCaixa => "fluxo_caixa",
            Self::ConciliacaoBancaria => "conciliacao_bancaria",
            Self::Relatorios => "relatorios",
            Self::Dre => "dre",
            Self::BalancoPatrimonial => "balanco_patrimonial",
            Self::Compliance => "compliance",
            Self::General => "general",
        }
    }

    /// Human-readable Portuguese label for prompts.
    pub fn label(&self) -> &'static str {
        match self {
            Self::FluxoCaixa => "fluxo de caixa",
            Self::ConciliacaoBancaria => "conciliação bancária",
            Self::Relatorios => "relatórios",
            Self::Dre => "DRE",
            Self::BalancoPatrimonial => "balanço patrimonial",
            Self::Compliance => "compliance e auditoria",
            Self::General => "assuntos gerais",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommunicationStyle {
    Detailed,
    Concise,
    #[default]
    Professional,
}

impl CommunicationStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Detailed => "detailed",
            Self::Concise => "concise",
            Self::Professional => "professional",
        }
    }
}

// ── Turns ────────────────────────────────────────────────────────────────────

/// Where the bot text of a turn came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplySource {
    Skill,
    Completion,
    Template,
    Greeting,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnMetadata {
    pub channel: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skill: Option<String>,
    pub source: ReplySource,
    pub processing_ms: u64,
    /// Lengths before truncation, in characters.
    pub message_length: usize,
    pub response_length: usize,
}

impl TurnMetadata {
    pub fn new(channel: impl Into<String>, source: ReplySource) -> Self {
        Self {
            channel: channel.into(),
            skill: None,
            source,
            processing_ms: 0,
            message_length: 0,
            response_length: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub id: Uuid,
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
    pub user_text: String,
    pub bot_text: String,
    pub topic: Topic,
    pub metadata: TurnMetadata,
}

// ── Learning events ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    SuccessfulInteraction,
    FailedInteraction,
    UserFeedback,
    SkillUsage,
}

impl EventCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SuccessfulInteraction => "successful_interaction",
            Self::FailedInteraction => "failed_interaction",
            Self::UserFeedback => "user_feedback",
            Self::SkillUsage => "skill_usage",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "snake_case")]
pub enum LearningKind {
    SuccessfulInteraction {
        #[serde(default)]
        skill: Option<String>,
    },
    FailedInteraction {
        topic: Topic,
        area: String,
    },
    UserFeedback {
        sentiment: FeedbackSentiment,
        #[serde(default)]
        rating: Option<u8>,
        /// Score on `[0, 1]` blended into the satisfaction mean.
        sample: f32,
    },
    SkillUsage {
        skill: String,
        success: bool,
    },
}

impl LearningKind {
    pub fn category(&self) -> EventCategory {
        match self {
            Self::SuccessfulInteraction { .. } => EventCategory::SuccessfulInteraction,
            Self::FailedInteraction { .. } => EventCategory::FailedInteraction,
            Self::UserFeedback { .. } => EventCategory::UserFeedback,
            Self::SkillUsage { .. } => EventCategory::SkillUsage,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningEvent {
    pub id: Uuid,
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: LearningKind,
    #[serde(default)]
    pub processed: bool,
}

impl LearningEvent {
    pub fn new(user_id: impl Into<String>, kind: LearningKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            timestamp: Utc::now(),
            kind,
            processed: false,
        }
    }

    pub fn category(&self) -> EventCategory {
        self.kind.category()
    }
}

// ── Profile ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub user_id: String,
    pub preferred_topics: Vec<Topic>,
    pub communication_style: CommunicationStyle,
    pub satisfaction_score: f32,
    pub feedback_count: u32,
    pub common_tasks: Vec<String>,
    /// Successful executions per skill name.
    pub skill_usage: BTreeMap<String, u32>,
    pub total_interactions: u64,
    pub successful_interactions: u64,
    pub problematic_topics: Vec<Topic>,
    pub improvement_areas: Vec<String>,
    /// Local hours of day (0-23) with the most activity, busiest first.
    pub peak_hours: Vec<u32>,
    pub created_at: DateTime<Utc>,
    pub last_interaction: Option<DateTime<Utc>>,
    pub last_updated: DateTime<Utc>,
}

impl Profile {
    pub fn new(user_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            user_id: user_id.into(),
            preferred_topics: Vec::new(),
            communication_style: CommunicationStyle::default(),
            satisfaction_score: 0.0,
            feedback_count: 0,
            common_tasks: Vec::new(),
            skill_usage: BTreeMap::new(),
            total_interactions: 0,
            successful_interactions: 0,
            problematic_topics: Vec::new(),
            improvement_areas: Vec::new(),
            peak_hours: Vec::new(),
            created_at: now,
            last_interaction: None,
            last_updated: now,
        }
    }

    pub fn top_topic(&self) -> Option<Topic> {
        self.preferred_topics.first().copied()
    }
}
