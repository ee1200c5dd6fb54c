//! Message orchestration: skills first, then the completion fallback, with
//! every exchange recorded in memory.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use mesh_config::AppConfig;
use mesh_llm::{CompletionRequest, LlmRouter};
use mesh_memory::{
    FeedbackOutcome, LearningEvent, LearningKind, MemoryManager, ReplySource, Topic, TurnMetadata,
    classify_feedback, primary_topic, short_id,
};
use mesh_skills::SkillRegistry;

use crate::persona::build_system_prompt;

/// Improvement area recorded when no provider could answer.
const COMPLETION_AREA: &str = "completion";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BotReply {
    pub text: String,
    pub source: ReplySource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skill: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

impl BotReply {
    fn fixed(text: &str, source: ReplySource) -> Self {
        Self {
            text: text.to_string(),
            source,
            skill: None,
            provider: None,
        }
    }

    /// True when the request ran past its deadline.
    pub fn timed_out(&self) -> bool {
        self.source == ReplySource::Error
    }
}

/// A reply plus what the exchange taught us, not yet recorded.
struct Answer {
    reply: BotReply,
    topic: Topic,
    learned: Vec<LearningKind>,
}

/// The assistant: owns the memory store, the skill registry and the
/// completion router.
pub struct MeshBot {
    config: AppConfig,
    memory: Arc<MemoryManager>,
    skills: Arc<SkillRegistry>,
    llm: LlmRouter,
}

impl MeshBot {
    pub fn new(
        config: AppConfig,
        memory: Arc<MemoryManager>,
        skills: Arc<SkillRegistry>,
        llm: LlmRouter,
    ) -> Self {
        Self {
            config,
            memory,
            skills,
            llm,
        }
    }

    /// Wire up the built-in skills, the configured providers and the memory
    /// backend.  With the event-log backend the log is replayed first.
    pub fn from_config(config: AppConfig) -> Result<Self> {
        let memory = if config.memory.uses_event_log() {
            MemoryManager::with_event_log(config.memory.clone(), &config.memory.event_log_path)?
        } else {
            MemoryManager::new(config.memory.clone())
        };
        let llm = LlmRouter::from_config(&config.llm);

        info!(
            backend = %config.memory.backend,
            providers = ?llm.providers(),
            "bot initialised"
        );

        Ok(Self::new(
            config,
            Arc::new(memory),
            Arc::new(SkillRegistry::with_builtins()),
            llm,
        ))
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn memory(&self) -> &Arc<MemoryManager> {
        &self.memory
    }

    pub fn skills(&self) -> &SkillRegistry {
        &self.skills
    }

    pub fn llm(&self) -> &LlmRouter {
        &self.llm
    }

    /// Answer one message.  Never fails: problems end in a template reply or,
    /// past the request deadline, in the configured apology.
    ///
    /// The deadline covers skill dispatch and the completion call.  Memory is
    /// recorded afterwards, and only for answered messages.
    #[instrument(skip_all, fields(user = %short_id(user_id), channel = %channel))]
    pub async fn handle_message(
        &self,
        user_id: &str,
        text: &str,
        channel: &str,
        cancel: &CancellationToken,
    ) -> BotReply {
        if text.trim().is_empty() {
            debug!("empty message, greeting");
            return BotReply::fixed(&self.config.bot.greeting, ReplySource::Greeting);
        }

        let started = Instant::now();
        let deadline = Duration::from_secs(self.config.server.request_timeout_secs);
        let answer = match tokio::time::timeout(deadline, self.answer(user_id, text, cancel)).await {
            Ok(answer) => answer,
            Err(_) => {
                cancel.cancel();
                warn!(timeout = ?deadline, "request deadline exceeded");
                return BotReply::fixed(&self.config.bot.apology, ReplySource::Error);
            }
        };
        let processing_ms = started.elapsed().as_millis() as u64;

        let Answer {
            reply,
            topic,
            learned,
        } = answer;
        let mut metadata = TurnMetadata::new(channel, reply.source);
        metadata.skill = reply.skill.clone();
        metadata.processing_ms = processing_ms;
        if let Err(err) = self.memory.save_turn(user_id, text, &reply.text, metadata).await {
            warn!(error = %err, "failed to persist turn");
        }
        self.record_learning(user_id, learned).await;

        info!(
            source = ?reply.source,
            skill = reply.skill.as_deref().unwrap_or("-"),
            topic = topic.as_str(),
            processing_ms,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "message answered"
        );
        reply
    }

    async fn answer(&self, user_id: &str, text: &str, cancel: &CancellationToken) -> Answer {
        let context = self.memory.context_for_response(user_id);
        let topic = primary_topic(text);
        let mut learned = Vec::new();

        let outcome = self.skills.dispatch(text, &context).await;
        for attempt in outcome.failed_attempts() {
            learned.push(LearningKind::SkillUsage {
                skill: attempt.skill.clone(),
                success: false,
            });
            learned.push(LearningKind::FailedInteraction {
                topic,
                area: format!("skill:{}", attempt.skill),
            });
        }

        let reply = match outcome.reply {
            Some((name, output)) => {
                learned.push(LearningKind::SkillUsage {
                    skill: name.clone(),
                    success: true,
                });
                learned.push(LearningKind::SuccessfulInteraction {
                    skill: Some(name.clone()),
                });
                BotReply {
                    text: output.text,
                    source: ReplySource::Skill,
                    skill: Some(name),
                    provider: None,
                }
            }
            None => {
                let system = build_system_prompt(&self.config.bot, &context.profile);
                let completion = self
                    .llm
                    .complete(&CompletionRequest::new(system, text), cancel)
                    .await;
                if completion.is_template() {
                    learned.push(LearningKind::FailedInteraction {
                        topic,
                        area: COMPLETION_AREA.to_string(),
                    });
                    BotReply::fixed(&completion.text, ReplySource::Template)
                } else {
                    learned.push(LearningKind::SuccessfulInteraction { skill: None });
                    BotReply {
                        text: completion.text,
                        source: ReplySource::Completion,
                        skill: None,
                        provider: completion.provider,
                    }
                }
            }
        };

        Answer {
            reply,
            topic,
            learned,
        }
    }

    async fn record_learning(&self, user_id: &str, kinds: Vec<LearningKind>) {
        for kind in kinds {
            if let Err(err) = self
                .memory
                .record_learning_event(LearningEvent::new(user_id, kind))
                .await
            {
                warn!(error = %err, "failed to persist learning event");
            }
        }
    }

    /// Record a rating and/or comment.  The profile is updated even when the
    /// event log write fails; the outcome then reflects the in-memory state.
    pub async fn submit_feedback(
        &self,
        user_id: &str,
        rating: Option<u8>,
        text: &str,
    ) -> FeedbackOutcome {
        match self.memory.record_feedback(user_id, rating, text).await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(user = %short_id(user_id), error = %err, "failed to persist feedback");
                let profile = self.memory.get_profile(user_id);
                let sentiment = classify_feedback(text);
                FeedbackOutcome {
                    user_id: user_id.to_string(),
                    sentiment,
                    satisfaction_score: profile.satisfaction_score,
                    feedback_count: profile.feedback_count,
                    insights: self.memory.feedback_insights(user_id, sentiment),
                }
            }
        }
    }
}
