use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use mesh_config::MemoryConfig;

use crate::event_log::{LogWriter, MemoryEventLog, MemoryRecord, MemoryRecordEvent};
use crate::feedback::{FeedbackSentiment, classify_feedback, feedback_sample};
use crate::insights::{self, ANALYSIS_TURNS, FeedbackInsights, Recommendations};
use crate::profile::{self, DerivationSettings};
use crate::schema::{
    ConversationTurn, EventCategory, LearningEvent, LearningKind, Profile, Topic, TurnMetadata,
};
use crate::store::HistoryStore;
use crate::topics::primary_topic;

/// Number of recent turns whose topics are handed to skills and prompts.
const RECENT_TOPIC_TURNS: usize = 5;

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct MemoryStats {
    pub users: usize,
    pub turns: usize,
    pub learning_events: usize,
    pub unprocessed_events: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct UserStats {
    pub user_id: String,
    pub stored_turns: usize,
    pub total_interactions: u64,
    pub successful_interactions: u64,
    pub conversations_this_week: usize,
    pub satisfaction_score: f32,
    pub feedback_count: u32,
    pub preferred_topics: Vec<Topic>,
    pub common_tasks: Vec<String>,
    pub last_interaction: Option<DateTime<Utc>>,
}

/// What a feedback call changed.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FeedbackOutcome {
    pub user_id: String,
    pub sentiment: FeedbackSentiment,
    pub satisfaction_score: f32,
    pub feedback_count: u32,
    pub insights: FeedbackInsights,
}

/// Snapshot handed to skills and the persona prompt.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ResponseContext {
    pub profile: Profile,
    pub recent_topics: Vec<Topic>,
}

impl ResponseContext {
    pub fn empty(user_id: impl Into<String>) -> Self {
        Self {
            profile: Profile::new(user_id),
            recent_topics: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct CleanupReport {
    pub turns_removed: usize,
    pub events_removed: usize,
}

#[derive(Debug)]
struct UserMemory {
    history: HistoryStore,
    profile: Profile,
}

impl UserMemory {
    fn new(user_id: &str, capacity: usize) -> Self {
        Self {
            history: HistoryStore::new(capacity),
            profile: Profile::new(user_id),
        }
    }
}

/// Per-user conversation history, derived profiles and the learning-event
/// queue.
///
/// User state lives in a sharded map so requests for different users never
/// contend.  Learning events sit behind one short-lived mutex that is never
/// held across an await point.
pub struct MemoryManager {
    config: MemoryConfig,
    settings: DerivationSettings,
    users: DashMap<String, UserMemory>,
    events: Mutex<Vec<LearningEvent>>,
    event_log: Option<MemoryEventLog>,
}

impl MemoryManager {
    pub fn new(config: MemoryConfig) -> Self {
        let settings = DerivationSettings::from_config(&config);
        Self {
            config,
            settings,
            users: DashMap::new(),
            events: Mutex::new(Vec::new()),
            event_log: None,
        }
    }

    /// Attach a JSONL log at `path` and rebuild state from whatever it holds.
    /// Replayed learning events count as already folded.
    pub fn with_event_log(config: MemoryConfig, path: impl AsRef<Path>) -> Result<Self> {
        let mut manager = Self::new(config);
        let log = MemoryEventLog::new(path.as_ref());
        let records = log.load()?;
        let record_count = records.len();

        for event in records {
            match event.record {
                MemoryRecord::Turn(turn) => {
                    let mut user = manager
                        .users
                        .entry(turn.user_id.clone())
                        .or_insert_with(|| UserMemory::new(&turn.user_id, manager.config.max_history));
                    user.profile.total_interactions += 1;
                    user.history.push(turn);
                }
                MemoryRecord::Learning(mut learning) => {
                    learning.processed = true;
                    manager.events.get_mut().push(learning);
                }
            }
        }

        let mut user_ids: Vec<String> = manager.users.iter().map(|e| e.key().clone()).collect();
        user_ids.extend(manager.events.get_mut().iter().map(|e| e.user_id.clone()));
        user_ids.sort();
        user_ids.dedup();
        for user_id in &user_ids {
            manager.rebuild_profile(user_id);
        }

        info!(
            records = record_count,
            users = user_ids.len(),
            path = %log.path().display(),
            "memory replayed from event log"
        );
        manager.event_log = Some(log);
        Ok(manager)
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    pub fn has_event_log(&self) -> bool {
        self.event_log.is_some()
    }

    /// Exclusive access to the event log, if one is attached.  Writers take
    /// it before touching in-memory state so a concurrent cleanup sees either
    /// both the state change and its log line or neither.
    async fn log_writer(&self) -> Option<LogWriter<'_>> {
        match &self.event_log {
            Some(log) => Some(log.writer().await),
            None => None,
        }
    }

    // ── Turns ────────────────────────────────────────────────────────────────

    /// Store one exchange and refresh the user's profile.
    ///
    /// Texts are cut to the configured character limits; the original
    /// lengths are kept in the metadata.  The in-memory state is always
    /// updated; an `Err` only reports that the event log append failed.
    pub async fn save_turn(
        &self,
        user_id: &str,
        user_text: &str,
        bot_text: &str,
        mut metadata: TurnMetadata,
    ) -> Result<ConversationTurn> {
        metadata.message_length = user_text.chars().count();
        metadata.response_length = bot_text.chars().count();

        let turn = ConversationTurn {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            timestamp: Utc::now(),
            user_text: truncate_chars(user_text, self.config.max_input_chars),
            bot_text: truncate_chars(bot_text, self.config.max_output_chars),
            topic: primary_topic(user_text),
            metadata,
        };

        let mut writer = self.log_writer().await;
        {
            let mut user = self.user_entry(user_id);
            let evicted = user.history.push(turn.clone());
            if evicted > 0 {
                debug!(user = %short_id(user_id), evicted, "history cap reached");
            }

            let mut next = user.profile.clone();
            next.total_interactions += 1;
            profile::derive_from_turns(&mut next, user.history.as_slice(), &self.settings);
            next.last_updated = Utc::now();
            user.profile = next;
        }

        persist(writer.as_mut(), MemoryRecord::Turn(turn.clone())).await?;
        Ok(turn)
    }

    /// The last `limit` turns, oldest first.
    pub fn get_history(&self, user_id: &str, limit: usize) -> Vec<ConversationTurn> {
        self.users
            .get(user_id)
            .map(|user| user.history.recent(limit))
            .unwrap_or_default()
    }

    // ── Profiles ─────────────────────────────────────────────────────────────

    /// Current profile, creating the default one on first access.
    pub fn get_profile(&self, user_id: &str) -> Profile {
        self.user_entry(user_id).profile.clone()
    }

    pub fn context_for_response(&self, user_id: &str) -> ResponseContext {
        let user = self.user_entry(user_id);
        let recent_topics = user
            .history
            .recent(RECENT_TOPIC_TURNS)
            .iter()
            .map(|turn| turn.topic)
            .filter(|topic| *topic != Topic::General)
            .collect();
        ResponseContext {
            profile: user.profile.clone(),
            recent_topics,
        }
    }

    /// Recompute a profile from scratch out of the stored turns and the
    /// retained learning events.  Counters that outlive the history window
    /// (`total_interactions`, `created_at`) are carried over.
    pub fn rebuild_profile(&self, user_id: &str) -> Profile {
        let (turns, previous) = {
            let mut user = self.user_entry(user_id);
            (user.history.as_slice().to_vec(), user.profile.clone())
        };
        let events: Vec<LearningEvent> = self
            .events
            .lock()
            .iter()
            .filter(|event| event.user_id == user_id)
            .cloned()
            .collect();

        let mut rebuilt = Profile::new(user_id);
        rebuilt.created_at = previous.created_at;
        rebuilt.total_interactions = previous.total_interactions.max(turns.len() as u64);

        for event in &events {
            if let LearningKind::UserFeedback { sample, .. } = &event.kind {
                profile::apply_feedback_sample(&mut rebuilt, *sample);
            }
            if event.processed {
                profile::apply_learning(&mut rebuilt, event, &self.settings);
            }
        }
        profile::derive_from_turns(&mut rebuilt, &turns, &self.settings);

        if let Some(mut user) = self.users.get_mut(user_id) {
            user.profile = rebuilt.clone();
        }
        rebuilt
    }

    // ── Learning events ──────────────────────────────────────────────────────

    /// Queue a learning event.  Once enough unprocessed events pile up they
    /// are folded into profiles; the return value is how many were folded.
    pub async fn record_learning_event(&self, event: LearningEvent) -> Result<usize> {
        debug!(
            user = %short_id(&event.user_id),
            category = event.category().as_str(),
            "learning event recorded"
        );
        let mut writer = self.log_writer().await;
        let pending = {
            let mut events = self.events.lock();
            events.push(event.clone());
            events.iter().filter(|e| !e.processed).count()
        };

        let persisted = persist(writer.as_mut(), MemoryRecord::Learning(event)).await;
        drop(writer);

        let folded = if pending >= self.config.learning_batch_threshold.max(1) {
            self.process_learning_batch()
        } else {
            0
        };

        persisted?;
        Ok(folded)
    }

    /// Fold every unprocessed event into its user's profile, grouped by
    /// category.
    pub fn process_learning_batch(&self) -> usize {
        let batch: Vec<LearningEvent> = {
            let mut events = self.events.lock();
            events
                .iter_mut()
                .filter(|event| !event.processed)
                .map(|event| {
                    event.processed = true;
                    event.clone()
                })
                .collect()
        };
        if batch.is_empty() {
            return 0;
        }

        let mut grouped: BTreeMap<EventCategory, Vec<&LearningEvent>> = BTreeMap::new();
        for event in &batch {
            grouped.entry(event.category()).or_default().push(event);
        }

        for (category, events) in &grouped {
            for event in events {
                let mut user = self.user_entry(&event.user_id);
                let mut next = user.profile.clone();
                profile::apply_learning(&mut next, event, &self.settings);
                next.last_updated = Utc::now();
                user.profile = next;
            }
            debug!(category = category.as_str(), count = events.len(), "learning category folded");
        }

        info!(events = batch.len(), categories = grouped.len(), "learning batch processed");
        batch.len()
    }

    /// Classify free-text feedback, blend it into the satisfaction score
    /// right away and queue it as a learning event.
    pub async fn record_feedback(
        &self,
        user_id: &str,
        rating: Option<u8>,
        text: &str,
    ) -> Result<FeedbackOutcome> {
        let sentiment = classify_feedback(text);
        let sample = feedback_sample(sentiment, rating);

        let (satisfaction_score, feedback_count) = {
            let mut user = self.user_entry(user_id);
            let mut next = user.profile.clone();
            profile::apply_feedback_sample(&mut next, sample);
            next.last_updated = Utc::now();
            user.profile = next;
            (user.profile.satisfaction_score, user.profile.feedback_count)
        };

        info!(
            user = %short_id(user_id),
            sentiment = sentiment.as_str(),
            score = satisfaction_score,
            "feedback recorded"
        );

        self.record_learning_event(LearningEvent::new(
            user_id,
            LearningKind::UserFeedback {
                sentiment,
                rating,
                sample,
            },
        ))
        .await?;

        let insights = self.feedback_insights(user_id, sentiment);
        debug!(
            user = %short_id(user_id),
            trend = ?insights.trend.direction,
            samples = insights.trend.samples,
            "satisfaction trend"
        );
        Ok(FeedbackOutcome {
            user_id: user_id.to_string(),
            sentiment,
            satisfaction_score,
            feedback_count,
            insights,
        })
    }

    /// Retained feedback samples for `user_id`, oldest first.
    fn feedback_samples(&self, user_id: &str) -> Vec<f32> {
        self.events
            .lock()
            .iter()
            .filter(|event| event.user_id == user_id)
            .filter_map(|event| match &event.kind {
                LearningKind::UserFeedback { sample, .. } => Some(*sample),
                _ => None,
            })
            .collect()
    }

    /// Immediate insight for `sentiment` plus the trend over the user's
    /// latest retained feedback.
    pub fn feedback_insights(&self, user_id: &str, sentiment: FeedbackSentiment) -> FeedbackInsights {
        insights::feedback_insights(sentiment, &self.feedback_samples(user_id))
    }

    // ── Recommendations ──────────────────────────────────────────────────────

    /// Suggestions built from the user's profile and recent turns.  `None`
    /// for users the store has never seen.
    pub fn recommendations(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
        current_message: Option<&str>,
    ) -> Option<Recommendations> {
        let (profile, turns) = {
            let user = self.users.get(user_id)?;
            (user.profile.clone(), user.history.recent(ANALYSIS_TURNS))
        };
        Some(insights::recommend(
            &profile,
            &turns,
            now,
            self.settings.timezone,
            current_message,
        ))
    }

    // ── Stats ────────────────────────────────────────────────────────────────

    pub fn stats(&self) -> MemoryStats {
        let turns: usize = self.users.iter().map(|user| user.history.len()).sum();
        let events = self.events.lock();
        MemoryStats {
            users: self.users.len(),
            turns,
            learning_events: events.len(),
            unprocessed_events: events.iter().filter(|e| !e.processed).count(),
        }
    }

    /// `None` for users the store has never seen.
    pub fn user_stats(&self, user_id: &str) -> Option<UserStats> {
        let week_ago = Utc::now() - Duration::days(7);
        self.users.get(user_id).map(|user| UserStats {
            user_id: user_id.to_string(),
            stored_turns: user.history.len(),
            total_interactions: user.profile.total_interactions,
            successful_interactions: user.profile.successful_interactions,
            conversations_this_week: user.history.count_since(week_ago),
            satisfaction_score: user.profile.satisfaction_score,
            feedback_count: user.profile.feedback_count,
            preferred_topics: user.profile.preferred_topics.clone(),
            common_tasks: user.profile.common_tasks.clone(),
            last_interaction: user.profile.last_interaction,
        })
    }

    // ── Retention ────────────────────────────────────────────────────────────

    /// Drop turns and learning events older than the retention window.
    ///
    /// When an event log is attached its writer is held for the whole pass:
    /// appends queue behind it, and the log is backed up and rewritten from
    /// exactly the state the pass leaves behind.  Without a log, events are
    /// taken out under the lock, filtered without it, and merged back with
    /// anything appended in the meantime.
    pub async fn cleanup(&self, now: DateTime<Utc>) -> Result<CleanupReport> {
        let cutoff = now - Duration::days(self.config.retention_days);
        let mut writer = self.log_writer().await;

        let snapshot = std::mem::take(&mut *self.events.lock());
        let before = snapshot.len();
        let kept: Vec<LearningEvent> = snapshot
            .into_iter()
            .filter(|event| event.timestamp >= cutoff)
            .collect();
        let events_removed = before - kept.len();
        {
            let mut events = self.events.lock();
            let appended = std::mem::take(&mut *events);
            *events = kept;
            events.extend(appended);
        }

        let mut turns_removed = 0;
        for mut user in self.users.iter_mut() {
            let removed = user.history.retain(|turn| turn.timestamp >= cutoff);
            if removed > 0 {
                turns_removed += removed;
                let mut next = user.profile.clone();
                profile::derive_from_turns(&mut next, user.history.as_slice(), &self.settings);
                user.profile = next;
            }
        }

        if let Some(writer) = writer.as_mut() {
            writer.backup()?;
            let records = self.snapshot_records();
            if let Err(err) = writer.replace(&records).await {
                warn!(error = %err, "failed to rewrite memory log after cleanup");
                return Err(err);
            }
        }

        info!(turns_removed, events_removed, "memory cleanup complete");
        Ok(CleanupReport {
            turns_removed,
            events_removed,
        })
    }

    /// Every stored turn and retained event as log records, oldest first.
    fn snapshot_records(&self) -> Vec<MemoryRecordEvent> {
        let mut records: Vec<MemoryRecordEvent> = self
            .users
            .iter()
            .flat_map(|user| {
                user.history
                    .iter()
                    .map(|turn| MemoryRecordEvent::new(MemoryRecord::Turn(turn.clone())))
                    .collect::<Vec<_>>()
            })
            .collect();
        records.extend(
            self.events
                .lock()
                .iter()
                .map(|event| MemoryRecordEvent::new(MemoryRecord::Learning(event.clone()))),
        );
        records.sort_by_key(|record| record.record.timestamp());
        records
    }

    fn user_entry(&self, user_id: &str) -> dashmap::mapref::one::RefMut<'_, String, UserMemory> {
        self.users
            .entry(user_id.to_string())
            .or_insert_with(|| UserMemory::new(user_id, self.config.max_history))
    }

    #[cfg(test)]
    fn backdate(&self, user_id: &str, age: Duration) {
        if let Some(mut user) = self.users.get_mut(user_id) {
            for turn in user.history.iter_mut() {
                turn.timestamp = turn.timestamp - age;
            }
        }
        for event in self.events.lock().iter_mut() {
            if event.user_id == user_id {
                event.timestamp = event.timestamp - age;
            }
        }
    }
}

async fn persist(writer: Option<&mut LogWriter<'_>>, record: MemoryRecord) -> Result<()> {
    if let Some(writer) = writer {
        writer.append(&MemoryRecordEvent::new(record)).await?;
    }
    Ok(())
}

/// Cut `text` to at most `max` characters without splitting a code point.
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

/// First 8 chars of a user id for log fields.
pub fn short_id(user_id: &str) -> &str {
    match user_id.char_indices().nth(8) {
        Some((idx, _)) => &user_id[..idx],
        None => user_id,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tempfile::TempDir;

    use super::*;
    use crate::insights::{FeedbackInsightKind, OptimizationKind, ProactiveKind, TrendDirection};
    use crate::schema::{CommunicationStyle, ReplySource};

    fn manager() -> MemoryManager {
        MemoryManager::new(MemoryConfig::default())
    }

    fn meta() -> TurnMetadata {
        TurnMetadata::new("test", ReplySource::Completion)
    }

    fn skill_use(user: &str, skill: &str) -> LearningEvent {
        LearningEvent::new(
            user,
            LearningKind::SkillUsage {
                skill: skill.to_string(),
                success: true,
            },
        )
    }

    #[tokio::test]
    async fn history_is_capped_fifo() {
        let memory = manager();
        for n in 1..=51 {
            memory
                .save_turn("ana", &format!("mensagem {n}"), "resposta", meta())
                .await
                .unwrap();
        }

        let history = memory.get_history("ana", 100);
        assert_eq!(history.len(), 50);
        assert_eq!(history[0].user_text, "mensagem 2");
        assert_eq!(history[49].user_text, "mensagem 51");
        assert!(!history.iter().any(|t| t.user_text == "mensagem 1"));
        assert_eq!(memory.get_profile("ana").total_interactions, 51);
    }

    #[tokio::test]
    async fn get_history_returns_latest_limit() {
        let memory = manager();
        for n in 1..=4 {
            memory.save_turn("ana", &format!("m{n}"), "r", meta()).await.unwrap();
        }
        let texts: Vec<String> = memory
            .get_history("ana", 2)
            .into_iter()
            .map(|t| t.user_text)
            .collect();
        assert_eq!(texts, vec!["m3", "m4"]);
        assert!(memory.get_history("nobody", 10).is_empty());
    }

    #[tokio::test]
    async fn save_turn_truncates_and_records_lengths() {
        let memory = manager();
        let long_input = "á".repeat(1500);
        let long_output = "x".repeat(2500);
        let turn = memory
            .save_turn("ana", &long_input, &long_output, meta())
            .await
            .unwrap();
        assert_eq!(turn.user_text.chars().count(), 1000);
        assert_eq!(turn.bot_text.chars().count(), 2000);
        assert_eq!(turn.metadata.message_length, 1500);
        assert_eq!(turn.metadata.response_length, 2500);
    }

    #[tokio::test]
    async fn profile_derivation_after_three_turns() {
        let memory = manager();
        memory.save_turn("ana", "dre", "r", meta()).await.unwrap();
        memory.save_turn("ana", "dre?", "r", meta()).await.unwrap();
        assert!(memory.get_profile("ana").preferred_topics.is_empty());

        memory.save_turn("ana", "fluxo de caixa", "r", meta()).await.unwrap();
        let profile = memory.get_profile("ana");
        assert_eq!(profile.preferred_topics, vec![Topic::Dre, Topic::FluxoCaixa]);
        assert_eq!(profile.communication_style, CommunicationStyle::Concise);
        assert_eq!(profile.peak_hours.len(), 1);
    }

    #[tokio::test]
    async fn get_profile_is_idempotent() {
        let memory = manager();
        memory.save_turn("ana", "conciliação", "r", meta()).await.unwrap();
        let first = memory.get_profile("ana");
        let second = memory.get_profile("ana");
        assert_eq!(first, second);

        let fresh_a = memory.get_profile("novo");
        let fresh_b = memory.get_profile("novo");
        assert_eq!(fresh_a, fresh_b);
        assert_eq!(fresh_a.satisfaction_score, 0.0);
    }

    #[tokio::test]
    async fn positive_feedback_raises_score() {
        let memory = manager();
        let before = memory.get_profile("ana").satisfaction_score;
        let outcome = memory.record_feedback("ana", None, "ótimo, muito bom").await.unwrap();
        assert_eq!(outcome.sentiment, FeedbackSentiment::Positive);
        assert!(outcome.satisfaction_score > before);
        assert_eq!(outcome.feedback_count, 1);
    }

    #[tokio::test]
    async fn satisfaction_stays_in_unit_interval() {
        let memory = manager();
        let inputs = [
            (Some(5), "excelente"),
            (Some(1), "ruim demais"),
            (Some(3), "hmm"),
            (None, "ok"),
            (Some(4), "não ajudou"),
            (None, ""),
        ];
        for (rating, text) in inputs {
            let outcome = memory.record_feedback("ana", rating, text).await.unwrap();
            assert!(
                (0.0..=1.0).contains(&outcome.satisfaction_score),
                "score {} out of range",
                outcome.satisfaction_score
            );
        }
        assert_eq!(memory.get_profile("ana").feedback_count, 6);
    }

    #[tokio::test]
    async fn feedback_reports_satisfaction_trend() {
        let memory = manager();
        let first = memory.record_feedback("ana", Some(5), "perfeito").await.unwrap();
        assert_eq!(first.insights.immediate[0].kind, FeedbackInsightKind::Reinforcement);
        assert_eq!(first.insights.trend.direction, TrendDirection::Unknown);

        for text in ["excelente", "muito bom", "deu erro", "ruim", "não está bom"] {
            memory.record_feedback("ana", None, text).await.unwrap();
        }
        let last = memory.record_feedback("ana", None, "problema de novo").await.unwrap();
        assert_eq!(last.sentiment, FeedbackSentiment::Negative);
        assert_eq!(last.insights.immediate[0].kind, FeedbackInsightKind::Improvement);
        assert_eq!(last.insights.trend.samples, 7);
        assert_eq!(last.insights.trend.direction, TrendDirection::Declining);
        assert_eq!(memory.feedback_insights("bia", FeedbackSentiment::Neutral).trend.samples, 0);
    }

    #[tokio::test]
    async fn recommendations_read_history_and_profile() {
        let memory = manager();
        assert!(memory.recommendations("ana", Utc::now(), None).is_none());

        for text in ["fluxo de caixa urgente", "fluxo de caixa de maio", "conciliação"] {
            memory.save_turn("ana", text, "r", meta()).await.unwrap();
        }
        let recs = memory
            .recommendations("ana", Utc::now(), Some("manda o relatório mensal"))
            .unwrap();
        assert_eq!(recs.user_id, "ana");
        assert_eq!(recs.analysed_turns, 3);
        assert_eq!(recs.confidence, 0.1);
        let skills: Vec<&str> = recs.skills.iter().map(|s| s.skill.as_str()).collect();
        assert_eq!(skills, vec!["relatorios_gerenciais", "fluxo_caixa", "conciliacao"]);
        assert!(recs
            .optimizations
            .iter()
            .any(|o| o.kind == OptimizationKind::ResponseSpeed));
        assert!(recs
            .proactive_insights
            .iter()
            .any(|i| i.kind == ProactiveKind::Temporal));
    }

    #[tokio::test]
    async fn learning_batch_folds_at_threshold() {
        let memory = manager();
        for _ in 0..4 {
            assert_eq!(memory.record_learning_event(skill_use("ana", "fluxo_caixa")).await.unwrap(), 0);
        }
        assert!(memory.get_profile("ana").common_tasks.is_empty());
        assert_eq!(memory.stats().unprocessed_events, 4);

        let folded = memory
            .record_learning_event(LearningEvent::new(
                "ana",
                LearningKind::SuccessfulInteraction {
                    skill: Some("fluxo_caixa".to_string()),
                },
            ))
            .await
            .unwrap();
        assert_eq!(folded, 5);

        let profile = memory.get_profile("ana");
        assert_eq!(profile.common_tasks, vec!["fluxo_caixa"]);
        assert_eq!(profile.skill_usage.get("fluxo_caixa"), Some(&4));
        assert_eq!(profile.successful_interactions, 1);
        assert_eq!(memory.stats().unprocessed_events, 0);
    }

    #[tokio::test]
    async fn rebuild_matches_incremental_profile() {
        let memory = manager();
        for text in ["fluxo de caixa de março", "conciliação do itaú", "dre", "fluxo de caixa"] {
            memory.save_turn("ana", text, "r", meta()).await.unwrap();
        }
        for _ in 0..3 {
            memory.record_learning_event(skill_use("ana", "fluxo_caixa")).await.unwrap();
        }
        memory.record_feedback("ana", Some(5), "perfeito").await.unwrap();
        memory.record_feedback("ana", None, "deu erro").await.unwrap();

        let incremental = memory.get_profile("ana");
        let rebuilt = memory.rebuild_profile("ana");
        assert_eq!(rebuilt.preferred_topics, incremental.preferred_topics);
        assert_eq!(rebuilt.communication_style, incremental.communication_style);
        assert_eq!(rebuilt.satisfaction_score, incremental.satisfaction_score);
        assert_eq!(rebuilt.feedback_count, incremental.feedback_count);
        assert_eq!(rebuilt.common_tasks, incremental.common_tasks);
        assert_eq!(rebuilt.improvement_areas, incremental.improvement_areas);
        assert_eq!(rebuilt.peak_hours, incremental.peak_hours);
        assert_eq!(rebuilt.total_interactions, incremental.total_interactions);
    }

    #[tokio::test]
    async fn context_lists_recent_non_general_topics() {
        let memory = manager();
        memory.save_turn("ana", "bom dia", "r", meta()).await.unwrap();
        memory.save_turn("ana", "conciliação", "r", meta()).await.unwrap();
        let context = memory.context_for_response("ana");
        assert_eq!(context.recent_topics, vec![Topic::ConciliacaoBancaria]);
        assert_eq!(context.profile.user_id, "ana");
    }

    #[tokio::test]
    async fn stats_and_user_stats() {
        let memory = manager();
        memory.save_turn("ana", "oi", "r", meta()).await.unwrap();
        memory.save_turn("bia", "oi", "r", meta()).await.unwrap();
        memory.save_turn("bia", "tudo bem?", "r", meta()).await.unwrap();
        memory.record_learning_event(skill_use("bia", "conciliacao")).await.unwrap();

        let stats = memory.stats();
        assert_eq!(stats.users, 2);
        assert_eq!(stats.turns, 3);
        assert_eq!(stats.learning_events, 1);

        let bia = memory.user_stats("bia").unwrap();
        assert_eq!(bia.stored_turns, 2);
        assert_eq!(bia.conversations_this_week, 2);
        assert!(memory.user_stats("ghost").is_none());
    }

    #[tokio::test]
    async fn cleanup_removes_only_expired_entries() {
        let memory = manager();
        memory.save_turn("old", "fluxo de caixa", "r", meta()).await.unwrap();
        memory.record_learning_event(skill_use("old", "fluxo_caixa")).await.unwrap();
        memory.backdate("old", Duration::days(8));

        memory.save_turn("new", "conciliação", "r", meta()).await.unwrap();
        memory.record_learning_event(skill_use("new", "conciliacao")).await.unwrap();

        let report = memory.cleanup(Utc::now()).await.unwrap();
        assert_eq!(report, CleanupReport { turns_removed: 1, events_removed: 1 });
        assert!(memory.get_history("old", 10).is_empty());
        assert_eq!(memory.get_history("new", 10).len(), 1);
        assert_eq!(memory.stats().learning_events, 1);
    }

    #[tokio::test]
    async fn cleanup_forgets_profile_of_expired_turns() {
        let memory = manager();
        for _ in 0..3 {
            memory.save_turn("ana", "dre", "r", meta()).await.unwrap();
        }
        assert_eq!(memory.get_profile("ana").preferred_topics, vec![Topic::Dre]);
        memory.backdate("ana", Duration::days(8));

        memory.cleanup(Utc::now()).await.unwrap();

        let incremental = memory.get_profile("ana");
        let mut rebuilt = memory.rebuild_profile("ana");
        rebuilt.last_updated = incremental.last_updated;
        assert_eq!(incremental, rebuilt);
        assert!(incremental.preferred_topics.is_empty());
        assert!(incremental.peak_hours.is_empty());
        assert_eq!(incremental.communication_style, CommunicationStyle::Professional);
        assert_eq!(incremental.total_interactions, 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn cleanup_keeps_turns_saved_concurrently() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("events.jsonl");
        let memory = Arc::new(MemoryManager::with_event_log(MemoryConfig::default(), &path).unwrap());
        memory.save_turn("old", "oi", "r", meta()).await.unwrap();
        memory.backdate("old", Duration::days(30));

        let savers: Vec<_> = (0..20)
            .map(|n| {
                let memory = Arc::clone(&memory);
                tokio::spawn(async move {
                    memory.save_turn("ana", &format!("mensagem {n}"), "r", meta()).await
                })
            })
            .collect();
        let report = memory.cleanup(Utc::now()).await.unwrap();
        for saver in savers {
            saver.await.unwrap().unwrap();
        }
        assert_eq!(report.turns_removed, 1);

        let reloaded = MemoryManager::with_event_log(MemoryConfig::default(), &path).unwrap();
        let history = reloaded.get_history("ana", 100);
        assert_eq!(history.len(), 20);
        let mut ids: Vec<Uuid> = history.iter().map(|turn| turn.id).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 20);
        assert!(reloaded.get_history("old", 10).is_empty());
    }

    #[tokio::test]
    async fn event_log_replay_restores_state() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("memory/events.jsonl");

        {
            let memory = MemoryManager::with_event_log(MemoryConfig::default(), &path).unwrap();
            for text in ["dre", "dre de abril", "balanço"] {
                memory.save_turn("ana", text, "r", meta()).await.unwrap();
            }
            memory.record_feedback("ana", None, "excelente").await.unwrap();
        }

        let restored = MemoryManager::with_event_log(MemoryConfig::default(), &path).unwrap();
        assert!(restored.has_event_log());
        let history = restored.get_history("ana", 10);
        assert_eq!(history.len(), 3);
        assert_eq!(history[2].user_text, "balanço");

        let profile = restored.get_profile("ana");
        assert_eq!(profile.preferred_topics, vec![Topic::Dre, Topic::BalancoPatrimonial]);
        assert_eq!(profile.feedback_count, 1);
        assert_eq!(profile.satisfaction_score, 1.0);
        assert_eq!(profile.total_interactions, 3);
        assert_eq!(restored.stats().unprocessed_events, 0);
    }

    #[tokio::test]
    async fn cleanup_rewrites_event_log() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("events.jsonl");
        let memory = MemoryManager::with_event_log(MemoryConfig::default(), &path).unwrap();
        memory.save_turn("old", "oi", "r", meta()).await.unwrap();
        memory.backdate("old", Duration::days(30));
        memory.save_turn("new", "oi", "r", meta()).await.unwrap();

        memory.cleanup(Utc::now()).await.unwrap();

        assert!(dir.path().join("events.jsonl.bak").exists());
        let reloaded = MemoryManager::with_event_log(MemoryConfig::default(), &path).unwrap();
        assert!(reloaded.get_history("old", 10).is_empty());
        assert_eq!(reloaded.get_history("new", 10).len(), 1);
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("ação", 2), "aç");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(short_id("0123456789abcdef"), "01234567");
        assert_eq!(short_id("ana"), "ana");
    }
}
