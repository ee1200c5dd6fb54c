//! Profile derivation.
//!
//! A profile is recomputed from two inputs: the user's recent turns (topics,
//! style, peak hours) and the learning events folded into it (counters,
//! common tasks, problem areas).  Every function here mutates a profile the
//! caller owns; the manager commits the result in a single assignment.

use std::collections::HashMap;

use chrono::{DateTime, Timelike, Utc};
use chrono_tz::Tz;

use mesh_config::MemoryConfig;

use crate::feedback::{FeedbackSentiment, blend_satisfaction};
use crate::schema::{CommunicationStyle, ConversationTurn, LearningEvent, LearningKind, Profile};
use crate::topics::rank_topics;

/// Average message length (chars) above which a user is treated as detailed.
pub const DETAILED_AVG_CHARS: f64 = 100.0;
/// Average message length (chars) below which a user is treated as concise.
pub const CONCISE_AVG_CHARS: f64 = 30.0;
pub const PEAK_HOURS_KEPT: usize = 3;
pub const NEGATIVE_FEEDBACK_AREA: &str = "response_quality";

#[derive(Debug, Clone)]
pub struct DerivationSettings {
    pub window: usize,
    pub min_turns: usize,
    pub common_task_threshold: u32,
    pub timezone: Tz,
}

impl DerivationSettings {
    pub fn from_config(config: &MemoryConfig) -> Self {
        let timezone = config.timezone.parse::<Tz>().unwrap_or_else(|_| {
            tracing::warn!(timezone = %config.timezone, "unknown timezone, using UTC");
            Tz::UTC
        });
        Self {
            window: config.profile_window,
            min_turns: config.min_turns_for_analysis,
            common_task_threshold: config.common_task_threshold,
            timezone,
        }
    }
}

impl Default for DerivationSettings {
    fn default() -> Self {
        Self::from_config(&MemoryConfig::default())
    }
}

pub fn style_for_average(avg_chars: f64) -> CommunicationStyle {
    if avg_chars > DETAILED_AVG_CHARS {
        CommunicationStyle::Detailed
    } else if avg_chars < CONCISE_AVG_CHARS {
        CommunicationStyle::Concise
    } else {
        CommunicationStyle::Professional
    }
}

/// Busiest local hours, most active first.  Ties go to the earlier hour.
pub fn peak_hours<'a, I>(timestamps: I, timezone: Tz) -> Vec<u32>
where
    I: IntoIterator<Item = &'a DateTime<Utc>>,
{
    let mut counts: HashMap<u32, usize> = HashMap::new();
    for ts in timestamps {
        *counts.entry(ts.with_timezone(&timezone).hour()).or_default() += 1;
    }
    let mut ranked: Vec<(u32, usize)> = counts.into_iter().collect();
    ranked.sort_by(|(a_hour, a_count), (b_hour, b_count)| {
        b_count.cmp(a_count).then_with(|| a_hour.cmp(b_hour))
    });
    ranked
        .into_iter()
        .take(PEAK_HOURS_KEPT)
        .map(|(hour, _)| hour)
        .collect()
}

/// Refresh the turn-derived fields.  `turns` must be in append order.
/// Fewer than `min_turns` turns resets topics, style and peak hours to their
/// defaults, so a history shrunk by retention carries nothing from the
/// dropped turns.
pub fn derive_from_turns(profile: &mut Profile, turns: &[ConversationTurn], settings: &DerivationSettings) {
    profile.last_interaction = turns.last().map(|turn| turn.timestamp);
    if turns.len() < settings.min_turns.max(1) {
        profile.preferred_topics.clear();
        profile.communication_style = CommunicationStyle::default();
        profile.peak_hours.clear();
        return;
    }

    let start = turns.len().saturating_sub(settings.window.max(1));
    let window = &turns[start..];

    profile.preferred_topics = rank_topics(window.iter().map(|turn| turn.user_text.as_str()));

    let total_chars: usize = window.iter().map(|turn| turn.user_text.chars().count()).sum();
    profile.communication_style = style_for_average(total_chars as f64 / window.len() as f64);

    profile.peak_hours = peak_hours(window.iter().map(|turn| &turn.timestamp), settings.timezone);
}

/// Blend one feedback sample into the satisfaction mean.
pub fn apply_feedback_sample(profile: &mut Profile, sample: f32) {
    profile.satisfaction_score =
        blend_satisfaction(profile.satisfaction_score, profile.feedback_count, sample);
    profile.feedback_count += 1;
}

fn push_unique<T: PartialEq>(items: &mut Vec<T>, item: T) {
    if !items.contains(&item) {
        items.push(item);
    }
}

/// Fold one learning event into the batch-maintained profile fields.
/// Satisfaction is not touched here; it is blended when feedback arrives.
pub fn apply_learning(profile: &mut Profile, event: &LearningEvent, settings: &DerivationSettings) {
    match &event.kind {
        LearningKind::SuccessfulInteraction { .. } => {
            profile.successful_interactions += 1;
        }
        LearningKind::FailedInteraction { topic, area } => {
            push_unique(&mut profile.problematic_topics, *topic);
            push_unique(&mut profile.improvement_areas, area.clone());
        }
        LearningKind::UserFeedback { sentiment, .. } => {
            if *sentiment == FeedbackSentiment::Negative {
                push_unique(&mut profile.improvement_areas, NEGATIVE_FEEDBACK_AREA.to_string());
            }
        }
        LearningKind::SkillUsage { skill, success } => {
            if !success {
                return;
            }
            let uses = profile.skill_usage.entry(skill.clone()).or_insert(0);
            *uses += 1;
            if *uses >= settings.common_task_threshold {
                push_unique(&mut profile.common_tasks, skill.clone());
            }
        }
    }
}

/// Compact Portuguese summary for the completion system prompt.
///
/// Returns `None` while the profile carries nothing beyond its defaults.
pub fn format_profile_block(profile: &Profile) -> Option<String> {
    let mut lines = Vec::new();

    match profile.communication_style {
        CommunicationStyle::Detailed => {
            lines.push("- Prefere respostas detalhadas, com números e contexto.".to_string())
        }
        CommunicationStyle::Concise => {
            lines.push("- Prefere respostas curtas e diretas.".to_string())
        }
        CommunicationStyle::Professional => {}
    }

    if !profile.preferred_topics.is_empty() {
        let labels: Vec<&str> = profile.preferred_topics.iter().map(|t| t.label()).collect();
        lines.push(format!("- Assuntos frequentes: {}.", labels.join(", ")));
    }

    if !profile.common_tasks.is_empty() {
        lines.push(format!("- Tarefas recorrentes: {}.", profile.common_tasks.join(", ")));
    }

    if !profile.problematic_topics.is_empty() {
        let labels: Vec<&str> = profile.problematic_topics.iter().map(|t| t.label()).collect();
        lines.push(format!("- Já teve dificuldades com: {}.", labels.join(", ")));
    }

    if lines.is_empty() {
        return None;
    }

    Some(format!("Sobre este usuário:\n{}", lines.join("\n")))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use uuid::Uuid;

    use super::*;
    use crate::schema::{ReplySource, Topic, TurnMetadata};

    fn turn_at(text: &str, ts: DateTime<Utc>) -> ConversationTurn {
        ConversationTurn {
            id: Uuid::new_v4(),
            user_id: "u1".to_string(),
            timestamp: ts,
            user_text: text.to_string(),
            bot_text: "ok".to_string(),
            topic: crate::topics::primary_topic(text),
            metadata: TurnMetadata::new("test", ReplySource::Template),
        }
    }

    fn turn(text: &str) -> ConversationTurn {
        turn_at(text, Utc::now())
    }

    fn utc_settings() -> DerivationSettings {
        DerivationSettings {
            timezone: Tz::UTC,
            ..DerivationSettings::default()
        }
    }

    #[test]
    fn style_thresholds() {
        assert_eq!(style_for_average(150.0), CommunicationStyle::Detailed);
        assert_eq!(style_for_average(100.0), CommunicationStyle::Professional);
        assert_eq!(style_for_average(30.0), CommunicationStyle::Professional);
        assert_eq!(style_for_average(12.0), CommunicationStyle::Concise);
    }

    #[test]
    fn too_few_turns_keeps_defaults() {
        let mut profile = Profile::new("u1");
        let turns = vec![turn("dre"), turn("dre de novo")];
        derive_from_turns(&mut profile, &turns, &utc_settings());
        assert!(profile.preferred_topics.is_empty());
        assert_eq!(profile.communication_style, CommunicationStyle::Professional);
        assert!(profile.last_interaction.is_some());
    }

    #[test]
    fn shrunk_history_resets_turn_fields() {
        let settings = utc_settings();
        let mut profile = Profile::new("u1");
        let turns = vec![turn("dre"), turn("dre"), turn("dre")];
        derive_from_turns(&mut profile, &turns, &settings);
        assert_eq!(profile.preferred_topics, vec![Topic::Dre]);
        assert_eq!(profile.peak_hours.len(), 1);

        derive_from_turns(&mut profile, &[], &settings);
        assert!(profile.preferred_topics.is_empty());
        assert!(profile.peak_hours.is_empty());
        assert_eq!(profile.communication_style, CommunicationStyle::Professional);
        assert!(profile.last_interaction.is_none());
    }

    #[test]
    fn derives_topics_and_concise_style() {
        let mut profile = Profile::new("u1");
        let turns = vec![turn("dre"), turn("fluxo de caixa"), turn("dre hoje")];
        derive_from_turns(&mut profile, &turns, &utc_settings());
        assert_eq!(profile.preferred_topics, vec![Topic::Dre, Topic::FluxoCaixa]);
        assert_eq!(profile.communication_style, CommunicationStyle::Concise);
    }

    #[test]
    fn only_window_is_considered() {
        let settings = DerivationSettings {
            window: 3,
            ..utc_settings()
        };
        let mut turns = vec![turn("conciliação"); 5];
        turns.extend([turn("balanço"), turn("balanço"), turn("balanço")]);
        let mut profile = Profile::new("u1");
        derive_from_turns(&mut profile, &turns, &settings);
        assert_eq!(profile.preferred_topics, vec![Topic::BalancoPatrimonial]);
    }

    #[test]
    fn peak_hours_use_timezone() {
        let at = |h| Utc.with_ymd_and_hms(2024, 3, 4, h, 15, 0).unwrap();
        let stamps = vec![at(13), at(13), at(17), at(9), at(17), at(13)];
        assert_eq!(peak_hours(&stamps, Tz::UTC), vec![13, 17, 9]);
        // São Paulo is UTC-3 with no daylight saving in 2024.
        assert_eq!(peak_hours(&stamps, chrono_tz::America::Sao_Paulo), vec![10, 14, 6]);
    }

    #[test]
    fn feedback_samples_keep_score_in_range() {
        let mut profile = Profile::new("u1");
        apply_feedback_sample(&mut profile, 1.0);
        apply_feedback_sample(&mut profile, 0.0);
        assert_eq!(profile.feedback_count, 2);
        assert!((profile.satisfaction_score - 0.5).abs() < 1e-6);
    }

    #[test]
    fn skill_usage_promotes_common_task_at_threshold() {
        let settings = utc_settings();
        let mut profile = Profile::new("u1");
        let usage = |success| {
            LearningEvent::new(
                "u1",
                LearningKind::SkillUsage {
                    skill: "fluxo_caixa".to_string(),
                    success,
                },
            )
        };
        apply_learning(&mut profile, &usage(true), &settings);
        apply_learning(&mut profile, &usage(false), &settings);
        apply_learning(&mut profile, &usage(true), &settings);
        assert!(profile.common_tasks.is_empty());
        apply_learning(&mut profile, &usage(true), &settings);
        assert_eq!(profile.common_tasks, vec!["fluxo_caixa"]);
        assert_eq!(profile.skill_usage.get("fluxo_caixa"), Some(&3));
    }

    #[test]
    fn failures_and_negative_feedback_record_problem_areas() {
        let settings = utc_settings();
        let mut profile = Profile::new("u1");
        let failure = LearningEvent::new(
            "u1",
            LearningKind::FailedInteraction {
                topic: Topic::ConciliacaoBancaria,
                area: "skill:conciliacao".to_string(),
            },
        );
        apply_learning(&mut profile, &failure, &settings);
        apply_learning(&mut profile, &failure, &settings);
        let complaint = LearningEvent::new(
            "u1",
            LearningKind::UserFeedback {
                sentiment: FeedbackSentiment::Negative,
                rating: None,
                sample: 0.0,
            },
        );
        apply_learning(&mut profile, &complaint, &settings);

        assert_eq!(profile.problematic_topics, vec![Topic::ConciliacaoBancaria]);
        assert_eq!(
            profile.improvement_areas,
            vec!["skill:conciliacao".to_string(), NEGATIVE_FEEDBACK_AREA.to_string()]
        );
        assert_eq!(profile.satisfaction_score, 0.0);
    }

    #[test]
    fn default_profile_has_no_prompt_block() {
        assert!(format_profile_block(&Profile::new("u1")).is_none());
    }

    #[test]
    fn prompt_block_lists_preferences() {
        let mut profile = Profile::new("u1");
        profile.communication_style = CommunicationStyle::Detailed;
        profile.preferred_topics = vec![Topic::FluxoCaixa, Topic::Dre];
        profile.common_tasks = vec!["fluxo_caixa".to_string()];
        let block = format_profile_block(&profile).unwrap();
        assert!(block.contains("detalhadas"));
        assert!(block.contains("fluxo de caixa, DRE"));
        assert!(block.contains("Tarefas recorrentes: fluxo_caixa"));
    }
}
