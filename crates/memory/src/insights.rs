//! Recommendations and feedback insights.
//!
//! Everything here is a pure read over a profile, a slice of recent turns
//! and the user's recent feedback samples.  Nothing is written back; the
//! manager gathers the inputs and hands the result to the caller.

use std::collections::HashMap;
use std::sync::OnceLock;

use chrono::{DateTime, Timelike, Utc};
use chrono_tz::Tz;
use regex::Regex;
use serde::Serialize;

use crate::feedback::FeedbackSentiment;
use crate::schema::{ConversationTurn, Profile, Topic};
use crate::topics::classify;

/// Turns looked at when building recommendations.
pub const ANALYSIS_TURNS: usize = 50;
/// Feedback samples looked at when computing the satisfaction trend.
pub const TREND_FEEDBACKS: usize = 10;

const TREND_RECENT: usize = 3;
const TREND_MARGIN: f32 = 0.1;

const DETAILED_WRITER_CHARS: f64 = 200.0;
const FORMAL_RATIO: f64 = 0.3;
const URGENT_RATIO: f64 = 0.3;
const CASH_FLOW_SHARE: f64 = 0.3;
const RECONCILIATION_SHARE: f64 = 0.2;
const TOP_SKILL_SHARE: f64 = 0.5;
const RECURRING_PROBLEM_COUNT: usize = 3;

fn urgency_pattern() -> &'static Regex {
    static URGENCY: OnceLock<Regex> = OnceLock::new();
    URGENCY.get_or_init(|| Regex::new(r"(?i)urgent|rápido|pressa").expect("static pattern is valid"))
}

fn formality_pattern() -> &'static Regex {
    static FORMALITY: OnceLock<Regex> = OnceLock::new();
    FORMALITY.get_or_init(|| {
        Regex::new(r"(?i)prezad[oa]|cordialmente|atenciosamente").expect("static pattern is valid")
    })
}

/// Confidence attached to an analysis over `samples` data points.
pub fn sample_confidence(samples: usize) -> f32 {
    match samples {
        50.. => 0.9,
        20.. => 0.7,
        10.. => 0.5,
        5.. => 0.3,
        _ => 0.1,
    }
}

// ── Satisfaction trend ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Improving,
    Declining,
    Stable,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SatisfactionTrend {
    pub direction: TrendDirection,
    pub confidence: f32,
    pub samples: usize,
    pub suggestion: String,
}

/// Compare the last three samples with the ones before them.  `samples` is
/// oldest first; fewer than three gives [`TrendDirection::Unknown`].
pub fn satisfaction_trend(samples: &[f32]) -> SatisfactionTrend {
    let trend = |direction, confidence, suggestion: &str| SatisfactionTrend {
        direction,
        confidence,
        samples: samples.len(),
        suggestion: suggestion.to_string(),
    };
    if samples.len() < TREND_RECENT {
        return trend(TrendDirection::Unknown, 0.0, "Mais dados necessários");
    }

    let mean = |values: &[f32]| values.iter().sum::<f32>() / values.len() as f32;
    let (older, recent) = samples.split_at(samples.len() - TREND_RECENT);
    let recent_avg = mean(recent);
    let older_avg = if older.is_empty() { recent_avg } else { mean(older) };

    if recent_avg > older_avg + TREND_MARGIN {
        trend(TrendDirection::Improving, 0.7, "Satisfação melhorando - manter padrão atual")
    } else if recent_avg < older_avg - TREND_MARGIN {
        trend(TrendDirection::Declining, 0.7, "Satisfação em declínio - revisar abordagem")
    } else {
        trend(TrendDirection::Stable, 0.5, "Satisfação estável - explorar melhorias")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackInsightKind {
    Improvement,
    Reinforcement,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedbackInsight {
    pub kind: FeedbackInsightKind,
    pub message: String,
    pub action: String,
}

/// What one feedback call tells us right away and over time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedbackInsights {
    pub immediate: Vec<FeedbackInsight>,
    pub trend: SatisfactionTrend,
}

/// `samples` holds the user's recent feedback scores, oldest first, with the
/// current one last.
pub fn feedback_insights(sentiment: FeedbackSentiment, samples: &[f32]) -> FeedbackInsights {
    let immediate = match sentiment {
        FeedbackSentiment::Negative => vec![FeedbackInsight {
            kind: FeedbackInsightKind::Improvement,
            message: "Feedback negativo recebido - investigar possível melhoria".to_string(),
            action: "Analisar contexto da interação que gerou feedback negativo".to_string(),
        }],
        FeedbackSentiment::Positive => vec![FeedbackInsight {
            kind: FeedbackInsightKind::Reinforcement,
            message: "Feedback positivo - reforçar padrão usado".to_string(),
            action: "Identificar o que funcionou bem para replicar".to_string(),
        }],
        FeedbackSentiment::Neutral | FeedbackSentiment::Unknown => Vec::new(),
    };
    let start = samples.len().saturating_sub(TREND_FEEDBACKS);
    FeedbackInsights {
        immediate,
        trend: satisfaction_trend(&samples[start..]),
    }
}

// ── Communication signals ────────────────────────────────────────────────────

/// How a user writes, on a coarser scale than the profile style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WritingStyle {
    FormalDetailed,
    DetailedCasual,
    FormalConcise,
    CasualConcise,
}

impl WritingStyle {
    fn from_signals(average_length: f64, formality_ratio: f64) -> Self {
        match (average_length > DETAILED_WRITER_CHARS, formality_ratio > FORMAL_RATIO) {
            (true, true) => Self::FormalDetailed,
            (true, false) => Self::DetailedCasual,
            (false, true) => Self::FormalConcise,
            (false, false) => Self::CasualConcise,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommunicationSignals {
    pub messages: usize,
    /// Mean message length in characters.
    pub average_length: usize,
    pub question_ratio: f64,
    pub urgency_ratio: f64,
    pub formality_ratio: f64,
    pub style: WritingStyle,
}

pub fn communication_signals<'a, I>(texts: I) -> CommunicationSignals
where
    I: IntoIterator<Item = &'a str>,
{
    let mut messages = 0usize;
    let mut chars = 0usize;
    let (mut questions, mut urgent, mut formal) = (0usize, 0usize, 0usize);
    for text in texts {
        messages += 1;
        chars += text.chars().count();
        questions += usize::from(text.contains('?'));
        urgent += usize::from(urgency_pattern().is_match(text));
        formal += usize::from(formality_pattern().is_match(text));
    }

    let ratio = |count: usize| if messages == 0 { 0.0 } else { count as f64 / messages as f64 };
    let average = if messages == 0 { 0.0 } else { chars as f64 / messages as f64 };
    CommunicationSignals {
        messages,
        average_length: average.round() as usize,
        question_ratio: ratio(questions),
        urgency_ratio: ratio(urgent),
        formality_ratio: ratio(formal),
        style: WritingStyle::from_signals(average, ratio(formal)),
    }
}

// ── Recurring problems ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProblemKind {
    DataUrgency,
    ReconciliationIssues,
    ReportRequests,
    ProcessQuestions,
    SystemIssues,
}

impl ProblemKind {
    pub const ALL: [ProblemKind; 5] = [
        Self::DataUrgency,
        Self::ReconciliationIssues,
        Self::ReportRequests,
        Self::ProcessQuestions,
        Self::SystemIssues,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DataUrgency => "data_urgency",
            Self::ReconciliationIssues => "reconciliation_issues",
            Self::ReportRequests => "report_requests",
            Self::ProcessQuestions => "process_questions",
            Self::SystemIssues => "system_issues",
        }
    }

    fn keywords(&self) -> &'static [&'static str] {
        match self {
            Self::DataUrgency => &["hoje", "agora", "urgente", "rápido"],
            Self::ReconciliationIssues => &["erro", "divergência", "não bate", "diferença"],
            Self::ReportRequests => &["relatório", "gerar", "exportar", "enviar"],
            Self::ProcessQuestions => &["como", "procedimento", "passo a passo"],
            Self::SystemIssues => &["não funciona", "erro", "problema", "falha"],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProblemCount {
    pub problem: ProblemKind,
    pub count: usize,
}

/// Messages per problem bucket, most frequent first.  A message can land in
/// several buckets.
pub fn common_problems<'a, I>(texts: I) -> Vec<ProblemCount>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut counts: HashMap<ProblemKind, usize> = HashMap::new();
    for text in texts {
        let lower = text.to_lowercase();
        for problem in ProblemKind::ALL {
            if problem.keywords().iter().any(|keyword| lower.contains(keyword)) {
                *counts.entry(problem).or_default() += 1;
            }
        }
    }

    let mut ranked: Vec<ProblemCount> = counts
        .into_iter()
        .map(|(problem, count)| ProblemCount { problem, count })
        .collect();
    ranked.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.problem.cmp(&b.problem)));
    ranked
}

// ── Recommendations ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    Medium,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkillRecommendation {
    pub skill: String,
    pub reason: String,
    pub confidence: f32,
    pub priority: Priority,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResponseStyleAdvice {
    pub style: &'static str,
    pub detail: &'static str,
    pub tone: &'static str,
    pub reason: &'static str,
}

impl ResponseStyleAdvice {
    fn for_style(style: WritingStyle) -> Self {
        match style {
            WritingStyle::FormalDetailed => Self {
                style: "formal",
                detail: "high",
                tone: "professional",
                reason: "Usuário prefere comunicação formal e detalhada",
            },
            WritingStyle::CasualConcise => Self {
                style: "casual",
                detail: "medium",
                tone: "friendly",
                reason: "Usuário prefere respostas diretas e amigáveis",
            },
            WritingStyle::DetailedCasual | WritingStyle::FormalConcise => Self {
                style: "professional",
                detail: "medium",
                tone: "helpful",
                reason: "Estilo padrão profissional",
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProactiveKind {
    Temporal,
    Pattern,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProactiveInsight {
    pub kind: ProactiveKind,
    pub insight: String,
    pub action: String,
    pub confidence: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationKind {
    SkillPriority,
    ResponseSpeed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Optimization {
    pub kind: OptimizationKind,
    pub suggestion: String,
    pub impact: Priority,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recommendations {
    pub user_id: String,
    pub analysed_turns: usize,
    pub confidence: f32,
    pub signals: CommunicationSignals,
    pub problems: Vec<ProblemCount>,
    pub skills: Vec<SkillRecommendation>,
    pub response_style: ResponseStyleAdvice,
    pub proactive_insights: Vec<ProactiveInsight>,
    pub optimizations: Vec<Optimization>,
}

/// Everything the assistant can suggest about one user.  `turns` is oldest
/// first; only the last [`ANALYSIS_TURNS`] are read.
pub fn recommend(
    profile: &Profile,
    turns: &[ConversationTurn],
    now: DateTime<Utc>,
    timezone: Tz,
    current_message: Option<&str>,
) -> Recommendations {
    let window = &turns[turns.len().saturating_sub(ANALYSIS_TURNS)..];
    let texts = || window.iter().map(|turn| turn.user_text.as_str());
    let signals = communication_signals(texts());
    let problems = common_problems(texts());

    Recommendations {
        user_id: profile.user_id.clone(),
        analysed_turns: window.len(),
        confidence: sample_confidence(window.len()),
        skills: recommend_skills(window, current_message),
        response_style: ResponseStyleAdvice::for_style(signals.style),
        proactive_insights: proactive_insights(profile, &problems, now, timezone),
        optimizations: suggest_optimizations(profile, &signals),
        signals,
        problems,
    }
}

fn topic_share(turns: &[ConversationTurn], topic: Topic) -> f64 {
    if turns.is_empty() {
        return 0.0;
    }
    let hits = turns
        .iter()
        .filter(|turn| classify(&turn.user_text).contains(&topic))
        .count();
    hits as f64 / turns.len() as f64
}

fn recommend_skills(turns: &[ConversationTurn], current_message: Option<&str>) -> Vec<SkillRecommendation> {
    let mut skills = Vec::new();

    let cash_flow = topic_share(turns, Topic::FluxoCaixa);
    if cash_flow > CASH_FLOW_SHARE {
        skills.push(SkillRecommendation {
            skill: "fluxo_caixa".to_string(),
            reason: "Usuário frequentemente pergunta sobre fluxo de caixa".to_string(),
            confidence: cash_flow as f32,
            priority: Priority::High,
        });
    }
    let reconciliation = topic_share(turns, Topic::ConciliacaoBancaria);
    if reconciliation > RECONCILIATION_SHARE {
        skills.push(SkillRecommendation {
            skill: "conciliacao".to_string(),
            reason: "Histórico de questões de conciliação bancária".to_string(),
            confidence: reconciliation as f32,
            priority: Priority::Medium,
        });
    }

    if let Some(message) = current_message {
        let lower = message.to_lowercase();
        if lower.contains("relatório") && !lower.contains("fluxo") {
            skills.push(SkillRecommendation {
                skill: "relatorios_gerenciais".to_string(),
                reason: "Contexto atual sugere necessidade de relatório".to_string(),
                confidence: 0.8,
                priority: Priority::High,
            });
        }
    }

    skills.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    skills
}

fn hour_distance(a: u32, b: u32) -> u32 {
    let diff = a.abs_diff(b) % 24;
    diff.min(24 - diff)
}

fn proactive_insights(
    profile: &Profile,
    problems: &[ProblemCount],
    now: DateTime<Utc>,
    timezone: Tz,
) -> Vec<ProactiveInsight> {
    let mut insights = Vec::new();

    let hour = now.with_timezone(&timezone).hour();
    if profile.peak_hours.iter().any(|peak| hour_distance(*peak, hour) <= 1) {
        insights.push(ProactiveInsight {
            kind: ProactiveKind::Temporal,
            insight: "Este é um horário de alta atividade do usuário".to_string(),
            action: "Priorizar resposta rápida e eficiente".to_string(),
            confidence: 0.7,
        });
    }

    if let Some(top) = problems.first().filter(|top| top.count > RECURRING_PROBLEM_COUNT) {
        insights.push(ProactiveInsight {
            kind: ProactiveKind::Pattern,
            insight: format!("Usuário frequentemente tem problemas com {}", top.problem.as_str()),
            action: "Preparar soluções proativas para este tipo de problema".to_string(),
            confidence: 0.8,
        });
    }

    insights
}

fn suggest_optimizations(profile: &Profile, signals: &CommunicationSignals) -> Vec<Optimization> {
    let mut optimizations = Vec::new();

    let total: u32 = profile.skill_usage.values().sum();
    let top = profile
        .skill_usage
        .iter()
        .max_by(|(a_skill, a), (b_skill, b)| a.cmp(b).then_with(|| b_skill.cmp(a_skill)));
    if let Some((skill, uses)) = top.filter(|_| total > 0) {
        let share = f64::from(*uses) / f64::from(total);
        if share > TOP_SKILL_SHARE {
            optimizations.push(Optimization {
                kind: OptimizationKind::SkillPriority,
                suggestion: format!("Priorizar skill {skill} nas respostas"),
                impact: Priority::High,
                reason: format!("Skill mais usada ({:.0}% das interações)", share * 100.0),
            });
        }
    }

    if signals.urgency_ratio > URGENT_RATIO {
        optimizations.push(Optimization {
            kind: OptimizationKind::ResponseSpeed,
            suggestion: "Priorizar respostas rápidas e objetivas".to_string(),
            impact: Priority::Medium,
            reason: "Usuário demonstra urgência frequente".to_string(),
        });
    }

    optimizations
}
