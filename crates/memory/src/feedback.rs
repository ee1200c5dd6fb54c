//! Keyword classification of free-text user feedback and the satisfaction
//! running mean it feeds.

use serde::{Deserialize, Serialize};

/// Negated praise reads as a complaint and is checked before anything else.
const NEGATED_PHRASES: &[&str] = &["não funcionou", "não ajudou", "não resolveu", "nao funcionou"];

const POSITIVE_WORDS: &[&str] = &[
    "bom", "ótimo", "otimo", "excelente", "perfeito", "obrigado", "ajudou", "útil", "util",
];

const NEGATIVE_WORDS: &[&str] = &["ruim", "erro", "problema", "incorreto", "errado"];

const NEUTRAL_WORDS: &[&str] = &["ok", "entendi", "certo"];

/// A sentiment word with one of these up to two tokens before it flips.
const NEGATORS: &[&str] = &["não", "nao", "nada", "nunca"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackSentiment {
    Positive,
    Negative,
    Neutral,
    Unknown,
}

impl FeedbackSentiment {
    /// Satisfaction sample on `[0, 1]` for this category.
    pub fn score(&self) -> f32 {
        match self {
            Self::Positive => 1.0,
            Self::Neutral => 0.5,
            Self::Negative => 0.0,
            Self::Unknown => 0.3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Positive => "positive",
            Self::Negative => "negative",
            Self::Neutral => "neutral",
            Self::Unknown => "unknown",
        }
    }
}

pub fn classify_feedback(text: &str) -> FeedbackSentiment {
    let lower = text.to_lowercase();
    if NEGATED_PHRASES.iter().any(|phrase| lower.contains(phrase)) {
        return FeedbackSentiment::Negative;
    }

    let words: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();

    let mut positive = 0usize;
    let mut negative = 0usize;
    let mut neutral = false;
    for (i, word) in words.iter().enumerate() {
        let negated = (i > 0 && NEGATORS.contains(&words[i - 1]))
            || (i > 1 && NEGATORS.contains(&words[i - 2]));
        if POSITIVE_WORDS.contains(word) {
            if negated {
                negative += 1;
            } else {
                positive += 1;
            }
        } else if NEGATIVE_WORDS.contains(word) {
            if negated {
                positive += 1;
            } else {
                negative += 1;
            }
        } else if NEUTRAL_WORDS.contains(word) {
            neutral = true;
        }
    }

    if positive > 0 && positive >= negative {
        FeedbackSentiment::Positive
    } else if negative > 0 {
        FeedbackSentiment::Negative
    } else if neutral {
        FeedbackSentiment::Neutral
    } else {
        FeedbackSentiment::Unknown
    }
}

/// Sample for one feedback call.  A classifiable text wins; otherwise a 1-5
/// rating is normalised onto `[0, 1]`; otherwise the unknown score is used.
pub fn feedback_sample(sentiment: FeedbackSentiment, rating: Option<u8>) -> f32 {
    match (sentiment, rating) {
        (FeedbackSentiment::Unknown, Some(rating)) => {
            (f32::from(rating.clamp(1, 5)) - 1.0) / 4.0
        }
        _ => sentiment.score(),
    }
}

/// Count-weighted running mean.  `count` is the number of samples already in
/// `current`.
pub fn blend_satisfaction(current: f32, count: u32, sample: f32) -> f32 {
    let n = count as f32;
    ((current * n + sample.clamp(0.0, 1.0)) / (n + 1.0)).clamp(0.0, 1.0)
}
