//! Keyword topic buckets for Portuguese finance messages.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;

use crate::schema::Topic;

/// Maximum number of topics kept in a profile.
pub const MAX_PREFERRED_TOPICS: usize = 5;

fn dre_pattern() -> &'static Regex {
    static DRE: OnceLock<Regex> = OnceLock::new();
    DRE.get_or_init(|| Regex::new(r"(?i)\bdre\b").expect("static pattern is valid"))
}

/// Every bucket `text` falls into, in declaration order.
pub fn classify(text: &str) -> Vec<Topic> {
    let lower = text.to_lowercase();
    let has = |needle: &str| lower.contains(needle);
    let mut topics = Vec::new();

    if (has("fluxo") && has("caixa")) || has("cash flow") {
        topics.push(Topic::FluxoCaixa);
    }
    if has("conciliação") || has("conciliacao") {
        topics.push(Topic::ConciliacaoBancaria);
    }
    if has("relatório") || has("relatorio") {
        topics.push(Topic::Relatorios);
    }
    if dre_pattern().is_match(&lower) {
        topics.push(Topic::Dre);
    }
    if has("balanço") || has("balanco") {
        topics.push(Topic::BalancoPatrimonial);
    }
    if has("compliance") || has("auditoria") {
        topics.push(Topic::Compliance);
    }

    topics
}

/// Single topic recorded on a turn: the first matching bucket.
pub fn primary_topic(text: &str) -> Topic {
    classify(text).first().copied().unwrap_or(Topic::General)
}

/// Rank buckets by how many messages hit them.  Ties keep declaration order.
pub fn rank_topics<'a, I>(texts: I) -> Vec<Topic>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut counts: HashMap<Topic, usize> = HashMap::new();
    for text in texts {
        for topic in classify(text) {
            *counts.entry(topic).or_default() += 1;
        }
    }

    let mut ranked: Vec<(Topic, usize)> = counts.into_iter().collect();
    ranked.sort_by(|(a_topic, a_count), (b_topic, b_count)| {
        b_count.cmp(a_count).then_with(|| a_topic.cmp(b_topic))
    });
    ranked
        .into_iter()
        .take(MAX_PREFERRED_TOPICS)
        .map(|(topic, _)| topic)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cash_flow_needs_both_words() {
        assert_eq!(classify("Preciso do fluxo de caixa de dezembro"), vec![Topic::FluxoCaixa]);
        assert!(classify("fluxo de aprovação").is_empty());
        assert_eq!(classify("monthly cash flow"), vec![Topic::FluxoCaixa]);
    }

    #[test]
    fn accents_are_optional() {
        assert_eq!(classify("conciliacao do itaú"), vec![Topic::ConciliacaoBancaria]);
        assert_eq!(classify("Conciliação"), vec![Topic::ConciliacaoBancaria]);
        assert_eq!(classify("balanco anual"), vec![Topic::BalancoPatrimonial]);
    }

    #[test]
    fn dre_is_whole_word() {
        assert_eq!(classify("me manda a DRE"), vec![Topic::Dre]);
        assert!(classify("endereço da empresa").is_empty());
        assert!(classify("vou ao padre").is_empty());
    }

    #[test]
    fn message_can_hit_several_buckets() {
        assert_eq!(
            classify("relatório de auditoria do balanço"),
            vec![Topic::Relatorios, Topic::BalancoPatrimonial, Topic::Compliance]
        );
    }

    #[test]
    fn primary_topic_defaults_to_general() {
        assert_eq!(primary_topic("bom dia"), Topic::General);
        assert_eq!(primary_topic("DRE e relatório"), Topic::Relatorios);
    }

    #[test]
    fn ranking_orders_by_frequency_then_declaration() {
        let texts = [
            "dre de março",
            "dre de abril",
            "conciliação",
            "fluxo de caixa",
            "bom dia",
        ];
        assert_eq!(
            rank_topics(texts),
            vec![Topic::Dre, Topic::FluxoCaixa, Topic::ConciliacaoBancaria]
        );
    }

    #[test]
    fn ranking_keeps_top_five() {
        let texts = [
            "fluxo de caixa",
            "conciliação",
            "relatório",
            "dre",
            "balanço",
            "auditoria",
        ];
        let ranked = rank_topics(texts);
        assert_eq!(ranked.len(), MAX_PREFERRED_TOPICS);
        assert!(!ranked.contains(&Topic::Compliance));
    }
}
