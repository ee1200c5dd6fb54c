//! Canned replies used when no completion provider produced text.
//!
//! Selection is a plain keyword check on the lowercased message.  Every
//! branch returns a non-empty reply so the caller never has to handle a
//! missing answer.

pub const CASH_FLOW: &str =
    "Para fluxo de caixa, posso analisar qualquer período. Qual você precisa?";
pub const RECONCILIATION: &str = "Conciliação bancária é algo que faço bastante. Qual banco?";
pub const REPORTS: &str = "Que tipo de relatório você está pensando?";
pub const HELP: &str =
    "Trabalho com análises financeiras, conciliações e relatórios. O que você precisa?";
pub const DEFAULT: &str = "Como posso ajudar? Trabalho principalmente com processos financeiros.";

/// All replies [`fallback_reply`] can produce.
pub const ALL: &[&str] = &[CASH_FLOW, RECONCILIATION, REPORTS, HELP, DEFAULT];

pub fn fallback_reply(text: &str) -> &'static str {
    let lower = text.to_lowercase();

    if lower.contains("fluxo") && lower.contains("caixa") {
        CASH_FLOW
    } else if lower.contains("conciliação") || lower.contains("conciliacao") {
        RECONCILIATION
    } else if lower.contains("relatório") || lower.contains("relatorio") {
        REPORTS
    } else if lower.contains("help") || lower.contains("ajuda") {
        HELP
    } else {
        DEFAULT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_template_by_keyword() {
        assert_eq!(fallback_reply("Fluxo de CAIXA de março"), CASH_FLOW);
        assert_eq!(fallback_reply("preciso de uma conciliacao"), RECONCILIATION);
        assert_eq!(fallback_reply("Relatório mensal"), REPORTS);
        assert_eq!(fallback_reply("socorro, ajuda"), HELP);
        assert_eq!(fallback_reply("qual a capital da França?"), DEFAULT);
    }

    #[test]
    fn fluxo_alone_is_not_cash_flow() {
        assert_eq!(fallback_reply("fluxo de trabalho"), DEFAULT);
    }

    #[test]
    fn never_empty() {
        for text in ["", "   ", "xyz", "caixa"] {
            assert!(!fallback_reply(text).is_empty());
        }
        assert!(ALL.iter().all(|t| !t.is_empty()));
    }
}
