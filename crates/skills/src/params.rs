//! Parameter extraction from the raw message text.
//!
//! Skills receive a flat string map.  Only what can be read reliably from a
//! short Portuguese request is extracted: a reporting period and a bank.

use std::collections::HashMap;

pub type SkillParams = HashMap<String, String>;

pub const PARAM_PERIOD: &str = "period";
pub const PARAM_BANK: &str = "bank";

/// Used by skills when the message names no period.
pub const DEFAULT_PERIOD: &str = "Últimos 30 dias";

const MONTHS: &[(&str, &str)] = &[
    ("janeiro", "Janeiro"),
    ("fevereiro", "Fevereiro"),
    ("março", "Março"),
    ("marco", "Março"),
    ("abril", "Abril"),
    ("maio", "Maio"),
    ("junho", "Junho"),
    ("julho", "Julho"),
    ("agosto", "Agosto"),
    ("setembro", "Setembro"),
    ("outubro", "Outubro"),
    ("novembro", "Novembro"),
    ("dezembro", "Dezembro"),
];

const RELATIVE_PERIODS: &[(&str, &str)] = &[
    ("hoje", "Hoje"),
    ("esta semana", "Esta semana"),
    ("essa semana", "Esta semana"),
    ("este mês", "Este mês"),
    ("esse mês", "Este mês"),
    ("este mes", "Este mês"),
];

const BANKS: &[(&str, &str)] = &[
    ("banco do brasil", "Banco do Brasil"),
    ("caixa econômica", "Caixa Econômica Federal"),
    ("caixa economica", "Caixa Econômica Federal"),
    ("itaú", "Itaú"),
    ("itau", "Itaú"),
    ("bradesco", "Bradesco"),
    ("santander", "Santander"),
    ("nubank", "Nubank"),
    ("sicredi", "Sicredi"),
    ("btg", "BTG Pactual"),
];

fn words(lower: &str) -> Vec<&str> {
    lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect()
}

fn find_phrase(lower: &str, table: &[(&str, &'static str)]) -> Option<&'static str> {
    let tokens = words(lower);
    table
        .iter()
        .find(|(needle, _)| {
            if needle.contains(' ') {
                lower.contains(needle)
            } else {
                tokens.contains(needle)
            }
        })
        .map(|(_, label)| *label)
}

pub fn extract_params(text: &str) -> SkillParams {
    let lower = text.to_lowercase();
    let mut params = SkillParams::new();

    if let Some(period) = find_phrase(&lower, MONTHS).or_else(|| find_phrase(&lower, RELATIVE_PERIODS)) {
        params.insert(PARAM_PERIOD.to_string(), period.to_string());
    }
    if let Some(bank) = find_phrase(&lower, BANKS) {
        params.insert(PARAM_BANK.to_string(), bank.to_string());
    }

    params
}
