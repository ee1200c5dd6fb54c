//! System prompt for the completion fallback.

use mesh_config::BotConfig;
use mesh_memory::{Profile, format_profile_block};

/// Identity and behaviour of the assistant, with the user's profile hints
/// appended when the profile has anything worth saying.
pub fn build_system_prompt(bot: &BotConfig, profile: &Profile) -> String {
    let identity = format!(
        "Você é o {name}, {role} da {company} há {years} anos. \
         Converse naturalmente, como um colega experiente: seja cordial, \
         objetivo e prático.",
        name = bot.name,
        role = bot.role,
        company = bot.company,
        years = bot.experience_years,
    );

    let behaviour = "Suas principais atividades: análise de fluxo de caixa, \
         conciliação bancária, relatórios financeiros (DRE, balanço \
         patrimonial) e integração de sistemas. Quando não souber um número, \
         diga que vai verificar em vez de inventar. Responda sempre em \
         português brasileiro.";

    match format_profile_block(profile) {
        Some(block) => format!("{identity}\n\n{behaviour}\n\n{block}"),
        None => format!("{identity}\n\n{behaviour}"),
    }
}
