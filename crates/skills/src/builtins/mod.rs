//! Built-in finance skills.

mod conciliacao;
mod fluxo_caixa;

pub use conciliacao::ConciliacaoSkill;
pub use fluxo_caixa::FluxoCaixaSkill;
