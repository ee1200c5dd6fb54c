//! Cash-flow report.
//!
//! The figures are fixed placeholders until an ERP integration exists; the
//! period comes from the message and the layout from the user's profile.

use async_trait::async_trait;

use mesh_memory::{CommunicationStyle, ResponseContext, Topic};

use crate::params::{DEFAULT_PERIOD, PARAM_PERIOD};
use crate::{Skill, SkillError, SkillOutput, SkillParams, SkillSpec};

pub struct FluxoCaixaSkill;

#[async_trait]
impl Skill for FluxoCaixaSkill {
    fn spec(&self) -> SkillSpec {
        SkillSpec {
            name: "fluxo_caixa".to_string(),
            description: "Geração de relatórios de fluxo de caixa".to_string(),
            keywords: ["fluxo", "caixa", "cash flow", "relatório"]
                .iter()
                .map(|k| k.to_string())
                .collect(),
        }
    }

    async fn execute(
        &self,
        params: &SkillParams,
        context: &ResponseContext,
    ) -> Result<SkillOutput, SkillError> {
        let period = params
            .get(PARAM_PERIOD)
            .map(String::as_str)
            .unwrap_or(DEFAULT_PERIOD);
        let profile = &context.profile;
        let mut personalized = false;

        let mut text = String::from("**Relatório de Fluxo de Caixa**\n\n");
        text.push_str(&format!("**Período:** {period}\n"));
        text.push_str("**Entradas:** R$ 150.000,00\n");
        text.push_str("**Saídas:** R$ 120.000,00\n");
        text.push_str("**Saldo:** R$ 30.000,00\n\n");

        if profile.communication_style == CommunicationStyle::Detailed {
            text.push_str("**Indicadores do período:**\n");
            text.push_str("- Margem líquida: 20,0%\n");
            text.push_str("- Índice de liquidez: 1,25\n\n");
            personalized = true;
        }

        if profile.top_topic() == Some(Topic::FluxoCaixa) {
            text.push_str("**Insight:** pelo seu histórico, este é o relatório que você mais consulta.\n\n");
            personalized = true;
        }

        text.push_str("Relatório gerado com sucesso!");
        Ok(SkillOutput { text, personalized })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract_params;

    fn ctx() -> ResponseContext {
        ResponseContext::empty("u1")
    }

    #[test]
    fn claims_cash_flow_messages() {
        let skill = FluxoCaixaSkill;
        assert!(skill.can_handle("Preciso do fluxo de caixa de dezembro", &ctx()));
        assert!(skill.can_handle("Cash Flow report", &ctx()));
        assert!(skill.can_handle("me manda o relatório", &ctx()));
        assert!(!skill.can_handle("conciliação bancária", &ctx()));
    }

    #[tokio::test]
    async fn report_uses_requested_period() {
        let params = extract_params("Preciso do fluxo de caixa de dezembro");
        let out = FluxoCaixaSkill.execute(&params, &ctx()).await.unwrap();
        assert!(out.text.contains("**Período:** Dezembro"));
        for field in ["Entradas", "Saídas", "Saldo"] {
            assert!(out.text.contains(field), "missing {field}");
        }
        assert!(!out.personalized);
    }

    #[tokio::test]
    async fn default_period_when_none_given() {
        let out = FluxoCaixaSkill
            .execute(&SkillParams::new(), &ctx())
            .await
            .unwrap();
        assert!(out.text.contains(DEFAULT_PERIOD));
    }

    #[tokio::test]
    async fn detailed_users_get_indicators_and_insight() {
        let mut context = ctx();
        context.profile.communication_style = CommunicationStyle::Detailed;
        context.profile.preferred_topics = vec![Topic::FluxoCaixa, Topic::Dre];

        let out = FluxoCaixaSkill
            .execute(&SkillParams::new(), &context)
            .await
            .unwrap();
        assert!(out.personalized);
        assert!(out.text.contains("Margem líquida"));
        assert!(out.text.contains("**Insight:**"));
    }
}
