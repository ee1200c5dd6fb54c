//! Bank reconciliation status.

use async_trait::async_trait;

use mesh_memory::{ResponseContext, Topic};

use crate::params::PARAM_BANK;
use crate::{Skill, SkillError, SkillOutput, SkillParams, SkillSpec};

pub struct ConciliacaoSkill;

#[async_trait]
impl Skill for ConciliacaoSkill {
    fn spec(&self) -> SkillSpec {
        SkillSpec {
            name: "conciliacao".to_string(),
            description: "Conciliação bancária automatizada".to_string(),
            keywords: ["conciliação", "conciliacao", "banco", "bancária"]
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
        let recurrent = context
            .profile
            .problematic_topics
            .contains(&Topic::ConciliacaoBancaria);

        let mut text = match params.get(PARAM_BANK) {
            Some(bank) => format!("**Conciliação Bancária: {bank}**\n\n"),
            None => String::from("**Conciliação Bancária**\n\n"),
        };

        if recurrent {
            text.push_str(
                "**Atenção:** identificamos divergências recorrentes nas suas conciliações.\n\n",
            );
        }

        text.push_str("**Status:** Processando...\n");
        text.push_str("**Divergências encontradas:** 3\n");
        text.push_str("**Valor total:** R$ 2.450,00\n\n");

        if recurrent {
            text.push_str(
                "**Recomendação:** revise primeiro os débitos automáticos, onde as divergências costumam se repetir.\n\n",
            );
        }

        text.push_str("Conciliação em andamento!");
        Ok(SkillOutput {
            text,
            personalized: recurrent,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract_params;

    #[test]
    fn claims_reconciliation_messages() {
        let ctx = ResponseContext::empty("u1");
        assert!(ConciliacaoSkill.can_handle("Conciliação do mês", &ctx));
        assert!(ConciliacaoSkill.can_handle("extrato do banco", &ctx));
        assert!(!ConciliacaoSkill.can_handle("fluxo de caixa", &ctx));
    }

    #[tokio::test]
    async fn status_names_the_bank() {
        let ctx = ResponseContext::empty("u1");
        let params = extract_params("conciliação do bradesco");
        let out = ConciliacaoSkill.execute(&params, &ctx).await.unwrap();
        assert!(out.text.starts_with("**Conciliação Bancária: Bradesco**"));
        assert!(out.text.contains("**Divergências encontradas:** 3"));
        assert!(!out.personalized);
    }

    #[tokio::test]
    async fn recurrent_problems_add_warning_and_recommendation() {
        let mut ctx = ResponseContext::empty("u1");
        ctx.profile.problematic_topics = vec![Topic::ConciliacaoBancaria];
        let out = ConciliacaoSkill
            .execute(&SkillParams::new(), &ctx)
            .await
            .unwrap();
        assert!(out.personalized);
        assert!(out.text.contains("**Atenção:**"));
        assert!(out.text.contains("**Recomendação:**"));
    }
}
