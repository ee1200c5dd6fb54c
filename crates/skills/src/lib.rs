use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use mesh_memory::ResponseContext;

pub mod builtins;
pub mod params;

pub use builtins::{ConciliacaoSkill, FluxoCaixaSkill};
pub use params::{SkillParams, extract_params};

// ── Skill trait ──────────────────────────────────────────────────────────────

/// Static metadata about a skill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillSpec {
    pub name: String,
    pub description: String,
    /// Lowercase fragments; any one appearing in a message claims it.
    pub keywords: Vec<String>,
}

/// Text produced by a skill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillOutput {
    pub text: String,
    /// Whether the text was adapted to the user's profile.
    pub personalized: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum SkillError {
    #[error("missing parameter: {0}")]
    MissingParam(String),
    #[error("{0}")]
    Failed(String),
}

/// A keyword-triggered handler producing a templated answer.
#[async_trait]
pub trait Skill: Send + Sync {
    fn spec(&self) -> SkillSpec;

    /// Case-insensitive keyword containment.  Must not have side effects.
    fn can_handle(&self, text: &str, _context: &ResponseContext) -> bool {
        let lower = text.to_lowercase();
        self.spec()
            .keywords
            .iter()
            .any(|keyword| lower.contains(keyword.as_str()))
    }

    async fn execute(
        &self,
        params: &SkillParams,
        context: &ResponseContext,
    ) -> Result<SkillOutput, SkillError>;
}

// ── Registry ─────────────────────────────────────────────────────────────────

struct RegisteredSkill {
    name: String,
    skill: Arc<dyn Skill>,
    executions: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
}

impl RegisteredSkill {
    fn new(skill: Arc<dyn Skill>) -> Self {
        Self {
            name: skill.spec().name,
            skill,
            executions: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }
}

/// Registered skill plus its execution counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillStats {
    #[serde(flatten)]
    pub spec: SkillSpec,
    pub executions: u64,
    pub successes: u64,
    pub failures: u64,
}

/// One skill that claimed the message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkillAttempt {
    pub skill: String,
    /// `None` when the skill answered.
    pub error: Option<String>,
}

/// Result of [`SkillRegistry::dispatch`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Name and output of the skill that answered, if any.
    pub reply: Option<(String, SkillOutput)>,
    /// Every skill that claimed the message, in the order tried.
    pub attempts: Vec<SkillAttempt>,
}

impl DispatchOutcome {
    pub fn failed_attempts(&self) -> impl Iterator<Item = &SkillAttempt> {
        self.attempts.iter().filter(|attempt| attempt.error.is_some())
    }
}

/// Ordered skill list, built once at startup.
#[derive(Default)]
pub struct SkillRegistry {
    skills: Vec<RegisteredSkill>,
}

impl SkillRegistry {
    pub fn builder() -> SkillRegistryBuilder {
        SkillRegistryBuilder::default()
    }

    /// The built-in finance skills in dispatch order.
    pub fn with_builtins() -> Self {
        Self::builder()
            .register(FluxoCaixaSkill)
            .register(ConciliacaoSkill)
            .build()
    }

    pub fn len(&self) -> usize {
        self.skills.len()
    }

    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.skills.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&dyn Skill> {
        self.skills
            .iter()
            .find(|s| s.name == name)
            .map(|s| s.skill.as_ref())
    }

    pub fn stats(&self) -> Vec<SkillStats> {
        self.skills
            .iter()
            .map(|s| SkillStats {
                spec: s.skill.spec(),
                executions: s.executions.load(Ordering::Relaxed),
                successes: s.successes.load(Ordering::Relaxed),
                failures: s.failures.load(Ordering::Relaxed),
            })
            .collect()
    }

    /// Offer `text` to each skill in registration order.  The first skill
    /// that claims it and succeeds answers; a failing skill is logged and
    /// the search continues with the next one.
    pub async fn dispatch(&self, text: &str, context: &ResponseContext) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();
        let mut extracted: Option<SkillParams> = None;

        for entry in &self.skills {
            if !entry.skill.can_handle(text, context) {
                continue;
            }
            let params = extracted.get_or_insert_with(|| extract_params(text));
            entry.executions.fetch_add(1, Ordering::Relaxed);

            match entry.skill.execute(params, context).await {
                Ok(output) => {
                    entry.successes.fetch_add(1, Ordering::Relaxed);
                    debug!(skill = %entry.name, personalized = output.personalized, "skill answered");
                    outcome.attempts.push(SkillAttempt {
                        skill: entry.name.clone(),
                        error: None,
                    });
                    outcome.reply = Some((entry.name.clone(), output));
                    return outcome;
                }
                Err(err) => {
                    entry.failures.fetch_add(1, Ordering::Relaxed);
                    warn!(skill = %entry.name, error = %err, "skill failed, trying next");
                    outcome.attempts.push(SkillAttempt {
                        skill: entry.name.clone(),
                        error: Some(err.to_string()),
                    });
                }
            }
        }

        outcome
    }
}

#[derive(Default)]
pub struct SkillRegistryBuilder {
    skills: Vec<RegisteredSkill>,
}

impl SkillRegistryBuilder {
    /// Add a skill.  Registering a name twice replaces the earlier skill but
    /// keeps its position.
    pub fn register<S: Skill + 'static>(self, skill: S) -> Self {
        self.register_arc(Arc::new(skill))
    }

    pub fn register_arc(mut self, skill: Arc<dyn Skill>) -> Self {
        let entry = RegisteredSkill::new(skill);
        match self.skills.iter_mut().find(|s| s.name == entry.name) {
            Some(existing) => *existing = entry,
            None => self.skills.push(entry),
        }
        self
    }

    pub fn build(self) -> SkillRegistry {
        SkillRegistry {
            skills: self.skills,
        }
    }
}

// ── Registry tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod registry_tests {
    use super::*;

    struct DummySkill {
        name: &'static str,
        keywords: &'static [&'static str],
        reply: &'static str,
        fail: bool,
    }

    impl DummySkill {
        fn ok(name: &'static str, keywords: &'static [&'static str], reply: &'static str) -> Self {
            Self {
                name,
                keywords,
                reply,
                fail: false,
            }
        }

        fn failing(name: &'static str, keywords: &'static [&'static str]) -> Self {
            Self {
                name,
                keywords,
                reply: "",
                fail: true,
            }
        }
    }

    #[async_trait]
    impl Skill for DummySkill {
        fn spec(&self) -> SkillSpec {
            SkillSpec {
                name: self.name.to_string(),
                description: format!("Dummy skill: {}", self.name),
                keywords: self.keywords.iter().map(|k| k.to_string()).collect(),
            }
        }

        async fn execute(
            &self,
            _params: &SkillParams,
            _context: &ResponseContext,
        ) -> Result<SkillOutput, SkillError> {
            if self.fail {
                return Err(SkillError::Failed(format!("{} exploded", self.name)));
            }
            Ok(SkillOutput {
                text: self.reply.to_string(),
                personalized: false,
            })
        }
    }

    fn ctx() -> ResponseContext {
        ResponseContext::empty("u1")
    }

    #[test]
    fn empty_registry() {
        let reg = SkillRegistry::default();
        assert!(reg.is_empty());
        assert!(reg.get("anything").is_none());
    }

    #[test]
    fn builtins_registered_in_order() {
        let reg = SkillRegistry::with_builtins();
        assert_eq!(reg.names(), vec!["fluxo_caixa", "conciliacao"]);
    }

    #[test]
    fn duplicate_name_replaces_in_place() {
        let reg = SkillRegistry::builder()
            .register(DummySkill::ok("dup", &["a"], "first"))
            .register(DummySkill::ok("other", &["b"], "other"))
            .register(DummySkill::ok("dup", &["c"], "second"))
            .build();

        assert_eq!(reg.names(), vec!["dup", "other"]);
        assert_eq!(reg.get("dup").unwrap().spec().keywords, vec!["c"]);
    }

    #[test]
    fn default_can_handle_is_case_insensitive() {
        let skill = DummySkill::ok("s", &["fluxo"], "x");
        assert!(skill.can_handle("FLUXO de caixa", &ctx()));
        assert!(!skill.can_handle("balanço", &ctx()));
    }

    #[tokio::test]
    async fn first_match_wins() {
        let reg = SkillRegistry::builder()
            .register(DummySkill::ok("first", &["caixa"], "from first"))
            .register(DummySkill::ok("second", &["caixa"], "from second"))
            .build();

        let outcome = reg.dispatch("fluxo de caixa", &ctx()).await;
        let (name, output) = outcome.reply.unwrap();
        assert_eq!(name, "first");
        assert_eq!(output.text, "from first");
        assert_eq!(outcome.attempts.len(), 1);
    }

    #[tokio::test]
    async fn failing_skill_falls_through() {
        let reg = SkillRegistry::builder()
            .register(DummySkill::failing("broken", &["caixa"]))
            .register(DummySkill::ok("backup", &["caixa"], "saved"))
            .build();

        let outcome = reg.dispatch("caixa", &ctx()).await;
        assert_eq!(outcome.reply.as_ref().map(|(name, _)| name.as_str()), Some("backup"));
        assert_eq!(outcome.failed_attempts().count(), 1);

        let stats = reg.stats();
        assert_eq!((stats[0].executions, stats[0].failures), (1, 1));
        assert_eq!((stats[1].executions, stats[1].successes), (1, 1));
    }

    #[tokio::test]
    async fn no_match_returns_no_reply() {
        let reg = SkillRegistry::builder()
            .register(DummySkill::ok("s", &["caixa"], "x"))
            .build();
        let outcome = reg.dispatch("qual o horário?", &ctx()).await;
        assert!(outcome.reply.is_none());
        assert!(outcome.attempts.is_empty());
        assert_eq!(reg.stats()[0].executions, 0);
    }

    #[tokio::test]
    async fn all_matching_failures_return_no_reply() {
        let reg = SkillRegistry::builder()
            .register(DummySkill::failing("a", &["x"]))
            .register(DummySkill::failing("b", &["x"]))
            .build();
        let outcome = reg.dispatch("x", &ctx()).await;
        assert!(outcome.reply.is_none());
        assert_eq!(outcome.failed_attempts().count(), 2);
    }
}
