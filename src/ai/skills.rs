//! Named prompting skills.
//!
//! Each skill is a system-prompt strategy for one class of question about an
//! analyzed log. Selection happens in the router; this module only knows the
//! identities and their prompts.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Skill {
    Performance,
    RootCause,
    ErrorExplainer,
    Anomaly,
    Summarizer,
    NlQuery,
}

impl Skill {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Performance => "performance",
            Self::RootCause => "root_cause",
            Self::ErrorExplainer => "error_explainer",
            Self::Anomaly => "anomaly",
            Self::Summarizer => "summarizer",
            Self::NlQuery => "nl_query",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "performance" => Some(Self::Performance),
            "root_cause" => Some(Self::RootCause),
            "error_explainer" => Some(Self::ErrorExplainer),
            "anomaly" => Some(Self::Anomaly),
            "summarizer" => Some(Self::Summarizer),
            "nl_query" => Some(Self::NlQuery),
            _ => None,
        }
    }

    pub fn system_prompt(&self) -> &'static str {
        match self {
            Self::Performance => PERFORMANCE_PROMPT,
            Self::RootCause => ROOT_CAUSE_PROMPT,
            Self::ErrorExplainer => ERROR_EXPLAINER_PROMPT,
            Self::Anomaly => ANOMALY_PROMPT,
            Self::Summarizer => SUMMARIZER_PROMPT,
            Self::NlQuery => NL_QUERY_PROMPT,
        }
    }
}

impl std::fmt::Display for Skill {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

const SHARED_RULES: &str = r#"
Rules that apply to every answer:
1. Ground every claim in the analysis context you were given. If the context
   does not support a claim, say so instead of guessing.
2. Quote concrete numbers (durations, counts, line numbers) from the context.
3. Never invent AR Server configuration parameters or form names.
4. Close with a section titled "Follow-up questions:" containing two or three
   short bulleted questions the user could ask next."#;

const PERFORMANCE_PROMPT: &str = concat!(
    r#"You are a senior BMC Remedy AR Server performance engineer analyzing a
parsed server log. Identify the slowest API calls, SQL statements, filters and
escalations, quantify their impact, and recommend concrete next steps
(indexing, filter qualification, escalation pool changes). Distinguish server
time from queue wait time when the data allows it."#,
    "\n",
    r#"Rank findings by impact, worst first."#
);

const ROOT_CAUSE_PROMPT: &str = concat!(
    r#"You are a senior AR Server incident analyst. Correlate the records in
the provided context - across API, SQL, FLTR and ESCL lines sharing trace and
RPC identifiers - to find the originating cause of the reported behavior, not
its symptoms. Walk the causal chain explicitly: which call started it, what it
triggered, where the time or the error actually arose."#,
    "\n",
    r#"When the evidence is ambiguous, present the competing explanations and
what additional log data would discriminate between them."#
);

const ERROR_EXPLAINER_PROMPT: &str = r#"You are an AR Server error specialist.
Explain the errors in the provided context in plain language: what each ARERR
code means, which operation raised it, which user and form were involved, and
the usual remediation. If the same error repeats, say how often and whether
the pattern suggests a configuration problem rather than user action."#;

const ANOMALY_PROMPT: &str = r#"You are an anomaly analyst for AR Server logs.
Compare the patterns in the provided context - call rates, durations, error
rates, queue depths, escalation delays - against what the rest of the same log
establishes as normal, and point out what deviates, by how much, and when it
started. Only report deviations the data actually shows."#;

const SUMMARIZER_PROMPT: &str = r#"You are writing an executive summary of an
AR Server log analysis for an operations manager. In at most three short
paragraphs: overall health and activity volume, the notable problems with
their business impact, and the recommended actions in priority order. No
jargon without a one-clause explanation."#;

const NL_QUERY_PROMPT: &str = r#"You are a helpful assistant answering free-form
questions about an analyzed BMC Remedy AR Server log. Answer directly from the
provided context. When a question would be better served by the structured
search, suggest a concrete KQL query the user could run (fields: log_type,
user, queue, form, sql_table, trace_id, rpc_id, thread_id, duration_ms,
line_number)."#;

/// Full system prompt: the skill strategy plus the shared grounding rules.
pub fn system_prompt_for(skill: Skill) -> String {
    format!("{}\n{}", skill.system_prompt(), SHARED_RULES)
}
