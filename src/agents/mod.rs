//! LLM-backed tender agents.
//!
//! Each agent owns one persona (system prompt), turns its input into a user
//! prompt, and validates the JSON object the model returns. [`run_agent`]
//! wraps every agent in the same envelope: execution log, one
//! self-correction round when the result is flagged, and a success/error
//! status instead of a propagated error.

pub mod assistant;
pub mod boq_generator;
pub mod discovery;
pub mod document_assembly;
pub mod document_parser;
pub mod pricing_strategy;
pub mod reply;
pub mod rfq_vendor;
pub mod risk_compliance;
pub mod session;
pub mod strategy_decision;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::ModelConfig;
use crate::domain::agents::{AgentKind, AgentRun, LogEntry, StepStatus, UserContext};
use crate::services::llm_client::{ChatModel, LlmError};

use reply::{parse_object, pretty, JsonObject};
pub use session::ChatSession;

/// Flag an agent sets when its output failed validation.
pub const NEEDS_CORRECTION: &str = "needs_correction";

#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

#[async_trait]
pub trait Agent: Send + Sync {
    fn kind(&self) -> AgentKind;

    fn system_prompt(&self) -> &'static str;

    /// Produce the agent's result object for `input`.
    async fn process(
        &self,
        chat: &mut ChatSession<'_>,
        input: &Value,
        ctx: &UserContext,
    ) -> Result<JsonObject, AgentError>;
}

/// Instantiate the agent for `kind`.
pub fn agent_for(kind: AgentKind) -> Box<dyn Agent> {
    match kind {
        AgentKind::TenderDiscovery => Box::new(discovery::TenderDiscoveryAgent),
        AgentKind::DocumentParser => Box::new(document_parser::DocumentParserAgent),
        AgentKind::BoqGenerator => Box::new(boq_generator::BoqGeneratorAgent),
        AgentKind::RfqVendor => Box::new(rfq_vendor::RfqVendorAgent),
        AgentKind::PricingStrategy => Box::new(pricing_strategy::PricingStrategyAgent),
        AgentKind::RiskCompliance => Box::new(risk_compliance::RiskComplianceAgent),
        AgentKind::StrategyDecision => Box::new(strategy_decision::StrategyDecisionAgent),
        AgentKind::DocumentAssembly => Box::new(document_assembly::DocumentAssemblyAgent),
        AgentKind::Assistant => Box::new(assistant::AssistantAgent),
    }
}

/// Mark `result` for self-correction when any of `required` keys is missing.
pub(crate) fn require_keys(result: &mut JsonObject, required: &[&str]) {
    if required.iter().any(|key| !result.contains_key(*key)) {
        result.insert(NEEDS_CORRECTION.to_string(), Value::Bool(true));
    }
}

/// Insert `value` under `key` unless the model already supplied one.
pub(crate) fn default_key(result: &mut JsonObject, key: &str, value: Value) {
    result.entry(key.to_string()).or_insert(value);
}

pub(crate) fn now_iso() -> Value {
    Value::String(Utc::now().to_rfc3339())
}

fn needs_correction(result: &JsonObject) -> bool {
    result
        .get(NEEDS_CORRECTION)
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// Run `agent` once and wrap the outcome in an [`AgentRun`].
pub async fn run_agent(
    agent: &dyn Agent,
    llm: &dyn ChatModel,
    models: &ModelConfig,
    input: &Value,
    ctx: &UserContext,
) -> AgentRun {
    let kind = agent.kind();
    let mut log = vec![LogEntry::new("started", json!({ "input": input }))];
    let mut chat = ChatSession::new(llm, models.for_tier(kind.tier()), agent.system_prompt());

    debug!(agent = %kind, model = chat.model_name(), "Agent started");

    let outcome = async {
        let mut result = agent.process(&mut chat, input, ctx).await?;
        if needs_correction(&result) {
            result = self_correct(&mut chat, result, input, &mut log).await?;
        }
        Ok::<_, AgentError>(result)
    }
    .await;

    match outcome {
        Ok(result) => {
            let result = Value::Object(result);
            log.push(LogEntry::new("completed", json!({ "output": &result })));
            debug!(agent = %kind, "Agent completed");

            AgentRun {
                agent: kind,
                status: StepStatus::Success,
                result: Some(result),
                error: None,
                timestamp: Utc::now(),
                execution_log: log,
            }
        }
        Err(e) => {
            warn!(agent = %kind, error = %e, "Agent failed");
            log.push(LogEntry::new("error", json!({ "error": e.to_string() })));

            AgentRun {
                agent: kind,
                status: StepStatus::Error,
                result: None,
                error: Some(e.to_string()),
                timestamp: Utc::now(),
                execution_log: log,
            }
        }
    }
}

/// Ask the model to repair a flagged result; keep the original if the
/// answer is not a JSON object.
async fn self_correct(
    chat: &mut ChatSession<'_>,
    result: JsonObject,
    input: &Value,
    log: &mut Vec<LogEntry>,
) -> Result<JsonObject, AgentError> {
    let prompt = format!(
        "Review the following output and correct any errors or inconsistencies.\n\n\
         Original Input: {}\n\
         Current Output: {}\n\n\
         Return the corrected output as a single JSON object in the same format.",
        pretty(input),
        pretty(&result),
    );

    let reply = chat.send(prompt).await?;

    match parse_object(&reply) {
        Some(corrected) => {
            log.push(LogEntry::new(
                "self_corrected",
                json!({ "before": &result, "after": &corrected }),
            ));
            Ok(corrected)
        }
        None => Ok(result),
    }
}
