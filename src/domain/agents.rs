//! Agent identities, run envelopes and the context agents see.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::ModelConfig;

/// The agent personas available to workflows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    TenderDiscovery,
    DocumentParser,
    BoqGenerator,
    RfqVendor,
    PricingStrategy,
    RiskCompliance,
    StrategyDecision,
    DocumentAssembly,
    #[serde(rename = "ai_assistant")]
    Assistant,
}

/// Which model an agent runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelTier {
    Reasoning,
    Fast,
}

impl AgentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TenderDiscovery => "tender_discovery",
            Self::DocumentParser => "document_parser",
            Self::BoqGenerator => "boq_generator",
            Self::RfqVendor => "rfq_vendor",
            Self::PricingStrategy => "pricing_strategy",
            Self::RiskCompliance => "risk_compliance",
            Self::StrategyDecision => "strategy_decision",
            Self::DocumentAssembly => "document_assembly",
            Self::Assistant => "ai_assistant",
        }
    }

    /// Key under which the run is stored in a workflow's `results`.
    pub fn result_key(&self) -> &'static str {
        match self {
            Self::TenderDiscovery => "discovery",
            Self::DocumentParser => "parsing",
            Self::BoqGenerator => "boq",
            Self::RfqVendor => "rfq",
            Self::PricingStrategy => "pricing",
            Self::RiskCompliance => "risk",
            Self::StrategyDecision => "decision",
            Self::DocumentAssembly => "documents",
            Self::Assistant => "assistant",
        }
    }

    /// Human-readable name used on the timeline.
    pub fn label(&self) -> &'static str {
        match self {
            Self::TenderDiscovery => "Tender Discovery",
            Self::DocumentParser => "Document Parsing",
            Self::BoqGenerator => "BOQ Generation",
            Self::RfqVendor => "RFQ Generation",
            Self::PricingStrategy => "Pricing Strategy",
            Self::RiskCompliance => "Risk Assessment",
            Self::StrategyDecision => "Strategy Decision",
            Self::DocumentAssembly => "Document Assembly",
            Self::Assistant => "AI Assistant",
        }
    }

    pub fn tier(&self) -> ModelTier {
        match self {
            Self::DocumentAssembly | Self::Assistant => ModelTier::Fast,
            _ => ModelTier::Reasoning,
        }
    }
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ModelConfig {
    pub fn for_tier(&self, tier: ModelTier) -> &str {
        match tier {
            ModelTier::Reasoning => &self.reasoning,
            ModelTier::Fast => &self.fast,
        }
    }
}

/// Outcome of a single agent run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Success,
    Error,
}

/// Timestamped log line attached to agent runs and workflows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub stage: String,
    pub timestamp: DateTime<Utc>,
    pub data: Value,
}

impl LogEntry {
    pub fn new(stage: impl Into<String>, data: Value) -> Self {
        Self {
            stage: stage.into(),
            timestamp: Utc::now(),
            data,
        }
    }
}

/// Envelope returned by every agent run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRun {
    pub agent: AgentKind,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub execution_log: Vec<LogEntry>,
}

impl AgentRun {
    pub fn is_success(&self) -> bool {
        self.status == StepStatus::Success
    }

    /// The agent's result payload, `Value::Null` for failed runs.
    pub fn output(&self) -> &Value {
        self.result.as_ref().unwrap_or(&Value::Null)
    }
}

/// Per-user data agents draw on besides their explicit input.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserContext {
    #[serde(default)]
    pub company_profile: Option<Value>,
    #[serde(default)]
    pub product_catalog: Vec<Value>,
    #[serde(default)]
    pub existing_tenders_db: Vec<Value>,
    #[serde(default)]
    pub vendors: Vec<Value>,
}

impl UserContext {
    pub fn company_profile(&self) -> &Value {
        self.company_profile.as_ref().unwrap_or(&Value::Null)
    }
}
