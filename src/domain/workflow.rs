use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::str::FromStr;
use uuid::Uuid;

use super::agents::{AgentKind, LogEntry, StepStatus};

/// Named agent workflows a user can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowType {
    /// Discovery through assembly
    DiscoverAndBid,
    /// Parsing through assembly, tender already selected
    ParseAndBid,
    /// Discovery through decision, no assembly
    FullAnalysis,
    GenerateBoq,
    AssembleDocuments,
    RfqOnly,
    PricingAnalysis,
    RiskAssessment,
    DecisionSupport,
    ChatAssistant,
}

impl WorkflowType {
    pub const ALL: [WorkflowType; 10] = [
        Self::DiscoverAndBid,
        Self::ParseAndBid,
        Self::FullAnalysis,
        Self::GenerateBoq,
        Self::AssembleDocuments,
        Self::RfqOnly,
        Self::PricingAnalysis,
        Self::RiskAssessment,
        Self::DecisionSupport,
        Self::ChatAssistant,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DiscoverAndBid => "discover_and_bid",
            Self::ParseAndBid => "parse_and_bid",
            Self::FullAnalysis => "full_analysis",
            Self::GenerateBoq => "generate_boq",
            Self::AssembleDocuments => "assemble_documents",
            Self::RfqOnly => "rfq_only",
            Self::PricingAnalysis => "pricing_analysis",
            Self::RiskAssessment => "risk_assessment",
            Self::DecisionSupport => "decision_support",
            Self::ChatAssistant => "chat_assistant",
        }
    }

    /// Credits deducted before the workflow runs.
    pub fn credit_cost(&self) -> i64 {
        match self {
            Self::DiscoverAndBid => 55,
            Self::ParseAndBid => 45,
            Self::FullAnalysis => 50,
            Self::GenerateBoq => 20,
            Self::AssembleDocuments => 10,
            Self::RfqOnly => 15,
            Self::PricingAnalysis => 20,
            Self::RiskAssessment => 20,
            Self::DecisionSupport => 15,
            Self::ChatAssistant => 2,
        }
    }
}

impl std::fmt::Display for WorkflowType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|w| w.as_str() == s)
            .ok_or_else(|| format!("Unknown workflow type: {}", s))
    }
}

/// Lifecycle of a stored execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "running" => Self::Running,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            _ => Self::Pending,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Overall outcome of an orchestrated workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Completed,
    Error,
}

/// One step on a workflow timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub agent: String,
    pub timestamp: DateTime<Utc>,
    pub status: StepStatus,
    pub duration_ms: u64,
}

/// Aggregated result of an orchestrated workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowReport {
    pub execution_id: Uuid,
    pub workflow_type: WorkflowType,
    pub status: WorkflowStatus,
    pub agents_executed: Vec<AgentKind>,
    pub results: Map<String, Value>,
    pub timeline: Vec<TimelineEntry>,
    pub workflow_log: Vec<LogEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Stored record of a workflow execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentExecution {
    pub id: Uuid,
    pub user_id: Uuid,
    pub tenant_id: Option<Uuid>,
    pub workflow_type: WorkflowType,
    pub status: ExecutionStatus,
    pub input_data: Value,
    pub results: Option<Value>,
    pub agents_executed: Vec<AgentKind>,
    pub timeline: Vec<TimelineEntry>,
    pub workflow_log: Vec<LogEntry>,
    pub credits_used: i64,
    pub tokens_consumed: i64,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl AgentExecution {
    pub fn pending(
        user_id: Uuid,
        tenant_id: Option<Uuid>,
        workflow_type: WorkflowType,
        input_data: Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            tenant_id,
            workflow_type,
            status: ExecutionStatus::Pending,
            input_data,
            results: None,
            agents_executed: Vec::new(),
            timeline: Vec::new(),
            workflow_log: Vec::new(),
            credits_used: 0,
            tokens_consumed: 0,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }
}

/// Final state written when an execution finishes.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub status: ExecutionStatus,
    pub results: Option<Value>,
    pub agents_executed: Vec<AgentKind>,
    pub timeline: Vec<TimelineEntry>,
    pub workflow_log: Vec<LogEntry>,
    pub credits_used: i64,
    pub tokens_consumed: i64,
    pub error: Option<String>,
}

/// Request DTO for running a workflow
#[derive(Debug, Clone, Deserialize)]
pub struct AgentExecutionRequest {
    pub workflow_type: String,
    #[serde(default = "empty_object")]
    pub input_data: Value,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

/// Response DTO for an accepted workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteResponse {
    pub execution_id: Uuid,
    pub status: ExecutionStatus,
    pub message: String,
    pub credits_deducted: i64,
}

/// Status event pushed on the execution stream.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionStatusEvent {
    pub execution_id: Uuid,
    pub status: ExecutionStatus,
    pub agents_executed: Vec<AgentKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&AgentExecution> for ExecutionStatusEvent {
    fn from(e: &AgentExecution) -> Self {
        Self {
            execution_id: e.id,
            status: e.status,
            agents_executed: e.agents_executed.clone(),
            error: e.error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workflow_names_round_trip_through_from_str() {
        for workflow in WorkflowType::ALL {
            assert_eq!(workflow.as_str().parse::<WorkflowType>().unwrap(), workflow);
            assert_eq!(
                serde_json::to_value(workflow).unwrap(),
                serde_json::json!(workflow.as_str())
            );
        }
    }

    #[test]
    fn unknown_workflow_is_rejected() {
        let err = "discover_everything".parse::<WorkflowType>().unwrap_err();
        assert_eq!(err, "Unknown workflow type: discover_everything");
    }

    #[test]
    fn full_pipelines_cost_more_than_single_steps() {
        assert_eq!(WorkflowType::DiscoverAndBid.credit_cost(), 55);
        assert_eq!(WorkflowType::ParseAndBid.credit_cost(), 45);
        assert!(WorkflowType::ChatAssistant.credit_cost() < WorkflowType::GenerateBoq.credit_cost());
    }

    #[test]
    fn execution_request_defaults_input() {
        let req: AgentExecutionRequest =
            serde_json::from_str(r#"{"workflow_type": "chat_assistant"}"#).unwrap();
        assert!(req.input_data.as_object().unwrap().is_empty());
    }
}
