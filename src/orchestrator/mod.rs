//! Runs a workflow's agents in sequence and aggregates their reports.

pub mod pipeline;

use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::agents::{agent_for, run_agent};
use crate::agents::reply::array;
use crate::agents::strategy_decision::NO_BID;
use crate::config::ModelConfig;
use crate::domain::agents::{AgentKind, LogEntry, UserContext};
use crate::domain::workflow::{TimelineEntry, WorkflowReport, WorkflowStatus, WorkflowType};
use crate::services::llm_client::ChatModel;

use pipeline::{best_tender, steps, PipelineState};

pub const NO_TENDERS_MESSAGE: &str = "No suitable tenders found";
pub const NO_BID_MESSAGE: &str = "Decision is NO-BID; document assembly skipped";

/// Drives the agents of a workflow.
#[derive(Clone)]
pub struct AgentOrchestrator {
    llm: Arc<dyn ChatModel>,
    models: ModelConfig,
}

/// How a pipeline ended.
enum Halt {
    Finished,
    Stopped(&'static str),
    Failed(String),
}

impl AgentOrchestrator {
    pub fn new(llm: Arc<dyn ChatModel>, models: ModelConfig) -> Self {
        Self { llm, models }
    }

    /// Run `workflow` on `input` and report every step.
    ///
    /// Agent failures never surface as errors: they end up in the report's
    /// status, error and per-step results.
    #[instrument(skip(self, input, ctx), fields(workflow = %workflow))]
    pub async fn execute(
        &self,
        execution_id: Uuid,
        workflow: WorkflowType,
        input: &Value,
        ctx: &UserContext,
    ) -> WorkflowReport {
        let mut workflow_log = vec![LogEntry::new(
            "workflow_started",
            json!({
                "execution_id": execution_id,
                "workflow_type": workflow,
                "input": input,
            }),
        )];
        let mut agents_executed = Vec::new();
        let mut results = Map::new();
        let mut timeline = Vec::new();
        let mut state = PipelineState::new(input, ctx);

        let mut halt = Halt::Finished;
        for (index, step) in steps(workflow).iter().enumerate() {
            if step.agent == AgentKind::DocumentAssembly && is_no_bid(&results) {
                halt = Halt::Stopped(NO_BID_MESSAGE);
                break;
            }

            let step_input = if index == 0 {
                input.clone()
            } else {
                state.input_for(step.agent)
            };

            let started = Instant::now();
            let run = run_agent(
                agent_for(step.agent).as_ref(),
                self.llm.as_ref(),
                &self.models,
                &step_input,
                ctx,
            )
            .await;
            let duration_ms = started.elapsed().as_millis() as u64;

            agents_executed.push(step.agent);
            timeline.push(TimelineEntry {
                agent: step.agent.label().to_string(),
                timestamp: run.timestamp,
                status: run.status,
                duration_ms,
            });
            workflow_log.push(LogEntry::new(
                "step_completed",
                json!({ "agent": step.agent, "status": run.status, "duration_ms": duration_ms }),
            ));

            let succeeded = run.is_success();
            let error = run.error.clone().unwrap_or_default();
            let output = run.output().clone();
            results.insert(step.agent.result_key().to_string(), json!(run));

            if !succeeded {
                if step.optional {
                    warn!(agent = %step.agent, error = %error, "Optional step failed, continuing");
                    continue;
                }
                halt = Halt::Failed(format!("{} failed: {}", step.agent.label(), error));
                break;
            }

            if step.agent == AgentKind::TenderDiscovery {
                let selected = best_tender(array(&output, "discovered_tenders")).cloned();
                match selected {
                    Some(tender) => state.select_tender(tender),
                    None => {
                        state.record(step.agent, output);
                        halt = Halt::Stopped(NO_TENDERS_MESSAGE);
                        break;
                    }
                }
            }
            state.record(step.agent, output);
        }

        let (status, error) = match halt {
            Halt::Finished => (WorkflowStatus::Completed, None),
            Halt::Stopped(message) => {
                results.insert("message".to_string(), json!(message));
                (WorkflowStatus::Completed, None)
            }
            Halt::Failed(message) => (WorkflowStatus::Error, Some(message)),
        };

        match &error {
            None => {
                info!(agents = agents_executed.len(), "Workflow completed");
                workflow_log.push(LogEntry::new(
                    "workflow_completed",
                    json!({ "agents_executed": &agents_executed }),
                ));
            }
            Some(message) => {
                warn!(error = %message, "Workflow halted");
                workflow_log.push(LogEntry::new("workflow_error", json!({ "error": message })));
            }
        }

        WorkflowReport {
            execution_id,
            workflow_type: workflow,
            status,
            agents_executed,
            results,
            timeline,
            workflow_log,
            error,
        }
    }
}

fn is_no_bid(results: &Map<String, Value>) -> bool {
    results
        .get(AgentKind::StrategyDecision.result_key())
        .and_then(|run| run.pointer("/result/decision"))
        .and_then(Value::as_str)
        == Some(NO_BID)
}
