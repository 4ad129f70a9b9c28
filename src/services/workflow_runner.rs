//! Background execution of stored workflow requests.

use anyhow::Result;
use chrono::Utc;
use futures::FutureExt;
use serde_json::Value;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn, Instrument};

use crate::domain::credits::{TenantUsage, TransactionType, TOKENS_PER_AGENT};
use crate::domain::workflow::{AgentExecution, ExecutionOutcome, ExecutionStatus, WorkflowStatus};
use crate::orchestrator::AgentOrchestrator;
use crate::services::cache::{keys, RedisCache};
use crate::services::store::AgentStore;

/// Runs accepted executions to completion and books their usage.
#[derive(Clone)]
pub struct WorkflowRunner {
    store: Arc<dyn AgentStore>,
    orchestrator: AgentOrchestrator,
    cache: Option<RedisCache>,
}

impl WorkflowRunner {
    pub fn new(
        store: Arc<dyn AgentStore>,
        orchestrator: AgentOrchestrator,
        cache: Option<RedisCache>,
    ) -> Self {
        Self {
            store,
            orchestrator,
            cache,
        }
    }

    /// Run `execution` on its own task.
    pub fn spawn(&self, execution: AgentExecution) -> JoinHandle<()> {
        let runner = self.clone();
        let span = tracing::info_span!("execution", execution_id = %execution.id);
        tokio::spawn(async move { runner.run(execution).await }.instrument(span))
    }

    /// Drive one execution to a terminal state. Never fails: every error,
    /// including a panic inside an agent, is written to the execution record.
    #[instrument(skip(self, execution), fields(workflow = %execution.workflow_type))]
    pub async fn run(&self, execution: AgentExecution) {
        let attempt = AssertUnwindSafe(self.orchestrate(&execution))
            .catch_unwind()
            .await;

        let outcome = match attempt {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                error!(error = %e, "Execution failed before any agent ran");
                Self::aborted(&execution, e.to_string())
            }
            Err(payload) => {
                let reason = panic_message(payload.as_ref());
                error!(panic = %reason, "Execution panicked");
                Self::aborted(&execution, format!("Execution aborted: {reason}"))
            }
        };

        if let Err(e) = self.settle(&execution, outcome).await {
            error!(error = %e, "Failed to store execution outcome");
        }
    }

    /// Outcome of a run that produced no agent results.
    fn aborted(execution: &AgentExecution, error: String) -> ExecutionOutcome {
        ExecutionOutcome {
            status: ExecutionStatus::Failed,
            results: None,
            agents_executed: Vec::new(),
            timeline: Vec::new(),
            workflow_log: Vec::new(),
            credits_used: execution.workflow_type.credit_cost(),
            tokens_consumed: 0,
            error: Some(error),
        }
    }

    async fn orchestrate(&self, execution: &AgentExecution) -> Result<ExecutionOutcome> {
        self.store.mark_running(execution.id).await?;
        let ctx = self.store.user_context(execution.user_id).await?;

        let report = self
            .orchestrator
            .execute(
                execution.id,
                execution.workflow_type,
                &execution.input_data,
                &ctx,
            )
            .await;

        let status = match report.status {
            WorkflowStatus::Completed => ExecutionStatus::Completed,
            WorkflowStatus::Error => ExecutionStatus::Failed,
        };

        Ok(ExecutionOutcome {
            status,
            tokens_consumed: TOKENS_PER_AGENT * report.agents_executed.len() as i64,
            credits_used: execution.workflow_type.credit_cost(),
            results: Some(Value::Object(report.results)),
            agents_executed: report.agents_executed,
            timeline: report.timeline,
            workflow_log: report.workflow_log,
            error: report.error,
        })
    }

    async fn settle(&self, execution: &AgentExecution, mut outcome: ExecutionOutcome) -> Result<()> {
        let cost = execution.workflow_type.credit_cost();

        // A failed refund leaves the charge on the record; the run is still finished
        if outcome.status == ExecutionStatus::Failed && outcome.agents_executed.is_empty() {
            let description = format!("Refund: AI Agent Execution: {}", execution.workflow_type);
            match self
                .store
                .add_credits(execution.user_id, cost, TransactionType::Refund, &description)
                .await
            {
                Ok(_) => {
                    outcome.credits_used = 0;
                    warn!(credits = cost, "Refunded credits for execution that never ran");
                }
                Err(e) => error!(error = %e, credits = cost, "Refund failed"),
            }
        }

        self.store.finish_execution(execution.id, &outcome).await?;
        info!(
            status = outcome.status.as_str(),
            agents = outcome.agents_executed.len(),
            tokens = outcome.tokens_consumed,
            "Execution finished"
        );

        if let (Some(tenant_id), true) = (execution.tenant_id, outcome.credits_used > 0) {
            if let Err(e) = self
                .store
                .record_tenant_usage(
                    tenant_id,
                    &TenantUsage::month_of(Utc::now()),
                    outcome.credits_used,
                    outcome.tokens_consumed,
                    TenantUsage::cost_for_tokens(outcome.tokens_consumed),
                )
                .await
            {
                error!(error = %e, %tenant_id, "Failed to record tenant usage");
            }
        }

        if let Some(cache) = &self.cache {
            if let Some(finished) = self.store.get_execution(execution.id, execution.user_id).await? {
                if let Err(e) = cache.set(&keys::execution(execution.id), &finished).await {
                    warn!(error = %e, "Failed to cache finished execution");
                }
            }
        }

        Ok(())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelConfig;
    use crate::domain::workflow::WorkflowType;
    use crate::services::store::MemoryStore;
    use crate::test_support::StubModel;
    use serde_json::json;
    use uuid::Uuid;

    async fn setup(stub: StubModel) -> (Arc<MemoryStore>, WorkflowRunner, Uuid) {
        let store = Arc::new(MemoryStore::new());
        let orchestrator = AgentOrchestrator::new(Arc::new(stub), ModelConfig::default());
        let runner = WorkflowRunner::new(store.clone(), orchestrator, None);
        let user = Uuid::new_v4();
        store
            .add_credits(user, 100, TransactionType::Purchase, "Top-up")
            .await
            .unwrap();
        (store, runner, user)
    }

    async fn accept(store: &MemoryStore, user: Uuid, tenant: Option<Uuid>, workflow: WorkflowType) -> AgentExecution {
        store
            .deduct_credits(user, workflow.credit_cost(), "run")
            .await
            .unwrap();
        let execution = AgentExecution::pending(user, tenant, workflow, json!({ "tender_id": "T-9" }));
        store.insert_execution(&execution).await.unwrap();
        execution
    }

    #[tokio::test]
    async fn completed_run_books_tokens_and_tenant_usage() {
        let stub = StubModel::new().reply(
            "BOQ Generator Agent",
            r#"{"line_items": [], "pricing_summary": {"our_total_value": 0}}"#,
        );
        let (store, runner, user) = setup(stub).await;
        let tenant = Uuid::new_v4();
        let execution = accept(&store, user, Some(tenant), WorkflowType::GenerateBoq).await;

        runner.run(execution.clone()).await;

        let stored = store.get_execution(execution.id, user).await.unwrap().unwrap();
        assert_eq!(stored.status, ExecutionStatus::Completed);
        assert_eq!(stored.tokens_consumed, 2_000);
        assert_eq!(stored.credits_used, 20);
        assert!(stored.started_at.is_some());
        assert!(stored.completed_at.is_some());
        assert!(stored.results.unwrap().get("boq").is_some());

        let month = TenantUsage::month_of(Utc::now());
        let usage = store.tenant_usage(tenant, &month).await.unwrap().unwrap();
        assert_eq!(usage.ai_credits_used, 20);
        assert_eq!(usage.ai_tokens_consumed, 2_000);
        assert_eq!(usage.cost_incurred, TenantUsage::cost_for_tokens(2_000));
    }

    #[tokio::test]
    async fn failed_agent_keeps_credits_and_records_error() {
        let (store, runner, user) = setup(StubModel::new().failing()).await;
        let execution = accept(&store, user, None, WorkflowType::RiskAssessment).await;

        runner.run(execution.clone()).await;

        let stored = store.get_execution(execution.id, user).await.unwrap().unwrap();
        assert_eq!(stored.status, ExecutionStatus::Failed);
        assert_eq!(stored.agents_executed.len(), 1);
        assert!(stored.error.unwrap().contains("failed"));
        assert_eq!(store.balance(user).await.unwrap().balance, 80);
    }

    #[tokio::test]
    async fn run_that_never_starts_is_refunded() {
        let (store, runner, user) = setup(StubModel::new().failing()).await;
        store.take_context_offline();
        let execution = accept(&store, user, Some(Uuid::new_v4()), WorkflowType::DiscoverAndBid).await;
        assert_eq!(store.balance(user).await.unwrap().balance, 45);

        runner.run(execution.clone()).await;

        let stored = store.get_execution(execution.id, user).await.unwrap().unwrap();
        assert_eq!(stored.status, ExecutionStatus::Failed);
        assert_eq!(stored.error.as_deref(), Some("context store offline"));
        assert_eq!(stored.credits_used, 0);

        let balance = store.balance(user).await.unwrap();
        assert_eq!(balance.balance, 100);
        assert_eq!(balance.total_used, 0);
        let txs = store.transactions(user, 10).await.unwrap();
        assert_eq!(txs[0].kind, TransactionType::Refund);
        assert_eq!(txs[0].amount, 55);
    }

    #[tokio::test]
    async fn failed_refund_still_finishes_the_execution() {
        let (store, runner, user) = setup(StubModel::new()).await;
        store.take_context_offline();
        store.take_refunds_offline();
        let execution = accept(&store, user, None, WorkflowType::GenerateBoq).await;

        runner.run(execution.clone()).await;

        let stored = store.get_execution(execution.id, user).await.unwrap().unwrap();
        assert_eq!(stored.status, ExecutionStatus::Failed);
        assert!(stored.completed_at.is_some());
        assert_eq!(stored.credits_used, 20);
        assert_eq!(store.balance(user).await.unwrap().balance, 80);
    }

    #[tokio::test]
    async fn panicking_agent_fails_and_refunds() {
        let stub = StubModel::new().panic_on("Risk");
        let (store, runner, user) = setup(stub).await;
        let execution = accept(&store, user, None, WorkflowType::RiskAssessment).await;

        runner.spawn(execution.clone()).await.unwrap();

        let stored = store.get_execution(execution.id, user).await.unwrap().unwrap();
        assert_eq!(stored.status, ExecutionStatus::Failed);
        assert_eq!(
            stored.error.as_deref(),
            Some("Execution aborted: stub model crashed")
        );
        assert_eq!(stored.credits_used, 0);
        assert_eq!(store.balance(user).await.unwrap().balance, 100);
    }

    #[tokio::test]
    async fn out_of_range_rfq_deadline_fails_the_run() {
        let (store, runner, user) = setup(StubModel::new().fallback("{}")).await;
        store
            .deduct_credits(user, WorkflowType::RfqOnly.credit_cost(), "run")
            .await
            .unwrap();
        let execution = AgentExecution::pending(
            user,
            None,
            WorkflowType::RfqOnly,
            json!({ "deadline_days": 1_000_000_000_i64 }),
        );
        store.insert_execution(&execution).await.unwrap();

        runner.spawn(execution.clone()).await.unwrap();

        let stored = store.get_execution(execution.id, user).await.unwrap().unwrap();
        assert_eq!(stored.status, ExecutionStatus::Failed);
        assert!(stored.error.unwrap().contains("deadline_days out of range"));
    }

    #[tokio::test]
    async fn stored_user_context_reaches_agents() {
        let stub = Arc::new(StubModel::new().fallback(r#"{"line_items": [], "pricing_summary": {}}"#));
        let store = Arc::new(MemoryStore::new());
        let runner = WorkflowRunner::new(
            store.clone(),
            AgentOrchestrator::new(stub.clone(), ModelConfig::default()),
            None,
        );
        let user = Uuid::new_v4();
        store.set_user_context(
            user,
            crate::domain::agents::UserContext {
                product_catalog: vec![json!({ "sku": "ACME-LAPTOP-14" })],
                ..Default::default()
            },
        );
        store
            .add_credits(user, 20, TransactionType::Purchase, "Top-up")
            .await
            .unwrap();
        let execution = accept(&store, user, None, WorkflowType::GenerateBoq).await;

        runner.run(execution).await;

        let prompt = &stub.calls()[0].messages[1].content;
        assert!(prompt.contains("ACME-LAPTOP-14"));
    }

    #[tokio::test]
    async fn spawned_run_reaches_terminal_state() {
        let stub = StubModel::new().fallback(r#"{"response": "Hello", "suggestions": []}"#);
        let (store, runner, user) = setup(stub).await;
        let execution = accept(&store, user, None, WorkflowType::ChatAssistant).await;

        runner.spawn(execution.clone()).await.unwrap();

        let stored = store.get_execution(execution.id, user).await.unwrap().unwrap();
        assert!(stored.status.is_terminal());
        assert_eq!(stored.tokens_consumed, 2_000);
    }
}
