use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::HashMap;
use uuid::Uuid;

use super::{AgentStore, StoreError};
use crate::domain::agents::UserContext;
use crate::domain::credits::{CreditBalance, CreditTransaction, TenantUsage, TransactionType};
use crate::domain::workflow::{AgentExecution, ExecutionOutcome, ExecutionStatus};

#[derive(Default)]
struct Inner {
    balances: HashMap<Uuid, CreditBalance>,
    transactions: Vec<CreditTransaction>,
    executions: HashMap<Uuid, AgentExecution>,
    memberships: HashMap<Uuid, Uuid>,
    usage: HashMap<(Uuid, String), TenantUsage>,
    contexts: HashMap<Uuid, UserContext>,
    context_offline: bool,
    refunds_offline: bool,
    inserts_offline: bool,
}

impl Inner {
    fn push_transaction(
        &mut self,
        user_id: Uuid,
        amount: i64,
        kind: TransactionType,
        description: &str,
        balance_after: i64,
    ) {
        self.transactions.push(CreditTransaction {
            id: Uuid::new_v4(),
            user_id,
            amount,
            kind,
            description: description.to_string(),
            balance_after,
            created_at: Utc::now(),
        });
    }
}

/// Process-local store; all state lives behind a single lock.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an active tenant membership.
    #[cfg(test)]
    pub fn add_tenant_member(&self, user_id: Uuid, tenant_id: Uuid) {
        self.inner.lock().memberships.insert(user_id, tenant_id);
    }

    #[cfg(test)]
    pub fn set_user_context(&self, user_id: Uuid, ctx: UserContext) {
        self.inner.lock().contexts.insert(user_id, ctx);
    }

    /// Make every user context load fail.
    #[cfg(test)]
    pub fn take_context_offline(&self) {
        self.inner.lock().context_offline = true;
    }

    /// Make every refund fail.
    #[cfg(test)]
    pub fn take_refunds_offline(&self) {
        self.inner.lock().refunds_offline = true;
    }

    /// Make every execution insert fail.
    #[cfg(test)]
    pub fn take_inserts_offline(&self) {
        self.inner.lock().inserts_offline = true;
    }
}

#[async_trait]
impl AgentStore for MemoryStore {
    async fn deduct_credits(
        &self,
        user_id: Uuid,
        cost: i64,
        description: &str,
    ) -> Result<CreditBalance, StoreError> {
        let mut inner = self.inner.lock();
        let balance = inner
            .balances
            .entry(user_id)
            .or_insert_with(|| CreditBalance::empty(user_id));

        if balance.balance < cost {
            return Err(StoreError::InsufficientCredits {
                needed: cost,
                available: balance.balance,
            });
        }

        balance.balance -= cost;
        balance.total_used += cost;
        balance.last_updated = Utc::now();
        let updated = balance.clone();

        inner.push_transaction(user_id, -cost, TransactionType::Usage, description, updated.balance);
        Ok(updated)
    }

    async fn add_credits(
        &self,
        user_id: Uuid,
        amount: i64,
        kind: TransactionType,
        description: &str,
    ) -> anyhow::Result<CreditBalance> {
        let mut inner = self.inner.lock();
        if kind == TransactionType::Refund && inner.refunds_offline {
            anyhow::bail!("credit ledger offline");
        }
        let balance = inner
            .balances
            .entry(user_id)
            .or_insert_with(|| CreditBalance::empty(user_id));

        balance.balance += amount;
        match kind {
            TransactionType::Purchase => balance.total_purchased += amount,
            TransactionType::Refund => balance.total_used -= amount,
            TransactionType::Usage => {}
        }
        balance.last_updated = Utc::now();
        let updated = balance.clone();

        inner.push_transaction(user_id, amount, kind, description, updated.balance);
        Ok(updated)
    }

    async fn balance(&self, user_id: Uuid) -> anyhow::Result<CreditBalance> {
        let mut inner = self.inner.lock();
        Ok(inner
            .balances
            .entry(user_id)
            .or_insert_with(|| CreditBalance::empty(user_id))
            .clone())
    }

    async fn transactions(&self, user_id: Uuid, limit: i64) -> anyhow::Result<Vec<CreditTransaction>> {
        let inner = self.inner.lock();
        Ok(inner
            .transactions
            .iter()
            .rev()
            .filter(|t| t.user_id == user_id)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn insert_execution(&self, execution: &AgentExecution) -> anyhow::Result<()> {
        let mut inner = self.inner.lock();
        if inner.inserts_offline {
            anyhow::bail!("execution table offline");
        }
        inner.executions.insert(execution.id, execution.clone());
        Ok(())
    }

    async fn mark_running(&self, execution_id: Uuid) -> anyhow::Result<()> {
        if let Some(execution) = self.inner.lock().executions.get_mut(&execution_id) {
            execution.status = ExecutionStatus::Running;
            execution.started_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn finish_execution(&self, execution_id: Uuid, outcome: &ExecutionOutcome) -> anyhow::Result<()> {
        if let Some(execution) = self.inner.lock().executions.get_mut(&execution_id) {
            execution.status = outcome.status;
            execution.results = outcome.results.clone();
            execution.agents_executed = outcome.agents_executed.clone();
            execution.timeline = outcome.timeline.clone();
            execution.workflow_log = outcome.workflow_log.clone();
            execution.credits_used = outcome.credits_used;
            execution.tokens_consumed = outcome.tokens_consumed;
            execution.error = outcome.error.clone();
            execution.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn get_execution(&self, execution_id: Uuid, user_id: Uuid) -> anyhow::Result<Option<AgentExecution>> {
        Ok(self
            .inner
            .lock()
            .executions
            .get(&execution_id)
            .filter(|e| e.user_id == user_id)
            .cloned())
    }

    async fn list_executions(&self, user_id: Uuid, limit: i64) -> anyhow::Result<Vec<AgentExecution>> {
        let inner = self.inner.lock();
        let mut executions: Vec<AgentExecution> = inner
            .executions
            .values()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect();
        executions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        executions.truncate(limit.max(0) as usize);
        Ok(executions)
    }

    async fn active_tenant(&self, user_id: Uuid) -> anyhow::Result<Option<Uuid>> {
        Ok(self.inner.lock().memberships.get(&user_id).copied())
    }

    async fn record_tenant_usage(
        &self,
        tenant_id: Uuid,
        month: &str,
        credits: i64,
        tokens: i64,
        cost: Decimal,
    ) -> anyhow::Result<()> {
        let mut inner = self.inner.lock();
        let usage = inner
            .usage
            .entry((tenant_id, month.to_string()))
            .or_insert_with(|| TenantUsage {
                tenant_id,
                month: month.to_string(),
                ai_credits_used: 0,
                ai_tokens_consumed: 0,
                cost_incurred: Decimal::ZERO,
                updated_at: Utc::now(),
            });
        usage.ai_credits_used += credits;
        usage.ai_tokens_consumed += tokens;
        usage.cost_incurred += cost;
        usage.updated_at = Utc::now();
        Ok(())
    }

    async fn tenant_usage(&self, tenant_id: Uuid, month: &str) -> anyhow::Result<Option<TenantUsage>> {
        Ok(self
            .inner
            .lock()
            .usage
            .get(&(tenant_id, month.to_string()))
            .cloned())
    }

    async fn user_context(&self, user_id: Uuid) -> anyhow::Result<UserContext> {
        let inner = self.inner.lock();
        if inner.context_offline {
            anyhow::bail!("context store offline");
        }
        Ok(inner
            .contexts
            .get(&user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn health_check(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::workflow::WorkflowType;
    use serde_json::json;

    #[tokio::test]
    async fn deduction_without_balance_creates_empty_row_and_fails() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();

        let err = store.deduct_credits(user, 20, "AI Agent Execution: generate_boq").await.unwrap_err();

        assert!(matches!(err, StoreError::InsufficientCredits { needed: 20, available: 0 }));
        assert_eq!(store.balance(user).await.unwrap().balance, 0);
        assert!(store.transactions(user, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn deduction_updates_balance_and_ledger() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        store.add_credits(user, 100, TransactionType::Purchase, "Starter pack").await.unwrap();

        let balance = store.deduct_credits(user, 55, "AI Agent Execution: discover_and_bid").await.unwrap();

        assert_eq!(balance.balance, 45);
        assert_eq!(balance.total_used, 55);
        assert_eq!(balance.total_purchased, 100);

        let txs = store.transactions(user, 10).await.unwrap();
        assert_eq!(txs.len(), 2);
        assert_eq!(txs[0].amount, -55);
        assert_eq!(txs[0].kind, TransactionType::Usage);
        assert_eq!(txs[0].balance_after, 45);
    }

    #[tokio::test]
    async fn insufficient_balance_is_untouched() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        store.add_credits(user, 10, TransactionType::Purchase, "Top-up").await.unwrap();

        let err = store.deduct_credits(user, 15, "x").await.unwrap_err();

        assert_eq!(err.to_string(), "Insufficient credits. Need 15 credits for this workflow.");
        assert_eq!(store.balance(user).await.unwrap().balance, 10);
    }

    #[tokio::test]
    async fn refund_reverses_usage() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        store.add_credits(user, 50, TransactionType::Purchase, "Top-up").await.unwrap();
        store.deduct_credits(user, 20, "run").await.unwrap();

        let balance = store.add_credits(user, 20, TransactionType::Refund, "refund").await.unwrap();

        assert_eq!(balance.balance, 50);
        assert_eq!(balance.total_used, 0);
    }

    #[tokio::test]
    async fn executions_are_scoped_to_owner() {
        let store = MemoryStore::new();
        let owner = Uuid::new_v4();
        let execution = AgentExecution::pending(owner, None, WorkflowType::GenerateBoq, json!({}));
        store.insert_execution(&execution).await.unwrap();

        assert!(store.get_execution(execution.id, owner).await.unwrap().is_some());
        assert!(store.get_execution(execution.id, Uuid::new_v4()).await.unwrap().is_none());
        assert_eq!(store.list_executions(owner, 50).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn tenant_usage_accumulates() {
        let store = MemoryStore::new();
        let tenant = Uuid::new_v4();

        store
            .record_tenant_usage(tenant, "2025-03", 20, 2000, TenantUsage::cost_for_tokens(2000))
            .await
            .unwrap();
        store
            .record_tenant_usage(tenant, "2025-03", 15, 2000, TenantUsage::cost_for_tokens(2000))
            .await
            .unwrap();

        let usage = store.tenant_usage(tenant, "2025-03").await.unwrap().unwrap();
        assert_eq!(usage.ai_credits_used, 35);
        assert_eq!(usage.ai_tokens_consumed, 4000);
        assert_eq!(usage.cost_incurred, Decimal::new(8, 2));
    }
}
