use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::{AgentStore, StoreError, CONTEXT_PRODUCT_LIMIT, CONTEXT_TENDER_LIMIT};
use crate::domain::agents::{AgentKind, LogEntry, UserContext};
use crate::domain::credits::{CreditBalance, CreditTransaction, TenantUsage, TransactionType};
use crate::domain::workflow::{AgentExecution, ExecutionOutcome, ExecutionStatus, TimelineEntry};

/// Postgres-backed store.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run database migrations")?;
        Ok(())
    }

    async fn ensure_balance_row(&self, user_id: Uuid) -> Result<()> {
        sqlx::query("INSERT INTO credit_balances (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .context("Failed to create credit balance")?;
        Ok(())
    }
}

#[derive(FromRow)]
struct BalanceRow {
    user_id: Uuid,
    balance: i64,
    total_purchased: i64,
    total_used: i64,
    last_updated: DateTime<Utc>,
}

impl From<BalanceRow> for CreditBalance {
    fn from(row: BalanceRow) -> Self {
        Self {
            user_id: row.user_id,
            balance: row.balance,
            total_purchased: row.total_purchased,
            total_used: row.total_used,
            last_updated: row.last_updated,
        }
    }
}

#[derive(FromRow)]
struct TransactionRow {
    id: Uuid,
    user_id: Uuid,
    amount: i64,
    kind: String,
    description: String,
    balance_after: i64,
    created_at: DateTime<Utc>,
}

impl From<TransactionRow> for CreditTransaction {
    fn from(row: TransactionRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            amount: row.amount,
            kind: TransactionType::from_str(&row.kind),
            description: row.description,
            balance_after: row.balance_after,
            created_at: row.created_at,
        }
    }
}

#[derive(FromRow)]
struct ExecutionRow {
    id: Uuid,
    user_id: Uuid,
    tenant_id: Option<Uuid>,
    workflow_type: String,
    status: String,
    input_data: Value,
    results: Option<Value>,
    agents_executed: Json<Vec<AgentKind>>,
    timeline: Json<Vec<TimelineEntry>>,
    workflow_log: Json<Vec<LogEntry>>,
    credits_used: i64,
    tokens_consumed: i64,
    error: Option<String>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<ExecutionRow> for AgentExecution {
    type Error = anyhow::Error;

    fn try_from(row: ExecutionRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            user_id: row.user_id,
            tenant_id: row.tenant_id,
            workflow_type: row.workflow_type.parse().map_err(anyhow::Error::msg)?,
            status: ExecutionStatus::from_str(&row.status),
            input_data: row.input_data,
            results: row.results,
            agents_executed: row.agents_executed.0,
            timeline: row.timeline.0,
            workflow_log: row.workflow_log.0,
            credits_used: row.credits_used,
            tokens_consumed: row.tokens_consumed,
            error: row.error,
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
        })
    }
}

#[derive(FromRow)]
struct UsageRow {
    tenant_id: Uuid,
    month: String,
    ai_credits_used: i64,
    ai_tokens_consumed: i64,
    cost_incurred: Decimal,
    updated_at: DateTime<Utc>,
}

const BALANCE_COLUMNS: &str = "user_id, balance, total_purchased, total_used, last_updated";
const EXECUTION_COLUMNS: &str = "id, user_id, tenant_id, workflow_type, status, input_data, results, \
     agents_executed, timeline, workflow_log, credits_used, tokens_consumed, error, created_at, \
     started_at, completed_at";

#[async_trait]
impl AgentStore for PgStore {
    async fn deduct_credits(
        &self,
        user_id: Uuid,
        cost: i64,
        description: &str,
    ) -> Result<CreditBalance, StoreError> {
        self.ensure_balance_row(user_id).await?;

        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        // Conditional update keeps concurrent deductions from overdrawing
        let updated = sqlx::query_as::<_, BalanceRow>(&format!(
            "UPDATE credit_balances \
             SET balance = balance - $2, total_used = total_used + $2, last_updated = NOW() \
             WHERE user_id = $1 AND balance >= $2 \
             RETURNING {BALANCE_COLUMNS}"
        ))
        .bind(user_id)
        .bind(cost)
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to deduct credits")?;

        let Some(updated) = updated else {
            let available: i64 =
                sqlx::query_scalar("SELECT balance FROM credit_balances WHERE user_id = $1")
                    .bind(user_id)
                    .fetch_one(&mut *tx)
                    .await
                    .context("Failed to read credit balance")?;
            return Err(StoreError::InsufficientCredits {
                needed: cost,
                available,
            });
        };

        sqlx::query(
            "INSERT INTO credit_transactions (id, user_id, amount, kind, description, balance_after) \
             VALUES ($1, $2, $3, 'usage', $4, $5)",
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(-cost)
        .bind(description)
        .bind(updated.balance)
        .execute(&mut *tx)
        .await
        .context("Failed to record credit usage")?;

        tx.commit().await.context("Failed to commit credit deduction")?;
        Ok(updated.into())
    }

    async fn add_credits(
        &self,
        user_id: Uuid,
        amount: i64,
        kind: TransactionType,
        description: &str,
    ) -> Result<CreditBalance> {
        self.ensure_balance_row(user_id).await?;

        let (purchased, used) = match kind {
            TransactionType::Purchase => (amount, 0),
            TransactionType::Refund => (0, -amount),
            TransactionType::Usage => (0, 0),
        };

        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        let updated = sqlx::query_as::<_, BalanceRow>(&format!(
            "UPDATE credit_balances \
             SET balance = balance + $2, total_purchased = total_purchased + $3, \
                 total_used = total_used + $4, last_updated = NOW() \
             WHERE user_id = $1 \
             RETURNING {BALANCE_COLUMNS}"
        ))
        .bind(user_id)
        .bind(amount)
        .bind(purchased)
        .bind(used)
        .fetch_one(&mut *tx)
        .await
        .context("Failed to add credits")?;

        sqlx::query(
            "INSERT INTO credit_transactions (id, user_id, amount, kind, description, balance_after) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(amount)
        .bind(kind.as_str())
        .bind(description)
        .bind(updated.balance)
        .execute(&mut *tx)
        .await
        .context("Failed to record credit transaction")?;

        tx.commit().await.context("Failed to commit credit transaction")?;
        Ok(updated.into())
    }

    async fn balance(&self, user_id: Uuid) -> Result<CreditBalance> {
        self.ensure_balance_row(user_id).await?;

        let row = sqlx::query_as::<_, BalanceRow>(&format!(
            "SELECT {BALANCE_COLUMNS} FROM credit_balances WHERE user_id = $1"
        ))
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .context("Failed to fetch credit balance")?;

        Ok(row.into())
    }

    async fn transactions(&self, user_id: Uuid, limit: i64) -> Result<Vec<CreditTransaction>> {
        let rows = sqlx::query_as::<_, TransactionRow>(
            "SELECT id, user_id, amount, kind, description, balance_after, created_at \
             FROM credit_transactions WHERE user_id = $1 \
             ORDER BY created_at DESC LIMIT $2",
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch credit transactions")?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn insert_execution(&self, execution: &AgentExecution) -> Result<()> {
        sqlx::query(
            "INSERT INTO agent_executions \
             (id, user_id, tenant_id, workflow_type, status, input_data, credits_used, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(execution.id)
        .bind(execution.user_id)
        .bind(execution.tenant_id)
        .bind(execution.workflow_type.as_str())
        .bind(execution.status.as_str())
        .bind(&execution.input_data)
        .bind(execution.credits_used)
        .bind(execution.created_at)
        .execute(&self.pool)
        .await
        .context("Failed to insert execution")?;
        Ok(())
    }

    async fn mark_running(&self, execution_id: Uuid) -> Result<()> {
        sqlx::query("UPDATE agent_executions SET status = 'running', started_at = NOW() WHERE id = $1")
            .bind(execution_id)
            .execute(&self.pool)
            .await
            .context("Failed to mark execution running")?;
        Ok(())
    }

    async fn finish_execution(&self, execution_id: Uuid, outcome: &ExecutionOutcome) -> Result<()> {
        sqlx::query(
            "UPDATE agent_executions SET \
             status = $2, results = $3, agents_executed = $4, timeline = $5, workflow_log = $6, \
             credits_used = $7, tokens_consumed = $8, error = $9, completed_at = NOW() \
             WHERE id = $1",
        )
        .bind(execution_id)
        .bind(outcome.status.as_str())
        .bind(&outcome.results)
        .bind(Json(&outcome.agents_executed))
        .bind(Json(&outcome.timeline))
        .bind(Json(&outcome.workflow_log))
        .bind(outcome.credits_used)
        .bind(outcome.tokens_consumed)
        .bind(&outcome.error)
        .execute(&self.pool)
        .await
        .context("Failed to finish execution")?;
        Ok(())
    }

    async fn get_execution(&self, execution_id: Uuid, user_id: Uuid) -> Result<Option<AgentExecution>> {
        let row = sqlx::query_as::<_, ExecutionRow>(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM agent_executions WHERE id = $1 AND user_id = $2"
        ))
        .bind(execution_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch execution")?;

        row.map(AgentExecution::try_from).transpose()
    }

    async fn list_executions(&self, user_id: Uuid, limit: i64) -> Result<Vec<AgentExecution>> {
        let rows = sqlx::query_as::<_, ExecutionRow>(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM agent_executions WHERE user_id = $1 \
             ORDER BY created_at DESC LIMIT $2"
        ))
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list executions")?;

        rows.into_iter().map(AgentExecution::try_from).collect()
    }

    async fn active_tenant(&self, user_id: Uuid) -> Result<Option<Uuid>> {
        let tenant: Option<Uuid> = sqlx::query_scalar(
            "SELECT tenant_id FROM tenant_members WHERE user_id = $1 AND is_active LIMIT 1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to look up tenant membership")?;
        Ok(tenant)
    }

    async fn record_tenant_usage(
        &self,
        tenant_id: Uuid,
        month: &str,
        credits: i64,
        tokens: i64,
        cost: Decimal,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO tenant_usage (tenant_id, month, ai_credits_used, ai_tokens_consumed, cost_incurred) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (tenant_id, month) DO UPDATE SET \
                 ai_credits_used = tenant_usage.ai_credits_used + EXCLUDED.ai_credits_used, \
                 ai_tokens_consumed = tenant_usage.ai_tokens_consumed + EXCLUDED.ai_tokens_consumed, \
                 cost_incurred = tenant_usage.cost_incurred + EXCLUDED.cost_incurred, \
                 updated_at = NOW()",
        )
        .bind(tenant_id)
        .bind(month)
        .bind(credits)
        .bind(tokens)
        .bind(cost)
        .execute(&self.pool)
        .await
        .context("Failed to record tenant usage")?;
        Ok(())
    }

    async fn tenant_usage(&self, tenant_id: Uuid, month: &str) -> Result<Option<TenantUsage>> {
        let row = sqlx::query_as::<_, UsageRow>(
            "SELECT tenant_id, month, ai_credits_used, ai_tokens_consumed, cost_incurred, updated_at \
             FROM tenant_usage WHERE tenant_id = $1 AND month = $2",
        )
        .bind(tenant_id)
        .bind(month)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch tenant usage")?;

        Ok(row.map(|r| TenantUsage {
            tenant_id: r.tenant_id,
            month: r.month,
            ai_credits_used: r.ai_credits_used,
            ai_tokens_consumed: r.ai_tokens_consumed,
            cost_incurred: r.cost_incurred,
            updated_at: r.updated_at,
        }))
    }

    async fn user_context(&self, user_id: Uuid) -> Result<UserContext> {
        let (company_profile, product_catalog, existing_tenders_db, vendors) = tokio::try_join!(
            sqlx::query_scalar::<_, Value>("SELECT profile FROM companies WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool),
            sqlx::query_scalar::<_, Value>(
                "SELECT data FROM products WHERE user_id = $1 AND is_active \
                 ORDER BY created_at DESC LIMIT $2",
            )
            .bind(user_id)
            .bind(CONTEXT_PRODUCT_LIMIT)
            .fetch_all(&self.pool),
            sqlx::query_scalar::<_, Value>(
                "SELECT data FROM tenders WHERE user_id = $1 ORDER BY created_at DESC LIMIT $2",
            )
            .bind(user_id)
            .bind(CONTEXT_TENDER_LIMIT)
            .fetch_all(&self.pool),
            sqlx::query_scalar::<_, Value>("SELECT data FROM vendors WHERE user_id = $1")
                .bind(user_id)
                .fetch_all(&self.pool),
        )
        .context("Failed to load user context")?;

        Ok(UserContext {
            company_profile,
            product_catalog,
            existing_tenders_db,
            vendors,
        })
    }

    async fn health_check(&self) -> bool {
        crate::db::health_check(&self.pool).await
    }
}
