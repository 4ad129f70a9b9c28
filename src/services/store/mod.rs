//! Persistence for credits, executions, tenant usage and user context.
//!
//! [`PgStore`] backs production; [`MemoryStore`] is used when no database
//! is configured and in tests.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::agents::UserContext;
use crate::domain::credits::{CreditBalance, CreditTransaction, TenantUsage, TransactionType};
use crate::domain::workflow::{AgentExecution, ExecutionOutcome};

/// Executions returned by [`AgentStore::list_executions`].
pub const EXECUTION_HISTORY_LIMIT: i64 = 50;
/// Transactions returned by [`AgentStore::transactions`].
pub const TRANSACTION_HISTORY_LIMIT: i64 = 100;
/// Active catalogue products loaded into the user context.
pub const CONTEXT_PRODUCT_LIMIT: i64 = 100;
/// Stored tenders loaded into the user context.
pub const CONTEXT_TENDER_LIMIT: i64 = 50;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Insufficient credits. Need {needed} credits for this workflow.")]
    InsufficientCredits { needed: i64, available: i64 },

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

#[async_trait]
pub trait AgentStore: Send + Sync {
    /// Atomically take `cost` credits and record a usage transaction.
    ///
    /// A user without a balance row gets an empty one and the deduction
    /// fails.
    async fn deduct_credits(
        &self,
        user_id: Uuid,
        cost: i64,
        description: &str,
    ) -> Result<CreditBalance, StoreError>;

    /// Add credits for a purchase or refund.
    async fn add_credits(
        &self,
        user_id: Uuid,
        amount: i64,
        kind: TransactionType,
        description: &str,
    ) -> anyhow::Result<CreditBalance>;

    /// Current balance, creating an empty one on first access.
    async fn balance(&self, user_id: Uuid) -> anyhow::Result<CreditBalance>;

    /// Most recent transactions first.
    async fn transactions(&self, user_id: Uuid, limit: i64) -> anyhow::Result<Vec<CreditTransaction>>;

    async fn insert_execution(&self, execution: &AgentExecution) -> anyhow::Result<()>;

    async fn mark_running(&self, execution_id: Uuid) -> anyhow::Result<()>;

    async fn finish_execution(&self, execution_id: Uuid, outcome: &ExecutionOutcome) -> anyhow::Result<()>;

    /// The execution if it exists and belongs to `user_id`.
    async fn get_execution(&self, execution_id: Uuid, user_id: Uuid) -> anyhow::Result<Option<AgentExecution>>;

    /// Most recent executions first.
    async fn list_executions(&self, user_id: Uuid, limit: i64) -> anyhow::Result<Vec<AgentExecution>>;

    /// Tenant of the user's active membership, if any.
    async fn active_tenant(&self, user_id: Uuid) -> anyhow::Result<Option<Uuid>>;

    /// Add to the tenant's usage for `month`, creating the row if needed.
    async fn record_tenant_usage(
        &self,
        tenant_id: Uuid,
        month: &str,
        credits: i64,
        tokens: i64,
        cost: Decimal,
    ) -> anyhow::Result<()>;

    async fn tenant_usage(&self, tenant_id: Uuid, month: &str) -> anyhow::Result<Option<TenantUsage>>;

    /// Company profile, catalogue, stored tenders and vendors of a user.
    async fn user_context(&self, user_id: Uuid) -> anyhow::Result<UserContext>;

    async fn health_check(&self) -> bool;
}
