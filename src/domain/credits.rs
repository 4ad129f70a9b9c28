use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::agents::AgentKind;
use super::workflow::WorkflowType;

/// Credit balance for a user
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreditBalance {
    pub user_id: Uuid,
    pub balance: i64,
    pub total_purchased: i64,
    pub total_used: i64,
    pub last_updated: DateTime<Utc>,
}

impl CreditBalance {
    pub fn empty(user_id: Uuid) -> Self {
        Self {
            user_id,
            balance: 0,
            total_purchased: 0,
            total_used: 0,
            last_updated: Utc::now(),
        }
    }
}

/// Credit transaction type
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Purchase,
    Usage,
    Refund,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Purchase => "purchase",
            Self::Usage => "usage",
            Self::Refund => "refund",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "purchase" => Self::Purchase,
            "refund" => Self::Refund,
            _ => Self::Usage,
        }
    }
}

/// Ledger entry; `amount` is negative for usage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditTransaction {
    pub id: Uuid,
    pub user_id: Uuid,
    pub amount: i64,
    #[serde(rename = "type")]
    pub kind: TransactionType,
    pub description: String,
    pub balance_after: i64,
    pub created_at: DateTime<Utc>,
}

/// Purchasable credit bundle, price in rupees
#[derive(Debug, Clone, Serialize)]
pub struct CreditPackage {
    pub credits: i64,
    pub price: i64,
    pub bonus: i64,
}

/// Published pricing for agent workflows
#[derive(Debug, Clone, Serialize)]
pub struct CreditPricing {
    pub packages: Vec<CreditPackage>,
    pub usage_costs: BTreeMap<&'static str, i64>,
}

impl CreditPricing {
    pub fn current() -> Self {
        let packages = vec![
            CreditPackage { credits: 100, price: 499, bonus: 0 },
            CreditPackage { credits: 500, price: 2199, bonus: 50 },
            CreditPackage { credits: 1000, price: 3999, bonus: 150 },
            CreditPackage { credits: 5000, price: 17999, bonus: 1000 },
        ];

        let mut usage_costs: BTreeMap<&'static str, i64> = [
            (AgentKind::TenderDiscovery, 10),
            (AgentKind::DocumentParser, 15),
            (AgentKind::BoqGenerator, 20),
            (AgentKind::DocumentAssembly, 10),
        ]
        .into_iter()
        .map(|(agent, cost)| (agent.as_str(), cost))
        .collect();

        for workflow in WorkflowType::ALL {
            usage_costs.insert(workflow.as_str(), workflow.credit_cost());
        }

        Self {
            packages,
            usage_costs,
        }
    }
}

/// Estimated provider tokens per executed agent.
pub const TOKENS_PER_AGENT: i64 = 2_000;

/// Monthly AI usage of a tenant
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TenantUsage {
    pub tenant_id: Uuid,
    /// `YYYY-MM`
    pub month: String,
    pub ai_credits_used: i64,
    pub ai_tokens_consumed: i64,
    pub cost_incurred: Decimal,
    pub updated_at: DateTime<Utc>,
}

impl TenantUsage {
    /// Provider cost of `tokens`, 0.00002 per token.
    pub fn cost_for_tokens(tokens: i64) -> Decimal {
        Decimal::new(2, 5) * Decimal::from(tokens)
    }

    pub fn month_of(at: DateTime<Utc>) -> String {
        at.format("%Y-%m").to_string()
    }
}

/// Transaction history response
#[derive(Debug, Serialize)]
pub struct TransactionsResponse {
    pub transactions: Vec<CreditTransaction>,
}
