use axum::{extract::State, Json};
use std::sync::Arc;

use crate::app::AppState;
use crate::auth::RequireAuth;
use crate::domain::credits::{CreditBalance, TransactionsResponse};
use crate::error::ApiResult;
use crate::services::store::TRANSACTION_HISTORY_LIMIT;

/// Current balance, created empty on first access
pub async fn get_balance(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
) -> ApiResult<Json<CreditBalance>> {
    let balance = state.store.balance(auth.user_id).await?;
    Ok(Json(balance))
}

/// Most recent credit transactions
pub async fn list_transactions(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
) -> ApiResult<Json<TransactionsResponse>> {
    let transactions = state
        .store
        .transactions(auth.user_id, TRANSACTION_HISTORY_LIMIT)
        .await?;

    Ok(Json(TransactionsResponse { transactions }))
}

#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use serde_json::Value;
    use tower::ServiceExt;
    use uuid::Uuid;

    use crate::app::testing::TestApp;
    use crate::domain::credits::TransactionType;
    use crate::services::store::AgentStore;
    use crate::test_support::StubModel;

    #[tokio::test]
    async fn transactions_are_newest_first() {
        let app = TestApp::new(StubModel::new());
        let user = Uuid::new_v4();
        app.store
            .add_credits(user, 100, TransactionType::Purchase, "Starter pack")
            .await
            .unwrap();
        app.store
            .deduct_credits(user, 15, "AI Agent Execution: rfq_only")
            .await
            .unwrap();

        let req = Request::get("/api/credits/transactions")
            .header(header::AUTHORIZATION, app.bearer(user))
            .body(Body::empty())
            .unwrap();
        let response = app.router.clone().oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        let txs = body["transactions"].as_array().unwrap();
        assert_eq!(txs.len(), 2);
        assert_eq!(txs[0]["type"], "usage");
        assert_eq!(txs[0]["amount"], -15);
        assert_eq!(txs[0]["balance_after"], 85);
        assert_eq!(txs[1]["type"], "purchase");
    }
}
