//! Credit balance endpoints

use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::credits::OwnerRef;
use crate::error::{Error, Result};
use crate::server::state::AppState;

#[derive(Debug, Deserialize)]
pub struct BalanceQuery {
    pub owner: String,
}

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub owner: String,
    pub balance: i64,
}

/// GET /credits?owner= - Current balance
pub async fn balance(
    State(state): State<AppState>,
    Query(query): Query<BalanceQuery>,
) -> Result<Json<BalanceResponse>> {
    let owner = OwnerRef::new(query.owner);
    let balance = state.ledger().balance(&owner);
    Ok(Json(BalanceResponse {
        owner: owner.0,
        balance,
    }))
}

#[derive(Debug, Deserialize)]
pub struct DepositRequest {
    pub owner: String,
    pub amount: i64,
    #[serde(default)]
    pub reason: Option<String>,
}

/// POST /credits/deposit - Add credits to an owner's balance
pub async fn deposit(
    State(state): State<AppState>,
    Json(req): Json<DepositRequest>,
) -> Result<Json<BalanceResponse>> {
    if req.amount <= 0 {
        return Err(Error::validation("Deposit amount must be positive"));
    }
    let owner = OwnerRef::new(req.owner);
    let reason = req.reason.unwrap_or_else(|| "deposit".to_string());
    state.ledger().deposit(&owner, req.amount, &reason);
    let balance = state.ledger().balance(&owner);
    Ok(Json(BalanceResponse {
        owner: owner.0,
        balance,
    }))
}
