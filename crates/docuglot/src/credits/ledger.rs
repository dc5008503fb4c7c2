//! Owner-scoped credit ledger with atomic reservations
//!
//! The balance for an owner is the running sum of its ledger entries. A
//! reservation writes a negative entry; it is later consumed by `finalize`
//! (entry stands) or compensated by `refund` (one positive entry, at most once
//! per job). Reservations for the same owner are serialized behind a per-owner
//! lock so two concurrent reserves can never both succeed on one cost's worth
//! of balance.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Opaque owner reference: a user id or an anonymous session id
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerRef(pub String);

impl OwnerRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OwnerRef {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// One signed movement on an owner's balance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditLedgerEntry {
    pub owner: OwnerRef,
    pub delta: i64,
    pub reason: String,
    pub job_id: Option<Uuid>,
    pub timestamp: DateTime<Utc>,
}

/// Lifecycle of a held reservation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReservationState {
    Held,
    Finalized,
    Refunded,
}

#[derive(Debug)]
struct Reservation {
    owner: OwnerRef,
    amount: i64,
    state: ReservationState,
}

#[derive(Debug, Default)]
struct Account {
    balance: i64,
    entries: Vec<CreditLedgerEntry>,
}

impl Account {
    fn push(&mut self, entry: CreditLedgerEntry) {
        self.balance += entry.delta;
        self.entries.push(entry);
    }
}

/// Credit ledger shared across the pipeline
pub struct CreditLedger {
    accounts: DashMap<OwnerRef, Arc<Mutex<Account>>>,
    reservations: DashMap<Uuid, Reservation>,
}

impl CreditLedger {
    pub fn new() -> Self {
        Self {
            accounts: DashMap::new(),
            reservations: DashMap::new(),
        }
    }

    fn account(&self, owner: &OwnerRef) -> Arc<Mutex<Account>> {
        self.accounts
            .entry(owner.clone())
            .or_insert_with(|| Arc::new(Mutex::new(Account::default())))
            .clone()
    }

    /// Current balance for an owner
    pub fn balance(&self, owner: &OwnerRef) -> i64 {
        self.accounts
            .get(owner)
            .map(|a| a.lock().balance)
            .unwrap_or(0)
    }

    /// Ledger history for an owner, oldest first
    pub fn history(&self, owner: &OwnerRef) -> Vec<CreditLedgerEntry> {
        self.accounts
            .get(owner)
            .map(|a| a.lock().entries.clone())
            .unwrap_or_default()
    }

    /// Credit an owner (payment webhook hook, admin grants)
    pub fn deposit(&self, owner: &OwnerRef, amount: i64, reason: impl Into<String>) -> i64 {
        let account = self.account(owner);
        let mut account = account.lock();
        account.push(CreditLedgerEntry {
            owner: owner.clone(),
            delta: amount,
            reason: reason.into(),
            job_id: None,
            timestamp: Utc::now(),
        });
        account.balance
    }

    /// Atomically reserve `amount` credits against an owner's balance.
    ///
    /// The check-and-decrement holds the owner's account lock, so concurrent
    /// reservations for the same owner are serialized.
    pub fn reserve(&self, owner: &OwnerRef, job_id: Uuid, amount: i64) -> Result<()> {
        if amount <= 0 {
            return Err(Error::validation("Reservation amount must be positive"));
        }
        if self.reservations.contains_key(&job_id) {
            return Err(Error::internal(format!(
                "Reservation already exists for job {}",
                job_id
            )));
        }

        let account = self.account(owner);
        let mut account = account.lock();
        if account.balance < amount {
            return Err(Error::InsufficientCredits {
                required: amount,
                available: account.balance,
            });
        }

        account.push(CreditLedgerEntry {
            owner: owner.clone(),
            delta: -amount,
            reason: format!("reserved:{}", job_id),
            job_id: Some(job_id),
            timestamp: Utc::now(),
        });
        self.reservations.insert(
            job_id,
            Reservation {
                owner: owner.clone(),
                amount,
                state: ReservationState::Held,
            },
        );

        tracing::debug!("Reserved {} credits for job {} ({})", amount, job_id, owner);
        Ok(())
    }

    /// Mark a reservation permanently consumed. Idempotent: a second call is a
    /// no-op; finalizing a refunded reservation is an error.
    pub fn finalize(&self, owner: &OwnerRef, job_id: Uuid) -> Result<()> {
        let mut reservation = self
            .reservations
            .get_mut(&job_id)
            .ok_or_else(|| Error::internal(format!("No reservation for job {}", job_id)))?;

        if reservation.owner != *owner {
            return Err(Error::internal(format!(
                "Reservation for job {} belongs to a different owner",
                job_id
            )));
        }

        match reservation.state {
            ReservationState::Finalized => Ok(()),
            ReservationState::Refunded => Err(Error::internal(format!(
                "Reservation for job {} was already refunded",
                job_id
            ))),
            ReservationState::Held => {
                reservation.state = ReservationState::Finalized;
                tracing::debug!("Finalized {} credits for job {}", reservation.amount, job_id);
                Ok(())
            }
        }
    }

    /// Restore the reserved credits after a failed or cancelled job. At most
    /// one refund ever applies per job, even if two failure paths both fire;
    /// repeat calls are no-ops.
    pub fn refund(&self, owner: &OwnerRef, job_id: Uuid) -> Result<()> {
        let mut reservation = self
            .reservations
            .get_mut(&job_id)
            .ok_or_else(|| Error::internal(format!("No reservation for job {}", job_id)))?;

        if reservation.owner != *owner {
            return Err(Error::internal(format!(
                "Reservation for job {} belongs to a different owner",
                job_id
            )));
        }

        match reservation.state {
            ReservationState::Refunded => Ok(()),
            ReservationState::Finalized => Err(Error::internal(format!(
                "Reservation for job {} was already finalized",
                job_id
            ))),
            ReservationState::Held => {
                // Flip state before touching the account; the dashmap entry
                // guard makes the transition exclusive.
                reservation.state = ReservationState::Refunded;
                let amount = reservation.amount;
                drop(reservation);

                let account = self.account(owner);
                let mut account = account.lock();
                account.push(CreditLedgerEntry {
                    owner: owner.clone(),
                    delta: amount,
                    reason: format!("refund:{}", job_id),
                    job_id: Some(job_id),
                    timestamp: Utc::now(),
                });
                tracing::debug!("Refunded {} credits for job {}", amount, job_id);
                Ok(())
            }
        }
    }
}

impl Default for CreditLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn owner() -> OwnerRef {
        OwnerRef::from("user-1")
    }

    #[test]
    fn test_balance_is_running_sum() {
        let ledger = CreditLedger::new();
        ledger.deposit(&owner(), 100, "stripe:checkout");
        ledger.deposit(&owner(), 50, "promo");
        assert_eq!(ledger.balance(&owner()), 150);
        assert_eq!(ledger.history(&owner()).len(), 2);
    }

    #[test]
    fn test_reserve_fails_on_insufficient_balance() {
        let ledger = CreditLedger::new();
        ledger.deposit(&owner(), 40, "topup");

        let err = ledger.reserve(&owner(), Uuid::new_v4(), 60).unwrap_err();
        assert_eq!(err.error_type(), "insufficient_credits");
        // Failed reserve leaves the balance untouched
        assert_eq!(ledger.balance(&owner()), 40);
    }

    #[test]
    fn test_refund_restores_pre_reservation_balance() {
        let ledger = CreditLedger::new();
        ledger.deposit(&owner(), 100, "topup");

        let job = Uuid::new_v4();
        ledger.reserve(&owner(), job, 60).unwrap();
        assert_eq!(ledger.balance(&owner()), 40);

        ledger.refund(&owner(), job).unwrap();
        assert_eq!(ledger.balance(&owner()), 100);
    }

    #[test]
    fn test_refund_applies_at_most_once() {
        let ledger = CreditLedger::new();
        ledger.deposit(&owner(), 100, "topup");

        let job = Uuid::new_v4();
        ledger.reserve(&owner(), job, 60).unwrap();

        // Two failure paths both firing (e.g. timeout handler + error handler)
        ledger.refund(&owner(), job).unwrap();
        ledger.refund(&owner(), job).unwrap();
        assert_eq!(ledger.balance(&owner()), 100);
    }

    #[test]
    fn test_finalize_is_idempotent_and_excludes_refund() {
        let ledger = CreditLedger::new();
        ledger.deposit(&owner(), 100, "topup");

        let job = Uuid::new_v4();
        ledger.reserve(&owner(), job, 60).unwrap();
        ledger.finalize(&owner(), job).unwrap();
        ledger.finalize(&owner(), job).unwrap();
        assert_eq!(ledger.balance(&owner()), 40);

        // Exactly one of finalize/refund may ever apply
        assert!(ledger.refund(&owner(), job).is_err());
        assert_eq!(ledger.balance(&owner()), 40);
    }

    #[test]
    fn test_concurrent_reserves_never_both_succeed() {
        let ledger = Arc::new(CreditLedger::new());
        ledger.deposit(&owner(), 60, "topup");

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                std::thread::spawn(move || ledger.reserve(&owner(), Uuid::new_v4(), 60).is_ok())
            })
            .collect();

        let successes = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();

        assert_eq!(successes, 1);
        assert_eq!(ledger.balance(&owner()), 0);
    }
}
