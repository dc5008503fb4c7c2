//! Credit ledger: owner-scoped balances with atomic reserve/finalize/refund

pub mod ledger;
pub mod pricing;

pub use ledger::{CreditLedger, CreditLedgerEntry, OwnerRef};
pub use pricing::{count_words, PricingTable};
