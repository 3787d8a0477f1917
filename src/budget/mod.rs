//! Cost ledger and budget governance.

mod governor;
mod ledger;

pub use governor::{Approval, ApprovalRequest, BudgetGovernor};
pub use ledger::{AgentSpend, BudgetAlert, BudgetWindow, CostLedgerEntry, LedgerSnapshot};
