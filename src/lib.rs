//! # Ledger Core
//!
//! A multi-tenant bookkeeping engine: companies own accounts, categories and
//! transactions, and the engine keeps account balances consistent under
//! concurrent edits, corrections after the fact, and soft deletion.
//!
//! ## Features
//!
//! - **Entity store**: company-scoped records with soft-delete lifecycles
//! - **Balance calculation**: balances derived from source transactions, with a
//!   cached book balance refreshed in the same unit as every write
//! - **Posting validation**: ordered, side-effect-free checks before every insert,
//!   edit and restore
//! - **Reporting**: lazy, calendar-aligned income/expense buckets
//! - **Reconciliation**: drift detection that quarantines the affected account
//! - **Storage abstraction**: in-memory and SQLite backends behind one trait
//!
//! ## Quick Start
//!
//! ```rust
//! use ledger_core::{AccountType, Amount, Currency, Ledger, MemoryStorage, NewAccount, UserId};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! # let runtime = tokio::runtime::Builder::new_current_thread().build()?;
//! # runtime.block_on(async {
//! let ledger = Ledger::new(MemoryStorage::new());
//! let owner = UserId::new("user-1");
//! let company = ledger.create_company(&owner, "Acme").await?;
//! let checking = ledger
//!     .create_account(
//!         company.id,
//!         NewAccount {
//!             name: "Checking".to_string(),
//!             account_type: AccountType::Asset,
//!             opening_balance: Amount::from_minor(10_000),
//!             currency: Currency::new("USD")?,
//!         },
//!     )
//!     .await?;
//! let balance = ledger.get_account_balance(company.id, checking.id, None).await?;
//! assert_eq!(balance, Amount::from_minor(10_000));
//! # Ok::<(), ledger_core::LedgerError>(())
//! # })?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod ledger;
pub mod money;
pub mod reconciliation;
pub mod reports;
pub mod storage;
pub mod telemetry;
pub mod traits;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use config::*;
pub use ledger::*;
pub use money::*;
pub use reconciliation::*;
pub use reports::*;
pub use storage::*;
pub use traits::*;
pub use types::*;
pub use utils::*;
