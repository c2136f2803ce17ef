//! Ledger module: entity managers, balance derivation, posting rules and the
//! `Ledger` facade

pub mod account;
pub mod balance;
pub mod category;
pub mod company;
pub mod core;
pub mod posting;
pub mod transaction;

pub use account::*;
pub use balance::*;
pub use category::*;
pub use company::*;
pub use core::*;
pub use posting::*;
pub use transaction::*;
