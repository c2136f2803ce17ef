//! Balance derivation and the materialized balance view
//!
//! The authoritative balance of an account is always derived from its rows:
//! opening balance plus every non-deleted transaction. The view keeps one
//! [`BalanceSnapshot`] per account as a cached book balance. Its contract is
//! that any unit of work writing a transaction, or changing an opening
//! balance, calls [`BalanceView::refresh`] for every account it touched before
//! the unit commits. Reconciliation compares snapshots with derived values and
//! quarantines the ones that disagree.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::money::Amount;
use crate::traits::{LedgerReader, LedgerTx};
use crate::types::*;

/// Health of a cached balance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SnapshotStatus {
    Current,
    /// Drift was detected; writes to the account stop until rebuilt
    Quarantined {
        detected_at: NaiveDateTime,
        derived: Amount,
    },
}

/// Cached book balance of one account (all non-deleted postings, any date)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    pub company_id: CompanyId,
    pub account_id: AccountId,
    pub balance: Amount,
    pub refreshed_at: NaiveDateTime,
    pub status: SnapshotStatus,
}

impl BalanceSnapshot {
    pub fn is_quarantined(&self) -> bool {
        matches!(self.status, SnapshotStatus::Quarantined { .. })
    }
}

/// Derives balances from source rows, never from a running counter
pub struct BalanceCalculator;

impl BalanceCalculator {
    /// Opening balance plus the signed sum of active transactions dated on or
    /// before `as_of` (every date when `None`)
    pub fn derive(
        account: &Account,
        transactions: &[Transaction],
        as_of: Option<NaiveDate>,
    ) -> LedgerResult<Amount> {
        let postings = transactions
            .iter()
            .filter(|t| t.account_id == account.id && t.lifecycle.is_active())
            .filter(|t| as_of.is_none_or(|date| t.date <= date))
            .map(|t| t.amount);

        account.opening_balance.try_add(Amount::try_sum(postings)?)
    }

    /// Load an account and its postings and derive its balance
    pub fn compute_balance(
        reader: &dyn LedgerReader,
        company_id: CompanyId,
        account_id: AccountId,
        as_of: Option<NaiveDate>,
    ) -> LedgerResult<Amount> {
        let account = reader
            .account(company_id, account_id)?
            .ok_or_else(|| LedgerError::not_found(EntityKind::Account, account_id))?;
        let transactions = reader.account_transactions(company_id, account_id, None, as_of)?;
        Self::derive(&account, &transactions, as_of)
    }
}

/// Refresh and quarantine rules for [`BalanceSnapshot`]s
pub struct BalanceView;

impl BalanceView {
    /// Refuse writes to an account whose snapshot is quarantined
    pub fn ensure_writable(
        reader: &dyn LedgerReader,
        company_id: CompanyId,
        account_id: AccountId,
    ) -> LedgerResult<()> {
        match reader.balance_snapshot(company_id, account_id)? {
            Some(BalanceSnapshot {
                balance,
                status: SnapshotStatus::Quarantined { derived, .. },
                ..
            }) => Err(LedgerError::DataIntegrity {
                account_id,
                cached: Some(balance),
                derived,
            }),
            _ => Ok(()),
        }
    }

    /// Recompute the snapshot from source rows within the caller's unit
    pub fn refresh(
        tx: &mut dyn LedgerTx,
        company_id: CompanyId,
        account_id: AccountId,
        now: NaiveDateTime,
    ) -> LedgerResult<BalanceSnapshot> {
        Self::ensure_writable(tx.as_reader(), company_id, account_id)?;
        Self::rebuild(tx, company_id, account_id, now)
    }

    /// Recompute the snapshot and clear any quarantine
    pub fn rebuild(
        tx: &mut dyn LedgerTx,
        company_id: CompanyId,
        account_id: AccountId,
        now: NaiveDateTime,
    ) -> LedgerResult<BalanceSnapshot> {
        let balance = BalanceCalculator::compute_balance(tx.as_reader(), company_id, account_id, None)?;
        let snapshot = BalanceSnapshot {
            company_id,
            account_id,
            balance,
            refreshed_at: now,
            status: SnapshotStatus::Current,
        };
        tx.put_balance_snapshot(&snapshot)?;
        Ok(snapshot)
    }

    /// Mark a snapshot as drifted, keeping the cached value for inspection
    pub fn quarantine(
        tx: &mut dyn LedgerTx,
        company_id: CompanyId,
        account_id: AccountId,
        cached: Option<Amount>,
        derived: Amount,
        now: NaiveDateTime,
    ) -> LedgerResult<()> {
        let snapshot = BalanceSnapshot {
            company_id,
            account_id,
            balance: cached.unwrap_or(Amount::ZERO),
            refreshed_at: now,
            status: SnapshotStatus::Quarantined {
                detected_at: now,
                derived,
            },
        };
        tx.put_balance_snapshot(&snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::Currency;

    fn ts() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn checking(opening: i64) -> Account {
        Account::new(
            CompanyId::new(),
            NewAccount {
                name: "Checking".to_string(),
                account_type: AccountType::Asset,
                opening_balance: Amount::from_minor(opening),
                currency: Currency::new("USD").unwrap(),
            },
            ts(),
        )
    }

    fn posting(account: &Account, amount: i64, day: u32) -> Transaction {
        Transaction {
            id: TransactionId::new(),
            company_id: account.company_id,
            account_id: account.id,
            category_id: None,
            amount: Amount::from_minor(amount),
            date: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
            description: String::new(),
            created_by: UserId::new("u1"),
            created_at: ts(),
            updated_at: ts(),
            lifecycle: Lifecycle::Active,
        }
    }

    #[test]
    fn test_no_transactions_returns_opening_balance() {
        let account = checking(10000);
        assert_eq!(
            BalanceCalculator::derive(&account, &[], None).unwrap(),
            Amount::from_minor(10000)
        );
    }

    #[test]
    fn test_derive_skips_deleted_and_later_postings() {
        let account = checking(10000);
        let mut deleted = posting(&account, -2500, 2);
        deleted.lifecycle = Lifecycle::Deleted { at: ts() };
        let rows = vec![deleted, posting(&account, 5000, 3), posting(&account, -100, 20)];

        assert_eq!(
            BalanceCalculator::derive(&account, &rows, None).unwrap(),
            Amount::from_minor(14900)
        );
        assert_eq!(
            BalanceCalculator::derive(&account, &rows, NaiveDate::from_ymd_opt(2024, 1, 10))
                .unwrap(),
            Amount::from_minor(15000)
        );
    }

    #[test]
    fn test_negative_balance_is_not_an_error() {
        let account = checking(0);
        let rows = vec![posting(&account, -700, 5)];
        assert_eq!(
            BalanceCalculator::derive(&account, &rows, None).unwrap(),
            Amount::from_minor(-700)
        );
    }
}
