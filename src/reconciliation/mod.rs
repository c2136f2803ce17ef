//! Reconciliation of cached balances against source transactions
//!
//! Snapshots are only ever compared and flagged here. A drifted snapshot is
//! quarantined, which stops writes to its account, and stays that way until
//! [`ReconciliationEngine::rebuild_account_balance`] is called for it.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::ledger::balance::{BalanceCalculator, BalanceView};
use crate::money::Amount;
use crate::traits::*;
use crate::types::*;

/// Disagreement between a snapshot and the derived balance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceDrift {
    pub account_id: AccountId,
    /// `None` when the account had no snapshot at all
    pub cached: Option<Amount>,
    pub derived: Amount,
}

/// Outcome of one reconciliation pass over a company
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    /// Number of accounts compared
    pub checked: usize,
    pub drifts: Vec<BalanceDrift>,
}

impl ReconciliationReport {
    pub fn is_clean(&self) -> bool {
        self.drifts.is_empty()
    }

    /// Fail with `DataIntegrity` for the first drifted account
    pub fn into_result(self) -> LedgerResult<usize> {
        match self.drifts.into_iter().next() {
            None => Ok(self.checked),
            Some(drift) => Err(LedgerError::DataIntegrity {
                account_id: drift.account_id,
                cached: drift.cached,
                derived: drift.derived,
            }),
        }
    }
}

pub struct ReconciliationEngine<S: LedgerStorage> {
    storage: S,
    clock: Arc<dyn Clock>,
}

impl<S: LedgerStorage> ReconciliationEngine<S> {
    pub fn new(storage: S, clock: Arc<dyn Clock>) -> Self {
        Self { storage, clock }
    }

    /// Compare every active account's snapshot with its derived balance
    ///
    /// Drifted snapshots are quarantined in the same unit as the comparison.
    /// Accounts already in quarantine are reported again until rebuilt.
    pub async fn reconcile(&self, company_id: CompanyId) -> LedgerResult<ReconciliationReport> {
        let now = self.clock.now();

        let report = self
            .storage
            .atomically(move |tx| {
                let mut report = ReconciliationReport::default();
                let accounts = tx.accounts(company_id)?;

                for account in accounts.iter().filter(|a| a.lifecycle.is_active()) {
                    report.checked += 1;
                    let derived = BalanceCalculator::compute_balance(
                        tx.as_reader(),
                        company_id,
                        account.id,
                        None,
                    )?;
                    let snapshot = tx.balance_snapshot(company_id, account.id)?;

                    let cached = snapshot.as_ref().map(|s| s.balance);
                    let clean = snapshot
                        .as_ref()
                        .is_some_and(|s| !s.is_quarantined() && s.balance == derived);
                    if clean {
                        continue;
                    }

                    tracing::error!(
                        company_id = %company_id,
                        account_id = %account.id,
                        cached = ?cached.map(|c| c.minor_units()),
                        derived = derived.minor_units(),
                        "balance drift detected; account quarantined"
                    );
                    if !snapshot.as_ref().is_some_and(|s| s.is_quarantined()) {
                        BalanceView::quarantine(tx, company_id, account.id, cached, derived, now)?;
                    }
                    report.drifts.push(BalanceDrift {
                        account_id: account.id,
                        cached,
                        derived,
                    });
                }
                Ok(report)
            })
            .await?;

        tracing::info!(
            company_id = %company_id,
            checked = report.checked,
            drifts = report.drifts.len(),
            "reconciliation finished"
        );
        Ok(report)
    }

    /// Recompute an account's snapshot from source rows and lift quarantine
    pub async fn rebuild_account_balance(
        &self,
        company_id: CompanyId,
        account_id: AccountId,
    ) -> LedgerResult<Amount> {
        let now = self.clock.now();

        let (previous, rebuilt) = self
            .storage
            .atomically(move |tx| {
                tx.account(company_id, account_id)?
                    .ok_or_else(|| LedgerError::not_found(EntityKind::Account, account_id))?;
                let previous = tx.balance_snapshot(company_id, account_id)?;
                let rebuilt = BalanceView::rebuild(tx, company_id, account_id, now)?;
                Ok((previous, rebuilt))
            })
            .await?;

        tracing::warn!(
            company_id = %company_id,
            account_id = %account_id,
            previous = ?previous.map(|s| s.balance.minor_units()),
            rebuilt = rebuilt.balance.minor_units(),
            "account balance rebuilt from transactions"
        );
        Ok(rebuilt.balance)
    }
}
