//! Account management functionality

use std::sync::Arc;

use crate::ledger::balance::BalanceView;
use crate::ledger::company::require_active_company;
use crate::traits::*;
use crate::types::*;
use crate::utils::validation::validate_name;

/// Account manager for one store, scoped per call by company id
pub struct AccountManager<S: LedgerStorage> {
    storage: S,
    clock: Arc<dyn Clock>,
}

/// Load an account of the company that is not deleted
pub(crate) fn require_active_account(
    reader: &dyn LedgerReader,
    company_id: CompanyId,
    account_id: AccountId,
) -> LedgerResult<Account> {
    reader
        .account(company_id, account_id)?
        .filter(|a| a.lifecycle.is_active())
        .ok_or_else(|| LedgerError::not_found(EntityKind::Account, account_id))
}

impl<S: LedgerStorage> AccountManager<S> {
    /// Create a new account manager
    pub fn new(storage: S, clock: Arc<dyn Clock>) -> Self {
        Self { storage, clock }
    }

    /// Create a new account and seed its balance snapshot
    pub async fn create_account(
        &self,
        company_id: CompanyId,
        input: NewAccount,
    ) -> LedgerResult<Account> {
        let input = NewAccount {
            name: validate_name(EntityKind::Account, &input.name)?,
            ..input
        };
        let now = self.clock.now();

        let account = self
            .storage
            .atomically(move |tx| {
                require_active_company(tx.as_reader(), company_id)?;
                let account = Account::new(company_id, input, now);
                tx.insert_account(&account)?;
                BalanceView::rebuild(tx, company_id, account.id, now)?;
                Ok(account)
            })
            .await?;

        tracing::info!(
            company_id = %company_id,
            account_id = %account.id,
            currency = %account.currency,
            "account created"
        );
        Ok(account)
    }

    /// Get an account in any lifecycle state
    pub async fn get_account(
        &self,
        company_id: CompanyId,
        account_id: AccountId,
    ) -> LedgerResult<Account> {
        self.storage
            .read(move |r| {
                r.account(company_id, account_id)?
                    .ok_or_else(|| LedgerError::not_found(EntityKind::Account, account_id))
            })
            .await
    }

    /// List active accounts, ordered by name
    pub async fn list_accounts(&self, company_id: CompanyId) -> LedgerResult<Vec<Account>> {
        let accounts = self.storage.read(move |r| r.accounts(company_id)).await?;
        Ok(accounts
            .into_iter()
            .filter(|a| a.lifecycle.is_active())
            .collect())
    }

    /// Apply a partial update
    ///
    /// Currency and type are frozen once the account carries active postings,
    /// since existing amounts were recorded against them. A new opening balance
    /// refreshes the balance snapshot in the same unit.
    pub async fn update_account(
        &self,
        company_id: CompanyId,
        account_id: AccountId,
        patch: AccountPatch,
    ) -> LedgerResult<Account> {
        let name = patch
            .name
            .as_deref()
            .map(|n| validate_name(EntityKind::Account, n))
            .transpose()?;
        let now = self.clock.now();

        self.storage
            .atomically(move |tx| {
                let mut account = require_active_account(tx.as_reader(), company_id, account_id)?;

                let currency_changes = patch
                    .currency
                    .as_ref()
                    .is_some_and(|c| *c != account.currency);
                let type_changes = patch
                    .account_type
                    .is_some_and(|t| t != account.account_type);
                if currency_changes || type_changes {
                    // soft-deleted postings count: a restore must not change meaning
                    let postings =
                        tx.count_postings(company_id, PostingReference::Account(account_id))?;
                    if postings > 0 {
                        return Err(LedgerError::ReferentialConflict(format!(
                            "account {} has {} postings; currency and type cannot change",
                            account_id, postings
                        )));
                    }
                }

                let opening_changes = patch
                    .opening_balance
                    .is_some_and(|b| b != account.opening_balance);

                if let Some(name) = name {
                    account.name = name;
                }
                if let Some(account_type) = patch.account_type {
                    account.account_type = account_type;
                }
                if let Some(opening_balance) = patch.opening_balance {
                    account.opening_balance = opening_balance;
                }
                if let Some(currency) = patch.currency {
                    account.currency = currency;
                }
                account.updated_at = now;
                tx.update_account(&account)?;

                if opening_changes {
                    BalanceView::refresh(tx, company_id, account_id, now)?;
                }
                Ok(account)
            })
            .await
    }

    /// Close an account to new postings; closing twice keeps the first date
    pub async fn close_account(
        &self,
        company_id: CompanyId,
        account_id: AccountId,
    ) -> LedgerResult<Account> {
        let now = self.clock.now();
        let account = self
            .storage
            .atomically(move |tx| {
                let mut account = require_active_account(tx.as_reader(), company_id, account_id)?;
                if !account.is_closed() {
                    account.status = AccountStatus::Closed { at: now };
                    account.updated_at = now;
                    tx.update_account(&account)?;
                }
                Ok(account)
            })
            .await?;

        tracing::info!(company_id = %company_id, account_id = %account_id, "account closed");
        Ok(account)
    }

    pub async fn reopen_account(
        &self,
        company_id: CompanyId,
        account_id: AccountId,
    ) -> LedgerResult<Account> {
        let now = self.clock.now();
        self.storage
            .atomically(move |tx| {
                let mut account = require_active_account(tx.as_reader(), company_id, account_id)?;
                if account.is_closed() {
                    account.status = AccountStatus::Open;
                    account.updated_at = now;
                    tx.update_account(&account)?;
                }
                Ok(account)
            })
            .await
    }

    /// Soft-delete an account that has no active postings
    pub async fn delete_account(
        &self,
        company_id: CompanyId,
        account_id: AccountId,
    ) -> LedgerResult<()> {
        let now = self.clock.now();
        self.storage
            .atomically(move |tx| {
                let mut account = require_active_account(tx.as_reader(), company_id, account_id)?;
                let postings =
                    tx.count_active_postings(company_id, PostingReference::Account(account_id))?;
                if postings > 0 {
                    return Err(LedgerError::ReferentialConflict(format!(
                        "account {} still has {} active postings",
                        account_id, postings
                    )));
                }
                account.lifecycle = Lifecycle::Deleted { at: now };
                account.updated_at = now;
                tx.update_account(&account)
            })
            .await?;

        tracing::info!(company_id = %company_id, account_id = %account_id, "account deleted");
        Ok(())
    }
}
