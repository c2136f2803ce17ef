//! Transaction posting and management
//!
//! Every write runs as one store unit: the posting validator reads the same
//! state the write is based on, the row is written, and the balance snapshot
//! of each touched account is recomputed before the unit commits.

use chrono::{NaiveDate, NaiveDateTime};
use std::sync::Arc;

use crate::ledger::balance::BalanceView;
use crate::money::Amount;
use crate::traits::*;
use crate::types::*;
use crate::utils::validation::validate_description;

/// Transaction manager for recording and correcting postings
pub struct TransactionManager<S: LedgerStorage> {
    storage: S,
    validator: Arc<dyn PostingValidator>,
    clock: Arc<dyn Clock>,
}

/// Sign an input amount against the target account, when the caller gave a
/// direction instead of a signed amount
fn resolve_amount(
    reader: &dyn LedgerReader,
    company_id: CompanyId,
    account_id: AccountId,
    amount: Amount,
    entry_type: Option<EntryType>,
) -> LedgerResult<Amount> {
    let Some(entry_type) = entry_type else {
        return Ok(amount);
    };
    match reader.account(company_id, account_id)? {
        Some(account) => entry_type.signed_for(account.account_type, amount),
        // the validator reports the missing account
        None => Ok(amount),
    }
}

fn check_posting(
    validator: &dyn PostingValidator,
    reader: &dyn LedgerReader,
    candidate: &PostingCandidate,
    kind: PostingKind,
) -> LedgerResult<()> {
    if let Err(rejection) = validator.validate_posting(reader, candidate, kind)? {
        tracing::warn!(
            company_id = %candidate.company_id,
            account_id = %candidate.account_id,
            kind = ?kind,
            reason = %rejection,
            "posting rejected"
        );
        return Err(rejection.into());
    }
    Ok(())
}

fn load_transaction(
    reader: &dyn LedgerReader,
    company_id: CompanyId,
    transaction_id: TransactionId,
) -> LedgerResult<Transaction> {
    reader
        .transaction(company_id, transaction_id)?
        .ok_or_else(|| LedgerError::not_found(EntityKind::Transaction, transaction_id))
}

fn load_active_transaction(
    reader: &dyn LedgerReader,
    company_id: CompanyId,
    transaction_id: TransactionId,
) -> LedgerResult<Transaction> {
    let transaction = load_transaction(reader, company_id, transaction_id)?;
    if !transaction.lifecycle.is_active() {
        return Err(LedgerError::not_found(EntityKind::Transaction, transaction_id));
    }
    Ok(transaction)
}

fn refresh_accounts(
    tx: &mut dyn LedgerTx,
    company_id: CompanyId,
    accounts: &[AccountId],
    now: NaiveDateTime,
) -> LedgerResult<()> {
    for (i, account_id) in accounts.iter().enumerate() {
        if accounts[..i].contains(account_id) {
            continue;
        }
        BalanceView::refresh(tx, company_id, *account_id, now)?;
    }
    Ok(())
}

impl<S: LedgerStorage> TransactionManager<S> {
    /// Create a new transaction manager
    pub fn new(storage: S, validator: Arc<dyn PostingValidator>, clock: Arc<dyn Clock>) -> Self {
        Self {
            storage,
            validator,
            clock,
        }
    }

    /// Record a new transaction
    pub async fn create_transaction(
        &self,
        company_id: CompanyId,
        user_id: &UserId,
        payload: TransactionPayload,
    ) -> LedgerResult<Transaction> {
        let description = validate_description(&payload.description)?;
        let validator = Arc::clone(&self.validator);
        let created_by = user_id.clone();
        let now = self.clock.now();

        let transaction = self
            .storage
            .atomically(move |tx| {
                let amount = resolve_amount(
                    tx.as_reader(),
                    company_id,
                    payload.account_id,
                    payload.amount,
                    payload.entry_type,
                )?;
                let transaction = Transaction {
                    id: TransactionId::new(),
                    company_id,
                    account_id: payload.account_id,
                    category_id: payload.category_id,
                    amount,
                    date: payload.date,
                    description,
                    created_by,
                    created_at: now,
                    updated_at: now,
                    lifecycle: Lifecycle::Active,
                };

                check_posting(
                    validator.as_ref(),
                    tx.as_reader(),
                    &transaction.candidate(),
                    PostingKind::New,
                )?;
                BalanceView::ensure_writable(tx.as_reader(), company_id, transaction.account_id)?;

                tx.insert_transaction(&transaction)?;
                refresh_accounts(tx, company_id, &[transaction.account_id], now)?;
                Ok(transaction)
            })
            .await?;

        tracing::info!(
            company_id = %company_id,
            account_id = %transaction.account_id,
            transaction_id = %transaction.id,
            amount = %transaction.amount,
            "transaction recorded"
        );
        Ok(transaction)
    }

    /// Edit a transaction; both its old and new form must pass validation
    pub async fn update_transaction(
        &self,
        company_id: CompanyId,
        transaction_id: TransactionId,
        patch: TransactionPatch,
    ) -> LedgerResult<Transaction> {
        let description = patch
            .description
            .as_deref()
            .map(validate_description)
            .transpose()?;
        let validator = Arc::clone(&self.validator);
        let now = self.clock.now();

        let transaction = self
            .storage
            .atomically(move |tx| {
                let original = load_active_transaction(tx.as_reader(), company_id, transaction_id)?;

                let mut edited = original.clone();
                if let Some(account_id) = patch.account_id {
                    edited.account_id = account_id;
                }
                if let Some(category_id) = patch.category_id {
                    edited.category_id = category_id;
                }
                if patch.amount.is_some() || patch.entry_type.is_some() {
                    edited.amount = resolve_amount(
                        tx.as_reader(),
                        company_id,
                        edited.account_id,
                        patch.amount.unwrap_or(original.amount),
                        patch.entry_type,
                    )?;
                }
                if let Some(date) = patch.date {
                    edited.date = date;
                }
                if let Some(description) = description {
                    edited.description = description;
                }
                edited.updated_at = now;

                // moving a posting is an edit of the source and a new posting
                // on the target
                let moved = edited.account_id != original.account_id;
                if moved {
                    check_posting(
                        validator.as_ref(),
                        tx.as_reader(),
                        &original.candidate(),
                        PostingKind::Edit,
                    )?;
                }
                check_posting(
                    validator.as_ref(),
                    tx.as_reader(),
                    &edited.candidate(),
                    if moved { PostingKind::New } else { PostingKind::Edit },
                )?;
                BalanceView::ensure_writable(tx.as_reader(), company_id, original.account_id)?;
                BalanceView::ensure_writable(tx.as_reader(), company_id, edited.account_id)?;

                tx.update_transaction(&edited)?;
                refresh_accounts(
                    tx,
                    company_id,
                    &[original.account_id, edited.account_id],
                    now,
                )?;
                Ok(edited)
            })
            .await?;

        tracing::info!(
            company_id = %company_id,
            transaction_id = %transaction_id,
            "transaction updated"
        );
        Ok(transaction)
    }

    /// Soft-delete a transaction; the row is kept for audit
    pub async fn soft_delete_transaction(
        &self,
        company_id: CompanyId,
        transaction_id: TransactionId,
    ) -> LedgerResult<()> {
        let now = self.clock.now();

        self.storage
            .atomically(move |tx| {
                let mut transaction =
                    load_active_transaction(tx.as_reader(), company_id, transaction_id)?;
                BalanceView::ensure_writable(tx.as_reader(), company_id, transaction.account_id)?;

                transaction.lifecycle = Lifecycle::Deleted { at: now };
                transaction.updated_at = now;
                tx.update_transaction(&transaction)?;
                refresh_accounts(tx, company_id, &[transaction.account_id], now)
            })
            .await?;

        tracing::info!(
            company_id = %company_id,
            transaction_id = %transaction_id,
            "transaction deleted"
        );
        Ok(())
    }

    /// Bring a soft-deleted transaction back, re-validating it as it stands now
    ///
    /// Restoring an active transaction returns it unchanged.
    pub async fn restore_transaction(
        &self,
        company_id: CompanyId,
        transaction_id: TransactionId,
    ) -> LedgerResult<Transaction> {
        let validator = Arc::clone(&self.validator);
        let now = self.clock.now();

        self.storage
            .atomically(move |tx| {
                let mut transaction = load_transaction(tx.as_reader(), company_id, transaction_id)?;
                if transaction.lifecycle.is_active() {
                    return Ok(transaction);
                }

                check_posting(
                    validator.as_ref(),
                    tx.as_reader(),
                    &transaction.candidate(),
                    PostingKind::Restore,
                )?;
                BalanceView::ensure_writable(tx.as_reader(), company_id, transaction.account_id)?;

                transaction.lifecycle = Lifecycle::Active;
                transaction.updated_at = now;
                tx.update_transaction(&transaction)?;
                refresh_accounts(tx, company_id, &[transaction.account_id], now)?;

                tracing::info!(
                    company_id = %company_id,
                    transaction_id = %transaction_id,
                    "transaction restored"
                );
                Ok(transaction)
            })
            .await
    }

    /// Get a transaction in any lifecycle state
    pub async fn get_transaction(
        &self,
        company_id: CompanyId,
        transaction_id: TransactionId,
    ) -> LedgerResult<Transaction> {
        self.storage
            .read(move |r| load_transaction(r, company_id, transaction_id))
            .await
    }

    /// Active transactions of a company within an inclusive date range
    pub async fn list_transactions(
        &self,
        company_id: CompanyId,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> LedgerResult<Vec<Transaction>> {
        let transactions = self
            .storage
            .read(move |r| r.transactions(company_id, start_date, end_date))
            .await?;
        Ok(transactions
            .into_iter()
            .filter(|t| t.lifecycle.is_active())
            .collect())
    }

    /// Active transactions posted to one account
    pub async fn account_transactions(
        &self,
        company_id: CompanyId,
        account_id: AccountId,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> LedgerResult<Vec<Transaction>> {
        let transactions = self
            .storage
            .read(move |r| {
                r.account(company_id, account_id)?
                    .ok_or_else(|| LedgerError::not_found(EntityKind::Account, account_id))?;
                r.account_transactions(company_id, account_id, start_date, end_date)
            })
            .await?;
        Ok(transactions
            .into_iter()
            .filter(|t| t.lifecycle.is_active())
            .collect())
    }
}
