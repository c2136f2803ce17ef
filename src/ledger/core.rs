//! Main ledger orchestrator that coordinates the entity managers, posting
//! engine, reports and reconciliation over one store

use chrono::NaiveDate;
use std::sync::Arc;

use crate::ledger::balance::{BalanceCalculator, BalanceSnapshot};
use crate::ledger::posting::{DefaultPostingValidator, PostingPolicy};
use crate::ledger::{AccountManager, CategoryManager, CompanyManager, TransactionManager};
use crate::money::Amount;
use crate::reconciliation::{ReconciliationEngine, ReconciliationReport};
use crate::reports::{GroupBy, Granularity, Report, ReportAggregator, ReportPeriod};
use crate::traits::*;
use crate::types::*;

/// Main ledger system that orchestrates all bookkeeping operations
///
/// The caller hands over an already-authenticated company and user; every
/// call is scoped to that company.
pub struct Ledger<S: LedgerStorage> {
    storage: S,
    validator: Arc<dyn PostingValidator>,
    clock: Arc<dyn Clock>,
    company_manager: CompanyManager<S>,
    account_manager: AccountManager<S>,
    category_manager: CategoryManager<S>,
    transaction_manager: TransactionManager<S>,
    report_aggregator: ReportAggregator<S>,
    reconciliation: ReconciliationEngine<S>,
}

impl<S: LedgerStorage + Clone> Ledger<S> {
    /// Create a new ledger with the default posting policy and the system clock
    pub fn new(storage: S) -> Self {
        Self::with_policy(storage, PostingPolicy::default())
    }

    /// Create a new ledger with an explicit posting policy
    pub fn with_policy(storage: S, policy: PostingPolicy) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let validator = Arc::new(DefaultPostingValidator::new(policy, Arc::clone(&clock)));
        Self::with_parts(storage, validator, clock)
    }

    /// Create a new ledger with a custom validator and clock
    pub fn with_parts(
        storage: S,
        validator: Arc<dyn PostingValidator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            company_manager: CompanyManager::new(storage.clone(), Arc::clone(&clock)),
            account_manager: AccountManager::new(storage.clone(), Arc::clone(&clock)),
            category_manager: CategoryManager::new(storage.clone(), Arc::clone(&clock)),
            transaction_manager: TransactionManager::new(
                storage.clone(),
                Arc::clone(&validator),
                Arc::clone(&clock),
            ),
            report_aggregator: ReportAggregator::new(storage.clone(), Arc::clone(&clock)),
            reconciliation: ReconciliationEngine::new(storage.clone(), Arc::clone(&clock)),
            storage,
            validator,
            clock,
        }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    // Company operations
    pub async fn create_company(&self, owner: &UserId, name: &str) -> LedgerResult<Company> {
        self.company_manager.create_company(owner, name).await
    }

    pub async fn get_company(&self, owner: &UserId, company_id: CompanyId) -> LedgerResult<Company> {
        self.company_manager.get_company(owner, company_id).await
    }

    pub async fn list_companies(&self, owner: &UserId) -> LedgerResult<Vec<Company>> {
        self.company_manager.list_companies(owner).await
    }

    pub async fn rename_company(
        &self,
        owner: &UserId,
        company_id: CompanyId,
        name: &str,
    ) -> LedgerResult<Company> {
        self.company_manager
            .rename_company(owner, company_id, name)
            .await
    }

    pub async fn delete_company(&self, owner: &UserId, company_id: CompanyId) -> LedgerResult<()> {
        self.company_manager.delete_company(owner, company_id).await
    }

    // Account operations
    /// Create a new account
    pub async fn create_account(
        &self,
        company_id: CompanyId,
        input: NewAccount,
    ) -> LedgerResult<Account> {
        self.account_manager.create_account(company_id, input).await
    }

    pub async fn get_account(
        &self,
        company_id: CompanyId,
        account_id: AccountId,
    ) -> LedgerResult<Account> {
        self.account_manager
            .get_account(company_id, account_id)
            .await
    }

    pub async fn list_accounts(&self, company_id: CompanyId) -> LedgerResult<Vec<Account>> {
        self.account_manager.list_accounts(company_id).await
    }

    pub async fn update_account(
        &self,
        company_id: CompanyId,
        account_id: AccountId,
        patch: AccountPatch,
    ) -> LedgerResult<Account> {
        self.account_manager
            .update_account(company_id, account_id, patch)
            .await
    }

    pub async fn close_account(
        &self,
        company_id: CompanyId,
        account_id: AccountId,
    ) -> LedgerResult<Account> {
        self.account_manager
            .close_account(company_id, account_id)
            .await
    }

    pub async fn reopen_account(
        &self,
        company_id: CompanyId,
        account_id: AccountId,
    ) -> LedgerResult<Account> {
        self.account_manager
            .reopen_account(company_id, account_id)
            .await
    }

    pub async fn delete_account(
        &self,
        company_id: CompanyId,
        account_id: AccountId,
    ) -> LedgerResult<()> {
        self.account_manager
            .delete_account(company_id, account_id)
            .await
    }

    // Category operations
    pub async fn create_category(
        &self,
        company_id: CompanyId,
        name: &str,
        kind: CategoryKind,
    ) -> LedgerResult<Category> {
        self.category_manager
            .create_category(company_id, name, kind)
            .await
    }

    pub async fn get_category(
        &self,
        company_id: CompanyId,
        category_id: CategoryId,
    ) -> LedgerResult<Category> {
        self.category_manager
            .get_category(company_id, category_id)
            .await
    }

    pub async fn list_categories(&self, company_id: CompanyId) -> LedgerResult<Vec<Category>> {
        self.category_manager.list_categories(company_id).await
    }

    pub async fn update_category(
        &self,
        company_id: CompanyId,
        category_id: CategoryId,
        patch: CategoryPatch,
    ) -> LedgerResult<Category> {
        self.category_manager
            .update_category(company_id, category_id, patch)
            .await
    }

    pub async fn delete_category(
        &self,
        company_id: CompanyId,
        category_id: CategoryId,
    ) -> LedgerResult<()> {
        self.category_manager
            .delete_category(company_id, category_id)
            .await
    }

    // Transaction operations
    /// Record a new transaction
    pub async fn create_transaction(
        &self,
        company_id: CompanyId,
        user_id: &UserId,
        payload: TransactionPayload,
    ) -> LedgerResult<Transaction> {
        self.transaction_manager
            .create_transaction(company_id, user_id, payload)
            .await
    }

    /// Update a transaction
    pub async fn update_transaction(
        &self,
        company_id: CompanyId,
        transaction_id: TransactionId,
        patch: TransactionPatch,
    ) -> LedgerResult<Transaction> {
        self.transaction_manager
            .update_transaction(company_id, transaction_id, patch)
            .await
    }

    /// Soft-delete a transaction
    pub async fn soft_delete_transaction(
        &self,
        company_id: CompanyId,
        transaction_id: TransactionId,
    ) -> LedgerResult<()> {
        self.transaction_manager
            .soft_delete_transaction(company_id, transaction_id)
            .await
    }

    /// Undo a soft delete
    pub async fn restore_transaction(
        &self,
        company_id: CompanyId,
        transaction_id: TransactionId,
    ) -> LedgerResult<Transaction> {
        self.transaction_manager
            .restore_transaction(company_id, transaction_id)
            .await
    }

    /// Get a transaction by ID
    pub async fn get_transaction(
        &self,
        company_id: CompanyId,
        transaction_id: TransactionId,
    ) -> LedgerResult<Transaction> {
        self.transaction_manager
            .get_transaction(company_id, transaction_id)
            .await
    }

    /// Get all transactions within a date range
    pub async fn list_transactions(
        &self,
        company_id: CompanyId,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> LedgerResult<Vec<Transaction>> {
        self.transaction_manager
            .list_transactions(company_id, start_date, end_date)
            .await
    }

    /// Get transactions for a specific account
    pub async fn account_transactions(
        &self,
        company_id: CompanyId,
        account_id: AccountId,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> LedgerResult<Vec<Transaction>> {
        self.transaction_manager
            .account_transactions(company_id, account_id, start_date, end_date)
            .await
    }

    /// Judge a candidate posting without writing anything
    pub async fn validate_posting(
        &self,
        candidate: PostingCandidate,
        kind: PostingKind,
    ) -> LedgerResult<Verdict> {
        let validator = Arc::clone(&self.validator);
        self.storage
            .read(move |r| validator.validate_posting(r, &candidate, kind))
            .await
    }

    // Balance and reporting operations
    /// Balance derived from transactions dated on or before `as_of` (today by
    /// default)
    pub async fn get_account_balance(
        &self,
        company_id: CompanyId,
        account_id: AccountId,
        as_of: Option<NaiveDate>,
    ) -> LedgerResult<Amount> {
        let as_of = as_of.unwrap_or_else(|| self.clock.today());
        self.storage
            .read(move |r| BalanceCalculator::compute_balance(r, company_id, account_id, Some(as_of)))
            .await
    }

    /// Cached book balance (every date) with its quarantine status
    pub async fn get_book_balance(
        &self,
        company_id: CompanyId,
        account_id: AccountId,
    ) -> LedgerResult<BalanceSnapshot> {
        self.storage
            .read(move |r| {
                r.balance_snapshot(company_id, account_id)?
                    .ok_or_else(|| LedgerError::not_found(EntityKind::Account, account_id))
            })
            .await
    }

    pub async fn get_report(
        &self,
        company_id: CompanyId,
        period: ReportPeriod,
        group_by: GroupBy,
    ) -> LedgerResult<Report> {
        self.report_aggregator
            .aggregate(company_id, period, group_by)
            .await
    }

    /// Report covering every bucket from the company's creation through today
    pub async fn get_report_since_creation(
        &self,
        company_id: CompanyId,
        granularity: Granularity,
        group_by: GroupBy,
    ) -> LedgerResult<Report> {
        let period = self
            .report_aggregator
            .period_since_creation(company_id, granularity)
            .await?;
        self.get_report(company_id, period, group_by).await
    }

    // Integrity operations
    pub async fn reconcile(&self, company_id: CompanyId) -> LedgerResult<ReconciliationReport> {
        self.reconciliation.reconcile(company_id).await
    }

    pub async fn rebuild_account_balance(
        &self,
        company_id: CompanyId,
        account_id: AccountId,
    ) -> LedgerResult<Amount> {
        self.reconciliation
            .rebuild_account_balance(company_id, account_id)
            .await
    }
}
