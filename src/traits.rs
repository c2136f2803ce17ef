//! Traits for storage abstraction and extensibility

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use std::sync::Mutex;

use crate::ledger::balance::BalanceSnapshot;
use crate::types::*;

/// Storage abstraction for the ledger system
///
/// Every operation the engine performs runs inside one call to
/// [`LedgerStorage::atomically`]: the closure sees a single consistent view of
/// the store, and its writes are applied all together or not at all. This lets
/// the posting validator read the same state that the following write is
/// based on.
#[async_trait]
pub trait LedgerStorage: Send + Sync {
    /// Run `work` as one atomic unit of reads and writes
    ///
    /// An `Err` returned from `work` rolls back every write it made. Writers are
    /// serialized per store, so two units touching the same account never
    /// interleave.
    async fn atomically<T, F>(&self, work: F) -> LedgerResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn LedgerTx) -> LedgerResult<T> + Send + 'static;

    /// Run read-only `work` against a consistent snapshot
    async fn read<T, F>(&self, work: F) -> LedgerResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn LedgerReader) -> LedgerResult<T> + Send + 'static;
}

/// Reference from a transaction to a company-owned entity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostingReference {
    Account(AccountId),
    Category(CategoryId),
}

/// Tenant-scoped read access to stored rows
///
/// Lookups take the company id and never return a row owned by another
/// company. Rows are returned in every lifecycle state; callers decide whether
/// soft-deleted rows matter.
pub trait LedgerReader {
    fn company(&self, company_id: CompanyId) -> LedgerResult<Option<Company>>;

    /// Companies owned by a user, oldest first
    fn companies_for_owner(&self, owner: &UserId) -> LedgerResult<Vec<Company>>;

    fn account(&self, company_id: CompanyId, account_id: AccountId)
        -> LedgerResult<Option<Account>>;

    /// All accounts of a company, ordered by name
    fn accounts(&self, company_id: CompanyId) -> LedgerResult<Vec<Account>>;

    fn category(
        &self,
        company_id: CompanyId,
        category_id: CategoryId,
    ) -> LedgerResult<Option<Category>>;

    /// All categories of a company, ordered by name
    fn categories(&self, company_id: CompanyId) -> LedgerResult<Vec<Category>>;

    fn transaction(
        &self,
        company_id: CompanyId,
        transaction_id: TransactionId,
    ) -> LedgerResult<Option<Transaction>>;

    /// Transactions posted to one account, ordered by date then creation time
    fn account_transactions(
        &self,
        company_id: CompanyId,
        account_id: AccountId,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> LedgerResult<Vec<Transaction>>;

    /// Transactions of a company within an inclusive date range
    fn transactions(
        &self,
        company_id: CompanyId,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> LedgerResult<Vec<Transaction>>;

    /// Number of transactions referencing an account or category, soft-deleted
    /// rows included
    fn count_postings(
        &self,
        company_id: CompanyId,
        reference: PostingReference,
    ) -> LedgerResult<usize>;

    /// Number of non-deleted transactions referencing an account or category
    fn count_active_postings(
        &self,
        company_id: CompanyId,
        reference: PostingReference,
    ) -> LedgerResult<usize>;

    fn balance_snapshot(
        &self,
        company_id: CompanyId,
        account_id: AccountId,
    ) -> LedgerResult<Option<BalanceSnapshot>>;
}

/// Write access inside an atomic unit
///
/// `update_*` methods fail with `NotFound` when the row does not exist in the
/// given company.
pub trait LedgerTx: LedgerReader {
    /// Read-only view of this unit, for components that must not write
    fn as_reader(&self) -> &dyn LedgerReader;

    fn insert_company(&mut self, company: &Company) -> LedgerResult<()>;
    fn update_company(&mut self, company: &Company) -> LedgerResult<()>;

    fn insert_account(&mut self, account: &Account) -> LedgerResult<()>;
    fn update_account(&mut self, account: &Account) -> LedgerResult<()>;

    fn insert_category(&mut self, category: &Category) -> LedgerResult<()>;
    fn update_category(&mut self, category: &Category) -> LedgerResult<()>;

    fn insert_transaction(&mut self, transaction: &Transaction) -> LedgerResult<()>;
    fn update_transaction(&mut self, transaction: &Transaction) -> LedgerResult<()>;

    /// Insert or replace the materialized balance of an account
    fn put_balance_snapshot(&mut self, snapshot: &BalanceSnapshot) -> LedgerResult<()>;
}

/// Trait for implementing custom posting rules
///
/// Implementations must be pure decisions over the reader's state: the same
/// candidate against unchanged state yields the same verdict.
pub trait PostingValidator: Send + Sync {
    /// Judge a candidate before it is inserted, edited or restored
    ///
    /// The outer `Result` carries store failures, the inner one the verdict.
    fn validate_posting(
        &self,
        reader: &dyn LedgerReader,
        candidate: &PostingCandidate,
        kind: PostingKind,
    ) -> LedgerResult<Verdict>;
}

/// Source of the current time, injectable for tests
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;

    fn today(&self) -> NaiveDate {
        self.now().date()
    }
}

/// Wall clock in UTC
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        chrono::Utc::now().naive_utc()
    }
}

/// Clock frozen at a settable instant
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<NaiveDateTime>,
}

impl FixedClock {
    pub fn new(now: NaiveDateTime) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Clock set to midnight of `date`
    pub fn at_date(date: NaiveDate) -> Self {
        Self::new(date.and_time(chrono::NaiveTime::MIN))
    }

    pub fn set(&self, now: NaiveDateTime) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}
