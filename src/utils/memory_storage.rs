//! In-memory storage implementation for testing

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::ledger::balance::BalanceSnapshot;
use crate::traits::*;
use crate::types::*;

#[derive(Debug, Clone, Default)]
struct MemoryState {
    companies: HashMap<CompanyId, Company>,
    accounts: HashMap<AccountId, Account>,
    categories: HashMap<CategoryId, Category>,
    transactions: HashMap<TransactionId, Transaction>,
    snapshots: HashMap<AccountId, BalanceSnapshot>,
}

/// In-memory storage implementation for testing and development
///
/// A single mutex serializes every unit of work. Writes are applied to a staged
/// copy of the state that replaces the live one only when the unit succeeds,
/// so a failed unit leaves nothing behind.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStorage {
    /// Create a new memory storage instance
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all data (useful for testing)
    pub fn clear(&self) -> LedgerResult<()> {
        *self.lock()? = MemoryState::default();
        Ok(())
    }

    fn lock(&self) -> LedgerResult<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| LedgerError::StoreUnavailable("memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl LedgerStorage for MemoryStorage {
    async fn atomically<T, F>(&self, work: F) -> LedgerResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn LedgerTx) -> LedgerResult<T> + Send + 'static,
    {
        let mut live = self.lock()?;
        let mut staged = live.clone();
        let output = work(&mut staged)?;
        *live = staged;
        Ok(output)
    }

    async fn read<T, F>(&self, work: F) -> LedgerResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn LedgerReader) -> LedgerResult<T> + Send + 'static,
    {
        let state = self.lock()?;
        work(&*state)
    }
}

fn in_range(date: NaiveDate, start: Option<NaiveDate>, end: Option<NaiveDate>) -> bool {
    start.is_none_or(|s| date >= s) && end.is_none_or(|e| date <= e)
}

fn sort_transactions(transactions: &mut [Transaction]) {
    transactions.sort_by(|a, b| {
        (a.date, a.created_at, a.id).cmp(&(b.date, b.created_at, b.id))
    });
}

impl LedgerReader for MemoryState {
    fn company(&self, company_id: CompanyId) -> LedgerResult<Option<Company>> {
        Ok(self.companies.get(&company_id).cloned())
    }

    fn companies_for_owner(&self, owner: &UserId) -> LedgerResult<Vec<Company>> {
        let mut companies: Vec<Company> = self
            .companies
            .values()
            .filter(|c| &c.owner_user_id == owner)
            .cloned()
            .collect();
        companies.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        Ok(companies)
    }

    fn account(
        &self,
        company_id: CompanyId,
        account_id: AccountId,
    ) -> LedgerResult<Option<Account>> {
        Ok(self
            .accounts
            .get(&account_id)
            .filter(|a| a.company_id == company_id)
            .cloned())
    }

    fn accounts(&self, company_id: CompanyId) -> LedgerResult<Vec<Account>> {
        let mut accounts: Vec<Account> = self
            .accounts
            .values()
            .filter(|a| a.company_id == company_id)
            .cloned()
            .collect();
        accounts.sort_by(|a, b| (&a.name, a.id).cmp(&(&b.name, b.id)));
        Ok(accounts)
    }

    fn category(
        &self,
        company_id: CompanyId,
        category_id: CategoryId,
    ) -> LedgerResult<Option<Category>> {
        Ok(self
            .categories
            .get(&category_id)
            .filter(|c| c.company_id == company_id)
            .cloned())
    }

    fn categories(&self, company_id: CompanyId) -> LedgerResult<Vec<Category>> {
        let mut categories: Vec<Category> = self
            .categories
            .values()
            .filter(|c| c.company_id == company_id)
            .cloned()
            .collect();
        categories.sort_by(|a, b| (&a.name, a.id).cmp(&(&b.name, b.id)));
        Ok(categories)
    }

    fn transaction(
        &self,
        company_id: CompanyId,
        transaction_id: TransactionId,
    ) -> LedgerResult<Option<Transaction>> {
        Ok(self
            .transactions
            .get(&transaction_id)
            .filter(|t| t.company_id == company_id)
            .cloned())
    }

    fn account_transactions(
        &self,
        company_id: CompanyId,
        account_id: AccountId,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> LedgerResult<Vec<Transaction>> {
        let mut transactions: Vec<Transaction> = self
            .transactions
            .values()
            .filter(|t| t.company_id == company_id && t.account_id == account_id)
            .filter(|t| in_range(t.date, start_date, end_date))
            .cloned()
            .collect();
        sort_transactions(&mut transactions);
        Ok(transactions)
    }

    fn transactions(
        &self,
        company_id: CompanyId,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> LedgerResult<Vec<Transaction>> {
        let mut transactions: Vec<Transaction> = self
            .transactions
            .values()
            .filter(|t| t.company_id == company_id)
            .filter(|t| in_range(t.date, start_date, end_date))
            .cloned()
            .collect();
        sort_transactions(&mut transactions);
        Ok(transactions)
    }

    fn count_postings(
        &self,
        company_id: CompanyId,
        reference: PostingReference,
    ) -> LedgerResult<usize> {
        Ok(self.postings(company_id, reference).count())
    }

    fn count_active_postings(
        &self,
        company_id: CompanyId,
        reference: PostingReference,
    ) -> LedgerResult<usize> {
        Ok(self
            .postings(company_id, reference)
            .filter(|t| t.lifecycle.is_active())
            .count())
    }

    fn balance_snapshot(
        &self,
        company_id: CompanyId,
        account_id: AccountId,
    ) -> LedgerResult<Option<BalanceSnapshot>> {
        Ok(self
            .snapshots
            .get(&account_id)
            .filter(|s| s.company_id == company_id)
            .cloned())
    }
}

impl MemoryState {
    fn require_company(&self, company_id: CompanyId) -> LedgerResult<()> {
        if self.companies.contains_key(&company_id) {
            Ok(())
        } else {
            Err(LedgerError::ReferentialConflict(format!(
                "company {} does not exist",
                company_id
            )))
        }
    }

    fn postings(
        &self,
        company_id: CompanyId,
        reference: PostingReference,
    ) -> impl Iterator<Item = &Transaction> + '_ {
        self.transactions
            .values()
            .filter(move |t| t.company_id == company_id)
            .filter(move |t| match reference {
                PostingReference::Account(id) => t.account_id == id,
                PostingReference::Category(id) => t.category_id == Some(id),
            })
    }

    // mirrors the composite foreign keys of the SQL schema
    fn require_references(&self, transaction: &Transaction) -> LedgerResult<()> {
        if self.account(transaction.company_id, transaction.account_id)?.is_none() {
            return Err(LedgerError::ReferentialConflict(format!(
                "account {} does not belong to company {}",
                transaction.account_id, transaction.company_id
            )));
        }
        if let Some(category_id) = transaction.category_id {
            if self.category(transaction.company_id, category_id)?.is_none() {
                return Err(LedgerError::ReferentialConflict(format!(
                    "category {} does not belong to company {}",
                    category_id, transaction.company_id
                )));
            }
        }
        Ok(())
    }
}

fn duplicate(entity: EntityKind, id: impl std::fmt::Display) -> LedgerError {
    LedgerError::Storage(format!("{} {} already exists", entity, id))
}

impl LedgerTx for MemoryState {
    fn as_reader(&self) -> &dyn LedgerReader {
        self
    }

    fn insert_company(&mut self, company: &Company) -> LedgerResult<()> {
        if self.companies.contains_key(&company.id) {
            return Err(duplicate(EntityKind::Company, company.id));
        }
        self.companies.insert(company.id, company.clone());
        Ok(())
    }

    fn update_company(&mut self, company: &Company) -> LedgerResult<()> {
        match self.companies.get_mut(&company.id) {
            Some(existing) => {
                *existing = company.clone();
                Ok(())
            }
            None => Err(LedgerError::not_found(EntityKind::Company, company.id)),
        }
    }

    fn insert_account(&mut self, account: &Account) -> LedgerResult<()> {
        self.require_company(account.company_id)?;
        if self.accounts.contains_key(&account.id) {
            return Err(duplicate(EntityKind::Account, account.id));
        }
        self.accounts.insert(account.id, account.clone());
        Ok(())
    }

    fn update_account(&mut self, account: &Account) -> LedgerResult<()> {
        match self.accounts.get_mut(&account.id) {
            Some(existing) if existing.company_id == account.company_id => {
                *existing = account.clone();
                Ok(())
            }
            _ => Err(LedgerError::not_found(EntityKind::Account, account.id)),
        }
    }

    fn insert_category(&mut self, category: &Category) -> LedgerResult<()> {
        self.require_company(category.company_id)?;
        if self.categories.contains_key(&category.id) {
            return Err(duplicate(EntityKind::Category, category.id));
        }
        self.categories.insert(category.id, category.clone());
        Ok(())
    }

    fn update_category(&mut self, category: &Category) -> LedgerResult<()> {
        match self.categories.get_mut(&category.id) {
            Some(existing) if existing.company_id == category.company_id => {
                *existing = category.clone();
                Ok(())
            }
            _ => Err(LedgerError::not_found(EntityKind::Category, category.id)),
        }
    }

    fn insert_transaction(&mut self, transaction: &Transaction) -> LedgerResult<()> {
        if transaction.amount.is_zero() {
            return Err(LedgerError::OutOfRange(
                "transaction amount cannot be zero".to_string(),
            ));
        }
        self.require_references(transaction)?;
        if self.transactions.contains_key(&transaction.id) {
            return Err(duplicate(EntityKind::Transaction, transaction.id));
        }
        self.transactions
            .insert(transaction.id, transaction.clone());
        Ok(())
    }

    fn update_transaction(&mut self, transaction: &Transaction) -> LedgerResult<()> {
        if transaction.amount.is_zero() {
            return Err(LedgerError::OutOfRange(
                "transaction amount cannot be zero".to_string(),
            ));
        }
        self.require_references(transaction)?;
        match self.transactions.get_mut(&transaction.id) {
            Some(existing) if existing.company_id == transaction.company_id => {
                *existing = transaction.clone();
                Ok(())
            }
            _ => Err(LedgerError::not_found(
                EntityKind::Transaction,
                transaction.id,
            )),
        }
    }

    fn put_balance_snapshot(&mut self, snapshot: &BalanceSnapshot) -> LedgerResult<()> {
        if self.account(snapshot.company_id, snapshot.account_id)?.is_none() {
            return Err(LedgerError::not_found(
                EntityKind::Account,
                snapshot.account_id,
            ));
        }
        self.snapshots.insert(snapshot.account_id, snapshot.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::{Amount, Currency};

    fn now() -> chrono::NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap()
    }

    fn seed(state: &mut dyn LedgerTx) -> LedgerResult<(Company, Account)> {
        let company = Company::new("Acme".to_string(), UserId::new("owner"), now());
        state.insert_company(&company)?;
        let account = Account::new(
            company.id,
            NewAccount {
                name: "Cash".to_string(),
                account_type: AccountType::Asset,
                opening_balance: Amount::ZERO,
                currency: Currency::new("USD")?,
            },
            now(),
        );
        state.insert_account(&account)?;
        Ok((company, account))
    }

    #[tokio::test]
    async fn test_failed_unit_rolls_back() {
        let storage = MemoryStorage::new();

        let result: LedgerResult<()> = storage
            .atomically(|tx| {
                seed(tx)?;
                Err(LedgerError::Validation("abort".to_string()))
            })
            .await;
        assert!(result.is_err());

        let companies = storage
            .read(|r| r.companies_for_owner(&UserId::new("owner")))
            .await
            .unwrap();
        assert!(companies.is_empty());
    }

    #[tokio::test]
    async fn test_reads_are_tenant_scoped() {
        let storage = MemoryStorage::new();
        let (_, account) = storage.atomically(seed).await.unwrap();

        let other_company = CompanyId::new();
        let account_id = account.id;
        let found = storage
            .read(move |r| r.account(other_company, account_id))
            .await
            .unwrap();
        assert!(found.is_none());

        let own = storage
            .read(move |r| r.account(account.company_id, account_id))
            .await
            .unwrap();
        assert_eq!(own.map(|a| a.name), Some("Cash".to_string()));
    }

    #[tokio::test]
    async fn test_insert_rejects_cross_company_account() {
        let storage = MemoryStorage::new();
        let (_, account) = storage.atomically(seed).await.unwrap();

        let result = storage
            .atomically(move |tx| {
                let other = Company::new("Other".to_string(), UserId::new("owner"), now());
                tx.insert_company(&other)?;
                tx.insert_transaction(&Transaction {
                    id: TransactionId::new(),
                    company_id: other.id,
                    account_id: account.id,
                    category_id: None,
                    amount: Amount::from_minor(100),
                    date: now().date(),
                    description: String::new(),
                    created_by: UserId::new("owner"),
                    created_at: now(),
                    updated_at: now(),
                    lifecycle: Lifecycle::Active,
                })
            })
            .await;
        assert!(matches!(result, Err(LedgerError::ReferentialConflict(_))));
    }
}
