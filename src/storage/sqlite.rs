//! SQLite storage backend
//!
//! Each unit of work borrows a pooled connection on a blocking thread and runs
//! inside `BEGIN IMMEDIATE`, which takes the database write lock up front. Two
//! postings therefore never interleave, and the validator's reads happen under
//! the same lock as the write they gate. A unit whose caller stops waiting
//! still runs to commit or rollback on its thread.

use async_trait::async_trait;
use chrono::NaiveDate;
use rusqlite::types::Type;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row, TransactionBehavior};
use std::str::FromStr;
use uuid::Uuid;

use crate::config::DatabaseSettings;
use crate::ledger::balance::{BalanceSnapshot, SnapshotStatus};
use crate::money::{Amount, Currency};
use crate::storage::migrations::run_migrations;
use crate::storage::pool::{create_pool, DbPool};
use crate::traits::*;
use crate::types::*;

const COMPANY_COLUMNS: &str = "id, name, owner_user_id, created_at, updated_at, deleted_at";
const ACCOUNT_COLUMNS: &str = "id, company_id, name, type, opening_balance, currency, closed_at, \
                               created_at, updated_at, deleted_at";
const CATEGORY_COLUMNS: &str = "id, company_id, name, kind, created_at, updated_at, deleted_at";
const TRANSACTION_COLUMNS: &str = "id, company_id, account_id, category_id, amount, date, \
                                   description, created_by, created_at, updated_at, deleted_at";
const SNAPSHOT_COLUMNS: &str =
    "account_id, company_id, balance, refreshed_at, quarantined_at, derived_balance";

/// Ledger store kept in a SQLite database file
#[derive(Debug, Clone)]
pub struct SqliteStorage {
    pool: DbPool,
}

impl SqliteStorage {
    /// Open (creating if needed) the database file and apply migrations
    pub fn open(settings: &DatabaseSettings) -> LedgerResult<Self> {
        if let Some(dir) = settings.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if !dir.exists() {
                std::fs::create_dir_all(dir).map_err(|e| {
                    LedgerError::Storage(format!("cannot create {}: {}", dir.display(), e))
                })?;
                tracing::info!(path = %dir.display(), "created data directory");
            }
        }

        let pool = create_pool(settings).map_err(pool_error)?;
        let conn = pool.get().map_err(pool_error)?;
        let applied =
            run_migrations(&conn).map_err(|e| LedgerError::Storage(e.to_string()))?;
        tracing::info!(path = %settings.path.display(), applied, "ledger database ready");

        Ok(Self { pool })
    }

    /// Wrap an existing pool whose database is already migrated
    pub fn from_pool(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl LedgerStorage for SqliteStorage {
    async fn atomically<T, F>(&self, work: F) -> LedgerResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn LedgerTx) -> LedgerResult<T> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get().map_err(pool_error)?;
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(sql_error)?;
            // dropping `tx` on the error path rolls back
            let output = work(&mut SqliteUnit { conn: &tx })?;
            tx.commit().map_err(sql_error)?;
            Ok(output)
        })
        .await
        .map_err(|e| LedgerError::StoreUnavailable(format!("store task failed: {e}")))?
    }

    async fn read<T, F>(&self, work: F) -> LedgerResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn LedgerReader) -> LedgerResult<T> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get().map_err(pool_error)?;
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Deferred)
                .map_err(sql_error)?;
            work(&SqliteUnit { conn: &tx })
        })
        .await
        .map_err(|e| LedgerError::StoreUnavailable(format!("store task failed: {e}")))?
    }
}

fn pool_error(e: r2d2::Error) -> LedgerError {
    LedgerError::StoreUnavailable(e.to_string())
}

fn sql_error(e: rusqlite::Error) -> LedgerError {
    if let rusqlite::Error::SqliteFailure(failure, _) = &e {
        match failure.code {
            ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => {
                return LedgerError::StoreUnavailable(e.to_string())
            }
            ErrorCode::ConstraintViolation
                if failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY =>
            {
                return LedgerError::ReferentialConflict(e.to_string())
            }
            _ => {}
        }
    }
    LedgerError::Storage(e.to_string())
}

fn conversion_error<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

fn uuid_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let text: String = row.get(idx)?;
    Uuid::parse_str(&text).map_err(|e| conversion_error(idx, e))
}

fn parsed_at<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = LedgerError>,
{
    let text: String = row.get(idx)?;
    text.parse().map_err(|e| conversion_error(idx, e))
}

fn company_from_row(row: &Row<'_>) -> rusqlite::Result<Company> {
    Ok(Company {
        id: CompanyId::from_uuid(uuid_at(row, 0)?),
        name: row.get(1)?,
        owner_user_id: UserId::new(row.get::<_, String>(2)?),
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
        lifecycle: Lifecycle::from_deleted_at(row.get(5)?),
    })
}

fn account_from_row(row: &Row<'_>) -> rusqlite::Result<Account> {
    let currency: String = row.get(5)?;
    Ok(Account {
        id: AccountId::from_uuid(uuid_at(row, 0)?),
        company_id: CompanyId::from_uuid(uuid_at(row, 1)?),
        name: row.get(2)?,
        account_type: parsed_at(row, 3)?,
        opening_balance: Amount::from_minor(row.get(4)?),
        currency: Currency::new(currency).map_err(|e| conversion_error(5, e))?,
        status: AccountStatus::from_closed_at(row.get(6)?),
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
        lifecycle: Lifecycle::from_deleted_at(row.get(9)?),
    })
}

fn category_from_row(row: &Row<'_>) -> rusqlite::Result<Category> {
    Ok(Category {
        id: CategoryId::from_uuid(uuid_at(row, 0)?),
        company_id: CompanyId::from_uuid(uuid_at(row, 1)?),
        name: row.get(2)?,
        kind: parsed_at(row, 3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
        lifecycle: Lifecycle::from_deleted_at(row.get(6)?),
    })
}

fn transaction_from_row(row: &Row<'_>) -> rusqlite::Result<Transaction> {
    let category_id = match row.get::<_, Option<String>>(3)? {
        Some(text) => Some(CategoryId::from_uuid(
            Uuid::parse_str(&text).map_err(|e| conversion_error(3, e))?,
        )),
        None => None,
    };
    Ok(Transaction {
        id: TransactionId::from_uuid(uuid_at(row, 0)?),
        company_id: CompanyId::from_uuid(uuid_at(row, 1)?),
        account_id: AccountId::from_uuid(uuid_at(row, 2)?),
        category_id,
        amount: Amount::from_minor(row.get(4)?),
        date: row.get(5)?,
        description: row.get(6)?,
        created_by: UserId::new(row.get::<_, String>(7)?),
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
        lifecycle: Lifecycle::from_deleted_at(row.get(10)?),
    })
}

fn snapshot_from_row(row: &Row<'_>) -> rusqlite::Result<BalanceSnapshot> {
    let status = match (row.get(4)?, row.get::<_, Option<i64>>(5)?) {
        (Some(detected_at), Some(derived)) => SnapshotStatus::Quarantined {
            detected_at,
            derived: Amount::from_minor(derived),
        },
        _ => SnapshotStatus::Current,
    };
    Ok(BalanceSnapshot {
        account_id: AccountId::from_uuid(uuid_at(row, 0)?),
        company_id: CompanyId::from_uuid(uuid_at(row, 1)?),
        balance: Amount::from_minor(row.get(2)?),
        refreshed_at: row.get(3)?,
        status,
    })
}

/// One open SQLite transaction seen through the ledger traits
struct SqliteUnit<'a> {
    conn: &'a Connection,
}

impl SqliteUnit<'_> {
    fn query_one<T, P, F>(&self, sql: &str, params: P, map: F) -> LedgerResult<Option<T>>
    where
        P: rusqlite::Params,
        F: FnOnce(&Row<'_>) -> rusqlite::Result<T>,
    {
        let mut stmt = self.conn.prepare_cached(sql).map_err(sql_error)?;
        stmt.query_row(params, map).optional().map_err(sql_error)
    }

    fn query_all<T, P, F>(&self, sql: &str, params: P, map: F) -> LedgerResult<Vec<T>>
    where
        P: rusqlite::Params,
        F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
    {
        let mut stmt = self.conn.prepare_cached(sql).map_err(sql_error)?;
        let rows = stmt.query_map(params, map).map_err(sql_error)?;
        rows.collect::<rusqlite::Result<Vec<T>>>()
            .map_err(sql_error)
    }

    fn execute<P: rusqlite::Params>(&self, sql: &str, params: P) -> LedgerResult<usize> {
        let mut stmt = self.conn.prepare_cached(sql).map_err(sql_error)?;
        stmt.execute(params).map_err(sql_error)
    }

    fn count_referencing(
        &self,
        company_id: CompanyId,
        reference: PostingReference,
        lifecycle_filter: &str,
    ) -> LedgerResult<usize> {
        let (column, id) = match reference {
            PostingReference::Account(id) => ("account_id", id.to_string()),
            PostingReference::Category(id) => ("category_id", id.to_string()),
        };
        let count: Option<i64> = self.query_one(
            &format!(
                "SELECT COUNT(*) FROM transactions \
                 WHERE company_id = ?1 AND {column} = ?2{lifecycle_filter}"
            ),
            params![company_id.to_string(), id],
            |row| row.get(0),
        )?;
        Ok(count.unwrap_or(0) as usize)
    }

    fn expect_updated(changed: usize, entity: EntityKind, id: impl std::fmt::Display) -> LedgerResult<()> {
        if changed == 0 {
            Err(LedgerError::not_found(entity, id))
        } else {
            Ok(())
        }
    }
}

impl LedgerReader for SqliteUnit<'_> {
    fn company(&self, company_id: CompanyId) -> LedgerResult<Option<Company>> {
        self.query_one(
            &format!("SELECT {COMPANY_COLUMNS} FROM companies WHERE id = ?1"),
            params![company_id.to_string()],
            company_from_row,
        )
    }

    fn companies_for_owner(&self, owner: &UserId) -> LedgerResult<Vec<Company>> {
        self.query_all(
            &format!(
                "SELECT {COMPANY_COLUMNS} FROM companies WHERE owner_user_id = ?1 \
                 ORDER BY created_at, id"
            ),
            params![owner.as_str()],
            company_from_row,
        )
    }

    fn account(
        &self,
        company_id: CompanyId,
        account_id: AccountId,
    ) -> LedgerResult<Option<Account>> {
        self.query_one(
            &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = ?1 AND company_id = ?2"),
            params![account_id.to_string(), company_id.to_string()],
            account_from_row,
        )
    }

    fn accounts(&self, company_id: CompanyId) -> LedgerResult<Vec<Account>> {
        self.query_all(
            &format!(
                "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE company_id = ?1 ORDER BY name, id"
            ),
            params![company_id.to_string()],
            account_from_row,
        )
    }

    fn category(
        &self,
        company_id: CompanyId,
        category_id: CategoryId,
    ) -> LedgerResult<Option<Category>> {
        self.query_one(
            &format!(
                "SELECT {CATEGORY_COLUMNS} FROM categories WHERE id = ?1 AND company_id = ?2"
            ),
            params![category_id.to_string(), company_id.to_string()],
            category_from_row,
        )
    }

    fn categories(&self, company_id: CompanyId) -> LedgerResult<Vec<Category>> {
        self.query_all(
            &format!(
                "SELECT {CATEGORY_COLUMNS} FROM categories WHERE company_id = ?1 \
                 ORDER BY name, id"
            ),
            params![company_id.to_string()],
            category_from_row,
        )
    }

    fn transaction(
        &self,
        company_id: CompanyId,
        transaction_id: TransactionId,
    ) -> LedgerResult<Option<Transaction>> {
        self.query_one(
            &format!(
                "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE id = ?1 AND company_id = ?2"
            ),
            params![transaction_id.to_string(), company_id.to_string()],
            transaction_from_row,
        )
    }

    fn account_transactions(
        &self,
        company_id: CompanyId,
        account_id: AccountId,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> LedgerResult<Vec<Transaction>> {
        self.query_all(
            &format!(
                "SELECT {TRANSACTION_COLUMNS} FROM transactions \
                 WHERE company_id = ?1 AND account_id = ?2 \
                   AND (?3 IS NULL OR date >= ?3) AND (?4 IS NULL OR date <= ?4) \
                 ORDER BY date, created_at, id"
            ),
            params![
                company_id.to_string(),
                account_id.to_string(),
                start_date,
                end_date
            ],
            transaction_from_row,
        )
    }

    fn transactions(
        &self,
        company_id: CompanyId,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> LedgerResult<Vec<Transaction>> {
        self.query_all(
            &format!(
                "SELECT {TRANSACTION_COLUMNS} FROM transactions \
                 WHERE company_id = ?1 \
                   AND (?2 IS NULL OR date >= ?2) AND (?3 IS NULL OR date <= ?3) \
                 ORDER BY date, created_at, id"
            ),
            params![company_id.to_string(), start_date, end_date],
            transaction_from_row,
        )
    }

    fn count_postings(
        &self,
        company_id: CompanyId,
        reference: PostingReference,
    ) -> LedgerResult<usize> {
        self.count_referencing(company_id, reference, "")
    }

    fn count_active_postings(
        &self,
        company_id: CompanyId,
        reference: PostingReference,
    ) -> LedgerResult<usize> {
        self.count_referencing(company_id, reference, " AND deleted_at IS NULL")
    }

    fn balance_snapshot(
        &self,
        company_id: CompanyId,
        account_id: AccountId,
    ) -> LedgerResult<Option<BalanceSnapshot>> {
        self.query_one(
            &format!(
                "SELECT {SNAPSHOT_COLUMNS} FROM balance_snapshots \
                 WHERE account_id = ?1 AND company_id = ?2"
            ),
            params![account_id.to_string(), company_id.to_string()],
            snapshot_from_row,
        )
    }
}

impl LedgerTx for SqliteUnit<'_> {
    fn as_reader(&self) -> &dyn LedgerReader {
        self
    }

    fn insert_company(&mut self, company: &Company) -> LedgerResult<()> {
        self.execute(
            &format!("INSERT INTO companies ({COMPANY_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)"),
            params![
                company.id.to_string(),
                company.name,
                company.owner_user_id.as_str(),
                company.created_at,
                company.updated_at,
                company.lifecycle.deleted_at(),
            ],
        )
        .map(|_| ())
    }

    fn update_company(&mut self, company: &Company) -> LedgerResult<()> {
        let changed = self.execute(
            "UPDATE companies SET name = ?2, owner_user_id = ?3, updated_at = ?4, deleted_at = ?5 \
             WHERE id = ?1",
            params![
                company.id.to_string(),
                company.name,
                company.owner_user_id.as_str(),
                company.updated_at,
                company.lifecycle.deleted_at(),
            ],
        )?;
        Self::expect_updated(changed, EntityKind::Company, company.id)
    }

    fn insert_account(&mut self, account: &Account) -> LedgerResult<()> {
        self.execute(
            &format!(
                "INSERT INTO accounts ({ACCOUNT_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
            ),
            params![
                account.id.to_string(),
                account.company_id.to_string(),
                account.name,
                account.account_type.as_str(),
                account.opening_balance.minor_units(),
                account.currency.code(),
                account.status.closed_at(),
                account.created_at,
                account.updated_at,
                account.lifecycle.deleted_at(),
            ],
        )
        .map(|_| ())
    }

    fn update_account(&mut self, account: &Account) -> LedgerResult<()> {
        let changed = self.execute(
            "UPDATE accounts SET name = ?3, type = ?4, opening_balance = ?5, currency = ?6, \
             closed_at = ?7, updated_at = ?8, deleted_at = ?9 \
             WHERE id = ?1 AND company_id = ?2",
            params![
                account.id.to_string(),
                account.company_id.to_string(),
                account.name,
                account.account_type.as_str(),
                account.opening_balance.minor_units(),
                account.currency.code(),
                account.status.closed_at(),
                account.updated_at,
                account.lifecycle.deleted_at(),
            ],
        )?;
        Self::expect_updated(changed, EntityKind::Account, account.id)
    }

    fn insert_category(&mut self, category: &Category) -> LedgerResult<()> {
        self.execute(
            &format!(
                "INSERT INTO categories ({CATEGORY_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
            ),
            params![
                category.id.to_string(),
                category.company_id.to_string(),
                category.name,
                category.kind.as_str(),
                category.created_at,
                category.updated_at,
                category.lifecycle.deleted_at(),
            ],
        )
        .map(|_| ())
    }

    fn update_category(&mut self, category: &Category) -> LedgerResult<()> {
        let changed = self.execute(
            "UPDATE categories SET name = ?3, kind = ?4, updated_at = ?5, deleted_at = ?6 \
             WHERE id = ?1 AND company_id = ?2",
            params![
                category.id.to_string(),
                category.company_id.to_string(),
                category.name,
                category.kind.as_str(),
                category.updated_at,
                category.lifecycle.deleted_at(),
            ],
        )?;
        Self::expect_updated(changed, EntityKind::Category, category.id)
    }

    fn insert_transaction(&mut self, transaction: &Transaction) -> LedgerResult<()> {
        self.execute(
            &format!(
                "INSERT INTO transactions ({TRANSACTION_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
            ),
            params![
                transaction.id.to_string(),
                transaction.company_id.to_string(),
                transaction.account_id.to_string(),
                transaction.category_id.map(|id| id.to_string()),
                transaction.amount.minor_units(),
                transaction.date,
                transaction.description,
                transaction.created_by.as_str(),
                transaction.created_at,
                transaction.updated_at,
                transaction.lifecycle.deleted_at(),
            ],
        )
        .map(|_| ())
    }

    fn update_transaction(&mut self, transaction: &Transaction) -> LedgerResult<()> {
        let changed = self.execute(
            "UPDATE transactions SET account_id = ?3, category_id = ?4, amount = ?5, date = ?6, \
             description = ?7, updated_at = ?8, deleted_at = ?9 \
             WHERE id = ?1 AND company_id = ?2",
            params![
                transaction.id.to_string(),
                transaction.company_id.to_string(),
                transaction.account_id.to_string(),
                transaction.category_id.map(|id| id.to_string()),
                transaction.amount.minor_units(),
                transaction.date,
                transaction.description,
                transaction.updated_at,
                transaction.lifecycle.deleted_at(),
            ],
        )?;
        Self::expect_updated(changed, EntityKind::Transaction, transaction.id)
    }

    fn put_balance_snapshot(&mut self, snapshot: &BalanceSnapshot) -> LedgerResult<()> {
        let (quarantined_at, derived) = match snapshot.status {
            SnapshotStatus::Current => (None, None),
            SnapshotStatus::Quarantined {
                detected_at,
                derived,
            } => (Some(detected_at), Some(derived.minor_units())),
        };
        self.execute(
            &format!(
                "INSERT INTO balance_snapshots ({SNAPSHOT_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
                 ON CONFLICT(account_id) DO UPDATE SET \
                   balance = excluded.balance, \
                   refreshed_at = excluded.refreshed_at, \
                   quarantined_at = excluded.quarantined_at, \
                   derived_balance = excluded.derived_balance"
            ),
            params![
                snapshot.account_id.to_string(),
                snapshot.company_id.to_string(),
                snapshot.balance.minor_units(),
                snapshot.refreshed_at,
                quarantined_at,
                derived,
            ],
        )
        .map(|_| ())
    }
}
