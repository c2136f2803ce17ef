//! Core types and data structures for the ledger engine

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::money::{Amount, Currency};

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generate a fresh random identifier
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl FromStr for $name {
            type Err = LedgerError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::from_str(s)
                    .map(Self)
                    .map_err(|e| LedgerError::Validation(format!("{}: {}", $label, e)))
            }
        }
    };
}

uuid_id!(
    /// Identifier of a company (tenant boundary)
    CompanyId,
    "CompanyId"
);
uuid_id!(
    /// Identifier of an account
    AccountId,
    "AccountId"
);
uuid_id!(
    /// Identifier of a category
    CategoryId,
    "CategoryId"
);
uuid_id!(
    /// Identifier of a transaction
    TransactionId,
    "TransactionId"
);

/// Authenticated user handed over by the session layer
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Soft-delete state shared by every stored entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Lifecycle {
    Active,
    Deleted { at: NaiveDateTime },
}

impl Lifecycle {
    pub fn is_active(&self) -> bool {
        matches!(self, Lifecycle::Active)
    }

    pub fn deleted_at(&self) -> Option<NaiveDateTime> {
        match self {
            Lifecycle::Active => None,
            Lifecycle::Deleted { at } => Some(*at),
        }
    }

    /// Rebuild from a nullable `deleted_at` column
    pub fn from_deleted_at(deleted_at: Option<NaiveDateTime>) -> Self {
        match deleted_at {
            Some(at) => Lifecycle::Deleted { at },
            None => Lifecycle::Active,
        }
    }
}

/// Account types a company can hold money in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccountType {
    /// Assets - bank, cash, receivables
    Asset,
    /// Liabilities - credit cards, loans
    Liability,
}

impl AccountType {
    /// Returns the normal balance type for this account type
    /// Assets normally have debit balances, liabilities credit balances
    pub fn normal_balance(&self) -> EntryType {
        match self {
            AccountType::Asset => EntryType::Debit,
            AccountType::Liability => EntryType::Credit,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AccountType::Asset => "asset",
            AccountType::Liability => "liability",
        }
    }
}

impl FromStr for AccountType {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "asset" => Ok(AccountType::Asset),
            "liability" => Ok(AccountType::Liability),
            other => Err(LedgerError::Validation(format!(
                "unknown account type '{}'",
                other
            ))),
        }
    }
}

/// Direction of a posting relative to an account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryType {
    /// Debit entry - increases Assets, decreases Liabilities
    Debit,
    /// Credit entry - increases Liabilities, decreases Assets
    Credit,
}

impl EntryType {
    /// Sign a magnitude for an account: the normal-balance side increases it
    pub fn signed_for(&self, account_type: AccountType, amount: Amount) -> LedgerResult<Amount> {
        let magnitude = if amount.is_negative() {
            amount
                .checked_neg()
                .ok_or_else(|| LedgerError::OutOfRange(format!("amount {} overflows", amount)))?
        } else {
            amount
        };

        if *self == account_type.normal_balance() {
            Ok(magnitude)
        } else {
            Ok(-magnitude)
        }
    }
}

/// Open/closed state of an account, independent of soft deletion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AccountStatus {
    Open,
    Closed { at: NaiveDateTime },
}

impl AccountStatus {
    pub fn closed_at(&self) -> Option<NaiveDateTime> {
        match self {
            AccountStatus::Open => None,
            AccountStatus::Closed { at } => Some(*at),
        }
    }

    pub fn from_closed_at(closed_at: Option<NaiveDateTime>) -> Self {
        match closed_at {
            Some(at) => AccountStatus::Closed { at },
            None => AccountStatus::Open,
        }
    }
}

/// Whether a category classifies income or expense
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CategoryKind {
    Income,
    Expense,
}

impl CategoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CategoryKind::Income => "income",
            CategoryKind::Expense => "expense",
        }
    }
}

impl FromStr for CategoryKind {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "income" => Ok(CategoryKind::Income),
            "expense" => Ok(CategoryKind::Expense),
            other => Err(LedgerError::Validation(format!(
                "unknown category kind '{}'",
                other
            ))),
        }
    }
}

/// Tenant record; owns accounts, categories and transactions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Company {
    pub id: CompanyId,
    pub name: String,
    pub owner_user_id: UserId,
    pub lifecycle: Lifecycle,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Company {
    /// Create a new company owned by `owner_user_id`
    pub fn new(name: String, owner_user_id: UserId, now: NaiveDateTime) -> Self {
        Self {
            id: CompanyId::new(),
            name,
            owner_user_id,
            lifecycle: Lifecycle::Active,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Money-holding bucket owned by a company
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// Unique identifier for the account
    pub id: AccountId,
    /// Owning company
    pub company_id: CompanyId,
    /// Human-readable account name
    pub name: String,
    /// Asset or liability
    pub account_type: AccountType,
    /// Balance before the first recorded transaction
    pub opening_balance: Amount,
    /// Currency of every amount posted to this account
    pub currency: Currency,
    /// Open or closed for new postings
    pub status: AccountStatus,
    pub lifecycle: Lifecycle,
    /// When the account was created
    pub created_at: NaiveDateTime,
    /// When the account was last updated
    pub updated_at: NaiveDateTime,
}

impl Account {
    /// Create a new open account
    pub fn new(company_id: CompanyId, input: NewAccount, now: NaiveDateTime) -> Self {
        Self {
            id: AccountId::new(),
            company_id,
            name: input.name,
            account_type: input.account_type,
            opening_balance: input.opening_balance,
            currency: input.currency,
            status: AccountStatus::Open,
            lifecycle: Lifecycle::Active,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.status, AccountStatus::Closed { .. })
    }
}

/// Input for creating an account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAccount {
    pub name: String,
    pub account_type: AccountType,
    pub opening_balance: Amount,
    pub currency: Currency,
}

/// Partial update of an account; `None` leaves a field unchanged
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountPatch {
    pub name: Option<String>,
    pub account_type: Option<AccountType>,
    pub opening_balance: Option<Amount>,
    pub currency: Option<Currency>,
}

/// Income/expense label owned by a company
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: CategoryId,
    pub company_id: CompanyId,
    pub name: String,
    pub kind: CategoryKind,
    pub lifecycle: Lifecycle,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Category {
    pub fn new(company_id: CompanyId, name: String, kind: CategoryKind, now: NaiveDateTime) -> Self {
        Self {
            id: CategoryId::new(),
            company_id,
            name,
            kind,
            lifecycle: Lifecycle::Active,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update of a category
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryPatch {
    pub name: Option<String>,
    pub kind: Option<CategoryKind>,
}

/// Atomic financial event posted against one account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Unique identifier for the transaction
    pub id: TransactionId,
    pub company_id: CompanyId,
    pub account_id: AccountId,
    pub category_id: Option<CategoryId>,
    /// Signed amount; positive moves the account toward its normal balance
    pub amount: Amount,
    /// Date when the transaction occurred
    pub date: NaiveDate,
    pub description: String,
    /// User who recorded the transaction
    pub created_by: UserId,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub lifecycle: Lifecycle,
}

impl Transaction {
    /// Posting candidate describing this transaction's effect
    pub fn candidate(&self) -> PostingCandidate {
        PostingCandidate {
            company_id: self.company_id,
            account_id: self.account_id,
            category_id: self.category_id,
            amount: self.amount,
            date: self.date,
        }
    }
}

/// Input for recording a transaction
///
/// The amount is taken as signed unless `entry_type` is given, in which case
/// its magnitude is signed against the account's normal balance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionPayload {
    pub account_id: AccountId,
    pub category_id: Option<CategoryId>,
    pub amount: Amount,
    pub entry_type: Option<EntryType>,
    pub date: NaiveDate,
    pub description: String,
}

/// Partial update of a transaction
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionPatch {
    pub account_id: Option<AccountId>,
    /// `Some(None)` clears the category
    pub category_id: Option<Option<CategoryId>>,
    pub amount: Option<Amount>,
    pub entry_type: Option<EntryType>,
    pub date: Option<NaiveDate>,
    pub description: Option<String>,
}

/// Everything the posting validator needs to judge a write
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostingCandidate {
    pub company_id: CompanyId,
    pub account_id: AccountId,
    pub category_id: Option<CategoryId>,
    pub amount: Amount,
    pub date: NaiveDate,
}

/// Which kind of write a posting candidate is gating
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PostingKind {
    New,
    Edit,
    Restore,
}

/// Reasons the posting validator turns a candidate down
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum Rejection {
    #[error("referential conflict: {0}")]
    ReferentialConflict(String),
    #[error("out of range: {0}")]
    OutOfRange(String),
    #[error("account closed: {0}")]
    AccountClosed(String),
}

/// Outcome of validating a posting candidate
pub type Verdict = Result<(), Rejection>;

/// Entity kinds named in `NotFound` errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityKind {
    Company,
    Account,
    Category,
    Transaction,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EntityKind::Company => "company",
            EntityKind::Account => "account",
            EntityKind::Category => "category",
            EntityKind::Transaction => "transaction",
        })
    }
}

/// Errors that can occur in the ledger system
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// Unknown id, or an id that belongs to another company
    #[error("{entity} not found: {id}")]
    NotFound { entity: EntityKind, id: String },
    #[error("referential conflict: {0}")]
    ReferentialConflict(String),
    #[error("out of range: {0}")]
    OutOfRange(String),
    #[error("account closed: {0}")]
    AccountClosed(String),
    /// Transient; the caller may retry with backoff
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("balance drift on account {account_id}: cached {cached:?}, derived {derived}")]
    DataIntegrity {
        account_id: AccountId,
        cached: Option<Amount>,
        derived: Amount,
    },
    #[error("validation error: {0}")]
    Validation(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl LedgerError {
    pub fn not_found(entity: EntityKind, id: impl fmt::Display) -> Self {
        LedgerError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Only store outages are worth retrying
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::StoreUnavailable(_))
    }
}

impl From<Rejection> for LedgerError {
    fn from(rejection: Rejection) -> Self {
        match rejection {
            Rejection::ReferentialConflict(msg) => LedgerError::ReferentialConflict(msg),
            Rejection::OutOfRange(msg) => LedgerError::OutOfRange(msg),
            Rejection::AccountClosed(msg) => LedgerError::AccountClosed(msg),
        }
    }
}

/// Result type for ledger operations
pub type LedgerResult<T> = Result<T, LedgerError>;
