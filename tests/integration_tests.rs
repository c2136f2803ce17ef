//! Integration tests for ledger-core

use chrono::{Duration, NaiveDate};
use ledger_core::{
    Account, AccountPatch, AccountType, Amount, BalanceView, Category, CategoryKind, CategoryPatch, Company, CompanyId,
    Currency, DatabaseSettings, DefaultPostingValidator, FixedClock, Granularity, GroupBy,
    GroupKey, Ledger, LedgerError, LedgerStorage, MemoryStorage, NewAccount, PostingCandidate,
    PostingKind, PostingPolicy, Rejection, ReportPeriod, SqliteStorage, TransactionPatch,
    TransactionPayload, UserId,
};
use proptest::prelude::*;
use std::sync::Arc;

fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

struct Books<S: LedgerStorage> {
    ledger: Ledger<S>,
    clock: Arc<FixedClock>,
    owner: UserId,
    company: Company,
    checking: Account,
}

async fn books<S: LedgerStorage + Clone>(storage: S, created: NaiveDate) -> Books<S> {
    let clock = Arc::new(FixedClock::at_date(created));
    let validator = Arc::new(DefaultPostingValidator::new(
        PostingPolicy::default(),
        clock.clone(),
    ));
    let ledger = Ledger::with_parts(storage, validator, clock.clone());
    let owner = UserId::new("owner-1");
    let company = ledger.create_company(&owner, "Acme Ltda").await.unwrap();
    let checking = ledger
        .create_account(
            company.id,
            NewAccount {
                name: "Checking".to_string(),
                account_type: AccountType::Asset,
                opening_balance: Amount::from_minor(10000),
                currency: Currency::new("USD").unwrap(),
            },
        )
        .await
        .unwrap();
    Books {
        ledger,
        clock,
        owner,
        company,
        checking,
    }
}

fn payload(account_id: ledger_core::AccountId, amount: i64, date: NaiveDate) -> TransactionPayload {
    TransactionPayload {
        account_id,
        category_id: None,
        amount: Amount::from_minor(amount),
        entry_type: None,
        date,
        description: String::new(),
    }
}

fn sqlite_storage() -> (tempfile::TempDir, SqliteStorage) {
    let dir = tempfile::tempdir().expect("temp dir");
    let settings = DatabaseSettings {
        path: dir.path().join("data").join("database.sqlite"),
        ..DatabaseSettings::default()
    };
    let storage = SqliteStorage::open(&settings).expect("open sqlite storage");
    (dir, storage)
}

async fn checking_scenario<S: LedgerStorage + Clone>(storage: S) {
    let b = books(storage, day(2024, 1, 1)).await;
    b.clock.set(day(2024, 1, 31).and_hms_opt(12, 0, 0).unwrap());
    let company_id = b.company.id;

    let rent = b
        .ledger
        .create_transaction(company_id, &b.owner, payload(b.checking.id, -2500, day(2024, 1, 5)))
        .await
        .unwrap();
    let balance = b.ledger.get_account_balance(company_id, b.checking.id, None).await;
    assert_eq!(balance.unwrap(), Amount::from_minor(7500));

    b.ledger
        .create_transaction(company_id, &b.owner, payload(b.checking.id, 5000, day(2024, 1, 9)))
        .await
        .unwrap();
    let balance = b.ledger.get_account_balance(company_id, b.checking.id, None).await;
    assert_eq!(balance.unwrap(), Amount::from_minor(12500));

    b.ledger
        .soft_delete_transaction(company_id, rent.id)
        .await
        .unwrap();
    let balance = b.ledger.get_account_balance(company_id, b.checking.id, None).await;
    assert_eq!(balance.unwrap(), Amount::from_minor(15000));

    // the cached book balance followed every write
    let book = b
        .ledger
        .get_book_balance(company_id, b.checking.id)
        .await
        .unwrap();
    assert_eq!(book.balance, Amount::from_minor(15000));

    // the deleted row is retained for audit
    let audited = b.ledger.get_transaction(company_id, rent.id).await.unwrap();
    assert!(!audited.lifecycle.is_active());
    assert!(b.ledger.reconcile(company_id).await.unwrap().is_clean());
}

#[tokio::test]
async fn test_checking_scenario_in_memory() {
    checking_scenario(MemoryStorage::new()).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_checking_scenario_on_sqlite() {
    let (_dir, storage) = sqlite_storage();
    checking_scenario(storage).await;
}

#[tokio::test]
async fn test_posting_to_another_company_is_referential_conflict() {
    let b = books(MemoryStorage::new(), day(2024, 2, 1)).await;
    let other = b
        .ledger
        .create_company(&UserId::new("owner-2"), "Other Co")
        .await
        .unwrap();

    let err = b
        .ledger
        .create_transaction(other.id, &b.owner, payload(b.checking.id, 100, day(2024, 2, 1)))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::ReferentialConflict(_)));

    // the other tenant cannot even see the account
    let err = b
        .ledger
        .get_account(other.id, b.checking.id)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::NotFound { .. }));
    let err = b
        .ledger
        .get_account_balance(other.id, b.checking.id, None)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::NotFound { .. }));
}

#[tokio::test]
async fn test_foreign_category_is_referential_conflict() {
    let b = books(MemoryStorage::new(), day(2024, 2, 1)).await;
    let other = b
        .ledger
        .create_company(&b.owner, "Side business")
        .await
        .unwrap();
    let foreign: Category = b
        .ledger
        .create_category(other.id, "Consulting", CategoryKind::Income)
        .await
        .unwrap();

    let mut p = payload(b.checking.id, 100, day(2024, 2, 1));
    p.category_id = Some(foreign.id);
    let err = b
        .ledger
        .create_transaction(b.company.id, &b.owner, p)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::ReferentialConflict(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_posts_on_sqlite_both_apply() {
    let (_dir, storage) = sqlite_storage();
    let b = books(storage, day(2024, 3, 1)).await;
    let ledger = Arc::new(b.ledger);
    let company_id = b.company.id;
    let account_id = b.checking.id;

    let mut handles = Vec::new();
    for amount in [-2500i64, 5000, 125, -75, 300, 1] {
        let ledger = Arc::clone(&ledger);
        let owner = b.owner.clone();
        handles.push(tokio::spawn(async move {
            ledger
                .create_transaction(company_id, &owner, payload(account_id, amount, day(2024, 3, 1)))
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let expected = Amount::from_minor(10000 - 2500 + 5000 + 125 - 75 + 300 + 1);
    assert_eq!(
        ledger
            .get_account_balance(company_id, account_id, None)
            .await
            .unwrap(),
        expected
    );
    assert_eq!(
        ledger
            .get_book_balance(company_id, account_id)
            .await
            .unwrap()
            .balance,
        expected
    );
    assert!(ledger.reconcile(company_id).await.unwrap().is_clean());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_busy_database_is_retryable_store_unavailable() {
    let dir = tempfile::tempdir().expect("temp dir");
    let settings = DatabaseSettings {
        path: dir.path().join("database.sqlite"),
        busy_timeout_ms: 50,
        ..DatabaseSettings::default()
    };
    let storage = SqliteStorage::open(&settings).expect("open sqlite storage");
    let b = books(storage, day(2024, 11, 1)).await;

    // another process holds the write lock
    let blocker = rusqlite::Connection::open(&settings.path).expect("second connection");
    blocker.execute_batch("BEGIN IMMEDIATE;").expect("take write lock");

    let err = b
        .ledger
        .create_transaction(b.company.id, &b.owner, payload(b.checking.id, 100, day(2024, 11, 1)))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::StoreUnavailable(_)));
    assert!(err.is_retryable());

    // readers are not blocked by the writer
    assert_eq!(
        b.ledger
            .get_account_balance(b.company.id, b.checking.id, None)
            .await
            .unwrap(),
        Amount::from_minor(10000)
    );

    blocker.execute_batch("ROLLBACK;").expect("release write lock");
    b.ledger
        .create_transaction(b.company.id, &b.owner, payload(b.checking.id, 100, day(2024, 11, 1)))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_concurrent_posts_in_memory_both_apply() {
    let b = books(MemoryStorage::new(), day(2024, 3, 1)).await;
    let (first, second) = tokio::join!(
        b.ledger
            .create_transaction(b.company.id, &b.owner, payload(b.checking.id, 700, day(2024, 3, 1))),
        b.ledger
            .create_transaction(b.company.id, &b.owner, payload(b.checking.id, -200, day(2024, 3, 1))),
    );
    first.unwrap();
    second.unwrap();

    let book = b
        .ledger
        .get_book_balance(b.company.id, b.checking.id)
        .await
        .unwrap();
    assert_eq!(book.balance, Amount::from_minor(10500));
}

#[tokio::test]
async fn test_validate_posting_is_idempotent_and_side_effect_free() {
    let b = books(MemoryStorage::new(), day(2024, 4, 1)).await;
    let candidate = PostingCandidate {
        company_id: b.company.id,
        account_id: b.checking.id,
        category_id: None,
        amount: Amount::from_minor(4200),
        date: day(2024, 4, 1),
    };

    let first = b
        .ledger
        .validate_posting(candidate.clone(), PostingKind::New)
        .await
        .unwrap();
    let second = b
        .ledger
        .validate_posting(candidate.clone(), PostingKind::New)
        .await
        .unwrap();
    assert_eq!(first, Ok(()));
    assert_eq!(first, second);

    let too_late = PostingCandidate {
        date: day(2024, 4, 3),
        ..candidate
    };
    assert!(matches!(
        b.ledger
            .validate_posting(too_late, PostingKind::New)
            .await
            .unwrap(),
        Err(Rejection::OutOfRange(_))
    ));

    // nothing was written
    assert!(b
        .ledger
        .list_transactions(b.company.id, None, None)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_report_has_every_bucket_since_creation() {
    let b = books(MemoryStorage::new(), day(2024, 1, 15)).await;
    let company_id = b.company.id;
    b.clock.set(day(2024, 2, 10).and_hms_opt(9, 0, 0).unwrap());

    let groceries = b
        .ledger
        .create_category(company_id, "Groceries", CategoryKind::Expense)
        .await
        .unwrap();
    let mut p = payload(b.checking.id, -1200, day(2024, 1, 24));
    p.category_id = Some(groceries.id);
    b.ledger
        .create_transaction(company_id, &b.owner, p)
        .await
        .unwrap();

    // an account opened mid-period still gets a line in every bucket
    b.ledger
        .create_account(
            company_id,
            NewAccount {
                name: "Savings".to_string(),
                account_type: AccountType::Asset,
                opening_balance: Amount::ZERO,
                currency: Currency::new("USD").unwrap(),
            },
        )
        .await
        .unwrap();

    let report = b
        .ledger
        .get_report_since_creation(company_id, Granularity::Week, GroupBy::Account)
        .await
        .unwrap();
    let buckets: Vec<_> = report.buckets().collect();

    // Jan 15 (Mon) .. Feb 10 (Sat): four whole weeks
    assert_eq!(buckets.len(), 4);
    assert_eq!(buckets.first().unwrap().start, day(2024, 1, 15));
    assert_eq!(buckets.last().unwrap().end, day(2024, 2, 10));
    assert!(buckets.iter().all(|bucket| bucket.lines.len() == 2));
    assert_eq!(buckets[1].total_expense, Amount::from_minor(1200));
    for empty in [&buckets[0], &buckets[2], &buckets[3]] {
        assert!(empty.total_income.is_zero() && empty.total_expense.is_zero());
    }

    // restartable and stable for unchanged data
    let again: Vec<_> = report.buckets().collect();
    assert_eq!(buckets, again);
    let period = ReportPeriod::new(day(2024, 1, 15), day(2024, 2, 10), Granularity::Week).unwrap();
    let fresh = b
        .ledger
        .get_report(company_id, period, GroupBy::Account)
        .await
        .unwrap();
    assert_eq!(fresh.buckets().collect::<Vec<_>>(), buckets);
}

#[tokio::test]
async fn test_category_report_on_sqlite() {
    let (_dir, storage) = sqlite_storage();
    let b = books(storage, day(2024, 5, 1)).await;
    let company_id = b.company.id;
    b.clock.set(day(2024, 6, 30).and_hms_opt(0, 0, 0).unwrap());

    let sales = b
        .ledger
        .create_category(company_id, "Sales", CategoryKind::Income)
        .await
        .unwrap();
    let mut sale = payload(b.checking.id, 9000, day(2024, 6, 3));
    sale.category_id = Some(sales.id);
    b.ledger
        .create_transaction(company_id, &b.owner, sale)
        .await
        .unwrap();
    b.ledger
        .create_transaction(company_id, &b.owner, payload(b.checking.id, -400, day(2024, 5, 20)))
        .await
        .unwrap();

    let period = ReportPeriod::new(day(2024, 5, 1), day(2024, 6, 30), Granularity::Month).unwrap();
    let report = b
        .ledger
        .get_report(company_id, period, GroupBy::Category)
        .await
        .unwrap();
    let buckets: Vec<_> = report.buckets().collect();

    assert_eq!(buckets.len(), 2);
    let may = &buckets[0];
    let uncategorized = may
        .lines
        .iter()
        .find(|l| l.group == GroupKey::Uncategorized)
        .unwrap();
    assert_eq!(uncategorized.expense, Amount::from_minor(400));
    assert_eq!(buckets[1].total_income, Amount::from_minor(9000));
    assert_eq!(buckets[1].net, Amount::from_minor(9000));
}

#[tokio::test]
async fn test_closed_account_rules() {
    let b = books(MemoryStorage::new(), day(2024, 6, 1)).await;
    let company_id = b.company.id;
    let posted = b
        .ledger
        .create_transaction(company_id, &b.owner, payload(b.checking.id, -900, day(2024, 6, 1)))
        .await
        .unwrap();

    b.ledger
        .close_account(company_id, b.checking.id)
        .await
        .unwrap();

    let err = b
        .ledger
        .create_transaction(company_id, &b.owner, payload(b.checking.id, 100, day(2024, 6, 1)))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::AccountClosed(_)));

    // corrections are still possible during the grace period
    b.clock.advance(Duration::days(10));
    let corrected = b
        .ledger
        .update_transaction(
            company_id,
            posted.id,
            TransactionPatch {
                amount: Some(Amount::from_minor(-950)),
                ..TransactionPatch::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(corrected.amount, Amount::from_minor(-950));

    b.clock.advance(Duration::days(30));
    let err = b
        .ledger
        .update_transaction(
            company_id,
            posted.id,
            TransactionPatch {
                description: Some("late fix".to_string()),
                ..TransactionPatch::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::AccountClosed(_)));

    b.ledger
        .reopen_account(company_id, b.checking.id)
        .await
        .unwrap();
    b.ledger
        .create_transaction(company_id, &b.owner, payload(b.checking.id, 100, day(2024, 7, 11)))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_drift_quarantines_account_until_rebuilt() {
    let b = books(MemoryStorage::new(), day(2024, 8, 1)).await;
    let company_id = b.company.id;
    let account_id = b.checking.id;

    // corrupt the cached balance behind the engine's back
    b.ledger
        .storage()
        .atomically(move |tx| {
            let now = day(2024, 8, 1).and_hms_opt(0, 0, 0).unwrap();
            let mut snapshot = BalanceView::rebuild(tx, company_id, account_id, now)?;
            snapshot.balance = Amount::from_minor(1);
            tx.put_balance_snapshot(&snapshot)
        })
        .await
        .unwrap();

    let report = b.ledger.reconcile(company_id).await.unwrap();
    assert_eq!(report.drifts.len(), 1);
    assert!(matches!(
        report.into_result(),
        Err(LedgerError::DataIntegrity { account_id: id, .. }) if id == account_id
    ));

    let err = b
        .ledger
        .create_transaction(company_id, &b.owner, payload(account_id, 100, day(2024, 8, 1)))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::DataIntegrity { .. }));

    let rebuilt = b
        .ledger
        .rebuild_account_balance(company_id, account_id)
        .await
        .unwrap();
    assert_eq!(rebuilt, Amount::from_minor(10000));

    b.ledger
        .create_transaction(company_id, &b.owner, payload(account_id, 100, day(2024, 8, 1)))
        .await
        .unwrap();
    assert!(b.ledger.reconcile(company_id).await.unwrap().is_clean());
}

#[tokio::test]
async fn test_restore_revalidates() {
    let b = books(MemoryStorage::new(), day(2024, 9, 1)).await;
    let company_id = b.company.id;
    let t = b
        .ledger
        .create_transaction(company_id, &b.owner, payload(b.checking.id, 300, day(2024, 9, 1)))
        .await
        .unwrap();
    b.ledger.soft_delete_transaction(company_id, t.id).await.unwrap();

    // the account is gone by the time someone tries to restore
    b.ledger.delete_account(company_id, b.checking.id).await.unwrap();
    let err = b
        .ledger
        .restore_transaction(company_id, t.id)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::ReferentialConflict(_)));
}

#[tokio::test]
async fn test_deleted_postings_pin_currency_and_kind() {
    let b = books(MemoryStorage::new(), day(2024, 9, 1)).await;
    let company_id = b.company.id;
    let sales = b
        .ledger
        .create_category(company_id, "Sales", CategoryKind::Income)
        .await
        .unwrap();
    let mut sale = payload(b.checking.id, 5000, day(2024, 9, 1));
    sale.category_id = Some(sales.id);
    let t = b
        .ledger
        .create_transaction(company_id, &b.owner, sale)
        .await
        .unwrap();
    b.ledger.soft_delete_transaction(company_id, t.id).await.unwrap();

    let err = b
        .ledger
        .update_account(
            company_id,
            b.checking.id,
            AccountPatch {
                currency: Some(Currency::new("JPY").unwrap()),
                ..AccountPatch::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::ReferentialConflict(_)));

    let err = b
        .ledger
        .update_category(
            company_id,
            sales.id,
            CategoryPatch {
                kind: Some(CategoryKind::Expense),
                ..CategoryPatch::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::ReferentialConflict(_)));

    // the restored posting means what it meant when it was recorded
    b.ledger.restore_transaction(company_id, t.id).await.unwrap();
    let account = b.ledger.get_account(company_id, b.checking.id).await.unwrap();
    assert_eq!(account.currency.code(), "USD");
    assert_eq!(
        b.ledger
            .get_account_balance(company_id, b.checking.id, None)
            .await
            .unwrap(),
        Amount::from_minor(15000)
    );
}

#[tokio::test]
async fn test_entities_serialize_to_json() {
    let b = books(MemoryStorage::new(), day(2024, 10, 1)).await;
    let t = b
        .ledger
        .create_transaction(b.company.id, &b.owner, payload(b.checking.id, -2500, day(2024, 10, 1)))
        .await
        .unwrap();

    let json = serde_json::to_value(&t).unwrap();
    assert_eq!(json["amount"], serde_json::json!(-2500));
    assert_eq!(json["lifecycle"]["state"], "active");
    assert_eq!(json["account_id"], serde_json::json!(b.checking.id.to_string()));

    let account_json = serde_json::to_value(&b.checking).unwrap();
    assert_eq!(account_json["currency"], "USD");
    assert_eq!(account_json["status"]["status"], "open");

    let back: ledger_core::Transaction = serde_json::from_value(json).unwrap();
    assert_eq!(back, t);
}

#[tokio::test]
async fn test_list_companies_is_owner_scoped() {
    let b = books(MemoryStorage::new(), day(2024, 1, 1)).await;
    let stranger = UserId::new("owner-2");
    b.ledger.create_company(&stranger, "Theirs").await.unwrap();

    let mine = b.ledger.list_companies(&b.owner).await.unwrap();
    assert_eq!(mine.iter().map(|c| c.id).collect::<Vec<CompanyId>>(), vec![b.company.id]);
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        ..ProptestConfig::default()
    })]

    /// Property: the balance is opening plus every non-deleted amount, whatever
    /// order the postings arrive in.
    #[test]
    fn balance_is_independent_of_insertion_order(
        (amounts, order) in prop::collection::vec(
            prop_oneof![-1_000_000i64..-1, 1i64..1_000_000],
            1..12,
        )
        .prop_flat_map(|amounts| {
            let n = amounts.len();
            (Just(amounts), Just((0..n).collect::<Vec<usize>>()).prop_shuffle())
        }),
        deleted in prop::collection::vec(any::<bool>(), 12),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        runtime.block_on(async {
            let b = books(MemoryStorage::new(), day(2024, 1, 1)).await;
            let company_id = b.company.id;

            let mut expected = 10000i64;
            for &i in &order {
                let t = b
                    .ledger
                    .create_transaction(company_id, &b.owner, payload(b.checking.id, amounts[i], day(2024, 1, 1)))
                    .await
                    .unwrap();
                if deleted[i] {
                    b.ledger.soft_delete_transaction(company_id, t.id).await.unwrap();
                } else {
                    expected += amounts[i];
                }
            }

            let balance = b
                .ledger
                .get_account_balance(company_id, b.checking.id, None)
                .await
                .unwrap();
            assert_eq!(balance, Amount::from_minor(expected));
            let book = b.ledger.get_book_balance(company_id, b.checking.id).await.unwrap();
            assert_eq!(book.balance, Amount::from_minor(expected));
        });
    }
}
