//! Basic ledger usage example

use chrono::{Duration, Local};
use ledger_core::{
    telemetry, AccountType, Amount, CategoryKind, Currency, EntryType, Granularity, GroupBy,
    Ledger, LedgerConfig, NewAccount, SqliteStorage, TransactionPayload, UserId,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = LedgerConfig::from_env()?;
    telemetry::init(&config.logging);

    println!("🧾 Ledger Core - Basic Ledger Example\n");
    println!("📁 Database: {}\n", config.database.path.display());

    let storage = SqliteStorage::open(&config.database)?;
    let ledger = Ledger::with_policy(storage, config.posting.clone());

    // 1. A company and its books
    let owner = UserId::new("demo-user");
    let company = ledger.create_company(&owner, "Corner Bakery").await?;
    println!("🏢 Created company: {} ({})", company.name, company.id);

    let usd = Currency::new("USD")?;
    let checking = ledger
        .create_account(
            company.id,
            NewAccount {
                name: "Checking".to_string(),
                account_type: AccountType::Asset,
                opening_balance: Amount::parse("100.00", &usd)?,
                currency: usd.clone(),
            },
        )
        .await?;
    let card = ledger
        .create_account(
            company.id,
            NewAccount {
                name: "Business card".to_string(),
                account_type: AccountType::Liability,
                opening_balance: Amount::ZERO,
                currency: usd.clone(),
            },
        )
        .await?;
    println!("  ✓ Accounts: {}, {}", checking.name, card.name);

    let sales = ledger
        .create_category(company.id, "Sales", CategoryKind::Income)
        .await?;
    let supplies = ledger
        .create_category(company.id, "Supplies", CategoryKind::Expense)
        .await?;
    println!("  ✓ Categories: {}, {}\n", sales.name, supplies.name);

    // 2. Record activity for today
    println!("💰 Recording transactions...");
    let today = Local::now().date_naive();

    let sale = ledger
        .create_transaction(
            company.id,
            &owner,
            TransactionPayload {
                account_id: checking.id,
                category_id: Some(sales.id),
                amount: Amount::parse("250.00", &usd)?,
                entry_type: None,
                date: today,
                description: "Morning sales".to_string(),
            },
        )
        .await?;
    println!("  ✓ Sale of {} recorded", sale.amount.to_decimal(&usd));

    let flour = ledger
        .create_transaction(
            company.id,
            &owner,
            TransactionPayload {
                account_id: card.id,
                category_id: Some(supplies.id),
                amount: Amount::parse("42.50", &usd)?,
                entry_type: Some(EntryType::Credit),
                date: today,
                description: "Flour on the card".to_string(),
            },
        )
        .await?;
    println!("  ✓ Card purchase of {} recorded", flour.amount.to_decimal(&usd));

    // A typo'd entry, deleted and then restored
    let mistake = ledger
        .create_transaction(
            company.id,
            &owner,
            TransactionPayload {
                account_id: checking.id,
                category_id: None,
                amount: Amount::parse("-9.99", &usd)?,
                entry_type: None,
                date: today,
                description: "Coffee".to_string(),
            },
        )
        .await?;
    ledger
        .soft_delete_transaction(company.id, mistake.id)
        .await?;
    ledger.restore_transaction(company.id, mistake.id).await?;
    println!("  ✓ Deleted and restored transaction {}\n", mistake.id);

    // A posting too far in the future is turned away
    let rejected = ledger
        .create_transaction(
            company.id,
            &owner,
            TransactionPayload {
                account_id: checking.id,
                category_id: None,
                amount: Amount::parse("1.00", &usd)?,
                entry_type: None,
                date: today + Duration::days(30),
                description: "Next month".to_string(),
            },
        )
        .await;
    if let Err(err) = rejected {
        println!("🚫 Rejected as expected: {}\n", err);
    }

    // 3. Balances
    println!("📊 Balances:");
    for account in ledger.list_accounts(company.id).await? {
        let balance = ledger
            .get_account_balance(company.id, account.id, None)
            .await?;
        println!(
            "  {:<16} {:>12} {}",
            account.name,
            balance.to_decimal(&account.currency),
            account.currency
        );
    }
    println!();

    // 4. Report since the company was created
    println!("📈 Daily report by category:");
    let report = ledger
        .get_report_since_creation(company.id, Granularity::Day, GroupBy::Category)
        .await?;
    for bucket in report.buckets() {
        println!(
            "  {} .. {}  income {}  expense {}  net {}",
            bucket.start,
            bucket.end,
            bucket.total_income.to_decimal(&usd),
            bucket.total_expense.to_decimal(&usd),
            bucket.net.to_decimal(&usd)
        );
        for line in &bucket.lines {
            println!(
                "    {:<14} +{} -{}",
                line.label,
                line.income.to_decimal(&usd),
                line.expense.to_decimal(&usd)
            );
        }
    }
    println!();

    // 5. Integrity check
    let reconciliation = ledger.reconcile(company.id).await?;
    println!(
        "🔍 Reconciliation checked {} accounts: {}",
        reconciliation.checked,
        if reconciliation.is_clean() {
            "books are clean"
        } else {
            "drift found"
        }
    );

    println!("\n✅ Example completed successfully!");
    Ok(())
}
