//! Time-bucketed income and expense reports
//!
//! A [`Report`] holds the postings of one period and computes its buckets on
//! demand: [`Report::buckets`] returns a fresh iterator each time, so a report
//! can be walked any number of times and always yields the same buckets.

use chrono::{Datelike, Duration, Months, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::iter::FusedIterator;
use std::sync::Arc;

use crate::money::Amount;
use crate::traits::*;
use crate::types::*;

/// Width of one report bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Granularity {
    Day,
    /// ISO weeks, Monday to Sunday
    Week,
    Month,
    Quarter,
    Year,
}

impl Granularity {
    /// First day of the calendar bucket containing `date`
    pub fn floor(&self, date: NaiveDate) -> NaiveDate {
        match self {
            Granularity::Day => date,
            Granularity::Week => date
                .checked_sub_signed(Duration::days(i64::from(
                    date.weekday().num_days_from_monday(),
                )))
                .unwrap_or(date),
            Granularity::Month => date.with_day(1).unwrap_or(date),
            Granularity::Quarter => {
                let month = (date.month0() / 3) * 3 + 1;
                NaiveDate::from_ymd_opt(date.year(), month, 1).unwrap_or(date)
            }
            Granularity::Year => NaiveDate::from_ymd_opt(date.year(), 1, 1).unwrap_or(date),
        }
    }

    /// First day of the bucket after the one containing `date`
    fn next_start(&self, date: NaiveDate) -> Option<NaiveDate> {
        match self {
            Granularity::Day => date.succ_opt(),
            Granularity::Week => {
                let into_week = i64::from(date.weekday().num_days_from_monday());
                date.checked_add_signed(Duration::days(7 - into_week))
            }
            Granularity::Month => self.floor(date).checked_add_months(Months::new(1)),
            Granularity::Quarter => self.floor(date).checked_add_months(Months::new(3)),
            Granularity::Year => self.floor(date).checked_add_months(Months::new(12)),
        }
    }
}

/// Inclusive date range split into calendar buckets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportPeriod {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub granularity: Granularity,
}

impl ReportPeriod {
    pub fn new(start: NaiveDate, end: NaiveDate, granularity: Granularity) -> LedgerResult<Self> {
        if start > end {
            return Err(LedgerError::Validation(format!(
                "report period starts {} after it ends {}",
                start, end
            )));
        }
        Ok(Self {
            start,
            end,
            granularity,
        })
    }

    /// Period from the day a company was created through `today`
    pub fn since_company_creation(
        company: &Company,
        today: NaiveDate,
        granularity: Granularity,
    ) -> LedgerResult<Self> {
        Self::new(company.created_at.date(), today, granularity)
    }

    /// Start and end of every bucket, clamped to the period
    pub fn bucket_ranges(&self) -> BucketRanges {
        BucketRanges {
            period: *self,
            next: Some(self.start),
        }
    }
}

/// Iterator over the `(start, end)` dates of a period's buckets
#[derive(Debug, Clone)]
pub struct BucketRanges {
    period: ReportPeriod,
    next: Option<NaiveDate>,
}

impl Iterator for BucketRanges {
    type Item = (NaiveDate, NaiveDate);

    fn next(&mut self) -> Option<Self::Item> {
        let start = self.next.filter(|d| *d <= self.period.end)?;
        let following = self.period.granularity.next_start(start);
        let end = following
            .and_then(|d| d.pred_opt())
            .map_or(self.period.end, |d| d.min(self.period.end));
        self.next = following;
        Some((start, end))
    }
}

impl FusedIterator for BucketRanges {}

/// What each report line totals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupBy {
    Account,
    Category,
}

/// Identity of a report line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GroupKey {
    Account(AccountId),
    Category(CategoryId),
    Uncategorized,
}

/// Totals of one group within one bucket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportLine {
    pub group: GroupKey,
    pub label: String,
    pub income: Amount,
    pub expense: Amount,
    pub net: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportBucket {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub lines: Vec<ReportLine>,
    pub total_income: Amount,
    pub total_expense: Amount,
    pub net: Amount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Income,
    Expense,
}

#[derive(Debug, Clone)]
struct Posting {
    date: NaiveDate,
    group: usize,
    side: Side,
    amount: i64,
}

#[derive(Debug, Clone)]
struct Group {
    key: GroupKey,
    label: String,
}

/// Income/expense report over a period
///
/// Amounts of accounts in different currencies are added as raw minor units.
#[derive(Debug, Clone)]
pub struct Report {
    company_id: CompanyId,
    period: ReportPeriod,
    group_by: GroupBy,
    groups: Arc<[Group]>,
    // sorted by date
    postings: Arc<[Posting]>,
}

impl Report {
    fn build(
        company_id: CompanyId,
        period: ReportPeriod,
        group_by: GroupBy,
        accounts: Vec<Account>,
        categories: Vec<Category>,
        transactions: Vec<Transaction>,
    ) -> LedgerResult<Self> {
        let transactions: Vec<Transaction> = transactions
            .into_iter()
            .filter(|t| t.lifecycle.is_active())
            .filter(|t| t.date >= period.start && t.date <= period.end)
            .collect();

        // every partial sum below is bounded by this total
        let volume: u128 = transactions
            .iter()
            .map(|t| u128::from(t.amount.magnitude()))
            .sum();
        if volume > i64::MAX as u128 {
            return Err(LedgerError::OutOfRange(
                "report volume exceeds the representable amount range".to_string(),
            ));
        }

        let kinds: HashMap<CategoryId, CategoryKind> =
            categories.iter().map(|c| (c.id, c.kind)).collect();

        let groups: Vec<Group> = match group_by {
            GroupBy::Account => {
                let used: HashSet<AccountId> = transactions.iter().map(|t| t.account_id).collect();
                accounts
                    .iter()
                    .filter(|a| a.lifecycle.is_active() || used.contains(&a.id))
                    .map(|a| Group {
                        key: GroupKey::Account(a.id),
                        label: a.name.clone(),
                    })
                    .collect()
            }
            GroupBy::Category => {
                let used: HashSet<CategoryId> =
                    transactions.iter().filter_map(|t| t.category_id).collect();
                let mut groups: Vec<Group> = categories
                    .iter()
                    .filter(|c| c.lifecycle.is_active() || used.contains(&c.id))
                    .map(|c| Group {
                        key: GroupKey::Category(c.id),
                        label: c.name.clone(),
                    })
                    .collect();
                if transactions.iter().any(|t| t.category_id.is_none()) {
                    groups.push(Group {
                        key: GroupKey::Uncategorized,
                        label: "Uncategorized".to_string(),
                    });
                }
                groups
            }
        };
        let index: HashMap<GroupKey, usize> =
            groups.iter().enumerate().map(|(i, g)| (g.key, i)).collect();

        let mut postings = Vec::with_capacity(transactions.len());
        for t in &transactions {
            let key = match group_by {
                GroupBy::Account => GroupKey::Account(t.account_id),
                GroupBy::Category => t.category_id.map_or(GroupKey::Uncategorized, GroupKey::Category),
            };
            let Some(&group) = index.get(&key) else {
                return Err(LedgerError::Storage(format!(
                    "transaction {} references a {:?} missing from company {}",
                    t.id, key, company_id
                )));
            };
            let side = match t.category_id.and_then(|id| kinds.get(&id)) {
                Some(CategoryKind::Income) => Side::Income,
                Some(CategoryKind::Expense) => Side::Expense,
                None if t.amount.is_negative() => Side::Expense,
                None => Side::Income,
            };
            postings.push(Posting {
                date: t.date,
                group,
                side,
                amount: t.amount.minor_units(),
            });
        }
        postings.sort_by_key(|p| p.date);

        Ok(Self {
            company_id,
            period,
            group_by,
            groups: groups.into(),
            postings: postings.into(),
        })
    }

    pub fn company_id(&self) -> CompanyId {
        self.company_id
    }

    pub fn period(&self) -> &ReportPeriod {
        &self.period
    }

    pub fn group_by(&self) -> GroupBy {
        self.group_by
    }

    /// Lines every bucket carries, in order
    pub fn groups(&self) -> impl Iterator<Item = (GroupKey, &str)> + '_ {
        self.groups.iter().map(|g| (g.key, g.label.as_str()))
    }

    /// Buckets in ascending date order, computed as they are pulled
    pub fn buckets(&self) -> Buckets<'_> {
        Buckets {
            report: self,
            ranges: self.period.bucket_ranges(),
        }
    }

    fn bucket(&self, start: NaiveDate, end: NaiveDate) -> ReportBucket {
        let from = self.postings.partition_point(|p| p.date < start);
        let to = self.postings.partition_point(|p| p.date <= end);

        let mut totals = vec![(0i64, 0i64); self.groups.len()];
        for posting in &self.postings[from..to] {
            let (income, expense) = &mut totals[posting.group];
            match posting.side {
                Side::Income => *income += posting.amount,
                Side::Expense => *expense -= posting.amount,
            }
        }

        let lines: Vec<ReportLine> = self
            .groups
            .iter()
            .zip(totals)
            .map(|(group, (income, expense))| ReportLine {
                group: group.key,
                label: group.label.clone(),
                income: Amount::from_minor(income),
                expense: Amount::from_minor(expense),
                net: Amount::from_minor(income - expense),
            })
            .collect();

        let total_income: i64 = lines.iter().map(|l| l.income.minor_units()).sum();
        let total_expense: i64 = lines.iter().map(|l| l.expense.minor_units()).sum();

        ReportBucket {
            start,
            end,
            lines,
            total_income: Amount::from_minor(total_income),
            total_expense: Amount::from_minor(total_expense),
            net: Amount::from_minor(total_income - total_expense),
        }
    }
}

/// Lazy iterator over a report's buckets
#[derive(Debug, Clone)]
pub struct Buckets<'a> {
    report: &'a Report,
    ranges: BucketRanges,
}

impl Iterator for Buckets<'_> {
    type Item = ReportBucket;

    fn next(&mut self) -> Option<Self::Item> {
        let (start, end) = self.ranges.next()?;
        Some(self.report.bucket(start, end))
    }
}

impl FusedIterator for Buckets<'_> {}

/// Builds reports from one consistent read of the store
pub struct ReportAggregator<S: LedgerStorage> {
    storage: S,
    clock: Arc<dyn Clock>,
}

impl<S: LedgerStorage> ReportAggregator<S> {
    pub fn new(storage: S, clock: Arc<dyn Clock>) -> Self {
        Self { storage, clock }
    }

    pub async fn aggregate(
        &self,
        company_id: CompanyId,
        period: ReportPeriod,
        group_by: GroupBy,
    ) -> LedgerResult<Report> {
        let report = self
            .storage
            .read(move |r| {
                r.company(company_id)?
                    .filter(|c| c.lifecycle.is_active())
                    .ok_or_else(|| LedgerError::not_found(EntityKind::Company, company_id))?;
                Report::build(
                    company_id,
                    period,
                    group_by,
                    r.accounts(company_id)?,
                    r.categories(company_id)?,
                    r.transactions(company_id, Some(period.start), Some(period.end))?,
                )
            })
            .await?;

        tracing::debug!(
            company_id = %company_id,
            start = %period.start,
            end = %period.end,
            postings = report.postings.len(),
            "report aggregated"
        );
        Ok(report)
    }

    /// Period from the company's creation date through today
    pub async fn period_since_creation(
        &self,
        company_id: CompanyId,
        granularity: Granularity,
    ) -> LedgerResult<ReportPeriod> {
        let company = self
            .storage
            .read(move |r| {
                r.company(company_id)?
                    .ok_or_else(|| LedgerError::not_found(EntityKind::Company, company_id))
            })
            .await?;
        ReportPeriod::since_company_creation(&company, self.clock.today(), granularity)
    }
}
