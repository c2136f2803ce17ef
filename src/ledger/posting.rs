//! Posting validation rules

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::money::Amount;
use crate::traits::{Clock, LedgerReader, PostingValidator};
use crate::types::*;

/// Tunable limits applied to every posting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostingPolicy {
    /// Largest accepted magnitude, in minor units
    pub max_abs_amount: Amount,
    /// How many days past today a transaction may be dated
    pub future_grace_days: u32,
    /// How long after closing an account its postings stay editable
    pub closed_edit_grace_days: u32,
}

impl Default for PostingPolicy {
    fn default() -> Self {
        Self {
            // one billion major units
            max_abs_amount: Amount::from_minor(100_000_000_000),
            future_grace_days: 1,
            closed_edit_grace_days: 30,
        }
    }
}

/// Validator applying [`PostingPolicy`] in a fixed order
///
/// 1. account and category belong to the company and are not deleted
/// 2. amount is non-zero and within bounds
/// 3. date is not beyond the future grace window
/// 4. closed accounts take no new postings; edits only within the grace period
pub struct DefaultPostingValidator {
    policy: PostingPolicy,
    clock: Arc<dyn Clock>,
}

impl DefaultPostingValidator {
    pub fn new(policy: PostingPolicy, clock: Arc<dyn Clock>) -> Self {
        Self { policy, clock }
    }

    pub fn policy(&self) -> &PostingPolicy {
        &self.policy
    }

    fn check_references(
        &self,
        reader: &dyn LedgerReader,
        candidate: &PostingCandidate,
    ) -> LedgerResult<Result<Account, Rejection>> {
        // unknown and foreign accounts get the same message
        let account = match reader.account(candidate.company_id, candidate.account_id)? {
            Some(account) => account,
            None => {
                return Ok(Err(Rejection::ReferentialConflict(format!(
                    "account {} does not belong to company {}",
                    candidate.account_id, candidate.company_id
                ))))
            }
        };
        if !account.lifecycle.is_active() {
            return Ok(Err(Rejection::ReferentialConflict(format!(
                "account {} is deleted",
                account.id
            ))));
        }

        if let Some(category_id) = candidate.category_id {
            match reader.category(candidate.company_id, category_id)? {
                None => {
                    return Ok(Err(Rejection::ReferentialConflict(format!(
                        "category {} does not belong to company {}",
                        category_id, candidate.company_id
                    ))))
                }
                Some(category) if !category.lifecycle.is_active() => {
                    return Ok(Err(Rejection::ReferentialConflict(format!(
                        "category {} is deleted",
                        category_id
                    ))))
                }
                Some(_) => {}
            }
        }

        Ok(Ok(account))
    }

    fn check_amount(&self, amount: Amount) -> Verdict {
        if amount.is_zero() {
            return Err(Rejection::OutOfRange(
                "transaction amount cannot be zero".to_string(),
            ));
        }
        if amount.magnitude() > self.policy.max_abs_amount.magnitude() {
            return Err(Rejection::OutOfRange(format!(
                "amount {} exceeds the limit of {}",
                amount, self.policy.max_abs_amount
            )));
        }
        Ok(())
    }

    fn check_date(&self, date: NaiveDate) -> Verdict {
        let grace = Days::new(u64::from(self.policy.future_grace_days));
        // a window reaching past the calendar is unbounded
        let Some(latest) = self.clock.today().checked_add_days(grace) else {
            return Ok(());
        };
        if date > latest {
            return Err(Rejection::OutOfRange(format!(
                "transaction dated {} is later than {}",
                date, latest
            )));
        }
        Ok(())
    }

    fn check_open(&self, account: &Account, kind: PostingKind) -> Verdict {
        let Some(closed_at) = account.status.closed_at() else {
            return Ok(());
        };

        match kind {
            PostingKind::New => Err(Rejection::AccountClosed(format!(
                "account {} was closed on {}",
                account.id,
                closed_at.date()
            ))),
            PostingKind::Edit | PostingKind::Restore => {
                let grace = Days::new(u64::from(self.policy.closed_edit_grace_days));
                let Some(deadline) = closed_at.checked_add_days(grace) else {
                    return Ok(());
                };
                if self.clock.now() > deadline {
                    Err(Rejection::AccountClosed(format!(
                        "account {} closed on {}; corrections were allowed until {}",
                        account.id,
                        closed_at.date(),
                        deadline.date()
                    )))
                } else {
                    Ok(())
                }
            }
        }
    }
}

impl PostingValidator for DefaultPostingValidator {
    fn validate_posting(
        &self,
        reader: &dyn LedgerReader,
        candidate: &PostingCandidate,
        kind: PostingKind,
    ) -> LedgerResult<Verdict> {
        let account = match self.check_references(reader, candidate)? {
            Ok(account) => account,
            Err(rejection) => return Ok(Err(rejection)),
        };

        Ok(self
            .check_amount(candidate.amount)
            .and_then(|()| self.check_date(candidate.date))
            .and_then(|()| self.check_open(&account, kind)))
    }
}
