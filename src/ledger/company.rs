//! Company (tenant) management

use std::sync::Arc;

use crate::traits::*;
use crate::types::*;
use crate::utils::validation::validate_name;

/// Company manager; every call is scoped to the owning user
pub struct CompanyManager<S: LedgerStorage> {
    storage: S,
    clock: Arc<dyn Clock>,
}

/// Load a company that exists and is not deleted
pub(crate) fn require_active_company(
    reader: &dyn LedgerReader,
    company_id: CompanyId,
) -> LedgerResult<Company> {
    reader
        .company(company_id)?
        .filter(|c| c.lifecycle.is_active())
        .ok_or_else(|| LedgerError::not_found(EntityKind::Company, company_id))
}

// another owner's company is reported exactly like a missing one
fn owned_company(
    reader: &dyn LedgerReader,
    owner: &UserId,
    company_id: CompanyId,
) -> LedgerResult<Company> {
    reader
        .company(company_id)?
        .filter(|c| &c.owner_user_id == owner)
        .ok_or_else(|| LedgerError::not_found(EntityKind::Company, company_id))
}

impl<S: LedgerStorage> CompanyManager<S> {
    pub fn new(storage: S, clock: Arc<dyn Clock>) -> Self {
        Self { storage, clock }
    }

    /// Create a company owned by `owner`
    pub async fn create_company(&self, owner: &UserId, name: &str) -> LedgerResult<Company> {
        let name = validate_name(EntityKind::Company, name)?;
        let company = Company::new(name, owner.clone(), self.clock.now());

        let saved = company.clone();
        self.storage
            .atomically(move |tx| tx.insert_company(&saved))
            .await?;

        tracing::info!(company_id = %company.id, owner = %owner, "company created");
        Ok(company)
    }

    /// Get a company in any lifecycle state
    pub async fn get_company(&self, owner: &UserId, company_id: CompanyId) -> LedgerResult<Company> {
        let owner = owner.clone();
        self.storage
            .read(move |r| owned_company(r, &owner, company_id))
            .await
    }

    /// Active companies of a user, oldest first
    pub async fn list_companies(&self, owner: &UserId) -> LedgerResult<Vec<Company>> {
        let owner = owner.clone();
        let companies = self
            .storage
            .read(move |r| r.companies_for_owner(&owner))
            .await?;
        Ok(companies
            .into_iter()
            .filter(|c| c.lifecycle.is_active())
            .collect())
    }

    pub async fn rename_company(
        &self,
        owner: &UserId,
        company_id: CompanyId,
        name: &str,
    ) -> LedgerResult<Company> {
        let name = validate_name(EntityKind::Company, name)?;
        let owner = owner.clone();
        let now = self.clock.now();

        self.storage
            .atomically(move |tx| {
                let mut company = owned_company(tx.as_reader(), &owner, company_id)?;
                if !company.lifecycle.is_active() {
                    return Err(LedgerError::not_found(EntityKind::Company, company_id));
                }
                company.name = name;
                company.updated_at = now;
                tx.update_company(&company)?;
                Ok(company)
            })
            .await
    }

    /// Soft-delete a company that no longer holds active accounts
    pub async fn delete_company(&self, owner: &UserId, company_id: CompanyId) -> LedgerResult<()> {
        let owner = owner.clone();
        let now = self.clock.now();

        self.storage
            .atomically(move |tx| {
                let mut company = owned_company(tx.as_reader(), &owner, company_id)?;
                if !company.lifecycle.is_active() {
                    return Err(LedgerError::not_found(EntityKind::Company, company_id));
                }

                let active_accounts = tx
                    .accounts(company_id)?
                    .iter()
                    .filter(|a| a.lifecycle.is_active())
                    .count();
                if active_accounts > 0 {
                    return Err(LedgerError::ReferentialConflict(format!(
                        "company {} still has {} active accounts",
                        company_id, active_accounts
                    )));
                }

                company.lifecycle = Lifecycle::Deleted { at: now };
                company.updated_at = now;
                tx.update_company(&company)
            })
            .await?;

        tracing::info!(company_id = %company_id, "company deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::memory_storage::MemoryStorage;
    use chrono::NaiveDate;

    fn manager() -> CompanyManager<MemoryStorage> {
        let clock = FixedClock::at_date(NaiveDate::from_ymd_opt(2024, 2, 1).unwrap());
        CompanyManager::new(MemoryStorage::new(), Arc::new(clock))
    }

    #[tokio::test]
    async fn test_other_owner_sees_not_found() {
        let manager = manager();
        let alice = UserId::new("alice");
        let company = manager.create_company(&alice, "Acme").await.unwrap();

        let err = manager
            .get_company(&UserId::new("bob"), company.id)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::NotFound { entity: EntityKind::Company, .. }));

        let err = manager
            .rename_company(&UserId::new("bob"), company.id, "Mine")
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_deleted_company_leaves_list_but_stays_readable() {
        let manager = manager();
        let owner = UserId::new("alice");
        let kept = manager.create_company(&owner, "Kept").await.unwrap();
        let gone = manager.create_company(&owner, "Gone").await.unwrap();

        manager.delete_company(&owner, gone.id).await.unwrap();

        let listed = manager.list_companies(&owner).await.unwrap();
        assert_eq!(listed.iter().map(|c| c.id).collect::<Vec<_>>(), vec![kept.id]);

        let audited = manager.get_company(&owner, gone.id).await.unwrap();
        assert!(!audited.lifecycle.is_active());

        let err = manager.delete_company(&owner, gone.id).await.unwrap_err();
        assert!(matches!(err, LedgerError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_blank_name_is_rejected() {
        let manager = manager();
        let err = manager
            .create_company(&UserId::new("alice"), "  ")
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
    }
}
