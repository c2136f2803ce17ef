//! Category management

use std::sync::Arc;

use crate::ledger::company::require_active_company;
use crate::traits::*;
use crate::types::*;
use crate::utils::validation::validate_name;

/// Manages the income/expense labels of a company
pub struct CategoryManager<S: LedgerStorage> {
    storage: S,
    clock: Arc<dyn Clock>,
}

fn require_active_category(
    reader: &dyn LedgerReader,
    company_id: CompanyId,
    category_id: CategoryId,
) -> LedgerResult<Category> {
    reader
        .category(company_id, category_id)?
        .filter(|c| c.lifecycle.is_active())
        .ok_or_else(|| LedgerError::not_found(EntityKind::Category, category_id))
}

fn ensure_unreferenced(
    reader: &dyn LedgerReader,
    company_id: CompanyId,
    category_id: CategoryId,
    action: &str,
) -> LedgerResult<()> {
    let postings =
        reader.count_active_postings(company_id, PostingReference::Category(category_id))?;
    if postings > 0 {
        return Err(LedgerError::ReferentialConflict(format!(
            "category {} has {} active postings; cannot {}",
            category_id, postings, action
        )));
    }
    Ok(())
}

impl<S: LedgerStorage> CategoryManager<S> {
    pub fn new(storage: S, clock: Arc<dyn Clock>) -> Self {
        Self { storage, clock }
    }

    pub async fn create_category(
        &self,
        company_id: CompanyId,
        name: &str,
        kind: CategoryKind,
    ) -> LedgerResult<Category> {
        let name = validate_name(EntityKind::Category, name)?;
        let now = self.clock.now();

        let category = self
            .storage
            .atomically(move |tx| {
                require_active_company(tx.as_reader(), company_id)?;
                let category = Category::new(company_id, name, kind, now);
                tx.insert_category(&category)?;
                Ok(category)
            })
            .await?;

        tracing::info!(
            company_id = %company_id,
            category_id = %category.id,
            kind = category.kind.as_str(),
            "category created"
        );
        Ok(category)
    }

    /// Get a category in any lifecycle state
    pub async fn get_category(
        &self,
        company_id: CompanyId,
        category_id: CategoryId,
    ) -> LedgerResult<Category> {
        self.storage
            .read(move |r| {
                r.category(company_id, category_id)?
                    .ok_or_else(|| LedgerError::not_found(EntityKind::Category, category_id))
            })
            .await
    }

    pub async fn list_categories(&self, company_id: CompanyId) -> LedgerResult<Vec<Category>> {
        let categories = self.storage.read(move |r| r.categories(company_id)).await?;
        Ok(categories
            .into_iter()
            .filter(|c| c.lifecycle.is_active())
            .collect())
    }

    /// Rename or re-kind a category; the kind is frozen while postings use it
    pub async fn update_category(
        &self,
        company_id: CompanyId,
        category_id: CategoryId,
        patch: CategoryPatch,
    ) -> LedgerResult<Category> {
        let name = patch
            .name
            .as_deref()
            .map(|n| validate_name(EntityKind::Category, n))
            .transpose()?;
        let now = self.clock.now();

        self.storage
            .atomically(move |tx| {
                let mut category =
                    require_active_category(tx.as_reader(), company_id, category_id)?;

                if let Some(kind) = patch.kind.filter(|k| *k != category.kind) {
                    // deleted postings can be restored, so they pin the kind too
                    let postings =
                        tx.count_postings(company_id, PostingReference::Category(category_id))?;
                    if postings > 0 {
                        return Err(LedgerError::ReferentialConflict(format!(
                            "category {} has {} postings; cannot change kind",
                            category_id, postings
                        )));
                    }
                    category.kind = kind;
                }
                if let Some(name) = name {
                    category.name = name;
                }
                category.updated_at = now;
                tx.update_category(&category)?;
                Ok(category)
            })
            .await
    }

    pub async fn delete_category(
        &self,
        company_id: CompanyId,
        category_id: CategoryId,
    ) -> LedgerResult<()> {
        let now = self.clock.now();
        self.storage
            .atomically(move |tx| {
                let mut category =
                    require_active_category(tx.as_reader(), company_id, category_id)?;
                ensure_unreferenced(tx.as_reader(), company_id, category_id, "delete")?;
                category.lifecycle = Lifecycle::Deleted { at: now };
                category.updated_at = now;
                tx.update_category(&category)
            })
            .await?;

        tracing::info!(company_id = %company_id, category_id = %category_id, "category deleted");
        Ok(())
    }
}
