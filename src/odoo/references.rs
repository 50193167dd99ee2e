use crate::odoo::client::{CatalogApi, CatalogError, Model};
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReferenceKind {
    Category,
    PublicCategory,
    Tag,
    Tax,
}

impl ReferenceKind {
    pub fn model(&self) -> Model {
        match self {
            ReferenceKind::Category => Model::ProductCategory,
            ReferenceKind::PublicCategory => Model::PublicCategory,
            ReferenceKind::Tag => Model::ProductTag,
            ReferenceKind::Tax => Model::AccountTax,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ReferenceKind::Category => "category",
            ReferenceKind::PublicCategory => "public category",
            ReferenceKind::Tag => "tag",
            ReferenceKind::Tax => "tax",
        }
    }

    /// Tags and taxes must exist downstream; categories are best effort.
    pub fn is_required(&self) -> bool {
        matches!(self, ReferenceKind::Tag | ReferenceKind::Tax)
    }
}

/// Name → id memo for lookup entities, scoped to one run.
///
/// Only hits are stored: a name missing downstream is searched again the next
/// time it is asked for.
#[derive(Debug, Default)]
pub struct ReferenceCache {
    ids: HashMap<(ReferenceKind, String), i64>,
}

impl ReferenceCache {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn seed(&mut self, kind: ReferenceKind, name: impl Into<String>, id: i64) {
        self.ids.insert((kind, name.into()), id);
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub async fn resolve<C: CatalogApi + ?Sized>(
        &mut self,
        catalog: &C,
        kind: ReferenceKind,
        name: &str,
    ) -> Result<Option<i64>, CatalogError> {
        let key = (kind, name.to_string());
        if let Some(id) = self.ids.get(&key) {
            return Ok(Some(*id));
        }
        let ids = catalog.search(kind.model(), name).await?;
        let Some(&id) = ids.first() else {
            debug!(target = "lbc.odoo", kind = kind.label(), name, "reference_not_found");
            return Ok(None);
        };
        self.ids.insert(key, id);
        Ok(Some(id))
    }
}
