use crate::classify::{category_for, clean_title, description_html, tags_for};
use crate::images::{self, GalleryImage, ImageError, ImageFetcher, ImagePipeline};
use crate::models::{Listing, ListingState};
use crate::odoo::{
    CatalogApi, CatalogError, ImagePayload, Model, ProductPayload, ReferenceCache, ReferenceKind,
    ReplaceIds,
};
use serde::Serialize;
use serde_json::Value;
use crate::metrics::{self, StageTimer};
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct PublishOptions {
    /// Rewrite products that already exist downstream.
    pub overwrite_products: bool,
    /// Rewrite gallery images that already exist downstream.
    pub overwrite_images: bool,
    pub tax_name: String,
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self {
            overwrite_products: true,
            overwrite_images: false,
            tax_name: crate::config::DEFAULT_TAX_NAME.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Create,
    Update(i64),
    Archive(i64),
    Skip(i64),
}

/// Downstream matching is by title; the snapshot itself is keyed by URL.
pub fn decide(existing: Option<i64>, state: ListingState, overwrite_products: bool) -> Decision {
    match (existing, state) {
        (None, _) => Decision::Create,
        (Some(id), ListingState::Deleted) => Decision::Archive(id),
        (Some(id), ListingState::Active) if overwrite_products => Decision::Update(id),
        (Some(id), ListingState::Active) => Decision::Skip(id),
    }
}

#[derive(Debug, Error)]
#[error("stage `{stage}` failed: {message}")]
pub struct PublishError {
    stage: &'static str,
    message: String,
    kind: PublishErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishErrorKind {
    Catalog,
    Unauthorized,
    MissingReference,
    Images,
    Payload,
}

impl PublishError {
    pub fn catalog(stage: &'static str, err: CatalogError) -> Self {
        let kind = if err.is_auth_failure() {
            PublishErrorKind::Unauthorized
        } else {
            PublishErrorKind::Catalog
        };
        Self {
            stage,
            message: err.to_string(),
            kind,
        }
    }

    pub fn missing_reference(kind: ReferenceKind, name: &str) -> Self {
        Self {
            stage: "lookup",
            message: format!("{} '{name}' not found in catalog", kind.label()),
            kind: PublishErrorKind::MissingReference,
        }
    }

    pub fn images(err: ImageError) -> Self {
        Self {
            stage: "images",
            message: err.to_string(),
            kind: PublishErrorKind::Images,
        }
    }

    pub fn payload(stage: &'static str, err: serde_json::Error) -> Self {
        Self {
            stage,
            message: err.to_string(),
            kind: PublishErrorKind::Payload,
        }
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }

    pub fn kind(&self) -> PublishErrorKind {
        self.kind
    }

    pub fn detail(&self) -> &str {
        &self.message
    }
}

#[derive(Debug)]
pub enum ListingOutcome {
    Created(i64),
    Updated(i64),
    Archived(i64),
    /// Exists downstream but product overwrite is disabled.
    Skipped(i64),
    Failed(PublishError),
}

impl ListingOutcome {
    /// Catalog product the outcome refers to, if the listing got that far.
    pub fn product_id(&self) -> Option<i64> {
        match self {
            ListingOutcome::Created(id)
            | ListingOutcome::Updated(id)
            | ListingOutcome::Archived(id)
            | ListingOutcome::Skipped(id) => Some(*id),
            ListingOutcome::Failed(_) => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ListingOutcome::Created(_) => "created",
            ListingOutcome::Updated(_) => "updated",
            ListingOutcome::Archived(_) => "archived",
            ListingOutcome::Skipped(_) => "skipped",
            ListingOutcome::Failed(_) => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub created: usize,
    pub updated: usize,
    pub archived: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl RunSummary {
    pub fn record(&mut self, outcome: &ListingOutcome) {
        match outcome {
            ListingOutcome::Created(_) => self.created += 1,
            ListingOutcome::Updated(_) => self.updated += 1,
            ListingOutcome::Archived(_) => self.archived += 1,
            ListingOutcome::Skipped(_) => self.skipped += 1,
            ListingOutcome::Failed(_) => self.failed += 1,
        }
    }

    pub fn from_outcomes<'a>(outcomes: impl IntoIterator<Item = &'a ListingOutcome>) -> Self {
        let mut summary = Self::default();
        for outcome in outcomes {
            summary.record(outcome);
        }
        summary
    }
}

pub struct Publisher<'a, C: ?Sized, F> {
    catalog: &'a C,
    images: &'a ImagePipeline<F>,
    references: ReferenceCache,
    options: PublishOptions,
}

impl<'a, C, F> Publisher<'a, C, F>
where
    C: CatalogApi + ?Sized,
    F: ImageFetcher,
{
    pub fn new(
        catalog: &'a C,
        images: &'a ImagePipeline<F>,
        references: ReferenceCache,
        options: PublishOptions,
    ) -> Self {
        Self {
            catalog,
            images,
            references,
            options,
        }
    }

    /// Publishes every listing in order. A failing listing is counted and the
    /// loop moves on; rejected credentials stop the run.
    pub async fn publish_all(&mut self, listings: &[Listing]) -> Result<RunSummary, PublishError> {
        let mut outcomes = Vec::with_capacity(listings.len());
        for listing in listings {
            let outcome = self.publish_listing(listing).await;
            metrics::count_outcome(outcome.label());
            match outcome {
                ListingOutcome::Failed(err) if err.kind() == PublishErrorKind::Unauthorized => {
                    error!(
                        target = "lbc.publish",
                        url = %listing.url,
                        stage = err.stage(),
                        error = err.detail(),
                        "catalog_rejected_credentials"
                    );
                    return Err(err);
                }
                ListingOutcome::Failed(ref err) => error!(
                    target = "lbc.publish",
                    url = %listing.url,
                    title = %listing.title,
                    stage = err.stage(),
                    kind = ?err.kind(),
                    error = err.detail(),
                    "listing_publish_failed"
                ),
                ref done => info!(
                    target = "lbc.publish",
                    url = %listing.url,
                    outcome = done.label(),
                    product_id = ?done.product_id(),
                    "listing_published"
                ),
            }
            outcomes.push(outcome);
        }
        let summary = RunSummary::from_outcomes(&outcomes);
        info!(
            target = "lbc.publish",
            created = summary.created,
            updated = summary.updated,
            archived = summary.archived,
            skipped = summary.skipped,
            failed = summary.failed,
            cached_references = self.references.len(),
            "Summary: {} created, {} updated, {} archived.",
            summary.created,
            summary.updated,
            summary.archived
        );
        Ok(summary)
    }

    pub async fn publish_listing(&mut self, listing: &Listing) -> ListingOutcome {
        let _timer = StageTimer::start("publish_listing");
        match self.try_publish(listing).await {
            Ok(outcome) => outcome,
            Err(err) => ListingOutcome::Failed(err),
        }
    }

    async fn try_publish(&mut self, listing: &Listing) -> Result<ListingOutcome, PublishError> {
        let title = clean_title(&listing.title);
        info!(target = "lbc.publish", title = %title, url = %listing.url, "processing_listing");

        let existing = self
            .catalog
            .search(Model::ProductTemplate, &title)
            .await
            .map_err(|err| PublishError::catalog("search", err))?;
        info!(target = "lbc.publish", title = %title, ids = ?existing, "product_search");

        match decide(
            existing.first().copied(),
            listing.state,
            self.options.overwrite_products,
        ) {
            Decision::Create => {
                let payload = self.product_payload(&title, listing).await?;
                let id = self
                    .catalog
                    .create(Model::ProductTemplate, &payload)
                    .await
                    .map_err(|err| PublishError::catalog("create", err))?;
                info!(target = "lbc.publish", product_id = id, "product_created");
                Ok(ListingOutcome::Created(id))
            }
            Decision::Archive(id) => {
                self.catalog
                    .archive(Model::ProductTemplate, &[id])
                    .await
                    .map_err(|err| PublishError::catalog("archive", err))?;
                info!(target = "lbc.publish", product_id = id, "product_archived");
                Ok(ListingOutcome::Archived(id))
            }
            Decision::Update(id) => {
                let payload = self.product_payload(&title, listing).await?;
                self.catalog
                    .write(Model::ProductTemplate, &[id], &payload)
                    .await
                    .map_err(|err| PublishError::catalog("write", err))?;
                info!(target = "lbc.publish", product_id = id, "product_updated");
                Ok(ListingOutcome::Updated(id))
            }
            Decision::Skip(id) => {
                info!(target = "lbc.publish", product_id = id, "product_exists_overwrite_disabled");
                Ok(ListingOutcome::Skipped(id))
            }
        }
    }

    /// Resolves a lookup entity by name. A miss fails the listing for
    /// required kinds and is only logged otherwise.
    async fn reference(
        &mut self,
        kind: ReferenceKind,
        name: &str,
    ) -> Result<Option<i64>, PublishError> {
        let id = self
            .references
            .resolve(self.catalog, kind, name)
            .await
            .map_err(|err| PublishError::catalog("lookup", err))?;
        match id {
            None if kind.is_required() => Err(PublishError::missing_reference(kind, name)),
            None => {
                warn!(target = "lbc.publish", kind = kind.label(), name, "optional_reference_not_found");
                Ok(None)
            }
            found => Ok(found),
        }
    }

    async fn product_payload(&mut self, title: &str, listing: &Listing) -> Result<Value, PublishError> {
        let mut tag_ids = Vec::new();
        for tag in tags_for(title) {
            tag_ids.extend(self.reference(ReferenceKind::Tag, tag).await?);
        }
        let category = category_for(title);
        let tax_name = self.options.tax_name.clone();
        let tax_ids: Vec<i64> = self
            .reference(ReferenceKind::Tax, &tax_name)
            .await?
            .into_iter()
            .collect();

        let (primary, gallery_ids) = {
            let _timer = StageTimer::start("images");
            let derived = self
                .images
                .derive(&images::base_name(title), &listing.photos)
                .await
                .map_err(PublishError::images)?;
            let mut gallery_ids = Vec::with_capacity(derived.gallery.len());
            for image in &derived.gallery {
                gallery_ids.push(self.upsert_gallery_image(image).await?);
            }
            (derived.primary, gallery_ids)
        };

        let (categ_id, public_categ_ids) = match category {
            Some(name) => (
                self.reference(ReferenceKind::Category, name).await?,
                self.reference(ReferenceKind::PublicCategory, name)
                    .await?
                    .map(|id| ReplaceIds(vec![id])),
            ),
            None => (None, None),
        };

        let created_date = listing.date.format("%Y-%m-%d %H:%M:%S").to_string();
        let payload = ProductPayload {
            name: title.to_string(),
            list_price: listing.price,
            website_published: true,
            qty_available: 1.0,
            description_ecommerce: description_html(&listing.description, &listing.url),
            product_tag_ids: ReplaceIds(tag_ids),
            image_1920: primary,
            taxes_id: ReplaceIds(tax_ids),
            product_template_image_ids: ReplaceIds(gallery_ids),
            create_date: created_date.clone(),
            publish_date: created_date.clone(),
            write_date: created_date,
            categ_id,
            public_categ_ids,
        };
        to_payload("payload", &payload)
    }

    /// Gallery images are matched downstream by file name.
    async fn upsert_gallery_image(&self, image: &GalleryImage) -> Result<i64, PublishError> {
        let existing = self
            .catalog
            .search(Model::ProductImage, &image.name)
            .await
            .map_err(|err| PublishError::catalog("images", err))?
            .first()
            .copied();

        if let (Some(id), false) = (existing, self.options.overwrite_images) {
            return Ok(id);
        }

        let payload = to_payload(
            "images",
            &ImagePayload::from_variants(&image.name, &image.variants),
        )?;
        match existing {
            Some(id) => {
                self.catalog
                    .write(Model::ProductImage, &[id], &payload)
                    .await
                    .map_err(|err| PublishError::catalog("images", err))?;
                info!(target = "lbc.publish", name = %image.name, image_id = id, "image_updated");
                Ok(id)
            }
            None => {
                let id = self
                    .catalog
                    .create(Model::ProductImage, &payload)
                    .await
                    .map_err(|err| PublishError::catalog("images", err))?;
                info!(target = "lbc.publish", name = %image.name, image_id = id, "image_created");
                Ok(id)
            }
        }
    }
}

fn to_payload<T: Serialize>(stage: &'static str, value: &T) -> Result<Value, PublishError> {
    serde_json::to_value(value).map_err(|err| PublishError::payload(stage, err))
}
