use crate::images::VariantSet;
use serde::{Serialize, Serializer};
use serde_with::skip_serializing_none;

/// Many2many "replace all" command, serialised as `[[6, 0, [ids…]]]`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplaceIds(pub Vec<i64>);

impl Serialize for ReplaceIds {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        [(6u8, 0u8, &self.0)].serialize(serializer)
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
pub struct ProductPayload {
    pub name: String,
    pub list_price: f64,
    pub website_published: bool,
    pub qty_available: f64,
    pub description_ecommerce: String,
    pub product_tag_ids: ReplaceIds,
    /// Sent as `null` when there are no photos so a write clears the old image.
    #[serialize_always]
    pub image_1920: Option<String>,
    pub taxes_id: ReplaceIds,
    pub product_template_image_ids: ReplaceIds,
    pub create_date: String,
    pub publish_date: String,
    pub write_date: String,
    pub categ_id: Option<i64>,
    pub public_categ_ids: Option<ReplaceIds>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
pub struct ImagePayload {
    pub name: String,
    pub image_128: Option<String>,
    pub image_256: Option<String>,
    pub image_512: Option<String>,
    pub image_1024: Option<String>,
}

impl ImagePayload {
    pub fn from_variants(name: &str, variants: &VariantSet) -> Self {
        let size = |edge: u32| variants.get(edge).map(str::to_string);
        Self {
            name: name.to_string(),
            image_128: size(128),
            image_256: size(256),
            image_512: size(512),
            image_1024: size(1024),
        }
    }
}
