//! Item mapping endpoint: the full tradeable item catalog

use super::WikiClient;
use crate::error::{Result, TrackerError};
use serde::Deserialize;

/// Catalog entry from the Wiki mapping endpoint
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct CatalogItem {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    pub examine: Option<String>,
    #[serde(default)]
    pub members: bool,
    pub limit: Option<i64>,
    pub value: Option<i64>,
    pub lowalch: Option<i64>,
    pub highalch: Option<i64>,
    pub icon: Option<String>,
}

impl CatalogItem {
    /// Entries without a name or icon are not real tradeable items
    pub fn is_listable(&self) -> bool {
        !self.name.trim().is_empty() && self.icon.as_deref().is_some_and(|icon| !icon.is_empty())
    }
}

impl WikiClient {
    /// Fetch the item catalog, keeping only listable entries
    pub async fn fetch_item_mapping(&self) -> Result<Vec<CatalogItem>> {
        log::info!("Fetching item mapping from the OSRS Wiki...");

        let body = self.get_with_retry(&self.mapping_url).await?;
        let items = parse_item_mapping(&body)?;

        log::info!("Fetched {} listable items", items.len());
        Ok(items)
    }
}

pub fn parse_item_mapping(body: &[u8]) -> Result<Vec<CatalogItem>> {
    let entries: Vec<CatalogItem> = serde_json::from_slice(body)
        .map_err(|e| TrackerError::InvalidResponseShape(e.to_string()))?;

    let total = entries.len();
    let items: Vec<CatalogItem> = entries.into_iter().filter(|i| i.is_listable()).collect();

    if items.len() < total {
        log::debug!("Skipped {} unnamed or icon-less items", total - items.len());
    }
    Ok(items)
}

#[cfg(test)]
pub use tests::make_test_item;

#[cfg(test)]
mod tests {
    use super::*;

    /// Create a catalog entry with default metadata
    pub fn make_test_item(id: i64, name: &str) -> CatalogItem {
        CatalogItem {
            id,
            name: name.to_string(),
            examine: Some("A test item.".to_string()),
            members: true,
            limit: Some(70),
            value: Some(100),
            lowalch: Some(40),
            highalch: Some(60),
            icon: Some(format!("{}.png", name)),
        }
    }

    #[test]
    fn catalog_item_deserializes() {
        let json = r#"{
            "examine": "A series of connected metal rings.",
            "id": 4151,
            "members": true,
            "lowalch": 48000,
            "limit": 70,
            "value": 120001,
            "highalch": 72000,
            "icon": "Abyssal whip.png",
            "name": "Abyssal whip"
        }"#;

        let item: CatalogItem = serde_json::from_str(json).unwrap();
        assert_eq!(item.id, 4151);
        assert_eq!(item.name, "Abyssal whip");
        assert_eq!(item.limit, Some(70));
        assert!(item.is_listable());
    }

    #[test]
    fn parse_skips_items_without_icon_or_name() {
        let body = br#"[
            {"id": 1, "name": "Dragon scimitar", "icon": "Dragon scimitar.png"},
            {"id": 2, "name": "", "icon": "Blank.png"},
            {"id": 3, "name": "Null icon"},
            {"id": 4, "name": "Empty icon", "icon": ""}
        ]"#;

        let items = parse_item_mapping(body).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].name, "Dragon scimitar");
        assert!(!items[0].members);
    }

    #[test]
    fn parse_rejects_object_payload() {
        let err = parse_item_mapping(br#"{"data": []}"#).unwrap_err();
        assert!(matches!(err, TrackerError::InvalidResponseShape(_)));
    }
}
