//! The catalog seam.
//!
//! The media catalog (what items exist, their titles, where their sources
//! live) is owned by an external system. Preprocessing only needs to ask it
//! two things: which items still need derived artifacts, and to record the
//! state an item reached. Everything behind that is someone else's schema.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Kinds of library items that carry derived artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemType {
    /// Paginated documents rendered to per-page images.
    Magazine,
    /// Packaged ebooks with an extractable cover.
    Ebook,
}

impl ItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Magazine => "magazine",
            Self::Ebook => "ebook",
        }
    }
}

impl std::fmt::Display for ItemType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ItemType {
    type Err = ();
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "magazine" => Ok(Self::Magazine),
            "ebook" => Ok(Self::Ebook),
            _ => Err(()),
        }
    }
}

/// How far an item's artifact set has gotten.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactState {
    Absent,
    Partial,
    Complete,
}

/// One catalog item as preprocessing sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceItem {
    pub id: i64,
    /// Path or object key of the source document. Also the hash input for
    /// cache key derivation, so it must be the catalog's canonical form.
    pub source_path: String,
    pub title: String,
    pub artifact_state: ArtifactState,
}

/// What the scheduler needs from the catalog.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Items whose artifacts should be (re)built, in processing order.
    ///
    /// With `force` the complete ones are included too; their workers will
    /// still short-circuit on an intact cache, so force is cheap unless the
    /// cache really is gone.
    async fn list_items_needing_artifacts(&self, item_type: ItemType, force: bool) -> Result<Vec<SourceItem>>;

    /// Record the state an item reached after a worker pass.
    async fn mark_artifact_state(&self, item_type: ItemType, item_id: i64, state: ArtifactState) -> Result<()>;
}

#[cfg(any(test, feature = "mock"))]
pub use self::memory::MemoryCatalog;

#[cfg(any(test, feature = "mock"))]
mod memory {
    use super::*;
    use std::collections::HashMap;
    use tokio::sync::Mutex;

    /// In-memory catalog for tests.
    #[derive(Default)]
    pub struct MemoryCatalog {
        items: Mutex<HashMap<ItemType, Vec<SourceItem>>>,
    }

    impl MemoryCatalog {
        pub fn with_items(item_type: ItemType, items: impl IntoIterator<Item = SourceItem>) -> Self {
            let catalog = Self::default();
            catalog.items.try_lock().unwrap().insert(item_type, items.into_iter().collect());
            catalog
        }

        /// Current state of one item, as recorded by `mark_artifact_state`.
        pub async fn state_of(&self, item_type: ItemType, item_id: i64) -> Option<ArtifactState> {
            self.items
                .lock()
                .await
                .get(&item_type)?
                .iter()
                .find(|item| item.id == item_id)
                .map(|item| item.artifact_state)
        }
    }

    #[async_trait]
    impl Catalog for MemoryCatalog {
        async fn list_items_needing_artifacts(&self, item_type: ItemType, force: bool) -> Result<Vec<SourceItem>> {
            let items = self.items.lock().await;
            Ok(items
                .get(&item_type)
                .map(|items| {
                    items
                        .iter()
                        .filter(|item| force || item.artifact_state != ArtifactState::Complete)
                        .cloned()
                        .collect()
                })
                .unwrap_or_default())
        }

        async fn mark_artifact_state(&self, item_type: ItemType, item_id: i64, state: ArtifactState) -> Result<()> {
            let mut items = self.items.lock().await;
            if let Some(item) = items.get_mut(&item_type).and_then(|items| items.iter_mut().find(|item| item.id == item_id)) {
                item.artifact_state = state;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: i64, state: ArtifactState) -> SourceItem {
        SourceItem {
            id,
            source_path: format!("/library/item-{id}.pdf"),
            title: format!("Item {id}"),
            artifact_state: state,
        }
    }

    #[tokio::test]
    async fn test_memory_catalog_filters_complete_items() {
        let catalog = MemoryCatalog::with_items(ItemType::Magazine, [
            item(1, ArtifactState::Absent),
            item(2, ArtifactState::Complete),
            item(3, ArtifactState::Partial),
        ]);
        let pending = catalog.list_items_needing_artifacts(ItemType::Magazine, false).await.unwrap();
        assert_eq!(pending.iter().map(|i| i.id).collect::<Vec<_>>(), [1, 3]);
        let forced = catalog.list_items_needing_artifacts(ItemType::Magazine, true).await.unwrap();
        assert_eq!(forced.len(), 3);
    }

    #[tokio::test]
    async fn test_memory_catalog_marks_state() {
        let catalog = MemoryCatalog::with_items(ItemType::Ebook, [item(5, ArtifactState::Absent)]);
        catalog.mark_artifact_state(ItemType::Ebook, 5, ArtifactState::Complete).await.unwrap();
        assert_eq!(catalog.state_of(ItemType::Ebook, 5).await, Some(ArtifactState::Complete));
    }

    #[test]
    fn test_item_type_round_trip() {
        for item_type in [ItemType::Magazine, ItemType::Ebook] {
            assert_eq!(item_type.as_str().parse::<ItemType>(), Ok(item_type));
        }
        assert!("vinyl".parse::<ItemType>().is_err());
    }
}
