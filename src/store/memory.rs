use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{CatalogStore, StoreError};
use crate::catalog::{Fleet, ImageSlot, Listing, ListingKey, StoredImage};

#[derive(Debug, Default)]
struct Tables {
    created: HashSet<Fleet>,
    rows: HashMap<Fleet, BTreeMap<i32, Listing>>,
    next_id: i32,
}

/// In-process catalog for development and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    fn lock(&self) -> std::sync::MutexGuard<'_, Tables> {
        // A poisoned lock only means another request panicked mid-update
        self.tables
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Snapshot of a stored listing, for assertions in tests.
    pub fn get(&self, fleet: Fleet, id: i32) -> Option<Listing> {
        self.lock().rows.get(&fleet)?.get(&id).cloned()
    }

    pub fn len(&self, fleet: Fleet) -> usize {
        self.lock().rows.get(&fleet).map_or(0, BTreeMap::len)
    }

    pub fn is_empty(&self, fleet: Fleet) -> bool {
        self.len(fleet) == 0
    }

    pub fn schema_created(&self, fleet: Fleet) -> bool {
        self.lock().created.contains(&fleet)
    }
}

#[async_trait]
impl CatalogStore for MemoryStore {
    async fn ensure_schema(&self, fleet: Fleet) -> Result<(), StoreError> {
        self.lock().created.insert(fleet);
        Ok(())
    }

    async fn exists(&self, fleet: Fleet, key: &ListingKey) -> Result<bool, StoreError> {
        Ok(self
            .lock()
            .rows
            .get(&fleet)
            .is_some_and(|rows| rows.values().any(|l| l.key() == *key)))
    }

    async fn insert(&self, fleet: Fleet, listing: &Listing) -> Result<i32, StoreError> {
        let mut tables = self.lock();
        let key = listing.key();
        if tables
            .rows
            .get(&fleet)
            .is_some_and(|rows| rows.values().any(|l| l.key() == key))
        {
            return Err(StoreError::Conflict);
        }
        tables.next_id += 1;
        let id = tables.next_id;
        tables
            .rows
            .entry(fleet)
            .or_default()
            .insert(id, listing.clone());
        Ok(id)
    }

    async fn image_urls(
        &self,
        fleet: Fleet,
        segment_id: i32,
        model_type: &str,
        slot: ImageSlot,
    ) -> Result<Vec<StoredImage>, StoreError> {
        let tables = self.lock();
        let Some(rows) = tables.rows.get(&fleet) else {
            return Ok(Vec::new());
        };
        Ok(rows
            .iter()
            .filter(|(_, l)| l.segment_id == segment_id && l.model_type == model_type)
            .map(|(id, l)| StoredImage {
                id: *id,
                segment_id: l.segment_id,
                segment_name: l.segment_name.clone(),
                model_type: l.model_type.clone(),
                image_url: l.images.get(&slot).cloned(),
            })
            .collect())
    }

    async fn update_image(
        &self,
        fleet: Fleet,
        segment_id: i32,
        model_type: &str,
        slot: ImageSlot,
        url: &str,
    ) -> Result<u64, StoreError> {
        let mut tables = self.lock();
        let Some(rows) = tables.rows.get_mut(&fleet) else {
            return Ok(0);
        };
        let mut updated = 0;
        for listing in rows
            .values_mut()
            .filter(|l| l.segment_id == segment_id && l.model_type == model_type)
        {
            listing.images.insert(slot, url.to_owned());
            updated += 1;
        }
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listing(model: &str) -> Listing {
        Listing {
            name: "Swift".into(),
            segment_id: 3,
            segment_name: "hatchback".into(),
            model_type: model.into(),
            year: 2022,
            powertrain: ["petrol".into(), "k12".into()],
            price: 650_000.0,
            images: BTreeMap::from([(ImageSlot::FrontView, "https://img/front.png".into())]),
        }
    }

    #[tokio::test]
    async fn insert_then_exists() {
        let store = MemoryStore::default();
        let l = listing("vxi");
        assert!(!store.exists(Fleet::Car, &l.key()).await.unwrap());

        let id = store.insert(Fleet::Car, &l).await.unwrap();
        assert_eq!(id, 1);
        assert!(store.exists(Fleet::Car, &l.key()).await.unwrap());
        // Fleets are separate tables
        assert!(!store.exists(Fleet::Scooter, &l.key()).await.unwrap());
    }

    #[tokio::test]
    async fn duplicate_key_conflicts() {
        let store = MemoryStore::default();
        store.insert(Fleet::Car, &listing("vxi")).await.unwrap();
        let err = store.insert(Fleet::Car, &listing("vxi")).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict));
        assert_eq!(store.len(Fleet::Car), 1);
    }

    #[tokio::test]
    async fn update_touches_only_matching_rows() {
        let store = MemoryStore::default();
        let a = store.insert(Fleet::Car, &listing("vxi")).await.unwrap();
        let b = store.insert(Fleet::Car, &listing("zxi")).await.unwrap();

        let n = store
            .update_image(Fleet::Car, 3, "vxi", ImageSlot::FrontView, "https://img/new.png")
            .await
            .unwrap();
        assert_eq!(n, 1);
        assert_eq!(
            store.get(Fleet::Car, a).unwrap().images[&ImageSlot::FrontView],
            "https://img/new.png"
        );
        assert_eq!(
            store.get(Fleet::Car, b).unwrap().images[&ImageSlot::FrontView],
            "https://img/front.png"
        );
    }

    #[tokio::test]
    async fn image_urls_reports_missing_slot_as_none() {
        let store = MemoryStore::default();
        store.insert(Fleet::Car, &listing("vxi")).await.unwrap();

        let rows = store
            .image_urls(Fleet::Car, 3, "vxi", ImageSlot::BackView)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].image_url, None);
        assert_eq!(rows[0].segment_name, "hatchback");
    }
}
