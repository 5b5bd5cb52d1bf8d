// Persistence ports for hotels, orders and reference data, plus the in-memory
// stores the engine runs with when no database adapter is wired in.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{Entity, EngineError, EngineResult};
use crate::model::{Amenity, City, HotelRecord, OrderAggregate};

#[async_trait]
pub trait HotelRepository: Send + Sync + 'static {
    async fn find_by_place_id(&self, place_id: &str) -> EngineResult<Option<HotelRecord>>;

    // Insert or replace, stamping `updated_at` with the write time
    async fn upsert(&self, hotel: HotelRecord) -> EngineResult<HotelRecord>;

    // Replace without touching `updated_at`
    async fn update(&self, hotel: HotelRecord) -> EngineResult<()>;

    async fn all_ids(&self) -> EngineResult<Vec<String>>;

    // Hotels with a priced room written at or after `since`
    async fn count_synced_since(&self, since: DateTime<Utc>) -> EngineResult<usize>;
}

#[async_trait]
pub trait OrderRepository: Send + Sync + 'static {
    // Assigns the internal id
    async fn insert(&self, order: OrderAggregate) -> EngineResult<OrderAggregate>;

    async fn find_by_reseller_id(&self, reseller_order_id: i64) -> EngineResult<OrderAggregate>;

    async fn update(&self, order: &OrderAggregate) -> EngineResult<()>;

    /// Reseller ids of orders with a submitted refund that is not finalized
    /// yet and was touched at or after `since`.
    async fn refund_candidates(&self, since: DateTime<Utc>) -> EngineResult<Vec<i64>>;
}

#[async_trait]
pub trait CityRepository: Send + Sync + 'static {
    async fn all(&self) -> EngineResult<Vec<City>>;

    async fn replace_all(&self, cities: Vec<City>) -> EngineResult<()>;
}

#[async_trait]
pub trait AmenityRepository: Send + Sync + 'static {
    async fn all(&self) -> EngineResult<Vec<Amenity>>;

    /// Inserts amenities whose id is not stored yet and returns how many were
    /// added. Stored entries keep their icon and category.
    async fn add_missing(&self, amenities: Vec<Amenity>) -> EngineResult<usize>;
}

#[derive(Default)]
pub struct InMemoryHotelRepository {
    hotels: DashMap<String, HotelRecord>,
}

impl InMemoryHotelRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.hotels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hotels.is_empty()
    }
}

#[async_trait]
impl HotelRepository for InMemoryHotelRepository {
    async fn find_by_place_id(&self, place_id: &str) -> EngineResult<Option<HotelRecord>> {
        Ok(self.hotels.get(place_id).map(|entry| entry.value().clone()))
    }

    async fn upsert(&self, mut hotel: HotelRecord) -> EngineResult<HotelRecord> {
        if hotel.place_id.is_empty() {
            return Err(EngineError::Persistence(
                "hotel without place id".to_string(),
            ));
        }
        hotel.updated_at = Some(Utc::now());
        self.hotels.insert(hotel.place_id.clone(), hotel.clone());
        Ok(hotel)
    }

    async fn update(&self, hotel: HotelRecord) -> EngineResult<()> {
        match self.hotels.get_mut(&hotel.place_id) {
            Some(mut entry) => {
                *entry = hotel;
                Ok(())
            }
            None => Err(EngineError::NotFound(Entity::Hotel)),
        }
    }

    async fn all_ids(&self) -> EngineResult<Vec<String>> {
        Ok(self.hotels.iter().map(|entry| entry.key().clone()).collect())
    }

    async fn count_synced_since(&self, since: DateTime<Utc>) -> EngineResult<usize> {
        Ok(self
            .hotels
            .iter()
            .filter(|entry| entry.room_id != "0" && entry.updated_at.map_or(false, |at| at >= since))
            .count())
    }
}

pub struct InMemoryOrderRepository {
    // keyed by reseller order id
    orders: DashMap<i64, OrderAggregate>,
    next_id: AtomicU64,
}

impl Default for InMemoryOrderRepository {
    fn default() -> Self {
        Self {
            orders: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }
}

impl InMemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn insert(&self, mut order: OrderAggregate) -> EngineResult<OrderAggregate> {
        if self.orders.contains_key(&order.reseller_order_id) {
            return Err(EngineError::Persistence(format!(
                "order {} already exists",
                order.reseller_order_id
            )));
        }
        order.id = self.next_id.fetch_add(1, Ordering::Relaxed);
        order.updated_at = Some(Utc::now());
        self.orders.insert(order.reseller_order_id, order.clone());
        Ok(order)
    }

    async fn find_by_reseller_id(&self, reseller_order_id: i64) -> EngineResult<OrderAggregate> {
        self.orders
            .get(&reseller_order_id)
            .map(|entry| entry.value().clone())
            .ok_or(EngineError::NotFound(Entity::Order))
    }

    async fn update(&self, order: &OrderAggregate) -> EngineResult<()> {
        match self.orders.get_mut(&order.reseller_order_id) {
            Some(mut entry) => {
                let mut order = order.clone();
                order.updated_at = Some(Utc::now());
                *entry = order;
                Ok(())
            }
            None => Err(EngineError::NotFound(Entity::Order)),
        }
    }

    async fn refund_candidates(&self, since: DateTime<Utc>) -> EngineResult<Vec<i64>> {
        let mut ids: Vec<i64> = self
            .orders
            .iter()
            .filter(|entry| {
                entry.has_refund_request()
                    && !entry.refund_finalized()
                    && entry.updated_at.map_or(false, |at| at >= since)
            })
            .map(|entry| *entry.key())
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }
}

#[derive(Default)]
pub struct InMemoryCityRepository {
    cities: RwLock<Vec<City>>,
}

impl InMemoryCityRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cities(cities: Vec<City>) -> Self {
        Self {
            cities: RwLock::new(cities),
        }
    }
}

#[async_trait]
impl CityRepository for InMemoryCityRepository {
    async fn all(&self) -> EngineResult<Vec<City>> {
        Ok(self.cities.read().clone())
    }

    async fn replace_all(&self, cities: Vec<City>) -> EngineResult<()> {
        *self.cities.write() = cities;
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryAmenityRepository {
    amenities: DashMap<i64, Amenity>,
}

impl InMemoryAmenityRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_amenities(amenities: Vec<Amenity>) -> Self {
        let repo = Self::default();
        for amenity in amenities {
            repo.insert(amenity);
        }
        repo
    }

    pub fn insert(&self, amenity: Amenity) {
        self.amenities.insert(amenity.id, amenity);
    }
}

#[async_trait]
impl AmenityRepository for InMemoryAmenityRepository {
    async fn all(&self) -> EngineResult<Vec<Amenity>> {
        let mut amenities: Vec<Amenity> =
            self.amenities.iter().map(|entry| entry.value().clone()).collect();
        amenities.sort_by_key(|amenity| amenity.id);
        Ok(amenities)
    }

    async fn add_missing(&self, amenities: Vec<Amenity>) -> EngineResult<usize> {
        let mut added = 0;
        for amenity in amenities {
            if let Entry::Vacant(slot) = self.amenities.entry(amenity.id) {
                slot.insert(amenity);
                added += 1;
            }
        }
        Ok(added)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::{amenity, hotel};
    use crate::model::AmenityCategory;
    use chrono::Duration;

    #[tokio::test]
    async fn upsert_stamps_write_time() {
        let repo = InMemoryHotelRepository::new();
        let before = Utc::now();

        let saved = repo.upsert(hotel("p1", 100)).await.unwrap();

        assert!(saved.updated_at.unwrap() >= before);
        assert_eq!(repo.count_synced_since(before).await.unwrap(), 1);
        assert_eq!(
            repo.count_synced_since(Utc::now() + Duration::hours(1))
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn update_keeps_timestamp_and_requires_existing_hotel() {
        let repo = InMemoryHotelRepository::new();
        assert!(repo.update(hotel("p1", 1)).await.unwrap_err().is_not_found());

        let saved = repo.upsert(hotel("p1", 1)).await.unwrap();
        let mut changed = saved.clone();
        changed.update_rate_review(3, 4.0);
        repo.update(changed).await.unwrap();

        let stored = repo.find_by_place_id("p1").await.unwrap().unwrap();
        assert_eq!(stored.rate_review_count, 3);
        assert_eq!(stored.updated_at, saved.updated_at);
    }

    #[tokio::test]
    async fn order_ids_are_assigned_and_missing_orders_are_not_found() {
        let repo = InMemoryOrderRepository::new();
        let first = repo
            .insert(OrderAggregate::held(10, "s-10".into(), "h1".into()))
            .await
            .unwrap();
        let second = repo
            .insert(OrderAggregate::held(11, "s-11".into(), "h1".into()))
            .await
            .unwrap();

        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);
        assert!(matches!(
            repo.find_by_reseller_id(99).await,
            Err(EngineError::NotFound(Entity::Order))
        ));
    }

    #[tokio::test]
    async fn add_missing_amenities_keeps_curated_entries() {
        let repo = InMemoryAmenityRepository::with_amenities(vec![Amenity {
            id: 1,
            name: "pool".to_string(),
            name_en: "pool".to_string(),
            icon: "pool.svg".to_string(),
            category: Some(AmenityCategory {
                id: 3,
                name: "leisure".to_string(),
            }),
        }]);

        let added = repo
            .add_missing(vec![
                Amenity::from(&amenity(1, "swimming pool")),
                Amenity::from(&amenity(7, "spa")),
            ])
            .await
            .unwrap();

        assert_eq!(added, 1);
        let stored = repo.all().await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].icon, "pool.svg");
        assert_eq!(stored[0].name, "pool");
        assert!(stored[0].category.is_some());
        assert_eq!(stored[1].name, "spa");
        assert!(stored[1].category.is_none());
    }

    #[tokio::test]
    async fn refund_candidates_skip_finalized_and_unrequested() {
        let repo = InMemoryOrderRepository::new();
        let since = Utc::now() - Duration::days(1);

        let mut pending = OrderAggregate::held(1, "a".into(), "h".into());
        pending.update_refund_request(500, 0, 0);
        let mut finalized = OrderAggregate::held(2, "b".into(), "h".into());
        finalized.update_refund_request(501, 0, 0);
        finalized.refund_status = crate::model::REFUND_STATUS_PAYMENT_FINALIZED.to_string();
        let untouched = OrderAggregate::held(3, "c".into(), "h".into());

        for order in [pending, finalized, untouched] {
            repo.insert(order).await.unwrap();
        }

        assert_eq!(repo.refund_candidates(since).await.unwrap(), vec![1]);
    }
}
