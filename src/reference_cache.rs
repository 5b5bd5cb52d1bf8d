// In-memory reference data: cities and amenities
//
// Each half lives behind its own Arc that is swapped whole on rebuild, so a
// reader holding a store never sees a partially rebuilt list.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, error};

use crate::error::{Entity, EngineError, EngineResult};
use crate::model::{Amenity, City};
use crate::repository::{AmenityRepository, CityRepository};

#[derive(Debug, Default)]
pub struct CacheStats {
    pub lookups: AtomicUsize,
    pub misses: AtomicUsize,
    pub rebuilds: AtomicUsize,
    pub failed_rebuilds: AtomicUsize,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CacheStatsReport {
    pub lookups: usize,
    pub misses: usize,
    pub rebuilds: usize,
    pub failed_rebuilds: usize,
    pub cities: usize,
    pub amenities: usize,
}

fn contains_name(name: &str, name_en: &str, needle: &str) -> bool {
    name.contains(needle) || name_en.to_lowercase().contains(&needle.to_lowercase())
}

#[derive(Debug, Default, Clone)]
pub struct CityStore {
    cities: Vec<City>,
}

impl CityStore {
    pub fn new(cities: Vec<City>) -> Self {
        Self { cities }
    }

    pub fn all(&self) -> &[City] {
        &self.cities
    }

    // First city whose name contains `name`
    pub fn find_one(&self, name: &str) -> EngineResult<&City> {
        self.cities
            .iter()
            .find(|city| contains_name(&city.name, &city.name_en, name))
            .ok_or(EngineError::NotFound(Entity::City))
    }

    pub fn find(&self, name: &str) -> Vec<&City> {
        self.cities
            .iter()
            .filter(|city| contains_name(&city.name, &city.name_en, name))
            .collect()
    }

    pub fn get(&self, id: &str) -> EngineResult<&City> {
        self.cities
            .iter()
            .find(|city| city.id == id)
            .ok_or(EngineError::NotFound(Entity::City))
    }

    pub fn len(&self) -> usize {
        self.cities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cities.is_empty()
    }
}

#[derive(Debug, Default, Clone)]
pub struct AmenityStore {
    amenities: Vec<Amenity>,
}

impl AmenityStore {
    pub fn new(amenities: Vec<Amenity>) -> Self {
        Self { amenities }
    }

    pub fn all(&self) -> &[Amenity] {
        &self.amenities
    }

    pub fn find_one(&self, name: &str) -> EngineResult<&Amenity> {
        self.amenities
            .iter()
            .find(|amenity| contains_name(&amenity.name, &amenity.name_en, name))
            .ok_or(EngineError::NotFound(Entity::Amenity))
    }

    pub fn find(&self, name: &str) -> Vec<&Amenity> {
        self.amenities
            .iter()
            .filter(|amenity| contains_name(&amenity.name, &amenity.name_en, name))
            .collect()
    }

    pub fn get(&self, id: i64) -> EngineResult<&Amenity> {
        self.amenities
            .iter()
            .find(|amenity| amenity.id == id)
            .ok_or(EngineError::NotFound(Entity::Amenity))
    }

    // Unknown ids are skipped
    pub fn find_by_ids(&self, ids: &[i64]) -> Vec<&Amenity> {
        ids.iter().filter_map(|id| self.get(*id).ok()).collect()
    }

    pub fn len(&self) -> usize {
        self.amenities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.amenities.is_empty()
    }
}

/// Both halves as they were at one instant.
#[derive(Debug, Clone)]
pub struct ReferenceSnapshot {
    pub cities: Arc<CityStore>,
    pub amenities: Arc<AmenityStore>,
}

pub struct ReferenceCache {
    city_repo: Arc<dyn CityRepository>,
    amenity_repo: Arc<dyn AmenityRepository>,
    cities: RwLock<Arc<CityStore>>,
    amenities: RwLock<Arc<AmenityStore>>,
    stats: CacheStats,
}

impl ReferenceCache {
    /// Empty cache; call `rebuild` to load it.
    pub fn new(
        city_repo: Arc<dyn CityRepository>,
        amenity_repo: Arc<dyn AmenityRepository>,
    ) -> Self {
        Self {
            city_repo,
            amenity_repo,
            cities: RwLock::new(Arc::new(CityStore::default())),
            amenities: RwLock::new(Arc::new(AmenityStore::default())),
            stats: CacheStats::default(),
        }
    }

    pub fn cities(&self) -> Arc<CityStore> {
        self.cities.read().clone()
    }

    pub fn amenities(&self) -> Arc<AmenityStore> {
        self.amenities.read().clone()
    }

    pub fn snapshot(&self) -> ReferenceSnapshot {
        ReferenceSnapshot {
            cities: self.cities(),
            amenities: self.amenities(),
        }
    }

    pub fn find_city(&self, name: &str) -> EngineResult<City> {
        let cities = self.cities();
        let found = cities.find_one(name).cloned();
        self.record_lookup(found.is_ok());
        found
    }

    pub fn city(&self, id: &str) -> EngineResult<City> {
        let cities = self.cities();
        let found = cities.get(id).cloned();
        self.record_lookup(found.is_ok());
        found
    }

    pub fn find_amenity(&self, name: &str) -> EngineResult<Amenity> {
        let amenities = self.amenities();
        let found = amenities.find_one(name).cloned();
        self.record_lookup(found.is_ok());
        found
    }

    pub fn amenity(&self, id: i64) -> EngineResult<Amenity> {
        let amenities = self.amenities();
        let found = amenities.get(id).cloned();
        self.record_lookup(found.is_ok());
        found
    }

    /// Reloads both halves concurrently. A half whose load fails keeps its
    /// previous store; the first failure is returned after both finish.
    pub async fn rebuild(&self) -> EngineResult<()> {
        let (cities, amenities) = tokio::join!(self.rebuild_cities(), self.rebuild_amenities());
        cities.and(amenities)
    }

    pub async fn rebuild_cities(&self) -> EngineResult<()> {
        match self.city_repo.all().await {
            Ok(cities) => {
                let store = Arc::new(CityStore::new(cities));
                debug!(cities = store.len(), "city store rebuilt");
                *self.cities.write() = store;
                self.stats.rebuilds.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(err) => {
                error!(error = %err, tag = "update_city_store_error", "cannot rebuild city store");
                self.stats.failed_rebuilds.fetch_add(1, Ordering::Relaxed);
                Err(err)
            }
        }
    }

    pub async fn rebuild_amenities(&self) -> EngineResult<()> {
        match self.amenity_repo.all().await {
            Ok(amenities) => {
                let store = Arc::new(AmenityStore::new(amenities));
                debug!(amenities = store.len(), "amenity store rebuilt");
                *self.amenities.write() = store;
                self.stats.rebuilds.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(err) => {
                error!(error = %err, tag = "update_amenity_store_error", "cannot rebuild amenity store");
                self.stats.failed_rebuilds.fetch_add(1, Ordering::Relaxed);
                Err(err)
            }
        }
    }

    pub fn stats(&self) -> CacheStatsReport {
        CacheStatsReport {
            lookups: self.stats.lookups.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            rebuilds: self.stats.rebuilds.load(Ordering::Relaxed),
            failed_rebuilds: self.stats.failed_rebuilds.load(Ordering::Relaxed),
            cities: self.cities.read().len(),
            amenities: self.amenities.read().len(),
        }
    }

    fn record_lookup(&self, hit: bool) {
        self.stats.lookups.fetch_add(1, Ordering::Relaxed);
        if !hit {
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
        }
    }
}
