// Hotel synchronisation against the supplier
//
// Work is fanned out one future per hotel id in bounded batches (a listing page
// or a configured chunk) and folded back in sequentially, so every batch
// resolves to exactly one `Option<HotelRecord>` per id regardless of failures.

use chrono::{DateTime, Local, NaiveDate, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::config::SyncConfig;
use crate::error::{Entity, EngineError, EngineResult};
use crate::model::{merge_hotels, Amenity, City, HotelRecord, HotelType};
use crate::reference_cache::ReferenceCache;
use crate::repository::{AmenityRepository, CityRepository, HotelRepository};
use crate::supplier::{HotelIdPages, HotelSupplier};

/// Latch held for the lifetime of one run.
#[derive(Debug, Default)]
pub struct RunFlag(AtomicBool);

impl RunFlag {
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    // None while another run holds the flag
    pub fn try_acquire(self: &Arc<Self>) -> Option<RunFlagGuard> {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunFlagGuard(self.clone()))
    }
}

pub struct RunFlagGuard(Arc<RunFlag>);

impl Drop for RunFlagGuard {
    fn drop(&mut self) {
        self.0 .0.store(false, Ordering::Release);
    }
}

/// One flag per run kind; the two kinds may overlap with each other.
#[derive(Debug, Default)]
pub struct SyncState {
    full_sync: Arc<RunFlag>,
    hotel_update: Arc<RunFlag>,
}

impl SyncState {
    pub fn is_syncing(&self) -> bool {
        self.full_sync.is_set()
    }

    pub fn is_updating(&self) -> bool {
        self.hotel_update.is_set()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskAccepted {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdateResult {
    pub message: String,
    pub time_taken: Duration,
    pub items_count: usize,
}

pub struct HotelSync {
    supplier: Arc<dyn HotelSupplier>,
    hotels: Arc<dyn HotelRepository>,
    cities: Arc<dyn CityRepository>,
    amenities: Arc<dyn AmenityRepository>,
    cache: Arc<ReferenceCache>,
    config: SyncConfig,
    state: SyncState,
}

impl HotelSync {
    pub fn new(
        supplier: Arc<dyn HotelSupplier>,
        hotels: Arc<dyn HotelRepository>,
        cities: Arc<dyn CityRepository>,
        amenities: Arc<dyn AmenityRepository>,
        cache: Arc<ReferenceCache>,
        config: SyncConfig,
    ) -> Self {
        Self {
            supplier,
            hotels,
            cities,
            amenities,
            cache,
            config,
            state: SyncState::default(),
        }
    }

    pub fn state(&self) -> &SyncState {
        &self.state
    }

    /// Starts a full catalogue sync in the background.
    pub fn sync_all(self: &Arc<Self>) -> EngineResult<TaskAccepted> {
        let guard = self
            .state
            .full_sync
            .try_acquire()
            .ok_or(EngineError::AlreadyInSyncing)?;

        let this = self.clone();
        tokio::spawn(async move {
            let _guard = guard;
            this.run_sync_all().await;
        });

        Ok(TaskAccepted {
            message: "syncing all hotels task is now running in background".to_string(),
        })
    }

    /// Starts a refresh of every stored hotel in the background.
    pub fn update_all(self: &Arc<Self>, date: NaiveDate) -> EngineResult<TaskAccepted> {
        let guard = self
            .state
            .hotel_update
            .try_acquire()
            .ok_or(EngineError::AlreadyUpdatingHotels)?;

        let this = self.clone();
        tokio::spawn(async move {
            let _guard = guard;
            if let Err(err) = this.update_all_blocking(date).await {
                error!(error = %err, tag = "updating_hotels_error", "updating hotels failed");
            }
        });

        Ok(TaskAccepted {
            message: "Update all hotels task is now running in background".to_string(),
        })
    }

    /// Refreshes every stored hotel and returns once all chunks are done.
    pub async fn update_all_blocking(&self, date: NaiveDate) -> EngineResult<UpdateResult> {
        let start = Instant::now();
        let ids = self.hotels.all_ids().await?;
        let items_count = ids.len();

        self.update_in_chunks(ids, date).await;

        let time_taken = start.elapsed();
        info!(
            items = items_count,
            elapsed_ms = time_taken.as_millis() as u64,
            tag = "updating_hotels_completed",
            "updating hotels completed"
        );
        Ok(UpdateResult {
            message: format!("updating hotels completed in {:?}", time_taken),
            time_taken,
            items_count,
        })
    }

    pub async fn update_some(&self, ids: Vec<String>, date: NaiveDate) -> EngineResult<UpdateResult> {
        let start = Instant::now();
        let items_count = ids.len();

        self.update_in_chunks(ids, date).await;

        Ok(UpdateResult {
            message: "Update some hotels completed".to_string(),
            time_taken: start.elapsed(),
            items_count,
        })
    }

    // Same as `update_some` priced for tonight
    pub async fn sync_some_hotels(&self, ids: Vec<String>) -> EngineResult<UpdateResult> {
        self.update_some(ids, Local::now().date_naive()).await
    }

    /// Cheap "already done today" check. Counts hotels written since local
    /// midnight, so a run that stopped past the threshold also counts as done.
    pub async fn has_been_synced(&self) -> EngineResult<bool> {
        let touched = self.hotels.count_synced_since(local_midnight()).await?;
        Ok(touched >= self.config.synced_threshold)
    }

    pub async fn update_hotel_rate_review(
        &self,
        place_id: &str,
        count: u32,
        score: f64,
    ) -> EngineResult<()> {
        let mut hotel = self
            .hotels
            .find_by_place_id(place_id)
            .await?
            .ok_or(EngineError::NotFound(Entity::Hotel))?;
        hotel.update_rate_review(count, score);
        self.hotels.update(hotel).await.map_err(|err| {
            error!(place_id, error = %err, tag = "updating_rate_and_review_error", "cannot store rate and review");
            err
        })
    }

    async fn run_sync_all(&self) {
        let start = Instant::now();
        let date = Local::now().date_naive();

        let cities = self.sync_cities().await;
        let mut pages = HotelIdPages::new(
            self.supplier.clone(),
            cities,
            self.config.hotels_per_page,
        );

        let mut stored = 0;
        while let Some(page) = pages.next_page().await {
            match page {
                Ok(ids) => {
                    let items = ids.into_iter().map(|id| (id.id, id.hotel_type)).collect();
                    stored += self.process_batch(items, date).await;
                }
                Err(err) => {
                    error!(error = %err, tag = "sync_hotels_error", "problem in getting list of hotels");
                }
            }
        }

        self.refresh_amenity_cache().await;
        info!(
            stored,
            elapsed_ms = start.elapsed().as_millis() as u64,
            tag = "syncing_hotels_completed",
            "syncing hotels completed"
        );
    }

    // Falls back to the cached cities when the supplier list is unavailable
    async fn sync_cities(&self) -> Vec<City> {
        let fresh = match self.supplier.list_cities().await {
            Ok(cities) => cities,
            Err(err) => {
                warn!(error = %err, tag = "sync_cities_error", "cannot fetch cities, using cached list");
                return self.cache.cities().all().to_vec();
            }
        };

        if let Err(err) = self.cities.replace_all(fresh.clone()).await {
            error!(error = %err, tag = "sync_cities_error", "cannot store cities");
        }
        if let Err(err) = self.cache.rebuild_cities().await {
            warn!(error = %err, tag = "sync_cities_error", "city cache keeps the previous list");
        }
        fresh
    }

    async fn update_in_chunks(&self, ids: Vec<String>, date: NaiveDate) {
        let chunk_size = self.config.chunk_size.max(1);
        for chunk in ids.chunks(chunk_size) {
            let items = chunk.iter().map(|id| (id.clone(), None)).collect();
            self.process_batch(items, date).await;
        }
        self.refresh_amenity_cache().await;
    }

    // Amenities first seen during the pass become visible to lookups
    async fn refresh_amenity_cache(&self) {
        if let Err(err) = self.cache.rebuild_amenities().await {
            warn!(error = %err, tag = "sync_amenities_error", "amenity cache keeps the previous list");
        }
    }

    // Returns how many hotels were written
    async fn process_batch(&self, items: Vec<(String, Option<HotelType>)>, date: NaiveDate) -> usize {
        let fetched = join_all(
            items
                .iter()
                .map(|(id, hotel_type)| self.fetch_hotel(id, *hotel_type, date)),
        )
        .await;

        let mut stored = 0;
        for incoming in fetched.into_iter().flatten() {
            if self.store(incoming).await {
                stored += 1;
            }
        }
        debug!(batch = items.len(), stored, "hotel batch processed");
        stored
    }

    async fn fetch_hotel(
        &self,
        hotel_id: &str,
        hotel_type: Option<HotelType>,
        date: NaiveDate,
    ) -> Option<HotelRecord> {
        let check_out = date.succ_opt().unwrap_or(date);
        let mut hotel = match self.supplier.fetch_hotel_detail(hotel_id, date, check_out).await {
            Ok(hotel) => hotel,
            Err(err) => {
                warn!(hotel_id, error = %err, tag = "getting_hotel_detail_error", "problem while getting hotel data");
                return None;
            }
        };

        if !hotel.city.is_empty() {
            if let Ok(city) = self.cache.find_city(&hotel.city) {
                hotel.province = city.state;
            }
        }

        hotel.hotel_type = match hotel_type {
            Some(hotel_type) => hotel_type,
            None => self.supplier.hotel_type(hotel_id).await.unwrap_or_else(|err| {
                warn!(hotel_id, error = %err, tag = "getting_hotel_type_error", "problem while getting hotel type");
                HotelType::default()
            }),
        };
        Some(hotel)
    }

    async fn store(&self, incoming: HotelRecord) -> bool {
        let existing = self.hotels.find_by_place_id(&incoming.place_id).await;
        let merged = match existing {
            Ok(Some(stored)) => merge_hotels(&stored, &incoming),
            Ok(None) => incoming,
            Err(err) => {
                error!(place_id = %incoming.place_id, error = %err, tag = "cannot_create_or_update_hotel", "cannot read stored hotel");
                return false;
            }
        };

        let stored = match self.hotels.upsert(merged).await {
            Ok(stored) => stored,
            Err(err) => {
                error!(error = %err, tag = "cannot_create_or_update_hotel", "cannot store hotel");
                return false;
            }
        };

        let amenities: Vec<Amenity> = stored.amenities.iter().map(Amenity::from).collect();
        if !amenities.is_empty() {
            match self.amenities.add_missing(amenities).await {
                Ok(0) => {}
                Ok(added) => debug!(place_id = %stored.place_id, added, "new amenities recorded"),
                Err(err) => {
                    error!(place_id = %stored.place_id, error = %err, tag = "cannot_save_hotel_amenities", "cannot record hotel amenities");
                }
            }
        }
        true
    }
}

pub(crate) fn local_midnight() -> DateTime<Utc> {
    let today = Local::now().date_naive();
    today
        .and_hms_opt(0, 0, 0)
        .and_then(|midnight| midnight.and_local_timezone(Local).earliest())
        .map(|midnight| midnight.with_timezone(&Utc))
        .unwrap_or_else(|| Utc::now() - chrono::Duration::hours(24))
}
