// Scheduled background work: nightly hotel refresh, refund status pulling and
// supplier token refresh, each driven by its own interval loop.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Local, NaiveTime, TimeZone, Timelike, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::config::{OrderConfig, SupplierConfig, SyncConfig};
use crate::error::EngineResult;
use crate::http_supplier::HttpHotelSupplier;
use crate::lock::CronGuard;
use crate::orders::OrderService;
use crate::sync::HotelSync;

#[async_trait]
pub trait Job: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn interval(&self) -> Duration;

    async fn run(&self);
}

/// Refreshes every stored hotel once per night. Only one instance wins the
/// lock, and nothing runs past the configured hour or once today's refresh
/// already went through.
pub struct SyncHotelsJob {
    sync: Arc<HotelSync>,
    guard: Arc<dyn CronGuard>,
    config: SyncConfig,
}

impl SyncHotelsJob {
    pub fn new(sync: Arc<HotelSync>, guard: Arc<dyn CronGuard>, config: SyncConfig) -> Self {
        Self { sync, guard, config }
    }

    pub async fn run_at(&self, now: DateTime<Local>) {
        if now.hour() >= self.config.try_sync_until_hour {
            debug!(hour = now.hour(), "outside the sync window");
            return;
        }

        // Checked again under the lock; another instance may finish in between
        if !self.can_sync().await {
            return;
        }

        let date = now.date_naive();
        let result = self
            .guard
            .with_lock(
                &self.config.lock_key,
                self.config.lock_lease(),
                Box::pin(async move {
                    if !self.can_sync().await {
                        return Ok(());
                    }
                    self.sync.update_all_blocking(date).await?;
                    info!(tag = "syncing_hotels_job_completed", "updating hotels job finished");
                    Ok(())
                }),
            )
            .await;

        if let Err(err) = result {
            error!(error = %err, tag = "syncing_hotels_job_error", "sync hotels job failed");
        }
    }

    async fn can_sync(&self) -> bool {
        match self.sync.has_been_synced().await {
            Ok(synced) => !synced,
            Err(err) => {
                error!(error = %err, "cannot tell whether hotels were synced today");
                false
            }
        }
    }
}

#[async_trait]
impl Job for SyncHotelsJob {
    fn name(&self) -> &'static str {
        "sync_hotels"
    }

    fn interval(&self) -> Duration {
        Duration::from_secs(self.config.interval_secs)
    }

    async fn run(&self) {
        self.run_at(Local::now()).await;
    }
}

pub struct RefundPullingJob {
    orders: Arc<OrderService>,
    config: OrderConfig,
}

impl RefundPullingJob {
    pub fn new(orders: Arc<OrderService>, config: OrderConfig) -> Self {
        Self { orders, config }
    }
}

// Looks back at most `refund_pulling_max_try_days`, never before the floor date
pub fn refund_pulling_since(now: DateTime<Utc>, config: &OrderConfig) -> DateTime<Utc> {
    let window_start = now - ChronoDuration::days(config.refund_pulling_max_try_days);
    let floor = Utc.from_utc_datetime(&config.refund_pulling_from_date.and_time(NaiveTime::MIN));
    window_start.max(floor)
}

#[async_trait]
impl Job for RefundPullingJob {
    fn name(&self) -> &'static str {
        "refund_pulling"
    }

    fn interval(&self) -> Duration {
        Duration::from_secs(self.config.refund_pulling_interval_secs)
    }

    async fn run(&self) {
        let since = refund_pulling_since(Utc::now(), &self.config);
        self.orders.update_refunded_orders_payment_status(since).await;
    }
}

#[async_trait]
pub trait TokenRefresher: Send + Sync + 'static {
    async fn refresh_token(&self) -> EngineResult<()>;
}

#[async_trait]
impl TokenRefresher for HttpHotelSupplier {
    async fn refresh_token(&self) -> EngineResult<()> {
        HttpHotelSupplier::refresh_token(self).await
    }
}

pub struct TokenRefreshJob {
    refresher: Arc<dyn TokenRefresher>,
    interval: Duration,
}

impl TokenRefreshJob {
    pub fn new(refresher: Arc<dyn TokenRefresher>, config: &SupplierConfig) -> Self {
        Self {
            refresher,
            interval: Duration::from_secs(config.token_refresh_secs),
        }
    }
}

#[async_trait]
impl Job for TokenRefreshJob {
    fn name(&self) -> &'static str {
        "sync_token"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run(&self) {
        if let Err(err) = self.refresher.refresh_token().await {
            error!(error = %err, tag = "cannot_get_access_token_error", "error while syncing access token");
        }
    }
}

/// Owns the interval loops. Each job runs on its first tick right away, then
/// every `interval`; a tick missed while the job was still busy is skipped.
#[derive(Default)]
pub struct JobScheduler {
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl JobScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn(&mut self, job: Arc<dyn Job>) {
        let name = job.name();
        let period = job.interval().max(Duration::from_secs(1));
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                debug!(job = name, "job tick");
                job.run().await;
            }
        });
        info!(job = name, interval_secs = period.as_secs(), "job registered");
        self.handles.push((name, handle));
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    // In-flight runs are abandoned, not drained
    pub fn shutdown(&mut self) {
        for (name, handle) in self.handles.drain(..) {
            handle.abort();
            debug!(job = name, "job stopped");
        }
    }
}

impl Drop for JobScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::lock::{GuardedAction, NoopGuard};
    use crate::model::fixtures::hotel;
    use crate::reference_cache::ReferenceCache;
    use crate::repository::{
        HotelRepository, InMemoryAmenityRepository, InMemoryCityRepository,
        InMemoryHotelRepository,
    };
    use crate::supplier::stub::StubSupplier;
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingGuard {
        acquisitions: AtomicUsize,
    }

    #[async_trait]
    impl CronGuard for CountingGuard {
        async fn with_lock<'a>(
            &self,
            _name: &str,
            _lease: Duration,
            action: GuardedAction<'a>,
        ) -> EngineResult<()> {
            self.acquisitions.fetch_add(1, Ordering::SeqCst);
            action.await
        }
    }

    struct HeldElsewhere;

    #[async_trait]
    impl CronGuard for HeldElsewhere {
        async fn with_lock<'a>(
            &self,
            _name: &str,
            _lease: Duration,
            _action: GuardedAction<'a>,
        ) -> EngineResult<()> {
            Ok(())
        }
    }

    fn sync_job(
        guard: Arc<dyn CronGuard>,
        synced_threshold: usize,
    ) -> (SyncHotelsJob, Arc<StubSupplier>, Arc<InMemoryHotelRepository>) {
        let supplier = Arc::new(StubSupplier::new());
        let hotels = Arc::new(InMemoryHotelRepository::new());
        let cities = Arc::new(InMemoryCityRepository::new());
        let amenities = Arc::new(InMemoryAmenityRepository::new());
        let cache = Arc::new(ReferenceCache::new(cities.clone(), amenities.clone()));
        let config = SyncConfig {
            synced_threshold,
            ..SyncConfig::default()
        };
        let sync = Arc::new(HotelSync::new(
            supplier.clone(),
            hotels.clone(),
            cities,
            amenities,
            cache,
            config.clone(),
        ));
        (SyncHotelsJob::new(sync, guard, config), supplier, hotels)
    }

    fn at_hour(hour: u32) -> DateTime<Local> {
        Local
            .with_ymd_and_hms(2024, 5, 3, hour, 15, 0)
            .earliest()
            .expect("valid local time")
    }

    #[tokio::test]
    async fn sync_job_refreshes_inside_the_window() {
        let (job, supplier, hotels) = sync_job(Arc::new(NoopGuard), 100);
        hotels.upsert(hotel("p1", 10)).await.unwrap();
        supplier.add_hotel(hotel("p1", 25));

        job.run_at(at_hour(3)).await;

        assert_eq!(supplier.calls("fetch_hotel_detail"), 1);
        assert_eq!(hotels.find_by_place_id("p1").await.unwrap().unwrap().price, 25);
    }

    #[tokio::test]
    async fn sync_job_does_nothing_after_the_cutoff_hour() {
        let (job, supplier, hotels) = sync_job(Arc::new(NoopGuard), 100);
        hotels.upsert(hotel("p1", 10)).await.unwrap();

        job.run_at(at_hour(6)).await;
        job.run_at(at_hour(23)).await;

        assert_eq!(supplier.calls("fetch_hotel_detail"), 0);
    }

    #[tokio::test]
    async fn sync_job_skips_when_already_synced_today() {
        let (job, supplier, hotels) = sync_job(Arc::new(NoopGuard), 1);
        hotels.upsert(hotel("p1", 10)).await.unwrap();

        job.run_at(at_hour(2)).await;

        assert_eq!(supplier.calls("fetch_hotel_detail"), 0);
    }

    #[tokio::test]
    async fn already_synced_day_never_touches_the_lock() {
        let guard = Arc::new(CountingGuard::default());
        let (job, supplier, hotels) = sync_job(guard.clone(), 1);
        hotels.upsert(hotel("p1", 10)).await.unwrap();

        job.run_at(at_hour(2)).await;

        assert_eq!(guard.acquisitions.load(Ordering::SeqCst), 0);
        assert_eq!(supplier.calls("fetch_hotel_detail"), 0);
    }

    #[tokio::test]
    async fn pending_day_takes_the_lock_once() {
        let guard = Arc::new(CountingGuard::default());
        let (job, supplier, hotels) = sync_job(guard.clone(), 100);
        hotels.upsert(hotel("p1", 10)).await.unwrap();
        supplier.add_hotel(hotel("p1", 30));

        job.run_at(at_hour(2)).await;

        assert_eq!(guard.acquisitions.load(Ordering::SeqCst), 1);
        assert_eq!(supplier.calls("fetch_hotel_detail"), 1);
    }

    #[tokio::test]
    async fn sync_job_skips_when_another_instance_holds_the_lock() {
        let (job, supplier, hotels) = sync_job(Arc::new(HeldElsewhere), 100);
        hotels.upsert(hotel("p1", 10)).await.unwrap();

        job.run_at(at_hour(1)).await;

        assert_eq!(supplier.calls("fetch_hotel_detail"), 0);
    }

    #[test]
    fn refund_window_is_capped_by_max_try_days() {
        let config = OrderConfig {
            refund_pulling_max_try_days: 30,
            ..OrderConfig::default()
        };
        let now = Utc.with_ymd_and_hms(2024, 5, 31, 12, 0, 0).unwrap();

        let since = refund_pulling_since(now, &config);

        assert_eq!(since, Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap());
    }

    #[test]
    fn refund_window_never_goes_before_the_floor() {
        let config = OrderConfig {
            refund_pulling_max_try_days: 30,
            refund_pulling_from_date: NaiveDate::from_ymd_opt(2024, 5, 20).unwrap(),
            ..OrderConfig::default()
        };
        let now = Utc.with_ymd_and_hms(2024, 5, 31, 12, 0, 0).unwrap();

        let since = refund_pulling_since(now, &config);

        assert_eq!(since, Utc.with_ymd_and_hms(2024, 5, 20, 0, 0, 0).unwrap());
    }

    #[derive(Default)]
    struct CountingRefresher {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TokenRefresher for CountingRefresher {
        async fn refresh_token(&self) -> EngineResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(EngineError::Upstream("login rejected".to_string()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn scheduler_runs_jobs_on_their_interval_until_shutdown() {
        let refresher = Arc::new(CountingRefresher::default());
        let config = SupplierConfig {
            token_refresh_secs: 10,
            ..SupplierConfig::default()
        };
        let mut scheduler = JobScheduler::new();
        scheduler.spawn(Arc::new(TokenRefreshJob::new(refresher.clone(), &config)));
        assert_eq!(scheduler.len(), 1);

        // ticks at 0s, 10s, 20s and 30s
        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 4);

        scheduler.shutdown();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 4);
        assert!(scheduler.is_empty());
    }
}
