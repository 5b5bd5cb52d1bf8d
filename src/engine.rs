// Component wiring
//
// Repositories are the in-memory ones; a database-backed deployment swaps them
// through `Engine::assemble`.

use anyhow::Context;
use std::sync::Arc;
use tracing::{info, warn};

use crate::balance::{BalanceAlertNotifier, BalanceSupervisor, LoggingBalanceNotifier, SmsBalanceNotifier};
use crate::config::EngineConfig;
use crate::events::{EventPublisher, OrderEventDispatcher, TracingEventPublisher};
use crate::http_supplier::HttpHotelSupplier;
use crate::jobs::{JobScheduler, RefundPullingJob, SyncHotelsJob, TokenRefreshJob, TokenRefresher};
use crate::lock::{BrokeredGuard, CronGuard, NoopGuard, RedisLockBroker};
use crate::logging::init_logging;
use crate::orders::{OrderPolicy, OrderService};
use crate::reference_cache::ReferenceCache;
use crate::repository::{
    AmenityRepository, CityRepository, HotelRepository, InMemoryAmenityRepository,
    InMemoryCityRepository, InMemoryHotelRepository, InMemoryOrderRepository, OrderRepository,
};
use crate::supplier::HotelSupplier;
use crate::sync::HotelSync;

pub struct Repositories {
    pub hotels: Arc<dyn HotelRepository>,
    pub orders: Arc<dyn OrderRepository>,
    pub cities: Arc<dyn CityRepository>,
    pub amenities: Arc<dyn AmenityRepository>,
}

impl Repositories {
    pub fn in_memory() -> Self {
        Self {
            hotels: Arc::new(InMemoryHotelRepository::new()),
            orders: Arc::new(InMemoryOrderRepository::new()),
            cities: Arc::new(InMemoryCityRepository::new()),
            amenities: Arc::new(InMemoryAmenityRepository::new()),
        }
    }
}

pub struct Engine {
    config: EngineConfig,
    cache: Arc<ReferenceCache>,
    sync: Arc<HotelSync>,
    orders: Arc<OrderService>,
    balance: Arc<BalanceSupervisor>,
    guard: Arc<dyn CronGuard>,
    token_refresher: Option<Arc<dyn TokenRefresher>>,
    scheduler: JobScheduler,
}

impl Engine {
    /// Builds the engine against the HTTP supplier described by `config`.
    pub async fn bootstrap(config: EngineConfig) -> anyhow::Result<Self> {
        init_logging(config.environment, &config.logging);

        let supplier = Arc::new(
            HttpHotelSupplier::new(config.supplier.clone(), config.retry.clone())
                .context("building supplier client")?,
        );
        if let Err(err) = supplier.refresh_token().await {
            warn!(error = %err, tag = "cannot_get_access_token_error", "first token refresh failed, the refresh job will retry");
        }

        let guard = cron_guard(&config)?;
        let notifiers = balance_notifiers(&config)?;

        let mut engine = Self::assemble(
            config,
            supplier.clone(),
            Repositories::in_memory(),
            guard,
            Arc::new(TracingEventPublisher),
            notifiers,
        );
        engine.token_refresher = Some(supplier as Arc<dyn TokenRefresher>);
        engine.warm_up().await;
        Ok(engine)
    }

    pub fn assemble(
        config: EngineConfig,
        supplier: Arc<dyn HotelSupplier>,
        repositories: Repositories,
        guard: Arc<dyn CronGuard>,
        publisher: Arc<dyn EventPublisher>,
        notifiers: Vec<Arc<dyn BalanceAlertNotifier>>,
    ) -> Self {
        let cache = Arc::new(ReferenceCache::new(
            repositories.cities.clone(),
            repositories.amenities.clone(),
        ));
        let sync = Arc::new(HotelSync::new(
            supplier.clone(),
            repositories.hotels.clone(),
            repositories.cities.clone(),
            repositories.amenities.clone(),
            cache.clone(),
            config.sync.clone(),
        ));
        let balance = Arc::new(BalanceSupervisor::new(
            supplier.clone(),
            notifiers,
            config.balance.clone(),
        ));
        let orders = Arc::new(OrderService::new(
            supplier,
            repositories.orders,
            repositories.hotels,
            balance.clone(),
            OrderEventDispatcher::new(publisher, config.orders.refund_event_topic.clone()),
            OrderPolicy::from_config(&config),
        ));

        Self {
            config,
            cache,
            sync,
            orders,
            balance,
            guard,
            token_refresher: None,
            scheduler: JobScheduler::new(),
        }
    }

    // Failures are logged by the cache; lookups serve empty stores until the next rebuild
    pub async fn warm_up(&self) {
        if self.cache.rebuild().await.is_ok() {
            let stats = self.cache.stats();
            info!(cities = stats.cities, amenities = stats.amenities, "reference cache warmed up");
        }
    }

    pub fn start_jobs(&mut self) {
        self.scheduler.spawn(Arc::new(SyncHotelsJob::new(
            self.sync.clone(),
            self.guard.clone(),
            self.config.sync.clone(),
        )));
        self.scheduler.spawn(Arc::new(RefundPullingJob::new(
            self.orders.clone(),
            self.config.orders.clone(),
        )));
        if let Some(refresher) = &self.token_refresher {
            self.scheduler.spawn(Arc::new(TokenRefreshJob::new(
                refresher.clone(),
                &self.config.supplier,
            )));
        }
        info!(jobs = self.scheduler.len(), "all scheduled jobs registered");
    }

    pub fn shutdown(&mut self) {
        self.scheduler.shutdown();
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<ReferenceCache> {
        &self.cache
    }

    pub fn sync(&self) -> &Arc<HotelSync> {
        &self.sync
    }

    pub fn orders(&self) -> &Arc<OrderService> {
        &self.orders
    }

    pub fn balance(&self) -> &Arc<BalanceSupervisor> {
        &self.balance
    }

    pub fn running_jobs(&self) -> usize {
        self.scheduler.len()
    }
}

fn cron_guard(config: &EngineConfig) -> anyhow::Result<Arc<dyn CronGuard>> {
    match &config.lock_broker_url {
        Some(url) => {
            let broker = RedisLockBroker::new(url).context("connecting lock broker")?;
            Ok(Arc::new(BrokeredGuard::new(Arc::new(broker))))
        }
        None => {
            warn!("no lock broker configured, scheduled jobs run on every instance");
            Ok(Arc::new(NoopGuard))
        }
    }
}

fn balance_notifiers(config: &EngineConfig) -> anyhow::Result<Vec<Arc<dyn BalanceAlertNotifier>>> {
    let mut notifiers: Vec<Arc<dyn BalanceAlertNotifier>> = vec![Arc::new(LoggingBalanceNotifier)];
    if let Some(endpoint) = &config.balance.sms_endpoint {
        let sms = SmsBalanceNotifier::new(endpoint.clone(), config.balance.alert_phone_numbers.clone())
            .context("building sms notifier")?;
        notifiers.push(Arc::new(sms));
    }
    Ok(notifiers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Amenity;
    use crate::supplier::stub::{city, StubSupplier};

    fn engine_with(supplier: Arc<StubSupplier>) -> Engine {
        let repositories = Repositories {
            cities: Arc::new(InMemoryCityRepository::with_cities(vec![city(1, "Tehran")])),
            amenities: Arc::new(InMemoryAmenityRepository::with_amenities(vec![Amenity {
                id: 1,
                name: "pool".to_string(),
                name_en: "pool".to_string(),
                icon: String::new(),
                category: None,
            }])),
            ..Repositories::in_memory()
        };
        Engine::assemble(
            EngineConfig::default(),
            supplier,
            repositories,
            Arc::new(NoopGuard),
            Arc::new(TracingEventPublisher),
            vec![Arc::new(LoggingBalanceNotifier)],
        )
    }

    #[tokio::test]
    async fn warm_up_loads_reference_data() {
        let engine = engine_with(Arc::new(StubSupplier::new()));

        engine.warm_up().await;

        assert_eq!(engine.cache().find_city("Teh").unwrap().base_id, 1);
        assert_eq!(engine.cache().amenities().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn jobs_start_without_token_refresh_for_injected_suppliers() {
        let mut engine = engine_with(Arc::new(StubSupplier::new()));

        engine.start_jobs();
        assert_eq!(engine.running_jobs(), 2);

        engine.shutdown();
        assert_eq!(engine.running_jobs(), 0);
    }

    #[test]
    fn sms_notifier_is_registered_only_with_an_endpoint() {
        let mut config = EngineConfig::default();
        assert_eq!(balance_notifiers(&config).unwrap().len(), 1);

        config.balance.sms_endpoint = Some("http://sms.local".to_string());
        let names: Vec<&str> = balance_notifiers(&config)
            .unwrap()
            .iter()
            .map(|n| n.name())
            .collect();
        assert_eq!(names, vec!["logger", "sms"]);
    }

    #[test]
    fn missing_broker_url_falls_back_to_noop_guard() {
        assert!(cron_guard(&EngineConfig::default()).is_ok());
    }
}
