// Hotel sync and order orchestration engine

pub mod balance;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod http_supplier;
pub mod jobs;
pub mod lock;
pub mod logging;
pub mod model;
pub mod orders;
pub mod reference_cache;
pub mod repository;
pub mod retry;
pub mod supplier;
pub mod supplier_payload;
pub mod sync;

// Re-export key types for convenience
pub use config::{EngineConfig, Environment};
pub use engine::{Engine, Repositories};
pub use error::{EngineError, EngineResult, Entity, ErrorKind};
pub use lock::{BrokeredGuard, CronGuard, LockBroker, NoopGuard, RedisLockBroker};
pub use model::{merge_hotels, Amenity, City, HotelRecord, HotelType, OrderAggregate};
pub use orders::{OrderPolicy, OrderService};
pub use reference_cache::{CacheStatsReport, ReferenceCache};
pub use retry::{poll_until_ready, Attempt, DelaySchedule};
pub use supplier::HotelSupplier;
pub use sync::{HotelSync, TaskAccepted, UpdateResult};
