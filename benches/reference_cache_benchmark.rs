use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use hotel_sync_engine::model::{Amenity, City};
use hotel_sync_engine::reference_cache::ReferenceCache;
use hotel_sync_engine::repository::{InMemoryAmenityRepository, InMemoryCityRepository};
use rand::{seq::SliceRandom, thread_rng};
use std::sync::Arc;
use std::thread;

fn cities(count: usize) -> Vec<City> {
    (0..count)
        .map(|i| City {
            id: i.to_string(),
            base_id: i as i64,
            name: format!("city{}", i),
            name_en: format!("city{}", i),
            state: format!("state{}", i % 31),
        })
        .collect()
}

fn amenities(count: usize) -> Vec<Amenity> {
    (0..count)
        .map(|i| Amenity {
            id: i as i64,
            name: format!("amenity{}", i),
            name_en: format!("amenity{}", i),
            icon: String::new(),
            category: None,
        })
        .collect()
}

// Lookups from several threads while the cache is rebuilt underneath them
pub fn reference_cache_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().expect("tokio runtime");
    let mut group = c.benchmark_group("reference_cache");

    for size in [100usize, 1_000, 10_000].iter() {
        let cache = Arc::new(ReferenceCache::new(
            Arc::new(InMemoryCityRepository::with_cities(cities(*size))),
            Arc::new(InMemoryAmenityRepository::with_amenities(amenities(200))),
        ));
        runtime.block_on(cache.rebuild()).expect("initial rebuild");
        let names: Vec<String> = (0..*size).map(|i| format!("city{}", i)).collect();

        group.bench_with_input(BenchmarkId::new("lookups_during_rebuild", size), size, |b, _| {
            b.iter(|| {
                let mut handles = vec![];
                for _ in 0..4 {
                    let cache = Arc::clone(&cache);
                    let names = names.clone();
                    handles.push(thread::spawn(move || {
                        let mut rng = thread_rng();
                        for _ in 0..250 {
                            let name = names.choose(&mut rng).expect("non-empty names");
                            let _ = black_box(cache.city(&name[4..]));
                        }
                    }));
                }

                runtime.block_on(cache.rebuild()).expect("rebuild");

                for handle in handles {
                    handle.join().expect("reader thread");
                }
                black_box(cache.stats())
            });
        });

        group.bench_with_input(BenchmarkId::new("find_city", size), size, |b, _| {
            b.iter(|| black_box(cache.find_city("city1")))
        });
    }

    group.finish();
}

criterion_group!(benches, reference_cache_benchmark);
criterion_main!(benches);
