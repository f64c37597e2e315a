//! Demonstrates pool-backed containers created through the global registry.
//!
//! Builds a few containers by hand and through the `make_*` functions, runs a timed
//! fill-and-clear workload against both heap-backed and pool-backed containers and finally
//! prints the statistics of every pool the registry created.

use std::hint::black_box;
use std::sync::Arc;
use std::time::{Duration, Instant};

use allocator_api2::alloc::{Allocator, Global};
use pool_resource::{
    MemoryResource, PolymorphicAllocator, PoolList, PoolMap, PoolResource, PoolString,
    ResourceRegistry, make_list, make_map, make_queue, make_set, make_string,
};

const ITEMS: i32 = 10_000;
const RUNS: usize = 3;

fn main() {
    println!("=== Pool-backed containers ===");
    println!();

    {
        // A list bound to a resource created by hand rather than by the registry.
        let resource = Arc::new(PoolResource::default());
        let shared: Arc<dyn MemoryResource> = Arc::<PoolResource>::clone(&resource);
        let mut list = PoolList::new_in(PolymorphicAllocator::new(shared));
        list.push_back(123);

        println!("Hand-made resource: {}", resource.statistics());
    }

    let mut list = make_list::<i32>().expect("i32 list nodes fit in pool blocks");
    list.push_back(123);

    let mut map = make_map::<char, i32>().expect("char to i32 map nodes fit in pool blocks");
    *map.get_or_insert_with('a', || 0) = 10;

    let mut queue = make_queue::<i32>().expect("i32 queue segments fit in pool blocks");
    queue.push(123);

    let mut set = make_set::<PoolString>().expect("string set nodes fit in pool blocks");
    set.insert(make_string("hello").expect("short strings fit in pool blocks"));
    set.insert(make_string("world").expect("short strings fit in pool blocks"));

    println!("list  = {list:?}");
    println!("map   = {map:?}");
    println!("queue = {queue:?}");
    println!("set   = {set:?}");
    println!();

    for run in 1..=RUNS {
        report("list, global heap", run, list_workload(|| PoolList::new_in(Global)));
    }
    for run in 1..=RUNS {
        report(
            "list, fixed block",
            run,
            list_workload(|| make_list().expect("i32 list nodes fit in pool blocks")),
        );
    }
    for run in 1..=RUNS {
        report("map, global heap", run, map_workload(|| PoolMap::new_in(Global)));
    }
    for run in 1..=RUNS {
        report(
            "map, fixed block",
            run,
            map_workload(|| make_map().expect("i32 to char map nodes fit in pool blocks")),
        );
    }
    for run in 1..=RUNS {
        report(
            "string, global heap",
            run,
            string_workload(|| PoolString::from_str_in("benchmark", Global)),
        );
    }
    for run in 1..=RUNS {
        report(
            "string, fixed block",
            run,
            string_workload(|| make_string("benchmark").expect("short strings fit in pool blocks")),
        );
    }

    println!();
    println!("=== Registry statistics ===");
    println!(
        "{} resources: {}",
        ResourceRegistry::global().resource_count(),
        ResourceRegistry::global().statistics()
    );
}

fn report(name: &str, run: usize, elapsed: Duration) {
    println!("{name} (run {run}): {elapsed:?}");
}

fn list_workload<A, F>(make: F) -> Duration
where
    A: Allocator,
    F: FnOnce() -> PoolList<i32, A>,
{
    let start = Instant::now();

    let mut list = make();
    for value in 0..ITEMS {
        list.push_back(black_box(value));
    }
    list.clear();

    start.elapsed()
}

fn map_workload<A, F>(make: F) -> Duration
where
    A: Allocator,
    F: FnOnce() -> PoolMap<i32, char, A>,
{
    let start = Instant::now();

    let mut map = make();
    for key in 0..ITEMS {
        *map.get_or_insert_with(black_box(key), || 'a') = 'a';
    }
    map.clear();

    start.elapsed()
}

fn string_workload<A, F>(mut make: F) -> Duration
where
    A: Allocator,
    F: FnMut() -> PoolString<A>,
{
    let start = Instant::now();

    for _ in 0..ITEMS {
        let mut text = make();
        text += black_box(" text that forces the buffer to grow");
        black_box(&text);
    }

    start.elapsed()
}
