mod freshness_cache;

pub use freshness_cache::{now_to_the_second, FreshnessCache, FreshnessKey, InMemoryFreshnessCache};
