pub mod plan_cache;

pub use plan_cache::PlanCache;
