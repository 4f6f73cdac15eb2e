//! Cost functions for cached values.
//!
//! The cache enforces `Σ cost(entry) ≤ total_cost_limit`. What a unit of cost
//! means is up to the weigher: bytes for raw payloads, pixels for decoded
//! images, or a flat 1 to turn the cost budget into a second count limit.

/// Computes the cost of a cached value. Zero is a legal cost.
pub trait Weigher<V>: Send + Sync + 'static {
    fn weigh(&self, value: &V) -> u64;
}

impl<V, F> Weigher<V> for F
where
    F: Fn(&V) -> u64 + Send + Sync + 'static,
{
    fn weigh(&self, value: &V) -> u64 {
        self(value)
    }
}

/// Every value costs one unit.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnitWeigher;

impl<V> Weigher<V> for UnitWeigher {
    fn weigh(&self, _value: &V) -> u64 {
        1
    }
}

/// Byte length of the value.
#[derive(Debug, Clone, Copy, Default)]
pub struct ByteLenWeigher;

impl<V: AsRef<[u8]>> Weigher<V> for ByteLenWeigher {
    fn weigh(&self, value: &V) -> u64 {
        value.as_ref().len() as u64
    }
}
