/// A small memoization seam keyed by an arbitrary key type.
///
/// `PfnOffset` is the only implementor today: it lets a `Memory` block
/// remember the result of an expensive timing-based PFN offset search
/// (see [`super::pfn_offset_resolver::PfnOffsetResolver`]) keyed by the
/// `(MemConfiguration, threshold)` pair that produced it, while still
/// allowing a `Fixed` offset to short-circuit the whole mechanism.
pub trait KeyedCache<V, K> {
    /// Returns the cached value for `key`, or `None` if nothing is cached
    /// for that key (including if a different key was cached last).
    fn get_cached(&self, key: K) -> Option<V>;

    /// Stores `state` under `key`, replacing whatever was cached before.
    fn put(&self, state: Option<V>, key: K) -> Option<V>;
}
