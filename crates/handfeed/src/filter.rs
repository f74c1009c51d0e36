//! Smoothing filters for noisy per-frame measurements.
//!
//! Filters are split into immutable parameters (the type implementing [`Filter`]) and mutable
//! per-signal state ([`Filter::State`]), so one set of parameters can drive many independent
//! signals, like the 63 coordinates of a hand's landmarks.

pub mod ema;

/// A filter for a stream of values of type `V`.
pub trait Filter<V> {
    /// Per-signal state carried between invocations.
    type State: Default;

    /// Feeds `value` into the filter, returning the filtered value.
    fn filter(&self, state: &mut Self::State, value: V) -> V;
}
