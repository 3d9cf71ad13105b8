//! Generic types and units for working with time.
//!
//! This is a re-export of parts of the [fugit] crate, plus the clock
//! the drivers use to expire stale state.

pub use fugit::MillisDurationU32 as MillisDuration;
pub use fugit::TimerInstantU32;

pub use fugit::ExtU32 as DurationExtU32;

/// A monotonic millisecond instant.
pub type Instant = TimerInstantU32<1000>;

/// A monotonic millisecond clock, provided by the host.
pub trait Clock {
    /// The current instant.
    fn now(&mut self) -> Instant;
}

impl<C> Clock for &mut C
where
    C: Clock,
{
    fn now(&mut self) -> Instant {
        C::now(self)
    }
}

/// Has `timeout` elapsed between `since` and `now`?
///
/// Instants that appear to be in the future count as not elapsed.
pub fn elapsed(since: Instant, now: Instant, timeout: MillisDuration) -> bool {
    now.checked_duration_since(since)
        .map(|d| d >= timeout)
        .unwrap_or(false)
}
