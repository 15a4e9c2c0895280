/*
 * delay.rs
 *
 * Random startup sleep. A thousand hosts with the same crontab line all
 * fire at :00 and hammer the same database. Sleeping a uniform [0, N]
 * seconds spreads them out.
 *
 * Millisecond resolution so small bounds still spread.
 */

use std::thread;
use std::time::Duration;

use rand::Rng;
use tracing::debug;

/// Pick a uniform delay in `[0, bound]`. A zero bound is always zero.
pub fn random_delay<R: Rng>(bound: Duration, rng: &mut R) -> Duration {
    if bound.is_zero() {
        return Duration::ZERO;
    }
    let max_ms = u64::try_from(bound.as_millis()).unwrap_or(u64::MAX);
    Duration::from_millis(rng.random_range(0..=max_ms))
}

/// Sleep a random duration in `[0, bound]`, returning what was slept.
pub fn random_sleep(bound: Duration) -> Duration {
    let delay = random_delay(bound, &mut rand::rng());
    if !delay.is_zero() {
        debug!(delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX), "random sleep");
        thread::sleep(delay);
    }
    delay
}
