use rand::Rng;
use std::time::Duration;

use crate::control::ControlHandle;
use crate::error::{Error, Result};

/// `secs` with +/-30% random jitter, never below 10ms.
pub fn jittered(secs: f64) -> Result<Duration> {
    if !secs.is_finite() {
        return Err(Error::InvalidArgument(format!("sleep({}): not a finite number of seconds", secs)));
    }
    let jitter = secs.abs() * 0.3;
    let actual = if jitter > 0.0 {
        secs + rand::thread_rng().gen_range(-jitter..jitter)
    } else {
        secs
    };
    Duration::try_from_secs_f64(actual.max(0.01))
        .map_err(|e| Error::InvalidArgument(format!("sleep({}): {}", secs, e)))
}

/// Sleep for `secs` seconds with +/-30% random jitter, waking early on
/// termination. Requests longer than the rest limit are cut to it.
pub fn sleep_jitter(control: &ControlHandle, secs: f64) -> Result<()> {
    let cap = control.max_rest().as_secs_f64();
    let secs = if secs.is_finite() { secs.min(cap / 1.3) } else { secs };
    control.sleep(jittered(secs)?.min(control.max_rest()))
}

/// Uniform random duration in `[lo_ms, hi_ms]`.
pub fn between_ms(lo_ms: u64, hi_ms: u64) -> Duration {
    if hi_ms <= lo_ms {
        return Duration::from_millis(lo_ms);
    }
    Duration::from_millis(rand::thread_rng().gen_range(lo_ms..=hi_ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_stays_within_thirty_percent() {
        for _ in 0..200 {
            let d = jittered(1.0).unwrap().as_secs_f64();
            assert!((0.7..=1.3).contains(&d), "{}", d);
        }
        assert_eq!(jittered(0.0).unwrap(), Duration::from_millis(10));
    }

    #[test]
    fn jitter_rejects_unusable_seconds() {
        for secs in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY, 1e300] {
            assert!(matches!(jittered(secs), Err(Error::InvalidArgument(_))), "{}", secs);
        }
    }

    #[test]
    fn huge_sleep_is_cut_to_the_rest_limit() {
        let control = ControlHandle::with_timing(Duration::from_millis(10), Duration::from_millis(60));
        let start = std::time::Instant::now();
        sleep_jitter(&control, 1e300).unwrap();
        assert!(start.elapsed() < Duration::from_secs(1), "{:?}", start.elapsed());
        assert!(matches!(sleep_jitter(&control, f64::NAN), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn between_handles_empty_range() {
        assert_eq!(between_ms(40, 40), Duration::from_millis(40));
        let d = between_ms(10, 20);
        assert!(d >= Duration::from_millis(10) && d <= Duration::from_millis(20));
    }
}
