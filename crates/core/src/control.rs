//! Run/pause/terminate flags and scheduled breaks.
//!
//! A single [`ControlHandle`] is created by the host and cloned into every
//! component that needs to honour a pause or a stop: the motion synthesizer,
//! the interaction guard, the Lua runtime and the hotkey listener.

use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use rand::Rng;

use crate::error::{Error, Result};
use crate::logger;
use crate::settings::ControlSettings;

/// Granularity of [`ControlHandle::sleep`].
const SLEEP_SLICE: Duration = Duration::from_millis(100);

#[derive(Debug)]
struct ControlState {
    terminate: AtomicBool,
    paused: AtomicBool,
    break_until: Mutex<Option<Instant>>,
    poll: Duration,
    max_rest: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RunStatus {
    Running,
    Paused,
    OnBreak(Duration),
    Terminated,
}

#[derive(Debug, Clone)]
pub struct ControlHandle {
    inner: Arc<ControlState>,
}

impl Default for ControlHandle {
    fn default() -> Self {
        Self::new(&ControlSettings::default())
    }
}

impl ControlHandle {
    pub fn new(settings: &ControlSettings) -> Self {
        Self::with_timing(
            Duration::from_millis(settings.poll_ms.max(1)),
            Duration::from_secs(settings.max_rest_secs),
        )
    }

    pub fn with_timing(poll: Duration, max_rest: Duration) -> Self {
        Self {
            inner: Arc::new(ControlState {
                terminate: AtomicBool::new(false),
                paused: AtomicBool::new(false),
                break_until: Mutex::new(None),
                poll,
                max_rest,
            }),
        }
    }

    pub fn request_terminate(&self) {
        if !self.inner.terminate.swap(true, Ordering::AcqRel) {
            logger::warn_p("control", "termination requested");
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.inner.terminate.load(Ordering::Acquire)
    }

    /// `Err(Terminated)` once a stop was requested.
    pub fn check(&self) -> Result<()> {
        if self.is_terminated() {
            Err(Error::Terminated)
        } else {
            Ok(())
        }
    }

    pub fn set_paused(&self, paused: bool) {
        self.inner.paused.store(paused, Ordering::Release);
    }

    /// Flip the pause flag, returning the new value.
    pub fn toggle_pause(&self) -> bool {
        let now = !self.inner.paused.fetch_xor(true, Ordering::AcqRel);
        logger::info_p("control", if now { "paused" } else { "resumed" });
        now
    }

    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::Acquire)
    }

    /// Longest a guarded call may rest before giving up.
    pub fn max_rest(&self) -> Duration {
        self.inner.max_rest
    }

    /// Block guarded calls until `duration` from now, capped at the rest
    /// limit. Does not block the caller.
    pub fn schedule_break(&self, duration: Duration) {
        let duration = duration.min(self.inner.max_rest);
        let until = Instant::now() + duration;
        if let Ok(mut slot) = self.inner.break_until.lock() {
            *slot = Some(until);
        }
        logger::info_p("control", &format!("break scheduled for {:.0}s", duration.as_secs_f64()));
    }

    pub fn clear_break(&self) {
        if let Ok(mut slot) = self.inner.break_until.lock() {
            *slot = None;
        }
    }

    /// Time left in the current break, if one is active.
    pub fn break_remaining(&self) -> Option<Duration> {
        let until = (*self.inner.break_until.lock().ok()?)?;
        until.checked_duration_since(Instant::now()).filter(|d| !d.is_zero())
    }

    /// With probability `probability`, schedule a break lasting a uniformly
    /// drawn number of seconds from `secs`, capped at the rest limit. The
    /// next guarded call pays for it.
    pub fn propose_break(&self, probability: f64, secs: RangeInclusive<f64>) -> Result<Option<Duration>> {
        let (lo, hi) = (*secs.start(), *secs.end());
        if !probability.is_finite() || !lo.is_finite() || !hi.is_finite() {
            return Err(Error::InvalidArgument(format!(
                "propose_break({}, {}, {}): arguments must be finite",
                probability, lo, hi
            )));
        }
        let mut rng = rand::thread_rng();
        if !rng.gen_bool(probability.clamp(0.0, 1.0)) {
            return Ok(None);
        }
        let cap = self.inner.max_rest.as_secs_f64();
        let (lo, hi) = (lo.clamp(0.0, cap), hi.clamp(0.0, cap));
        let secs = if hi > lo { rng.gen_range(lo..=hi) } else { lo };
        let duration = Duration::from_secs_f64(secs);
        self.schedule_break(duration);
        Ok(Some(duration))
    }

    pub fn status(&self) -> RunStatus {
        if self.is_terminated() {
            RunStatus::Terminated
        } else if self.is_paused() {
            RunStatus::Paused
        } else if let Some(left) = self.break_remaining() {
            RunStatus::OnBreak(left)
        } else {
            RunStatus::Running
        }
    }

    /// Wait while paused or on break, waking at least every poll interval to
    /// re-check the stop flag.
    pub fn wait_while_resting(&self) -> Result<()> {
        let started = Instant::now();
        let mut announced = false;
        loop {
            self.check()?;
            let nap = if self.is_paused() {
                self.inner.poll
            } else if let Some(left) = self.break_remaining() {
                left.min(self.inner.poll)
            } else {
                if announced {
                    logger::info_p("control", "resuming");
                }
                return Ok(());
            };
            let rested = started.elapsed();
            if rested >= self.inner.max_rest {
                return Err(Error::RestTimeout(rested));
            }
            if !announced {
                logger::info_p("control", "resting");
                announced = true;
            }
            thread::sleep(nap);
        }
    }

    /// Sleep that gives up promptly when termination is requested.
    pub fn sleep(&self, duration: Duration) -> Result<()> {
        // past the clock's range only termination ends the wait
        let deadline = Instant::now().checked_add(duration);
        loop {
            self.check()?;
            let now = Instant::now();
            let slice = match deadline {
                Some(d) if now >= d => return Ok(()),
                Some(d) => (d - now).min(SLEEP_SLICE),
                None => SLEEP_SLICE,
            };
            thread::sleep(slice);
        }
    }

    /// Run `body` between two rest checkpoints: the call does not start
    /// while paused or on break, and does not return into one either.
    pub fn guarded<T>(&self, body: impl FnOnce() -> Result<T>) -> Result<T> {
        self.wait_while_resting()?;
        let out = body()?;
        self.wait_while_resting()?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn fast() -> ControlHandle {
        ControlHandle::with_timing(Duration::from_millis(20), Duration::from_secs(30))
    }

    #[test]
    fn guarded_runs_body_when_idle() {
        let control = fast();
        assert_eq!(control.guarded(|| Ok(7)).unwrap(), 7);
    }

    #[test]
    fn guarded_refuses_after_terminate() {
        let control = fast();
        control.request_terminate();
        let ran = AtomicUsize::new(0);
        let res = control.guarded(|| {
            ran.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        assert!(matches!(res, Err(Error::Terminated)));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn break_delays_the_body() {
        let control = fast();
        control.schedule_break(Duration::from_millis(250));
        let start = Instant::now();
        let body_started = control.guarded(|| Ok(start.elapsed())).unwrap();
        assert!(body_started >= Duration::from_millis(250), "{:?}", body_started);
    }

    #[test]
    fn terminate_during_break_is_seen_within_a_poll() {
        let control = ControlHandle::with_timing(Duration::from_secs(1), Duration::from_secs(60));
        control.schedule_break(Duration::from_secs(10));
        let stopper = control.clone();
        let start = Instant::now();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            stopper.request_terminate();
        });
        let res = control.guarded(|| Ok(()));
        handle.join().unwrap();
        assert!(matches!(res, Err(Error::Terminated)));
        assert!(start.elapsed() < Duration::from_millis(1500));
    }

    #[test]
    fn pause_blocks_until_resumed() {
        let control = fast();
        control.set_paused(true);
        let resumer = control.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(150));
            resumer.set_paused(false);
        });
        let start = Instant::now();
        control.wait_while_resting().unwrap();
        handle.join().unwrap();
        assert!(start.elapsed() >= Duration::from_millis(140));
    }

    #[test]
    fn rest_is_capped() {
        let control = ControlHandle::with_timing(Duration::from_millis(10), Duration::from_millis(50));
        control.set_paused(true);
        assert!(matches!(control.wait_while_resting(), Err(Error::RestTimeout(_))));
    }

    #[test]
    fn propose_break_respects_probability() {
        let control = fast();
        assert!(control.propose_break(0.0, 1.0..=2.0).unwrap().is_none());
        assert!(control.break_remaining().is_none());

        let d = control.propose_break(1.0, 1.0..=2.0).unwrap().unwrap();
        assert!(d >= Duration::from_secs(1) && d <= Duration::from_secs(2));
        assert!(matches!(control.status(), RunStatus::OnBreak(_)));
    }

    #[test]
    fn sleep_beyond_the_clock_range_still_stops() {
        let control = fast();
        let stopper = control.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            stopper.request_terminate();
        });
        let res = control.sleep(Duration::MAX);
        handle.join().unwrap();
        assert!(matches!(res, Err(Error::Terminated)));
    }

    #[test]
    fn propose_break_rejects_non_finite_arguments() {
        let control = fast();
        for (p, lo, hi) in [(f64::NAN, 1.0, 2.0), (1.0, f64::INFINITY, 2.0), (1.0, 1.0, f64::NAN)] {
            let res = control.propose_break(p, lo..=hi);
            assert!(matches!(res, Err(Error::InvalidArgument(_))), "{:?}", res);
        }
        assert!(control.break_remaining().is_none());
    }

    #[test]
    fn propose_break_is_capped_at_the_rest_limit() {
        let control = ControlHandle::with_timing(Duration::from_millis(10), Duration::from_secs(5));
        let d = control.propose_break(1.0, 1e300..=1e300).unwrap().unwrap();
        assert_eq!(d, Duration::from_secs(5));
        assert!(control.break_remaining().unwrap() <= Duration::from_secs(5));
    }

    #[test]
    fn sleep_is_interruptible() {
        let control = fast();
        let stopper = control.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            stopper.request_terminate();
        });
        let start = Instant::now();
        let res = control.sleep(Duration::from_secs(5));
        handle.join().unwrap();
        assert!(matches!(res, Err(Error::Terminated)));
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn toggle_pause_flips() {
        let control = fast();
        assert!(control.toggle_pause());
        assert_eq!(control.status(), RunStatus::Paused);
        assert!(!control.toggle_pause());
        assert_eq!(control.status(), RunStatus::Running);
    }
}
