//! Human-like cursor motion.
//!
//! A move is planned as a list of waypoints (optional curve point, optional
//! overshoot, then the literal target) and each leg is played back along a
//! quadratic Bézier with cubic easing, lateral wobble, a heading cone and a
//! per-step pixel cap. A short settle phase after the last scheduled step
//! walks any remaining distance so the cursor always ends on the target.
//!
//! Every gesture runs inside an [`InputBlock`], and every step checks the
//! [`ControlHandle`] so a stop request aborts mid-flight.

use std::f64::consts::PI;
use std::ops::{Deref, DerefMut};
use std::thread;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::control::ControlHandle;
use crate::error::Result;
use crate::logger;
use crate::platform::InputDevice;
use crate::region::Region;
use crate::settings::MotionSettings;
use crate::sleep::between_ms;
use crate::types::{MouseButton, Point};

/// Default cursor speed in px/s before the speed multiplier.
const BASE_SPEED: f64 = 700.0;
const MIN_LEG_SECS: f64 = 0.05;
const MAX_LEG_SECS: f64 = 0.5;
/// Ceiling for explicit speeds; slower requests are not honoured past this.
const MAX_SLOW_LEG_SECS: f64 = 5.0;
const MIN_STEPS: usize = 8;
const PX_PER_STEP: f64 = 8.0;
const MIN_STEP_TIME: Duration = Duration::from_millis(10);
const OVERSHOOT_MIN_DISTANCE: f64 = 40.0;

/// Waypoints for one move. The last waypoint is always the literal target.
#[derive(Debug, Clone, PartialEq)]
pub struct MotionPlan {
    pub start: Point,
    pub waypoints: Vec<Point>,
}

impl MotionPlan {
    pub fn target(&self) -> Point {
        self.waypoints.last().copied().unwrap_or(self.start)
    }

    /// Legs as `(from, to)` pairs.
    pub fn legs(&self) -> impl Iterator<Item = (Point, Point)> + '_ {
        std::iter::once(self.start)
            .chain(self.waypoints.iter().copied())
            .zip(self.waypoints.iter().copied())
    }
}

/// Blocks physical input for its lifetime.
pub struct InputBlock<'a> {
    device: &'a mut dyn InputDevice,
}

impl<'a> InputBlock<'a> {
    pub fn new(device: &'a mut dyn InputDevice) -> Self {
        device.block_input(true);
        Self { device }
    }
}

impl Drop for InputBlock<'_> {
    fn drop(&mut self) {
        self.device.block_input(false);
    }
}

impl<'a> Deref for InputBlock<'a> {
    type Target = dyn InputDevice + 'a;

    fn deref(&self) -> &Self::Target {
        self.device
    }
}

impl DerefMut for InputBlock<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.device
    }
}

/// The single virtual cursor. Owned by one actor thread.
pub struct Mouse {
    device: Box<dyn InputDevice>,
    control: ControlHandle,
    settings: MotionSettings,
    rng: StdRng,
}

impl Mouse {
    pub fn new(device: Box<dyn InputDevice>, control: ControlHandle, settings: MotionSettings) -> Self {
        Self::with_rng(device, control, settings, StdRng::from_entropy())
    }

    /// Reproducible planning and wobble.
    pub fn with_seed(device: Box<dyn InputDevice>, control: ControlHandle, settings: MotionSettings, seed: u64) -> Self {
        Self::with_rng(device, control, settings, StdRng::seed_from_u64(seed))
    }

    fn with_rng(device: Box<dyn InputDevice>, control: ControlHandle, settings: MotionSettings, rng: StdRng) -> Self {
        logger::register_prefix("motion", logger::COLOR_BLUE);
        Self { device, control, settings, rng }
    }

    pub fn control(&self) -> &ControlHandle {
        &self.control
    }

    pub fn position(&self) -> Point {
        self.device.cursor()
    }

    pub fn device_mut(&mut self) -> &mut dyn InputDevice {
        self.device.as_mut()
    }

    /// Uniform interior point of `region`, drawn from this mouse's generator.
    pub fn sample_point(&mut self, region: &Region) -> Option<Point> {
        region.get_point_within(&mut self.rng)
    }

    /// Waypoints from `from` to `to`, without moving anything.
    pub fn plan(&mut self, from: Point, to: Point) -> MotionPlan {
        let screen = self.device.screen_size();
        plan_path(&mut self.rng, &self.settings, screen, from, to)
    }

    /// Glide to `target`. `speed` is in px/s; `None` uses the configured pace.
    pub fn move_to(&mut self, target: Point, speed: Option<f64>) -> Result<()> {
        self.control.check()?;
        let mut dev = InputBlock::new(self.device.as_mut());
        glide(&mut *dev, &mut self.rng, &self.settings, &self.control, target, speed)
    }

    /// Press and release `button` at the current position.
    pub fn click(&mut self, button: MouseButton) -> Result<()> {
        self.control.check()?;
        let mut dev = InputBlock::new(self.device.as_mut());
        press(&mut *dev, &self.control, button)
    }

    pub fn move_and_click(&mut self, target: Point, button: MouseButton) -> Result<()> {
        self.control.check()?;
        let mut dev = InputBlock::new(self.device.as_mut());
        glide(&mut *dev, &mut self.rng, &self.settings, &self.control, target, None)?;
        self.control.sleep(between_ms(30, 90))?;
        press(&mut *dev, &self.control, button)
    }

    /// Approach a point near `target`, click, re-settle on `target`, click again.
    pub fn double_click(&mut self, target: Point) -> Result<()> {
        self.control.check()?;
        let near = target.offset(self.rng.gen_range(-2..=2), self.rng.gen_range(-2..=2));
        let mut dev = InputBlock::new(self.device.as_mut());
        glide(&mut *dev, &mut self.rng, &self.settings, &self.control, near, None)?;
        press(&mut *dev, &self.control, MouseButton::Left)?;
        self.control.sleep(between_ms(60, 140))?;
        glide(&mut *dev, &mut self.rng, &self.settings, &self.control, target, None)?;
        press(&mut *dev, &self.control, MouseButton::Left)
    }

    /// Scroll one notch at a time; positive is up.
    pub fn scroll(&mut self, clicks: i32) -> Result<()> {
        self.control.check()?;
        let mut dev = InputBlock::new(self.device.as_mut());
        for _ in 0..clicks.unsigned_abs() {
            self.control.check()?;
            dev.scroll(clicks.signum());
            self.control.sleep(between_ms(20, 60))?;
        }
        Ok(())
    }

    pub fn tap(&mut self, key: &str) -> Result<()> {
        self.control.check()?;
        self.device.tap(key);
        Ok(())
    }

    pub fn type_text(&mut self, text: &str) -> Result<()> {
        self.control.check()?;
        self.device.type_text(text);
        Ok(())
    }
}

/// Button down, short hold, button up. The release happens even when the
/// hold is cut short.
fn press(dev: &mut dyn InputDevice, control: &ControlHandle, button: MouseButton) -> Result<()> {
    dev.button(button, true);
    let held = control.sleep(between_ms(40, 110));
    dev.button(button, false);
    held
}

fn clamp_to_screen(p: Point, (w, h): (i32, i32)) -> Point {
    Point::new(p.x.clamp(0, (w - 1).max(0)), p.y.clamp(0, (h - 1).max(0)))
}

fn random_sign<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    if rng.gen_bool(0.5) { 1.0 } else { -1.0 }
}

fn plan_path<R: Rng + ?Sized>(
    rng: &mut R,
    settings: &MotionSettings,
    screen: (i32, i32),
    from: Point,
    to: Point,
) -> MotionPlan {
    let to = clamp_to_screen(to, screen);
    let dist = from.distance(to);
    let mut waypoints = Vec::with_capacity(3);
    if dist >= 1.0 {
        let (dx, dy) = ((to.x - from.x) as f64, (to.y - from.y) as f64);
        if rng.gen_bool(settings.curve_probability.clamp(0.0, 1.0)) {
            let ox = random_sign(rng) * rng.gen_range(0.05..=0.15) * dist;
            let oy = random_sign(rng) * rng.gen_range(0.05..=0.15) * dist;
            let mid = Point::new(
                (from.x as f64 + dx / 2.0 + ox).round() as i32,
                (from.y as f64 + dy / 2.0 + oy).round() as i32,
            );
            waypoints.push(clamp_to_screen(mid, screen));
        }
        if dist >= OVERSHOOT_MIN_DISTANCE && rng.gen_bool(settings.overshoot_probability.clamp(0.0, 1.0)) {
            let k = rng.gen_range(0.04..=0.10);
            let past = Point::new(
                (to.x as f64 + dx * k).round() as i32,
                (to.y as f64 + dy * k).round() as i32,
            );
            let past = clamp_to_screen(past, screen);
            if past != to {
                waypoints.push(past);
            }
        }
    }
    waypoints.push(to);
    MotionPlan { start: from, waypoints }
}

fn leg_duration<R: Rng + ?Sized>(rng: &mut R, settings: &MotionSettings, len: f64, speed: Option<f64>) -> Duration {
    let secs = match speed {
        Some(v) if v > 0.0 => (len / v).clamp(MIN_LEG_SECS, MAX_SLOW_LEG_SECS),
        _ => (len / BASE_SPEED * settings.speed_multiplier.max(0.0)).clamp(MIN_LEG_SECS, MAX_LEG_SECS),
    };
    Duration::from_secs_f64(secs * rng.gen_range(0.97..=1.03))
}

fn step_count(len: f64, duration: Duration) -> usize {
    let by_length = (len / PX_PER_STEP).ceil() as usize;
    let by_time = (duration.as_nanos() / MIN_STEP_TIME.as_nanos()) as usize;
    by_length.min(by_time).max(MIN_STEPS)
}

fn ease_in_out_cubic(t: f64) -> f64 {
    if t < 0.5 {
        4.0 * t * t * t
    } else {
        1.0 - (-2.0 * t + 2.0).powi(3) / 2.0
    }
}

fn bezier(a: (f64, f64), c: (f64, f64), b: (f64, f64), u: f64) -> (f64, f64) {
    let v = 1.0 - u;
    (
        v * v * a.0 + 2.0 * v * u * c.0 + u * u * b.0,
        v * v * a.1 + 2.0 * v * u * c.1 + u * u * b.1,
    )
}

/// Rotate `step` onto the edge of the cone around `heading` if it points
/// outside it. Length is preserved.
fn clamp_heading(step: (f64, f64), heading: (f64, f64), max_angle: f64) -> (f64, f64) {
    let len = step.0.hypot(step.1);
    if len < 1e-9 || heading.0.hypot(heading.1) < 1e-9 {
        return step;
    }
    let base = heading.1.atan2(heading.0);
    let mut diff = step.1.atan2(step.0) - base;
    while diff > PI {
        diff -= 2.0 * PI;
    }
    while diff < -PI {
        diff += 2.0 * PI;
    }
    if diff.abs() <= max_angle {
        return step;
    }
    let angle = base + max_angle.copysign(diff);
    (len * angle.cos(), len * angle.sin())
}

fn cap_length(step: (f64, f64), max: f64) -> (f64, f64) {
    let len = step.0.hypot(step.1);
    if len > max && len > 0.0 {
        (step.0 * max / len, step.1 * max / len)
    } else {
        step
    }
}

/// Plan and play a full move on an already-blocked device.
fn glide(
    dev: &mut dyn InputDevice,
    rng: &mut StdRng,
    settings: &MotionSettings,
    control: &ControlHandle,
    target: Point,
    speed: Option<f64>,
) -> Result<()> {
    let start = dev.cursor();
    let plan = plan_path(rng, settings, dev.screen_size(), start, target);
    if start.distance(plan.target()) < 1.0 {
        return Ok(());
    }
    logger::debug_p(
        "motion",
        &format!("{:?} -> {:?} via {} waypoint(s)", start, plan.target(), plan.waypoints.len()),
    );
    let legs: Vec<(Point, Point)> = plan.legs().collect();
    let last = legs.len() - 1;
    for (i, (from, to)) in legs.into_iter().enumerate() {
        play_leg(dev, rng, settings, control, from, to, i == last, speed)?;
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn play_leg(
    dev: &mut dyn InputDevice,
    rng: &mut StdRng,
    settings: &MotionSettings,
    control: &ControlHandle,
    from: Point,
    to: Point,
    final_leg: bool,
    speed: Option<f64>,
) -> Result<()> {
    let len = from.distance(to);
    if len < 1.0 {
        return Ok(());
    }
    let screen = dev.screen_size();
    let duration = leg_duration(rng, settings, len, speed);
    let steps = step_count(len, duration);
    let per_step = duration / steps as u32;
    let max_angle = settings.max_angle_deg.to_radians();
    let max_step = settings.max_step_px.max(1.0);
    let (wobble_p, wobble_scale) = if final_leg { (0.05, 0.25) } else { (0.3, 1.0) };

    let a = (from.x as f64, from.y as f64);
    let b = (to.x as f64, to.y as f64);
    let (ux, uy) = ((b.0 - a.0) / len, (b.1 - a.1) / len);
    let (px, py) = (-uy, ux);
    let bend = rng.gen_range(-0.1..=0.1) * len;
    let ctrl = ((a.0 + b.0) / 2.0 + px * bend, (a.1 + b.1) / 2.0 + py * bend);

    let mut cur = a;
    for i in 1..=steps {
        control.check()?;
        let started = Instant::now();
        let (mut x, mut y) = bezier(a, ctrl, b, ease_in_out_cubic(i as f64 / steps as f64));
        if i < steps && rng.gen_bool(wobble_p) {
            let remaining = (b.0 - x).hypot(b.1 - y);
            let w = rng.gen_range(-1.0..=1.0) * settings.wobble_px * wobble_scale * remaining / len;
            x += px * w;
            y += py * w;
        }
        let step = clamp_heading((x - cur.0, y - cur.1), (b.0 - cur.0, b.1 - cur.1), max_angle);
        let (sx, sy) = cap_length(step, max_step);
        let next = clamp_to_screen(Point::new((cur.0 + sx).round() as i32, (cur.1 + sy).round() as i32), screen);
        dev.move_cursor(next);
        cur = (next.x as f64, next.y as f64);
        // a late step forfeits its sleep instead of borrowing from the next
        let spent = started.elapsed();
        if spent < per_step {
            control.sleep(per_step - spent)?;
        }
    }

    // settle: walk what the cap and the cone left over, then land exactly
    let mut budget = (len / max_step).ceil() as usize + MIN_STEPS;
    while budget > 0 && (b.0 - cur.0).hypot(b.1 - cur.1) > max_step {
        control.check()?;
        let (sx, sy) = cap_length((b.0 - cur.0, b.1 - cur.1), max_step);
        let next = Point::new((cur.0 + sx).round() as i32, (cur.1 + sy).round() as i32);
        dev.move_cursor(next);
        cur = (next.x as f64, next.y as f64);
        thread::sleep(MIN_STEP_TIME.min(per_step));
        budget -= 1;
    }
    control.check()?;
    if dev.cursor() != to {
        dev.move_cursor(to);
    }
    Ok(())
}
