#![forbid(unsafe_code)]

//! Time-based animation primitives.
//!
//! [`Tween`] drives tile visuals and the distortion target.
//! [`stagger_delay`] spreads the load-in fade across tiles. Time is advanced
//! explicitly with [`Animation::tick`], so animations are deterministic under
//! a host-supplied clock.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Easing functions
// ---------------------------------------------------------------------------

/// Easing function signature: maps `t` in [0, 1] to output in [0, 1].
pub type EasingFn = fn(f32) -> f32;

/// Identity easing (constant velocity).
#[inline]
pub fn linear(t: f32) -> f32 {
    t.clamp(0.0, 1.0)
}

/// Quadratic ease-in (slow start).
#[inline]
pub fn ease_in(t: f32) -> f32 {
    let t = t.clamp(0.0, 1.0);
    t * t
}

/// Quadratic ease-out (slow end).
#[inline]
pub fn ease_out(t: f32) -> f32 {
    let t = t.clamp(0.0, 1.0);
    1.0 - (1.0 - t) * (1.0 - t)
}

/// Quadratic ease-in-out (slow start and end).
#[inline]
pub fn ease_in_out(t: f32) -> f32 {
    let t = t.clamp(0.0, 1.0);
    if t < 0.5 {
        2.0 * t * t
    } else {
        1.0 - (-2.0 * t + 2.0).powi(2) / 2.0
    }
}

/// Cubic ease-out (slower end than quadratic).
#[inline]
pub fn ease_out_cubic(t: f32) -> f32 {
    let t = t.clamp(0.0, 1.0);
    1.0 - (1.0 - t).powi(3)
}

/// Quartic ease-out ("power4"): fast departure, long soft landing.
#[inline]
pub fn ease_out_quart(t: f32) -> f32 {
    let t = t.clamp(0.0, 1.0);
    1.0 - (1.0 - t).powi(4)
}

/// CSS-style `cubic-bezier(x1, y1, x2, y2)` evaluated at `t`.
///
/// Solves `x(s) = t` with Newton steps, falling back to bisection when the
/// slope gets flat, then returns `y(s)`.
pub fn cubic_bezier(x1: f32, y1: f32, x2: f32, y2: f32, t: f32) -> f32 {
    let t = t.clamp(0.0, 1.0);
    if t == 0.0 || t == 1.0 {
        return t;
    }
    let bez = |a: f32, b: f32, s: f32| {
        let inv = 1.0 - s;
        3.0 * inv * inv * s * a + 3.0 * inv * s * s * b + s * s * s
    };
    let slope = |a: f32, b: f32, s: f32| {
        let inv = 1.0 - s;
        3.0 * inv * inv * a + 6.0 * inv * s * (b - a) + 3.0 * s * s * (1.0 - b)
    };

    let mut s = t;
    for _ in 0..8 {
        let err = bez(x1, x2, s) - t;
        if err.abs() < 1e-5 {
            return bez(y1, y2, s);
        }
        let d = slope(x1, x2, s);
        if d.abs() < 1e-6 {
            break;
        }
        s = (s - err / d).clamp(0.0, 1.0);
    }

    let (mut lo, mut hi) = (0.0_f32, 1.0_f32);
    s = t;
    for _ in 0..32 {
        let x = bez(x1, x2, s);
        if (x - t).abs() < 1e-5 {
            break;
        }
        if x < t {
            lo = s;
        } else {
            hi = s;
        }
        s = (lo + hi) * 0.5;
    }
    bez(y1, y2, s)
}

/// Easing curves selectable from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Easing {
    Linear,
    QuadIn,
    QuadOut,
    QuadInOut,
    CubicOut,
    QuartOut,
    /// Strong ease-in-out used for press/release and hover zoom.
    Snappy,
    /// Arbitrary `cubic-bezier(x1, y1, x2, y2)`.
    CubicBezier([f32; 4]),
}

impl Easing {
    #[must_use]
    pub fn apply(self, t: f32) -> f32 {
        match self {
            Self::Linear => linear(t),
            Self::QuadIn => ease_in(t),
            Self::QuadOut => ease_out(t),
            Self::QuadInOut => ease_in_out(t),
            Self::CubicOut => ease_out_cubic(t),
            Self::QuartOut => ease_out_quart(t),
            Self::Snappy => cubic_bezier(0.76, 0.0, 0.24, 1.0, t),
            Self::CubicBezier([x1, y1, x2, y2]) => cubic_bezier(x1, y1, x2, y2, t),
        }
    }
}

// ---------------------------------------------------------------------------
// Animation trait
// ---------------------------------------------------------------------------

/// A time-based animation.
pub trait Animation {
    /// Advance the animation by `dt`.
    fn tick(&mut self, dt: Duration);

    /// Whether the animation has reached its end.
    fn is_complete(&self) -> bool;

    /// Current output value.
    fn value(&self) -> f32;

    /// Reset the animation to its initial state.
    fn reset(&mut self);
}

// ---------------------------------------------------------------------------
// Tween
// ---------------------------------------------------------------------------

/// Animates a scalar from `from` to `to`, after an optional delay.
///
/// [`Tween::retarget`] restarts from the *current* value, so an animation
/// interrupted halfway (hover out before hover in finished) never jumps.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tween {
    from: f32,
    to: f32,
    delay: Duration,
    elapsed: Duration,
    duration: Duration,
    easing: Easing,
}

impl Tween {
    /// A tween already at rest on `value`.
    #[must_use]
    pub fn rest(value: f32) -> Self {
        Self {
            from: value,
            to: value,
            delay: Duration::ZERO,
            elapsed: Duration::ZERO,
            duration: Duration::ZERO,
            easing: Easing::Linear,
        }
    }

    /// Start animating from the current value towards `to`.
    pub fn retarget(&mut self, to: f32, duration: Duration, easing: Easing) {
        self.retarget_delayed(to, duration, easing, Duration::ZERO);
    }

    /// Like [`Tween::retarget`], holding the current value for `delay` first.
    pub fn retarget_delayed(&mut self, to: f32, duration: Duration, easing: Easing, delay: Duration) {
        self.from = self.value();
        self.to = to;
        self.delay = delay;
        self.elapsed = Duration::ZERO;
        self.duration = duration;
        self.easing = easing;
    }

    /// Jump straight to `value` and stop.
    pub fn snap(&mut self, value: f32) {
        *self = Self::rest(value);
    }

    #[inline]
    #[must_use]
    pub fn target(&self) -> f32 {
        self.to
    }

    /// Linear progress in [0, 1], excluding the delay.
    #[must_use]
    pub fn progress(&self) -> f32 {
        if self.duration.is_zero() {
            return if self.elapsed >= self.delay { 1.0 } else { 0.0 };
        }
        let active = self.elapsed.saturating_sub(self.delay);
        (active.as_secs_f64() / self.duration.as_secs_f64()).clamp(0.0, 1.0) as f32
    }
}

impl Animation for Tween {
    fn tick(&mut self, dt: Duration) {
        self.elapsed = self.elapsed.saturating_add(dt);
    }

    fn is_complete(&self) -> bool {
        self.elapsed >= self.delay.saturating_add(self.duration)
    }

    fn value(&self) -> f32 {
        if self.is_complete() {
            return self.to;
        }
        let e = self.easing.apply(self.progress());
        self.from + (self.to - self.from) * e
    }

    fn reset(&mut self) {
        self.elapsed = Duration::ZERO;
    }
}

// ---------------------------------------------------------------------------
// Stagger
// ---------------------------------------------------------------------------

/// Start delay for element `index` of `count` within a total spread `amount`.
///
/// Order is a fixed pseudo-random permutation (stable across runs). The
/// normalized position is shaped by [`ease_in_out`], so most elements start
/// near the middle of the spread.
#[must_use]
pub fn stagger_delay(index: u32, count: u32, amount: Duration) -> Duration {
    if count <= 1 || amount.is_zero() {
        return Duration::ZERO;
    }
    let slot = scramble(index) % count;
    let t = slot as f32 / (count - 1) as f32;
    amount.mul_f32(ease_in_out(t))
}

// 32-bit integer hash (lowbias32).
fn scramble(mut x: u32) -> u32 {
    x ^= x >> 16;
    x = x.wrapping_mul(0x7feb_352d);
    x ^= x >> 15;
    x = x.wrapping_mul(0x846c_a68b);
    x ^= x >> 16;
    x
}

#[cfg(test)]
mod tests {
    use super::*;

    const MS_100: Duration = Duration::from_millis(100);

    #[test]
    fn easing_endpoints() {
        for e in [
            Easing::Linear,
            Easing::QuadIn,
            Easing::QuadOut,
            Easing::QuadInOut,
            Easing::CubicOut,
            Easing::QuartOut,
            Easing::Snappy,
            Easing::CubicBezier([0.25, 0.1, 0.25, 1.0]),
        ] {
            assert!(e.apply(0.0).abs() < 1e-4, "{e:?} at 0");
            assert!((e.apply(1.0) - 1.0).abs() < 1e-4, "{e:?} at 1");
        }
    }

    #[test]
    fn bezier_linear_control_points_are_identity() {
        for i in 0..=10 {
            let t = i as f32 / 10.0;
            assert!((cubic_bezier(0.0, 0.0, 1.0, 1.0, t) - t).abs() < 1e-3);
        }
    }

    #[test]
    fn snappy_is_symmetric_around_midpoint() {
        let a = Easing::Snappy.apply(0.25);
        let b = Easing::Snappy.apply(0.75);
        assert!((a + b - 1.0).abs() < 1e-3);
    }

    #[test]
    fn tween_reaches_target() {
        let mut t = Tween::rest(0.0);
        t.retarget(1.0, Duration::from_millis(300), Easing::QuadOut);
        t.tick(MS_100);
        let mid = t.value();
        assert!(mid > 0.0 && mid < 1.0);
        t.tick(Duration::from_millis(250));
        assert!(t.is_complete());
        assert_eq!(t.value(), 1.0);
    }

    #[test]
    fn retarget_starts_from_current_value() {
        let mut t = Tween::rest(0.0);
        t.retarget(1.0, Duration::from_millis(200), Easing::Linear);
        t.tick(MS_100);
        let halfway = t.value();
        t.retarget(0.0, Duration::from_millis(200), Easing::Linear);
        assert!((t.value() - halfway).abs() < 1e-6);
    }

    #[test]
    fn delayed_tween_holds_then_moves() {
        let mut t = Tween::rest(0.0);
        t.retarget_delayed(1.0, MS_100, Easing::Linear, MS_100);
        t.tick(Duration::from_millis(50));
        assert_eq!(t.value(), 0.0);
        t.tick(MS_100);
        assert!((t.value() - 0.5).abs() < 1e-3);
    }

    #[test]
    fn zero_duration_completes_immediately() {
        let mut t = Tween::rest(2.0);
        t.retarget(3.0, Duration::ZERO, Easing::Linear);
        assert!(t.is_complete());
        assert_eq!(t.value(), 3.0);
    }

    #[test]
    fn stagger_stays_within_amount() {
        let amount = Duration::from_millis(600);
        for i in 0..80 {
            assert!(stagger_delay(i, 80, amount) <= amount);
        }
        assert_eq!(stagger_delay(0, 1, amount), Duration::ZERO);
    }

    #[test]
    fn stagger_is_deterministic() {
        let amount = Duration::from_millis(600);
        assert_eq!(stagger_delay(7, 40, amount), stagger_delay(7, 40, amount));
    }
}
