#![forbid(unsafe_code)]

//! Pan offset: the one source of truth for where the tile field sits.
//!
//! Gestures only move the `target` (see [`PanState::apply_delta`] and
//! [`PanState::add_momentum`]). The render loop calls
//! [`PanState::integrate`], which eases `current` towards it. Consumers only
//! ever see [`PanState::wrapped`], the current offset folded into
//! `[-block/2, block/2)` per axis.
//!
//! `current` and `target` may drift arbitrarily far from zero during a long
//! session. Once `current` is more than one period out, both are shifted
//! together by whole periods. The shift does not change the wrapped output,
//! and it keeps `f32` precision.

use std::time::Duration;

use crate::geometry::{GridLayout, Vec2, wrap_vec};

/// Reference frame rate the smoothing factor is expressed against.
const REFERENCE_FPS: f32 = 60.0;

/// Pan offset with exponential easing and wrap-around.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PanState {
    current: Vec2,
    target: Vec2,
    velocity: Vec2,
    period: Vec2,
    smoothing: f32,
}

impl PanState {
    /// `smoothing` is the fraction of the remaining distance covered per
    /// 60Hz frame, clamped to `(0, 1]`.
    #[must_use]
    pub fn new(layout: &GridLayout, smoothing: f32) -> Self {
        Self {
            current: Vec2::ZERO,
            target: Vec2::ZERO,
            velocity: Vec2::ZERO,
            period: layout.block_size(),
            smoothing: clamp_smoothing(smoothing),
        }
    }

    /// Adopt a new layout (rebuild or breakpoint change) keeping the offset.
    pub fn set_layout(&mut self, layout: &GridLayout, smoothing: f32) {
        self.period = layout.block_size();
        self.smoothing = clamp_smoothing(smoothing);
        self.rebase();
    }

    /// Add a gesture delta to the target.
    pub fn apply_delta(&mut self, dx: f32, dy: f32) {
        let d = Vec2::new(dx, dy);
        if d.is_finite() {
            self.target += d;
        }
    }

    /// Push the target by `velocity × secs` (fling on release).
    pub fn add_momentum(&mut self, velocity: Vec2, secs: f32) {
        let push = velocity * secs;
        if push.is_finite() {
            self.target += push;
        }
    }

    /// Set both current and target (no easing).
    pub fn jump_to(&mut self, offset: Vec2) {
        if offset.is_finite() {
            self.current = offset;
            self.target = offset;
            self.velocity = Vec2::ZERO;
        }
    }

    /// Ease `current` towards `target` over `dt`.
    ///
    /// Frame-rate independent: two 8ms steps land where one 16ms step would.
    pub fn integrate(&mut self, dt: Duration) {
        let secs = dt.as_secs_f32();
        if secs <= 0.0 {
            return;
        }
        let factor = 1.0 - (1.0 - self.smoothing).powf(secs * REFERENCE_FPS);
        let before = self.current;
        self.current += (self.target - self.current) * factor;
        self.velocity = (self.current - before) * (1.0 / secs);
        self.rebase();
    }

    /// Displayed offset, wrapped into half a block per axis.
    #[must_use]
    pub fn wrapped(&self) -> Vec2 {
        wrap_vec(self.current, self.period * 0.5)
    }

    #[must_use]
    pub fn current(&self) -> Vec2 {
        self.current
    }

    #[must_use]
    pub fn target(&self) -> Vec2 {
        self.target
    }

    /// Displayed speed in px/s from the last integration.
    #[must_use]
    pub fn velocity(&self) -> Vec2 {
        self.velocity
    }

    /// Whether current has (visually) reached target.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        (self.target - self.current).length() < 0.01
    }

    fn rebase(&mut self) {
        let shift = Vec2::new(
            whole_periods(self.current.x, self.period.x),
            whole_periods(self.current.y, self.period.y),
        );
        if shift != Vec2::ZERO {
            self.current -= shift;
            self.target -= shift;
        }
    }
}

// Whole multiple of `period` to subtract from `v`, or 0 while |v| <= period.
fn whole_periods(v: f32, period: f32) -> f32 {
    if !(period > 0.0) || v.abs() <= period {
        return 0.0;
    }
    (v / period).round() * period
}

fn clamp_smoothing(s: f32) -> f32 {
    if s.is_finite() { s.clamp(1e-3, 1.0) } else { 0.075 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LayoutConfig;

    const FRAME: Duration = Duration::from_micros(16_667);

    fn scenario_layout() -> GridLayout {
        GridLayout::compute(
            20,
            &LayoutConfig {
                item_width: 100.0,
                item_height: 75.0,
                columns: 4,
                gap: 10.0,
                padding: 5.0,
            },
        )
    }

    #[test]
    fn integrate_approaches_target() {
        let mut p = PanState::new(&scenario_layout(), 0.1);
        p.apply_delta(100.0, 0.0);
        p.integrate(FRAME);
        assert!((p.current().x - 10.0).abs() < 0.05);
        for _ in 0..200 {
            p.integrate(FRAME);
        }
        assert!(p.is_settled());
        assert!(p.velocity().length() < 1.0);
    }

    #[test]
    fn integration_is_frame_rate_independent() {
        let mut a = PanState::new(&scenario_layout(), 0.1);
        let mut b = a;
        a.apply_delta(50.0, -30.0);
        b.apply_delta(50.0, -30.0);
        a.integrate(Duration::from_millis(16));
        b.integrate(Duration::from_millis(8));
        b.integrate(Duration::from_millis(8));
        assert!((a.current() - b.current()).length() < 1e-3);
    }

    #[test]
    fn panning_by_block_width_leaves_wrap_unchanged() {
        let mut p = PanState::new(&scenario_layout(), 1.0);
        p.jump_to(Vec2::new(37.5, -12.0));
        let before = p.wrapped();
        p.apply_delta(440.0, 0.0);
        p.integrate(FRAME);
        assert_eq!(p.wrapped(), before);
    }

    #[test]
    fn wrapped_is_within_half_block() {
        let mut p = PanState::new(&scenario_layout(), 1.0);
        p.apply_delta(-1234.5, 987.0);
        p.integrate(FRAME);
        let w = p.wrapped();
        assert!((-220.0..220.0).contains(&w.x));
        assert!((-212.5..212.5).contains(&w.y));
    }

    #[test]
    fn rebase_keeps_raw_offset_small() {
        let mut p = PanState::new(&scenario_layout(), 1.0);
        for _ in 0..10_000 {
            p.apply_delta(97.0, -61.0);
            p.integrate(FRAME);
        }
        assert!(p.current().x.abs() <= 440.0);
        assert!(p.current().y.abs() <= 425.0);
        assert!(p.is_settled());
    }

    #[test]
    fn momentum_pushes_target() {
        let mut p = PanState::new(&scenario_layout(), 0.1);
        p.add_momentum(Vec2::new(1000.0, -500.0), 0.1);
        assert_eq!(p.target(), Vec2::new(100.0, -50.0));
    }

    #[test]
    fn non_finite_deltas_are_ignored() {
        let mut p = PanState::new(&scenario_layout(), 0.1);
        p.apply_delta(f32::NAN, 1.0);
        p.jump_to(Vec2::new(f32::INFINITY, 0.0));
        assert_eq!(p.target(), Vec2::ZERO);
    }
}
