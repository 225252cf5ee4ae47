#![forbid(unsafe_code)]

//! Distortion strength for the post pass.
//!
//! Two layers: an animated *target* (a [`Tween`] retargeted by press,
//! release, wheel and load-in events) and the displayed *current* value,
//! which follows the target by per-frame exponential smoothing.
//!
//! Wheel input maps speed to strength with
//! `max(config.max, -|v| * velocity_scale)`. The result is never more
//! extreme than `config.max` and never positive. After
//! `scroll_stop_delay` without further wheel input the target relaxes to
//! `base`.

use std::time::Duration;

use crate::animation::{Animation, Tween};
use crate::config::{DistortionConfig, EaseSpec};
use crate::geometry::Vec2;

/// Distortion for a wheel speed (px/s).
#[must_use]
pub fn velocity_distortion(speed: f32, max: f32, velocity_scale: f32) -> f32 {
    if !speed.is_finite() {
        return max;
    }
    let d = (-speed.abs() * velocity_scale).max(max);
    // -0.0 → 0.0
    if d == 0.0 { 0.0 } else { d }
}

/// Owner of the current/target distortion pair.
#[derive(Debug, Clone)]
pub struct DistortionDriver {
    config: DistortionConfig,
    target: Tween,
    current: f32,
    pressed: bool,
    scroll_stop_at: Option<Duration>,
}

impl DistortionDriver {
    /// Start at `config.starting`, held until [`load_in`](Self::load_in).
    #[must_use]
    pub fn new(config: DistortionConfig) -> Self {
        Self {
            target: Tween::rest(config.starting),
            current: config.starting,
            config,
            pressed: false,
            scroll_stop_at: None,
        }
    }

    /// Swap tuning (breakpoint change), keeping the current value.
    pub fn set_config(&mut self, config: DistortionConfig) {
        self.config = config;
    }

    #[must_use]
    pub fn config(&self) -> &DistortionConfig {
        &self.config
    }

    fn animate(&mut self, to: f32, spec: EaseSpec) {
        self.target.retarget(to, spec.duration(), spec.easing);
    }

    /// Pointer pressed: squeeze.
    pub fn press(&mut self) {
        self.pressed = true;
        self.scroll_stop_at = None;
        self.animate(self.config.press_amount, self.config.press);
    }

    /// Pointer released: relax to base.
    pub fn release(&mut self) {
        self.pressed = false;
        self.animate(self.config.base, self.config.release);
    }

    /// Wheel speed sample at time `now`.
    ///
    /// Ignored while pressed; the press squeeze takes precedence.
    pub fn wheel(&mut self, velocity: Vec2, now: Duration) {
        if self.pressed {
            return;
        }
        let d = velocity_distortion(
            velocity.length(),
            self.config.max,
            self.config.velocity_scale,
        );
        self.animate(d, self.config.scroll);
        self.scroll_stop_at = Some(now.saturating_add(self.config.scroll_stop_delay()));
    }

    /// All tiles settled: ease from the starting value to base.
    pub fn load_in(&mut self, duration: Duration) {
        let easing = self.config.reset.easing;
        self.target.retarget(self.config.base, duration, easing);
    }

    /// Advance to `now` by `dt`; returns the displayed strength.
    pub fn tick(&mut self, now: Duration, dt: Duration) -> f32 {
        if let Some(at) = self.scroll_stop_at
            && now >= at
        {
            self.scroll_stop_at = None;
            self.animate(self.config.base, self.config.reset);
        }
        self.target.tick(dt);
        let secs = dt.as_secs_f32();
        if secs > 0.0 {
            let factor = 1.0 - (1.0 - self.config.smoothing.clamp(1e-3, 1.0)).powf(secs * 60.0);
            self.current += (self.target.value() - self.current) * factor;
        }
        self.current
    }

    /// Displayed strength.
    #[must_use]
    pub fn current(&self) -> f32 {
        self.current
    }

    /// Animated target strength.
    #[must_use]
    pub fn target(&self) -> f32 {
        self.target.value()
    }

    #[must_use]
    pub fn is_pressed(&self) -> bool {
        self.pressed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME: Duration = Duration::from_micros(16_667);

    fn run(d: &mut DistortionDriver, from: Duration, frames: u32) -> Duration {
        let mut now = from;
        for _ in 0..frames {
            now += FRAME;
            d.tick(now, FRAME);
        }
        now
    }

    #[test]
    fn velocity_formula_is_clamped() {
        assert_eq!(velocity_distortion(0.0, -0.5, 0.0025), 0.0);
        assert!((velocity_distortion(100.0, -0.5, 0.0025) + 0.25).abs() < 1e-6);
        assert!((velocity_distortion(-100.0, -0.5, 0.0025) + 0.25).abs() < 1e-6);
        assert_eq!(velocity_distortion(1.0e6, -0.5, 0.0025), -0.5);
        assert_eq!(velocity_distortion(f32::NAN, -0.5, 0.0025), -0.5);
    }

    #[test]
    fn starts_at_starting_and_loads_in_to_base() {
        let mut d = DistortionDriver::new(DistortionConfig::wide());
        assert_eq!(d.current(), -0.5);
        run(&mut d, Duration::ZERO, 30);
        assert_eq!(d.current(), -0.5);
        d.load_in(Duration::from_millis(1200));
        run(&mut d, Duration::ZERO, 240);
        assert!(d.current().abs() < 1e-3);
    }

    #[test]
    fn press_squeezes_and_release_relaxes() {
        let mut cfg = DistortionConfig::wide();
        cfg.starting = 0.0;
        let mut d = DistortionDriver::new(cfg);
        d.press();
        let now = run(&mut d, Duration::ZERO, 90);
        assert!((d.current() - cfg.press_amount).abs() < 0.01);
        d.release();
        run(&mut d, now, 120);
        assert!(d.current().abs() < 0.01);
    }

    #[test]
    fn wheel_relaxes_after_stop_delay() {
        let mut cfg = DistortionConfig::wide();
        cfg.starting = 0.0;
        let mut d = DistortionDriver::new(cfg);
        d.wheel(Vec2::new(0.0, 4000.0), Duration::ZERO);
        assert_eq!(d.target.target(), cfg.max);
        // Before the delay the target is still the wheel value.
        d.tick(Duration::from_millis(100), Duration::from_millis(100));
        assert_eq!(d.target.target(), cfg.max);
        d.tick(Duration::from_millis(151), Duration::from_millis(51));
        assert_eq!(d.target.target(), cfg.base);
    }

    #[test]
    fn wheel_is_ignored_while_pressed() {
        let mut d = DistortionDriver::new(DistortionConfig::narrow());
        d.press();
        d.wheel(Vec2::new(10_000.0, 0.0), Duration::ZERO);
        assert_eq!(d.target.target(), DistortionConfig::narrow().press_amount);
    }

    #[test]
    fn current_never_leaves_config_range() {
        let cfg = DistortionConfig::wide();
        let mut d = DistortionDriver::new(cfg);
        let mut now = Duration::ZERO;
        for i in 0..600u32 {
            now += FRAME;
            match i % 97 {
                0 => d.press(),
                40 => d.release(),
                60 => d.wheel(Vec2::new(i as f32 * 50.0, 0.0), now),
                _ => {}
            }
            let v = d.tick(now, FRAME);
            let floor = cfg.max.min(cfg.press_amount) - 1e-4;
            assert!((floor..=1e-4).contains(&v), "{v}");
        }
    }
}
