#![forbid(unsafe_code)]

//! Gesture interpretation: raw pointer and wheel input → pan intent.
//!
//! [`GestureController`] is a small state machine over one primary pointer.
//! It emits [`GestureSignal`]s and never touches pan or render state itself.
//!
//! # Press classification
//!
//! A press becomes a **drag** the first time the pointer is at least
//! `drag_threshold` px from where it went down. That decision is sticky:
//! returning to the origin does not turn it back into a tap. A press that
//! never became a drag ends as:
//!
//! - a **tap** if it lasted less than `long_press` and a tile was under the
//!   initial press point;
//! - a **long press** if it lasted `long_press` or more;
//! - nothing otherwise (press on a gap).
//!
//! Drag and tap are mutually exclusive per gesture. Pan deltas are only
//! emitted once a press has become a drag.
//!
//! # Link suppression
//!
//! Every press emits `LinkSuppression(true)` and every release or cancel
//! emits `LinkSuppression(false)` *after* any tap, so the host can disable
//! native link navigation for exactly the lifetime of a gesture.

use std::time::Duration;

use crate::config::Profile;
use crate::geometry::Vec2;
use crate::tile_set::TileId;

/// Minimum Δt used when deriving speeds, so bursts of coalesced events
/// don't produce absurd velocities.
const MIN_SAMPLE_DT: Duration = Duration::from_millis(8);
/// Wheel events further apart than this start a new scroll.
const WHEEL_IDLE: Duration = Duration::from_millis(100);
/// Assumed spacing of the first wheel event of a scroll.
const WHEEL_FIRST_DT: Duration = Duration::from_millis(16);
/// A release this long after the last move carries no fling velocity.
const FLING_WINDOW: Duration = Duration::from_millis(100);

/// Pointer device class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PointerKind {
    Mouse,
    Touch,
    Pen,
}

/// Where a pan delta came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PanSource {
    Wheel,
    Drag,
}

/// Normalized input. Positions are canvas CSS pixels (top-left origin);
/// `at` is host monotonic time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GestureInput {
    PointerDown {
        pos: Vec2,
        kind: PointerKind,
        /// `false` when the platform event had no resolvable target.
        has_target: bool,
        at: Duration,
    },
    PointerMove {
        pos: Vec2,
        at: Duration,
    },
    PointerUp {
        pos: Vec2,
        at: Duration,
    },
    PointerCancel {
        at: Duration,
    },
    PointerLeave {
        at: Duration,
    },
    /// Pixel-normalized wheel delta (positive `y` = wheel down).
    Wheel {
        delta: Vec2,
        pos: Vec2,
        at: Duration,
    },
}

impl GestureInput {
    #[must_use]
    pub fn at(&self) -> Duration {
        match *self {
            Self::PointerDown { at, .. }
            | Self::PointerMove { at, .. }
            | Self::PointerUp { at, .. }
            | Self::PointerCancel { at }
            | Self::PointerLeave { at }
            | Self::Wheel { at, .. } => at,
        }
    }
}

/// Output of the controller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GestureSignal {
    /// A press began (apply the squeeze distortion).
    Pressed,
    /// World-space delta for the pan target.
    PanDelta { dx: f32, dy: f32, source: PanSource },
    /// World-space speed estimate in px/s.
    Velocity { vx: f32, vy: f32, source: PanSource },
    /// The press crossed the drag threshold.
    DragStarted,
    /// The press ended. `velocity` is the fling speed (zero if none).
    Released { velocity: Vec2, dragged: bool },
    Tap { tile: TileId },
    LongPress { tile: Option<TileId> },
    /// Disable (`true`) or restore (`false`) native link interaction.
    LinkSuppression(bool),
    /// Hover target changed.
    Hover(Option<TileId>),
}

/// Resolves a screen position to the tile under it.
pub trait HitTest {
    fn tile_at(&self, screen: Vec2) -> Option<TileId>;
}

impl<F: Fn(Vec2) -> Option<TileId>> HitTest for F {
    fn tile_at(&self, screen: Vec2) -> Option<TileId> {
        self(screen)
    }
}

/// Thresholds the controller needs from the active profile.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GestureConfig {
    pub drag_threshold: f32,
    pub long_press: Duration,
    pub drag_multiplier: f32,
    pub hover_enabled: bool,
}

impl GestureConfig {
    #[must_use]
    pub fn from_profile(p: &Profile) -> Self {
        Self {
            drag_threshold: p.interaction.drag_threshold,
            long_press: p.interaction.long_press(),
            drag_multiplier: p.motion.drag_multiplier,
            hover_enabled: p.interaction.hover_enabled,
        }
    }
}

impl Default for GestureConfig {
    fn default() -> Self {
        Self::from_profile(&Profile::wide())
    }
}

#[derive(Debug, Clone, Copy)]
struct Press {
    origin: Vec2,
    last: Vec2,
    started_at: Duration,
    last_at: Duration,
    tile: Option<TileId>,
    kind: PointerKind,
    dragging: bool,
    velocity: Vec2,
}

/// Single-pointer gesture state machine.
#[derive(Debug, Clone, Default)]
pub struct GestureController {
    config: GestureConfig,
    press: Option<Press>,
    hovered: Option<TileId>,
    last_wheel_at: Option<Duration>,
}

impl GestureController {
    #[must_use]
    pub fn new(config: GestureConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn set_config(&mut self, config: GestureConfig) {
        self.config = config;
        if !config.hover_enabled {
            self.hovered = None;
        }
    }

    #[must_use]
    pub fn config(&self) -> &GestureConfig {
        &self.config
    }

    #[must_use]
    pub fn is_pressed(&self) -> bool {
        self.press.is_some()
    }

    #[must_use]
    pub fn is_dragging(&self) -> bool {
        self.press.is_some_and(|p| p.dragging)
    }

    /// Kind of the pointer currently held down.
    #[must_use]
    pub fn active_pointer(&self) -> Option<PointerKind> {
        self.press.map(|p| p.kind)
    }

    /// Feed one input event.
    pub fn handle(&mut self, input: GestureInput, hit: &impl HitTest) -> Vec<GestureSignal> {
        let mut out = Vec::new();
        match input {
            GestureInput::PointerDown {
                pos,
                kind,
                has_target,
                at,
            } => self.on_down(pos, kind, has_target, at, hit, &mut out),
            GestureInput::PointerMove { pos, at } => self.on_move(pos, at, hit, &mut out),
            GestureInput::PointerUp { pos, at } => self.on_up(pos, at, &mut out),
            GestureInput::PointerCancel { .. } => self.on_cancel(&mut out),
            GestureInput::PointerLeave { .. } => {
                if self.hovered.take().is_some() {
                    out.push(GestureSignal::Hover(None));
                }
            }
            GestureInput::Wheel { delta, at, .. } => self.on_wheel(delta, at, &mut out),
        }
        out
    }

    fn on_down(
        &mut self,
        pos: Vec2,
        kind: PointerKind,
        has_target: bool,
        at: Duration,
        hit: &impl HitTest,
        out: &mut Vec<GestureSignal>,
    ) {
        if self.press.is_some() {
            // Second pointer while one is down: ignore (no pinch).
            return;
        }
        if !has_target || !pos.is_finite() {
            crate::trace!("press without a resolvable target ignored");
            return;
        }
        self.press = Some(Press {
            origin: pos,
            last: pos,
            started_at: at,
            last_at: at,
            tile: hit.tile_at(pos),
            kind,
            dragging: false,
            velocity: Vec2::ZERO,
        });
        out.push(GestureSignal::Pressed);
        out.push(GestureSignal::LinkSuppression(true));
    }

    fn on_move(
        &mut self,
        pos: Vec2,
        at: Duration,
        hit: &impl HitTest,
        out: &mut Vec<GestureSignal>,
    ) {
        if !pos.is_finite() {
            return;
        }
        if self.press.is_none() {
            if self.config.hover_enabled {
                let target = hit.tile_at(pos);
                if target != self.hovered {
                    self.hovered = target;
                    out.push(GestureSignal::Hover(target));
                }
            }
            return;
        }
        let Some(press) = self.press.as_mut() else {
            return;
        };

        if !press.dragging {
            if (pos - press.origin).length() < self.config.drag_threshold {
                return;
            }
            press.dragging = true;
            out.push(GestureSignal::DragStarted);
            if self.hovered.take().is_some() {
                out.push(GestureSignal::Hover(None));
            }
        }

        let m = self.config.drag_multiplier;
        let d = pos - press.last;
        // Screen y grows downward, world y upward.
        let world = Vec2::new(d.x * m, -d.y * m);
        out.push(GestureSignal::PanDelta {
            dx: world.x,
            dy: world.y,
            source: PanSource::Drag,
        });

        let dt = at.saturating_sub(press.last_at).max(MIN_SAMPLE_DT).as_secs_f32();
        let sample = world * (1.0 / dt);
        press.velocity = sample * 0.7 + press.velocity * 0.3;
        out.push(GestureSignal::Velocity {
            vx: press.velocity.x,
            vy: press.velocity.y,
            source: PanSource::Drag,
        });

        press.last = pos;
        press.last_at = at;
    }

    fn on_up(&mut self, pos: Vec2, at: Duration, out: &mut Vec<GestureSignal>) {
        let Some(press) = self.press.take() else {
            return;
        };
        let pos = if pos.is_finite() { pos } else { press.last };

        // An up event far from the origin with no intervening move is a drag.
        let mut dragged = press.dragging;
        if !dragged && (pos - press.origin).length() >= self.config.drag_threshold {
            dragged = true;
            let m = self.config.drag_multiplier;
            let d = pos - press.last;
            out.push(GestureSignal::DragStarted);
            out.push(GestureSignal::PanDelta {
                dx: d.x * m,
                dy: -d.y * m,
                source: PanSource::Drag,
            });
        }

        let fling = if press.dragging && at.saturating_sub(press.last_at) <= FLING_WINDOW {
            press.velocity
        } else {
            Vec2::ZERO
        };
        out.push(GestureSignal::Released {
            velocity: fling,
            dragged,
        });

        if !dragged {
            let held = at.saturating_sub(press.started_at);
            if held >= self.config.long_press {
                out.push(GestureSignal::LongPress { tile: press.tile });
            } else if let Some(tile) = press.tile {
                out.push(GestureSignal::Tap { tile });
            }
        }
        out.push(GestureSignal::LinkSuppression(false));
    }

    fn on_cancel(&mut self, out: &mut Vec<GestureSignal>) {
        if let Some(press) = self.press.take() {
            out.push(GestureSignal::Released {
                velocity: Vec2::ZERO,
                dragged: press.dragging,
            });
            out.push(GestureSignal::LinkSuppression(false));
        }
    }

    fn on_wheel(&mut self, delta: Vec2, at: Duration, out: &mut Vec<GestureSignal>) {
        if !delta.is_finite() || delta == Vec2::ZERO {
            return;
        }
        let dt = match self.last_wheel_at {
            Some(prev) if at.saturating_sub(prev) <= WHEEL_IDLE => {
                at.saturating_sub(prev).max(MIN_SAMPLE_DT)
            }
            _ => WHEEL_FIRST_DT,
        };
        self.last_wheel_at = Some(at);

        // Horizontal follows the wheel inverted; wheel down moves content up.
        let world = Vec2::new(-delta.x, delta.y);
        let v = world * (1.0 / dt.as_secs_f32());
        out.push(GestureSignal::PanDelta {
            dx: world.x,
            dy: world.y,
            source: PanSource::Wheel,
        });
        out.push(GestureSignal::Velocity {
            vx: v.x,
            vy: v.y,
            source: PanSource::Wheel,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::ItemId;

    const TILE: TileId = TileId {
        duplicate: 3,
        item: ItemId(2),
    };

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    fn on_tile(_: Vec2) -> Option<TileId> {
        Some(TILE)
    }

    fn nothing(_: Vec2) -> Option<TileId> {
        None
    }

    fn down(x: f32, y: f32, at: u64) -> GestureInput {
        GestureInput::PointerDown {
            pos: Vec2::new(x, y),
            kind: PointerKind::Mouse,
            has_target: true,
            at: ms(at),
        }
    }

    fn mv(x: f32, y: f32, at: u64) -> GestureInput {
        GestureInput::PointerMove {
            pos: Vec2::new(x, y),
            at: ms(at),
        }
    }

    fn up(x: f32, y: f32, at: u64) -> GestureInput {
        GestureInput::PointerUp {
            pos: Vec2::new(x, y),
            at: ms(at),
        }
    }

    fn run(
        g: &mut GestureController,
        inputs: &[GestureInput],
        hit: &impl HitTest,
    ) -> Vec<GestureSignal> {
        inputs.iter().flat_map(|i| g.handle(*i, hit)).collect()
    }

    fn taps(s: &[GestureSignal]) -> usize {
        s.iter().filter(|s| matches!(s, GestureSignal::Tap { .. })).count()
    }

    fn drag_deltas(s: &[GestureSignal]) -> usize {
        s.iter()
            .filter(|s| {
                matches!(
                    s,
                    GestureSignal::PanDelta {
                        source: PanSource::Drag,
                        ..
                    }
                )
            })
            .count()
    }

    #[test]
    fn small_quick_press_is_a_tap() {
        let mut g = GestureController::default();
        let s = run(
            &mut g,
            &[down(100.0, 100.0, 0), mv(102.0, 101.0, 40), up(103.0, 102.0, 120)],
            &on_tile,
        );
        assert_eq!(taps(&s), 1);
        assert_eq!(drag_deltas(&s), 0);
        assert!(s.contains(&GestureSignal::Tap { tile: TILE }));
        assert_eq!(s.first(), Some(&GestureSignal::Pressed));
        assert_eq!(s.last(), Some(&GestureSignal::LinkSuppression(false)));
    }

    #[test]
    fn drag_returning_to_origin_is_not_a_tap() {
        let mut g = GestureController::default();
        let s = run(
            &mut g,
            &[
                down(100.0, 100.0, 0),
                mv(110.0, 100.0, 20),
                mv(100.0, 100.0, 40),
                up(100.0, 100.0, 60),
            ],
            &on_tile,
        );
        assert_eq!(taps(&s), 0);
        assert!(s.contains(&GestureSignal::DragStarted));
        assert!(
            s.iter()
                .any(|x| matches!(x, GestureSignal::Released { dragged: true, .. }))
        );
    }

    #[test]
    fn long_press_suppresses_tap() {
        let mut g = GestureController::default();
        let s = run(&mut g, &[down(10.0, 10.0, 0), up(10.0, 10.0, 500)], &on_tile);
        assert_eq!(taps(&s), 0);
        assert!(s.contains(&GestureSignal::LongPress { tile: Some(TILE) }));
    }

    #[test]
    fn press_on_gap_yields_no_tap() {
        let mut g = GestureController::default();
        let s = run(&mut g, &[down(10.0, 10.0, 0), up(10.0, 10.0, 50)], &nothing);
        assert_eq!(taps(&s), 0);
        assert!(s.contains(&GestureSignal::Released {
            velocity: Vec2::ZERO,
            dragged: false
        }));
    }

    #[test]
    fn press_without_target_is_a_no_op() {
        let mut g = GestureController::default();
        let s = g.handle(
            GestureInput::PointerDown {
                pos: Vec2::new(1.0, 1.0),
                kind: PointerKind::Touch,
                has_target: false,
                at: ms(0),
            },
            &on_tile,
        );
        assert!(s.is_empty());
        assert!(g.handle(up(1.0, 1.0, 10), &on_tile).is_empty());
    }

    #[test]
    fn drag_deltas_are_multiplied_and_y_inverted() {
        let mut g = GestureController::default();
        let s = run(
            &mut g,
            &[down(0.0, 0.0, 0), mv(6.0, 0.0, 16), mv(6.0, 10.0, 32)],
            &on_tile,
        );
        let deltas: Vec<(f32, f32)> = s
            .iter()
            .filter_map(|x| match x {
                GestureSignal::PanDelta { dx, dy, .. } => Some((*dx, *dy)),
                _ => None,
            })
            .collect();
        assert_eq!(deltas, vec![(12.0, 0.0), (0.0, -20.0)]);
    }

    #[test]
    fn wheel_inverts_horizontal_only() {
        let mut g = GestureController::default();
        let s = g.handle(
            GestureInput::Wheel {
                delta: Vec2::new(4.0, 30.0),
                pos: Vec2::ZERO,
                at: ms(0),
            },
            &nothing,
        );
        assert_eq!(
            s[0],
            GestureSignal::PanDelta {
                dx: -4.0,
                dy: 30.0,
                source: PanSource::Wheel
            }
        );
        match s[1] {
            GestureSignal::Velocity { vy, .. } => assert!(vy > 0.0),
            other => panic!("expected velocity, got {other:?}"),
        }
    }

    #[test]
    fn hover_follows_pointer_when_enabled() {
        let mut g = GestureController::default();
        let s = g.handle(mv(5.0, 5.0, 0), &on_tile);
        assert_eq!(s, vec![GestureSignal::Hover(Some(TILE))]);
        assert!(g.handle(mv(6.0, 5.0, 10), &on_tile).is_empty());
        assert_eq!(
            g.handle(GestureInput::PointerLeave { at: ms(20) }, &on_tile),
            vec![GestureSignal::Hover(None)]
        );

        let mut narrow = GestureController::new(GestureConfig::from_profile(&Profile::narrow()));
        assert!(narrow.handle(mv(5.0, 5.0, 0), &on_tile).is_empty());
    }

    #[test]
    fn cancel_ends_gesture_without_tap() {
        let mut g = GestureController::default();
        let mut s = g.handle(down(0.0, 0.0, 0), &on_tile);
        s.extend(g.handle(GestureInput::PointerCancel { at: ms(10) }, &on_tile));
        assert_eq!(taps(&s), 0);
        assert_eq!(s.last(), Some(&GestureSignal::LinkSuppression(false)));
        assert!(!g.is_pressed());
    }

    #[test]
    fn second_pointer_is_ignored() {
        let mut g = GestureController::default();
        assert!(!g.handle(down(0.0, 0.0, 0), &on_tile).is_empty());
        assert!(g.handle(down(50.0, 50.0, 5), &on_tile).is_empty());
        assert!(g.is_pressed());
    }

    #[test]
    fn fling_velocity_reported_on_quick_release() {
        let mut g = GestureController::default();
        let s = run(
            &mut g,
            &[
                down(0.0, 0.0, 0),
                mv(20.0, 0.0, 16),
                mv(40.0, 0.0, 32),
                up(40.0, 0.0, 40),
            ],
            &on_tile,
        );
        let v = s.iter().find_map(|x| match x {
            GestureSignal::Released { velocity, .. } => Some(*velocity),
            _ => None,
        });
        assert!(v.is_some_and(|v| v.x > 1000.0));
    }
}
