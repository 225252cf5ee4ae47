#![forbid(unsafe_code)]

//! Deterministic, JSON-friendly input schema for `infigrid-web`.
//!
//! The web host (JS/TS, or the built-in DOM listeners) provides:
//! - pointer positions in canvas CSS pixels (top-left origin),
//! - raw wheel deltas together with the DOM `deltaMode`,
//! - a host timestamp in milliseconds (`performance.now()` or the event's
//!   `timeStamp`).
//!
//! This module focuses on:
//! - compact `buttons`/`mods` bitsets for logs and traces,
//! - wheel normalization to pixels,
//! - collapsing multi-pointer and multi-touch streams onto the single-pointer
//!   gesture model of the engine, and
//! - JSON encoding suitable for record/replay.

use std::time::Duration;

use bitflags::bitflags;
use infigrid_core::geometry::Vec2;
use infigrid_core::gesture::{GestureInput, PointerKind};
use serde::{Deserialize, Serialize};

/// Pixels per wheel "line" when the DOM reports `DOM_DELTA_LINE`.
pub const LINE_HEIGHT_PX: f32 = 16.0;

bitflags! {
    /// Modifier keys held during an input event.
    ///
    /// These flags are encoded as a compact `u8` bitset in JSON (`mods`).
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Modifiers: u8 {
        const SHIFT = 0b0001;
        const ALT   = 0b0010;
        const CTRL  = 0b0100;
        const SUPER = 0b1000;
    }
}

impl Modifiers {
    #[must_use]
    pub const fn from_bits_truncate_u8(bits: u8) -> Self {
        Self::from_bits_truncate(bits)
    }

    /// Build from the four DOM modifier booleans.
    #[must_use]
    pub fn from_dom(shift: bool, alt: bool, ctrl: bool, meta: bool) -> Self {
        let mut mods = Self::empty();
        mods.set(Self::SHIFT, shift);
        mods.set(Self::ALT, alt);
        mods.set(Self::CTRL, ctrl);
        mods.set(Self::SUPER, meta);
        mods
    }
}

bitflags! {
    /// Pressed pointer buttons, bit-compatible with DOM `MouseEvent.buttons`.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Buttons: u8 {
        const PRIMARY   = 0b0_0001;
        const SECONDARY = 0b0_0010;
        const AUXILIARY = 0b0_0100;
        const BACK      = 0b0_1000;
        const FORWARD   = 0b1_0000;
    }
}

impl Buttons {
    #[must_use]
    pub const fn from_bits_truncate_u8(bits: u8) -> Self {
        Self::from_bits_truncate(bits)
    }
}

/// Phase for pointer events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointerPhase {
    Down,
    Move,
    Up,
    Cancel,
    Leave,
}

/// DOM `pointerType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointerType {
    Mouse,
    Touch,
    Pen,
}

impl PointerType {
    /// Parse a DOM `pointerType` string. Unknown values are treated as mouse.
    #[must_use]
    pub fn from_dom(s: &str) -> Self {
        match s {
            "touch" => Self::Touch,
            "pen" => Self::Pen,
            _ => Self::Mouse,
        }
    }

    #[must_use]
    pub const fn kind(self) -> PointerKind {
        match self {
            Self::Mouse => PointerKind::Mouse,
            Self::Touch => PointerKind::Touch,
            Self::Pen => PointerKind::Pen,
        }
    }
}

/// Phase for touch events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TouchPhase {
    Start,
    Move,
    End,
    Cancel,
}

/// DOM `WheelEvent.deltaMode`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaMode {
    #[default]
    Pixel,
    Line,
    Page,
}

impl DeltaMode {
    /// Map the numeric DOM constant (0 pixel, 1 line, 2 page).
    #[must_use]
    pub const fn from_dom(mode: u32) -> Self {
        match mode {
            1 => Self::Line,
            2 => Self::Page,
            _ => Self::Pixel,
        }
    }
}

/// Normalize a wheel delta to CSS pixels. `page_height` is the canvas height.
#[must_use]
pub fn wheel_delta_px(dx: f32, dy: f32, mode: DeltaMode, page_height: f32) -> Vec2 {
    let scale = match mode {
        DeltaMode::Pixel => 1.0,
        DeltaMode::Line => LINE_HEIGHT_PX,
        DeltaMode::Page => page_height.max(1.0),
    };
    let finite = |v: f32| if v.is_finite() { v * scale } else { 0.0 };
    Vec2::new(finite(dx), finite(dy))
}

/// Host milliseconds → monotonic duration. Negative or non-finite stamps
/// collapse to zero.
#[must_use]
pub fn host_time(time_ms: f64) -> Duration {
    if time_ms.is_finite() && time_ms > 0.0 {
        Duration::from_secs_f64(time_ms / 1000.0)
    } else {
        Duration::ZERO
    }
}

/// Normalized pointer event in canvas CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointerInput {
    pub phase: PointerPhase,
    pub pointer: PointerType,
    pub id: i32,
    pub x: f32,
    pub y: f32,
    pub buttons: Buttons,
    pub mods: Modifiers,
    /// `false` when the DOM event had no resolvable target element.
    pub has_target: bool,
    pub time_ms: f64,
}

/// Wheel event with the raw DOM delta and its unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WheelInput {
    pub x: f32,
    pub y: f32,
    pub dx: f32,
    pub dy: f32,
    pub mode: DeltaMode,
    pub mods: Modifiers,
    pub time_ms: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TouchPoint {
    pub id: u32,
    pub x: f32,
    pub y: f32,
}

/// Touch event carrying the DOM `changedTouches`.
#[derive(Debug, Clone, PartialEq)]
pub struct TouchInput {
    pub phase: TouchPhase,
    pub touches: Vec<TouchPoint>,
    pub has_target: bool,
    pub time_ms: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FocusInput {
    pub focused: bool,
    pub time_ms: f64,
}

/// Normalized, deterministic web input event.
#[derive(Debug, Clone, PartialEq)]
pub enum InputEvent {
    Pointer(PointerInput),
    Wheel(WheelInput),
    Touch(TouchInput),
    Focus(FocusInput),
}

impl InputEvent {
    /// Host timestamp of the event in milliseconds.
    #[must_use]
    pub fn time_ms(&self) -> f64 {
        match self {
            Self::Pointer(p) => p.time_ms,
            Self::Wheel(w) => w.time_ms,
            Self::Touch(t) => t.time_ms,
            Self::Focus(f) => f.time_ms,
        }
    }
}

/// Follows one touch at a time so pinch and multi-finger streams collapse to
/// a single-pointer gesture. Additional touches are ignored until the
/// followed one ends.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TouchTracker {
    active: Option<u32>,
}

impl TouchTracker {
    #[must_use]
    pub const fn active(&self) -> Option<u32> {
        self.active
    }

    /// Forget the followed touch. Returns whether one was active.
    pub fn reset(&mut self) -> bool {
        self.active.take().is_some()
    }

    #[must_use]
    pub fn handle(&mut self, touch: &TouchInput) -> Option<GestureInput> {
        let at = host_time(touch.time_ms);
        match touch.phase {
            TouchPhase::Start => {
                if self.active.is_some() {
                    return None;
                }
                let first = touch.touches.first()?;
                self.active = Some(first.id);
                Some(GestureInput::PointerDown {
                    pos: Vec2::new(first.x, first.y),
                    kind: PointerKind::Touch,
                    has_target: touch.has_target,
                    at,
                })
            }
            TouchPhase::Move => {
                let point = self.followed(&touch.touches)?;
                Some(GestureInput::PointerMove {
                    pos: Vec2::new(point.x, point.y),
                    at,
                })
            }
            TouchPhase::End => {
                let point = self.followed(&touch.touches)?;
                self.active = None;
                Some(GestureInput::PointerUp {
                    pos: Vec2::new(point.x, point.y),
                    at,
                })
            }
            TouchPhase::Cancel => {
                self.followed(&touch.touches)?;
                self.active = None;
                Some(GestureInput::PointerCancel { at })
            }
        }
    }

    fn followed<'a>(&self, touches: &'a [TouchPoint]) -> Option<&'a TouchPoint> {
        let id = self.active?;
        touches.iter().find(|t| t.id == id)
    }
}

/// Turns raw web input into engine gesture input.
///
/// Guarantees:
/// - At most one pointer (or touch) drives a gesture; presses from other
///   pointers are dropped until the active one is released or cancelled.
/// - Non-primary mouse buttons never start a gesture.
/// - Touch pointers do not hover.
/// - Focus loss cancels the active gesture, so no press is left stuck.
/// - Ctrl+wheel is left to the browser (pinch-zoom on trackpads).
#[derive(Debug, Clone)]
pub struct InputNormalizer {
    pointer: Option<i32>,
    touch: TouchTracker,
    page_height: f32,
}

impl Default for InputNormalizer {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl InputNormalizer {
    #[must_use]
    pub fn new(page_height: f32) -> Self {
        Self {
            pointer: None,
            touch: TouchTracker::default(),
            page_height: page_height.max(1.0),
        }
    }

    /// Canvas height in CSS pixels, used for page-mode wheel deltas.
    pub fn set_page_height(&mut self, height: f32) {
        if height.is_finite() {
            self.page_height = height.max(1.0);
        }
    }

    #[must_use]
    pub const fn active_pointer(&self) -> Option<i32> {
        self.pointer
    }

    #[must_use]
    pub const fn is_pressed(&self) -> bool {
        self.pointer.is_some() || self.touch.active.is_some()
    }

    /// Whether a wheel event would be consumed (and should have its default
    /// prevented by the host).
    #[must_use]
    pub fn consumes_wheel(mods: Modifiers) -> bool {
        !mods.contains(Modifiers::CTRL)
    }

    #[must_use]
    pub fn normalize(&mut self, event: &InputEvent) -> Option<GestureInput> {
        match event {
            InputEvent::Pointer(p) => self.pointer_event(p),
            InputEvent::Wheel(w) => {
                if !Self::consumes_wheel(w.mods) {
                    return None;
                }
                Some(GestureInput::Wheel {
                    delta: wheel_delta_px(w.dx, w.dy, w.mode, self.page_height),
                    pos: Vec2::new(w.x, w.y),
                    at: host_time(w.time_ms),
                })
            }
            InputEvent::Touch(t) => {
                if self.pointer.is_some() {
                    return None;
                }
                self.touch.handle(t)
            }
            InputEvent::Focus(FocusInput { focused, time_ms }) => {
                if *focused {
                    return None;
                }
                let had_pointer = self.pointer.take().is_some();
                let had_touch = self.touch.reset();
                (had_pointer || had_touch).then(|| GestureInput::PointerCancel {
                    at: host_time(*time_ms),
                })
            }
        }
    }

    fn pointer_event(&mut self, p: &PointerInput) -> Option<GestureInput> {
        let pos = Vec2::new(p.x, p.y);
        let at = host_time(p.time_ms);
        match p.phase {
            PointerPhase::Down => {
                if self.is_pressed() {
                    return None;
                }
                if p.pointer == PointerType::Mouse && !p.buttons.contains(Buttons::PRIMARY) {
                    return None;
                }
                self.pointer = Some(p.id);
                Some(GestureInput::PointerDown {
                    pos,
                    kind: p.pointer.kind(),
                    has_target: p.has_target,
                    at,
                })
            }
            PointerPhase::Move => match self.pointer {
                Some(id) if id == p.id => Some(GestureInput::PointerMove { pos, at }),
                Some(_) => None,
                None if p.pointer == PointerType::Touch || self.touch.active.is_some() => None,
                None => Some(GestureInput::PointerMove { pos, at }),
            },
            PointerPhase::Up => {
                if self.pointer != Some(p.id) {
                    return None;
                }
                self.pointer = None;
                Some(GestureInput::PointerUp { pos, at })
            }
            PointerPhase::Cancel => {
                if self.pointer != Some(p.id) {
                    return None;
                }
                self.pointer = None;
                Some(GestureInput::PointerCancel { at })
            }
            // A pressed pointer is captured by the canvas, so a leave while
            // pressed is not the end of the gesture.
            PointerPhase::Leave => self
                .pointer
                .is_none()
                .then_some(GestureInput::PointerLeave { at }),
        }
    }
}

fn default_true() -> bool {
    true
}

/// JSON encoding used by hosts and golden traces.
///
/// A `kind` tag plus the minimum semantic fields needed for replay. Optional
/// fields default so hand-written JSON stays short.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InputEventJson {
    Pointer {
        phase: PointerPhase,
        pointer_type: PointerType,
        #[serde(default)]
        id: i32,
        x: f32,
        y: f32,
        #[serde(default)]
        buttons: u8,
        #[serde(default)]
        mods: u8,
        #[serde(default = "default_true")]
        has_target: bool,
        #[serde(default)]
        time_ms: f64,
    },
    Wheel {
        x: f32,
        y: f32,
        dx: f32,
        dy: f32,
        #[serde(default)]
        mode: DeltaMode,
        #[serde(default)]
        mods: u8,
        #[serde(default)]
        time_ms: f64,
    },
    Touch {
        phase: TouchPhase,
        touches: Vec<TouchPoint>,
        #[serde(default = "default_true")]
        has_target: bool,
        #[serde(default)]
        time_ms: f64,
    },
    Focus {
        focused: bool,
        #[serde(default)]
        time_ms: f64,
    },
}

impl InputEvent {
    /// Encode this event as a stable JSON string.
    ///
    /// Errors can occur only if serialization fails; non-finite floats are
    /// written as `null` by `serde_json` and will not decode back.
    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&InputEventJson::from(self))
    }

    /// Decode a previously encoded event JSON string.
    ///
    /// Errors occur if the JSON does not match the expected schema.
    pub fn from_json_str(s: &str) -> Result<Self, serde_json::Error> {
        let json: InputEventJson = serde_json::from_str(s)?;
        Ok(Self::from(json))
    }
}

impl From<&InputEvent> for InputEventJson {
    fn from(value: &InputEvent) -> Self {
        match value {
            InputEvent::Pointer(p) => Self::Pointer {
                phase: p.phase,
                pointer_type: p.pointer,
                id: p.id,
                x: p.x,
                y: p.y,
                buttons: p.buttons.bits(),
                mods: p.mods.bits(),
                has_target: p.has_target,
                time_ms: p.time_ms,
            },
            InputEvent::Wheel(w) => Self::Wheel {
                x: w.x,
                y: w.y,
                dx: w.dx,
                dy: w.dy,
                mode: w.mode,
                mods: w.mods.bits(),
                time_ms: w.time_ms,
            },
            InputEvent::Touch(t) => Self::Touch {
                phase: t.phase,
                touches: t.touches.clone(),
                has_target: t.has_target,
                time_ms: t.time_ms,
            },
            InputEvent::Focus(f) => Self::Focus {
                focused: f.focused,
                time_ms: f.time_ms,
            },
        }
    }
}

impl From<InputEventJson> for InputEvent {
    fn from(value: InputEventJson) -> Self {
        match value {
            InputEventJson::Pointer {
                phase,
                pointer_type,
                id,
                x,
                y,
                buttons,
                mods,
                has_target,
                time_ms,
            } => Self::Pointer(PointerInput {
                phase,
                pointer: pointer_type,
                id,
                x,
                y,
                buttons: Buttons::from_bits_truncate_u8(buttons),
                mods: Modifiers::from_bits_truncate_u8(mods),
                has_target,
                time_ms,
            }),
            InputEventJson::Wheel {
                x,
                y,
                dx,
                dy,
                mode,
                mods,
                time_ms,
            } => Self::Wheel(WheelInput {
                x,
                y,
                dx,
                dy,
                mode,
                mods: Modifiers::from_bits_truncate_u8(mods),
                time_ms,
            }),
            InputEventJson::Touch {
                phase,
                touches,
                has_target,
                time_ms,
            } => Self::Touch(TouchInput {
                phase,
                touches,
                has_target,
                time_ms,
            }),
            InputEventJson::Focus { focused, time_ms } => {
                Self::Focus(FocusInput { focused, time_ms })
            }
        }
    }
}
