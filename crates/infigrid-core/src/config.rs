#![forbid(unsafe_code)]

//! Tuning for the grid, chosen per breakpoint.
//!
//! A [`GridConfig`] carries two [`Profile`]s. [`GridConfig::profile_for`]
//! picks one from the viewport width, and the engine hands that profile by
//! reference to every component that needs it. A breakpoint flip swaps the
//! whole profile and rebuilds the tiles. Nothing here is global or mutated
//! after construction.
//!
//! Every struct is `#[serde(default)]`, so hosts can send partial JSON and
//! get defaults for the rest.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::animation::Easing;

/// Item size and grid spacing for one block.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    pub item_width: f32,
    pub item_height: f32,
    pub columns: u32,
    pub gap: f32,
    pub padding: f32,
}

impl LayoutConfig {
    #[must_use]
    pub const fn wide() -> Self {
        Self {
            item_width: 400.0,
            item_height: 300.0,
            columns: 5,
            gap: 12.0,
            padding: 6.0,
        }
    }

    #[must_use]
    pub const fn narrow() -> Self {
        Self {
            item_width: 320.0,
            item_height: 240.0,
            columns: 2,
            gap: 12.0,
            padding: 6.0,
        }
    }
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self::wide()
    }
}

/// Duration plus easing curve for one animated transition.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EaseSpec {
    pub duration_ms: u32,
    pub easing: Easing,
}

impl EaseSpec {
    #[must_use]
    pub const fn new(duration_ms: u32, easing: Easing) -> Self {
        Self {
            duration_ms,
            easing,
        }
    }

    #[inline]
    #[must_use]
    pub fn duration(&self) -> Duration {
        Duration::from_millis(u64::from(self.duration_ms))
    }
}

impl Default for EaseSpec {
    fn default() -> Self {
        Self::new(300, Easing::QuadOut)
    }
}

/// Post-effect distortion tuning.
///
/// Distortion is a signed lens strength: negative values pinch the frame
/// (pincushion), `0.0` is neutral. `max` is the floor that velocity-driven
/// distortion may reach.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DistortionConfig {
    /// Value at mount, held until every tile has settled.
    pub starting: f32,
    /// Resting value.
    pub base: f32,
    /// Target while a pointer is pressed.
    pub press_amount: f32,
    /// Most extreme velocity-driven value.
    pub max: f32,
    /// Multiplier from wheel speed (px/s) to distortion.
    pub velocity_scale: f32,
    pub press: EaseSpec,
    pub release: EaseSpec,
    pub scroll: EaseSpec,
    pub reset: EaseSpec,
    /// Wheel inactivity before distortion relaxes to `base`.
    pub scroll_stop_delay_ms: u32,
    /// Per-60Hz-frame exponential smoothing of the displayed value.
    pub smoothing: f32,
}

impl DistortionConfig {
    #[must_use]
    pub const fn wide() -> Self {
        Self {
            starting: -0.5,
            base: 0.0,
            press_amount: -0.5,
            max: -0.5,
            velocity_scale: 0.0025,
            press: EaseSpec::new(400, Easing::Snappy),
            release: EaseSpec::new(600, Easing::Snappy),
            scroll: EaseSpec::new(300, Easing::QuadOut),
            reset: EaseSpec::new(500, Easing::QuadOut),
            scroll_stop_delay_ms: 150,
            smoothing: 0.1,
        }
    }

    #[must_use]
    pub const fn narrow() -> Self {
        Self {
            press_amount: -0.25,
            max: -0.2,
            velocity_scale: 0.005,
            ..Self::wide()
        }
    }

    #[inline]
    #[must_use]
    pub fn scroll_stop_delay(&self) -> Duration {
        Duration::from_millis(u64::from(self.scroll_stop_delay_ms))
    }
}

impl Default for DistortionConfig {
    fn default() -> Self {
        Self::wide()
    }
}

/// Pan feel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    /// Fraction of the remaining distance covered per 60Hz frame.
    pub pan_smoothing: f32,
    /// Drag delta multiplier.
    pub drag_multiplier: f32,
    /// Release speed (px/s) above which a fling adds momentum.
    pub momentum_min_speed: f32,
    /// Seconds of release velocity added to the target on a fling.
    pub momentum_secs: f32,
    /// Fade-in and distortion settle duration once all tiles are loaded.
    pub load_in_ms: u32,
    /// Total random stagger spread across tiles during load-in.
    pub load_in_stagger_ms: u32,
    /// Centre the first card on mount instead of the field centre.
    pub center_first_item: bool,
}

impl MotionConfig {
    #[must_use]
    pub const fn wide() -> Self {
        Self {
            pan_smoothing: 0.075,
            drag_multiplier: 2.0,
            momentum_min_speed: 100.0,
            momentum_secs: 0.1,
            load_in_ms: 1200,
            load_in_stagger_ms: 600,
            center_first_item: false,
        }
    }

    #[must_use]
    pub const fn narrow() -> Self {
        Self {
            pan_smoothing: 0.2,
            load_in_ms: 750,
            center_first_item: true,
            ..Self::wide()
        }
    }

    #[inline]
    #[must_use]
    pub fn load_in(&self) -> Duration {
        Duration::from_millis(u64::from(self.load_in_ms))
    }

    #[inline]
    #[must_use]
    pub fn load_in_stagger(&self) -> Duration {
        Duration::from_millis(u64::from(self.load_in_stagger_ms))
    }
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self::wide()
    }
}

/// Press classification thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InteractionConfig {
    /// Movement (px) from the press origin that turns a press into a drag.
    pub drag_threshold: f32,
    /// Presses held at least this long never count as taps.
    pub long_press_ms: u32,
    /// Whether hover highlighting is active (pointer devices only).
    pub hover_enabled: bool,
}

impl InteractionConfig {
    #[must_use]
    pub const fn wide() -> Self {
        Self {
            drag_threshold: 5.0,
            long_press_ms: 500,
            hover_enabled: true,
        }
    }

    #[must_use]
    pub const fn narrow() -> Self {
        Self {
            long_press_ms: 300,
            hover_enabled: false,
            ..Self::wide()
        }
    }

    #[inline]
    #[must_use]
    pub fn long_press(&self) -> Duration {
        Duration::from_millis(u64::from(self.long_press_ms))
    }
}

impl Default for InteractionConfig {
    fn default() -> Self {
        Self::wide()
    }
}

/// Everything that changes at the breakpoint.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Profile {
    pub layout: LayoutConfig,
    pub distortion: DistortionConfig,
    pub motion: MotionConfig,
    pub interaction: InteractionConfig,
}

impl Profile {
    #[must_use]
    pub const fn wide() -> Self {
        Self {
            layout: LayoutConfig::wide(),
            distortion: DistortionConfig::wide(),
            motion: MotionConfig::wide(),
            interaction: InteractionConfig::wide(),
        }
    }

    #[must_use]
    pub const fn narrow() -> Self {
        Self {
            layout: LayoutConfig::narrow(),
            distortion: DistortionConfig::narrow(),
            motion: MotionConfig::narrow(),
            interaction: InteractionConfig::narrow(),
        }
    }
}

/// Full-screen post pass tuning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostEffectConfig {
    pub noise_intensity: f32,
    pub vignette_intensity: f32,
    pub vignette_power: f32,
}

impl Default for PostEffectConfig {
    fn default() -> Self {
        Self {
            noise_intensity: 0.05,
            vignette_intensity: 0.25,
            vignette_power: 1.5,
        }
    }
}

/// Title and tag line drawn at the bottom-left of every card, in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptionStyle {
    /// Inset from the card's left and bottom edges.
    pub padding: f32,
    pub title_size: f32,
    pub tags_size: f32,
    /// Vertical space between the title and the tag line.
    pub gap: f32,
    /// Tag line opacity relative to the title.
    pub tags_opacity: f32,
}

impl Default for CaptionStyle {
    fn default() -> Self {
        Self {
            padding: 18.0,
            title_size: 12.0,
            tags_size: 10.0,
            gap: 6.0,
            tags_opacity: 0.6,
        }
    }
}

/// Per-tile look.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TileStyle {
    pub border_radius: f32,
    pub image_vignette_intensity: f32,
    pub image_vignette_power: f32,
    pub resting_grayscale: f32,
    pub resting_overlay: f32,
    pub hover_scale: f32,
    pub hover_color: EaseSpec,
    pub hover_zoom: EaseSpec,
    pub caption: CaptionStyle,
}

impl Default for TileStyle {
    fn default() -> Self {
        Self {
            border_radius: 6.0,
            image_vignette_intensity: 0.15,
            image_vignette_power: 0.4,
            resting_grayscale: 1.0,
            resting_overlay: 0.2,
            hover_scale: 1.05,
            hover_color: EaseSpec::new(300, Easing::QuadOut),
            hover_zoom: EaseSpec::new(400, Easing::Snappy),
            caption: CaptionStyle::default(),
        }
    }
}

/// Which profile is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Breakpoint {
    Wide,
    Narrow,
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    /// Viewport widths strictly below this select [`GridConfig::narrow`].
    pub breakpoint_px: f32,
    pub wide: Profile,
    pub narrow: Profile,
    pub post: PostEffectConfig,
    pub tile_style: TileStyle,
    /// Upper bound on the device pixel ratio used for the backing store.
    pub max_pixel_ratio: f32,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            breakpoint_px: 768.0,
            wide: Profile::wide(),
            narrow: Profile::narrow(),
            post: PostEffectConfig::default(),
            tile_style: TileStyle::default(),
            max_pixel_ratio: 2.0,
        }
    }
}

impl GridConfig {
    #[must_use]
    pub fn breakpoint_for(&self, viewport_width: f32) -> Breakpoint {
        if viewport_width < self.breakpoint_px {
            Breakpoint::Narrow
        } else {
            Breakpoint::Wide
        }
    }

    #[must_use]
    pub fn profile(&self, breakpoint: Breakpoint) -> &Profile {
        match breakpoint {
            Breakpoint::Wide => &self.wide,
            Breakpoint::Narrow => &self.narrow,
        }
    }

    #[must_use]
    pub fn profile_for(&self, viewport_width: f32) -> (Breakpoint, &Profile) {
        let bp = self.breakpoint_for(viewport_width);
        (bp, self.profile(bp))
    }

    /// Clamp every numeric field into its valid range.
    ///
    /// Misconfiguration degrades to the nearest usable value instead of
    /// failing; each correction is logged at `warn`.
    #[must_use]
    pub fn sanitized(mut self) -> Self {
        self.breakpoint_px = clamp_field("breakpoint_px", self.breakpoint_px, 0.0, f32::MAX, 768.0);
        self.max_pixel_ratio = clamp_field("max_pixel_ratio", self.max_pixel_ratio, 1.0, 8.0, 2.0);
        for profile in [&mut self.wide, &mut self.narrow] {
            sanitize_profile(profile);
        }
        let p = &mut self.post;
        p.noise_intensity = clamp_field("post.noise_intensity", p.noise_intensity, 0.0, 1.0, 0.05);
        p.vignette_intensity =
            clamp_field("post.vignette_intensity", p.vignette_intensity, 0.0, 1.0, 0.25);
        p.vignette_power = clamp_field("post.vignette_power", p.vignette_power, 0.01, 16.0, 1.5);
        let s = &mut self.tile_style;
        s.border_radius = clamp_field("tile_style.border_radius", s.border_radius, 0.0, 1.0e4, 6.0);
        s.hover_scale = clamp_field("tile_style.hover_scale", s.hover_scale, 0.1, 10.0, 1.05);
        s.resting_grayscale =
            clamp_field("tile_style.resting_grayscale", s.resting_grayscale, 0.0, 1.0, 1.0);
        s.resting_overlay =
            clamp_field("tile_style.resting_overlay", s.resting_overlay, 0.0, 1.0, 0.2);
        let c = &mut s.caption;
        c.padding = clamp_field("caption.padding", c.padding, 0.0, 1.0e4, 18.0);
        c.title_size = clamp_field("caption.title_size", c.title_size, 1.0, 512.0, 12.0);
        c.tags_size = clamp_field("caption.tags_size", c.tags_size, 1.0, 512.0, 10.0);
        c.gap = clamp_field("caption.gap", c.gap, 0.0, 1.0e4, 6.0);
        c.tags_opacity = clamp_field("caption.tags_opacity", c.tags_opacity, 0.0, 1.0, 0.6);
        self
    }
}

fn sanitize_profile(p: &mut Profile) {
    let l = &mut p.layout;
    if l.columns == 0 {
        crate::warn!(field = "layout.columns", "zero columns clamped to 1");
        l.columns = 1;
    }
    l.item_width = clamp_field("layout.item_width", l.item_width, 1.0, 1.0e5, 400.0);
    l.item_height = clamp_field("layout.item_height", l.item_height, 1.0, 1.0e5, 300.0);
    l.gap = clamp_field("layout.gap", l.gap, 0.0, 1.0e4, 12.0);
    l.padding = clamp_field("layout.padding", l.padding, 0.0, 1.0e4, 6.0);

    let m = &mut p.motion;
    m.pan_smoothing = clamp_field("motion.pan_smoothing", m.pan_smoothing, 0.001, 1.0, 0.075);
    m.drag_multiplier = clamp_field("motion.drag_multiplier", m.drag_multiplier, 0.0, 100.0, 2.0);
    m.momentum_min_speed =
        clamp_field("motion.momentum_min_speed", m.momentum_min_speed, 0.0, 1.0e6, 100.0);
    m.momentum_secs = clamp_field("motion.momentum_secs", m.momentum_secs, 0.0, 10.0, 0.1);

    let d = &mut p.distortion;
    d.smoothing = clamp_field("distortion.smoothing", d.smoothing, 0.001, 1.0, 0.1);
    d.velocity_scale = clamp_field("distortion.velocity_scale", d.velocity_scale, 0.0, 1.0, 0.0025);
    d.max = clamp_field("distortion.max", d.max, -4.0, 0.0, -0.5);

    let i = &mut p.interaction;
    i.drag_threshold = clamp_field("interaction.drag_threshold", i.drag_threshold, 0.0, 1.0e3, 5.0);
}

fn clamp_field(name: &'static str, v: f32, min: f32, max: f32, fallback: f32) -> f32 {
    if !v.is_finite() {
        crate::warn!(field = name, value = v, fallback, "non-finite config value replaced");
        return fallback;
    }
    let c = v.clamp(min, max);
    if c != v {
        crate::warn!(field = name, value = v, clamped = c, "config value clamped");
    }
    c
}
