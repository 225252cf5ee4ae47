#![forbid(unsafe_code)]

//! Viewport and orthographic camera.
//!
//! World units are CSS pixels, centred on the viewport: the screen centre is
//! world `(0, 0)`, `+y` is up. Screen coordinates are CSS pixels from the
//! top-left corner of the canvas.
//!
//! [`Viewport::resize`] must run on every resize and orientation change. A
//! stale viewport makes hit tests land on the wrong tile without failing.

use crate::geometry::{Vec2, WorldRect};

/// Near/far planes of the orthographic projection.
pub const NEAR: f32 = 1.0;
pub const FAR: f32 = 1000.0;

/// What a resize changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ViewportChange {
    /// CSS size changed.
    pub size: bool,
    /// Backing-store size changed (size or clamped pixel ratio).
    pub physical: bool,
}

impl ViewportChange {
    #[must_use]
    pub fn any(&self) -> bool {
        self.size || self.physical
    }
}

/// Canvas dimensions and pixel density.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    width: f32,
    height: f32,
    pixel_ratio: f32,
    max_pixel_ratio: f32,
}

impl Viewport {
    /// Create a viewport; the pixel ratio is clamped to `[1, max_pixel_ratio]`.
    #[must_use]
    pub fn new(width: f32, height: f32, device_pixel_ratio: f32, max_pixel_ratio: f32) -> Self {
        let mut vp = Self {
            width: 1.0,
            height: 1.0,
            pixel_ratio: 1.0,
            max_pixel_ratio: max_pixel_ratio.max(1.0),
        };
        vp.resize(width, height, device_pixel_ratio);
        vp
    }

    /// Apply a new CSS size and device pixel ratio.
    pub fn resize(&mut self, width: f32, height: f32, device_pixel_ratio: f32) -> ViewportChange {
        let width = sane_extent(width);
        let height = sane_extent(height);
        let ratio = if device_pixel_ratio.is_finite() {
            device_pixel_ratio.clamp(1.0, self.max_pixel_ratio)
        } else {
            1.0
        };
        let before = self.physical_size();
        let size = width != self.width || height != self.height;
        self.width = width;
        self.height = height;
        self.pixel_ratio = ratio;
        ViewportChange {
            size,
            physical: before != self.physical_size(),
        }
    }

    #[inline]
    #[must_use]
    pub fn width(&self) -> f32 {
        self.width
    }

    #[inline]
    #[must_use]
    pub fn height(&self) -> f32 {
        self.height
    }

    #[inline]
    #[must_use]
    pub fn size(&self) -> Vec2 {
        Vec2::new(self.width, self.height)
    }

    #[inline]
    #[must_use]
    pub fn pixel_ratio(&self) -> f32 {
        self.pixel_ratio
    }

    /// Backing-store size in device pixels, at least 1×1.
    #[must_use]
    pub fn physical_size(&self) -> (u32, u32) {
        let w = (self.width * self.pixel_ratio).round().max(1.0) as u32;
        let h = (self.height * self.pixel_ratio).round().max(1.0) as u32;
        (w, h)
    }

    /// Screen (CSS px, y down, top-left origin) → world (y up, centred).
    #[must_use]
    pub fn screen_to_world(&self, screen: Vec2) -> Vec2 {
        Vec2::new(screen.x - self.width / 2.0, self.height / 2.0 - screen.y)
    }

    #[must_use]
    pub fn world_to_screen(&self, world: Vec2) -> Vec2 {
        Vec2::new(world.x + self.width / 2.0, self.height / 2.0 - world.y)
    }

    /// World → normalized device coordinates.
    #[must_use]
    pub fn world_to_ndc(&self, world: Vec2) -> Vec2 {
        Vec2::new(world.x / (self.width / 2.0), world.y / (self.height / 2.0))
    }

    /// Visible world rectangle.
    #[must_use]
    pub fn world_rect(&self) -> WorldRect {
        WorldRect::from_center(Vec2::ZERO, self.size())
    }

    /// Column-major orthographic projection (WebGPU clip space, z in [0, 1]).
    #[must_use]
    pub fn projection(&self) -> [[f32; 4]; 4] {
        let (l, r) = (-self.width / 2.0, self.width / 2.0);
        let (b, t) = (-self.height / 2.0, self.height / 2.0);
        let (n, f) = (NEAR, FAR);
        [
            [2.0 / (r - l), 0.0, 0.0, 0.0],
            [0.0, 2.0 / (t - b), 0.0, 0.0],
            [0.0, 0.0, 1.0 / (n - f), 0.0],
            [-(r + l) / (r - l), -(t + b) / (t - b), n / (n - f), 1.0],
        ]
    }
}

fn sane_extent(v: f32) -> f32 {
    if v.is_finite() { v.max(1.0) } else { 1.0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mul(m: &[[f32; 4]; 4], p: [f32; 4]) -> [f32; 4] {
        let mut out = [0.0; 4];
        for (col, v) in m.iter().zip(p) {
            for (o, c) in out.iter_mut().zip(col) {
                *o += c * v;
            }
        }
        out
    }

    #[test]
    fn screen_world_roundtrip() {
        let vp = Viewport::new(800.0, 600.0, 1.0, 2.0);
        assert_eq!(vp.screen_to_world(Vec2::new(400.0, 300.0)), Vec2::ZERO);
        assert_eq!(vp.screen_to_world(Vec2::new(0.0, 0.0)), Vec2::new(-400.0, 300.0));
        let p = Vec2::new(123.0, 45.0);
        assert_eq!(vp.screen_to_world(vp.world_to_screen(p)), p);
    }

    #[test]
    fn projection_maps_edges_to_clip_bounds() {
        let vp = Viewport::new(800.0, 600.0, 1.0, 2.0);
        let m = vp.projection();
        let c = mul(&m, [400.0, 300.0, -10.0, 1.0]);
        assert!((c[0] - 1.0).abs() < 1e-6);
        assert!((c[1] - 1.0).abs() < 1e-6);
        assert!((0.0..=1.0).contains(&c[2]));
        let ndc = vp.world_to_ndc(Vec2::new(-400.0, -300.0));
        assert_eq!(ndc, Vec2::new(-1.0, -1.0));
    }

    #[test]
    fn pixel_ratio_is_clamped() {
        let mut vp = Viewport::new(100.0, 50.0, 3.0, 2.0);
        assert_eq!(vp.pixel_ratio(), 2.0);
        assert_eq!(vp.physical_size(), (200, 100));
        let change = vp.resize(100.0, 50.0, 0.5);
        assert!(!change.size);
        assert!(change.physical);
        assert_eq!(vp.physical_size(), (100, 50));
    }

    #[test]
    fn degenerate_sizes_are_clamped() {
        let vp = Viewport::new(0.0, f32::NAN, f32::NAN, 2.0);
        assert_eq!(vp.size(), Vec2::new(1.0, 1.0));
        assert_eq!(vp.physical_size(), (1, 1));
    }
}
