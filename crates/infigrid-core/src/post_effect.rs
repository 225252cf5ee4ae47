#![forbid(unsafe_code)]

//! Full-screen post effect: lens distortion, film grain, vignette.
//!
//! This is the reference implementation. The WGSL post shader mirrors it
//! term for term, and the Canvas 2D backend runs it directly on the frame's
//! pixels.
//!
//! Composition order is fixed: the UV is warped first, then grain and
//! vignette are evaluated at the *warped* UV, so they follow the distortion.
//!
//! - **Distortion**: `uv' = 0.5 + (1 + s·|uv − 0.5|²)·(uv − 0.5)`. Negative
//!   `s` samples closer to the centre (pincushion / squeeze), positive `s`
//!   samples further out (barrel).
//! - **Grain**: hash noise in `[-1, 1]`, scaled by the headroom of each
//!   channel, so it never clips.
//! - **Vignette**: `1 − intensity·(2·|uv − 0.5|/√2)^power`, a multiplier in
//!   `[1 − intensity, 1]`.

use crate::config::PostEffectConfig;
use crate::geometry::Vec2;

/// Uniforms of one post pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PostParams {
    pub distortion: f32,
    pub time: f32,
    pub noise_intensity: f32,
    pub vignette_intensity: f32,
    pub vignette_power: f32,
}

impl PostParams {
    #[must_use]
    pub fn new(cfg: &PostEffectConfig, distortion: f32, time: f32) -> Self {
        Self {
            distortion,
            time,
            noise_intensity: cfg.noise_intensity,
            vignette_intensity: cfg.vignette_intensity,
            vignette_power: cfg.vignette_power,
        }
    }

    /// Parameters that leave a frame untouched.
    #[must_use]
    pub const fn identity() -> Self {
        Self {
            distortion: 0.0,
            time: 0.0,
            noise_intensity: 0.0,
            vignette_intensity: 0.0,
            vignette_power: 1.0,
        }
    }
}

/// Radial barrel/pincushion warp of a UV in `[0, 1]²`.
#[inline]
#[must_use]
pub fn barrel_pincushion(uv: Vec2, strength: f32) -> Vec2 {
    let st = uv - Vec2::new(0.5, 0.5);
    let r = 1.0 + strength * st.dot(st);
    Vec2::new(0.5, 0.5) + st * r
}

/// Hash noise in `[-1, 1]`, animated by `time`.
#[inline]
#[must_use]
pub fn grain(uv: Vec2, time: f32) -> f32 {
    let p = Vec2::new(uv.x * 1000.0 + time, uv.y * 1000.0 + time);
    let h = (p.dot(Vec2::new(12.9898, 78.233)).sin() * 43_758.547).fract();
    // fract of a negative number is negative in Rust; fold into [0, 1).
    let h = if h < 0.0 { h + 1.0 } else { h };
    h * 2.0 - 1.0
}

/// Vignette multiplier at `uv`.
#[inline]
#[must_use]
pub fn vignette(uv: Vec2, intensity: f32, power: f32) -> f32 {
    let d = ((uv - Vec2::new(0.5, 0.5)).length() * std::f32::consts::SQRT_2).min(1.0);
    1.0 - intensity.clamp(0.0, 1.0) * d.powf(power.max(0.01))
}

/// Apply grain and vignette to one linear RGB colour sampled at `uv`
/// (already warped).
#[inline]
#[must_use]
pub fn shade(rgb: [f32; 3], uv: Vec2, p: &PostParams) -> [f32; 3] {
    let n = grain(uv, p.time) * p.noise_intensity.clamp(0.0, 1.0);
    let v = vignette(uv, p.vignette_intensity, p.vignette_power);
    rgb.map(|c| {
        let c = c.clamp(0.0, 1.0);
        let headroom = if n >= 0.0 { 1.0 - c } else { c };
        (c + n * headroom) * v
    })
}

/// An RGBA8 frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbaFrame {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl RgbaFrame {
    /// Wrap raw pixels; `None` if the buffer length does not match.
    #[must_use]
    pub fn from_raw(width: u32, height: u32, pixels: Vec<u8>) -> Option<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)?
            .checked_mul(4)?;
        (pixels.len() == expected).then_some(Self {
            width,
            height,
            pixels,
        })
    }

    #[must_use]
    pub fn filled(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let n = width as usize * height as usize;
        Self {
            width,
            height,
            pixels: rgba.repeat(n),
        }
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[must_use]
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    #[must_use]
    pub fn into_pixels(self) -> Vec<u8> {
        self.pixels
    }

    #[must_use]
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let i = (y as usize * self.width as usize + x as usize) * 4;
        [
            self.pixels[i],
            self.pixels[i + 1],
            self.pixels[i + 2],
            self.pixels[i + 3],
        ]
    }

    /// Bilinear sample at `uv` with clamp-to-edge addressing, as floats.
    #[must_use]
    pub fn sample(&self, uv: Vec2) -> [f32; 4] {
        if self.width == 0 || self.height == 0 {
            return [0.0; 4];
        }
        let fx = (uv.x.clamp(0.0, 1.0) * self.width as f32 - 0.5).max(0.0);
        let fy = (uv.y.clamp(0.0, 1.0) * self.height as f32 - 0.5).max(0.0);
        let x0 = (fx.floor() as u32).min(self.width - 1);
        let y0 = (fy.floor() as u32).min(self.height - 1);
        let x1 = (x0 + 1).min(self.width - 1);
        let y1 = (y0 + 1).min(self.height - 1);
        let tx = fx - x0 as f32;
        let ty = fy - y0 as f32;

        let lerp = |a: [u8; 4], b: [u8; 4], t: f32| -> [f32; 4] {
            std::array::from_fn(|i| f32::from(a[i]) + (f32::from(b[i]) - f32::from(a[i])) * t)
        };
        let top = lerp(self.pixel(x0, y0), self.pixel(x1, y0), tx);
        let bottom = lerp(self.pixel(x0, y1), self.pixel(x1, y1), tx);
        std::array::from_fn(|i| (top[i] + (bottom[i] - top[i]) * ty) / 255.0)
    }
}

/// `(frame, strength, time) → frame`: the full post pass on the CPU.
#[must_use]
pub fn apply(frame: &RgbaFrame, params: &PostParams) -> RgbaFrame {
    let (w, h) = (frame.width, frame.height);
    let mut out = Vec::with_capacity(frame.pixels.len());
    for y in 0..h {
        for x in 0..w {
            let uv = Vec2::new((x as f32 + 0.5) / w as f32, (y as f32 + 0.5) / h as f32);
            let warped = barrel_pincushion(uv, params.distortion);
            let s = frame.sample(warped);
            let rgb = shade([s[0], s[1], s[2]], warped, params);
            out.extend(rgb.map(to_u8));
            out.push(to_u8(s[3]));
        }
    }
    RgbaFrame {
        width: w,
        height: h,
        pixels: out,
    }
}

fn to_u8(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}
