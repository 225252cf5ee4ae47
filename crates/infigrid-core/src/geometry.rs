#![forbid(unsafe_code)]

//! World-space geometry for the wrap-around grid.
//!
//! # Coordinate convention
//!
//! World units map 1:1 to CSS pixels. `+x` points right and `+y` points
//! **up**, so row indices (which grow downward on screen) produce negative
//! `y`. One laid-out copy of the dataset is a *block*; four blocks are tiled
//! 2×2 so that, once the pan offset is wrapped into half a block in each
//! direction, the visible area always lands on rendered content.
//!
//! ```text
//!            x = -W        x = 0         x = +W
//!   y = +H   ┌─────────────┬─────────────┐
//!            │  dup 0      │  dup 1      │
//!            │  (-W, +H)   │  (0, +H)    │
//!   y = 0    ├─────────────┼─────────────┤
//!            │  dup 2      │  dup 3      │
//!            │  (-W, 0)    │  (0, 0)     │
//!   y = -H   └─────────────┴─────────────┘
//! ```
//!
//! Everything in this module is pure.

use std::ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign};

use crate::config::LayoutConfig;

/// Number of live copies of the block (2×2).
pub const DUPLICATE_COUNT: u8 = 4;

/// A 2-D vector / point in world units.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const ZERO: Self = Self { x: 0.0, y: 0.0 };

    #[inline]
    #[must_use]
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    #[inline]
    #[must_use]
    pub fn length(self) -> f32 {
        self.x.hypot(self.y)
    }

    #[inline]
    #[must_use]
    pub fn dot(self, other: Self) -> f32 {
        self.x * other.x + self.y * other.y
    }

    #[inline]
    #[must_use]
    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl Add for Vec2 {
    type Output = Self;
    #[inline]
    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl AddAssign for Vec2 {
    #[inline]
    fn add_assign(&mut self, rhs: Self) {
        self.x += rhs.x;
        self.y += rhs.y;
    }
}

impl Sub for Vec2 {
    type Output = Self;
    #[inline]
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl SubAssign for Vec2 {
    #[inline]
    fn sub_assign(&mut self, rhs: Self) {
        self.x -= rhs.x;
        self.y -= rhs.y;
    }
}

impl Mul<f32> for Vec2 {
    type Output = Self;
    #[inline]
    fn mul(self, rhs: f32) -> Self {
        Self::new(self.x * rhs, self.y * rhs)
    }
}

impl Neg for Vec2 {
    type Output = Self;
    #[inline]
    fn neg(self) -> Self {
        Self::new(-self.x, -self.y)
    }
}

/// Axis-aligned rectangle in world space, stored by its edges.
///
/// Containment is half-open: `left <= x < right` and `bottom <= y < top`,
/// so a point on the shared edge of two adjacent tiles belongs to exactly
/// one of them.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct WorldRect {
    pub left: f32,
    pub bottom: f32,
    pub right: f32,
    pub top: f32,
}

impl WorldRect {
    #[must_use]
    pub fn from_center(center: Vec2, size: Vec2) -> Self {
        let half = size * 0.5;
        Self {
            left: center.x - half.x,
            bottom: center.y - half.y,
            right: center.x + half.x,
            top: center.y + half.y,
        }
    }

    #[inline]
    #[must_use]
    pub fn width(&self) -> f32 {
        self.right - self.left
    }

    #[inline]
    #[must_use]
    pub fn height(&self) -> f32 {
        self.top - self.bottom
    }

    #[inline]
    #[must_use]
    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    #[inline]
    #[must_use]
    pub fn contains(&self, p: Vec2) -> bool {
        p.x >= self.left && p.x < self.right && p.y >= self.bottom && p.y < self.top
    }

    /// Overlap of two rectangles, or `None` when they only touch or are apart.
    #[must_use]
    pub fn intersection(&self, other: &Self) -> Option<Self> {
        let r = Self {
            left: self.left.max(other.left),
            bottom: self.bottom.max(other.bottom),
            right: self.right.min(other.right),
            top: self.top.min(other.top),
        };
        (r.left < r.right && r.bottom < r.top).then_some(r)
    }

    #[must_use]
    pub fn translate(&self, by: Vec2) -> Self {
        Self {
            left: self.left + by.x,
            bottom: self.bottom + by.y,
            right: self.right + by.x,
            top: self.top + by.y,
        }
    }

    #[must_use]
    pub fn inflate(&self, margin: f32) -> Self {
        Self {
            left: self.left - margin,
            bottom: self.bottom - margin,
            right: self.right + margin,
            top: self.top + margin,
        }
    }
}

/// Derived layout of one block.
///
/// Always produced by [`GridLayout::compute`], which clamps its inputs, so
/// `columns >= 1`, item sizes are at least 1 and gap/padding are non-negative.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridLayout {
    pub columns: u32,
    pub rows: u32,
    pub item_count: u32,
    pub item_width: f32,
    pub item_height: f32,
    pub gap: f32,
    pub padding: f32,
    pub block_width: f32,
    pub block_height: f32,
}

/// Minimum item edge length after clamping.
pub const MIN_ITEM_EDGE: f32 = 1.0;

impl GridLayout {
    /// Lay out `item_count` items with the given cell metrics.
    ///
    /// `block = padding*2 + n*item + (n-1)*gap` per axis, with `n` the column
    /// or row count. An empty dataset has zero rows and a block height of
    /// `padding*2`.
    #[must_use]
    pub fn compute(item_count: usize, cfg: &LayoutConfig) -> Self {
        let columns = cfg.columns.max(1);
        let item_width = finite_at_least(cfg.item_width, MIN_ITEM_EDGE);
        let item_height = finite_at_least(cfg.item_height, MIN_ITEM_EDGE);
        let gap = finite_at_least(cfg.gap, 0.0);
        let padding = finite_at_least(cfg.padding, 0.0);

        let item_count = u32::try_from(item_count).unwrap_or(u32::MAX);
        let rows = item_count.div_ceil(columns);

        Self {
            columns,
            rows,
            item_count,
            item_width,
            item_height,
            gap,
            padding,
            block_width: span(columns, item_width, gap, padding),
            block_height: span(rows, item_height, gap, padding),
        }
    }

    #[inline]
    #[must_use]
    pub fn block_size(&self) -> Vec2 {
        Vec2::new(self.block_width, self.block_height)
    }

    #[inline]
    #[must_use]
    pub fn item_size(&self) -> Vec2 {
        Vec2::new(self.item_width, self.item_height)
    }

    /// Half the block per axis: the wrap bound for the pan offset.
    #[inline]
    #[must_use]
    pub fn half_block(&self) -> Vec2 {
        self.block_size() * 0.5
    }

    /// Column and row of item `index` inside a block.
    #[inline]
    #[must_use]
    pub fn cell_of(&self, index: u32) -> (u32, u32) {
        (index % self.columns, index / self.columns)
    }

    /// Centre of item `index` in world space, shifted by `duplicate_offset`.
    #[must_use]
    pub fn position_of(&self, index: u32, duplicate_offset: Vec2) -> Vec2 {
        let (col, row) = self.cell_of(index);
        let x = self.padding
            + col as f32 * (self.item_width + self.gap)
            + self.item_width / 2.0
            + duplicate_offset.x;
        let y = -(self.padding + row as f32 * (self.item_height + self.gap) + self.item_height / 2.0)
            + duplicate_offset.y;
        Vec2::new(x, y)
    }

    /// Offset of duplicate `d` (0..4) relative to the primary block.
    ///
    /// Duplicates are numbered row-major over the 2×2 field, top-left first.
    #[must_use]
    pub fn duplicate_offset(&self, duplicate: u8) -> Vec2 {
        let dup_col = f32::from(duplicate % 2);
        let dup_row = f32::from(duplicate / 2);
        Vec2::new(
            dup_col * self.block_width - self.block_width,
            -(dup_row * self.block_height - self.block_height),
        )
    }

    /// Bounds of block copy `duplicate`.
    #[must_use]
    pub fn block_rect(&self, duplicate: u8) -> WorldRect {
        let o = self.duplicate_offset(duplicate);
        WorldRect {
            left: o.x,
            bottom: o.y - self.block_height,
            right: o.x + self.block_width,
            top: o.y,
        }
    }

    /// Bounds of the full 2×2 field: `[-W, W) × [-H, H)`.
    #[must_use]
    pub fn field_rect(&self) -> WorldRect {
        WorldRect {
            left: -self.block_width,
            bottom: -self.block_height,
            right: self.block_width,
            top: self.block_height,
        }
    }

    /// Whether a viewport of `size` is always fully covered by the 2×2 field
    /// once the pan offset is wrapped into half a block.
    ///
    /// The visible centre can sit anywhere in `(-W/2, W/2]`, so coverage
    /// needs `size <= W` (and likewise for height).
    #[must_use]
    pub fn covers_viewport(&self, size: Vec2) -> bool {
        size.x <= self.block_width && size.y <= self.block_height
    }
}

fn span(count: u32, item: f32, gap: f32, padding: f32) -> f32 {
    padding * 2.0 + count as f32 * item + count.saturating_sub(1) as f32 * gap
}

fn finite_at_least(v: f32, min: f32) -> f32 {
    if v.is_finite() { v.max(min) } else { min }
}

/// Euclidean wrap of `value` into the half-open interval `[min, max)`.
///
/// Negative operands wrap the same way as positive ones, unlike `%`.
/// A degenerate interval (`max <= min`, or non-finite bounds) returns `min`.
#[must_use]
pub fn wrap(value: f32, min: f32, max: f32) -> f32 {
    let range = max - min;
    if !(range > 0.0) || !range.is_finite() || !value.is_finite() {
        return if min.is_finite() { min } else { 0.0 };
    }
    let out = min + (value - min).rem_euclid(range);
    // rem_euclid can round up to exactly `range` for tiny negative inputs.
    if out >= max { min } else { out }
}

/// Wrap both axes of `v` into `[-half, half)`.
#[must_use]
pub fn wrap_vec(v: Vec2, half: Vec2) -> Vec2 {
    Vec2::new(wrap(v.x, -half.x, half.x), wrap(v.y, -half.y, half.y))
}
