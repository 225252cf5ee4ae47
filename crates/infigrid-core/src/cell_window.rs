#![forbid(unsafe_code)]

//! Sparse visibility window over the tile lattice.
//!
//! Every tile of the 2×2 field sits on a global lattice cell `(col, row)`
//! with `col ∈ [-C, C)` and `row ∈ [-R, R)`; row indices grow downward like
//! on screen. [`CellWindow`] keeps the set of cells that intersect the
//! viewport, widened by a margin. It recomputes that set only when the
//! displayed offset has moved past a distance threshold or a time interval
//! has elapsed (hysteresis). The margin is at least the distance threshold,
//! so a stale window never exposes a missing tile.

use std::collections::BTreeSet;
use std::time::Duration;

use crate::geometry::{GridLayout, Vec2, WorldRect};

/// A lattice cell of the tile field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellId {
    pub col: i32,
    pub row: i32,
}

impl CellId {
    #[must_use]
    pub const fn new(col: i32, row: i32) -> Self {
        Self { col, row }
    }

    /// Cell of item `index` in block copy `duplicate`.
    #[must_use]
    pub fn of_tile(layout: &GridLayout, duplicate: u8, index: u32) -> Self {
        let (c, r) = layout.cell_of(index);
        let cols = layout.columns as i32;
        let rows = layout.rows as i32;
        Self {
            col: i32::from(duplicate % 2) * cols + c as i32 - cols,
            row: i32::from(duplicate / 2) * rows + r as i32 - rows,
        }
    }

    /// Item shown at this cell when the block repeats without bound, or
    /// `None` for the empty slots of a partial last row.
    #[must_use]
    pub fn item_index(&self, layout: &GridLayout) -> Option<u32> {
        if layout.rows == 0 {
            return None;
        }
        let c = self.col.rem_euclid(layout.columns as i32) as u32;
        let r = self.row.rem_euclid(layout.rows as i32) as u32;
        let idx = r * layout.columns + c;
        (idx < layout.item_count).then_some(idx)
    }

    /// Centre of this cell in tile-set-local coordinates.
    #[must_use]
    pub fn center(&self, layout: &GridLayout) -> Vec2 {
        let cols = layout.columns as i32;
        let rows = (layout.rows as i32).max(1);
        let block_x = self.col.div_euclid(cols);
        let block_y = self.row.div_euclid(rows);
        let c = self.col.rem_euclid(cols) as f32;
        let r = self.row.rem_euclid(rows) as f32;
        let x = block_x as f32 * layout.block_width
            + layout.padding
            + c * (layout.item_width + layout.gap)
            + layout.item_width / 2.0;
        let y = -(block_y as f32) * layout.block_height
            - (layout.padding + r * (layout.item_height + layout.gap) + layout.item_height / 2.0);
        Vec2::new(x, y)
    }

    #[must_use]
    pub fn rect(&self, layout: &GridLayout) -> WorldRect {
        WorldRect::from_center(self.center(layout), layout.item_size())
    }

    #[must_use]
    pub fn in_field(&self, layout: &GridLayout) -> bool {
        let cols = layout.columns as i32;
        let rows = layout.rows as i32;
        (-cols..cols).contains(&self.col) && (-rows..rows).contains(&self.row)
    }
}

/// Cells of the 2×2 field whose item rectangle intersects `rect`
/// (tile-set-local coordinates).
#[must_use]
pub fn cells_in_rect(layout: &GridLayout, rect: &WorldRect) -> Vec<CellId> {
    if layout.rows == 0 {
        return Vec::new();
    }
    let field = layout.field_rect();
    let Some(r) = rect.intersection(&field) else {
        return Vec::new();
    };
    let col_pitch = layout.item_width + layout.gap;
    let row_pitch = layout.item_height + layout.gap;
    let col_at = |x: f32| {
        lattice_index(x, layout.block_width, layout.padding, col_pitch, layout.columns)
    };
    // Rows are measured downward.
    let row_at = |y: f32| {
        lattice_index(-y, layout.block_height, layout.padding, row_pitch, layout.rows)
    };
    let (col_lo, col_hi) = (col_at(r.left), col_at(r.right));
    let (row_lo, row_hi) = (row_at(r.top), row_at(r.bottom));

    let mut out = Vec::new();
    for row in row_lo..=row_hi {
        for col in col_lo..=col_hi {
            let cell = CellId::new(col, row);
            if cell.in_field(layout)
                && cell.item_index(layout).is_some()
                && cell.rect(layout).intersection(rect).is_some()
            {
                out.push(cell);
            }
        }
    }
    out
}

// Global lattice index of coordinate `v` along one axis (clamped inside its block).
fn lattice_index(v: f32, block: f32, padding: f32, pitch: f32, count: u32) -> i32 {
    let count = count.max(1) as i32;
    if !(block > 0.0) {
        return 0;
    }
    let b = (v / block).floor();
    let within = v - b * block;
    let local = ((within - padding) / pitch).floor().clamp(0.0, (count - 1) as f32) as i32;
    b as i32 * count + local
}

/// Hysteresis tuning.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowConfig {
    /// Re-evaluate after the offset moved this far (px).
    pub distance_threshold: f32,
    /// Re-evaluate at least this often while ticking.
    pub interval: Duration,
    /// Extra margin around the viewport, in cells.
    pub buffer_cells: f32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            distance_threshold: 100.0,
            interval: Duration::from_millis(120),
            buffer_cells: 1.0,
        }
    }
}

/// Change to the visible set.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WindowDelta {
    pub added: Vec<CellId>,
    pub removed: Vec<CellId>,
}

impl WindowDelta {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// The currently visible set of lattice cells.
#[derive(Debug, Clone, Default)]
pub struct CellWindow {
    config: WindowConfig,
    visible: BTreeSet<CellId>,
    last_offset: Option<Vec2>,
    last_eval_at: Option<Duration>,
    dirty: bool,
}

impl CellWindow {
    #[must_use]
    pub fn new(config: WindowConfig) -> Self {
        Self {
            config,
            visible: BTreeSet::new(),
            last_offset: None,
            last_eval_at: None,
            dirty: true,
        }
    }

    /// Force re-evaluation on the next update (resize, rebuild).
    pub fn invalidate(&mut self) {
        self.dirty = true;
    }

    /// Whether [`update`](Self::update) at `offset` and `now` would recompute.
    #[must_use]
    pub fn needs_update(&self, offset: Vec2, now: Duration) -> bool {
        if self.dirty {
            return true;
        }
        let moved = self
            .last_offset
            .is_none_or(|last| (offset - last).length() > self.config.distance_threshold);
        let stale = self
            .last_eval_at
            .is_none_or(|at| now.saturating_sub(at) >= self.config.interval);
        moved || stale
    }

    /// Recompute the visible set for a viewport `view` (world space, centred
    /// on the origin) and displayed pan `offset`, if hysteresis allows.
    pub fn update(
        &mut self,
        layout: &GridLayout,
        view: &WorldRect,
        offset: Vec2,
        now: Duration,
    ) -> Option<WindowDelta> {
        if !self.needs_update(offset, now) {
            return None;
        }
        let pitch = (layout.item_width + layout.gap).max(layout.item_height + layout.gap);
        let margin = self.config.distance_threshold + self.config.buffer_cells * pitch;
        let local = view.translate(-offset).inflate(margin);
        let next: BTreeSet<CellId> = cells_in_rect(layout, &local).into_iter().collect();

        let delta = WindowDelta {
            added: next.difference(&self.visible).copied().collect(),
            removed: self.visible.difference(&next).copied().collect(),
        };
        self.visible = next;
        self.last_offset = Some(offset);
        self.last_eval_at = Some(now);
        self.dirty = false;
        Some(delta)
    }

    pub fn visible(&self) -> impl Iterator<Item = CellId> + '_ {
        self.visible.iter().copied()
    }

    #[must_use]
    pub fn contains(&self, cell: CellId) -> bool {
        self.visible.contains(&cell)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.visible.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.visible.is_empty()
    }
}
