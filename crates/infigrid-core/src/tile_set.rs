#![forbid(unsafe_code)]

//! The live tiles: four duplicates of every item, placed once per build.
//!
//! A [`TileSet`] is rebuilt, never re-laid-out: positions are a pure function
//! of item index, duplicate index and [`GridLayout`]. Panning moves the world
//! transform, not the tiles.
//!
//! Content arrives through the [`ResourceCache`]. Each tile's content moves
//! `Pending → Ready` or `Pending → Failed` exactly once. A [`SettleGate`]
//! counts those transitions and fires once when the last tile settles, which
//! starts the load-in animation.

use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use crate::animation::{Animation, Easing, Tween, stagger_delay};
use crate::cell_window::CellId;
use crate::config::TileStyle;
use crate::geometry::{DUPLICATE_COUNT, GridLayout, Vec2, WorldRect};
use crate::item::{GridItem, ItemId};
use crate::resource_cache::{CachedResource, LoadOutcome, LoadTicket, ResourceCache, Settled};

/// Identity of a tile within one build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileId {
    pub duplicate: u8,
    pub item: ItemId,
}

/// Who is waiting on a cache entry: a tile of a particular build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileWaiter {
    pub epoch: u64,
    pub tile: TileId,
}

/// Content of a tile.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentState<H> {
    Pending,
    Ready(H),
    Failed,
}

impl<H> ContentState<H> {
    #[must_use]
    pub fn is_settled(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    #[must_use]
    pub fn handle(&self) -> Option<&H> {
        match self {
            Self::Ready(h) => Some(h),
            _ => None,
        }
    }
}

/// Animated per-tile uniforms.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VisualState {
    pub alpha: f32,
    pub grayscale: f32,
    pub overlay_opacity: f32,
    pub scale: f32,
}

impl VisualState {
    #[must_use]
    pub fn resting(style: &TileStyle) -> Self {
        Self {
            alpha: 0.0,
            grayscale: style.resting_grayscale,
            overlay_opacity: style.resting_overlay,
            scale: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Tweens {
    alpha: Tween,
    grayscale: Tween,
    overlay: Tween,
    scale: Tween,
}

impl Tweens {
    fn from_state(v: VisualState) -> Self {
        Self {
            alpha: Tween::rest(v.alpha),
            grayscale: Tween::rest(v.grayscale),
            overlay: Tween::rest(v.overlay_opacity),
            scale: Tween::rest(v.scale),
        }
    }

    fn tick(&mut self, dt: Duration) -> VisualState {
        for t in [
            &mut self.alpha,
            &mut self.grayscale,
            &mut self.overlay,
            &mut self.scale,
        ] {
            t.tick(dt);
        }
        VisualState {
            alpha: self.alpha.value(),
            grayscale: self.grayscale.value(),
            overlay_opacity: self.overlay.value(),
            scale: self.scale.value(),
        }
    }
}

/// One visual instance of an item.
#[derive(Debug, Clone)]
pub struct Tile<H> {
    pub id: TileId,
    pub cell: CellId,
    pub position: Vec2,
    pub size: Vec2,
    pub visual: VisualState,
    pub content: ContentState<H>,
    tweens: Tweens,
}

impl<H> Tile<H> {
    /// Unscaled bounds in tile-set-local coordinates.
    #[must_use]
    pub fn rect(&self) -> WorldRect {
        WorldRect::from_center(self.position, self.size)
    }
}

/// Counts terminal transitions and fires exactly once when all have landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettleGate {
    expected: usize,
    settled: usize,
    fired: bool,
}

impl SettleGate {
    #[must_use]
    pub fn new(expected: usize) -> Self {
        Self {
            expected,
            settled: 0,
            fired: false,
        }
    }

    /// Count one settled tile. Returns `true` on the call that completes the gate.
    pub fn record(&mut self) -> bool {
        self.settled = (self.settled + 1).min(self.expected);
        self.try_fire()
    }

    /// Fire if complete and not yet fired. Covers the zero-tile case.
    pub fn try_fire(&mut self) -> bool {
        if !self.fired && self.settled >= self.expected {
            self.fired = true;
            true
        } else {
            false
        }
    }

    #[must_use]
    pub fn settled(&self) -> usize {
        self.settled
    }

    #[must_use]
    pub fn expected(&self) -> usize {
        self.expected
    }

    #[must_use]
    pub fn has_fired(&self) -> bool {
        self.fired
    }
}

/// What a build asks of the host.
#[derive(Debug, Default)]
pub struct BuildOutput {
    /// Fetches the host must start.
    pub tickets: Vec<LoadTicket>,
    /// Every tile was satisfied from cache (or there are none).
    pub all_settled: bool,
}

/// Outcome of applying one cache settlement.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SettleProgress {
    /// Tiles that moved out of `Pending`.
    pub applied: usize,
    /// This settlement completed the gate.
    pub all_settled: bool,
}

/// Exclusive owner of all tiles for one build.
#[derive(Debug)]
pub struct TileSet<H> {
    epoch: u64,
    layout: GridLayout,
    style: TileStyle,
    items: Rc<[GridItem]>,
    tiles: Vec<Tile<H>>,
    by_id: HashMap<TileId, usize>,
    by_cell: HashMap<CellId, usize>,
    gate: SettleGate,
    hovered: Option<TileId>,
    loaded_in: bool,
}

impl<H: CachedResource> TileSet<H> {
    /// Create `4 × items.len()` tiles and request their images.
    ///
    /// Tiles are created immediately in the `Pending` state; the returned
    /// tickets are fetches the host must start.
    pub fn build(
        epoch: u64,
        items: Rc<[GridItem]>,
        layout: GridLayout,
        style: TileStyle,
        cache: &mut ResourceCache<H, TileWaiter>,
    ) -> (Self, BuildOutput) {
        let count = items.len();
        let mut tiles = Vec::with_capacity(count * usize::from(DUPLICATE_COUNT));
        let mut by_id = HashMap::with_capacity(tiles.capacity());
        let mut by_cell = HashMap::with_capacity(tiles.capacity());
        let resting = VisualState::resting(&style);

        for duplicate in 0..DUPLICATE_COUNT {
            let offset = layout.duplicate_offset(duplicate);
            for index in 0..count {
                let item = ItemId(index as u32);
                let id = TileId { duplicate, item };
                let cell = CellId::of_tile(&layout, duplicate, item.0);
                by_id.insert(id, tiles.len());
                by_cell.insert(cell, tiles.len());
                tiles.push(Tile {
                    id,
                    cell,
                    position: layout.position_of(item.0, offset),
                    size: layout.item_size(),
                    visual: resting,
                    content: ContentState::Pending,
                    tweens: Tweens::from_state(resting),
                });
            }
        }

        let mut set = Self {
            epoch,
            layout,
            style,
            items,
            gate: SettleGate::new(tiles.len()),
            tiles,
            by_id,
            by_cell,
            hovered: None,
            loaded_in: false,
        };

        let mut out = BuildOutput::default();
        for i in 0..set.tiles.len() {
            let tile = &set.tiles[i];
            let waiter = TileWaiter {
                epoch,
                tile: tile.id,
            };
            let key = set.items[tile.id.item.0 as usize].image.src();
            match cache.load(key, waiter) {
                LoadOutcome::Ready(handle) => {
                    set.tiles[i].content = ContentState::Ready(handle);
                    if set.gate.record() {
                        out.all_settled = true;
                    }
                }
                LoadOutcome::Joined => {}
                LoadOutcome::Started(ticket) => out.tickets.push(ticket),
            }
        }
        if set.gate.try_fire() {
            out.all_settled = true;
        }

        crate::info!(
            epoch,
            items = count,
            tiles = set.tiles.len(),
            fetches = out.tickets.len(),
            "tile set built"
        );
        (set, out)
    }
}

impl<H: Clone> TileSet<H> {
    /// Apply a cache settlement to the tiles of this build that waited on it.
    ///
    /// Waiters from other builds are ignored, as are tiles already settled.
    pub fn apply_settled(&mut self, settled: &Settled<H, TileWaiter>) -> SettleProgress {
        let mut progress = SettleProgress::default();
        for waiter in &settled.waiters {
            if waiter.epoch != self.epoch {
                continue;
            }
            let Some(&idx) = self.by_id.get(&waiter.tile) else {
                continue;
            };
            let tile = &mut self.tiles[idx];
            if tile.content.is_settled() {
                continue;
            }
            tile.content = match &settled.result {
                Ok(h) => ContentState::Ready(h.clone()),
                Err(_) => ContentState::Failed,
            };
            progress.applied += 1;
            if self.gate.record() {
                progress.all_settled = true;
            }
        }
        if progress.all_settled {
            crate::info!(epoch = self.epoch, tiles = self.tiles.len(), "all tiles settled");
        }
        progress
    }
}

impl<H> TileSet<H> {
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    #[must_use]
    pub fn layout(&self) -> &GridLayout {
        &self.layout
    }

    #[must_use]
    pub fn tiles(&self) -> &[Tile<H>] {
        &self.tiles
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    #[must_use]
    pub fn get(&self, id: TileId) -> Option<&Tile<H>> {
        self.by_id.get(&id).map(|&i| &self.tiles[i])
    }

    #[must_use]
    pub fn tile_at_cell(&self, cell: CellId) -> Option<&Tile<H>> {
        self.by_cell.get(&cell).map(|&i| &self.tiles[i])
    }

    #[must_use]
    pub fn item(&self, id: ItemId) -> Option<&GridItem> {
        self.items.get(id.0 as usize)
    }

    #[must_use]
    pub fn items(&self) -> &Rc<[GridItem]> {
        &self.items
    }

    #[must_use]
    pub fn gate(&self) -> &SettleGate {
        &self.gate
    }

    #[must_use]
    pub fn hovered(&self) -> Option<TileId> {
        self.hovered
    }

    /// The frontmost tile containing `world_point`, given the displayed pan
    /// offset of the tile field.
    #[must_use]
    pub fn hit_test(&self, world_point: Vec2, pan_offset: Vec2) -> Option<&Tile<H>> {
        let local = world_point - pan_offset;
        self.tiles.iter().rev().find(|t| t.rect().contains(local))
    }

    /// Move hover highlighting to `target`. Returns whether it changed.
    pub fn set_hovered(&mut self, target: Option<TileId>) -> bool {
        if self.hovered == target {
            return false;
        }
        let style = self.style;
        if let Some(prev) = self.hovered.take()
            && let Some(&i) = self.by_id.get(&prev)
        {
            let t = &mut self.tiles[i].tweens;
            let (c, z) = (style.hover_color, style.hover_zoom);
            t.grayscale
                .retarget(style.resting_grayscale, c.duration(), c.easing);
            t.overlay.retarget(style.resting_overlay, c.duration(), c.easing);
            t.scale.retarget(1.0, z.duration(), z.easing);
        }
        if let Some(next) = target
            && let Some(&i) = self.by_id.get(&next)
        {
            let t = &mut self.tiles[i].tweens;
            let (c, z) = (style.hover_color, style.hover_zoom);
            t.grayscale.retarget(0.0, c.duration(), c.easing);
            t.overlay.retarget(0.0, c.duration(), c.easing);
            t.scale.retarget(style.hover_scale, z.duration(), z.easing);
            self.hovered = Some(next);
        }
        true
    }

    /// Start the staggered fade-in. Runs once per build.
    pub fn begin_load_in(&mut self, fade: Duration, stagger: Duration) {
        if self.loaded_in {
            return;
        }
        self.loaded_in = true;
        let count = self.tiles.len() as u32;
        for (i, tile) in self.tiles.iter_mut().enumerate() {
            let delay = stagger_delay(i as u32, count, stagger);
            tile.tweens
                .alpha
                .retarget_delayed(1.0, fade, Easing::QuadInOut, delay);
        }
    }

    #[must_use]
    pub fn is_loaded_in(&self) -> bool {
        self.loaded_in
    }

    /// Advance every tile's visual tweens.
    pub fn tick(&mut self, dt: Duration) {
        for tile in &mut self.tiles {
            tile.visual = tile.tweens.tick(dt);
        }
    }

    /// Release every tile. Consumes the set, so tiles cannot be released twice.
    ///
    /// Content handles are clones of cache-owned resources; dropping them
    /// here never frees the shared content.
    pub fn dispose(self) -> usize {
        let n = self.tiles.len();
        crate::debug!(epoch = self.epoch, tiles = n, "tile set disposed");
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LayoutConfig;
    use crate::item::ImageSource;
    use crate::resource_cache::LoadError;

    #[derive(Debug, Clone, PartialEq)]
    struct H(u32);

    impl CachedResource for H {
        fn configure_sampling(&mut self, _: crate::resource_cache::SamplingPolicy) {}
    }

    fn items(n: usize) -> Rc<[GridItem]> {
        (0..n)
            .map(|i| GridItem {
                title: format!("item {i}"),
                href: format!("/item/{i}"),
                image: ImageSource::Url(format!("/img/{i}.jpg")),
                tags: vec![],
            })
            .collect()
    }

    fn layout(n: usize) -> GridLayout {
        GridLayout::compute(
            n,
            &LayoutConfig {
                item_width: 100.0,
                item_height: 75.0,
                columns: 4,
                gap: 10.0,
                padding: 5.0,
            },
        )
    }

    fn build(n: usize) -> (TileSet<H>, BuildOutput, ResourceCache<H, TileWaiter>) {
        let mut cache = ResourceCache::default();
        let (set, out) = TileSet::build(1, items(n), layout(n), TileStyle::default(), &mut cache);
        (set, out, cache)
    }

    #[test]
    fn builds_four_duplicates_per_item() {
        let (set, out, cache) = build(6);
        assert_eq!(set.len(), 24);
        assert_eq!(out.tickets.len(), 6);
        assert!(!out.all_settled);
        assert_eq!(cache.stats().joins, 18);
        assert!(set.tiles().iter().all(|t| t.content == ContentState::Pending));
        assert!(set.tiles().iter().all(|t| t.visual.alpha == 0.0));
    }

    #[test]
    fn empty_item_list_settles_immediately() {
        let (set, out, _) = build(0);
        assert!(set.is_empty());
        assert!(out.all_settled);
        assert!(set.gate().has_fired());
    }

    #[test]
    fn settlement_reaches_all_duplicates() {
        let (mut set, out, mut cache) = build(2);
        let mut fired = 0;
        for (i, ticket) in out.tickets.into_iter().enumerate() {
            let result = if i == 0 {
                Ok(H(0))
            } else {
                Err(LoadError::Decode("x".into()))
            };
            let settled = cache.complete(ticket, result).expect("settled");
            let p = set.apply_settled(&settled);
            assert_eq!(p.applied, 4);
            fired += usize::from(p.all_settled);
        }
        assert_eq!(fired, 1);
        let ready = set.tiles().iter().filter(|t| t.content.handle().is_some()).count();
        let failed = set
            .tiles()
            .iter()
            .filter(|t| t.content == ContentState::Failed)
            .count();
        assert_eq!((ready, failed), (4, 4));
    }

    #[test]
    fn stale_epoch_waiters_are_ignored() {
        let mut cache = ResourceCache::default();
        let (_old, out) = TileSet::build(1, items(1), layout(1), TileStyle::default(), &mut cache);
        let (mut new, out2) =
            TileSet::<H>::build(2, items(1), layout(1), TileStyle::default(), &mut cache);
        assert!(out2.tickets.is_empty());
        let ticket = out.tickets.into_iter().next().expect("ticket");
        let settled = cache.complete(ticket, Ok(H(5))).expect("settled");
        let p = new.apply_settled(&settled);
        assert_eq!(p.applied, 4);
        assert!(p.all_settled);
    }

    #[test]
    fn cached_content_is_ready_on_rebuild() {
        let (set, out, mut cache) = build(1);
        let ticket = out.tickets.into_iter().next().expect("ticket");
        cache.complete(ticket, Ok(H(1)));
        set.dispose();
        let (set2, out2) =
            TileSet::build(2, items(1), layout(1), TileStyle::default(), &mut cache);
        assert!(out2.tickets.is_empty());
        assert!(out2.all_settled);
        assert!(set2.tiles().iter().all(|t| t.content == ContentState::Ready(H(1))));
    }

    #[test]
    fn hit_test_accounts_for_pan_offset() {
        let (set, _, _) = build(20);
        // item 0 of duplicate 3 is centred at (55, -42.5)
        let hit = set.hit_test(Vec2::new(55.0, -42.5), Vec2::ZERO).expect("hit");
        assert_eq!(hit.id, TileId { duplicate: 3, item: ItemId(0) });

        let pan = Vec2::new(110.0, 0.0);
        let hit = set.hit_test(Vec2::new(165.0, -42.5), pan).expect("hit");
        assert_eq!(hit.id.item, ItemId(0));

        // the gap between columns
        assert!(set.hit_test(Vec2::new(107.0, -42.5), Vec2::ZERO).is_none());
    }

    #[test]
    fn hover_animates_and_reverts() {
        let (mut set, _, _) = build(2);
        let id = TileId { duplicate: 3, item: ItemId(1) };
        assert!(set.set_hovered(Some(id)));
        assert!(!set.set_hovered(Some(id)));
        set.tick(Duration::from_secs(1));
        let v = set.get(id).expect("tile").visual;
        assert_eq!(v.grayscale, 0.0);
        assert_eq!(v.overlay_opacity, 0.0);
        assert!((v.scale - 1.05).abs() < 1e-6);

        set.set_hovered(None);
        set.tick(Duration::from_secs(1));
        let v = set.get(id).expect("tile").visual;
        assert_eq!(v.grayscale, 1.0);
        assert!((v.overlay_opacity - 0.2).abs() < 1e-6);
        assert_eq!(v.scale, 1.0);
    }

    #[test]
    fn load_in_fades_every_tile_once() {
        let (mut set, _, _) = build(3);
        set.begin_load_in(Duration::from_millis(500), Duration::from_millis(600));
        assert!(set.is_loaded_in());
        set.tick(Duration::from_millis(1200));
        assert!(set.tiles().iter().all(|t| t.visual.alpha == 1.0));
    }

    #[test]
    fn settle_gate_fires_once() {
        let mut g = SettleGate::new(2);
        assert!(!g.record());
        assert!(g.record());
        assert!(!g.record());
        assert!(!g.try_fire());
        assert_eq!(g.settled(), 2);
    }
}
