#![forbid(unsafe_code)]

//! The grid engine: one owner for layout, tiles, cache, pan and gestures.
//!
//! [`GridEngine`] is a plain state machine. The host feeds it input and load
//! completions, advances it once per frame, and drains [`EngineEffect`]s
//! (fetches to start, navigations, cursor and link-suppression changes).
//! It never reads a clock and never performs I/O.
//!
//! # Lifecycle
//!
//! ```text
//! new ──► (handle_input | complete_load | resize | set_items | advance)* ──► teardown
//! ```
//!
//! After [`teardown`](GridEngine::teardown) every entry point is a no-op and
//! late load completions are discarded.

use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use crate::camera::Viewport;
use crate::cell_window::{CellWindow, WindowConfig};
use crate::config::{Breakpoint, GridConfig, Profile};
use crate::distortion::DistortionDriver;
use crate::geometry::{GridLayout, Vec2};
use crate::gesture::{GestureConfig, GestureController, GestureInput, GestureSignal, HitTest, PanSource};
use crate::item::GridItem;
use crate::pan::PanState;
use crate::post_effect::PostParams;
use crate::render_loop::{FrameParams, TileDraw};
use crate::resource_cache::{CacheStats, CachedResource, LoadError, LoadTicket, ResourceCache};
use crate::tile_set::{BuildOutput, TileId, TileSet, TileWaiter};

/// Pointer cursor the host should show over the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CursorStyle {
    Grab,
    Grabbing,
    Pointer,
}

impl CursorStyle {
    /// CSS `cursor` value.
    #[must_use]
    pub const fn css(self) -> &'static str {
        match self {
            Self::Grab => "grab",
            Self::Grabbing => "grabbing",
            Self::Pointer => "pointer",
        }
    }
}

/// Work the engine asks the host to do.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEffect {
    /// Fetch and decode `ticket.key()`, then call
    /// [`GridEngine::complete_load`] with the ticket.
    FetchResource(LoadTicket),
    /// A tile was tapped: follow its link.
    Navigate(String),
    /// Disable (`true`) or restore (`false`) native link interaction.
    SetLinkSuppression(bool),
    SetCursor(CursorStyle),
    /// Every tile of the current build has settled; load-in has started.
    AllSettled,
}

/// Screen-space hit testing against the displayed tile field.
struct FieldHit<'a, H> {
    tiles: Option<&'a TileSet<H>>,
    viewport: &'a Viewport,
    offset: Vec2,
}

impl<H> HitTest for FieldHit<'_, H> {
    fn tile_at(&self, screen: Vec2) -> Option<TileId> {
        let world = self.viewport.screen_to_world(screen);
        self.tiles?.hit_test(world, self.offset).map(|t| t.id)
    }
}

/// Infinite wrap-around grid state.
#[derive(Debug)]
pub struct GridEngine<H> {
    config: GridConfig,
    breakpoint: Breakpoint,
    viewport: Viewport,
    layout: GridLayout,
    items: Rc<[GridItem]>,
    cache: ResourceCache<H, TileWaiter>,
    tiles: Option<TileSet<H>>,
    epoch: u64,
    pan: PanState,
    gesture: GestureController,
    distortion: DistortionDriver,
    window: CellWindow,
    effects: VecDeque<EngineEffect>,
    clock: Option<Duration>,
    elapsed: Duration,
    resize_pending: bool,
    torn_down: bool,
}

impl<H: CachedResource> GridEngine<H> {
    /// Build the engine for a `width × height` CSS-px canvas.
    ///
    /// The first tile set is built immediately; its fetches are queued as
    /// [`EngineEffect::FetchResource`].
    #[must_use]
    pub fn new(
        config: GridConfig,
        items: Vec<GridItem>,
        width: f32,
        height: f32,
        device_pixel_ratio: f32,
    ) -> Self {
        let config = config.sanitized();
        let viewport = Viewport::new(width, height, device_pixel_ratio, config.max_pixel_ratio);
        let (breakpoint, profile) = config.profile_for(viewport.width());
        let profile = *profile;
        let items: Rc<[GridItem]> = items.into();
        let layout = GridLayout::compute(items.len(), &profile.layout);

        let mut engine = Self {
            breakpoint,
            viewport,
            layout,
            items,
            cache: ResourceCache::default(),
            tiles: None,
            epoch: 0,
            pan: PanState::new(&layout, profile.motion.pan_smoothing),
            gesture: GestureController::new(GestureConfig::from_profile(&profile)),
            distortion: DistortionDriver::new(profile.distortion),
            window: CellWindow::new(WindowConfig::default()),
            effects: VecDeque::new(),
            clock: None,
            elapsed: Duration::ZERO,
            resize_pending: true,
            torn_down: false,
            config,
        };
        crate::info!(
            ?breakpoint,
            width = engine.viewport.width(),
            height = engine.viewport.height(),
            items = engine.items.len(),
            "grid engine created"
        );
        engine.effects.push_back(EngineEffect::SetCursor(CursorStyle::Grab));
        engine.rebuild();
        engine.center_initial();
        engine
    }

    /// Replace the item list and rebuild the tile set.
    pub fn set_items(&mut self, items: Vec<GridItem>) {
        if self.torn_down {
            return;
        }
        self.items = items.into();
        self.layout = GridLayout::compute(self.items.len(), &self.profile().layout);
        let smoothing = self.profile().motion.pan_smoothing;
        self.pan.set_layout(&self.layout, smoothing);
        self.rebuild();
    }

    /// Apply a new canvas size and device pixel ratio.
    ///
    /// Crossing the breakpoint swaps the profile and rebuilds the tiles.
    /// Returns whether a rebuild happened.
    pub fn resize(&mut self, width: f32, height: f32, device_pixel_ratio: f32) -> bool {
        if self.torn_down {
            return false;
        }
        let change = self.viewport.resize(width, height, device_pixel_ratio);
        if change.any() {
            self.resize_pending = true;
            self.window.invalidate();
        }

        let breakpoint = self.config.breakpoint_for(self.viewport.width());
        if breakpoint == self.breakpoint {
            self.check_coverage();
            return false;
        }
        crate::info!(from = ?self.breakpoint, to = ?breakpoint, "breakpoint changed");
        self.breakpoint = breakpoint;
        let profile = *self.profile();
        self.gesture.set_config(GestureConfig::from_profile(&profile));
        self.distortion.set_config(profile.distortion);
        self.layout = GridLayout::compute(self.items.len(), &profile.layout);
        self.pan.set_layout(&self.layout, profile.motion.pan_smoothing);
        self.rebuild();
        true
    }

    /// Feed one normalized input event.
    pub fn handle_input(&mut self, input: GestureInput) {
        if self.torn_down {
            return;
        }
        let hit = FieldHit {
            tiles: self.tiles.as_ref(),
            viewport: &self.viewport,
            offset: self.pan.wrapped(),
        };
        let signals = self.gesture.handle(input, &hit);
        let at = input.at();
        for signal in signals {
            self.apply_signal(signal, at);
        }
    }

    /// Report the outcome of a fetch started from an
    /// [`EngineEffect::FetchResource`].
    ///
    /// Stale tickets (issued before a teardown) are dropped silently.
    pub fn complete_load(&mut self, ticket: LoadTicket, result: Result<H, LoadError>) {
        if self.torn_down {
            crate::debug!(key = ticket.key(), "load completed after teardown; dropped");
            return;
        }
        let Some(settled) = self.cache.complete(ticket, result) else {
            return;
        };
        let Some(tiles) = self.tiles.as_mut() else {
            return;
        };
        if tiles.apply_settled(&settled).all_settled {
            self.start_load_in();
        }
    }

    fn rebuild(&mut self) {
        self.epoch += 1;
        if let Some(old) = self.tiles.take() {
            old.dispose();
        }
        let style = self.config.tile_style;
        let (tiles, BuildOutput { tickets, all_settled }) = TileSet::build(
            self.epoch,
            Rc::clone(&self.items),
            self.layout,
            style,
            &mut self.cache,
        );
        self.tiles = Some(tiles);
        self.window.invalidate();
        self.effects
            .extend(tickets.into_iter().map(EngineEffect::FetchResource));
        self.check_coverage();
        if all_settled {
            self.start_load_in();
        }
    }
}

impl<H: CachedResource> GridEngine<H> {
    fn profile(&self) -> &Profile {
        self.config.profile(self.breakpoint)
    }

    fn check_coverage(&self) {
        if !self.items.is_empty() && !self.layout.covers_viewport(self.viewport.size()) {
            crate::warn!(
                block_width = self.layout.block_width,
                block_height = self.layout.block_height,
                viewport_width = self.viewport.width(),
                viewport_height = self.viewport.height(),
                "content block smaller than viewport; wrap seams may be visible"
            );
        }
    }

    fn center_initial(&mut self) {
        if !self.profile().motion.center_first_item || self.items.is_empty() {
            return;
        }
        let origin = self.layout.duplicate_offset(3);
        let first = self.layout.position_of(0, origin);
        self.pan.jump_to(-first);
    }

    fn start_load_in(&mut self) {
        let motion = self.profile().motion;
        if let Some(tiles) = self.tiles.as_mut() {
            tiles.begin_load_in(motion.load_in(), motion.load_in_stagger());
        }
        self.distortion.load_in(motion.load_in());
        self.effects.push_back(EngineEffect::AllSettled);
    }

    fn apply_signal(&mut self, signal: GestureSignal, at: Duration) {
        match signal {
            GestureSignal::Pressed => {
                self.distortion.press();
                self.effects
                    .push_back(EngineEffect::SetCursor(CursorStyle::Grabbing));
            }
            GestureSignal::PanDelta { dx, dy, .. } => self.pan.apply_delta(dx, dy),
            GestureSignal::Velocity {
                vx,
                vy,
                source: PanSource::Wheel,
            } => self.distortion.wheel(Vec2::new(vx, vy), at),
            GestureSignal::Velocity { .. } => {}
            GestureSignal::DragStarted => {
                if let Some(tiles) = self.tiles.as_mut() {
                    tiles.set_hovered(None);
                }
            }
            GestureSignal::Released { velocity, dragged } => {
                self.distortion.release();
                let motion = self.profile().motion;
                if dragged && velocity.length() > motion.momentum_min_speed {
                    self.pan.add_momentum(velocity, motion.momentum_secs);
                }
                self.effects
                    .push_back(EngineEffect::SetCursor(CursorStyle::Grab));
            }
            GestureSignal::Tap { tile } => {
                let href = self
                    .tiles
                    .as_ref()
                    .and_then(|t| t.item(tile.item))
                    .map(|item| item.href.clone());
                if let Some(href) = href {
                    crate::debug!(item = tile.item.0, %href, "tile tapped");
                    self.effects.push_back(EngineEffect::Navigate(href));
                }
            }
            GestureSignal::LongPress { tile } => {
                crate::trace!(?tile, "long press; no navigation");
            }
            GestureSignal::LinkSuppression(on) => {
                self.effects.push_back(EngineEffect::SetLinkSuppression(on));
            }
            GestureSignal::Hover(target) => {
                if let Some(tiles) = self.tiles.as_mut() {
                    tiles.set_hovered(target);
                }
                let cursor = if target.is_some() {
                    CursorStyle::Pointer
                } else {
                    CursorStyle::Grab
                };
                self.effects.push_back(EngineEffect::SetCursor(cursor));
            }
        }
    }

    /// Advance animations to host time `now`.
    ///
    /// The first call only anchors the clock. Time going backwards counts
    /// as a zero step.
    pub fn advance(&mut self, now: Duration) {
        if self.torn_down {
            return;
        }
        let dt = self.clock.map_or(Duration::ZERO, |prev| now.saturating_sub(prev));
        self.clock = Some(now.max(self.clock.unwrap_or_default()));
        self.elapsed += dt;

        self.pan.integrate(dt);
        self.distortion.tick(now, dt);
        if let Some(tiles) = self.tiles.as_mut() {
            tiles.tick(dt);
        }
        let view = self.viewport.world_rect();
        if let Some(delta) = self
            .window
            .update(&self.layout, &view, self.pan.wrapped(), now)
            && !delta.is_empty()
        {
            crate::trace!(
                added = delta.added.len(),
                removed = delta.removed.len(),
                "visible cells changed"
            );
        }
    }

    /// Uniforms for the frame about to be drawn.
    #[must_use]
    pub fn frame(&self, index: u64) -> FrameParams {
        FrameParams {
            index,
            offset: self.pan.wrapped(),
            projection: self.viewport.projection(),
            viewport: self.viewport,
            post: PostParams::new(
                &self.config.post,
                self.distortion.current(),
                self.elapsed.as_secs_f32(),
            ),
            style: self.config.tile_style,
        }
    }

    /// Tiles in the visible window, back to front. The hovered tile is last
    /// so its enlarged quad overlaps its neighbours.
    #[must_use]
    pub fn draw_list(&self) -> Vec<TileDraw<'_, H>> {
        let Some(tiles) = self.tiles.as_ref() else {
            return Vec::new();
        };
        let hovered = tiles.hovered();
        let mut out = Vec::with_capacity(self.window.len());
        let mut front = None;
        for tile in self.window.visible().filter_map(|c| tiles.tile_at_cell(c)) {
            let Some(item) = tiles.item(tile.id.item) else {
                continue;
            };
            let draw = TileDraw {
                id: tile.id,
                center: tile.position,
                size: tile.size,
                visual: tile.visual,
                content: tile.content.handle(),
                item,
            };
            if Some(tile.id) == hovered {
                front = Some(draw);
            } else {
                out.push(draw);
            }
        }
        out.extend(front);
        out
    }

    /// Take every queued effect, oldest first.
    pub fn drain_effects(&mut self) -> Vec<EngineEffect> {
        self.effects.drain(..).collect()
    }

    /// Consume the backend resize flag.
    pub fn take_resize(&mut self) -> bool {
        std::mem::take(&mut self.resize_pending)
    }

    /// Release all tiles and cached content. Idempotent.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        let tiles = self.tiles.take().map_or(0, TileSet::dispose);
        let released = self.cache.clear();
        self.effects.clear();
        if self.gesture.is_pressed() {
            self.effects
                .push_back(EngineEffect::SetLinkSuppression(false));
        }
        crate::info!(tiles, released, "grid engine torn down");
    }

    #[must_use]
    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    #[must_use]
    pub fn config(&self) -> &GridConfig {
        &self.config
    }

    #[must_use]
    pub fn breakpoint(&self) -> Breakpoint {
        self.breakpoint
    }

    #[must_use]
    pub fn viewport(&self) -> &Viewport {
        &self.viewport
    }

    #[must_use]
    pub fn layout(&self) -> &GridLayout {
        &self.layout
    }

    #[must_use]
    pub fn items(&self) -> &[GridItem] {
        &self.items
    }

    #[must_use]
    pub fn tiles(&self) -> Option<&TileSet<H>> {
        self.tiles.as_ref()
    }

    /// Epoch of the live tile set; changes on every rebuild.
    #[must_use]
    pub fn tiles_epoch(&self) -> Option<u64> {
        self.tiles.as_ref().map(TileSet::epoch)
    }

    #[must_use]
    pub fn pan(&self) -> &PanState {
        &self.pan
    }

    #[must_use]
    pub fn distortion(&self) -> f32 {
        self.distortion.current()
    }

    #[must_use]
    pub fn gesture(&self) -> &GestureController {
        &self.gesture
    }

    #[must_use]
    pub fn visible_cells(&self) -> usize {
        self.window.len()
    }

    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Fetches still outstanding.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.cache.in_flight()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caption::CardCaption;
    use crate::gesture::PointerKind;
    use crate::item::ImageSource;
    use crate::resource_cache::SamplingPolicy;

    #[derive(Debug, Clone, PartialEq)]
    struct Img(String);

    impl CachedResource for Img {
        fn configure_sampling(&mut self, _: SamplingPolicy) {}
    }

    fn items(n: usize) -> Vec<GridItem> {
        (0..n)
            .map(|i| GridItem {
                title: format!("item {i}"),
                href: format!("/work/{i}"),
                image: ImageSource::Url(format!("/img/{i}.jpg")),
                tags: vec![],
            })
            .collect()
    }

    fn tickets(effects: &[EngineEffect]) -> Vec<LoadTicket> {
        effects
            .iter()
            .filter_map(|e| match e {
                EngineEffect::FetchResource(t) => Some(t.clone()),
                _ => None,
            })
            .collect()
    }

    fn settle_all(e: &mut GridEngine<Img>) -> Vec<EngineEffect> {
        let effects = e.drain_effects();
        for t in tickets(&effects) {
            let key = t.key().to_owned();
            e.complete_load(t, Ok(Img(key)));
        }
        e.drain_effects()
    }

    #[test]
    fn new_requests_each_image_once() {
        let mut e = GridEngine::<Img>::new(GridConfig::default(), items(12), 1440.0, 900.0, 2.0);
        let effects = e.drain_effects();
        assert_eq!(tickets(&effects).len(), 12);
        assert_eq!(e.tiles().map(TileSet::len), Some(48));
        assert_eq!(e.breakpoint(), Breakpoint::Wide);
        assert_eq!(effects[0], EngineEffect::SetCursor(CursorStyle::Grab));
    }

    #[test]
    fn all_settled_fires_once_and_starts_load_in() {
        let mut e = GridEngine::<Img>::new(GridConfig::default(), items(5), 1440.0, 900.0, 1.0);
        let after = settle_all(&mut e);
        let fired = after
            .iter()
            .filter(|x| **x == EngineEffect::AllSettled)
            .count();
        assert_eq!(fired, 1);
        assert!(e.tiles().is_some_and(TileSet::is_loaded_in));
    }

    #[test]
    fn failed_loads_still_settle() {
        let mut e = GridEngine::<Img>::new(GridConfig::default(), items(3), 1440.0, 900.0, 1.0);
        let effects = e.drain_effects();
        for t in tickets(&effects) {
            e.complete_load(t, Err(LoadError::Network("404".into())));
        }
        assert!(e.drain_effects().contains(&EngineEffect::AllSettled));
    }

    #[test]
    fn narrow_viewport_centres_first_item() {
        let e = GridEngine::<Img>::new(GridConfig::default(), items(8), 390.0, 844.0, 3.0);
        assert_eq!(e.breakpoint(), Breakpoint::Narrow);
        let layout = e.layout();
        let first = layout.position_of(0, layout.duplicate_offset(3));
        assert_eq!(e.pan().current(), -first);
        assert_eq!(e.viewport().pixel_ratio(), 2.0);
    }

    #[test]
    fn breakpoint_crossing_rebuilds() {
        let mut e = GridEngine::<Img>::new(GridConfig::default(), items(4), 1440.0, 900.0, 1.0);
        settle_all(&mut e);
        assert!(!e.resize(1200.0, 900.0, 1.0));
        assert!(e.resize(600.0, 900.0, 1.0));
        assert_eq!(e.breakpoint(), Breakpoint::Narrow);
        assert_eq!(e.tiles_epoch(), Some(2));
        // Content is cached: the rebuild settles without fetching.
        let effects = e.drain_effects();
        assert!(tickets(&effects).is_empty());
        assert!(effects.contains(&EngineEffect::AllSettled));
    }

    #[test]
    fn tap_navigates_and_toggles_link_suppression() {
        let mut e = GridEngine::<Img>::new(GridConfig::default(), items(20), 1440.0, 900.0, 1.0);
        e.drain_effects();
        // World (0,0) is the corner of duplicate 3; its first card is centred
        // half a card right and below the screen centre.
        let layout = *e.layout();
        let card = e
            .viewport()
            .world_to_screen(layout.position_of(0, layout.duplicate_offset(3)));
        let at = Duration::from_millis(10);
        e.handle_input(GestureInput::PointerDown {
            pos: card,
            kind: PointerKind::Mouse,
            has_target: true,
            at,
        });
        e.handle_input(GestureInput::PointerUp {
            pos: card,
            at: at + Duration::from_millis(80),
        });
        let effects = e.drain_effects();
        assert_eq!(
            effects,
            vec![
                EngineEffect::SetCursor(CursorStyle::Grabbing),
                EngineEffect::SetLinkSuppression(true),
                EngineEffect::SetCursor(CursorStyle::Grab),
                EngineEffect::Navigate("/work/0".into()),
                EngineEffect::SetLinkSuppression(false),
            ]
        );
    }

    #[test]
    fn drag_moves_pan_target_without_navigation() {
        let mut e = GridEngine::<Img>::new(GridConfig::default(), items(20), 1440.0, 900.0, 1.0);
        e.drain_effects();
        let ms = Duration::from_millis;
        e.handle_input(GestureInput::PointerDown {
            pos: Vec2::new(700.0, 450.0),
            kind: PointerKind::Mouse,
            has_target: true,
            at: ms(0),
        });
        e.handle_input(GestureInput::PointerMove {
            pos: Vec2::new(750.0, 450.0),
            at: ms(16),
        });
        e.handle_input(GestureInput::PointerUp {
            pos: Vec2::new(750.0, 450.0),
            at: ms(300),
        });
        assert_eq!(e.pan().target().x, 100.0);
        assert!(
            !e.drain_effects()
                .iter()
                .any(|x| matches!(x, EngineEffect::Navigate(_)))
        );
    }

    #[test]
    fn draw_list_covers_viewport_and_puts_hover_last() {
        let mut e = GridEngine::<Img>::new(GridConfig::default(), items(20), 1440.0, 900.0, 1.0);
        e.advance(Duration::ZERO);
        let draws = e.draw_list();
        assert!(!draws.is_empty());
        assert!(draws.len() <= 80);

        let last = draws.last().map(|d| d.id).expect("draw");
        let first = draws[0].id;
        e.handle_input(GestureInput::PointerMove {
            pos: e.viewport().world_to_screen(draws[0].center),
            at: Duration::from_millis(5),
        });
        let draws = e.draw_list();
        assert_eq!(draws.last().map(|d| d.id), Some(first));
        assert_ne!(first, last);
    }

    #[test]
    fn draws_carry_caption_source_before_images_load() {
        let mut e = GridEngine::<Img>::new(GridConfig::default(), items(6), 1440.0, 900.0, 1.0);
        e.advance(Duration::ZERO);
        let draws = e.draw_list();
        assert!(!draws.is_empty());
        for draw in &draws {
            assert!(draw.content.is_none());
            let caption = CardCaption::of(draw.item);
            assert_eq!(caption.title, format!("ITEM {}", draw.id.item.0));
            assert_eq!(draw.item.href, format!("/work/{}", draw.id.item.0));
        }
    }

    #[test]
    fn teardown_discards_late_completions() {
        let mut e = GridEngine::<Img>::new(GridConfig::default(), items(2), 1440.0, 900.0, 1.0);
        let ts = tickets(&e.drain_effects());
        e.teardown();
        e.teardown();
        for t in ts {
            e.complete_load(t, Ok(Img("late".into())));
        }
        assert!(e.is_torn_down());
        assert!(e.tiles().is_none());
        assert!(e.drain_effects().is_empty());
        assert_eq!(e.in_flight(), 0);
    }

    #[test]
    fn frame_reports_wrapped_offset_and_time() {
        let mut e = GridEngine::<Img>::new(GridConfig::default(), items(20), 1440.0, 900.0, 1.0);
        e.advance(Duration::from_secs(10));
        e.advance(Duration::from_secs(11));
        let f = e.frame(7);
        assert_eq!(f.index, 7);
        assert!((f.post.time - 1.0).abs() < 1e-6);
        let half = e.layout().half_block();
        assert!(f.offset.x.abs() <= half.x && f.offset.y.abs() <= half.y);
    }
}
