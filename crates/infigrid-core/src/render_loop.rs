#![forbid(unsafe_code)]

//! Per-frame driver and the backend seam.
//!
//! A [`RenderLoop`] owns one [`RenderBackend`] and runs one tick per host
//! frame, strictly in order:
//!
//! 1. check the [`CancelToken`] (a cancelled loop does no work at all);
//! 2. integrate pan, distortion and tile animations ([`GridEngine::advance`]);
//! 3. apply a pending resize to the backend, so that projection and
//!    offscreen targets change together before anything is drawn;
//! 4. release per-tile backend resources if the tile set was rebuilt;
//! 5. build the frame uniforms: wrapped offset, projection, post params;
//! 6. draw the tile pass into the offscreen target;
//! 7. draw the post pass to the visible surface.
//!
//! Backends are interchangeable: anything implementing the trait (WebGPU,
//! Canvas 2D, a recorder in tests) gets identical sequencing.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use crate::camera::Viewport;
use crate::config::TileStyle;
use crate::engine::GridEngine;
use crate::geometry::Vec2;
use crate::item::GridItem;
use crate::post_effect::PostParams;
use crate::resource_cache::CachedResource;
use crate::tile_set::{TileId, VisualState};

/// Teardown flag shared by the frame loop and in-flight loads.
///
/// Single-threaded by construction (`Rc`); cancelling is synchronous and
/// irreversible.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Rc<Cell<bool>>);

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.set(true);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.get()
    }
}

/// Uniforms shared by both passes of one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameParams {
    pub index: u64,
    /// Wrapped pan offset: the world transform of the tile field.
    pub offset: Vec2,
    pub projection: [[f32; 4]; 4],
    pub viewport: Viewport,
    pub post: PostParams,
    pub style: TileStyle,
}

/// One tile to draw, in tile-set-local coordinates.
#[derive(Debug, Clone, Copy)]
pub struct TileDraw<'a, H> {
    pub id: TileId,
    pub center: Vec2,
    pub size: Vec2,
    pub visual: VisualState,
    /// `None` while pending or after a failed load: the image is skipped but
    /// the caption is still drawn.
    pub content: Option<&'a H>,
    /// Source of the caption text.
    pub item: &'a GridItem,
}

impl<H> TileDraw<'_, H> {
    /// World-space centre once the field offset is applied.
    #[must_use]
    pub fn world_center(&self, offset: Vec2) -> Vec2 {
        self.center + offset
    }
}

/// Capability set of a renderer.
pub trait RenderBackend {
    /// Content handle type stored in the resource cache.
    type Handle: CachedResource;
    type Error: std::error::Error;

    /// Reconfigure surface, camera and offscreen target for `viewport`.
    fn resize(&mut self, viewport: &Viewport) -> Result<(), Self::Error>;

    /// Draw tiles into the offscreen target.
    fn draw_tiles(
        &mut self,
        frame: &FrameParams,
        tiles: &[TileDraw<'_, Self::Handle>],
    ) -> Result<(), Self::Error>;

    /// Composite the offscreen target to the surface through the post effect.
    fn draw_post(&mut self, frame: &FrameParams) -> Result<(), Self::Error>;

    /// Drop per-tile resources belonging to build `epoch`.
    fn release_tiles(&mut self, epoch: u64);
}

/// Per-tick counters.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameStats {
    pub index: u64,
    pub tiles_drawn: usize,
    pub tiles_with_content: usize,
    pub distortion: f32,
    pub resized: bool,
}

/// Result of one tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TickOutcome {
    Drawn(FrameStats),
    /// Cancelled or torn down: nothing ran.
    Cancelled,
}

/// The frame driver.
#[derive(Debug)]
pub struct RenderLoop<B: RenderBackend> {
    backend: B,
    cancel: CancelToken,
    frames: u64,
    tiles_epoch: Option<u64>,
}

impl<B: RenderBackend> RenderLoop<B> {
    #[must_use]
    pub fn new(backend: B, cancel: CancelToken) -> Self {
        Self {
            backend,
            cancel,
            frames: 0,
            tiles_epoch: None,
        }
    }

    #[must_use]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    #[must_use]
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    #[must_use]
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Run one frame at host time `now`.
    pub fn tick(
        &mut self,
        engine: &mut GridEngine<B::Handle>,
        now: Duration,
    ) -> Result<TickOutcome, B::Error> {
        if self.cancel.is_cancelled() || engine.is_torn_down() {
            return Ok(TickOutcome::Cancelled);
        }

        engine.advance(now);

        let resized = engine.take_resize();
        if resized {
            self.backend.resize(engine.viewport())?;
        }

        let epoch = engine.tiles_epoch();
        if self.tiles_epoch != epoch {
            if let Some(old) = self.tiles_epoch {
                self.backend.release_tiles(old);
            }
            self.tiles_epoch = epoch;
        }

        let frame = engine.frame(self.frames);
        let draws = engine.draw_list();
        self.backend.draw_tiles(&frame, &draws)?;
        self.backend.draw_post(&frame)?;

        let stats = FrameStats {
            index: self.frames,
            tiles_drawn: draws.len(),
            tiles_with_content: draws.iter().filter(|d| d.content.is_some()).count(),
            distortion: frame.post.distortion,
            resized,
        };
        self.frames += 1;
        Ok(TickOutcome::Drawn(stats))
    }

    /// Stop the loop: cancel, release tile resources, hand back the backend.
    ///
    /// Any clone of the cancel token observes the cancellation immediately.
    pub fn teardown(mut self) -> B {
        self.cancel.cancel();
        if let Some(epoch) = self.tiles_epoch.take() {
            self.backend.release_tiles(epoch);
        }
        crate::debug!(frames = self.frames, "render loop torn down");
        self.backend
    }
}
