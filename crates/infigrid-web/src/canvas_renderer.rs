#![forbid(unsafe_code)]

//! Canvas 2D fallback renderer.
//!
//! Used when WebGPU is unavailable. Tiles are drawn with the 2D context into a
//! scene canvas; the post pass runs on the CPU over a downscaled copy (see
//! [`infigrid_core::post_effect::apply`]) and is stretched back over the
//! visible canvas. The per-image vignette is not reproduced here.
//!
//! Card captions are painted with the same 2D text calls whether they land
//! in the scene canvas directly or in a texture baked for the WebGPU path.

use infigrid_core::camera::Viewport;
use infigrid_core::geometry::Vec2;
use infigrid_core::render_loop::TileDraw;

use crate::renderer::cover_uv;

/// Upper bound on CPU post-pass pixels per frame.
pub const MAX_POST_PIXELS: u32 = 640 * 360;

/// Screen rectangle in CSS pixels, top-left origin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScreenRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl ScreenRect {
    #[must_use]
    pub fn intersects_viewport(&self, viewport: &Viewport) -> bool {
        self.x < viewport.width()
            && self.y < viewport.height()
            && self.x + self.width > 0.0
            && self.y + self.height > 0.0
    }
}

/// Where a tile lands on screen for the given field offset.
#[must_use]
pub fn tile_screen_rect<H>(draw: &TileDraw<'_, H>, offset: Vec2, viewport: &Viewport) -> ScreenRect {
    let center = viewport.world_to_screen(draw.world_center(offset));
    ScreenRect {
        x: center.x - draw.size.x / 2.0,
        y: center.y - draw.size.y / 2.0,
        width: draw.size.x,
        height: draw.size.y,
    }
}

/// Source rectangle `(sx, sy, sw, sh)` in image pixels for a cover-fit tile
/// zoomed by `scale` about its centre.
#[must_use]
pub fn cover_source_rect(image: (u32, u32), tile: [f32; 2], scale: f32) -> [f64; 4] {
    let uv = cover_uv(image, tile);
    let zoom = if scale.is_finite() && scale > 0.0 {
        f64::from(scale)
    } else {
        1.0
    };
    let dims = [f64::from(image.0), f64::from(image.1)];
    let mut out = [0.0; 4];
    for axis in 0..2 {
        let span = f64::from(uv.scale[axis]);
        let start = f64::from(uv.offset[axis]) + (0.5 - 0.5 / zoom) * span;
        out[axis] = start * dims[axis];
        out[axis + 2] = span / zoom * dims[axis];
    }
    out
}

/// CSS `filter` value for a tile's grayscale amount.
#[must_use]
pub fn filter_css(grayscale: f32) -> String {
    let g = grayscale.clamp(0.0, 1.0);
    if g <= 0.001 {
        "none".to_owned()
    } else {
        format!("grayscale({g:.3})")
    }
}

/// Font stack for card captions.
pub const CAPTION_FONT_FAMILY: &str = "Inter, system-ui, sans-serif";

/// Weights of the title and tag lines.
pub const TITLE_WEIGHT: u16 = 600;
pub const TAGS_WEIGHT: u16 = 400;

/// CSS `font` shorthand for one caption line.
#[must_use]
pub fn caption_font(weight: u16, size_px: f32) -> String {
    let size = if size_px.is_finite() { size_px.max(1.0) } else { 1.0 };
    format!("{weight} {size}px {CAPTION_FONT_FAMILY}")
}

/// Size of the CPU post target: the physical size, shrunk uniformly until it
/// fits in `max_pixels`.
#[must_use]
pub fn post_target_size(physical: (u32, u32), max_pixels: u32) -> (u32, u32) {
    let (w, h) = (physical.0.max(1), physical.1.max(1));
    let area = u64::from(w) * u64::from(h);
    if area <= u64::from(max_pixels.max(1)) {
        return (w, h);
    }
    let k = (f64::from(max_pixels.max(1)) / area as f64).sqrt();
    let sw = ((f64::from(w) * k).floor() as u32).max(1);
    let sh = ((f64::from(h) * k).floor() as u32).max(1);
    (sw, sh)
}

#[cfg(target_arch = "wasm32")]
mod canvas {
    use super::*;
    use crate::renderer::{BackendKind, ImageUpload, RendererError};
    use infigrid_core::caption::{CaptionLayout, CardCaption, caption_alpha};
    use infigrid_core::item::ItemId;
    use infigrid_core::post_effect::{RgbaFrame, apply};
    use infigrid_core::render_loop::{FrameParams, RenderBackend};
    use infigrid_core::resource_cache::{CachedResource, FilterMode, LoadError, SamplingPolicy};
    use std::collections::HashMap;
    use tracing::{debug, info, warn};
    use wasm_bindgen::{Clamped, JsCast, JsValue};
    use web_sys::{CanvasRenderingContext2d, HtmlCanvasElement, HtmlImageElement, ImageData};

    fn js_err(e: JsValue) -> RendererError {
        RendererError::SurfaceError(format!("{e:?}"))
    }

    /// Cache handle: the decoded `<img>` plus its smoothing flag.
    #[derive(Debug, Clone)]
    pub struct CanvasImage {
        image: HtmlImageElement,
        smoothing: bool,
    }

    impl CanvasImage {
        fn size(&self) -> (u32, u32) {
            (self.image.natural_width(), self.image.natural_height())
        }
    }

    impl CachedResource for CanvasImage {
        fn configure_sampling(&mut self, policy: SamplingPolicy) {
            self.smoothing = policy.filter == FilterMode::Linear;
        }
    }

    fn context_2d(canvas: &HtmlCanvasElement) -> Result<CanvasRenderingContext2d, RendererError> {
        canvas
            .get_context("2d")
            .map_err(js_err)?
            .ok_or(RendererError::ContextUnavailable)?
            .dyn_into::<CanvasRenderingContext2d>()
            .map_err(|_| RendererError::ContextUnavailable)
    }

    pub(crate) fn offscreen_canvas(
        visible: &HtmlCanvasElement,
    ) -> Result<HtmlCanvasElement, RendererError> {
        let document = visible
            .owner_document()
            .ok_or(RendererError::ContextUnavailable)?;
        document
            .create_element("canvas")
            .map_err(js_err)?
            .dyn_into::<HtmlCanvasElement>()
            .map_err(|_| RendererError::ContextUnavailable)
    }

    /// Paint both caption lines for a card whose top-left corner is at
    /// `(x, y)` in the context's current user space.
    pub(crate) fn paint_caption(
        ctx: &CanvasRenderingContext2d,
        x: f64,
        y: f64,
        caption: &CardCaption,
        layout: &CaptionLayout,
        alpha: (f32, f32),
    ) -> Result<(), RendererError> {
        let max_width = f64::from(layout.max_width);
        ctx.save();
        ctx.set_filter("none");
        ctx.set_text_align("left");
        ctx.set_text_baseline("bottom");
        ctx.set_fill_style_str("#fff");
        ctx.set_shadow_color("rgba(0,0,0,0.8)");
        ctx.set_shadow_blur(8.0);
        ctx.set_shadow_offset_y(2.0);
        let lines = [
            (&caption.title, TITLE_WEIGHT, layout.title_size, layout.title, alpha.0),
            (&caption.tags, TAGS_WEIGHT, layout.tags_size, layout.tags, alpha.1),
        ];
        for (text, weight, size, at, a) in lines {
            if text.is_empty() || a <= 0.0 {
                continue;
            }
            ctx.set_global_alpha(f64::from(a));
            ctx.set_font(&caption_font(weight, size));
            ctx.fill_text_with_max_width(
                text,
                x + f64::from(at.x),
                y + f64::from(at.y),
                max_width,
            )
            .map_err(js_err)?;
        }
        ctx.restore();
        Ok(())
    }

    /// Render a card's caption into a transparent canvas of the card's size
    /// scaled by `ratio`, at full opacity.
    pub(crate) fn bake_caption(
        owner: &HtmlCanvasElement,
        caption: &CardCaption,
        layout: &CaptionLayout,
        card: Vec2,
        ratio: f32,
        tags_opacity: f32,
    ) -> Result<HtmlCanvasElement, RendererError> {
        let canvas = offscreen_canvas(owner)?;
        let width = (card.x * ratio).ceil().max(1.0) as u32;
        let height = (card.y * ratio).ceil().max(1.0) as u32;
        canvas.set_width(width);
        canvas.set_height(height);
        let ctx = context_2d(&canvas)?;
        let ratio = f64::from(ratio);
        ctx.set_transform(ratio, 0.0, 0.0, ratio, 0.0, 0.0)
            .map_err(js_err)?;
        paint_caption(&ctx, 0.0, 0.0, caption, layout, (1.0, tags_opacity))?;
        Ok(canvas)
    }

    pub struct CanvasRenderer {
        canvas: HtmlCanvasElement,
        ctx: CanvasRenderingContext2d,
        scene: HtmlCanvasElement,
        scene_ctx: CanvasRenderingContext2d,
        post: HtmlCanvasElement,
        post_ctx: CanvasRenderingContext2d,
        physical: (u32, u32),
        post_size: (u32, u32),
        /// Formatted caption text per item of the current build.
        captions: HashMap<ItemId, CardCaption>,
    }

    impl CanvasRenderer {
        pub fn init(canvas: HtmlCanvasElement, viewport: &Viewport) -> Result<Self, RendererError> {
            let ctx = context_2d(&canvas)?;
            let scene = offscreen_canvas(&canvas)?;
            let scene_ctx = context_2d(&scene)?;
            let post = offscreen_canvas(&canvas)?;
            let post_ctx = context_2d(&post)?;
            let mut renderer = Self {
                canvas,
                ctx,
                scene,
                scene_ctx,
                post,
                post_ctx,
                physical: (0, 0),
                post_size: (0, 0),
                captions: HashMap::new(),
            };
            renderer.resize(viewport)?;
            info!(
                width = renderer.physical.0,
                height = renderer.physical.1,
                "canvas2d renderer ready"
            );
            Ok(renderer)
        }

        fn draw_tile(
            &mut self,
            frame: &FrameParams,
            draw: &TileDraw<'_, CanvasImage>,
        ) -> Result<(), RendererError> {
            let rect = tile_screen_rect(draw, frame.offset, &frame.viewport);
            if !rect.intersects_viewport(&frame.viewport) {
                return Ok(());
            }
            if let Some(image) = draw.content {
                self.draw_image(frame, draw, &rect, image)?;
            }

            let style = &frame.style.caption;
            let Some(layout) = CaptionLayout::compute(draw.size, style) else {
                return Ok(());
            };
            let alpha = caption_alpha(draw.visual.alpha, style);
            if alpha.0 <= 0.0 {
                return Ok(());
            }
            let caption = self
                .captions
                .entry(draw.id.item)
                .or_insert_with(|| CardCaption::of(draw.item));
            if caption.is_empty() {
                return Ok(());
            }
            paint_caption(
                &self.scene_ctx,
                f64::from(rect.x),
                f64::from(rect.y),
                caption,
                &layout,
                alpha,
            )
        }

        fn draw_image(
            &self,
            frame: &FrameParams,
            draw: &TileDraw<'_, CanvasImage>,
            rect: &ScreenRect,
            image: &CanvasImage,
        ) -> Result<(), RendererError> {
            let (x, y) = (f64::from(rect.x), f64::from(rect.y));
            let (w, h) = (f64::from(rect.width), f64::from(rect.height));
            let r = f64::from(frame.style.border_radius.min(rect.width.min(rect.height) / 2.0));
            let ctx = &self.scene_ctx;

            ctx.save();
            ctx.begin_path();
            ctx.move_to(x + r, y);
            ctx.arc_to(x + w, y, x + w, y + h, r).map_err(js_err)?;
            ctx.arc_to(x + w, y + h, x, y + h, r).map_err(js_err)?;
            ctx.arc_to(x, y + h, x, y, r).map_err(js_err)?;
            ctx.arc_to(x, y, x + w, y, r).map_err(js_err)?;
            ctx.close_path();
            ctx.clip();

            ctx.set_global_alpha(f64::from(draw.visual.alpha.clamp(0.0, 1.0)));
            ctx.set_filter(&filter_css(draw.visual.grayscale));
            ctx.set_image_smoothing_enabled(image.smoothing);
            let [sx, sy, sw, sh] =
                cover_source_rect(image.size(), [rect.width, rect.height], draw.visual.scale);
            ctx.draw_image_with_html_image_element_and_sw_and_sh_and_dx_and_dy_and_dw_and_dh(
                &image.image,
                sx,
                sy,
                sw,
                sh,
                x,
                y,
                w,
                h,
            )
            .map_err(js_err)?;

            let overlay = draw.visual.overlay_opacity.clamp(0.0, 1.0);
            if overlay > 0.0 {
                ctx.set_filter("none");
                ctx.set_fill_style_str(&format!("rgba(0,0,0,{overlay:.3})"));
                ctx.fill_rect(x, y, w, h);
            }
            ctx.restore();
            Ok(())
        }
    }

    impl RenderBackend for CanvasRenderer {
        type Handle = CanvasImage;
        type Error = RendererError;

        fn resize(&mut self, viewport: &Viewport) -> Result<(), RendererError> {
            let physical = viewport.physical_size();
            if physical == self.physical {
                return Ok(());
            }
            self.physical = physical;
            for canvas in [&self.canvas, &self.scene] {
                canvas.set_width(physical.0);
                canvas.set_height(physical.1);
            }
            self.post_size = post_target_size(physical, MAX_POST_PIXELS);
            self.post.set_width(self.post_size.0);
            self.post.set_height(self.post_size.1);
            debug!(
                width = physical.0,
                height = physical.1,
                post_width = self.post_size.0,
                post_height = self.post_size.1,
                "canvas2d resized"
            );
            Ok(())
        }

        fn draw_tiles(
            &mut self,
            frame: &FrameParams,
            tiles: &[TileDraw<'_, CanvasImage>],
        ) -> Result<(), RendererError> {
            let ratio = f64::from(frame.viewport.pixel_ratio());
            let ctx = &self.scene_ctx;
            ctx.set_transform(1.0, 0.0, 0.0, 1.0, 0.0, 0.0)
                .map_err(js_err)?;
            ctx.set_fill_style_str("#000");
            ctx.fill_rect(
                0.0,
                0.0,
                f64::from(self.physical.0),
                f64::from(self.physical.1),
            );
            ctx.set_transform(ratio, 0.0, 0.0, ratio, 0.0, 0.0)
                .map_err(js_err)?;

            for draw in tiles {
                self.draw_tile(frame, draw)?;
            }
            Ok(())
        }

        fn draw_post(&mut self, frame: &FrameParams) -> Result<(), RendererError> {
            let (pw, ph) = self.post_size;
            let (fw, fh) = (f64::from(pw), f64::from(ph));
            self.post_ctx.set_image_smoothing_enabled(true);
            self.post_ctx
                .draw_image_with_html_canvas_element_and_dw_and_dh(&self.scene, 0.0, 0.0, fw, fh)
                .map_err(js_err)?;
            let data = self
                .post_ctx
                .get_image_data(0.0, 0.0, fw, fh)
                .map_err(js_err)?;

            let shaded = match RgbaFrame::from_raw(pw, ph, data.data().0) {
                Some(scene) => apply(&scene, &frame.post),
                None => {
                    warn!(width = pw, height = ph, "post readback size mismatch");
                    return Ok(());
                }
            };
            let image =
                ImageData::new_with_u8_clamped_array_and_sh(Clamped(shaded.pixels()), pw, ph)
                    .map_err(js_err)?;
            self.post_ctx
                .put_image_data(&image, 0.0, 0.0)
                .map_err(js_err)?;

            self.ctx.set_image_smoothing_enabled(true);
            self.ctx
                .draw_image_with_html_canvas_element_and_dw_and_dh(
                    &self.post,
                    0.0,
                    0.0,
                    f64::from(self.physical.0),
                    f64::from(self.physical.1),
                )
                .map_err(js_err)
        }

        fn release_tiles(&mut self, epoch: u64) {
            // Images are owned by the cache; only caption text is per build.
            let dropped = self.captions.len();
            self.captions.clear();
            debug!(epoch, dropped, "canvas2d released captions");
        }
    }

    impl ImageUpload for CanvasRenderer {
        const KIND: BackendKind = BackendKind::Canvas2d;

        fn upload(&mut self, image: &HtmlImageElement) -> Result<CanvasImage, LoadError> {
            if image.natural_width() == 0 || image.natural_height() == 0 {
                return Err(LoadError::Decode("image has no pixels".into()));
            }
            Ok(CanvasImage {
                image: image.clone(),
                smoothing: true,
            })
        }
    }
}

#[cfg(target_arch = "wasm32")]
pub(crate) use canvas::bake_caption;
#[cfg(target_arch = "wasm32")]
pub use canvas::{CanvasImage, CanvasRenderer};
