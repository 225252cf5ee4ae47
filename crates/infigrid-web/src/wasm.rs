#![forbid(unsafe_code)]

use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::time::Duration;

use gloo::events::{EventListener, EventListenerOptions, EventListenerPhase};
use gloo::render::{AnimationFrame, request_animation_frame};
use infigrid_core::engine::{EngineEffect, GridEngine};
use infigrid_core::gesture::GestureInput;
use infigrid_core::item::GridItem;
use infigrid_core::render_loop::{CancelToken, RenderLoop, TickOutcome};
use infigrid_core::resource_cache::{LoadError, LoadTicket};
use tracing::{debug, error, info, trace, warn};
use wasm_bindgen::JsCast;
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::spawn_local;
use web_sys::{Event, HtmlCanvasElement, HtmlImageElement, PointerEvent, WheelEvent};

use crate::canvas_renderer::{CanvasImage, CanvasRenderer};
use crate::input::{
    Buttons, DeltaMode, FocusInput, InputEvent, InputNormalizer, Modifiers, PointerInput,
    PointerPhase, PointerType, WheelInput, host_time,
};
use crate::lifecycle::{Delivery, Lifecycle, LoadInbox};
use crate::logging::init_console_logging;
use crate::options::GridOptions;
use crate::renderer::{BackendKind, ImageUpload, RendererError, TileTexture, WebGpuRenderer};
use crate::texture_loader::load_image;

/// One engine plus the render loop of whichever backend came up.
///
/// Object-safe so the handle type of the chosen backend stays hidden.
trait GridSession {
    fn backend(&self) -> BackendKind;
    fn input(&mut self, input: GestureInput);
    fn resize(&mut self, width: f32, height: f32, device_pixel_ratio: f32) -> bool;
    fn set_items(&mut self, items: Vec<GridItem>);
    fn tick(&mut self, now: Duration) -> Result<TickOutcome, RendererError>;
    fn drain_effects(&mut self) -> Vec<EngineEffect>;
    fn complete_image(&mut self, ticket: LoadTicket, result: Result<HtmlImageElement, LoadError>);
    fn teardown(&mut self);
}

struct Session<B: ImageUpload> {
    engine: GridEngine<B::Handle>,
    render: Option<RenderLoop<B>>,
}

impl<B: ImageUpload> GridSession for Session<B> {
    fn backend(&self) -> BackendKind {
        B::KIND
    }

    fn input(&mut self, input: GestureInput) {
        self.engine.handle_input(input);
    }

    fn resize(&mut self, width: f32, height: f32, device_pixel_ratio: f32) -> bool {
        self.engine.resize(width, height, device_pixel_ratio)
    }

    fn set_items(&mut self, items: Vec<GridItem>) {
        self.engine.set_items(items);
    }

    fn tick(&mut self, now: Duration) -> Result<TickOutcome, RendererError> {
        match self.render.as_mut() {
            Some(render) => render.tick(&mut self.engine, now),
            None => Ok(TickOutcome::Cancelled),
        }
    }

    fn drain_effects(&mut self) -> Vec<EngineEffect> {
        self.engine.drain_effects()
    }

    fn complete_image(&mut self, ticket: LoadTicket, result: Result<HtmlImageElement, LoadError>) {
        let result = match self.render.as_mut() {
            Some(render) => result.and_then(|image| render.backend_mut().upload(&image)),
            None => Err(LoadError::Cancelled),
        };
        self.engine.complete_load(ticket, result);
    }

    fn teardown(&mut self) {
        self.engine.teardown();
        if let Some(render) = self.render.take() {
            drop(render.teardown());
        }
    }
}

type ImageCompletion = (LoadTicket, Result<HtmlImageElement, LoadError>);

struct Shared {
    canvas: RefCell<Option<HtmlCanvasElement>>,
    session: RefCell<Option<Box<dyn GridSession>>>,
    normalizer: RefCell<InputNormalizer>,
    lifecycle: Lifecycle,
    /// Decoded images waiting for the session to be free.
    inbox: LoadInbox<ImageCompletion>,
    cross_origin: RefCell<Option<String>>,
    raf: RefCell<Option<AnimationFrame>>,
    listeners: RefCell<Vec<EventListener>>,
    on_navigate: RefCell<Option<js_sys::Function>>,
    on_link_suppression: RefCell<Option<js_sys::Function>>,
}

/// Web/WASM infinite grid.
///
/// ```js
/// const grid = new InfiniGridWeb();
/// grid.onNavigate((href) => router.push(href));
/// await grid.init(canvas, JSON.stringify({ items }));
/// // ...
/// grid.destroy();
/// ```
#[wasm_bindgen]
pub struct InfiniGridWeb {
    shared: Rc<Shared>,
}

#[wasm_bindgen]
impl InfiniGridWeb {
    #[wasm_bindgen(constructor)]
    pub fn new() -> Self {
        Self {
            shared: Rc::new(Shared {
                canvas: RefCell::new(None),
                session: RefCell::new(None),
                normalizer: RefCell::new(InputNormalizer::default()),
                lifecycle: Lifecycle::new(CancelToken::new()),
                inbox: LoadInbox::default(),
                cross_origin: RefCell::new(None),
                raf: RefCell::new(None),
                listeners: RefCell::new(Vec::new()),
                on_navigate: RefCell::new(None),
                on_link_suppression: RefCell::new(None),
            }),
        }
    }

    /// Route `tracing` output to the browser console. `filter` uses
    /// `EnvFilter` syntax and defaults to `info`.
    #[wasm_bindgen(js_name = initLogging)]
    pub fn init_logging(filter: Option<String>) -> bool {
        init_console_logging(filter.as_deref().unwrap_or("info"))
    }

    /// Bring the grid up on an existing `<canvas>`.
    ///
    /// `options` is the JSON described in `GridOptions`. Resolves once a
    /// backend is running and the first fetches are queued. `destroy` may be
    /// called while this is pending; the returned promise then rejects and
    /// nothing is installed.
    pub async fn init(
        &self,
        canvas: HtmlCanvasElement,
        options: Option<String>,
    ) -> Result<(), JsValue> {
        let shared = Rc::clone(&self.shared);
        shared.lifecycle.begin_init().map_err(js_error)?;
        let options = match GridOptions::from_json_str(options.as_deref().unwrap_or("")) {
            Ok(options) => options,
            Err(e) => {
                shared.lifecycle.abort_init();
                return Err(js_error(e));
            }
        };

        let (width, height, ratio) = css_size(&canvas);
        let mut session = match open_session(&canvas, &options, width, height, ratio).await {
            Ok(session) => session,
            Err(e) => {
                shared.lifecycle.abort_init();
                return Err(js_error(e));
            }
        };
        if let Err(e) = shared.lifecycle.finish_init() {
            session.teardown();
            debug!("init finished after destroy, session discarded");
            return Err(js_error(e));
        }
        info!(
            backend = session.backend().name(),
            items = options.items.len(),
            width,
            height,
            "grid initialized"
        );

        shared.normalizer.borrow_mut().set_page_height(height);
        *shared.cross_origin.borrow_mut() = options.cross_origin.clone();
        *shared.canvas.borrow_mut() = Some(canvas.clone());
        *shared.session.borrow_mut() = Some(session);

        if options.capture_input {
            attach_listeners(&shared, &canvas);
        }
        flush_effects(&shared);
        schedule_frame(&shared);
        Ok(())
    }

    /// Attach the built-in DOM listeners. A no-op when they are already
    /// attached (the default unless `capture_input` was `false`).
    pub fn attach(&self) -> Result<(), JsValue> {
        let shared = &self.shared;
        shared.lifecycle.require_running().map_err(js_error)?;
        if !shared.listeners.borrow().is_empty() {
            return Ok(());
        }
        let Some(canvas) = shared.canvas.borrow().clone() else {
            return Err(JsValue::from_str("grid has no canvas"));
        };
        attach_listeners(shared, &canvas);
        Ok(())
    }

    /// (Re)start the frame loop, e.g. after a render failure stopped it.
    pub fn start(&self) -> Result<(), JsValue> {
        let shared = &self.shared;
        shared.lifecycle.require_running().map_err(js_error)?;
        if shared.raf.borrow().is_none() {
            schedule_frame(shared);
        }
        Ok(())
    }

    /// Feed one input event as JSON (see `InputEventJson`).
    pub fn input(&self, event_json: &str) -> Result<(), JsValue> {
        let event = InputEvent::from_json_str(event_json).map_err(js_error)?;
        handle_input(&self.shared, &event);
        Ok(())
    }

    /// Apply a new CSS size and device pixel ratio.
    pub fn resize(&self, width: f32, height: f32, device_pixel_ratio: f32) {
        apply_resize(&self.shared, width, height, device_pixel_ratio);
    }

    /// Replace the item list. Accepts a JSON array of items.
    #[wasm_bindgen(js_name = setItems)]
    pub fn set_items(&self, items_json: &str) -> Result<(), JsValue> {
        self.shared.lifecycle.require_running().map_err(js_error)?;
        let items = GridOptions::items_from_json_str(items_json).map_err(js_error)?;
        if let Some(session) = self.shared.session.borrow_mut().as_mut() {
            session.set_items(items);
        }
        flush_effects(&self.shared);
        Ok(())
    }

    /// `callback(href)` replaces the default `location.href` navigation.
    #[wasm_bindgen(js_name = onNavigate)]
    pub fn on_navigate(&self, callback: Option<js_sys::Function>) {
        *self.shared.on_navigate.borrow_mut() = callback;
    }

    /// `callback(suppressed)` fires when native link interaction should be
    /// disabled during a drag and restored after.
    #[wasm_bindgen(js_name = onLinkSuppression)]
    pub fn on_link_suppression(&self, callback: Option<js_sys::Function>) {
        *self.shared.on_link_suppression.borrow_mut() = callback;
    }

    /// `"webgpu"`, `"canvas2d"` or `undefined` before init.
    #[wasm_bindgen(getter)]
    pub fn backend(&self) -> Option<String> {
        self.shared
            .session
            .borrow()
            .as_ref()
            .map(|s| s.backend().name().to_owned())
    }

    /// Explicit teardown for JS callers. Cancels the frame loop and pending
    /// loads, removes listeners and releases GPU resources. Safe to call
    /// while `init` is still pending, and more than once.
    pub fn destroy(&self) {
        let shared = &self.shared;
        if !shared.lifecycle.destroy() {
            return;
        }
        shared.raf.borrow_mut().take();
        shared.listeners.borrow_mut().clear();
        if let Some(mut session) = shared.session.borrow_mut().take() {
            session.teardown();
        }
        if let Some(canvas) = shared.canvas.borrow_mut().take() {
            let _ = canvas.style().remove_property("cursor");
        }
        shared.on_navigate.borrow_mut().take();
        shared.on_link_suppression.borrow_mut().take();
        if let Delivery::Dropped(n) = shared.inbox.deliver(&shared.session, |_, _| {}) {
            debug!(dropped = n, "discarded parked image loads");
        }
        debug!("grid destroyed");
    }
}

fn js_error(e: impl std::fmt::Display) -> JsValue {
    JsValue::from_str(&e.to_string())
}

impl Default for InfiniGridWeb {
    fn default() -> Self {
        Self::new()
    }
}

async fn open_session(
    canvas: &HtmlCanvasElement,
    options: &GridOptions,
    width: f32,
    height: f32,
    ratio: f32,
) -> Result<Box<dyn GridSession>, RendererError> {
    let preference = options.renderer;
    if preference.allows_webgpu() {
        if WebGpuRenderer::is_available().await {
            let engine: GridEngine<TileTexture> = GridEngine::new(
                options.config.clone(),
                options.items.clone(),
                width,
                height,
                ratio,
            );
            match WebGpuRenderer::init(canvas.clone(), engine.viewport()).await {
                Ok(renderer) => return Ok(session(engine, renderer)),
                Err(e) if preference.allows_canvas() => {
                    warn!(error = %e, "webgpu init failed, falling back to canvas2d");
                }
                Err(e) => return Err(e),
            }
        } else if !preference.allows_canvas() {
            return Err(RendererError::NoAdapter);
        } else {
            info!("webgpu unavailable, using canvas2d");
        }
    }
    let engine: GridEngine<CanvasImage> = GridEngine::new(
        options.config.clone(),
        options.items.clone(),
        width,
        height,
        ratio,
    );
    let renderer = CanvasRenderer::init(canvas.clone(), engine.viewport())?;
    Ok(session(engine, renderer))
}

fn session<B: ImageUpload + 'static>(
    engine: GridEngine<B::Handle>,
    renderer: B,
) -> Box<dyn GridSession> {
    // Each session gets its own token; `destroy` tears the loop down
    // explicitly through `GridSession::teardown`.
    Box::new(Session {
        engine,
        render: Some(RenderLoop::new(renderer, CancelToken::new())),
    })
}

fn css_size(canvas: &HtmlCanvasElement) -> (f32, f32, f32) {
    let ratio = web_sys::window().map_or(1.0, |w| w.device_pixel_ratio()) as f32;
    let (cw, ch) = (canvas.client_width(), canvas.client_height());
    if cw > 0 && ch > 0 {
        (cw as f32, ch as f32, ratio)
    } else {
        (canvas.width() as f32, canvas.height() as f32, 1.0)
    }
}

fn apply_resize(shared: &Rc<Shared>, width: f32, height: f32, ratio: f32) {
    let rebuilt = {
        let mut slot = shared.session.borrow_mut();
        let Some(session) = slot.as_mut() else {
            return;
        };
        session.resize(width, height, ratio)
    };
    shared.normalizer.borrow_mut().set_page_height(height);
    if rebuilt {
        flush_effects(shared);
    }
}

fn schedule_frame(shared: &Rc<Shared>) {
    if shared.lifecycle.cancel_token().is_cancelled() {
        return;
    }
    let weak: Weak<Shared> = Rc::downgrade(shared);
    let handle = request_animation_frame(move |timestamp| {
        if let Some(shared) = weak.upgrade() {
            run_frame(&shared, timestamp);
        }
    });
    *shared.raf.borrow_mut() = Some(handle);
}

fn run_frame(shared: &Rc<Shared>, timestamp: f64) {
    shared.raf.borrow_mut().take();
    deliver_images(shared);
    let (outcome, effects) = {
        let mut slot = shared.session.borrow_mut();
        let Some(session) = slot.as_mut() else {
            return;
        };
        let outcome = session.tick(host_time(timestamp));
        (outcome, session.drain_effects())
    };
    match outcome {
        Ok(TickOutcome::Cancelled) => return,
        Ok(TickOutcome::Drawn(stats)) => {
            trace!(
                frame = stats.index,
                tiles = stats.tiles_drawn,
                loaded = stats.tiles_with_content,
                "frame"
            );
        }
        // A lost or outdated surface recovers on the next configure.
        Err(RendererError::SurfaceError(msg)) => warn!(error = %msg, "frame skipped"),
        Err(e) => {
            error!(error = %e, "render failed, stopping");
            return;
        }
    }
    dispatch(shared, effects);
    schedule_frame(shared);
}

fn handle_input(shared: &Rc<Shared>, event: &InputEvent) {
    trace!(?event, "input");
    let Some(gesture) = shared.normalizer.borrow_mut().normalize(event) else {
        return;
    };
    let effects = {
        let mut slot = shared.session.borrow_mut();
        let Some(session) = slot.as_mut() else {
            return;
        };
        session.input(gesture);
        session.drain_effects()
    };
    dispatch(shared, effects);
}

fn flush_effects(shared: &Rc<Shared>) {
    let effects = match shared.session.borrow_mut().as_mut() {
        Some(session) => session.drain_effects(),
        None => return,
    };
    dispatch(shared, effects);
}

fn dispatch(shared: &Rc<Shared>, effects: Vec<EngineEffect>) {
    for effect in effects {
        match effect {
            EngineEffect::FetchResource(ticket) => spawn_fetch(shared, ticket),
            EngineEffect::Navigate(href) => navigate(shared, &href),
            EngineEffect::SetLinkSuppression(suppressed) => {
                if let Some(callback) = shared.on_link_suppression.borrow().as_ref() {
                    if let Err(e) = callback.call1(&JsValue::NULL, &JsValue::from_bool(suppressed))
                    {
                        warn!(error = ?e, "onLinkSuppression callback threw");
                    }
                }
            }
            EngineEffect::SetCursor(cursor) => {
                if let Some(canvas) = shared.canvas.borrow().as_ref() {
                    let _ = canvas.style().set_property("cursor", cursor.css());
                }
            }
            EngineEffect::AllSettled => info!("all tiles settled"),
        }
    }
}

fn navigate(shared: &Shared, href: &str) {
    if let Some(callback) = shared.on_navigate.borrow().as_ref() {
        if let Err(e) = callback.call1(&JsValue::NULL, &JsValue::from_str(href)) {
            warn!(error = ?e, href, "onNavigate callback threw");
        }
        return;
    }
    let Some(window) = web_sys::window() else {
        return;
    };
    if let Err(e) = window.location().set_href(href) {
        warn!(error = ?e, href, "navigation failed");
    }
}

fn spawn_fetch(shared: &Rc<Shared>, ticket: LoadTicket) {
    let weak = Rc::downgrade(shared);
    let cancel = shared.lifecycle.cancel_token().clone();
    let cross_origin = shared.cross_origin.borrow().clone();
    spawn_local(async move {
        let result = load_image(ticket.key(), cross_origin.as_deref(), &cancel).await;
        let Some(shared) = weak.upgrade() else {
            return;
        };
        shared.inbox.push((ticket, result));
        deliver_images(&shared);
    });
}

/// Hand parked image loads to the session. A busy session leaves them
/// queued for the start of the next frame.
fn deliver_images(shared: &Shared) {
    let outcome = shared.inbox.deliver(&shared.session, |session, (ticket, result)| {
        session.complete_image(ticket, result);
    });
    match outcome {
        Delivery::Deferred => {
            debug!(parked = shared.inbox.len(), "session busy, image loads parked");
        }
        Delivery::Dropped(n) => debug!(dropped = n, "no session, image loads discarded"),
        Delivery::Delivered(_) => {}
    }
}

fn attach_listeners(shared: &Rc<Shared>, canvas: &HtmlCanvasElement) {
    let _ = canvas.style().set_property("touch-action", "none");
    let mut listeners = Vec::new();

    for (name, phase) in [
        ("pointerdown", PointerPhase::Down),
        ("pointermove", PointerPhase::Move),
        ("pointerup", PointerPhase::Up),
        ("pointercancel", PointerPhase::Cancel),
        ("pointerleave", PointerPhase::Leave),
    ] {
        let weak = Rc::downgrade(shared);
        let target = canvas.clone();
        listeners.push(EventListener::new(canvas, name, move |event: &Event| {
            let Some(event) = event.dyn_ref::<PointerEvent>() else {
                return;
            };
            let Some(shared) = weak.upgrade() else {
                return;
            };
            if phase == PointerPhase::Down {
                let _ = target.set_pointer_capture(event.pointer_id());
            }
            let rect = target.get_bounding_client_rect();
            let input = PointerInput {
                phase,
                pointer: PointerType::from_dom(&event.pointer_type()),
                id: event.pointer_id(),
                x: (f64::from(event.client_x()) - rect.left()) as f32,
                y: (f64::from(event.client_y()) - rect.top()) as f32,
                buttons: Buttons::from_bits_truncate_u8(event.buttons() as u8),
                mods: Modifiers::from_dom(
                    event.shift_key(),
                    event.alt_key(),
                    event.ctrl_key(),
                    event.meta_key(),
                ),
                has_target: event.target().is_some(),
                time_ms: event.time_stamp(),
            };
            handle_input(&shared, &InputEvent::Pointer(input));
        }));
    }

    {
        let weak = Rc::downgrade(shared);
        let target = canvas.clone();
        listeners.push(EventListener::new_with_options(
            canvas,
            "wheel",
            EventListenerOptions {
                phase: EventListenerPhase::Bubble,
                passive: false,
            },
            move |event: &Event| {
                let Some(event) = event.dyn_ref::<WheelEvent>() else {
                    return;
                };
                let Some(shared) = weak.upgrade() else {
                    return;
                };
                let mods = Modifiers::from_dom(
                    event.shift_key(),
                    event.alt_key(),
                    event.ctrl_key(),
                    event.meta_key(),
                );
                if !InputNormalizer::consumes_wheel(mods) {
                    return;
                }
                event.prevent_default();
                let rect = target.get_bounding_client_rect();
                let input = WheelInput {
                    x: (f64::from(event.client_x()) - rect.left()) as f32,
                    y: (f64::from(event.client_y()) - rect.top()) as f32,
                    dx: event.delta_x() as f32,
                    dy: event.delta_y() as f32,
                    mode: DeltaMode::from_dom(event.delta_mode()),
                    mods,
                    time_ms: event.time_stamp(),
                };
                handle_input(&shared, &InputEvent::Wheel(input));
            },
        ));
    }

    if let Some(window) = web_sys::window() {
        let weak = Rc::downgrade(shared);
        listeners.push(EventListener::new(&window, "blur", move |event: &Event| {
            if let Some(shared) = weak.upgrade() {
                let focus = FocusInput {
                    focused: false,
                    time_ms: event.time_stamp(),
                };
                handle_input(&shared, &InputEvent::Focus(focus));
            }
        }));

        let weak = Rc::downgrade(shared);
        let target = canvas.clone();
        listeners.push(EventListener::new(&window, "resize", move |_: &Event| {
            if let Some(shared) = weak.upgrade() {
                let (width, height, ratio) = css_size(&target);
                apply_resize(&shared, width, height, ratio);
            }
        }));
    }

    shared.listeners.borrow_mut().extend(listeners);
}
