//! End-to-end scenarios: engine + render loop against a recording backend.

use std::convert::Infallible;
use std::time::Duration;

use infigrid_core::camera::Viewport;
use infigrid_core::config::{Breakpoint, GridConfig, LayoutConfig};
use infigrid_core::engine::{CursorStyle, EngineEffect, GridEngine};
use infigrid_core::geometry::Vec2;
use infigrid_core::gesture::{GestureInput, PointerKind};
use infigrid_core::item::{GridItem, ImageSource};
use infigrid_core::render_loop::{
    CancelToken, FrameParams, RenderBackend, RenderLoop, TickOutcome, TileDraw,
};
use infigrid_core::resource_cache::{CachedResource, LoadError, SamplingPolicy};
use pretty_assertions::assert_eq;

#[derive(Debug, Clone, PartialEq)]
struct Texture(String);

impl CachedResource for Texture {
    fn configure_sampling(&mut self, _: SamplingPolicy) {}
}

#[derive(Debug, Default)]
struct Recorder {
    resizes: Vec<(u32, u32)>,
    frames: Vec<FrameParams>,
    drawn: Vec<usize>,
    textured: Vec<usize>,
    min_alpha: Vec<f32>,
    released: Vec<u64>,
}

impl RenderBackend for Recorder {
    type Handle = Texture;
    type Error = Infallible;

    fn resize(&mut self, viewport: &Viewport) -> Result<(), Infallible> {
        self.resizes.push(viewport.physical_size());
        Ok(())
    }

    fn draw_tiles(
        &mut self,
        frame: &FrameParams,
        tiles: &[TileDraw<'_, Texture>],
    ) -> Result<(), Infallible> {
        self.frames.push(*frame);
        self.drawn.push(tiles.len());
        self.textured
            .push(tiles.iter().filter(|t| t.content.is_some()).count());
        self.min_alpha.push(
            tiles
                .iter()
                .map(|t| t.visual.alpha)
                .fold(f32::INFINITY, f32::min),
        );
        Ok(())
    }

    fn draw_post(&mut self, _: &FrameParams) -> Result<(), Infallible> {
        Ok(())
    }

    fn release_tiles(&mut self, epoch: u64) {
        self.released.push(epoch);
    }
}

fn scenario_config() -> GridConfig {
    let mut config = GridConfig::default();
    config.wide.layout = LayoutConfig {
        item_width: 100.0,
        item_height: 75.0,
        columns: 4,
        gap: 10.0,
        padding: 5.0,
    };
    config.wide.motion.pan_smoothing = 0.2;
    config.breakpoint_px = 300.0;
    config
}

fn items(n: usize) -> Vec<GridItem> {
    (0..n)
        .map(|i| GridItem {
            title: format!("Work {i}"),
            href: format!("/work/{i}"),
            image: ImageSource::Url(format!("/media/{i}.jpg")),
            tags: vec!["photo".into()],
        })
        .collect()
}

fn settle(engine: &mut GridEngine<Texture>) -> Vec<EngineEffect> {
    let mut rest = Vec::new();
    for effect in engine.drain_effects() {
        match effect {
            EngineEffect::FetchResource(ticket) => {
                let key = ticket.key().to_owned();
                engine.complete_load(ticket, Ok(Texture(key)));
            }
            other => rest.push(other),
        }
    }
    rest.extend(engine.drain_effects());
    rest
}

fn frames(
    rl: &mut RenderLoop<Recorder>,
    engine: &mut GridEngine<Texture>,
    from: Duration,
    n: u32,
) -> Duration {
    let mut now = from;
    for _ in 0..n {
        now += Duration::from_micros(16_667);
        rl.tick(engine, now).expect("infallible");
    }
    now
}

fn circular(a: f32, b: f32, period: f32) -> f32 {
    let d = (a - b).abs() % period;
    d.min(period - d)
}

#[test]
fn lifecycle_from_build_to_loaded_in() {
    let mut engine = GridEngine::new(scenario_config(), items(20), 400.0, 400.0, 1.0);
    assert_eq!(engine.breakpoint(), Breakpoint::Wide);
    assert_eq!(
        (engine.layout().block_width, engine.layout().block_height),
        (440.0, 425.0)
    );

    let mut rl = RenderLoop::new(Recorder::default(), CancelToken::new());
    let now = frames(&mut rl, &mut engine, Duration::ZERO, 3);
    assert_eq!(rl.backend().resizes, vec![(400, 400)]);
    assert!(rl.backend().textured.iter().all(|&n| n == 0));

    let rest = settle(&mut engine);
    assert!(rest.contains(&EngineEffect::AllSettled));
    assert_eq!(engine.in_flight(), 0);

    // Starting distortion eases to zero and every tile fades in.
    let now = frames(&mut rl, &mut engine, now, 150);
    let b = rl.backend();
    let last = b.drawn.len() - 1;
    assert!(b.drawn[last] > 0);
    assert_eq!(b.textured[last], b.drawn[last]);
    assert_eq!(b.min_alpha[last], 1.0);
    assert!(engine.distortion().abs() < 0.01);
    assert!(now > Duration::from_secs(2));
}

#[test]
fn panning_one_block_is_seamless() {
    let mut engine = GridEngine::new(scenario_config(), items(20), 400.0, 400.0, 1.0);
    settle(&mut engine);
    let mut rl = RenderLoop::new(Recorder::default(), CancelToken::new());
    let now = frames(&mut rl, &mut engine, Duration::ZERO, 2);
    let before = engine.frame(0).offset;

    // Drag multiplier 2: 220 CSS px moves the field one block width.
    let ms = Duration::from_millis;
    engine.handle_input(GestureInput::PointerDown {
        pos: Vec2::new(100.0, 200.0),
        kind: PointerKind::Mouse,
        has_target: true,
        at: now,
    });
    for step in 1..=11u64 {
        engine.handle_input(GestureInput::PointerMove {
            pos: Vec2::new(100.0 + step as f32 * 20.0, 200.0),
            at: now + ms(step * 16),
        });
    }
    // Released long after the last move: no fling.
    engine.handle_input(GestureInput::PointerUp {
        pos: Vec2::new(320.0, 200.0),
        at: now + ms(1000),
    });
    frames(&mut rl, &mut engine, now, 240);

    let after = engine.frame(0).offset;
    assert!(circular(before.x, after.x, 440.0) < 0.05, "{before:?} vs {after:?}");
    assert!(circular(before.y, after.y, 425.0) < 0.05);
    assert!(
        rl.backend()
            .frames
            .iter()
            .all(|f| f.offset.x.abs() <= 220.0 && f.offset.y.abs() <= 212.5)
    );
}

#[test]
fn failed_images_leave_empty_tiles_but_still_load_in() {
    let mut engine = GridEngine::<Texture>::new(scenario_config(), items(6), 400.0, 300.0, 1.0);
    for effect in engine.drain_effects() {
        if let EngineEffect::FetchResource(ticket) = effect {
            let failed = ticket.key().ends_with("3.jpg");
            let key = ticket.key().to_owned();
            let result = if failed {
                Err(LoadError::Decode("truncated".into()))
            } else {
                Ok(Texture(key))
            };
            engine.complete_load(ticket, result);
        }
    }
    assert!(engine.drain_effects().contains(&EngineEffect::AllSettled));
    let tiles = engine.tiles().expect("tiles");
    let empty = tiles
        .tiles()
        .iter()
        .filter(|t| t.content.handle().is_none())
        .count();
    assert_eq!(empty, 4);
}

#[test]
fn hover_and_tap_drive_cursor_and_navigation() {
    let mut engine = GridEngine::new(scenario_config(), items(20), 400.0, 400.0, 1.0);
    settle(&mut engine);
    // First card of the primary block: world (55, -42.5) at zero offset.
    let card = engine.viewport().world_to_screen(Vec2::new(55.0, -42.5));
    let ms = Duration::from_millis;
    engine.handle_input(GestureInput::PointerMove { pos: card, at: ms(1) });
    engine.handle_input(GestureInput::PointerDown {
        pos: card,
        kind: PointerKind::Mouse,
        has_target: true,
        at: ms(2),
    });
    engine.handle_input(GestureInput::PointerUp { pos: card, at: ms(60) });
    let effects = engine.drain_effects();
    assert_eq!(effects[0], EngineEffect::SetCursor(CursorStyle::Pointer));
    assert!(effects.contains(&EngineEffect::Navigate("/work/0".into())));
    assert_eq!(
        effects.last(),
        Some(&EngineEffect::SetLinkSuppression(false))
    );
}

#[test]
fn breakpoint_rebuild_releases_previous_tiles() {
    let mut engine = GridEngine::new(scenario_config(), items(20), 400.0, 400.0, 1.0);
    settle(&mut engine);
    let mut rl = RenderLoop::new(Recorder::default(), CancelToken::new());
    let now = frames(&mut rl, &mut engine, Duration::ZERO, 2);

    assert!(engine.resize(280.0, 500.0, 2.0));
    assert_eq!(engine.breakpoint(), Breakpoint::Narrow);
    frames(&mut rl, &mut engine, now, 1);
    assert_eq!(rl.backend().released, vec![1]);
    assert_eq!(rl.backend().resizes.last(), Some(&(560, 1000)));
}

#[test]
fn teardown_stops_the_loop() {
    let token = CancelToken::new();
    let mut engine = GridEngine::new(scenario_config(), items(4), 400.0, 400.0, 1.0);
    let mut rl = RenderLoop::new(Recorder::default(), token.clone());
    frames(&mut rl, &mut engine, Duration::ZERO, 1);
    engine.teardown();
    assert_eq!(
        rl.tick(&mut engine, Duration::from_secs(1)),
        Ok(TickOutcome::Cancelled)
    );
    let backend = rl.teardown();
    assert!(token.is_cancelled());
    assert_eq!(backend.drawn.len(), 1);
}
