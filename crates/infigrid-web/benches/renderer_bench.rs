//! Benchmarks for per-frame renderer data preparation.
//!
//! Performance budgets:
//! - Packing 240 tile instances: < 20μs
//! - Canvas 2D source-rect computation per tile: < 50ns
//!
//! Run with: cargo bench -p infigrid-web --bench renderer_bench

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;

use infigrid_core::camera::Viewport;
use infigrid_core::config::{GridConfig, TileStyle};
use infigrid_core::geometry::Vec2;
use infigrid_core::item::{GridItem, ImageSource, ItemId};
use infigrid_core::post_effect::PostParams;
use infigrid_core::render_loop::{FrameParams, TileDraw};
use infigrid_core::tile_set::{TileId, VisualState};
use infigrid_web::canvas_renderer::{MAX_POST_PIXELS, cover_source_rect, post_target_size};
use infigrid_web::renderer::{TileInstance, cover_uv, instances_to_bytes};

fn frame() -> FrameParams {
    let viewport = Viewport::new(1440.0, 900.0, 2.0, 2.0);
    FrameParams {
        index: 0,
        offset: Vec2::new(-37.5, 12.0),
        projection: viewport.projection(),
        viewport,
        post: PostParams::new(&GridConfig::default().post, 0.0, 0.0),
        style: TileStyle::default(),
    }
}

static ITEM: GridItem = GridItem {
    title: String::new(),
    href: String::new(),
    image: ImageSource::Url(String::new()),
    tags: Vec::new(),
};

fn draws(n: usize) -> Vec<TileDraw<'static, ()>> {
    (0..n)
        .map(|i| TileDraw {
            id: TileId {
                duplicate: (i % 4) as u8,
                item: ItemId(i as u32),
            },
            center: Vec2::new((i % 12) as f32 * 320.0, (i / 12) as f32 * -240.0),
            size: Vec2::new(300.0, 225.0),
            visual: VisualState {
                alpha: 1.0,
                grayscale: 1.0,
                overlay_opacity: 0.2,
                scale: 1.0,
            },
            content: None,
            item: &ITEM,
        })
        .collect()
}

fn bench_instance_packing(c: &mut Criterion) {
    let mut group = c.benchmark_group("renderer/instances");
    let frame = frame();
    for n in [24usize, 96, 240] {
        let tiles = draws(n);
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::new("pack", n), &tiles, |b, tiles| {
            b.iter(|| {
                let instances: Vec<TileInstance> = tiles
                    .iter()
                    .map(|t| TileInstance::from_draw(t, &frame, Some((1600, 900))))
                    .collect();
                black_box(instances_to_bytes(&instances))
            });
        });
    }
    group.finish();
}

fn bench_cover(c: &mut Criterion) {
    let mut group = c.benchmark_group("renderer/cover");
    group.bench_function("cover_uv", |b| {
        b.iter(|| black_box(cover_uv(black_box((1600, 900)), black_box([300.0, 225.0]))));
    });
    group.bench_function("cover_source_rect", |b| {
        b.iter(|| {
            black_box(cover_source_rect(
                black_box((1600, 900)),
                black_box([300.0, 225.0]),
                black_box(1.05),
            ))
        });
    });
    group.bench_function("post_target_size", |b| {
        b.iter(|| black_box(post_target_size(black_box((2880, 1800)), MAX_POST_PIXELS)));
    });
    group.finish();
}

criterion_group!(benches, bench_instance_packing, bench_cover);
criterion_main!(benches);
