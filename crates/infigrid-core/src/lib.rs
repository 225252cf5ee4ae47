#![forbid(unsafe_code)]

//! Core: wrap-around grid layout, resource settling, gestures, pan state and
//! the per-frame render driver for an infinite media grid.
//!
//! Everything here is host-driven. Callers pass the current monotonic time
//! in as a [`std::time::Duration`] and drain side effects from the engine;
//! nothing in this crate spawns tasks, reads a clock, or touches the DOM.

pub mod animation;
pub mod camera;
pub mod caption;
pub mod cell_window;
pub mod config;
pub mod distortion;
pub mod engine;
pub mod geometry;
pub mod gesture;
pub mod item;
pub mod logging;
pub mod pan;
pub mod post_effect;
pub mod render_loop;
pub mod resource_cache;
pub mod tile_set;

// Re-export tracing macros at crate root for ergonomic use.
#[cfg(feature = "tracing")]
pub use logging::{
    debug, debug_span, error, error_span, info, info_span, trace, trace_span, warn, warn_span,
};

pub use config::GridConfig;
pub use engine::{EngineEffect, GridEngine};
pub use geometry::{GridLayout, Vec2};
pub use item::GridItem;
pub use render_loop::{CancelToken, RenderBackend, RenderLoop};
