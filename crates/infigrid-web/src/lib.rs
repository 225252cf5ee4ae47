#![forbid(unsafe_code)]

//! WASM frontend for the infinite media grid.
//!
//! This crate is host-specific (web/WASM). It provides a `wasm-bindgen` API
//! surface that:
//! - brings up a WebGPU renderer, falling back to Canvas 2D,
//! - captures pointer, wheel and focus events (or accepts them as JSON),
//! - fetches and decodes item images and hands them to the engine,
//! - drives the frame loop from `requestAnimationFrame`.
//!
//! Layout, gestures and animation live in `infigrid-core`; the modules here
//! that do not touch the DOM are platform-agnostic and tested natively.

pub mod canvas_renderer;
pub mod input;
pub mod lifecycle;
pub mod logging;
pub mod options;
pub mod renderer;
pub mod texture_loader;

#[cfg(target_arch = "wasm32")]
mod wasm;

#[cfg(target_arch = "wasm32")]
pub use wasm::InfiniGridWeb;

/// Native builds compile this crate as a stub so `cargo check --workspace` stays
/// green on non-wasm targets.
#[cfg(not(target_arch = "wasm32"))]
#[derive(Debug, Default)]
pub struct InfiniGridWeb;

#[cfg(not(target_arch = "wasm32"))]
impl InfiniGridWeb {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self
    }
}
