#![forbid(unsafe_code)]

//! Options accepted by `InfiniGridWeb.init`.
//!
//! ```json
//! {
//!   "items": [{ "title": "…", "href": "/work/1", "image": "/img/1.webp" }],
//!   "config": { "breakpoint_px": 768 },
//!   "renderer": "auto"
//! }
//! ```
//!
//! Every field is optional; `config` is merged over the defaults field by
//! field.

use std::fmt;

use infigrid_core::config::GridConfig;
use infigrid_core::item::GridItem;
use serde::{Deserialize, Serialize};

/// Which backend to bring up.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RendererPreference {
    /// WebGPU when an adapter is available, Canvas 2D otherwise.
    #[default]
    Auto,
    Webgpu,
    Canvas2d,
}

impl RendererPreference {
    #[must_use]
    pub const fn allows_webgpu(self) -> bool {
        matches!(self, Self::Auto | Self::Webgpu)
    }

    #[must_use]
    pub const fn allows_canvas(self) -> bool {
        matches!(self, Self::Auto | Self::Canvas2d)
    }
}

/// Parsed host options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridOptions {
    pub items: Vec<GridItem>,
    pub config: GridConfig,
    pub renderer: RendererPreference,
    /// `crossOrigin` attribute for image requests. `null` omits it.
    pub cross_origin: Option<String>,
    /// Attach pointer, wheel, blur and resize listeners. Hosts that forward
    /// events through `input()` turn this off.
    pub capture_input: bool,
}

impl Default for GridOptions {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            config: GridConfig::default(),
            renderer: RendererPreference::default(),
            cross_origin: Some("anonymous".to_owned()),
            capture_input: true,
        }
    }
}

#[derive(Debug)]
pub enum OptionsError {
    Json(serde_json::Error),
    Invalid(String),
}

impl fmt::Display for OptionsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json(e) => write!(f, "invalid options JSON: {e}"),
            Self::Invalid(msg) => write!(f, "invalid options: {msg}"),
        }
    }
}

impl std::error::Error for OptionsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Json(e) => Some(e),
            Self::Invalid(_) => None,
        }
    }
}

impl From<serde_json::Error> for OptionsError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}

impl GridOptions {
    /// Parse and validate. An empty or whitespace-only string yields defaults.
    pub fn from_json_str(s: &str) -> Result<Self, OptionsError> {
        if s.trim().is_empty() {
            return Ok(Self::default());
        }
        let options: Self = serde_json::from_str(s)?;
        validate_items(&options.items)?;
        Ok(options)
    }

    /// Parse a standalone items array, as passed to `setItems`.
    pub fn items_from_json_str(s: &str) -> Result<Vec<GridItem>, OptionsError> {
        let items: Vec<GridItem> = serde_json::from_str(s)?;
        validate_items(&items)?;
        Ok(items)
    }
}

fn validate_items(items: &[GridItem]) -> Result<(), OptionsError> {
    if u32::try_from(items.len()).is_err() {
        return Err(OptionsError::Invalid(format!("{} items is too many", items.len())));
    }
    if let Some(index) = items.iter().position(|i| i.image.src().trim().is_empty()) {
        return Err(OptionsError::Invalid(format!("item {index} has an empty image src")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use infigrid_core::config::Breakpoint;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_input_gives_defaults_with_anonymous_cors() {
        let opts = GridOptions::from_json_str("  ").expect("parse");
        assert!(opts.items.is_empty());
        assert_eq!(opts.renderer, RendererPreference::Auto);
        assert_eq!(opts.cross_origin.as_deref(), Some("anonymous"));
        assert!(opts.capture_input);
        assert_eq!(opts.config, GridConfig::default());
    }

    #[test]
    fn partial_config_merges_over_defaults() {
        let opts = GridOptions::from_json_str(
            r#"{
                "items": [
                    {"title": "One", "href": "/1", "image": "/1.jpg"},
                    {"title": "Two", "href": "/2", "image": {"src": "/2.jpg", "alt": "two"}, "tags": ["a"]}
                ],
                "config": {"breakpoint_px": 500},
                "renderer": "canvas2d"
            }"#,
        )
        .expect("parse");
        assert_eq!(opts.items.len(), 2);
        assert_eq!(opts.items[1].image.alt(), Some("two"));
        assert_eq!(opts.config.breakpoint_px, 500.0);
        assert_eq!(opts.config.breakpoint_for(499.0), Breakpoint::Narrow);
        assert_eq!(opts.config.wide, GridConfig::default().wide);
        assert_eq!(opts.renderer, RendererPreference::Canvas2d);
        assert!(!opts.renderer.allows_webgpu());
    }

    #[test]
    fn explicit_null_cross_origin_is_kept() {
        let opts = GridOptions::from_json_str(r#"{"cross_origin": null, "capture_input": false}"#)
            .expect("parse");
        assert_eq!(opts.cross_origin, None);
        assert!(!opts.capture_input);
    }

    #[test]
    fn empty_image_src_is_rejected() {
        let err = GridOptions::from_json_str(
            r#"{"items":[{"title":"x","href":"/x","image":"  "}]}"#,
        )
        .expect_err("must fail");
        assert!(matches!(err, OptionsError::Invalid(ref m) if m.contains("item 0")));
    }

    #[test]
    fn malformed_json_reports_json_error() {
        let err = GridOptions::from_json_str("{").expect_err("must fail");
        assert!(matches!(err, OptionsError::Json(_)));
        assert!(err.to_string().starts_with("invalid options JSON"));
    }

    #[test]
    fn items_array_parses_alone() {
        let items =
            GridOptions::items_from_json_str(r#"[{"title":"a","href":"/a","image":"/a.png"}]"#)
                .expect("parse");
        assert_eq!(items[0].title, "a");
    }
}
