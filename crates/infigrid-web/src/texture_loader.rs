#![forbid(unsafe_code)]

//! Browser image fetch and decode.
//!
//! Each cache miss becomes one `<img>` element that is decoded off the main
//! thread via `HTMLImageElement.decode()`. Completion is reported back to the
//! engine as a [`LoadError`] or an uploaded handle by the wasm glue.

use infigrid_core::resource_cache::LoadError;

/// Map a DOM exception (`name`, `message`) from `decode()` to a load error.
///
/// `EncodingError` means the bytes arrived but could not be decoded; anything
/// else is treated as a fetch failure.
#[must_use]
pub fn classify_failure(name: &str, message: &str) -> LoadError {
    let detail = if message.is_empty() {
        name.to_owned()
    } else {
        format!("{name}: {message}")
    };
    match name {
        "EncodingError" => LoadError::Decode(detail),
        _ => LoadError::Network(detail),
    }
}

#[cfg(target_arch = "wasm32")]
mod browser {
    use super::*;
    use infigrid_core::render_loop::CancelToken;
    use tracing::{debug, warn};
    use wasm_bindgen::{JsCast, JsValue};
    use wasm_bindgen_futures::JsFuture;
    use web_sys::HtmlImageElement;
    use web_time::Instant;

    fn failure(err: &JsValue) -> LoadError {
        match err.dyn_ref::<js_sys::Error>() {
            Some(e) => classify_failure(
                &String::from(e.name()),
                &String::from(e.message()),
            ),
            None => LoadError::Network(format!("{err:?}")),
        }
    }

    /// Fetch and decode `src`. Resolves to [`LoadError::Cancelled`] when the
    /// token fires before the decode settles.
    pub async fn load_image(
        src: &str,
        cross_origin: Option<&str>,
        cancel: &CancelToken,
    ) -> Result<HtmlImageElement, LoadError> {
        let started = Instant::now();
        let image = HtmlImageElement::new().map_err(|e| failure(&e))?;
        image.set_cross_origin(cross_origin);
        image.set_decoding("async");
        image.set_src(src);

        let decoded = JsFuture::from(image.decode()).await;
        if cancel.is_cancelled() {
            image.set_src("");
            return Err(LoadError::Cancelled);
        }
        match decoded {
            Ok(_) => {
                debug!(
                    src,
                    width = image.natural_width(),
                    height = image.natural_height(),
                    elapsed_ms = started.elapsed().as_secs_f64() * 1000.0,
                    "image decoded"
                );
                Ok(image)
            }
            Err(e) => {
                let err = failure(&e);
                warn!(src, error = %err, "image load failed");
                Err(err)
            }
        }
    }
}

#[cfg(target_arch = "wasm32")]
pub use browser::load_image;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoding_errors_are_decode_failures() {
        assert_eq!(
            classify_failure("EncodingError", "The source image cannot be decoded."),
            LoadError::Decode("EncodingError: The source image cannot be decoded.".into())
        );
    }

    #[test]
    fn other_errors_are_network_failures() {
        assert_eq!(
            classify_failure("NetworkError", ""),
            LoadError::Network("NetworkError".into())
        );
        assert!(matches!(
            classify_failure("SecurityError", "tainted"),
            LoadError::Network(_)
        ));
    }
}
