#![forbid(unsafe_code)]

//! Card captions: the upper-cased title and the tag line drawn over the
//! bottom-left corner of every tile.
//!
//! Positions are relative to the card's top-left corner in CSS pixels with
//! `y` pointing down, the convention of both the 2D context and a baked
//! caption texture. Each line is anchored on its bottom edge.
//!
//! Captions ignore the hover zoom and the grayscale ramp; they only follow
//! the tile's load-in alpha.

use crate::config::CaptionStyle;
use crate::geometry::Vec2;
use crate::item::GridItem;

/// Text of one card, formatted for display.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CardCaption {
    pub title: String,
    pub tags: String,
}

impl CardCaption {
    #[must_use]
    pub fn of(item: &GridItem) -> Self {
        Self {
            title: item.display_title(),
            tags: item.caption(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.title.is_empty() && self.tags.is_empty()
    }
}

/// Where the two lines sit inside a card.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptionLayout {
    /// Bottom-left of the title line.
    pub title: Vec2,
    /// Bottom-left of the tag line.
    pub tags: Vec2,
    /// Width either line may occupy; longer text is condensed to fit.
    pub max_width: f32,
    pub title_size: f32,
    pub tags_size: f32,
}

impl CaptionLayout {
    /// Lay out a caption for a card of `card` size. `None` when the card is
    /// too small to hold both lines inside its padding.
    #[must_use]
    pub fn compute(card: Vec2, style: &CaptionStyle) -> Option<Self> {
        let padding = style.padding.max(0.0);
        let (title_size, tags_size) = (style.title_size.max(0.0), style.tags_size.max(0.0));
        let gap = style.gap.max(0.0);
        let stack = padding + tags_size + gap + title_size;
        let max_width = card.x - 2.0 * padding;
        if !(card.y >= stack) || !(max_width > 0.0) {
            return None;
        }
        let tags_bottom = card.y - padding;
        Some(Self {
            title: Vec2::new(padding, tags_bottom - tags_size - gap),
            tags: Vec2::new(padding, tags_bottom),
            max_width,
            title_size,
            tags_size,
        })
    }
}

/// Opacity of the title and of the tag line for a tile at `alpha`.
#[must_use]
pub fn caption_alpha(alpha: f32, style: &CaptionStyle) -> (f32, f32) {
    let a = if alpha.is_finite() { alpha.clamp(0.0, 1.0) } else { 0.0 };
    (a, a * style.tags_opacity.clamp(0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::ImageSource;
    use pretty_assertions::assert_eq;

    fn item(title: &str, tags: &[&str]) -> GridItem {
        GridItem {
            title: title.into(),
            href: "/x".into(),
            image: ImageSource::Url("/x.jpg".into()),
            tags: tags.iter().map(|t| (*t).to_owned()).collect(),
        }
    }

    #[test]
    fn caption_text_is_formatted() {
        let c = CardCaption::of(&item("Night Bus", &["Film", "2024"]));
        assert_eq!(c.title, "NIGHT BUS");
        assert_eq!(c.tags, "Film — 2024");
        assert!(!c.is_empty());
        assert!(CardCaption::of(&item("", &[])).is_empty());
    }

    #[test]
    fn lines_stack_up_from_the_bottom_padding() {
        let layout = CaptionLayout::compute(Vec2::new(400.0, 300.0), &CaptionStyle::default())
            .expect("fits");
        // Tag line sits on the padding; title sits one tag line plus gap above.
        assert_eq!(layout.tags, Vec2::new(18.0, 282.0));
        assert_eq!(layout.title, Vec2::new(18.0, 266.0));
        assert_eq!(layout.max_width, 364.0);
        assert!(layout.title.y - layout.title_size >= 0.0);
    }

    #[test]
    fn tiny_cards_get_no_caption() {
        let style = CaptionStyle::default();
        assert_eq!(CaptionLayout::compute(Vec2::new(400.0, 40.0), &style), None);
        assert_eq!(CaptionLayout::compute(Vec2::new(30.0, 300.0), &style), None);
        assert_eq!(CaptionLayout::compute(Vec2::new(f32::NAN, 300.0), &style), None);
        assert!(CaptionLayout::compute(Vec2::new(40.0, 46.0), &style).is_some());
    }

    #[test]
    fn tag_line_is_dimmer_than_title() {
        let style = CaptionStyle::default();
        assert_eq!(caption_alpha(1.0, &style), (1.0, 0.6));
        assert_eq!(caption_alpha(0.0, &style), (0.0, 0.0));
        assert_eq!(caption_alpha(f32::NAN, &style), (0.0, 0.0));
        let (title, tags) = caption_alpha(0.5, &style);
        assert_eq!(title, 0.5);
        assert!((tags - 0.3).abs() < 1e-6);
    }
}
