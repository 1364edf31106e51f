//! Prepares page HTML for the model

use crate::pagination::{collapse_whitespace, visible_text, PageInspector};

/// Builds the content sent to the backend for one page
///
/// Listing elements are serialized with their markup so links survive; when
/// the listing selector matches nothing the page's visible text is used.
/// The result is whitespace-collapsed and cut to `max_chars` characters.
pub fn prepare_content(inspector: &PageInspector, html: &str, max_chars: usize) -> String {
    let fragments = inspector.listing_fragments(html);
    let content = if fragments.is_empty() {
        visible_text(html)
    } else {
        collapse_whitespace(&fragments.join("\n"))
    };
    truncate_chars(content, max_chars)
}

fn truncate_chars(mut text: String, max_chars: usize) -> String {
    if let Some((byte_index, _)) = text.char_indices().nth(max_chars) {
        text.truncate(byte_index);
    }
    text
}
