/*
 * lilmail - email/sanitize.rs
 *
 * Copyright 2017 Manos Pitsidianakis
 *
 * This file is part of lilmail.
 *
 * lilmail is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * lilmail is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with lilmail. If not, see <http://www.gnu.org/licenses/>.
 */

//! HTML bodies: allow-list sanitization, tag stripping and previews.
//!
//! Sanitization goes through an [`ammonia::Builder`] configured once with
//! the allowed elements, attributes and URL schemes. Text extraction renders
//! the sanitized document with [`html2text`] and no decorations.

use std::{
    borrow::Cow,
    collections::{HashMap, HashSet},
    sync::OnceLock,
};

use ammonia::UrlRelative;
use html2text::render::text_renderer::TrivialDecorator;
use unicode_segmentation::UnicodeSegmentation;

/// Maximum preview length in characters, not counting the ellipsis.
pub const PREVIEW_LEN: usize = 150;

/// Line width used when rendering HTML to text. Lines are joined again
/// afterwards, so it only has to be wide enough not to split words.
const RENDER_WIDTH: usize = 1024;

const ALLOWED_ELEMENTS: &[&str] = &[
    "p", "br", "div", "span", "h1", "h2", "h3", "h4", "h5", "h6", "hr", "strong", "em", "b", "i",
    "u", "s", "code", "pre", "sub", "sup", "ul", "ol", "li", "dl", "dt", "dd", "blockquote", "del",
    "ins", "a", "img", "table", "thead", "tbody", "tfoot", "tr", "th", "td", "caption",
];

/// Elements whose whole content is removed, not just the tags.
const DROP_CONTENT_ELEMENTS: &[&str] = &[
    "script", "style", "head", "title", "iframe", "object", "embed", "noscript", "template",
    "textarea",
];

const GLOBAL_ATTRIBUTES: &[&str] = &["class", "id"];

const ELEMENT_ATTRIBUTES: &[(&str, &[&str])] = &[
    ("a", &["href"]),
    ("img", &["src", "alt", "title", "width", "height"]),
    ("span", &["style"]),
    ("div", &["style"]),
    ("p", &["style"]),
];

const URL_SCHEMES: &[&str] = &["http", "https", "mailto"];

fn safe_style(style: &str) -> bool {
    let lower = style.to_ascii_lowercase();
    !["expression", "url(", "javascript:", "@import", "behavior", "-moz-binding"]
        .iter()
        .any(|bad| lower.contains(bad))
}

fn filter_attribute<'u>(_element: &str, attribute: &str, value: &'u str) -> Option<Cow<'u, str>> {
    if attribute == "style" && !safe_style(value) {
        return None;
    }
    Some(Cow::Borrowed(value))
}

fn cleaner() -> &'static ammonia::Builder<'static> {
    static CLEANER: OnceLock<ammonia::Builder<'static>> = OnceLock::new();
    CLEANER.get_or_init(|| {
        let mut builder = ammonia::Builder::empty();
        builder
            .tags(ALLOWED_ELEMENTS.iter().copied().collect())
            .clean_content_tags(DROP_CONTENT_ELEMENTS.iter().copied().collect())
            .generic_attributes(GLOBAL_ATTRIBUTES.iter().copied().collect())
            .tag_attributes(
                ELEMENT_ATTRIBUTES
                    .iter()
                    .map(|(tag, attrs)| (*tag, attrs.iter().copied().collect::<HashSet<_>>()))
                    .collect::<HashMap<_, _>>(),
            )
            .url_schemes(URL_SCHEMES.iter().copied().collect())
            .url_relative(UrlRelative::PassThrough)
            .link_rel(Some("nofollow"))
            .strip_comments(true)
            .attribute_filter(filter_attribute);
        builder
    })
}

/// Sanitize an HTML fragment against the allow-list.
pub fn sanitize_html(input: &str) -> String {
    cleaner().clean(input).to_string()
}

/// Reduce HTML to its text. Scripts and styles lose their content, block
/// boundaries become spaces and character references are decoded.
pub fn strip_tags(input: &str) -> String {
    let clean = sanitize_html(input);
    let text =
        html2text::from_read_with_decorator(clean.as_bytes(), RENDER_WIDTH, TrivialDecorator::new());
    collapse_whitespace(&text)
}

fn collapse_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// A one-line summary of `text`: whitespace is collapsed and anything past
/// [`PREVIEW_LEN`] characters is cut at the last word boundary and marked
/// with `...`.
pub fn preview(text: &str) -> String {
    let text = collapse_whitespace(text);
    let graphemes: Vec<(usize, &str)> = text.grapheme_indices(true).collect();
    if graphemes.len() <= PREVIEW_LEN {
        return text;
    }
    let cut = graphemes[PREVIEW_LEN].0;
    let head = &text[..cut];
    match head.rfind(' ') {
        Some(i) if i > 0 => format!("{}...", &head[..i]),
        _ => format!("{}...", head),
    }
}
