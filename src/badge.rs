//! Shields-style "docs | <status>" SVG badges.

use crate::registry::BuildStatus;

pub const CONTENT_TYPE: &str = "image/svg+xml";

struct Style {
    color: &'static str,
    /// Total badge width in px; the "docs" label is always 35px.
    width: u32,
    /// Status text centre and length, in the 10x-scaled text space.
    text_x: u32,
    text_len: u32,
}

fn style(status: BuildStatus) -> Style {
    match status {
        BuildStatus::Passing => Style {
            color: "#4c1",
            width: 86,
            text_x: 595,
            text_len: 410,
        },
        BuildStatus::Failing => Style {
            color: "#e05d44",
            width: 78,
            text_x: 555,
            text_len: 330,
        },
        BuildStatus::Unknown => Style {
            color: "#dfb317",
            width: 96,
            text_x: 645,
            text_len: 510,
        },
    }
}

/// SVG document for a build status.
pub fn svg_for(status: BuildStatus) -> String {
    let Style {
        color,
        width,
        text_x,
        text_len,
    } = style(status);
    let right = width - 35;
    let text = status.as_str();
    format!(
        concat!(
            r##"<svg xmlns="http://www.w3.org/2000/svg" xmlns:xlink="http://www.w3.org/1999/xlink" width="{w}" height="20">"##,
            r##"<linearGradient id="b" x2="0" y2="100%"><stop offset="0" stop-color="#bbb" stop-opacity=".1"/><stop offset="1" stop-opacity=".1"/></linearGradient>"##,
            r##"<clipPath id="a"><rect width="{w}" height="20" rx="3" fill="#fff"/></clipPath>"##,
            r##"<g clip-path="url(#a)"><path fill="#555" d="M0 0h35v20H0z"/><path fill="{color}" d="M35 0h{right}v20H35z"/><path fill="url(#b)" d="M0 0h{w}v20H0z"/></g>"##,
            r##"<g fill="#fff" text-anchor="middle" font-family="DejaVu Sans,Verdana,Geneva,sans-serif" font-size="110">"##,
            r##"<text x="185" y="150" fill="#010101" fill-opacity=".3" transform="scale(.1)" textLength="250">docs</text>"##,
            r##"<text x="185" y="140" transform="scale(.1)" textLength="250">docs</text>"##,
            r##"<text x="{x}" y="150" fill="#010101" fill-opacity=".3" transform="scale(.1)" textLength="{len}">{text}</text>"##,
            r##"<text x="{x}" y="140" transform="scale(.1)" textLength="{len}">{text}</text></g></svg>"##,
        ),
        w = width,
        color = color,
        right = right,
        x = text_x,
        len = text_len,
        text = text,
    )
}
