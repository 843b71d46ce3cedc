//! Naming and text helpers shared by ingestion and bundling

use regex::Regex;
use std::sync::LazyLock;
use time::Date;

static TAG_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]+>").expect("Valid regex"));

static FILE_NAME_STRIP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\p{L}\p{N}\-_ ()]").expect("Valid regex"));

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("Valid regex"));

/// Label used when no article in a group names an author
pub const VARIOUS_AUTHORS: &str = "Various Authors";

/// Lower-case and collapse whitespace; `None` for blank input
pub fn normalize_author(author: &str) -> Option<String> {
    let collapsed = WHITESPACE.replace_all(author.trim(), " ").to_lowercase();
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}

/// Count words in the text content of an HTML fragment
pub fn count_words(html: &str) -> u32 {
    let text = TAG_PATTERN.replace_all(html, " ");
    text.split_whitespace().count() as u32
}

/// Strip everything but letters, digits, `-`, `_`, spaces and parentheses,
/// then collapse whitespace and trim.
pub fn sanitize_file_name(name: &str) -> String {
    let stripped = FILE_NAME_STRIP.replace_all(name, "");
    WHITESPACE.replace_all(&stripped, " ").trim().to_string()
}

/// Summarize distinct author names in first-seen order.
///
/// Up to `max_listed` names are joined with ", "; beyond that the first two
/// are listed followed by "and N others".
pub fn summarize_authors<'a, I>(authors: I, max_listed: usize) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let mut unique: Vec<&str> = Vec::new();
    for author in authors {
        if !author.trim().is_empty() && !unique.contains(&author) {
            unique.push(author);
        }
    }

    if unique.is_empty() {
        return VARIOUS_AUTHORS.to_string();
    }
    if unique.len() <= max_listed {
        return unique.join(", ");
    }
    format!("{} and {} others", unique[..2].join(", "), unique.len() - 2)
}

/// Base title for a group bundle: "{group} - {authors} - Created {date}"
pub fn bundle_title(group_label: &str, author_summary: &str, created: Date) -> String {
    format!("{} - {} - Created {}", group_label, author_summary, created)
}

/// Title for one part of a split bundle
pub fn part_title(base_title: &str, part_number: usize) -> String {
    format!("{} (Part {})", base_title, part_number)
}

/// Long-form date used in chapter bylines, e.g. "January 5, 2024"
pub fn long_date(date: Date) -> String {
    format!("{} {}, {}", date.month(), date.day(), date.year())
}

/// Render a byte count as megabytes with one decimal
pub fn format_megabytes(bytes: u64) -> String {
    format!("{:.1}", bytes as f64 / 1024.0 / 1024.0)
}
