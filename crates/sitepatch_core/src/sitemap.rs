//! Sitemap generation per the sitemaps.org protocol.
//!
//! Walks the HTML corpus and emits a `urlset` document:
//!
//! ```xml
//! <?xml version="1.0" encoding="UTF-8"?>
//! <urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
//!   <url>
//!     <loc>https://example.com/a.html</loc>
//!     <lastmod>2025-01-01</lastmod>
//!   </url>
//! </urlset>
//! ```

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::engine::write_atomic;
use crate::walker::{
    WalkEvent, WalkOptions, ensure_roots_exist, relative_to_root, walk_documents,
};

const SITEMAP_NS: &str = "http://www.sitemaps.org/schemas/sitemap/0.9";

#[derive(Debug, Clone)]
pub struct SitemapOptions {
    pub base_url: String,
    pub changefreq: Option<String>,
    pub priority: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SitemapEntry {
    pub loc: String,
    pub lastmod: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SitemapReport {
    pub entries: usize,
    pub duplicates: usize,
    pub walk_errors: usize,
    pub output: PathBuf,
}

/// Collect one entry per unique URL, sorted by location. A walk that
/// visits the same document twice (or two paths mapping to one URL)
/// contributes a single entry; mtime read failures fall back to today.
pub fn collect_entries(
    walk: &WalkOptions,
    options: &SitemapOptions,
) -> Result<(Vec<SitemapEntry>, usize, usize)> {
    ensure_roots_exist(walk)?;

    let base = options.base_url.trim_end_matches('/');
    let mut by_loc: BTreeMap<String, String> = BTreeMap::new();
    let mut duplicates = 0usize;
    let mut walk_errors = 0usize;

    for event in walk_documents(walk) {
        match event {
            WalkEvent::Document { root, path } => {
                let relative = relative_to_root(&root, &path);
                let loc = format!("{base}/{relative}");
                if by_loc.contains_key(&loc) {
                    duplicates += 1;
                    continue;
                }
                by_loc.insert(loc, last_modified_date(&path));
            }
            WalkEvent::Failed { .. } => walk_errors += 1,
        }
    }

    let entries = by_loc
        .into_iter()
        .map(|(loc, lastmod)| SitemapEntry { loc, lastmod })
        .collect();
    Ok((entries, duplicates, walk_errors))
}

/// Build the sitemap over the corpus and write it atomically.
pub fn build_sitemap(
    walk: &WalkOptions,
    options: &SitemapOptions,
    output: &Path,
) -> Result<SitemapReport> {
    let (entries, duplicates, walk_errors) = collect_entries(walk, options)?;
    let xml = render_xml(&entries, options);
    write_atomic(output, &xml)?;
    Ok(SitemapReport {
        entries: entries.len(),
        duplicates,
        walk_errors,
        output: output.to_path_buf(),
    })
}

pub fn render_xml(entries: &[SitemapEntry], options: &SitemapOptions) -> String {
    let mut xml = String::with_capacity(4096);

    xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    xml.push_str("<urlset xmlns=\"");
    xml.push_str(SITEMAP_NS);
    xml.push_str("\">\n");

    for entry in entries {
        xml.push_str("  <url>\n    <loc>");
        xml.push_str(&escape_xml(&entry.loc));
        xml.push_str("</loc>\n    <lastmod>");
        xml.push_str(&entry.lastmod);
        xml.push_str("</lastmod>\n");
        if let Some(changefreq) = &options.changefreq {
            xml.push_str("    <changefreq>");
            xml.push_str(&escape_xml(changefreq));
            xml.push_str("</changefreq>\n");
        }
        if let Some(priority) = &options.priority {
            xml.push_str("    <priority>");
            xml.push_str(&escape_xml(priority));
            xml.push_str("</priority>\n");
        }
        xml.push_str("  </url>\n");
    }

    xml.push_str("</urlset>\n");
    xml
}

/// Filesystem mtime as `YYYY-MM-DD`, falling back to today when the
/// metadata cannot be read.
fn last_modified_date(path: &Path) -> String {
    let modified = fs::metadata(path).and_then(|meta| meta.modified());
    let timestamp: DateTime<Utc> = match modified {
        Ok(time) => time.into(),
        Err(_) => Utc::now(),
    };
    timestamp.format("%Y-%m-%d").to_string()
}

/// Escape reserved XML characters, borrowing when nothing needs escaping.
fn escape_xml(value: &str) -> Cow<'_, str> {
    if !value.contains(['&', '<', '>', '"', '\'']) {
        return Cow::Borrowed(value);
    }

    Cow::Owned(
        value
            .replace('&', "&amp;")
            .replace('<', "&lt;")
            .replace('>', "&gt;")
            .replace('"', "&quot;")
            .replace('\'', "&apos;"),
    )
}
