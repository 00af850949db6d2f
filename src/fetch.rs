//! Upstream JSON snapshot download with an on-disk cache

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::types::RawUpstreamRow;

const USER_AGENT: &str = "Mozilla/5.0 (compatible; IchraPremiumExporter/1.0)";
const FETCH_TIMEOUT: Duration = Duration::from_secs(60);

pub fn parse_rows(content: &str) -> Result<Vec<RawUpstreamRow>> {
    serde_json::from_str(content).context("Failed to parse upstream premium JSON")
}

/// Read the cached snapshot, or download it from `url` and cache it at `cache_path`
pub fn load_or_fetch(cache_path: &Path, url: &str) -> Result<Vec<RawUpstreamRow>> {
    if cache_path.exists() {
        println!("Loading from cache: {}", cache_path.display());
        let content = fs::read_to_string(cache_path)
            .with_context(|| format!("Failed to read cache: {:?}", cache_path))?;
        return parse_rows(&content)
            .with_context(|| format!("Failed to parse cached JSON: {:?}", cache_path));
    }

    println!("Fetching data from {}...", url);
    let client = reqwest::blocking::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(FETCH_TIMEOUT)
        .build()?;

    let text = client
        .get(url)
        .send()
        .and_then(|r| r.error_for_status())
        .with_context(|| format!("Failed to fetch: {}", url))?
        .text()
        .with_context(|| format!("Failed to read response: {}", url))?;

    let rows = parse_rows(&text).with_context(|| format!("Failed to parse JSON: {}", url))?;

    println!("Caching to: {}", cache_path.display());
    if let Some(parent) = cache_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(cache_path, &text)
        .with_context(|| format!("Failed to write cache: {:?}", cache_path))?;

    Ok(rows)
}

/// Read a snapshot that an earlier `counties` run must have cached.
/// A missing file is `Ok(None)` so callers can report it and stop.
pub fn load_cached(cache_path: &Path) -> Result<Option<Vec<RawUpstreamRow>>> {
    if !cache_path.exists() {
        return Ok(None);
    }
    println!("Loading from: {}", cache_path.display());
    let content = fs::read_to_string(cache_path)
        .with_context(|| format!("Failed to read cache: {:?}", cache_path))?;
    parse_rows(&content).map(Some)
}
