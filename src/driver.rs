//! Drives the live premium map: load, set filters, detect the map type, scan.

use anyhow::{Context, Result};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

use crate::browser::{ChromiumMap, LaunchOptions, MapPage, MapSession, Rect};
use crate::output::write_scraped_csv;
use crate::scan::{detect_plan, run_plan, ScanConfig};
use crate::types::{MetalTier, PremiumRecord, TooltipSample};
use crate::utils::osc8_file_link;
use crate::MAP_URL;

const NAV_TIMEOUT: Duration = Duration::from_secs(60);
const CONTROLS_TIMEOUT: Duration = Duration::from_secs(30);

const CONTROLS_READY: &str = "document.querySelector('#ichra-year') !== null \
     || document.body.innerText.includes('Individual vs Small Group')";

/// Elements whose box bounds the hoverable map, best first
const SURFACE_SELECTORS: &[&str] = &["#ichra-map", "canvas"];

/// The (year, age, metal) slice shown on the map
#[derive(Debug, Clone, Copy)]
pub struct MapFilters {
    pub year: i32,
    pub age: u8,
    pub metal: MetalTier,
}

impl MapFilters {
    /// (label, select element, option value); the year dropdown is keyed by offset from 2000
    fn selections(&self) -> [(&'static str, &'static str, String); 3] {
        [
            ("year", "#ichra-year", (self.year - 2000).to_string()),
            ("age", "#ichra-age", self.age.to_string()),
            ("metal", "#ichra-metal", self.metal.as_str().to_string()),
        ]
    }
}

/// Load the map page, apply the filters and scroll the map into view.
/// A filter that cannot be set is reported and skipped.
pub async fn prepare_map(map: &ChromiumMap, filters: &MapFilters, scroll: i64) -> Result<()> {
    println!("Loading page...");
    map.open(MAP_URL, NAV_TIMEOUT).await?;
    println!("Page loaded.");

    if !map.wait_for(CONTROLS_READY, CONTROLS_TIMEOUT).await? {
        warn!("Map controls did not appear within {}s", CONTROLS_TIMEOUT.as_secs());
    }
    tokio::time::sleep(Duration::from_secs(2)).await;

    println!(
        "Setting filters: Year={}, Age={}, Metal={}",
        filters.year,
        filters.age,
        filters.metal.label()
    );
    for (label, selector, value) in filters.selections() {
        if let Err(e) = map.select_option(selector, &value).await {
            println!("Warning: Could not set {} filter: {:#}", label, e);
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
    tokio::time::sleep(Duration::from_secs(2)).await;

    map.scroll_by(scroll).await?;
    tokio::time::sleep(Duration::from_secs(1)).await;
    Ok(())
}

/// Box of the hoverable map area, if the page has one
pub async fn find_surface(page: &dyn MapPage) -> Option<Rect> {
    for selector in SURFACE_SELECTORS {
        match page.bounding_box(selector).await {
            Ok(Some(rect)) if !rect.is_degenerate() => {
                info!("Map surface {} at {:.0}x{:.0}", selector, rect.width, rect.height);
                return Some(rect);
            }
            Ok(_) => {}
            Err(e) => warn!("bounding box for {selector} failed: {e:#}"),
        }
    }
    None
}

/// Detect the map technology and scan it exhaustively
pub async fn scan_map(page: &dyn MapPage) -> Vec<TooltipSample> {
    let (plan, paths, canvases) = detect_plan(page).await;
    println!("Detected: {} SVG paths, {} canvas elements", paths, canvases);
    println!("Scan plan: {:?}", plan);

    let surface = find_surface(page).await;
    run_plan(page, plan, surface, &ScanConfig::exhaustive()).await
}

/// Launch a browser, scrape one slice of the map, and always close the browser
async fn scrape_live(filters: &MapFilters, debug: bool) -> Result<Vec<TooltipSample>> {
    let session = MapSession::launch(&LaunchOptions {
        headless: !debug,
        width: 1920,
        height: 1080,
    })
    .await?;

    let result = match prepare_map(session.map(), filters, 400).await {
        Ok(()) => Ok(scan_map(session.map()).await),
        Err(e) => Err(e),
    };

    if let Err(e) = session.close().await {
        warn!("{e:#}");
    }
    result
}

/// Keep only records from one state (case-insensitive)
pub fn filter_state(records: Vec<PremiumRecord>, state: &str) -> Vec<PremiumRecord> {
    records
        .into_iter()
        .filter(|r| r.state.eq_ignore_ascii_case(state))
        .collect()
}

pub fn run_scrape(filters: MapFilters, output: &str, state: Option<String>, debug: bool) -> Result<()> {
    println!("\n{}", "=".repeat(60));
    println!("Ideon ICHRA Map Scraper");
    println!("{}", "=".repeat(60));
    println!("URL: {}", MAP_URL);
    println!(
        "Parameters: Year={}, Age={}, Metal={}",
        filters.year,
        filters.age,
        filters.metal.as_str()
    );
    println!("Output: {}", output);
    println!("{}\n", "=".repeat(60));

    let started = chrono::Local::now();

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    let samples = runtime.block_on(scrape_live(&filters, debug))?;

    let mut records: Vec<PremiumRecord> = samples
        .into_iter()
        .map(|s| PremiumRecord::from_sample(s, filters.year, filters.age, filters.metal))
        .collect();

    if let Some(state) = state {
        records = filter_state(records, &state);
        println!("Filtered to {} counties in {}", records.len(), state.to_uppercase());
    }

    let written = write_scraped_csv(&records, Path::new(output))?;
    if written > 0 {
        println!("\nWrote {} rows to {}", written, osc8_file_link(output, output));
    }

    let elapsed = chrono::Local::now() - started;
    println!(
        "\nCompleted in {:.1} seconds",
        elapsed.num_milliseconds() as f64 / 1000.0
    );
    println!("Found {} unique counties", records.len());
    Ok(())
}
