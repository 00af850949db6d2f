//! Hover scanning over the premium map.
//!
//! The map is either an SVG choropleth (one path per county) or a canvas. SVG
//! maps are scanned path by path; canvas maps get a pointer sweep over a
//! coordinate grid. Both feed parsed tooltips through a [`Deduplicator`].

use std::time::Duration;
use tracing::{debug, info, warn};

use crate::browser::{read_tooltip, MapPage, Rect, CANVAS_SELECTOR, PATH_SELECTOR};
use crate::dedup::Deduplicator;
use crate::tooltip::parse_tooltip;
use crate::types::TooltipSample;

/// More paths than this means the map is drawn as SVG county shapes
pub const PATH_COUNT_THRESHOLD: usize = 100;
/// A path scan that finds fewer counties than this falls back to the grid
pub const MIN_PATH_RESULTS: usize = 50;

/// How one surface is swept
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStrategy {
    PathScan,
    GridScan,
}

/// Strategy chosen from what the page rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanPlan {
    Single(ScanStrategy),
    /// Rendering could not be identified: paths first, grid when they come up short
    PathThenGrid,
}

pub fn select_strategy(path_count: usize, canvas_count: usize) -> ScanPlan {
    if path_count > PATH_COUNT_THRESHOLD {
        ScanPlan::Single(ScanStrategy::PathScan)
    } else if canvas_count > 0 {
        ScanPlan::Single(ScanStrategy::GridScan)
    } else {
        ScanPlan::PathThenGrid
    }
}

/// Count the map's paths and canvases and pick a plan. Failed lookups count as zero.
pub async fn detect_plan(page: &dyn MapPage) -> (ScanPlan, usize, usize) {
    let paths = page.count(PATH_SELECTOR).await.unwrap_or_else(|e| {
        debug!("path count failed: {e:#}");
        0
    });
    let canvases = page.count(CANVAS_SELECTOR).await.unwrap_or_else(|e| {
        debug!("canvas count failed: {e:#}");
        0
    });
    (select_strategy(paths, canvases), paths, canvases)
}

#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Pixels between grid points, both axes
    pub grid_step: u32,
    /// Margin kept clear of the surface edges
    pub grid_inset: u32,
    /// Minimum wait after a pointer move before reading the tooltip
    pub grid_settle: Duration,
    pub path_settle: Duration,
    /// Extra polling allowed after the settle floor
    pub tooltip_timeout: Duration,
    /// Stop once this many distinct counties are collected
    pub sample_limit: Option<usize>,
}

impl ScanConfig {
    /// Dense sweep for a full export
    pub fn exhaustive() -> Self {
        Self {
            grid_step: 8,
            grid_inset: 0,
            grid_settle: Duration::from_millis(50),
            path_settle: Duration::from_millis(150),
            tooltip_timeout: Duration::from_millis(50),
            sample_limit: None,
        }
    }

    /// Sparse sweep that stops after `limit` counties, for spot checks
    pub fn sampling(limit: usize) -> Self {
        Self {
            grid_step: 15,
            grid_inset: 20,
            grid_settle: Duration::from_millis(30),
            path_settle: Duration::from_millis(150),
            tooltip_timeout: Duration::from_millis(30),
            sample_limit: Some(limit),
        }
    }

    fn limit_reached(&self, found: usize) -> bool {
        self.sample_limit.is_some_and(|limit| found >= limit)
    }
}

/// Row-major grid over `rect`, `inset` pixels in from each edge
pub fn grid_points(rect: &Rect, step: u32, inset: u32) -> Vec<(f64, f64)> {
    let step = step.max(1) as usize;
    let inset = inset as i64;
    let x0 = rect.x as i64 + inset;
    let x1 = (rect.x + rect.width) as i64 - inset;
    let y0 = rect.y as i64 + inset;
    let y1 = (rect.y + rect.height) as i64 - inset;

    let mut points = Vec::new();
    for y in (y0..y1).step_by(step) {
        for x in (x0..x1).step_by(step) {
            points.push((x as f64, y as f64));
        }
    }
    points
}

async fn probe(page: &dyn MapPage, x: f64, y: f64, settle: Duration, timeout: Duration) -> Option<TooltipSample> {
    if let Err(e) = page.move_pointer(x, y).await {
        debug!("pointer move to ({x},{y}) failed: {e:#}");
        return None;
    }
    let text = read_tooltip(page, settle, timeout).await?;
    parse_tooltip(&text)
}

/// Hover the center of every visible county path
pub async fn scan_paths(page: &dyn MapPage, config: &ScanConfig, dedup: &mut Deduplicator) {
    let total = match page.count(PATH_SELECTOR).await {
        Ok(n) => n,
        Err(e) => {
            warn!("could not list map paths: {e:#}");
            return;
        }
    };
    info!("Found {} SVG paths to process", total);

    for i in 0..total {
        if config.limit_reached(dedup.len()) {
            break;
        }

        let rect = match page.path_box(i).await {
            Ok(Some(rect)) if !rect.is_degenerate() => rect,
            Ok(_) => continue,
            Err(e) => {
                debug!("path {i}: {e:#}");
                continue;
            }
        };

        let (x, y) = rect.center();
        if let Some(sample) = probe(page, x, y, config.path_settle, config.tooltip_timeout).await {
            if dedup.offer(sample) && dedup.len() % 100 == 0 {
                info!("  Scraped {} counties...", dedup.len());
            }
        }

        if i % 50 == 0 {
            debug!("  Progress: {}/{} paths checked, {} counties found", i, total, dedup.len());
        }
    }
}

/// Sweep the pointer across `surface` on a fixed grid
pub async fn scan_grid(page: &dyn MapPage, surface: &Rect, config: &ScanConfig, dedup: &mut Deduplicator) {
    let points = grid_points(surface, config.grid_step, config.grid_inset);
    info!(
        "Scanning {} points across {:.0}x{:.0} map...",
        points.len(),
        surface.width,
        surface.height
    );

    for (checked, (x, y)) in points.into_iter().enumerate() {
        if config.limit_reached(dedup.len()) {
            break;
        }

        if let Some(sample) = probe(page, x, y, config.grid_settle, config.tooltip_timeout).await {
            if dedup.offer(sample) && dedup.len() % 50 == 0 {
                info!("  Found {} unique counties...", dedup.len());
            }
        }

        if (checked + 1) % 5000 == 0 {
            info!("  Scanned {} points, found {} counties", checked + 1, dedup.len());
        }
    }
}

/// Run a plan to completion. `surface` is the grid area; without one the grid
/// step is skipped.
///
/// When `PathThenGrid` falls back to the grid, the counties the path scan
/// already found are kept and the grid only adds new ones.
pub async fn run_plan(
    page: &dyn MapPage,
    plan: ScanPlan,
    surface: Option<Rect>,
    config: &ScanConfig,
) -> Vec<TooltipSample> {
    let mut dedup = Deduplicator::new();

    match plan {
        ScanPlan::Single(ScanStrategy::PathScan) => scan_paths(page, config, &mut dedup).await,
        ScanPlan::Single(ScanStrategy::GridScan) => {
            scan_surface(page, surface, config, &mut dedup).await
        }
        ScanPlan::PathThenGrid => {
            scan_paths(page, config, &mut dedup).await;
            if dedup.len() < MIN_PATH_RESULTS && !config.limit_reached(dedup.len()) {
                info!(
                    "Path scan found only {} counties, falling back to grid scan",
                    dedup.len()
                );
                scan_surface(page, surface, config, &mut dedup).await;
            }
        }
    }

    if dedup.is_empty() {
        warn!("No counties found on the map");
    }
    dedup.into_samples()
}

async fn scan_surface(
    page: &dyn MapPage,
    surface: Option<Rect>,
    config: &ScanConfig,
    dedup: &mut Deduplicator,
) {
    match surface {
        Some(rect) => scan_grid(page, &rect, config, dedup).await,
        None => warn!("Could not find a map surface for the grid scan"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::fake::FakeMapPage;

    fn quick(limit: Option<usize>) -> ScanConfig {
        ScanConfig {
            grid_step: 10,
            grid_inset: 0,
            grid_settle: Duration::ZERO,
            path_settle: Duration::ZERO,
            tooltip_timeout: Duration::ZERO,
            sample_limit: limit,
        }
    }

    fn rect(x: f64, y: f64, width: f64, height: f64) -> Rect {
        Rect { x, y, width, height }
    }

    fn tip(county: &str, state: &str, individual: &str) -> String {
        format!(
            "{county}, {state} Diff (Ind – Small): $1.00 Individual: ${individual} Small Group: $2.00"
        )
    }

    /// 4x4 board of 10px counties, each with its own tooltip
    fn checkerboard() -> FakeMapPage {
        let mut regions = Vec::new();
        for row in 0..4 {
            for col in 0..4 {
                regions.push((
                    rect(col as f64 * 10.0, row as f64 * 10.0, 10.0, 10.0),
                    tip(&format!("County {row}{col}"), "TX", "100.00"),
                ));
            }
        }
        FakeMapPage {
            regions,
            ..Default::default()
        }
    }

    #[test]
    fn test_select_strategy() {
        assert_eq!(select_strategy(101, 0), ScanPlan::Single(ScanStrategy::PathScan));
        assert_eq!(select_strategy(3000, 1), ScanPlan::Single(ScanStrategy::PathScan));
        assert_eq!(select_strategy(100, 1), ScanPlan::Single(ScanStrategy::GridScan));
        assert_eq!(select_strategy(100, 0), ScanPlan::PathThenGrid);
        assert_eq!(select_strategy(0, 0), ScanPlan::PathThenGrid);
    }

    #[test]
    fn test_grid_points_row_major() {
        let points = grid_points(&rect(0.0, 0.0, 20.0, 16.0), 8, 0);
        assert_eq!(
            points,
            vec![(0.0, 0.0), (8.0, 0.0), (16.0, 0.0), (0.0, 8.0), (8.0, 8.0), (16.0, 8.0)]
        );
    }

    #[test]
    fn test_grid_points_inset() {
        let points = grid_points(&rect(100.0, 50.0, 70.0, 55.0), 15, 20);
        assert_eq!(points, vec![(120.0, 70.0), (135.0, 70.0)]);
        assert!(grid_points(&rect(0.0, 0.0, 30.0, 30.0), 15, 20).is_empty());
    }

    #[tokio::test]
    async fn test_detect_plan_counts_elements() {
        let mut page = FakeMapPage::default();
        page.counts.insert(CANVAS_SELECTOR.to_string(), 1);
        page.counts.insert(PATH_SELECTOR.to_string(), 12);
        let (plan, paths, canvases) = detect_plan(&page).await;
        assert_eq!(plan, ScanPlan::Single(ScanStrategy::GridScan));
        assert_eq!((paths, canvases), (12, 1));
    }

    #[tokio::test]
    async fn test_grid_scan_collects_each_county_once() {
        let page = checkerboard();
        let surface = rect(0.0, 0.0, 40.0, 40.0);
        let mut config = quick(None);
        config.grid_step = 5;

        let samples = run_plan(&page, ScanPlan::Single(ScanStrategy::GridScan), Some(surface), &config).await;

        assert_eq!(samples.len(), 16);
        assert_eq!(page.move_count(), 64);
        assert_eq!(samples[0].county, "County 00");
        assert_eq!(samples[1].county, "County 01");
        assert_eq!(samples[4].county, "County 10");
    }

    #[tokio::test]
    async fn test_grid_scan_stops_at_sample_limit() {
        let page = checkerboard();
        let surface = rect(0.0, 0.0, 40.0, 40.0);

        let samples = run_plan(&page, ScanPlan::Single(ScanStrategy::GridScan), Some(surface), &quick(Some(5))).await;

        assert_eq!(samples.len(), 5);
        assert_eq!(page.move_count(), 5);
    }

    #[tokio::test]
    async fn test_grid_scan_survives_point_failures() {
        let mut page = checkerboard();
        page.fail_moves_at = vec![(0.0, 0.0), (10.0, 0.0)];
        let surface = rect(0.0, 0.0, 40.0, 40.0);

        let samples = run_plan(&page, ScanPlan::Single(ScanStrategy::GridScan), Some(surface), &quick(None)).await;

        assert_eq!(samples.len(), 14);
        assert_eq!(page.move_count(), 16);
    }

    #[tokio::test]
    async fn test_path_scan_skips_degenerate_paths() {
        let mut page = checkerboard();
        page.paths = vec![
            rect(0.0, 0.0, 10.0, 10.0),
            rect(10.0, 0.0, 1.0, 10.0),
            rect(20.0, 0.0, 10.0, 1.5),
            rect(30.0, 30.0, 10.0, 10.0),
            rect(2.0, 2.0, 6.0, 6.0),
        ];
        page.counts.insert(PATH_SELECTOR.to_string(), page.paths.len());

        let samples = run_plan(&page, ScanPlan::Single(ScanStrategy::PathScan), None, &quick(None)).await;

        let counties: Vec<&str> = samples.iter().map(|s| s.county.as_str()).collect();
        assert_eq!(counties, vec!["County 00", "County 33"]);
        assert_eq!(page.move_count(), 3);
    }

    #[tokio::test]
    async fn test_path_then_grid_falls_back_when_paths_come_up_short() {
        let mut page = checkerboard();
        page.paths = vec![rect(0.0, 0.0, 10.0, 10.0)];
        page.counts.insert(PATH_SELECTOR.to_string(), 1);
        let surface = rect(0.0, 0.0, 40.0, 40.0);

        let samples = run_plan(&page, ScanPlan::PathThenGrid, Some(surface), &quick(None)).await;

        assert_eq!(samples.len(), 16);
        assert_eq!(samples[0].county, "County 00");
    }

    #[tokio::test]
    async fn test_grid_fallback_keeps_path_counties_first() {
        let mut page = checkerboard();
        page.paths = vec![rect(30.0, 30.0, 10.0, 10.0)];
        page.counts.insert(PATH_SELECTOR.to_string(), 1);
        let surface = rect(0.0, 0.0, 40.0, 40.0);

        let samples = run_plan(&page, ScanPlan::PathThenGrid, Some(surface), &quick(None)).await;

        assert_eq!(samples.len(), 16);
        assert_eq!(samples[0].county, "County 33");
        assert_eq!(samples[1].county, "County 00");
    }

    #[tokio::test]
    async fn test_path_then_grid_keeps_enough_path_results() {
        let mut regions = Vec::new();
        let mut paths = Vec::new();
        for i in 0..MIN_PATH_RESULTS {
            let r = rect(i as f64 * 10.0, 0.0, 10.0, 10.0);
            regions.push((r, tip(&format!("County {i}"), "CA", "5.00")));
            paths.push(r);
        }
        let mut page = FakeMapPage {
            regions,
            paths,
            ..Default::default()
        };
        page.counts.insert(PATH_SELECTOR.to_string(), MIN_PATH_RESULTS);

        let samples = run_plan(&page, ScanPlan::PathThenGrid, Some(rect(0.0, 0.0, 500.0, 10.0)), &quick(None)).await;

        assert_eq!(samples.len(), MIN_PATH_RESULTS);
        assert_eq!(page.move_count(), MIN_PATH_RESULTS);
    }

    #[tokio::test]
    async fn test_grid_without_surface_yields_nothing() {
        let page = checkerboard();
        let samples = run_plan(&page, ScanPlan::Single(ScanStrategy::GridScan), None, &quick(None)).await;
        assert!(samples.is_empty());
        assert_eq!(page.move_count(), 0);
    }
}
