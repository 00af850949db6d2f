//! Spot-checks the live map against the cached upstream snapshot

use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::aggregate::filter_rows;
use crate::browser::{LaunchOptions, MapSession};
use crate::driver::{find_surface, prepare_map, MapFilters};
use crate::fetch::load_cached;
use crate::scan::{run_plan, ScanConfig, ScanPlan, ScanStrategy};
use crate::types::{PremiumRecord, TooltipSample};

/// Largest gap between two premiums still treated as equal
pub const TOLERANCE: f64 = 0.01;
/// Float slack so a gap of exactly one cent is not flagged
const EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PremiumField {
    Individual,
    SmallGroup,
    Difference,
}

impl fmt::Display for PremiumField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PremiumField::Individual => "individual",
            PremiumField::SmallGroup => "small group",
            PremiumField::Difference => "difference",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MismatchKind {
    /// The map shows a county the snapshot does not have
    NotFound,
    Field {
        field: PremiumField,
        expected: f64,
        actual: f64,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Mismatch {
    pub key: String,
    pub kind: MismatchKind,
}

#[derive(Debug, Default)]
pub struct VerifyReport {
    pub compared: usize,
    pub mismatches: Vec<Mismatch>,
}

impl VerifyReport {
    pub fn passed(&self) -> bool {
        self.mismatches.is_empty()
    }

    /// Number of distinct counties with at least one problem
    pub fn failed_counties(&self) -> usize {
        let mut keys: Vec<&str> = self.mismatches.iter().map(|m| m.key.as_str()).collect();
        keys.dedup();
        keys.len()
    }
}

fn differs(expected: Option<f64>, actual: Option<f64>) -> Option<(f64, f64)> {
    match (expected, actual) {
        (Some(e), Some(a)) if (e - a).abs() > TOLERANCE + EPSILON => Some((e, a)),
        _ => None,
    }
}

/// Compare scraped tooltips with the expected records, keyed by "county, state".
/// Samples are checked in key order; a field absent on either side is not compared.
pub fn compare(expected: &HashMap<String, PremiumRecord>, scraped: &[TooltipSample]) -> VerifyReport {
    let mut ordered: Vec<&TooltipSample> = scraped.iter().collect();
    ordered.sort_by_key(|s| s.key());

    let mut report = VerifyReport::default();
    for sample in ordered {
        let key = sample.key();
        report.compared += 1;

        let Some(record) = expected.get(&key) else {
            report.mismatches.push(Mismatch {
                key,
                kind: MismatchKind::NotFound,
            });
            continue;
        };

        let fields = [
            (PremiumField::Individual, record.individual_premium, sample.individual_premium),
            (PremiumField::SmallGroup, record.small_group_premium, sample.small_group_premium),
            (PremiumField::Difference, record.difference, sample.difference),
        ];
        for (field, want, got) in fields {
            if let Some((expected, actual)) = differs(want, got) {
                report.mismatches.push(Mismatch {
                    key: key.clone(),
                    kind: MismatchKind::Field {
                        field,
                        expected,
                        actual,
                    },
                });
            }
        }
    }
    report
}

/// "$1,234.56", or "N/A" when absent
pub fn format_money(value: Option<f64>) -> String {
    let Some(value) = value else {
        return "N/A".to_string();
    };
    let cents = (value.abs() * 100.0).round() as u64;
    let whole = (cents / 100).to_string();

    let mut grouped = String::new();
    for (i, c) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }

    let sign = if value < 0.0 && cents > 0 { "-" } else { "" };
    format!("{}${}.{:02}", sign, grouped, cents % 100)
}

fn print_report(expected: &HashMap<String, PremiumRecord>, scraped: &[TooltipSample], report: &VerifyReport) {
    println!(
        "\n{:<35} {:<8} {:>12} {:>12} {:>10}",
        "County", "Source", "Individual", "Small Grp", "Diff"
    );
    println!("{}", "-".repeat(81));

    let mut ordered: Vec<&TooltipSample> = scraped.iter().collect();
    ordered.sort_by_key(|s| s.key());

    for sample in ordered {
        let key = sample.key();
        let name: String = key.chars().take(35).collect();
        println!(
            "{:<35} {:<8} {:>12} {:>12} {:>10}",
            name,
            "Website",
            format_money(sample.individual_premium),
            format_money(sample.small_group_premium),
            format_money(sample.difference)
        );
        match expected.get(&key) {
            Some(record) => println!(
                "{:<35} {:<8} {:>12} {:>12} {:>10}",
                "",
                "Cached",
                format_money(record.individual_premium),
                format_money(record.small_group_premium),
                format_money(record.difference)
            ),
            None => println!("{:<35} {:<8} {:>12}", "", "Cached", "NOT FOUND"),
        }
        for mismatch in report.mismatches.iter().filter(|m| m.key == key) {
            if let MismatchKind::Field { field, expected, actual } = &mismatch.kind {
                println!(
                    "{:<35} MISMATCH {} expected {} got {}",
                    "",
                    field,
                    format_money(Some(*expected)),
                    format_money(Some(*actual))
                );
            }
        }
    }

    println!("{}", "-".repeat(81));
    println!(
        "Compared {} counties: {} matched, {} with differences",
        report.compared,
        report.compared - report.failed_counties(),
        report.failed_counties()
    );
}

/// Expected records for one slice, keyed the way tooltips name counties
fn expected_lookup(records: Vec<PremiumRecord>) -> HashMap<String, PremiumRecord> {
    records
        .into_iter()
        .map(|r| (crate::types::county_key(&r.county, &r.state), r))
        .collect()
}

async fn sample_live(
    filters: &MapFilters,
    samples: usize,
    screenshot: Option<&Path>,
    debug: bool,
) -> Result<Option<Vec<TooltipSample>>> {
    let session = MapSession::launch(&LaunchOptions {
        headless: !debug,
        width: 1400,
        height: 900,
    })
    .await?;

    let result = sample_session(&session, filters, samples, screenshot).await;

    if let Err(e) = session.close().await {
        warn!("{e:#}");
    }
    result
}

async fn sample_session(
    session: &MapSession,
    filters: &MapFilters,
    samples: usize,
    screenshot: Option<&Path>,
) -> Result<Option<Vec<TooltipSample>>> {
    let map = session.map();
    prepare_map(map, filters, 350).await?;

    if let Some(path) = screenshot {
        map.screenshot(path).await?;
        println!("Screenshot saved to {}", path.display());
    }

    let Some(surface) = find_surface(map).await else {
        eprintln!("ERROR: Could not find map");
        return Ok(None);
    };

    println!("Sampling up to {} counties from the map...", samples);
    let plan = ScanPlan::Single(ScanStrategy::GridScan);
    let scraped = run_plan(map, plan, Some(surface), &ScanConfig::sampling(samples)).await;
    println!("Collected {} counties", scraped.len());
    Ok(Some(scraped))
}

pub fn run_verify(
    filters: MapFilters,
    cache: &str,
    samples: usize,
    screenshot: Option<PathBuf>,
    debug: bool,
) -> Result<()> {
    if samples == 0 {
        bail!("--samples must be at least 1");
    }
    let Some(rows) = load_cached(Path::new(cache))? else {
        eprintln!("Cache not found: {}. Run the counties command first.", cache);
        return Ok(());
    };

    let selected: Vec<PremiumRecord> = filter_rows(&rows, Some(filters.year), Some(filters.age), Some(filters.metal))
        .into_iter()
        .filter_map(PremiumRecord::from_upstream)
        .collect();
    println!(
        "Loaded {} cached counties for Year={}, Age={}, Metal={}",
        selected.len(),
        filters.year,
        filters.age,
        filters.metal.label()
    );
    let expected = expected_lookup(selected);

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    let Some(scraped) = runtime.block_on(sample_live(&filters, samples, screenshot.as_deref(), debug))? else {
        return Ok(());
    };

    let report = compare(&expected, &scraped);
    print_report(&expected, &scraped, &report);
    check_report(&report)?;
    println!("\nAll sampled counties match the cached data.");
    Ok(())
}

/// A run that compared nothing proves nothing, so it fails like a mismatch
fn check_report(report: &VerifyReport) -> Result<()> {
    if report.compared == 0 {
        bail!("Verification failed: no counties were sampled from the map");
    }
    if !report.passed() {
        bail!(
            "Verification failed: {} of {} counties differ from the cached data",
            report.failed_counties(),
            report.compared
        );
    }
    Ok(())
}
