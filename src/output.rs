//! CSV exports for county, state and scraped map data

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;

use crate::types::{PremiumRecord, StateAggregate};

#[derive(Debug, Serialize)]
struct CountyRow<'a> {
    fips: &'a str,
    county: &'a str,
    state_abbr: &'a str,
    state_name: &'a str,
    individual_premium: Option<f64>,
    small_group_premium: Option<f64>,
    difference: Option<f64>,
    year: i32,
    age: u8,
    metal_tier: &'static str,
}

#[derive(Debug, Serialize)]
struct StateRow<'a> {
    state_abbr: &'a str,
    state_name: &'a str,
    individual_premium_avg: Option<f64>,
    small_group_premium_avg: Option<f64>,
    difference_avg: Option<f64>,
    county_count: usize,
    year: i32,
    age: u8,
    metal_tier: &'static str,
}

#[derive(Debug, Serialize)]
struct ScrapedRow<'a> {
    county: &'a str,
    state: &'a str,
    fips: &'a str,
    individual_premium: Option<f64>,
    small_group_premium: Option<f64>,
    difference: Option<f64>,
    year: i32,
    age: u8,
    metal: &'static str,
}

fn write_rows<T: Serialize>(path: &Path, rows: impl IntoIterator<Item = T>) -> Result<usize> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    let mut count = 0;
    for row in rows {
        writer.serialize(row)?;
        count += 1;
    }
    writer
        .flush()
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(count)
}

fn sorted_by_state_county(records: &[PremiumRecord]) -> Vec<&PremiumRecord> {
    let mut sorted: Vec<&PremiumRecord> = records.iter().collect();
    sorted.sort_by(|a, b| (&a.state, &a.county).cmp(&(&b.state, &b.county)));
    sorted
}

/// Write upstream county records. Returns the number of rows written; nothing
/// is written for empty input.
pub fn write_county_csv(records: &[PremiumRecord], path: &Path) -> Result<usize> {
    if records.is_empty() {
        println!("No data to export!");
        return Ok(0);
    }

    let rows = sorted_by_state_county(records).into_iter().map(|r| CountyRow {
        fips: r.fips.as_deref().unwrap_or(""),
        county: &r.county,
        state_abbr: &r.state,
        state_name: &r.state_name,
        individual_premium: r.individual_premium,
        small_group_premium: r.small_group_premium,
        difference: r.difference,
        year: r.year,
        age: r.age,
        metal_tier: r.metal.label(),
    });
    write_rows(path, rows)
}

/// Write state means sorted by (state, age, metal)
pub fn write_state_csv(aggregates: &[StateAggregate], path: &Path) -> Result<usize> {
    if aggregates.is_empty() {
        println!("No data to export!");
        return Ok(0);
    }

    let mut sorted: Vec<&StateAggregate> = aggregates.iter().collect();
    sorted.sort_by(|a, b| {
        (&a.state_abbr, a.age, a.metal.label()).cmp(&(&b.state_abbr, b.age, b.metal.label()))
    });

    let rows = sorted.into_iter().map(|a| StateRow {
        state_abbr: &a.state_abbr,
        state_name: &a.state_name,
        individual_premium_avg: a.individual_mean,
        small_group_premium_avg: a.small_group_mean,
        difference_avg: a.difference_mean,
        county_count: a.county_count,
        year: a.year,
        age: a.age,
        metal_tier: a.metal.label(),
    });
    write_rows(path, rows)
}

/// Write records captured from the map tooltips
pub fn write_scraped_csv(records: &[PremiumRecord], path: &Path) -> Result<usize> {
    if records.is_empty() {
        println!("No data to write!");
        return Ok(0);
    }

    let rows = sorted_by_state_county(records).into_iter().map(|r| ScrapedRow {
        county: &r.county,
        state: &r.state,
        fips: r.fips.as_deref().unwrap_or(""),
        individual_premium: r.individual_premium,
        small_group_premium: r.small_group_premium,
        difference: r.difference,
        year: r.year,
        age: r.age,
        metal: r.metal.as_str(),
    });
    write_rows(path, rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MetalTier;
    use std::fs;

    fn record(county: &str, state: &str, fips: Option<&str>, i: Option<f64>) -> PremiumRecord {
        PremiumRecord {
            county: county.to_string(),
            state: state.to_string(),
            state_name: crate::states::state_name(state, None).to_string(),
            fips: fips.map(|f| f.to_string()),
            individual_premium: i,
            small_group_premium: Some(748.6),
            difference: None,
            year: 2026,
            age: 50,
            metal: MetalTier::Gold,
        }
    }

    #[test]
    fn test_county_csv_header_and_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("counties.csv");
        let records = vec![
            record("Travis County", "TX", Some("48453"), Some(700.98)),
            record("Ada County", "ID", Some("16001"), None),
            record("Harris County", "TX", Some("48201"), Some(700.5)),
        ];

        assert_eq!(write_county_csv(&records, &path).unwrap(), 3);

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(
            lines[0],
            "fips,county,state_abbr,state_name,individual_premium,small_group_premium,difference,year,age,metal_tier"
        );
        assert_eq!(lines[1], "16001,Ada County,ID,Idaho,,748.6,,2026,50,Gold");
        assert!(lines[2].starts_with("48201,Harris County,TX,Texas,700.5,"));
        assert!(lines[3].starts_with("48453,Travis County,TX,"));
    }

    #[test]
    fn test_state_csv_sorted_by_state_age_metal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("states.csv");
        let aggregate = |state: &str, age: u8, metal: MetalTier| StateAggregate {
            state_abbr: state.to_string(),
            state_name: crate::states::state_name(state, None).to_string(),
            age,
            metal,
            individual_mean: Some(710.0),
            small_group_mean: None,
            difference_mean: Some(-12.5),
            county_count: 3,
            year: 2026,
        };
        let aggregates = vec![
            aggregate("TX", 50, MetalTier::Silver),
            aggregate("TX", 50, MetalTier::Gold),
            aggregate("TX", 27, MetalTier::Bronze),
            aggregate("CA", 50, MetalTier::Gold),
        ];

        assert_eq!(write_state_csv(&aggregates, &path).unwrap(), 4);

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(
            lines[0],
            "state_abbr,state_name,individual_premium_avg,small_group_premium_avg,difference_avg,county_count,year,age,metal_tier"
        );
        assert_eq!(lines[1], "CA,California,710.0,,-12.5,3,2026,50,Gold");
        assert!(lines[2].ends_with(",27,Bronze"));
        assert!(lines[3].ends_with(",50,Gold"));
        assert!(lines[4].ends_with(",50,Silver"));
    }

    #[test]
    fn test_scraped_csv_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scraped.csv");
        let records = vec![record("Shasta County", "CA", None, Some(1414.5))];

        assert_eq!(write_scraped_csv(&records, &path).unwrap(), 1);

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(
            lines[0],
            "county,state,fips,individual_premium,small_group_premium,difference,year,age,metal"
        );
        assert_eq!(lines[1], "Shasta County,CA,,1414.5,748.6,,2026,50,gold");
    }

    #[test]
    fn test_empty_input_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.csv");
        assert_eq!(write_county_csv(&[], &path).unwrap(), 0);
        assert_eq!(write_state_csv(&[], &path).unwrap(), 0);
        assert_eq!(write_scraped_csv(&[], &path).unwrap(), 0);
        assert!(!path.exists());
    }
}
