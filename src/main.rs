use anyhow::Result;
use clap::{Parser, Subcommand};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

mod aggregate;
mod browser;
mod dedup;
mod driver;
mod fetch;
mod inspect;
mod output;
mod scan;
mod states;
mod tooltip;
mod types;
mod utils;
mod verify;

use driver::MapFilters;
use types::{AgeBand, MetalTier, PremiumRecord};
use utils::{osc8_file_link, osc8_link};

pub const DATA_URL: &str =
    "https://ideonapi.com/wp-content/uploads/json-data/county_lowest_premiums_all_14-12-2025.json";
pub const MAP_URL: &str = "https://ideonapi.com/ideon-ichra-insights-by-state/";

#[derive(Parser)]
#[command(name = "ichra-premiums")]
#[command(about = "Ideon ICHRA premium exporter, map scraper and verifier")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Export county premiums from the upstream JSON feed
    Counties {
        /// Plan year (2017-2026)
        #[arg(long, default_value_t = 2026)]
        year: i32,
        /// Age filter
        #[arg(long, value_enum)]
        age: Option<AgeBand>,
        /// Metal tier filter
        #[arg(long, value_enum)]
        metal: Option<MetalTier>,
        /// Output CSV file
        #[arg(short, long, default_value = "ideon_counties_2026.csv")]
        output: String,
        /// Cached copy of the upstream JSON
        #[arg(long, default_value = "county_data_raw.json")]
        cache: String,
    },
    /// Export state-level premium averages from the cached feed
    States {
        /// Plan year (2017-2026)
        #[arg(long, default_value_t = 2026)]
        year: i32,
        /// Output CSV file
        #[arg(short, long, default_value = "ideon_states_2026.csv")]
        output: String,
        /// Cached copy of the upstream JSON (written by `counties`)
        #[arg(long, default_value = "county_data_raw.json")]
        cache: String,
    },
    /// Scrape county premiums from the interactive map's tooltips
    Scrape {
        #[arg(long, default_value_t = 2026)]
        year: i32,
        #[arg(long, value_enum, default_value = "50")]
        age: AgeBand,
        #[arg(long, value_enum, default_value = "gold")]
        metal: MetalTier,
        /// Output CSV file
        #[arg(short, long, default_value = "ideon_county_data.csv")]
        output: String,
        /// Only keep counties from this state (e.g. TX)
        #[arg(long)]
        state: Option<String>,
        /// Show the browser and log debug output
        #[arg(long)]
        debug: bool,
    },
    /// Sample the live map and compare it with the cached feed
    Verify {
        #[arg(long, default_value_t = 2026)]
        year: i32,
        #[arg(long, value_enum, default_value = "50")]
        age: AgeBand,
        #[arg(long, value_enum, default_value = "gold")]
        metal: MetalTier,
        /// Cached copy of the upstream JSON (written by `counties`)
        #[arg(long, default_value = "county_data_raw.json")]
        cache: String,
        /// Number of counties to sample
        #[arg(long, default_value_t = 20)]
        samples: usize,
        /// Save a screenshot of the map after the filters are set
        #[arg(long, value_name = "PATH")]
        screenshot: Option<PathBuf>,
        /// Show the browser and log debug output
        #[arg(long)]
        debug: bool,
    },
    /// Capture the map's network traffic and look for its data source
    Inspect {
        /// Save large JSON responses into this directory
        #[arg(long, value_name = "DIR")]
        save_dir: Option<PathBuf>,
        /// Show the browser and log debug output
        #[arg(long)]
        debug: bool,
    },
}

impl Commands {
    fn debug(&self) -> bool {
        match self {
            Commands::Scrape { debug, .. }
            | Commands::Verify { debug, .. }
            | Commands::Inspect { debug, .. } => *debug,
            Commands::Counties { .. } | Commands::States { .. } => false,
        }
    }
}

fn init_tracing(debug: bool) -> Result<()> {
    let directive = if debug {
        "ichra_premiums=debug"
    } else {
        "ichra_premiums=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(directive.parse()?))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
    Ok(())
}

fn run_counties(
    year: i32,
    age: Option<AgeBand>,
    metal: Option<MetalTier>,
    output: &str,
    cache: &str,
) -> Result<()> {
    println!("Source: {}", osc8_link(DATA_URL, "Ideon county premiums"));
    let rows = fetch::load_or_fetch(Path::new(cache), DATA_URL)?;
    println!("Total records loaded: {}", rows.len());

    let age = age.map(|a| a.years());
    let filtered = aggregate::filter_rows(&rows, Some(year), age, metal);
    println!(
        "Records after filtering (year={}, age={}, metal={}): {}",
        year,
        age.map_or("all".to_string(), |a| a.to_string()),
        metal.map_or("all", |m| m.as_str()),
        filtered.len()
    );

    let records: Vec<PremiumRecord> = filtered
        .iter()
        .filter_map(|row| PremiumRecord::from_upstream(row))
        .collect();

    let count = output::write_county_csv(&records, Path::new(output))?;
    if count == 0 {
        return Ok(());
    }
    println!("\nExported {} rows to {}", count, osc8_file_link(output, output));

    let states: HashSet<&str> = records.iter().map(|r| r.state.as_str()).collect();
    println!("  States: {}", states.len());
    println!("  Unique counties (FIPS): {}", unique_counties(&records));
    Ok(())
}

/// Distinct counties by FIPS, falling back to "county, state" for rows without one
fn unique_counties(records: &[PremiumRecord]) -> usize {
    records.iter().map(|r| r.key()).collect::<HashSet<_>>().len()
}

fn run_states(year: i32, output: &str, cache: &str) -> Result<()> {
    let Some(rows) = fetch::load_cached(Path::new(cache))? else {
        eprintln!("Error: Cache file not found: {}", cache);
        eprintln!("Run the counties command first to download the data.");
        return Ok(());
    };
    println!("Total records loaded: {}", rows.len());

    let records: Vec<PremiumRecord> = aggregate::filter_rows(&rows, Some(year), None, None)
        .into_iter()
        .filter_map(PremiumRecord::from_upstream)
        .collect();
    let aggregates = aggregate::aggregate_by_state(&records);
    println!("State-level aggregations: {}", aggregates.len());

    let count = output::write_state_csv(&aggregates, Path::new(output))?;
    if count == 0 {
        return Ok(());
    }
    println!("\nExported {} rows to {}", count, osc8_file_link(output, output));

    let states: HashSet<&str> = aggregates.iter().map(|a| a.state_abbr.as_str()).collect();
    println!("  States: {}", states.len());
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.command.debug())?;

    match cli.command {
        Commands::Counties {
            year,
            age,
            metal,
            output,
            cache,
        } => run_counties(year, age, metal, &output, &cache),
        Commands::States {
            year,
            output,
            cache,
        } => run_states(year, &output, &cache),
        Commands::Scrape {
            year,
            age,
            metal,
            output,
            state,
            debug,
        } => {
            let filters = MapFilters {
                year,
                age: age.years(),
                metal,
            };
            driver::run_scrape(filters, &output, state, debug)
        }
        Commands::Verify {
            year,
            age,
            metal,
            cache,
            samples,
            screenshot,
            debug,
        } => {
            let filters = MapFilters {
                year,
                age: age.years(),
                metal,
            };
            verify::run_verify(filters, &cache, samples, screenshot, debug)
        }
        Commands::Inspect { save_dir, debug } => inspect::run_inspect(save_dir, debug),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_scrape_defaults() {
        let cli = Cli::try_parse_from(["ichra-premiums", "scrape"]).unwrap();
        match cli.command {
            Commands::Scrape {
                year,
                age,
                metal,
                output,
                state,
                debug,
            } => {
                assert_eq!(year, 2026);
                assert_eq!(age, AgeBand::Fifty);
                assert_eq!(metal, MetalTier::Gold);
                assert_eq!(output, "ideon_county_data.csv");
                assert_eq!(state, None);
                assert!(!debug);
            }
            _ => panic!("expected scrape"),
        }
    }

    #[test]
    fn test_counties_rejects_unknown_age() {
        assert!(Cli::try_parse_from(["ichra-premiums", "counties", "--age", "40"]).is_err());
        let cli = Cli::try_parse_from(["ichra-premiums", "counties", "--age", "27", "--metal", "silver"]).unwrap();
        match cli.command {
            Commands::Counties { age, metal, .. } => {
                assert_eq!(age, Some(AgeBand::TwentySeven));
                assert_eq!(metal, Some(MetalTier::Silver));
            }
            _ => panic!("expected counties"),
        }
    }

    #[test]
    fn test_debug_flag_per_command() {
        let cli = Cli::try_parse_from(["ichra-premiums", "verify", "--debug", "--samples", "5"]).unwrap();
        assert!(cli.command.debug());
        let cli = Cli::try_parse_from(["ichra-premiums", "states"]).unwrap();
        assert!(!cli.command.debug());
    }

    #[test]
    fn test_run_states_without_cache_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("missing.json");
        let output = dir.path().join("states.csv");
        run_states(2026, output.to_str().unwrap(), cache.to_str().unwrap()).unwrap();
        assert!(!output.exists());
    }

    #[test]
    fn test_run_states_averages_one_year() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("county_data_raw.json");
        let output = dir.path().join("states.csv");
        std::fs::write(
            &cache,
            r#"[
                {"year":26,"age":50,"lvl":"gold","st":"TX","n":"Harris County","f":"48201","i":700.0,"s":750.0,"d":-50.0},
                {"year":26,"age":50,"lvl":"gold","st":"TX","n":"Travis County","f":"48453","i":710.0,"s":760.0,"d":-50.0},
                {"year":26,"age":50,"lvl":"gold","st":"TX","n":"Dallas County","f":"48113","i":720.0,"s":770.0,"d":-50.0},
                {"year":25,"age":50,"lvl":"gold","st":"TX","n":"Bexar County","f":"48029","i":100.0,"s":100.0,"d":0.0}
            ]"#,
        )
        .unwrap();

        run_states(2026, output.to_str().unwrap(), cache.to_str().unwrap()).unwrap();

        let content = std::fs::read_to_string(&output).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(
            lines,
            vec![
                "state_abbr,state_name,individual_premium_avg,small_group_premium_avg,difference_avg,county_count,year,age,metal_tier",
                "TX,Texas,710.0,760.0,-50.0,3,2026,50,Gold",
            ]
        );
    }

    #[test]
    fn test_unique_counties_prefers_fips() {
        let record = |county: &str, fips: Option<&str>| PremiumRecord {
            county: county.to_string(),
            state: "TX".to_string(),
            state_name: "Texas".to_string(),
            fips: fips.map(|f| f.to_string()),
            individual_premium: None,
            small_group_premium: None,
            difference: None,
            year: 2026,
            age: 50,
            metal: MetalTier::Gold,
        };
        let records = vec![
            record("Harris County", Some("48201")),
            record("Harris Co.", Some("48201")),
            record("Loving County", None),
            record("Loving County", None),
        ];
        assert_eq!(unique_counties(&records), 2);
    }

    #[test]
    fn test_run_counties_from_cache() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("county_data_raw.json");
        let output = dir.path().join("counties.csv");
        std::fs::write(
            &cache,
            r#"[
                {"year":26,"age":50,"lvl":"gold","st":"TX","n":"Harris County","f":"48201","i":700.98,"s":748.6,"d":-47.62},
                {"year":26,"age":27,"lvl":"gold","st":"TX","n":"Harris County","f":"48201","i":400.0,"s":420.0,"d":-20.0},
                {"year":25,"age":50,"lvl":"gold","st":"TX","n":"Harris County","f":"48201","i":650.0,"s":700.0,"d":-50.0}
            ]"#,
        )
        .unwrap();

        run_counties(
            2026,
            Some(AgeBand::Fifty),
            Some(MetalTier::Gold),
            output.to_str().unwrap(),
            cache.to_str().unwrap(),
        )
        .unwrap();

        let content = std::fs::read_to_string(&output).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert!(content.contains("48201,Harris County,TX,Texas,700.98,748.6,-47.62,2026,50,Gold"));
    }
}
