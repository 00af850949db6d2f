//! Premium record types shared by the direct and scraper pipelines

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::states::state_name;

/// Plan generosity tier used to slice the premium data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum MetalTier {
    Bronze,
    Silver,
    Gold,
}

impl MetalTier {
    /// Lowercase form used upstream, on the CLI and in the map's dropdown
    pub fn as_str(&self) -> &'static str {
        match self {
            MetalTier::Bronze => "bronze",
            MetalTier::Silver => "silver",
            MetalTier::Gold => "gold",
        }
    }

    /// Capitalized form written to the county and state CSVs
    pub fn label(&self) -> &'static str {
        match self {
            MetalTier::Bronze => "Bronze",
            MetalTier::Silver => "Silver",
            MetalTier::Gold => "Gold",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "bronze" => Some(MetalTier::Bronze),
            "silver" => Some(MetalTier::Silver),
            "gold" => Some(MetalTier::Gold),
            _ => None,
        }
    }
}

/// Age band the upstream premiums are quoted for
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AgeBand {
    #[value(name = "27")]
    TwentySeven,
    #[value(name = "50")]
    Fifty,
}

impl AgeBand {
    pub fn years(&self) -> u8 {
        match self {
            AgeBand::TwentySeven => 27,
            AgeBand::Fifty => 50,
        }
    }
}

/// Row of the upstream JSON feed, keyed with its short field names
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawUpstreamRow {
    /// Plan year as an offset from 2000 (26 -> 2026)
    #[serde(default)]
    pub year: i32,
    #[serde(default)]
    pub age: u8,
    #[serde(default)]
    pub lvl: String,
    #[serde(default)]
    pub st: String,
    #[serde(default)]
    pub n: String,
    #[serde(default)]
    pub f: Option<String>,
    #[serde(default)]
    pub i: Option<f64>,
    #[serde(default)]
    pub s: Option<f64>,
    #[serde(default)]
    pub d: Option<f64>,
}

impl RawUpstreamRow {
    pub fn full_year(&self) -> i32 {
        2000 + self.year
    }
}

/// One county's premiums for a single (year, age, metal) slice
#[derive(Debug, Clone, PartialEq)]
pub struct PremiumRecord {
    pub county: String,
    pub state: String,
    pub state_name: String,
    pub fips: Option<String>,
    pub individual_premium: Option<f64>,
    pub small_group_premium: Option<f64>,
    pub difference: Option<f64>,
    pub year: i32,
    pub age: u8,
    pub metal: MetalTier,
}

impl PremiumRecord {
    /// Rename and enrich an upstream row. Rows with an unknown metal level are dropped.
    pub fn from_upstream(row: &RawUpstreamRow) -> Option<Self> {
        let metal = MetalTier::parse(&row.lvl)?;
        let fips = row.f.clone().filter(|f| !f.trim().is_empty());

        Some(Self {
            county: row.n.clone(),
            state: row.st.clone(),
            state_name: state_name(&row.st, fips.as_deref()).to_string(),
            fips,
            individual_premium: row.i,
            small_group_premium: row.s,
            difference: row.d,
            year: row.full_year(),
            age: row.age,
            metal,
        })
    }

    /// Stamp a scraped tooltip with the slice it was captured under
    pub fn from_sample(sample: TooltipSample, year: i32, age: u8, metal: MetalTier) -> Self {
        Self {
            state_name: state_name(&sample.state, None).to_string(),
            county: sample.county,
            state: sample.state,
            fips: None,
            individual_premium: sample.individual_premium,
            small_group_premium: sample.small_group_premium,
            difference: sample.difference,
            year,
            age,
            metal,
        }
    }

    /// FIPS when known, otherwise the county/state text key
    pub fn key(&self) -> String {
        match &self.fips {
            Some(fips) => fips.clone(),
            None => county_key(&self.county, &self.state),
        }
    }
}

/// Parsed hover text: a premium record without FIPS or slice information
#[derive(Debug, Clone, PartialEq)]
pub struct TooltipSample {
    pub county: String,
    pub state: String,
    pub individual_premium: Option<f64>,
    pub small_group_premium: Option<f64>,
    pub difference: Option<f64>,
}

impl TooltipSample {
    pub fn key(&self) -> String {
        county_key(&self.county, &self.state)
    }
}

/// State-level means for one (state, age, metal) group
#[derive(Debug, Clone, PartialEq)]
pub struct StateAggregate {
    pub state_abbr: String,
    pub state_name: String,
    pub age: u8,
    pub metal: MetalTier,
    pub individual_mean: Option<f64>,
    pub small_group_mean: Option<f64>,
    pub difference_mean: Option<f64>,
    pub county_count: usize,
    pub year: i32,
}

/// "<county>, <state>" as displayed in the map tooltip
pub fn county_key(county: &str, state: &str) -> String {
    format!("{}, {}", county, state)
}
