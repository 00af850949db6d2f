//! Slice filtering and state-level rollups of county premiums

use std::collections::BTreeMap;

use crate::types::{MetalTier, PremiumRecord, RawUpstreamRow, StateAggregate};

/// Select upstream rows for a plan year, age and metal tier. Each filter is optional.
pub fn filter_rows<'a>(
    rows: &'a [RawUpstreamRow],
    year: Option<i32>,
    age: Option<u8>,
    metal: Option<MetalTier>,
) -> Vec<&'a RawUpstreamRow> {
    let year_code = year.map(|y| y - 2000);
    rows.iter()
        .filter(|r| year_code.map_or(true, |code| r.year == code))
        .filter(|r| age.map_or(true, |a| r.age == a))
        .filter(|r| metal.map_or(true, |m| MetalTier::parse(&r.lvl) == Some(m)))
        .collect()
}

/// Mean of the present values rounded to cents, absent when nothing contributed
fn mean_of(values: impl Iterator<Item = Option<f64>>) -> Option<f64> {
    let (sum, count) = values
        .flatten()
        .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        return None;
    }
    Some(round_cents(sum / count as f64))
}

/// Half-cent ties go to the even cent
fn round_cents(value: f64) -> f64 {
    (value * 100.0).round_ties_even() / 100.0
}

/// Group one plan year's county records by (state, age, metal) and average
/// each premium field over the records where that field is present.
pub fn aggregate_by_state(records: &[PremiumRecord]) -> Vec<StateAggregate> {
    let mut groups: BTreeMap<(String, u8, MetalTier), Vec<&PremiumRecord>> = BTreeMap::new();
    for record in records {
        groups
            .entry((record.state.clone(), record.age, record.metal))
            .or_default()
            .push(record);
    }

    groups
        .into_iter()
        .map(|((state, age, metal), rows)| StateAggregate {
            state_name: rows[0].state_name.clone(),
            individual_mean: mean_of(rows.iter().map(|r| r.individual_premium)),
            small_group_mean: mean_of(rows.iter().map(|r| r.small_group_premium)),
            difference_mean: mean_of(rows.iter().map(|r| r.difference)),
            county_count: rows.len(),
            year: rows[0].year,
            state_abbr: state,
            age,
            metal,
        })
        .collect()
}
