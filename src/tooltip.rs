//! Map tooltip parsing
//!
//! Hover text on the premium map looks like
//! `Shasta County, CA Diff (Ind – Small): $605.64 Individual: $1,414.50 Small Group: $808.86`.
//! A strict pattern handles that layout; a lenient pattern picks up county text
//! followed by loose dollar amounts.

use regex::Regex;
use scraper::Html;
use std::sync::LazyLock;

use crate::types::TooltipSample;

static STRICT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?is)(?P<county>[^,]+),\s*(?P<state>[A-Z]{2})\s*Diff\s*\(Ind\s*[-–−]\s*Small\):\s*\$?(?P<diff>[-−]?\$?[\d,.\-−]+)\s*Individual:\s*\$?(?P<individual>[-−]?\$?[\d,.\-−]+)\s*Small\s*Group:\s*\$?(?P<small_group>[-−]?\$?[\d,.\-−]+)",
    )
    .expect("valid regex")
});

static COUNTY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([^,]+),\s*([A-Z]{2})").expect("valid regex"));

static MONEY_TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[-−]?\$?[-−]?\d[\d,]*(?:\.\d+)?").expect("valid regex")
});

type TooltipParser = fn(&str) -> Option<TooltipSample>;

/// Tried in order, first match wins
const PARSERS: &[TooltipParser] = &[parse_strict, parse_lenient];

/// Convert a money string like "$1,414.50" or "−47.62" to a number.
/// Empty or unparsable input is absent, never zero.
pub fn parse_money(value: &str) -> Option<f64> {
    let cleaned: String = value
        .chars()
        .filter(|c| *c != '$' && *c != ',')
        .map(|c| if c == '−' || c == '–' { '-' } else { c })
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Collapse every whitespace run into a single space
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Flatten tooltip markup to its visible text
pub fn html_to_text(html: &str) -> String {
    let document = Html::parse_fragment(html);
    let text = document.root_element().text().collect::<Vec<_>>().join(" ");
    normalize_whitespace(&text)
}

/// Tooltips without any premium wording are map chrome, not county data
pub fn looks_like_premium_data(text: &str) -> bool {
    text.contains('$') || text.contains("Individual") || text.contains("Small Group")
}

/// Parse hover text into a sample, or `None` when it is not county data
pub fn parse_tooltip(text: &str) -> Option<TooltipSample> {
    let text = normalize_whitespace(text);
    if text.is_empty() {
        return None;
    }
    PARSERS.iter().find_map(|parse| parse(&text))
}

fn parse_strict(text: &str) -> Option<TooltipSample> {
    let caps = STRICT_RE.captures(text)?;
    Some(TooltipSample {
        county: caps["county"].trim().to_string(),
        state: caps["state"].trim().to_string(),
        individual_premium: parse_money(&caps["individual"]),
        small_group_premium: parse_money(&caps["small_group"]),
        difference: parse_money(&caps["diff"]),
    })
}

/// Layout heuristic: amounts read difference, individual, small group. The
/// last two tokens are always individual and small group; the first is only
/// taken as the difference when a third token exists.
fn parse_lenient(text: &str) -> Option<TooltipSample> {
    let caps = COUNTY_RE.captures(text)?;
    let rest = &text[caps.get(0)?.end()..];

    let amounts: Vec<&str> = MONEY_TOKEN_RE
        .find_iter(rest)
        .map(|m| m.as_str())
        .collect();
    if amounts.len() < 2 {
        return None;
    }

    let n = amounts.len();
    Some(TooltipSample {
        county: caps[1].trim().to_string(),
        state: caps[2].trim().to_string(),
        individual_premium: parse_money(amounts[n - 2]),
        small_group_premium: parse_money(amounts[n - 1]),
        difference: if n >= 3 {
            parse_money(amounts[0])
        } else {
            None
        },
    })
}
