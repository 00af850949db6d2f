//! Looks for the map's data source: captured network responses and data
//! embedded in the page HTML.

use anyhow::{Context, Result};
use base64::Engine;
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams, EventResponseReceived, GetResponseBodyParams, RequestId,
};
use futures::StreamExt;
use regex::Regex;
use scraper::{Html, Selector};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::browser::{ChromiumMap, LaunchOptions, MapPage, MapSession};
use crate::driver::find_surface;
use crate::utils::osc8_file_link;
use crate::MAP_URL;

/// URL fragments that suggest a response carries map data
const DATA_URL_HINTS: &[&str] = &[".json", ".geojson", "api", "data", "county", "premium"];
const PREMIUM_KEYWORDS: &[&str] = &["county", "premium", "individual", "small group", "fips"];

/// Bodies at or below this size are config or telemetry, not county data
const MIN_SAVED_BODY: usize = 10_000;
/// Inline scripts longer than this may carry a data payload
const LARGE_SCRIPT: usize = 5_000;
const HOVER_STEP: usize = 100;

static EMBEDDED_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"(?is)countyData\s*[=:]\s*\[.{1000,}?\]", "countyData array"),
        (r"(?is)premiumData\s*[=:]\s*\{.{1000,}?\}", "premiumData object"),
        (r#"(?i)"Individual":\s*[\d.]+"#, "Individual premium values"),
        (r#"(?i)"Small Group":\s*[\d.]+"#, "Small Group premium values"),
        (r"(?i)fips", "FIPS code references"),
    ]
    .into_iter()
    .map(|(pattern, name)| (Regex::new(pattern).expect("valid regex"), name))
    .collect()
});

static SCRIPT_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("script").expect("valid selector"));

/// A network response worth a closer look
#[derive(Debug, Clone)]
pub struct CapturedResponse {
    pub request_id: RequestId,
    pub url: String,
    pub status: i64,
    pub mime_type: String,
}

impl CapturedResponse {
    fn is_json(&self) -> bool {
        self.mime_type.to_lowercase().contains("json")
    }
}

pub fn is_data_url(url: &str) -> bool {
    let url = url.to_lowercase();
    DATA_URL_HINTS.iter().any(|hint| url.contains(hint))
}

/// `captured_<last path segment>.json`, with the segment cut to 30 characters
pub fn capture_file_name(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let segment = path
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or("")
        .trim_end_matches(".json");
    let segment: String = segment
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .take(30)
        .collect();
    let segment = if segment.is_empty() { "response".to_string() } else { segment };
    format!("captured_{}.json", segment)
}

/// Describe data the page HTML may be carrying inline
pub fn embedded_data_hints(html: &str) -> Vec<String> {
    let mut hints = Vec::new();

    for (re, name) in EMBEDDED_PATTERNS.iter() {
        let count = re.find_iter(html).count();
        if count > 0 {
            hints.push(format!("{} ({} matches)", name, count));
        }
    }

    let document = Html::parse_document(html);
    let mut inline = 0;
    let mut external = 0;
    for script in document.select(&SCRIPT_SELECTOR) {
        if script.value().attr("src").is_some() {
            external += 1;
            continue;
        }
        inline += 1;
        let body: String = script.text().collect();
        let lower = body.to_lowercase();
        if body.len() > LARGE_SCRIPT && PREMIUM_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
            hints.push(format!("Inline script #{} ({} chars) mentions premium data", inline - 1, body.len()));
        }
    }
    debug!("{} inline scripts, {} external scripts", inline, external);

    let lower = html.to_lowercase();
    if lower.contains("geojson") {
        hints.push("GeoJSON reference".to_string());
    }
    if lower.contains("topojson") {
        hints.push("TopoJSON reference".to_string());
    }
    if html.contains("\"features\"") && html.contains("\"geometry\"") {
        hints.push("Possible embedded GeoJSON features".to_string());
    }

    hints
}

/// Hover along the middle row of the map so lazily loaded data is requested
async fn sweep_middle_row(map: &ChromiumMap) {
    let Some(surface) = find_surface(map).await else {
        warn!("No map surface to hover");
        return;
    };
    let y = surface.y + surface.height / 2.0;
    for dx in (0..surface.width as usize).step_by(HOVER_STEP) {
        if let Err(e) = map.move_pointer(surface.x + dx as f64, y).await {
            debug!("hover failed: {e:#}");
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

async fn response_body(map: &ChromiumMap, response: &CapturedResponse) -> Result<Vec<u8>> {
    let reply = map
        .page()
        .execute(GetResponseBodyParams::new(response.request_id.clone()))
        .await
        .with_context(|| format!("Failed to read body of {}", response.url))?;
    if reply.result.base64_encoded {
        return base64::engine::general_purpose::STANDARD
            .decode(&reply.result.body)
            .context("Response body is not valid base64");
    }
    Ok(reply.result.body.clone().into_bytes())
}

async fn save_json_bodies(map: &ChromiumMap, responses: &[CapturedResponse], dir: &Path) -> Result<usize> {
    fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    let mut saved = 0;
    for response in responses.iter().filter(|r| r.is_json()) {
        let body = match response_body(map, response).await {
            Ok(body) => body,
            Err(e) => {
                warn!("{e:#}");
                continue;
            }
        };
        if body.len() <= MIN_SAVED_BODY {
            continue;
        }
        let path = dir.join(capture_file_name(&response.url));
        fs::write(&path, &body).with_context(|| format!("Failed to write {}", path.display()))?;
        let shown = path.display().to_string();
        println!("  Saved {} bytes to {}", body.len(), osc8_file_link(&shown, &shown));
        saved += 1;
    }
    Ok(saved)
}

async fn inspect_live(session: &MapSession, save_dir: Option<&Path>) -> Result<()> {
    let map = session.map();
    map.page()
        .execute(EnableParams::default())
        .await
        .context("Failed to enable network events")?;

    let mut events = map
        .page()
        .event_listener::<EventResponseReceived>()
        .await
        .context("Failed to listen for responses")?;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let listener = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            if !is_data_url(&event.response.url) {
                continue;
            }
            let captured = CapturedResponse {
                request_id: event.request_id.clone(),
                url: event.response.url.clone(),
                status: event.response.status,
                mime_type: event.response.mime_type.clone(),
            };
            if tx.send(captured).is_err() {
                break;
            }
        }
    });

    println!("Loading: {}", MAP_URL);
    map.open(MAP_URL, Duration::from_secs(60)).await?;
    tokio::time::sleep(Duration::from_secs(5)).await;

    println!("Hovering over the map to trigger data loads...");
    sweep_middle_row(map).await;
    tokio::time::sleep(Duration::from_secs(2)).await;
    listener.abort();

    let mut responses = Vec::new();
    while let Ok(response) = rx.try_recv() {
        responses.push(response);
    }

    println!("\nFound {} potential data URLs:\n", responses.len());
    for r in &responses {
        let url: String = r.url.chars().take(100).collect();
        println!("  [{}] {:<24} {}", r.status, r.mime_type, url);
    }

    if let Some(dir) = save_dir {
        let saved = save_json_bodies(map, &responses, dir).await?;
        println!("\nSaved {} JSON responses over {} bytes", saved, MIN_SAVED_BODY);
    }

    println!("\nSearching page HTML for embedded data...");
    let html = map.content().await?;
    let hints = embedded_data_hints(&html);
    if hints.is_empty() {
        println!("  Nothing found");
    }
    for hint in hints {
        println!("  Found: {}", hint);
    }
    Ok(())
}

pub fn run_inspect(save_dir: Option<PathBuf>, debug: bool) -> Result<()> {
    println!("Starting network inspection...");
    println!("{}", "=".repeat(60));

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    runtime.block_on(async {
        let session = MapSession::launch(&LaunchOptions {
            headless: !debug,
            width: 1920,
            height: 1080,
        })
        .await?;
        let result = inspect_live(&session, save_dir.as_deref()).await;
        if let Err(e) = session.close().await {
            warn!("{e:#}");
        }
        result
    })
}
