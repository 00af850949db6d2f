//! Headless Chromium access to the premium map.
//!
//! Scanning code only sees the [`MapPage`] trait. [`MapSession`] owns the
//! browser process; its [`ChromiumMap`] implements the trait over chromiumoxide
//! and adds the page-level actions the driver needs.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::layout::Point;
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::tooltip::{html_to_text, looks_like_premium_data};

const USER_AGENT: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36";

/// Selector for the county shapes of an SVG choropleth
pub const PATH_SELECTOR: &str = "svg path[d]";
pub const CANVAS_SELECTOR: &str = "canvas";

/// Tooltip containers, most specific first
const TOOLTIP_SELECTORS: &[&str] = &[
    "#ichra-tip",
    ".mapboxgl-popup-content",
    ".leaflet-popup-content",
    "[class*='tooltip']",
    "[class*='Tooltip']",
    "[role='tooltip']",
    ".popup",
    "[class*='popup']",
    "[class*='info-box']",
    "[class*='hover']",
];

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Viewport-relative box of an element, in CSS pixels
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Shapes under 2px in either direction cannot be hovered reliably
    pub fn is_degenerate(&self) -> bool {
        self.width < 2.0 || self.height < 2.0
    }
}

/// What the scan loops need from a rendered map
#[async_trait]
pub trait MapPage: Send + Sync {
    /// Number of elements matching a CSS selector
    async fn count(&self, selector: &str) -> Result<usize>;
    /// Bounding box of the first element matching a selector
    async fn bounding_box(&self, selector: &str) -> Result<Option<Rect>>;
    /// Scroll the `index`th county path into view and measure it
    async fn path_box(&self, index: usize) -> Result<Option<Rect>>;
    /// Move the virtual pointer to viewport coordinates
    async fn move_pointer(&self, x: f64, y: f64) -> Result<()>;
    /// Text of the first visible tooltip carrying premium data
    async fn tooltip_text(&self) -> Result<Option<String>>;
}

/// Wait out the settle floor, then poll for a tooltip until `timeout` passes.
/// Driver errors count as "no tooltip here".
pub async fn read_tooltip(page: &dyn MapPage, settle: Duration, timeout: Duration) -> Option<String> {
    if !settle.is_zero() {
        tokio::time::sleep(settle).await;
    }
    let deadline = Instant::now() + timeout;
    loop {
        match page.tooltip_text().await {
            Ok(Some(text)) => return Some(text),
            Ok(None) => {}
            Err(e) => {
                debug!("tooltip read failed: {e:#}");
                return None;
            }
        }
        if Instant::now() >= deadline {
            return None;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Find the Chromium binary: `ICHRA_CHROMIUM_PATH`, then the system PATH.
/// `None` lets chromiumoxide run its own detection.
pub fn find_chromium() -> Option<PathBuf> {
    if let Ok(p) = std::env::var("ICHRA_CHROMIUM_PATH") {
        let path = PathBuf::from(&p);
        if path.exists() {
            return Some(path);
        }
        warn!("ICHRA_CHROMIUM_PATH={} does not exist, ignoring", p);
    }

    ["google-chrome", "chromium", "chromium-browser"]
        .iter()
        .find_map(|name| which::which(name).ok())
}

#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub headless: bool,
    pub width: u32,
    pub height: u32,
}

/// One browser with one page, owned by a single run
pub struct MapSession {
    browser: Browser,
    map: ChromiumMap,
    handler: JoinHandle<()>,
}

/// The map page of a [`MapSession`]
#[derive(Clone)]
pub struct ChromiumMap {
    page: Page,
}

#[derive(Deserialize)]
struct Found {
    rect: Option<Rect>,
}

impl MapSession {
    pub async fn launch(options: &LaunchOptions) -> Result<Self> {
        let mut builder = BrowserConfig::builder()
            .window_size(options.width, options.height)
            .viewport(Viewport {
                width: options.width,
                height: options.height,
                device_scale_factor: None,
                emulating_mobile: false,
                is_landscape: false,
                has_touch: false,
            })
            .arg("--disable-web-security")
            .arg("--disable-dev-shm-usage")
            .arg(format!("--user-agent={}", USER_AGENT));

        if let Some(path) = find_chromium() {
            builder = builder.chrome_executable(path);
        }
        if !options.headless {
            builder = builder.with_head();
        }

        let config = builder
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build browser config: {e}"))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("failed to launch Chromium")?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let page = abort_on_error(
            browser.new_page("about:blank").await.context("failed to create new page"),
            &handler,
        )?;

        Ok(Self {
            browser,
            map: ChromiumMap { page },
            handler,
        })
    }

    pub fn map(&self) -> &ChromiumMap {
        &self.map
    }

    /// Close the browser and stop the CDP handler
    pub async fn close(mut self) -> Result<()> {
        let result = self.browser.close().await;
        let _ = self.browser.wait().await;
        self.handler.abort();
        result.map(|_| ()).context("failed to close browser")
    }
}

/// Stop `task` when `result` failed, so an aborted launch leaves nothing running
fn abort_on_error<T>(result: Result<T>, task: &JoinHandle<()>) -> Result<T> {
    if result.is_err() {
        task.abort();
    }
    result
}

impl ChromiumMap {
    pub fn page(&self) -> &Page {
        &self.page
    }

    pub async fn open(&self, url: &str, timeout: Duration) -> Result<()> {
        match tokio::time::timeout(timeout, self.page.goto(url)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => bail!("navigation to {url} failed: {e}"),
            Err(_) => bail!("navigation to {url} timed out after {}s", timeout.as_secs()),
        }
    }

    async fn eval<T: serde::de::DeserializeOwned>(&self, script: &str) -> Result<T> {
        self.page
            .evaluate(script)
            .await
            .context("JS execution failed")?
            .into_value()
            .map_err(|e| anyhow::anyhow!("failed to convert JS result: {e:?}"))
    }

    /// Poll a JS boolean expression until it holds or `timeout` passes
    pub async fn wait_for(&self, condition: &str, timeout: Duration) -> Result<bool> {
        let script = format!("(() => {{ try {{ return !!({}); }} catch (e) {{ return false; }} }})()", condition);
        let deadline = Instant::now() + timeout;
        loop {
            if self.eval::<bool>(&script).await.unwrap_or(false) {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    }

    /// Set a `<select>` and fire the change events the map listens for
    pub async fn select_option(&self, selector: &str, value: &str) -> Result<()> {
        let script = format!(
            r#"(() => {{
                const el = document.querySelector({sel});
                if (!el) return "missing";
                el.value = {val};
                el.dispatchEvent(new Event("input", {{ bubbles: true }}));
                el.dispatchEvent(new Event("change", {{ bubbles: true }}));
                return el.value === {val} ? "ok" : "rejected";
            }})()"#,
            sel = serde_json::to_string(selector)?,
            val = serde_json::to_string(value)?,
        );
        match self.eval::<String>(&script).await?.as_str() {
            "ok" => Ok(()),
            "missing" => bail!("no element matches {selector}"),
            _ => bail!("{selector} has no option {value:?}"),
        }
    }

    pub async fn scroll_by(&self, dy: i64) -> Result<()> {
        self.page
            .evaluate(format!("window.scrollBy(0, {dy})"))
            .await
            .context("scroll failed")?;
        Ok(())
    }

    pub async fn content(&self) -> Result<String> {
        self.page.content().await.context("failed to get HTML")
    }

    pub async fn screenshot(&self, path: &Path) -> Result<()> {
        let bytes = self
            .page
            .screenshot(ScreenshotParams::builder().build())
            .await
            .context("screenshot failed")?;
        std::fs::write(path, bytes)
            .with_context(|| format!("Failed to write screenshot: {}", path.display()))?;
        Ok(())
    }
}

#[async_trait]
impl MapPage for ChromiumMap {
    async fn count(&self, selector: &str) -> Result<usize> {
        let script = format!(
            "document.querySelectorAll({}).length",
            serde_json::to_string(selector)?
        );
        self.eval(&script).await
    }

    async fn bounding_box(&self, selector: &str) -> Result<Option<Rect>> {
        let script = format!(
            r#"(() => {{
                const el = document.querySelector({});
                if (!el) return {{ rect: null }};
                const r = el.getBoundingClientRect();
                return {{ rect: {{ x: r.x, y: r.y, width: r.width, height: r.height }} }};
            }})()"#,
            serde_json::to_string(selector)?
        );
        Ok(self.eval::<Found>(&script).await?.rect)
    }

    async fn path_box(&self, index: usize) -> Result<Option<Rect>> {
        let script = format!(
            r#"(() => {{
                const el = document.querySelectorAll({sel})[{index}];
                if (!el) return {{ rect: null }};
                el.scrollIntoView({{ block: "nearest", inline: "nearest" }});
                const r = el.getBoundingClientRect();
                return {{ rect: {{ x: r.x, y: r.y, width: r.width, height: r.height }} }};
            }})()"#,
            sel = serde_json::to_string(PATH_SELECTOR)?,
        );
        Ok(self.eval::<Found>(&script).await?.rect)
    }

    async fn move_pointer(&self, x: f64, y: f64) -> Result<()> {
        self.page
            .move_mouse(Point { x, y })
            .await
            .context("pointer move failed")?;
        Ok(())
    }

    async fn tooltip_text(&self) -> Result<Option<String>> {
        let script = format!(
            r#"(() => {{
                const out = [];
                for (const sel of {}) {{
                    const el = document.querySelector(sel);
                    if (!el) continue;
                    const style = window.getComputedStyle(el);
                    if (style.display === "none" || style.visibility === "hidden" || style.opacity === "0") continue;
                    if (el.getClientRects().length === 0) continue;
                    out.push(el.innerHTML);
                }}
                return out;
            }})()"#,
            serde_json::to_string(TOOLTIP_SELECTORS)?
        );
        let candidates: Vec<String> = self.eval(&script).await?;
        Ok(candidates
            .iter()
            .map(|html| html_to_text(html))
            .find(|text| looks_like_premium_data(text)))
    }
}


#[cfg(test)]
mod tests {
    use super::fake::FakeMapPage;
    use super::*;

    #[test]
    fn test_rect_center_and_degenerate() {
        let r = Rect { x: 10.0, y: 20.0, width: 30.0, height: 40.0 };
        assert_eq!(r.center(), (25.0, 40.0));
        assert!(!r.is_degenerate());
        assert!(Rect { x: 0.0, y: 0.0, width: 1.5, height: 40.0 }.is_degenerate());
        assert!(Rect { x: 0.0, y: 0.0, width: 40.0, height: 1.0 }.is_degenerate());
    }

    #[tokio::test]
    async fn test_read_tooltip_after_hover() {
        let page = FakeMapPage {
            regions: vec![(
                Rect { x: 0.0, y: 0.0, width: 10.0, height: 10.0 },
                "Ada County, ID Individual: $1 Small Group: $2".to_string(),
            )],
            ..Default::default()
        };

        assert_eq!(read_tooltip(&page, Duration::ZERO, Duration::ZERO).await, None);

        page.move_pointer(5.0, 5.0).await.unwrap();
        let text = read_tooltip(&page, Duration::ZERO, Duration::from_millis(50)).await;
        assert!(text.unwrap().starts_with("Ada County"));
    }

    #[tokio::test]
    async fn test_abort_on_error_stops_task() {
        let task = tokio::spawn(std::future::pending::<()>());
        let result: Result<()> = abort_on_error(Err(anyhow::anyhow!("no page")), &task);
        assert!(result.is_err());
        assert!(task.await.unwrap_err().is_cancelled());

        let task = tokio::spawn(std::future::pending::<()>());
        assert_eq!(abort_on_error(Ok(7), &task).unwrap(), 7);
        assert!(!task.is_finished());
        task.abort();
    }

    #[tokio::test]
    #[ignore] // Requires Chromium to be installed
    async fn test_session_reads_tooltip() {
        let session = MapSession::launch(&LaunchOptions { headless: true, width: 800, height: 600 })
            .await
            .expect("failed to launch");
        let map = session.map();
        map.open(
            "data:text/html,<div id='ichra-tip'>Ada County, ID<br>Individual: $1.00 Small Group: $2.00</div>",
            Duration::from_secs(10),
        )
        .await
        .expect("navigation failed");

        assert_eq!(map.count("#ichra-tip").await.unwrap(), 1);
        assert_eq!(map.bounding_box("#missing").await.unwrap(), None);
        let text = map.tooltip_text().await.unwrap().unwrap();
        assert_eq!(text, "Ada County, ID Individual: $1.00 Small Group: $2.00");

        session.close().await.expect("close failed");
    }
}
