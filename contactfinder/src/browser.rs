//! Browser session for one worker process.
//!
//! A worker owns exactly one headless Chrome instance for its whole chunk.
//! All calls are blocking; the session is never shared across threads.
//! The [`Browse`] trait is the seam the search pipeline is written against,
//! so tests can substitute a scripted browser.

use headless_chrome::protocol::cdp::Page;
use headless_chrome::{Browser, LaunchOptions, Tab};
use once_cell::sync::Lazy;
use rand::Rng;
use scraper::{Html, Node, Selector};
use std::ffi::OsStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::BrowserConfig;
use crate::domain_utils;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrowseError {
    #[error("Navigation to {url} timed out")]
    Timeout { url: String },

    #[error("Blocked at {url} ({indicator})")]
    Blocked { url: String, indicator: String },

    #[error("Navigation to {url} failed: {message}")]
    Navigation { url: String, message: String },

    #[error("Element not found: {selector}")]
    ElementNotFound { selector: String },

    #[error("Browser failure: {0}")]
    Fatal(String),
}

impl BrowseError {
    /// The browser is gone; nothing more can be done in this process.
    pub fn is_fatal(&self) -> bool {
        matches!(self, BrowseError::Fatal(_))
    }

    /// Worth another attempt after a backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, BrowseError::Timeout { .. } | BrowseError::Navigation { .. })
    }
}

/// Rendered page as seen by the extractor
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PageContent {
    /// Final URL after redirects
    pub url: String,
    pub html: String,
    /// Visible text, without script/style/noscript content
    pub text: String,
    /// Absolute http(s) links in document order, de-duplicated
    pub links: Vec<String>,
}

static LINK_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href]").expect("static selector"));

const HIDDEN_ELEMENTS: &[&str] = &["script", "style", "noscript", "template"];

impl PageContent {
    /// Build page content from raw HTML, resolving links against `url`.
    pub fn from_html(url: &str, html: String) -> Self {
        let document = Html::parse_document(&html);
        let text = visible_text(&document);

        let base = url::Url::parse(url).ok();
        let mut links: Vec<String> = Vec::new();
        for element in document.select(&LINK_SELECTOR) {
            let Some(href) = element.value().attr("href") else {
                continue;
            };
            let resolved = match &base {
                Some(base) => base.join(href.trim()),
                None => url::Url::parse(href.trim()),
            };
            if let Ok(resolved) = resolved {
                if matches!(resolved.scheme(), "http" | "https") {
                    let s = resolved.to_string();
                    if !links.contains(&s) {
                        links.push(s);
                    }
                }
            }
        }

        Self {
            url: url.to_string(),
            html,
            text,
            links,
        }
    }
}

fn visible_text(document: &Html) -> String {
    let mut lines: Vec<&str> = Vec::new();
    for node in document.tree.root().descendants() {
        let Node::Text(text) = node.value() else {
            continue;
        };
        let hidden = node.ancestors().any(|a| match a.value() {
            Node::Element(e) => HIDDEN_ELEMENTS.contains(&e.name()),
            _ => false,
        });
        if hidden {
            continue;
        }
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            lines.push(trimmed);
        }
    }
    lines.join("\n")
}

/// Markers of bot-detection interstitials, matched case-insensitively
/// against the page HTML. The boolean limits a marker to search engine and
/// portal hosts, where an embedded CAPTCHA always means a block page.
const BLOCK_INDICATORS: &[(&str, &str, bool)] = &[
    ("g-recaptcha", "recaptcha", true),
    ("www.google.com/recaptcha/api", "recaptcha", true),
    ("id=\"captcha-form\"", "captcha form", true),
    ("unusual traffic", "unusual traffic notice", false),
    ("cf-challenge", "cloudflare challenge", false),
    ("challenge-platform", "cloudflare challenge", false),
    ("cf-browser-verification", "cloudflare challenge", false),
    ("자동입력 방지", "automated input notice", true),
    ("자동 입력 방지", "automated input notice", true),
    ("비정상적인 트래픽", "unusual traffic notice", false),
];

/// Return the matching indicator when the page is a block/CAPTCHA page.
pub fn detect_block(page: &PageContent) -> Option<&'static str> {
    let mut on_portal = false;
    if let Ok(parsed) = url::Url::parse(&page.url) {
        let host = parsed.host_str().unwrap_or_default();
        if host.contains("google.") && parsed.path().starts_with("/sorry/") {
            return Some("google sorry page");
        }
        on_portal = domain_utils::is_excluded_host(host);
    }
    let lower = page.html.to_lowercase();
    BLOCK_INDICATORS
        .iter()
        .filter(|(_, _, portal_only)| on_portal || !portal_only)
        .find(|(needle, _, _)| lower.contains(needle))
        .map(|(_, label, _)| *label)
}

/// Map a driver error onto the session's error taxonomy.
pub fn classify_driver_error(url: &str, err: &anyhow::Error) -> BrowseError {
    let message = err.to_string();
    let lower = message.to_lowercase();
    if lower.contains("connection is closed")
        || lower.contains("connection closed")
        || lower.contains("channel closed")
        || lower.contains("crashed")
        || lower.contains("no such target")
    {
        BrowseError::Fatal(message)
    } else if lower.contains("timed out") || lower.contains("timeout") || lower.contains("never came") {
        BrowseError::Timeout { url: url.to_string() }
    } else {
        BrowseError::Navigation {
            url: url.to_string(),
            message,
        }
    }
}

/// Operations the search pipeline needs from a browser.
pub trait Browse {
    /// Load `url`, wait for it to settle and return its content.
    fn navigate(&mut self, url: &str) -> Result<PageContent, BrowseError>;

    /// Focus the element matching `selector` and type `text` into it.
    fn type_text(&mut self, selector: &str, text: &str) -> Result<(), BrowseError>;

    /// Submit the focused form and return the resulting page.
    fn submit(&mut self) -> Result<PageContent, BrowseError>;

    /// Release the browser. Further calls fail with `Fatal`.
    fn close(&mut self);
}

/// Hides automation markers; registered to run before any page script
const STEALTH_SCRIPT: &str = r#"
(() => {
  try {
    Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
    Object.defineProperty(navigator, 'languages', { get: () => ['ko-KR', 'ko', 'en-US', 'en'] });
    Object.defineProperty(navigator, 'plugins', { get: () => [1, 2, 3, 4, 5] });
    if (!window.chrome) { window.chrome = { runtime: {} }; }
  } catch (e) {}
  return true;
})()
"#;

const CHROME_ARGS: &[&str] = &[
    "--disable-blink-features=AutomationControlled",
    "--disable-infobars",
    "--disable-dev-shm-usage",
    "--disable-extensions",
    "--disable-background-networking",
    "--disable-sync",
    "--disable-translate",
    "--mute-audio",
    "--no-first-run",
    "--no-default-browser-check",
];

/// Randomized delays between browser actions
#[derive(Debug, Clone, Copy)]
struct Pacing {
    settle: (u64, u64),
    keystroke: (u64, u64),
    pre_submit: (u64, u64),
}

impl Pacing {
    fn from_config(config: &BrowserConfig) -> Self {
        Self {
            settle: (config.settle_delay_min_ms, config.settle_delay_max_ms),
            keystroke: (config.keystroke_delay_min_ms, config.keystroke_delay_max_ms),
            pre_submit: (config.pre_submit_delay_min_ms, config.pre_submit_delay_max_ms),
        }
    }

    fn pause((min, max): (u64, u64)) {
        let ms = if max > min {
            rand::thread_rng().gen_range(min..=max)
        } else {
            min
        };
        if ms > 0 {
            std::thread::sleep(Duration::from_millis(ms));
        }
    }
}

/// A Chrome instance plus the single tab used for every navigation.
/// Dropping the session kills the Chrome process.
pub struct BrowserSession {
    browser: Option<Browser>,
    tab: Arc<Tab>,
    pacing: Pacing,
    stealth_registered: bool,
}

impl BrowserSession {
    /// Launch Chrome. Missing binary or launch failure is `Fatal`.
    pub fn open(config: &BrowserConfig) -> Result<Self, BrowseError> {
        let is_container = std::env::var("CONTACTFINDER_CONTAINER").is_ok()
            || std::path::Path::new("/.dockerenv").exists();

        let chrome_path = config
            .chrome_path()
            .or_else(|| std::env::var("CHROME_PATH").ok().map(std::path::PathBuf::from));

        let args: Vec<&OsStr> = CHROME_ARGS.iter().map(OsStr::new).collect();

        let options = LaunchOptions::default_builder()
            .headless(config.headless)
            .sandbox(!is_container)
            .window_size(Some((config.window_width, config.window_height)))
            .path(chrome_path)
            .idle_browser_timeout(Duration::from_secs(config.idle_browser_timeout_secs))
            .args(args)
            .build()
            .map_err(|e| BrowseError::Fatal(format!("Failed to build Chrome launch options: {}", e)))?;

        let browser = Browser::new(options)
            .map_err(|e| BrowseError::Fatal(format!("Failed to launch Chrome: {}", e)))?;

        let tab = browser
            .new_tab()
            .map_err(|e| BrowseError::Fatal(format!("Failed to create browser tab: {}", e)))?;
        tab.set_default_timeout(config.navigation_timeout());
        tab.set_user_agent(&config.user_agent, Some(&config.accept_language), None)
            .map_err(|e| BrowseError::Fatal(format!("Failed to set user agent: {}", e)))?;
        let stealth_registered = register_stealth(&tab);

        info!(
            "Browser session opened (headless={}, window={}x{})",
            config.headless, config.window_width, config.window_height
        );

        Ok(Self {
            browser: Some(browser),
            tab,
            pacing: Pacing::from_config(config),
            stealth_registered,
        })
    }

    fn ensure_open(&self) -> Result<(), BrowseError> {
        if self.browser.is_none() {
            return Err(BrowseError::Fatal("browser session already closed".to_string()));
        }
        Ok(())
    }

    /// Post-navigation fallback when the new-document hook could not be installed
    fn apply_stealth(&self) {
        if self.stealth_registered {
            return;
        }
        if let Err(e) = self.tab.evaluate(STEALTH_SCRIPT, false) {
            debug!("Stealth script failed: {}", e);
        }
    }

    /// Read the current page, flagging block pages
    fn capture(&self, requested: &str) -> Result<PageContent, BrowseError> {
        let html = self
            .tab
            .get_content()
            .map_err(|e| classify_driver_error(requested, &e))?;
        let current = self.tab.get_url();
        let url = if current.is_empty() { requested.to_string() } else { current };
        let page = PageContent::from_html(&url, html);

        if let Some(indicator) = detect_block(&page) {
            warn!("Block page detected at {} ({})", page.url, indicator);
            return Err(BrowseError::Blocked {
                url: page.url,
                indicator: indicator.to_string(),
            });
        }
        Ok(page)
    }

    fn shutdown(&mut self) {
        if let Some(browser) = self.browser.take() {
            if let Err(e) = self.tab.close(false) {
                debug!("Tab close failed: {}", e);
            }
            drop(browser);
            debug!("Browser session closed");
        }
    }
}

fn register_stealth(tab: &Tab) -> bool {
    let registered = tab.call_method(Page::AddScriptToEvaluateOnNewDocument {
        source: STEALTH_SCRIPT.to_string(),
        world_name: None,
        include_command_line_api: None,
        run_immediately: None,
    });
    match registered {
        Ok(_) => true,
        Err(e) => {
            warn!("Could not register stealth script, falling back to post-navigation injection: {}", e);
            false
        }
    }
}

impl Browse for BrowserSession {
    fn navigate(&mut self, url: &str) -> Result<PageContent, BrowseError> {
        self.ensure_open()?;
        debug!("Navigating to {}", url);

        self.tab
            .navigate_to(url)
            .map_err(|e| classify_driver_error(url, &e))?;
        self.tab
            .wait_until_navigated()
            .map_err(|e| classify_driver_error(url, &e))?;

        self.apply_stealth();
        Pacing::pause(self.pacing.settle);
        self.capture(url)
    }

    fn type_text(&mut self, selector: &str, text: &str) -> Result<(), BrowseError> {
        self.ensure_open()?;
        let element = self.tab.find_element(selector).map_err(|e| {
            match classify_driver_error(selector, &e) {
                BrowseError::Fatal(message) => BrowseError::Fatal(message),
                _ => BrowseError::ElementNotFound {
                    selector: selector.to_string(),
                },
            }
        })?;
        element
            .click()
            .map_err(|e| classify_driver_error(selector, &e))?;

        for ch in text.chars() {
            let piece = ch.to_string();
            let typed = if ch.is_ascii() {
                self.tab.type_str(&piece).map(|_| ())
            } else {
                self.tab.send_character(&piece).map(|_| ())
            };
            typed.map_err(|e| classify_driver_error(selector, &e))?;
            Pacing::pause(self.pacing.keystroke);
        }
        Ok(())
    }

    fn submit(&mut self) -> Result<PageContent, BrowseError> {
        self.ensure_open()?;
        Pacing::pause(self.pacing.pre_submit);

        let url = self.tab.get_url();
        self.tab
            .press_key("Enter")
            .map_err(|e| classify_driver_error(&url, &e))?;
        self.tab
            .wait_until_navigated()
            .map_err(|e| classify_driver_error(&url, &e))?;

        self.apply_stealth();
        Pacing::pause(self.pacing.settle);
        self.capture(&url)
    }

    fn close(&mut self) {
        self.shutdown();
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_visible_text_skips_scripts_and_styles() {
        let html = r#"<html><head><style>.x{}</style><script>var fax = "02-999-9999";</script></head>
            <body><p>대표전화 02-123-4567</p><noscript>enable js</noscript><div>FAX 02-123-4568</div></body></html>"#;
        let page = PageContent::from_html("https://acme.or.kr/", html.to_string());
        assert!(page.text.contains("대표전화 02-123-4567"));
        assert!(page.text.contains("FAX 02-123-4568"));
        assert!(!page.text.contains("02-999-9999"));
        assert!(!page.text.contains("enable js"));
    }

    #[test]
    fn test_links_resolved_against_page_url() {
        let html = r##"<a href="/about">About</a><a href="https://other.kr/x">x</a>
            <a href="mailto:a@b.c">mail</a><a href="#top">top</a><a href="/about">dup</a>"##;
        let page = PageContent::from_html("https://acme.or.kr/intro/", html.to_string());
        assert_eq!(
            page.links,
            vec![
                "https://acme.or.kr/about".to_string(),
                "https://other.kr/x".to_string(),
                "https://acme.or.kr/intro/#top".to_string(),
            ]
        );
    }

    #[test]
    fn test_detect_block_indicators() {
        let page = PageContent::from_html(
            "https://www.google.com/sorry/index?continue=x",
            "<html></html>".to_string(),
        );
        assert_eq!(detect_block(&page), Some("google sorry page"));

        let page = PageContent::from_html(
            "https://www.bing.com/search?q=x",
            "<p>Our systems have detected UNUSUAL TRAFFIC from your network</p>".to_string(),
        );
        assert_eq!(detect_block(&page), Some("unusual traffic notice"));

        let page = PageContent::from_html(
            "https://search.naver.com/",
            "<div>자동입력 방지 문자를 입력해 주세요</div>".to_string(),
        );
        assert_eq!(detect_block(&page), Some("automated input notice"));

        let page = PageContent::from_html("https://acme.or.kr/", "<p>hello</p>".to_string());
        assert_eq!(detect_block(&page), None);

        // A contact form CAPTCHA on an organization site is not a block page
        let page = PageContent::from_html(
            "https://acme.or.kr/contact",
            "<div class=\"g-recaptcha\"></div>".to_string(),
        );
        assert_eq!(detect_block(&page), None);
    }

    #[test]
    fn test_classify_driver_error() {
        let timeout = anyhow::anyhow!("The event waited for never came");
        assert!(matches!(
            classify_driver_error("https://a.kr", &timeout),
            BrowseError::Timeout { .. }
        ));

        let closed = anyhow::anyhow!("Unable to make method calls because underlying connection is closed");
        assert!(classify_driver_error("https://a.kr", &closed).is_fatal());

        let other = anyhow::anyhow!("net::ERR_NAME_NOT_RESOLVED");
        let err = classify_driver_error("https://a.kr", &other);
        assert!(err.is_transient());
        assert!(!err.is_fatal());
    }

    #[test]
    #[ignore = "requires a local Chrome installation"]
    fn test_real_browser_navigation() {
        let config = crate::config::AppConfig::from_template().unwrap().browser;
        let mut session = BrowserSession::open(&config).expect("chrome should launch");
        let page = session.navigate("https://example.com/").expect("navigation should succeed");
        assert!(page.text.contains("Example Domain"));
        session.close();
        assert!(session.navigate("https://example.com/").unwrap_err().is_fatal());
    }

    #[test]
    #[ignore = "requires a local Chrome"]
    fn test_page_scripts_never_see_automation_markers() {
        let config = crate::config::AppConfig::from_template().unwrap().browser;
        let mut session = BrowserSession::open(&config).expect("chrome should launch");
        assert!(session.stealth_registered);

        // The page records what its own inline script observed while loading
        let page = session
            .navigate("data:text/html,<body><script>document.body.textContent='webdriver:'+navigator.webdriver+';chrome:'+(typeof%20window.chrome)</script></body>")
            .expect("navigation should succeed");
        assert!(page.text.contains("webdriver:undefined"), "page saw: {}", page.text);
        assert!(page.text.contains("chrome:object"), "page saw: {}", page.text);
    }
}
