use contactfinder::browser::{Browse, BrowseError, PageContent};
use std::sync::{Arc, Mutex};

type Reply = Result<PageContent, BrowseError>;

/// Browser that answers from a script instead of driving Chrome.
///
/// Routes match by URL prefix, longest prefix first. Unknown URLs load an
/// empty page. `submit` answers with the reply registered for the page the
/// search box was typed on.
#[derive(Clone, Default)]
pub struct ScriptedBrowser {
    routes: Vec<(String, Reply)>,
    submits: Vec<(String, Reply)>,
    no_search_box: Vec<String>,
    current: String,
    closed: bool,
    log: Arc<Mutex<Vec<String>>>,
}

fn best_match<'a>(table: &'a [(String, Reply)], url: &str) -> Option<&'a Reply> {
    table
        .iter()
        .filter(|(prefix, _)| url.starts_with(prefix.as_str()))
        .max_by_key(|(prefix, _)| prefix.len())
        .map(|(_, reply)| reply)
}

impl ScriptedBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply for `navigate` to URLs starting with `prefix`
    pub fn route(mut self, prefix: &str, reply: Reply) -> Self {
        self.routes.push((prefix.to_string(), reply));
        self
    }

    /// Reply for `submit` after typing on a page starting with `prefix`
    pub fn on_submit(mut self, prefix: &str, reply: Reply) -> Self {
        self.submits.push((prefix.to_string(), reply));
        self
    }

    /// Pages starting with `prefix` have no search box
    pub fn without_search_box(mut self, prefix: &str) -> Self {
        self.no_search_box.push(prefix.to_string());
        self
    }

    /// Shared view of every call made, e.g. `navigate https://...`
    pub fn log(&self) -> Arc<Mutex<Vec<String>>> {
        self.log.clone()
    }

    pub fn calls(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn record(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }

    fn ensure_open(&self) -> Result<(), BrowseError> {
        if self.closed {
            return Err(BrowseError::Fatal("browser session already closed".to_string()));
        }
        Ok(())
    }
}

impl Browse for ScriptedBrowser {
    fn navigate(&mut self, url: &str) -> Result<PageContent, BrowseError> {
        self.ensure_open()?;
        self.record(format!("navigate {}", url));
        self.current = url.to_string();
        match best_match(&self.routes, url) {
            Some(reply) => reply.clone(),
            None => Ok(PageContent::from_html(url, "<html><body></body></html>".to_string())),
        }
    }

    fn type_text(&mut self, selector: &str, text: &str) -> Result<(), BrowseError> {
        self.ensure_open()?;
        if self.no_search_box.iter().any(|p| self.current.starts_with(p.as_str())) {
            return Err(BrowseError::ElementNotFound {
                selector: selector.to_string(),
            });
        }
        self.record(format!("type {}", text));
        Ok(())
    }

    fn submit(&mut self) -> Result<PageContent, BrowseError> {
        self.ensure_open()?;
        self.record(format!("submit {}", self.current));
        match best_match(&self.submits, &self.current) {
            Some(reply) => reply.clone(),
            None => Ok(PageContent::from_html(&self.current, "<html><body>결과 없음</body></html>".to_string())),
        }
    }

    fn close(&mut self) {
        self.record("close".to_string());
        self.closed = true;
    }
}

pub fn html(url: &str, body: &str) -> Reply {
    Ok(PageContent::from_html(url, format!("<html><body>{}</body></html>", body)))
}

pub fn blocked(url: &str) -> Reply {
    Err(BrowseError::Blocked {
        url: url.to_string(),
        indicator: "recaptcha".to_string(),
    })
}

pub fn timeout(url: &str) -> Reply {
    Err(BrowseError::Timeout { url: url.to_string() })
}

pub fn crashed() -> Reply {
    Err(BrowseError::Fatal("browser crashed".to_string()))
}

/// Every default engine blocks
pub fn all_blocked() -> ScriptedBrowser {
    ScriptedBrowser::new()
        .on_submit("https://www.google.com/", blocked("https://www.google.com/sorry/index"))
        .on_submit("https://www.bing.com/", blocked("https://www.bing.com/search"))
        .on_submit("https://www.naver.com/", blocked("https://search.naver.com/search.naver"))
        .on_submit("https://www.daum.net/", blocked("https://search.daum.net/search"))
}
