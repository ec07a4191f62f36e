use contactfinder::browser::PageContent;
use std::path::PathBuf;

pub fn fixture_path(relative: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(relative)
}

pub fn load_fixture(relative: &str) -> String {
    std::fs::read_to_string(fixture_path(relative))
        .unwrap_or_else(|_| panic!("Failed to load fixture: {}", relative))
}

/// Parse an HTML fixture as if it had been loaded from `url`
pub fn page_fixture(url: &str, relative: &str) -> PageContent {
    PageContent::from_html(url, load_fixture(&format!("pages/{}", relative)))
}
