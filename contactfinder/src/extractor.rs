//! Candidate extraction from rendered pages
//!
//! Phone-shaped fields are pulled out of visible text with ordered regex
//! patterns. Homepages are chosen by scoring outbound links. When nothing
//! matches and an AI assistant is configured, the page text is handed to it.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::ai::AiAssistant;
use crate::browser::PageContent;
use crate::domain_utils;
use crate::record::FieldType;
use crate::validator::domestic_digits;

/// How a candidate was found
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExtractionMethod {
    /// Number preceded by a fax label
    LabelPattern,
    /// Number shape with no label
    BarePattern,
    /// Outbound link ranked by the homepage scorer
    LinkScoring,
    /// Proposed by the AI assistant
    AiAssisted,
}

impl std::fmt::Display for ExtractionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractionMethod::LabelPattern => write!(f, "label-pattern"),
            ExtractionMethod::BarePattern => write!(f, "bare-pattern"),
            ExtractionMethod::LinkScoring => write!(f, "link-scoring"),
            ExtractionMethod::AiAssisted => write!(f, "ai-assisted"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Confidence {
    Low,
    Medium,
    High,
}

/// An unvalidated value proposed for one field
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionCandidate {
    pub raw_value: String,
    pub field_type: FieldType,
    pub source_url: String,
    pub method: ExtractionMethod,
    pub confidence: Confidence,
}

/// Number with an explicit fax label in front of it
static LABELED_FAX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(?:fax|팩스|전송)\s*(?:번호)?\s*[:：.)\]]?\s*((?:\+82[-.\s]?(?:\(0\)\s?)?0?\d{1,2}|\(?0\d{1,2}\)?)[-.\s]?\d{3,4}[-.\s]?\d{4})",
    )
    .expect("labeled fax regex")
});

/// Landline, mobile or VoIP number without a label
static BARE_NUMBER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:\+82[-.\s]?(?:\(0\)\s?)?0?\d{1,2}|\(?0\d{1,2}\)?)[-.\s]?\d{3,4}[-.\s]\d{4}")
        .expect("bare number regex")
});

/// Representative numbers like 1588-1234
static REPRESENTATIVE_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b1[5-8]\d{2}-\d{4}\b").expect("representative number regex"));

/// Search engine click-tracking redirects
const REDIRECT_PARAMS: &[&str] = &["q", "url", "u"];

/// Runs extraction for one page and one field
#[derive(Clone, Default)]
pub struct Extractor {
    assistant: Option<Arc<dyn AiAssistant>>,
    min_ai_confidence: f32,
}

impl Extractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable AI escalation for pages where the patterns yield nothing
    pub fn with_assistant(mut self, assistant: Arc<dyn AiAssistant>, min_confidence: f32) -> Self {
        self.assistant = Some(assistant);
        self.min_ai_confidence = min_confidence;
        self
    }

    /// Candidates for `field` on `page`, best first
    pub fn extract(&self, page: &PageContent, field: FieldType, org_name: &str) -> Vec<ExtractionCandidate> {
        let candidates = match field {
            FieldType::Fax => extract_fax_numbers(page),
            FieldType::Phone => extract_bare_numbers(page, field),
            FieldType::Homepage => score_homepage_links(page, org_name),
        };

        if !candidates.is_empty() {
            debug!("Extracted {} {} candidate(s) from {}", candidates.len(), field, page.url);
            return candidates;
        }

        self.escalate(page, field, org_name).into_iter().collect()
    }

    fn escalate(&self, page: &PageContent, field: FieldType, org_name: &str) -> Option<ExtractionCandidate> {
        let assistant = self.assistant.as_ref()?;
        if page.text.trim().is_empty() {
            return None;
        }

        let answer = match assistant.ask_for_field(&page.text, org_name, field) {
            Ok(answer) => answer,
            Err(e) => {
                warn!("AI assistance failed for {} of '{}': {}", field, org_name, e);
                return None;
            }
        };

        let value = answer.value?;
        if answer.confidence < self.min_ai_confidence {
            debug!(
                "Discarding AI {} answer for '{}' (confidence {:.2} < {:.2})",
                field, org_name, answer.confidence, self.min_ai_confidence
            );
            return None;
        }

        let confidence = if answer.confidence >= 0.8 {
            Confidence::Medium
        } else {
            Confidence::Low
        };
        Some(ExtractionCandidate {
            raw_value: value,
            field_type: field,
            source_url: page.url.clone(),
            method: ExtractionMethod::AiAssisted,
            confidence,
        })
    }
}

fn extract_fax_numbers(page: &PageContent) -> Vec<ExtractionCandidate> {
    let mut seen = HashSet::new();
    let mut candidates = Vec::new();

    for caps in LABELED_FAX.captures_iter(&page.text) {
        if let Some(m) = caps.get(1) {
            push_unique(&mut candidates, &mut seen, page, FieldType::Fax, m.as_str(), ExtractionMethod::LabelPattern, Confidence::High);
        }
    }
    for candidate in extract_bare_numbers(page, FieldType::Fax) {
        push_unique(
            &mut candidates,
            &mut seen,
            page,
            FieldType::Fax,
            &candidate.raw_value,
            candidate.method,
            candidate.confidence,
        );
    }
    candidates
}

fn extract_bare_numbers(page: &PageContent, field: FieldType) -> Vec<ExtractionCandidate> {
    let mut seen = HashSet::new();
    let mut candidates = Vec::new();
    for m in BARE_NUMBER.find_iter(&page.text).chain(REPRESENTATIVE_NUMBER.find_iter(&page.text)) {
        push_unique(&mut candidates, &mut seen, page, field, m.as_str(), ExtractionMethod::BarePattern, Confidence::Low);
    }
    candidates
}

fn push_unique(
    candidates: &mut Vec<ExtractionCandidate>,
    seen: &mut HashSet<String>,
    page: &PageContent,
    field: FieldType,
    raw: &str,
    method: ExtractionMethod,
    confidence: Confidence,
) {
    let key = domestic_digits(raw);
    if key.is_empty() || !seen.insert(key) {
        return;
    }
    candidates.push(ExtractionCandidate {
        raw_value: raw.trim().to_string(),
        field_type: field,
        source_url: page.url.clone(),
        method,
        confidence,
    });
}

/// Unwrap click-tracking redirects such as Google's `/url?q=`
pub fn unwrap_redirect(link: &str) -> Option<url::Url> {
    let parsed = url::Url::parse(link).ok()?;
    let host = parsed.host_str().unwrap_or_default();
    if domain_utils::is_excluded_host(host) {
        for (key, value) in parsed.query_pairs() {
            if REDIRECT_PARAMS.contains(&key.as_ref()) {
                if let Ok(target) = url::Url::parse(&value) {
                    if matches!(target.scheme(), "http" | "https") {
                        return Some(target);
                    }
                }
            }
        }
    }
    Some(parsed)
}

/// Name tokens long enough to be meaningful in a host name
fn name_tokens(org_name: &str) -> Vec<String> {
    org_name
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.is_ascii() && t.len() >= 3)
        .map(|t| t.to_lowercase())
        .collect()
}

/// Score a link as a homepage for `org_name`
pub fn score_link(link: &url::Url, org_name: &str) -> i32 {
    let host = link.host_str().unwrap_or_default();
    let mut score = 0;

    if domain_utils::is_official_host(host) {
        score += 3;
    } else if domain_utils::is_regional_host(host) {
        score += 1;
    }

    let label = domain_utils::registrable_label(host);
    let matches_name = label.len() >= 3
        && name_tokens(org_name)
            .iter()
            .any(|t| label.contains(t.as_str()) || t.contains(label.as_str()));
    if matches_name {
        score += 3;
    }

    let depth = link.path_segments().map(|s| s.filter(|p| !p.is_empty()).count()).unwrap_or(0);
    score += match depth {
        0 => 2,
        1 => 1,
        _ => 0,
    };

    if link.scheme() == "https" {
        score += 1;
    }
    score
}

fn score_homepage_links(page: &PageContent, org_name: &str) -> Vec<ExtractionCandidate> {
    // Best link per registrable domain, first seen wins ties
    let mut best: Vec<(String, i32, url::Url)> = Vec::new();
    for link in &page.links {
        let Some(target) = unwrap_redirect(link) else {
            continue;
        };
        let Some(host) = target.host_str() else {
            continue;
        };
        if domain_utils::is_excluded_host(host) {
            continue;
        }
        let base = domain_utils::extract_base_domain(host);
        let score = score_link(&target, org_name);
        match best.iter_mut().find(|(b, _, _)| *b == base) {
            Some(entry) if score > entry.1 => {
                entry.1 = score;
                entry.2 = target;
            }
            Some(_) => {}
            None => best.push((base, score, target)),
        }
    }

    // Stable sort keeps page order among equal scores
    best.sort_by(|a, b| b.1.cmp(&a.1));
    best.into_iter()
        .enumerate()
        .map(|(i, (_, _, target))| ExtractionCandidate {
            raw_value: target.to_string(),
            field_type: FieldType::Homepage,
            source_url: page.url.clone(),
            method: ExtractionMethod::LinkScoring,
            confidence: if i == 0 { Confidence::High } else { Confidence::Low },
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::AiAnswer;

    fn page(url: &str, html: &str) -> PageContent {
        PageContent::from_html(url, html.to_string())
    }

    struct FixedAssistant(AiAnswer);

    impl AiAssistant for FixedAssistant {
        fn ask_for_field(&self, _: &str, _: &str, _: FieldType) -> anyhow::Result<AiAnswer> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_labeled_fax_comes_first() {
        let p = page(
            "https://acme.or.kr/contact",
            "<p>대표전화 02-111-2222</p><p>팩스 : 02-333-4444</p><p>FAX) 02 333 4444</p>",
        );
        let candidates = Extractor::new().extract(&p, FieldType::Fax, "Acme");
        assert_eq!(candidates[0].raw_value, "02-333-4444");
        assert_eq!(candidates[0].method, ExtractionMethod::LabelPattern);
        assert_eq!(candidates[0].confidence, Confidence::High);
        // de-duplicated by digits; phone remains as a low-confidence bare candidate
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[1].raw_value, "02-111-2222");
        assert_eq!(candidates[1].confidence, Confidence::Low);
    }

    #[test]
    fn test_transmission_label_and_international_form() {
        let p = page("https://acme.kr", "<p>전송번호: +82-31-123-4567</p>");
        let candidates = Extractor::new().extract(&p, FieldType::Fax, "Acme");
        assert_eq!(candidates[0].raw_value, "+82-31-123-4567");
        assert_eq!(candidates[0].method, ExtractionMethod::LabelPattern);
    }

    #[test]
    fn test_representative_number_is_bare_candidate() {
        let p = page("https://acme.kr", "<p>고객센터 1588-1234</p>");
        let candidates = Extractor::new().extract(&p, FieldType::Fax, "Acme");
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].raw_value, "1588-1234");
        assert_eq!(candidates[0].method, ExtractionMethod::BarePattern);
    }

    #[test]
    fn test_homepage_scoring_prefers_official_named_host() {
        let p = page(
            "https://www.google.com/search?q=acme",
            r#"<a href="https://blog.naver.com/acme">blog</a>
               <a href="/url?q=https://www.acme.or.kr/&amp;sa=U">official</a>
               <a href="https://directory.example.com/orgs/acme/detail">dir</a>
               <a href="https://www.acme.or.kr/intro/history">deep</a>"#,
        );
        let candidates = Extractor::new().extract(&p, FieldType::Homepage, "Acme Center");
        assert_eq!(candidates[0].raw_value, "https://www.acme.or.kr/");
        assert_eq!(candidates[0].confidence, Confidence::High);
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[1].confidence, Confidence::Low);
        assert!(candidates.iter().all(|c| !c.raw_value.contains("naver")));
    }

    #[test]
    fn test_unwrap_redirect() {
        let target = unwrap_redirect("https://www.google.com/url?q=https://acme.kr/&sa=U").unwrap();
        assert_eq!(target.as_str(), "https://acme.kr/");
        let direct = unwrap_redirect("https://acme.kr/about?q=https://x.kr").unwrap();
        assert_eq!(direct.as_str(), "https://acme.kr/about?q=https://x.kr");
    }

    #[test]
    fn test_ai_escalation_only_when_patterns_fail() {
        let assistant = Arc::new(FixedAssistant(AiAnswer {
            value: Some("02-333-4444".to_string()),
            confidence: 0.85,
        }));
        let extractor = Extractor::new().with_assistant(assistant, 0.6);

        let empty = page("https://acme.kr", "<p>Contact us via the form below</p>");
        let candidates = extractor.extract(&empty, FieldType::Fax, "Acme");
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].method, ExtractionMethod::AiAssisted);
        assert_eq!(candidates[0].confidence, Confidence::Medium);

        let labeled = page("https://acme.kr", "<p>FAX 02-555-6666</p>");
        let candidates = extractor.extract(&labeled, FieldType::Fax, "Acme");
        assert_eq!(candidates[0].method, ExtractionMethod::LabelPattern);
    }

    #[test]
    fn test_ai_low_confidence_discarded() {
        let assistant = Arc::new(FixedAssistant(AiAnswer {
            value: Some("02-333-4444".to_string()),
            confidence: 0.3,
        }));
        let extractor = Extractor::new().with_assistant(assistant, 0.6);
        let empty = page("https://acme.kr", "<p>nothing here</p>");
        assert!(extractor.extract(&empty, FieldType::Fax, "Acme").is_empty());
    }
}
