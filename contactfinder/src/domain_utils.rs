//! Host and domain helpers shared by the validator and the homepage scorer.

/// Hosts that are never an organization's own homepage: search engines,
/// portals, blogs, social networks, directories and map services.
const EXCLUDED_BASE_DOMAINS: &[&str] = &[
    // search engines and portals
    "google.com", "google.co.kr", "googleusercontent.com", "gstatic.com",
    "bing.com", "microsoft.com", "msn.com",
    "naver.com", "naver.me", "pstatic.net",
    "daum.net", "kakao.com", "kakaocdn.net",
    "nate.com", "zum.com", "yahoo.com",
    // social networks and video
    "facebook.com", "instagram.com", "twitter.com", "x.com", "youtube.com",
    "youtu.be", "linkedin.com", "tiktok.com", "pinterest.com",
    // blogs and hosted pages
    "tistory.com", "blogspot.com", "wordpress.com", "brunch.co.kr",
    "modoo.at", "egloos.com",
    // directories, encyclopedias, maps, job boards
    "wikipedia.org", "namu.wiki", "saramin.co.kr", "jobkorea.co.kr",
    "incruit.com", "catch.co.kr", "114.co.kr", "work.go.kr",
];

/// Second-level suffixes that mark a domain as belonging to a public or
/// accredited organization.
const OFFICIAL_SUFFIXES: &[&str] = &[".go.kr", ".or.kr", ".ac.kr", ".re.kr"];

/// Compound public suffixes under which the registrable domain needs three labels.
const COMPOUND_TLDS: &[&str] = &[
    "co.kr", "or.kr", "go.kr", "ac.kr", "re.kr", "ne.kr", "pe.kr", "ms.kr",
    "hs.kr", "es.kr", "sc.kr", "kg.kr", "seoul.kr", "busan.kr",
    "co.uk", "co.jp", "com.au",
];

/// Extract the registrable domain (e.g. `acme.or.kr` from `www.acme.or.kr`)
pub fn extract_base_domain(host: &str) -> String {
    let cleaned = normalize_host(host);
    let parts: Vec<&str> = cleaned.split('.').filter(|p| !p.is_empty()).collect();

    if parts.len() <= 2 {
        return parts.join(".");
    }

    let last_two = format!("{}.{}", parts[parts.len() - 2], parts[parts.len() - 1]);
    if COMPOUND_TLDS.contains(&last_two.as_str()) {
        format!("{}.{}", parts[parts.len() - 3], last_two)
    } else {
        last_two
    }
}

/// Lowercase a host and drop a leading `www.` and any trailing dot
pub fn normalize_host(host: &str) -> String {
    let lower = host.trim().trim_end_matches('.').to_lowercase();
    lower.strip_prefix("www.").map(str::to_string).unwrap_or(lower)
}

/// Whether a host belongs to a portal, search engine, blog or social network
pub fn is_excluded_host(host: &str) -> bool {
    let base = extract_base_domain(host);
    let normalized = normalize_host(host);
    EXCLUDED_BASE_DOMAINS
        .iter()
        .any(|d| base == *d || normalized == *d || normalized.ends_with(&format!(".{}", d)))
}

/// Whether a host sits under a Korean public-sector or academic suffix
pub fn is_official_host(host: &str) -> bool {
    let normalized = normalize_host(host);
    OFFICIAL_SUFFIXES.iter().any(|s| normalized.ends_with(s))
}

/// Whether a host sits under a generic `.kr` or `.org` domain
pub fn is_regional_host(host: &str) -> bool {
    let normalized = normalize_host(host);
    normalized.ends_with(".kr") || normalized.ends_with(".org")
}

/// Label of the registrable domain without its public suffix (`acme` for `www.acme.or.kr`)
pub fn registrable_label(host: &str) -> String {
    let base = extract_base_domain(host);
    base.split('.').next().unwrap_or_default().to_string()
}
