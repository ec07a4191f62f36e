//! Candidate validation for phone-shaped fields and homepage URLs.
//!
//! Everything here is pure: a verdict depends only on the candidate, the
//! field it is proposed for and the record's current values.

use serde::Serialize;
use tracing::{debug, warn};

use crate::config::ValidatorConfig;
use crate::domain_utils;
use crate::record::{FieldType, OrganizationRecord};

/// Number families recognised by the shape table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NumberClass {
    /// `02`, 9–10 digits
    Seoul,
    /// `031–033, 041–044, 051–055, 061–064`, 10–11 digits
    Regional,
    /// `010` (11 digits) and legacy `011, 016–019` (10–11 digits)
    Mobile,
    /// `070`, 10–11 digits
    Voip,
    /// `15xx, 16xx, 18xx`, 8 digits
    Representative,
}

impl NumberClass {
    /// Classes exempt from the area-code check when offered as a candidate
    pub fn is_prefix_agnostic(&self) -> bool {
        matches!(self, NumberClass::Voip | NumberClass::Representative)
    }

    /// Classes whose prefix names a region
    pub fn is_geographic(&self) -> bool {
        matches!(self, NumberClass::Seoul | NumberClass::Regional)
    }
}

const REGIONAL_PREFIXES: &[&str] = &[
    "031", "032", "033", "041", "042", "043", "044", "051", "052", "053", "054", "055", "061",
    "062", "063", "064",
];

const LEGACY_MOBILE_PREFIXES: &[&str] = &["011", "016", "017", "018", "019"];

/// A phone-shaped value reduced to domestic digits and classified
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedNumber {
    digits: String,
    prefix_len: usize,
    class: NumberClass,
}

impl ParsedNumber {
    /// Parse a raw string. Returns `None` unless the digits match the shape table.
    pub fn parse(raw: &str) -> Option<Self> {
        let digits = domestic_digits(raw);
        let len = digits.len();

        if digits.starts_with("02") {
            return (9..=10).contains(&len).then(|| Self {
                digits,
                prefix_len: 2,
                class: NumberClass::Seoul,
            });
        }

        if len == 8 && (digits.starts_with("15") || digits.starts_with("16") || digits.starts_with("18")) {
            return Some(Self {
                digits,
                prefix_len: 4,
                class: NumberClass::Representative,
            });
        }

        if len < 3 {
            return None;
        }
        let prefix = &digits[..3];
        let class = if REGIONAL_PREFIXES.contains(&prefix) && (10..=11).contains(&len) {
            NumberClass::Regional
        } else if prefix == "010" && len == 11 {
            NumberClass::Mobile
        } else if LEGACY_MOBILE_PREFIXES.contains(&prefix) && (10..=11).contains(&len) {
            NumberClass::Mobile
        } else if prefix == "070" && (10..=11).contains(&len) {
            NumberClass::Voip
        } else {
            return None;
        };

        Some(Self {
            digits,
            prefix_len: 3,
            class,
        })
    }

    pub fn digits(&self) -> &str {
        &self.digits
    }

    pub fn prefix(&self) -> &str {
        &self.digits[..self.prefix_len]
    }

    /// Subscriber part after the area or service prefix
    pub fn suffix(&self) -> &str {
        &self.digits[self.prefix_len..]
    }

    pub fn class(&self) -> NumberClass {
        self.class
    }

    /// Canonical hyphenated form: `02-333-4444`, `031-123-4567`, `1588-1234`
    pub fn formatted(&self) -> String {
        if self.class == NumberClass::Representative {
            return format!("{}-{}", &self.digits[..4], &self.digits[4..]);
        }
        let suffix = self.suffix();
        let split = suffix.len() - 4;
        format!("{}-{}-{}", self.prefix(), &suffix[..split], &suffix[split..])
    }
}

/// Reduce a raw number to digits, folding a `+82` country code to the domestic `0`
pub fn domestic_digits(raw: &str) -> String {
    let trimmed = raw.trim();
    let digits: String = trimmed.chars().filter(|c| c.is_ascii_digit()).collect();

    let international = trimmed.starts_with('+') || trimmed.starts_with("0082");
    if international {
        let rest = digits
            .strip_prefix("0082")
            .or_else(|| digits.strip_prefix("82"));
        if let Some(rest) = rest {
            return if rest.starts_with('0') {
                rest.to_string()
            } else {
                format!("0{}", rest)
            };
        }
    }
    digits
}

/// Region name substrings (Korean and romanized) expected in the address of
/// an organization using a geographic prefix
pub fn region_names(prefix: &str) -> Option<&'static [&'static str]> {
    let names: &'static [&'static str] = match prefix {
        "02" => &["서울", "seoul"],
        "031" => &[
            "경기", "gyeonggi", "수원", "suwon", "성남", "seongnam", "고양", "goyang", "용인",
            "yongin", "안양", "anyang", "안산", "ansan", "화성", "hwaseong", "평택",
            "pyeongtaek", "의정부", "uijeongbu", "파주", "paju", "김포", "gimpo", "광명",
            "gwangmyeong", "남양주", "namyangju", "하남", "hanam", "시흥", "siheung", "군포",
            "gunpo", "오산", "osan", "이천", "icheon", "구리", "guri", "과천", "gwacheon",
        ],
        "032" => &["인천", "incheon", "부천", "bucheon"],
        "033" => &[
            "강원", "gangwon", "춘천", "chuncheon", "원주", "wonju", "강릉", "gangneung",
            "속초", "sokcho",
        ],
        "041" => &[
            "충남", "충청남도", "chungnam", "chungcheongnam", "천안", "cheonan", "아산", "asan",
            "공주", "gongju", "서산", "seosan", "당진", "dangjin", "논산", "nonsan", "보령",
            "boryeong", "홍성", "hongseong",
        ],
        "042" => &["대전", "daejeon"],
        "043" => &[
            "충북", "충청북도", "chungbuk", "chungcheongbuk", "청주", "cheongju", "충주",
            "chungju", "제천", "jecheon",
        ],
        "044" => &["세종", "sejong"],
        "051" => &["부산", "busan"],
        "052" => &["울산", "ulsan"],
        "053" => &["대구", "daegu", "경산", "gyeongsan"],
        "054" => &[
            "경북", "경상북도", "gyeongbuk", "gyeongsangbuk", "포항", "pohang", "구미", "gumi",
            "경주", "gyeongju", "안동", "andong",
        ],
        "055" => &[
            "경남", "경상남도", "gyeongnam", "gyeongsangnam", "창원", "changwon", "김해",
            "gimhae", "진주", "jinju", "양산", "yangsan", "거제", "geoje",
        ],
        "061" => &[
            "전남", "전라남도", "jeonnam", "jeollanam", "목포", "mokpo", "여수", "yeosu", "순천",
            "suncheon", "나주", "naju",
        ],
        "062" => &["광주", "gwangju"],
        "063" => &[
            "전북", "전라북도", "jeonbuk", "jeollabuk", "전주", "jeonju", "군산", "gunsan",
            "익산", "iksan",
        ],
        "064" => &["제주", "jeju"],
        _ => return None,
    };
    Some(names)
}

/// Why a candidate was rejected
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum RejectReason {
    /// Digits do not match any shape in the table
    Malformed,
    /// Area prefix differs from the known phone's prefix
    AreaMismatch { candidate: String, known: String },
    /// Address names none of the regions served by the prefix
    AddressMismatch { prefix: String },
    /// Same length and prefix as another field with too few differing suffix digits
    NearDuplicate { field: FieldType, differing_digits: usize },
    /// Identical to a field of a different type
    ExactDuplicate { field: FieldType },
    /// Not an absolute http(s) URL
    InvalidUrl,
    /// Portal, blog, search engine or social network
    ExcludedHost { host: String },
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::Malformed => write!(f, "malformed number"),
            RejectReason::AreaMismatch { candidate, known } => {
                write!(f, "area code {} does not match phone area code {}", candidate, known)
            }
            RejectReason::AddressMismatch { prefix } => {
                write!(f, "address is outside the region served by {}", prefix)
            }
            RejectReason::NearDuplicate { field, differing_digits } => write!(
                f,
                "differs from {} by only {} suffix digit(s)",
                field, differing_digits
            ),
            RejectReason::ExactDuplicate { field } => write!(f, "identical to {}", field),
            RejectReason::InvalidUrl => write!(f, "not an absolute http(s) URL"),
            RejectReason::ExcludedHost { host } => write!(f, "{} is not an organization site", host),
        }
    }
}

/// Outcome of validating one candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Verdict {
    pub accepted: bool,
    pub normalized_value: Option<String>,
    pub reason: Option<RejectReason>,
}

impl Verdict {
    fn accept(value: String) -> Self {
        Self {
            accepted: true,
            normalized_value: Some(value),
            reason: None,
        }
    }

    fn reject(reason: RejectReason) -> Self {
        Self {
            accepted: false,
            normalized_value: None,
            reason: Some(reason),
        }
    }
}

/// Judges candidates against the shape table and the record's known fields
#[derive(Debug, Clone)]
pub struct Validator {
    config: ValidatorConfig,
}

impl Default for Validator {
    fn default() -> Self {
        Self::new(ValidatorConfig::default())
    }
}

impl Validator {
    pub fn new(config: ValidatorConfig) -> Self {
        Self { config }
    }

    /// Validate a candidate for `field` against `record`
    pub fn validate(&self, candidate: &str, field: FieldType, record: &OrganizationRecord) -> Verdict {
        let verdict = match field {
            FieldType::Homepage => self.validate_homepage(candidate),
            FieldType::Phone | FieldType::Fax => self.validate_number(candidate, field, record),
        };
        if let Some(reason) = &verdict.reason {
            debug!("Rejected {} candidate '{}' for {}: {}", field, candidate, record.id, reason);
        }
        verdict
    }

    fn validate_number(&self, candidate: &str, field: FieldType, record: &OrganizationRecord) -> Verdict {
        let parsed = match ParsedNumber::parse(candidate) {
            Some(p) => p,
            None => return Verdict::reject(RejectReason::Malformed),
        };

        let other_field = match field {
            FieldType::Fax => FieldType::Phone,
            _ => FieldType::Fax,
        };
        let other = record.field(other_field).and_then(ParsedNumber::parse);

        if let Some(other) = &other {
            if other.digits() == parsed.digits() {
                return Verdict::reject(RejectReason::ExactDuplicate { field: other_field });
            }
            if let Some(diff) = self.near_duplicate(&parsed, other) {
                return Verdict::reject(RejectReason::NearDuplicate {
                    field: other_field,
                    differing_digits: diff,
                });
            }
        }

        // Area consistency against the known phone only
        if field == FieldType::Fax {
            if let Some(phone) = &other {
                // A mobile phone carries no area, so there is nothing to compare against
                let exempt = parsed.class().is_prefix_agnostic() || !phone.class().is_geographic();
                if !exempt && parsed.prefix() != phone.prefix() {
                    return Verdict::reject(RejectReason::AreaMismatch {
                        candidate: parsed.prefix().to_string(),
                        known: phone.prefix().to_string(),
                    });
                }
            }
        }

        if parsed.class().is_geographic() {
            if let Some(address) = record.address.as_deref().map(str::trim).filter(|a| !a.is_empty()) {
                match region_names(parsed.prefix()) {
                    Some(names) => {
                        let lower = address.to_lowercase();
                        if !names.iter().any(|n| lower.contains(n)) {
                            return Verdict::reject(RejectReason::AddressMismatch {
                                prefix: parsed.prefix().to_string(),
                            });
                        }
                    }
                    None => warn!(
                        "No region mapping for prefix {}; skipping address check for {}",
                        parsed.prefix(),
                        record.id
                    ),
                }
            }
        }

        Verdict::accept(parsed.formatted())
    }

    /// Number of differing suffix digits when the pair is close enough to reject
    fn near_duplicate(&self, candidate: &ParsedNumber, other: &ParsedNumber) -> Option<usize> {
        if candidate.digits().len() != other.digits().len() || candidate.prefix() != other.prefix() {
            return None;
        }
        let diff = candidate
            .suffix()
            .chars()
            .zip(other.suffix().chars())
            .filter(|(a, b)| a != b)
            .count();
        (diff <= self.config.near_duplicate_max_diff).then_some(diff)
    }

    fn validate_homepage(&self, candidate: &str) -> Verdict {
        match normalize_homepage(candidate) {
            Ok(value) => Verdict::accept(value),
            Err(reason) => Verdict::reject(reason),
        }
    }
}

/// Normalize a homepage URL to `scheme://host/path`, dropping query and fragment
pub fn normalize_homepage(candidate: &str) -> Result<String, RejectReason> {
    let parsed = url::Url::parse(candidate.trim()).map_err(|_| RejectReason::InvalidUrl)?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(RejectReason::InvalidUrl);
    }
    let host = parsed.host_str().ok_or(RejectReason::InvalidUrl)?.to_lowercase();
    if domain_utils::is_excluded_host(&host) {
        return Err(RejectReason::ExcludedHost { host });
    }

    let authority = match parsed.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host,
    };
    let path = parsed.path().trim_end_matches('/');
    Ok(format!("{}://{}{}", parsed.scheme(), authority, path))
}
