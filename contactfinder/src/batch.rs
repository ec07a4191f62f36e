//! Input loading for organization lists
//!
//! Supports:
//! - CSV files with a header row containing a name column and optional
//!   id/address/phone/fax/homepage columns (common Korean and English aliases)
//! - JSON files with an array of objects or `{"organizations": [...]}`
//!
//! Records without an id get one derived from name, address and phone so the
//! same input produces the same ids on every run.

use anyhow::{bail, Context, Result};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

use crate::record::OrganizationRecord;

/// Input format for organization files
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputFormat {
    Csv,
    Json,
}

impl InputFormat {
    /// Detect format from file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension().and_then(|e| e.to_str()).map(|e| e.to_lowercase()).as_deref() {
            Some("csv") => Some(Self::Csv),
            Some("json") => Some(Self::Json),
            _ => None,
        }
    }
}

/// Column a header maps to
#[derive(Debug, Clone, Copy, PartialEq)]
enum Column {
    Id,
    Name,
    Address,
    Phone,
    Fax,
    Homepage,
}

const COLUMN_ALIASES: &[(Column, &[&str])] = &[
    (Column::Id, &["id", "org_id", "organization_id", "번호", "코드"]),
    (Column::Name, &["name", "organization", "org", "company", "기관명", "기관", "상호", "업체명", "이름"]),
    (Column::Address, &["address", "addr", "주소", "소재지"]),
    (Column::Phone, &["phone", "tel", "telephone", "전화", "전화번호", "대표번호"]),
    (Column::Fax, &["fax", "팩스", "팩스번호"]),
    (Column::Homepage, &["homepage", "website", "url", "site", "홈페이지", "웹사이트"]),
];

fn column_for(header: &str) -> Option<Column> {
    let normalized = header.trim().trim_start_matches('\u{feff}').to_lowercase().replace([' ', '-'], "_");
    COLUMN_ALIASES
        .iter()
        .find(|(_, aliases)| aliases.contains(&normalized.as_str()))
        .map(|(column, _)| *column)
}

/// One input row before ids are assigned
#[derive(Debug, Clone, Default, PartialEq)]
struct RawEntry {
    id: Option<String>,
    name: String,
    address: Option<String>,
    phone: Option<String>,
    fax: Option<String>,
    homepage: Option<String>,
}

impl RawEntry {
    fn set(&mut self, column: Column, value: &str) {
        let value = value.trim();
        let cleaned = Some(value.to_string()).filter(|v| !v.is_empty());
        match column {
            Column::Id => self.id = cleaned,
            Column::Name => self.name = value.to_string(),
            Column::Address => self.address = cleaned,
            Column::Phone => self.phone = cleaned,
            Column::Fax => self.fax = cleaned,
            Column::Homepage => self.homepage = cleaned,
        }
    }
}

/// Parse an organization file (auto-detects format from extension)
pub fn load_organizations(path: &Path) -> Result<Vec<OrganizationRecord>> {
    let format = InputFormat::from_path(path).with_context(|| {
        format!(
            "Cannot determine input format from file extension. Expected .csv or .json: {}",
            path.display()
        )
    })?;

    let content = fs::read_to_string(path).with_context(|| format!("Failed to read input file: {}", path.display()))?;

    match format {
        InputFormat::Csv => parse_csv_organizations(&content),
        InputFormat::Json => parse_json_organizations(&content),
    }
}

/// Parse organizations from CSV content with a header row
pub fn parse_csv_organizations(content: &str) -> Result<Vec<OrganizationRecord>> {
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(content.as_bytes());

    let headers = reader.headers().context("Failed to read CSV headers")?.clone();
    let columns: Vec<Option<Column>> = headers.iter().map(column_for).collect();
    if !columns.contains(&Some(Column::Name)) {
        bail!("CSV must have a 'name' column (found: {})", headers.iter().collect::<Vec<_>>().join(", "));
    }

    let mut entries = Vec::new();
    for (line, result) in reader.records().enumerate() {
        let row = result.with_context(|| format!("Failed to parse CSV record {}", line + 1))?;
        let mut entry = RawEntry::default();
        for (value, column) in row.iter().zip(&columns) {
            if let Some(column) = column {
                entry.set(*column, value);
            }
        }
        entries.push(entry);
    }

    assign_ids(entries)
}

/// Parse organizations from JSON content
///
/// Supports two formats:
/// 1. Array of objects: [{"name": "...", "phone": "..."}]
/// 2. Object with "organizations" array: {"organizations": [...]}
pub fn parse_json_organizations(content: &str) -> Result<Vec<OrganizationRecord>> {
    let value: serde_json::Value = serde_json::from_str(content).context("Failed to parse JSON content")?;

    let items = match &value {
        serde_json::Value::Array(arr) => arr,
        serde_json::Value::Object(obj) => match obj.get("organizations") {
            Some(serde_json::Value::Array(arr)) => arr,
            Some(_) => bail!("'organizations' field must be an array"),
            None => bail!("JSON object must have an 'organizations' array field"),
        },
        _ => bail!("JSON must be an array of organizations or an object with 'organizations' field"),
    };

    let mut entries = Vec::new();
    for item in items {
        let serde_json::Value::Object(obj) = item else {
            warn!("Skipping non-object organization entry: {}", item);
            continue;
        };
        let mut entry = RawEntry::default();
        for (key, value) in obj {
            let Some(column) = column_for(key) else { continue };
            match value {
                serde_json::Value::String(s) => entry.set(column, s),
                serde_json::Value::Number(n) => entry.set(column, &n.to_string()),
                _ => {}
            }
        }
        entries.push(entry);
    }

    assign_ids(entries)
}

/// Turn raw rows into records, deriving ids where the input has none.
fn assign_ids(entries: Vec<RawEntry>) -> Result<Vec<OrganizationRecord>> {
    let mut used: HashSet<String> = entries.iter().filter_map(|e| e.id.clone()).collect();
    let mut seen_supplied = HashSet::new();
    let mut records = Vec::with_capacity(entries.len());

    for (index, entry) in entries.into_iter().enumerate() {
        if entry.name.trim().is_empty() {
            warn!("Skipping input row {} without a name", index + 1);
            continue;
        }

        let id = match entry.id {
            Some(id) => {
                if !seen_supplied.insert(id.clone()) {
                    bail!("Duplicate organization id '{}' in input", id);
                }
                id
            }
            None => {
                let base = derive_id(&entry.name, entry.address.as_deref(), entry.phone.as_deref());
                let mut candidate = base.clone();
                let mut suffix = 2;
                while used.contains(&candidate) {
                    candidate = format!("{}-{}", base, suffix);
                    suffix += 1;
                }
                debug!("Derived id {} for '{}'", candidate, entry.name);
                candidate
            }
        };
        used.insert(id.clone());

        let mut record = OrganizationRecord::new(id, entry.name.trim());
        record.address = entry.address;
        record.phone = entry.phone;
        record.fax = entry.fax;
        record.homepage = entry.homepage;
        records.push(record);
    }

    Ok(records)
}

/// Deterministic id from identifying fields.
///
/// Uses 64-bit FNV-1a, which is stable across toolchains and platforms.
pub fn derive_id(name: &str, address: Option<&str>, phone: Option<&str>) -> String {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    let phone_digits: String = phone.unwrap_or("").chars().filter(|c| c.is_ascii_digit()).collect();
    let key = format!(
        "{}|{}|{}",
        name.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase(),
        address.unwrap_or("").split_whitespace().collect::<Vec<_>>().join(" "),
        phone_digits
    );

    let hash = key.bytes().fold(OFFSET, |hash, byte| (hash ^ u64::from(byte)).wrapping_mul(PRIME));
    format!("org-{:016x}", hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    // ============ CSV Parsing Tests ============

    #[test]
    fn test_parse_csv_with_english_headers() {
        let content = "id,name,address,phone\n1,Acme Center,서울특별시 중구,02-333-4443\n2,Beta Hall,,031-555-1234";
        let result = parse_csv_organizations(content).unwrap();

        assert_eq!(result.len(), 2);
        assert_eq!(result[0].id, "1");
        assert_eq!(result[0].name, "Acme Center");
        assert_eq!(result[0].address.as_deref(), Some("서울특별시 중구"));
        assert_eq!(result[1].address, None);
        assert_eq!(result[1].phone.as_deref(), Some("031-555-1234"));
    }

    #[test]
    fn test_parse_csv_with_korean_aliases() {
        let content = "\u{feff}기관명,주소,전화번호,팩스,홈페이지\n한빛복지관,부산광역시 해운대구,051-123-4567,,http://hanbit.or.kr";
        let result = parse_csv_organizations(content).unwrap();

        assert_eq!(result.len(), 1);
        assert_eq!(result[0].name, "한빛복지관");
        assert_eq!(result[0].phone.as_deref(), Some("051-123-4567"));
        assert_eq!(result[0].fax, None);
        assert_eq!(result[0].homepage.as_deref(), Some("http://hanbit.or.kr"));
        assert!(result[0].id.starts_with("org-"));
    }

    #[test]
    fn test_parse_csv_requires_name_column() {
        let err = parse_csv_organizations("phone,fax\n02-111-2222,").unwrap_err();
        assert!(err.to_string().contains("'name' column"));
    }

    #[test]
    fn test_parse_csv_skips_rows_without_name() {
        let content = "name,phone\n,02-111-2222\nGamma Office,02-222-3333";
        let result = parse_csv_organizations(content).unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].name, "Gamma Office");
    }

    #[test]
    fn test_parse_csv_empty() {
        assert!(parse_csv_organizations("").unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_supplied_ids_rejected() {
        let content = "id,name\n7,Alpha\n7,Beta";
        assert!(parse_csv_organizations(content).is_err());
    }

    // ============ JSON Parsing Tests ============

    #[test]
    fn test_parse_json_array() {
        let content = r#"[
            {"id": 10, "name": "Acme Center", "phone": "02-333-4443"},
            {"name": "Beta Hall", "homepage": "https://beta.or.kr"}
        ]"#;
        let result = parse_json_organizations(content).unwrap();

        assert_eq!(result.len(), 2);
        assert_eq!(result[0].id, "10");
        assert_eq!(result[0].phone.as_deref(), Some("02-333-4443"));
        assert_eq!(result[1].homepage.as_deref(), Some("https://beta.or.kr"));
    }

    #[test]
    fn test_parse_json_organizations_field() {
        let content = r#"{"organizations": [{"name": "Acme Center"}, "bogus"]}"#;
        let result = parse_json_organizations(content).unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].name, "Acme Center");
    }

    #[test]
    fn test_parse_json_invalid() {
        assert!(parse_json_organizations("not valid json").is_err());
        assert!(parse_json_organizations(r#"{"domains": []}"#).is_err());
        assert!(parse_json_organizations("42").is_err());
    }

    // ============ Id Derivation Tests ============

    #[test]
    fn test_derive_id_is_deterministic() {
        let a = derive_id("Acme  Center", Some("서울 중구"), Some("02-333-4443"));
        let b = derive_id("acme center", Some("서울  중구"), Some("(02) 333 4443"));
        assert_eq!(a, b);
        assert_ne!(a, derive_id("Acme Center", Some("서울 중구"), Some("02-333-4444")));
    }

    #[test]
    fn test_colliding_ids_get_suffixes() {
        let content = "name,phone\nAcme Center,02-333-4443\nAcme Center,02-333-4443\nAcme Center,02-333-4443";
        let result = parse_csv_organizations(content).unwrap();
        let base = derive_id("Acme Center", None, Some("02-333-4443"));

        assert_eq!(result[0].id, base);
        assert_eq!(result[1].id, format!("{}-2", base));
        assert_eq!(result[2].id, format!("{}-3", base));
    }

    #[test]
    fn test_input_format_detection() {
        assert_eq!(InputFormat::from_path(Path::new("orgs.csv")), Some(InputFormat::Csv));
        assert_eq!(InputFormat::from_path(Path::new("orgs.JSON")), Some(InputFormat::Json));
        assert_eq!(InputFormat::from_path(Path::new("orgs.txt")), None);
    }
}
