//! Organization records and the small vocabulary types that travel with them.

use serde::{Deserialize, Serialize};

/// Contact field kinds handled by the crawler.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum FieldType {
    Phone,
    Fax,
    Homepage,
}

impl FieldType {
    /// Fields the search pipeline is allowed to discover.
    pub const SEARCHABLE: [FieldType; 2] = [FieldType::Homepage, FieldType::Fax];

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Phone => "phone",
            FieldType::Fax => "fax",
            FieldType::Homepage => "homepage",
        }
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Where a discovered value came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum Provenance {
    /// Search engine result page
    Search,
    /// Direct crawl of the organization's homepage
    HomepageCrawl,
    /// Answer proposed by the AI collaborator and accepted by the validator
    AiAssisted,
}

impl std::fmt::Display for Provenance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Provenance::Search => write!(f, "search"),
            Provenance::HomepageCrawl => write!(f, "homepage-crawl"),
            Provenance::AiAssisted => write!(f, "ai-assisted"),
        }
    }
}

/// Processing state of a record within a run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RecordStatus {
    /// Not yet processed by any worker
    #[default]
    Pending,
    /// Every missing field was found
    Resolved,
    /// Processed, but at least one field ended as not found
    Unresolved,
    /// The owning worker stopped before reaching this record
    Incomplete,
}

impl RecordStatus {
    /// Whether a worker still has to look at this record.
    pub fn needs_processing(&self) -> bool {
        matches!(self, RecordStatus::Pending | RecordStatus::Incomplete)
    }
}

/// One organization and its contact data.
///
/// Optional fields are serialized as explicit `null` so a checkpoint always
/// carries every key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrganizationRecord {
    /// Stable external identifier
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub fax: Option<String>,
    #[serde(default)]
    pub homepage: Option<String>,
    #[serde(default)]
    pub fax_source: Option<Provenance>,
    #[serde(default)]
    pub homepage_source: Option<Provenance>,
    #[serde(default)]
    pub status: RecordStatus,
}

impl OrganizationRecord {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            address: None,
            phone: None,
            fax: None,
            homepage: None,
            fax_source: None,
            homepage_source: None,
            status: RecordStatus::Pending,
        }
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }

    pub fn with_fax(mut self, fax: impl Into<String>) -> Self {
        self.fax = Some(fax.into());
        self
    }

    pub fn with_homepage(mut self, homepage: impl Into<String>) -> Self {
        self.homepage = Some(homepage.into());
        self
    }

    /// Current value of a field, treating blank strings as unset.
    pub fn field(&self, field: FieldType) -> Option<&str> {
        let value = match field {
            FieldType::Phone => self.phone.as_deref(),
            FieldType::Fax => self.fax.as_deref(),
            FieldType::Homepage => self.homepage.as_deref(),
        };
        value.map(str::trim).filter(|v| !v.is_empty())
    }

    pub fn provenance(&self, field: FieldType) -> Option<Provenance> {
        match field {
            FieldType::Fax => self.fax_source,
            FieldType::Homepage => self.homepage_source,
            FieldType::Phone => None,
        }
    }

    /// Searchable fields that are still missing, in search order.
    pub fn missing_fields(&self) -> Vec<FieldType> {
        FieldType::SEARCHABLE
            .into_iter()
            .filter(|f| self.field(*f).is_none())
            .collect()
    }

    /// Write a validated value. Only the validator's winner is ever passed here.
    pub fn apply(&mut self, field: FieldType, value: String, provenance: Provenance) {
        match field {
            FieldType::Fax => {
                self.fax = Some(value);
                self.fax_source = Some(provenance);
            }
            FieldType::Homepage => {
                self.homepage = Some(value);
                self.homepage_source = Some(provenance);
            }
            FieldType::Phone => {
                self.phone = Some(value);
            }
        }
    }

    /// Fold a worker's copy of this record into the authoritative one.
    ///
    /// Set fields on `incoming` win; unset fields never clear a value that is
    /// already present.
    pub fn merge_from(&mut self, incoming: OrganizationRecord) {
        if incoming.fax.is_some() {
            self.fax = incoming.fax;
            self.fax_source = incoming.fax_source;
        }
        if incoming.homepage.is_some() {
            self.homepage = incoming.homepage;
            self.homepage_source = incoming.homepage_source;
        }
        if self.phone.is_none() {
            self.phone = incoming.phone;
        }
        if self.address.is_none() {
            self.address = incoming.address;
        }
        self.status = incoming.status;
    }
}

/// A contiguous slice of the organization list owned by one worker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub chunk_id: usize,
    pub records: Vec<OrganizationRecord>,
}

impl Chunk {
    pub fn ids(&self) -> Vec<String> {
        self.records.iter().map(|r| r.id.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields_order() {
        let record = OrganizationRecord::new("1", "Acme Center");
        assert_eq!(record.missing_fields(), vec![FieldType::Homepage, FieldType::Fax]);

        let record = record.with_homepage("https://acme.or.kr");
        assert_eq!(record.missing_fields(), vec![FieldType::Fax]);
    }

    #[test]
    fn test_blank_field_counts_as_missing() {
        let record = OrganizationRecord::new("1", "Acme").with_fax("   ");
        assert!(record.field(FieldType::Fax).is_none());
        assert!(record.missing_fields().contains(&FieldType::Fax));
    }

    #[test]
    fn test_merge_never_clears_existing_value() {
        let mut existing = OrganizationRecord::new("1", "Acme").with_homepage("https://acme.kr");
        existing.homepage_source = Some(Provenance::Search);

        let mut incoming = OrganizationRecord::new("1", "Acme");
        incoming.apply(FieldType::Fax, "02-333-4444".to_string(), Provenance::Search);
        incoming.status = RecordStatus::Resolved;

        existing.merge_from(incoming);
        assert_eq!(existing.homepage.as_deref(), Some("https://acme.kr"));
        assert_eq!(existing.fax.as_deref(), Some("02-333-4444"));
        assert_eq!(existing.fax_source, Some(Provenance::Search));
        assert_eq!(existing.status, RecordStatus::Resolved);
    }

    #[test]
    fn test_absent_fields_serialize_as_null() {
        let record = OrganizationRecord::new("1", "Acme");
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("fax").unwrap().is_null());
        assert!(json.get("homepage_source").unwrap().is_null());
        assert_eq!(json.get("status").unwrap(), "pending");
    }

    #[test]
    fn test_provenance_display() {
        assert_eq!(Provenance::HomepageCrawl.to_string(), "homepage-crawl");
        assert_eq!(
            serde_json::to_string(&Provenance::AiAssisted).unwrap(),
            "\"ai-assisted\""
        );
    }
}
