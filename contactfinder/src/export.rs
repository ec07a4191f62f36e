use crate::record::{FieldType, OrganizationRecord, RecordStatus};
use anyhow::{Context, Result};
use csv::Writer;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use tracing::{debug, info};

pub const CSV_FILENAME: &str = "contacts.csv";
pub const JSON_FILENAME: &str = "contacts.json";

pub fn export_csv(records: &[OrganizationRecord], output_path: &Path) -> Result<()> {
    debug!("Exporting {} records to CSV: {}", records.len(), output_path.display());

    let file = File::create(output_path).with_context(|| format!("Failed to create {}", output_path.display()))?;
    let mut wtr = Writer::from_writer(file);

    wtr.write_record([
        "id",
        "name",
        "address",
        "phone",
        "fax",
        "fax_source",
        "homepage",
        "homepage_source",
        "status",
    ])?;

    for record in records {
        let fax_source = record.fax_source.map(|p| p.to_string()).unwrap_or_default();
        let homepage_source = record.homepage_source.map(|p| p.to_string()).unwrap_or_default();
        wtr.write_record([
            record.id.as_str(),
            record.name.as_str(),
            record.address.as_deref().unwrap_or(""),
            record.phone.as_deref().unwrap_or(""),
            record.fax.as_deref().unwrap_or(""),
            fax_source.as_str(),
            record.homepage.as_deref().unwrap_or(""),
            homepage_source.as_str(),
            status_label(record.status),
        ])?;
    }

    wtr.flush()?;
    info!("Exported {} records to CSV: {}", records.len(), output_path.display());

    Ok(())
}

pub fn export_json(records: &[OrganizationRecord], output_path: &Path) -> Result<()> {
    debug!("Exporting {} records to JSON: {}", records.len(), output_path.display());

    let json_output = JsonExport {
        summary: ExportSummary::from_records(records),
        organizations: records,
    };

    let json_string = serde_json::to_string_pretty(&json_output)?;

    let mut file = File::create(output_path).with_context(|| format!("Failed to create {}", output_path.display()))?;
    file.write_all(json_string.as_bytes())?;

    info!("Exported {} records to JSON: {}", records.len(), output_path.display());

    Ok(())
}

/// Write both export files into `output_dir`
pub fn export_all(records: &[OrganizationRecord], output_dir: &Path) -> Result<()> {
    export_csv(records, &output_dir.join(CSV_FILENAME))?;
    export_json(records, &output_dir.join(JSON_FILENAME))
}

fn status_label(status: RecordStatus) -> &'static str {
    match status {
        RecordStatus::Pending => "pending",
        RecordStatus::Resolved => "resolved",
        RecordStatus::Unresolved => "unresolved",
        RecordStatus::Incomplete => "incomplete",
    }
}

#[derive(serde::Serialize)]
struct JsonExport<'a> {
    summary: ExportSummary,
    organizations: &'a [OrganizationRecord],
}

#[derive(serde::Serialize)]
struct ExportSummary {
    total_organizations: usize,
    with_fax: usize,
    with_homepage: usize,
    resolved: usize,
}

impl ExportSummary {
    fn from_records(records: &[OrganizationRecord]) -> Self {
        Self {
            total_organizations: records.len(),
            with_fax: records.iter().filter(|r| r.field(FieldType::Fax).is_some()).count(),
            with_homepage: records.iter().filter(|r| r.field(FieldType::Homepage).is_some()).count(),
            resolved: records.iter().filter(|r| r.status == RecordStatus::Resolved).count(),
        }
    }
}
