mod common;

use common::fixtures::fixture_path;
use contactfinder::batch::{derive_id, load_organizations};
use contactfinder::record::RecordStatus;

#[test]
fn test_load_csv_fixture() {
    let records = load_organizations(&fixture_path("organizations.csv")).unwrap();

    assert_eq!(records.len(), 3);
    assert_eq!(records[0].name, "Acme Center");
    assert_eq!(records[0].fax, None);
    assert_eq!(records[1].fax.as_deref(), Some("051-888-1299"));
    assert_eq!(records[2].homepage.as_deref(), Some("https://complete.or.kr"));
    assert!(records.iter().all(|r| r.status == RecordStatus::Pending));

    // Derived ids are the same on every load
    assert_eq!(
        records[0].id,
        derive_id("Acme Center", Some("서울특별시 중구 세종대로 110"), Some("02-111-2222"))
    );
    let again = load_organizations(&fixture_path("organizations.csv")).unwrap();
    let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
    let ids_again: Vec<&str> = again.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, ids_again);
}

#[test]
fn test_load_json_fixture() {
    let records = load_organizations(&fixture_path("organizations.json")).unwrap();

    let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["acme", "busan", "42"]);
    assert_eq!(records[1].homepage.as_deref(), Some("https://www.busanculture.or.kr"));
    assert_eq!(records[2].phone, None);
}

#[test]
fn test_load_rejects_unknown_extension() {
    let err = load_organizations(&fixture_path("pages/org_homepage.html")).unwrap_err();
    assert!(err.to_string().contains("Expected .csv or .json"));
}
