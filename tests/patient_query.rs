mod support;

use patient_sync::ingest::{RawRow, HEADER_CHART, HEADER_NAME, HEADER_PHONE};
use patient_sync::test_support::write_upload;
use patient_sync::PatientQuery;
use support::sqlite_pipeline;

fn row(name: &str, phone: &str, chart: &str) -> RawRow {
    RawRow::new()
        .with(HEADER_NAME, name)
        .with(HEADER_PHONE, phone)
        .with(HEADER_CHART, chart)
}

#[test]
fn query_matches_partial_name_and_hyphenated_phone() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let (pipeline, _) = sqlite_pipeline(dir.path())?;
    let rows = vec![
        row("홍길동", "010-1855-6059", "P1"),
        row("홍길순", "01022223333", "P2"),
        row("Ko", "01044445555", ""),
    ];
    pipeline.process_upload(&write_upload(dir.path(), "patients.json", &rows)?)?;

    let by_name = pipeline.find_patients(&PatientQuery {
        name: Some("홍길".to_string()),
        ..PatientQuery::default()
    })?;
    assert_eq!(by_name.total, 2);
    // Newest first.
    assert_eq!(by_name.data[0].record.chart, "P2");

    let by_phone = pipeline.find_patients(&PatientQuery {
        phone: Some("010-1855-6059".to_string()),
        ..PatientQuery::default()
    })?;
    assert_eq!(by_phone.total, 1);
    assert_eq!(by_phone.data[0].record.phone, "01018556059");

    let lower = pipeline.find_patients(&PatientQuery {
        name: Some("ko".to_string()),
        ..PatientQuery::default()
    })?;
    assert_eq!(lower.total, 0);
    Ok(())
}

#[test]
fn query_pages_report_unpaged_total() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let (pipeline, _) = sqlite_pipeline(dir.path())?;
    let rows: Vec<RawRow> = (0..25)
        .map(|index| row("Moon", &format!("010{:08}", index), "M1"))
        .collect();
    pipeline.process_upload(&write_upload(dir.path(), "moon.json", &rows)?)?;

    let last = pipeline.find_patients(&PatientQuery {
        page: 3,
        limit: 10,
        chart: Some("M1".to_string()),
        ..PatientQuery::default()
    })?;
    assert_eq!(last.total, 25);
    assert_eq!(last.page, 3);
    assert_eq!(last.count, 5);
    assert_eq!(last.data.len(), 5);
    Ok(())
}
