use chrono::NaiveDate;
use demand_forecast::data::{group_records, SalesLoader, SeriesKey};
use demand_forecast::error::ForecastError;
use demand_forecast::hierarchy::{Catalog, NodeId};
use pretty_assertions::assert_eq;
use std::fs;
use tempfile::tempdir;

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 2, d).unwrap()
}

#[test]
fn test_load_sales_csv() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("sales.csv");
    fs::write(
        &path,
        "location_id,item_id,date,quantity\n\
         L1,milk,2024-02-01,3\n\
         L1,milk,2024-02-03,5\n\
         L2,bread,2024-02-02,1.5\n",
    )
    .unwrap();

    let records = SalesLoader::from_csv(&path).unwrap();
    assert_eq!(records.len(), 3);
    assert_eq!(records[2].key(), SeriesKey::new("L2", "bread"));
    assert_eq!(records[1].date, day(3));

    let series = group_records(&records).unwrap();
    assert_eq!(series.len(), 2);
    let milk = &series[0];
    assert_eq!(milk.id(), &NodeId::Leaf(SeriesKey::new("L1", "milk")));
    assert_eq!(milk.quantities(), &[3.0, 0.0, 5.0]);
}

#[test]
fn test_alternative_date_column_name() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("sales.csv");
    fs::write(
        &path,
        "location_id,item_id,sale_date,quantity\nL1,milk,2024-02-05,2\n",
    )
    .unwrap();

    let records = SalesLoader::from_csv(&path).unwrap();
    assert_eq!(records[0].date, day(5));
}

#[test]
fn test_invalid_date_is_a_data_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("sales.csv");
    fs::write(
        &path,
        "location_id,item_id,date,quantity\nL1,milk,02/05/2024,2\n",
    )
    .unwrap();

    assert!(matches!(
        SalesLoader::from_csv(&path),
        Err(ForecastError::Data(_))
    ));
}

#[test]
fn test_missing_file_is_an_io_error() {
    let dir = tempdir().unwrap();
    assert!(matches!(
        SalesLoader::from_csv(dir.path().join("missing.csv")),
        Err(ForecastError::Io(_))
    ));
}

#[test]
fn test_catalog_from_json_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("catalog.json");
    fs::write(
        &path,
        r#"{
            "items": [
                {"item_id": "milk", "product_group": "dairy"},
                {"item_id": "bread", "product_group": "bakery"}
            ],
            "locations": [
                {"location_id": "L1", "items": ["milk", "bread"]}
            ]
        }"#,
    )
    .unwrap();

    let catalog = Catalog::from_json_file(&path).unwrap();
    assert_eq!(catalog.items.len(), 2);
    assert_eq!(catalog.groups().get("milk"), Some(&"dairy"));
}
