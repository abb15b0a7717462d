// Postgres-backed collaborator tests. They need a database reachable via
// DATABASE_URL and are skipped by default:
//   cargo test --test reading_repository_test -- --ignored

mod common;

use chrono::{DateTime, Utc};
use common::{test_pool, ts};
use serial_test::serial;
use sqlx::PgPool;
use station_qc::db::{DbError, ReadingRepository, StationRepository};
use station_qc::providers::{HistoryProvider, NeighborProvider};
use station_qc::qc::{Measurement, Station, StationKind};

mod reading_repository_fixtures {
    use super::*;

    pub const STATIONS: &[(&str, &str, f64, f64, f64)] = &[
        ("QCTEST1", "biomet", 51.5, 7.40, 100.0),
        ("QCTEST2", "temprh", 51.5, 7.41, 105.0),
        ("QCTEST3", "double", 51.5, 7.42, 95.0),
    ];

    pub async fn setup(pool: &PgPool) {
        cleanup(pool).await;
        for (id, kind, lat, lon, alt) in STATIONS {
            sqlx::query(
                "INSERT INTO station (station_id, station_type, latitude, longitude, altitude)
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(id)
            .bind(kind)
            .bind(lat)
            .bind(lon)
            .bind(alt)
            .execute(pool)
            .await
            .expect("Failed to insert station");
        }

        insert_biomet(pool, "QCTEST1", ts(-10), Some(19.0), Some(2.0)).await;
        insert_biomet(pool, "QCTEST1", ts(-5), None, Some(2.5)).await;
        insert_biomet(pool, "QCTEST1", ts(0), Some(20.0), Some(3.0)).await;
        insert_biomet(pool, "QCTEST1", ts(5), Some(20.5), None).await;
        insert_biomet(pool, "QCTEST3", ts(1), Some(21.0), Some(1.0)).await;
        insert_temp_rh(pool, "QCTEST2", ts(-1), Some(18.0)).await;
        insert_temp_rh(pool, "QCTEST2", ts(2), Some(18.5)).await;
    }

    async fn insert_biomet(
        pool: &PgPool,
        station_id: &str,
        at: DateTime<Utc>,
        air_temperature: Option<f64>,
        wind_speed: Option<f64>,
    ) {
        sqlx::query(
            "INSERT INTO biomet_data (station_id, measured_at, air_temperature, wind_speed)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(station_id)
        .bind(at)
        .bind(air_temperature)
        .bind(wind_speed)
        .execute(pool)
        .await
        .expect("Failed to insert biomet reading");
    }

    async fn insert_temp_rh(
        pool: &PgPool,
        station_id: &str,
        at: DateTime<Utc>,
        air_temperature: Option<f64>,
    ) {
        sqlx::query(
            "INSERT INTO temp_rh_data (station_id, measured_at, air_temperature)
             VALUES ($1, $2, $3)",
        )
        .bind(station_id)
        .bind(at)
        .bind(air_temperature)
        .execute(pool)
        .await
        .expect("Failed to insert temp/rh reading");
    }

    pub async fn cleanup(pool: &PgPool) {
        for table in ["biomet_data", "temp_rh_data", "station"] {
            sqlx::query(&format!(
                "DELETE FROM {table} WHERE station_id LIKE 'QCTEST%'"
            ))
            .execute(pool)
            .await
            .ok();
        }
    }

    pub fn station(id: &str) -> Station {
        let (id, kind, lat, lon, alt) = STATIONS
            .iter()
            .find(|s| s.0 == id)
            .copied()
            .expect("known test station");
        Station::new(id, kind.parse::<StationKind>().unwrap(), lat, lon, alt)
    }
}

use reading_repository_fixtures::*;

#[tokio::test]
#[ignore]
#[serial]
async fn test_station_repository_find() {
    let pool = test_pool().await;
    setup(pool).await;
    let repo = StationRepository::new(pool.clone());

    let found = repo.find_by_id("QCTEST2").await.unwrap().unwrap();
    assert_eq!(found, station("QCTEST2"));
    assert!(repo.find_by_id("QCTEST404").await.unwrap().is_none());

    let all = repo.find_all().await.unwrap();
    let ours: Vec<_> = all
        .iter()
        .filter(|s| s.station_id.starts_with("QCTEST"))
        .map(|s| s.station_id.as_str())
        .collect();
    assert_eq!(ours, vec!["QCTEST1", "QCTEST2", "QCTEST3"]);

    cleanup(pool).await;
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_fetch_history_and_latest_before() {
    let pool = test_pool().await;
    setup(pool).await;
    let repo = ReadingRepository::new(pool.clone());
    let station = station("QCTEST1");

    let history = repo
        .fetch_history(&station, "air_temperature", ts(-10), ts(0))
        .await
        .unwrap();
    assert_eq!(
        history,
        vec![Measurement::new(ts(-10), 19.0), Measurement::missing(ts(-5))]
    );

    // the missing reading at -5 is skipped
    let latest = repo
        .fetch_latest_before(&station, "air_temperature", ts(0))
        .await
        .unwrap();
    assert_eq!(latest, Some(Measurement::new(ts(-10), 19.0)));

    cleanup(pool).await;
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_find_batch_skips_parameters_the_station_lacks() {
    let pool = test_pool().await;
    setup(pool).await;
    let repo = ReadingRepository::new(pool.clone());

    let batch = repo
        .find_batch(
            &station("QCTEST2"),
            &["air_temperature", "wind_speed"],
            ts(-5),
            ts(5),
        )
        .await
        .unwrap();
    assert_eq!(batch.measured_at, vec![ts(-1), ts(2)]);
    assert_eq!(batch.columns.len(), 1);
    assert_eq!(batch.columns[0].values, vec![Some(18.0), Some(18.5)]);

    cleanup(pool).await;
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_neighbors_and_observations_span_tables() {
    let pool = test_pool().await;
    setup(pool).await;
    let repo = ReadingRepository::new(pool.clone());
    let origin = station("QCTEST1").position;

    let neighbors = repo
        .fetch_neighbors(&origin, 5000.0, ts(0), "air_temperature")
        .await
        .unwrap();
    let mut values: Vec<_> = neighbors
        .iter()
        .filter(|n| n.station_id.starts_with("QCTEST"))
        .map(|n| (n.station_id.as_str(), n.value))
        .collect();
    values.sort_by(|a, b| a.0.cmp(b.0));
    assert_eq!(
        values,
        vec![
            ("QCTEST1", Some(20.0)),
            ("QCTEST2", Some(18.5)),
            ("QCTEST3", Some(21.0)),
        ]
    );

    let observations = repo
        .fetch_observations("air_temperature", ts(-3), ts(3))
        .await
        .unwrap();
    let ours = observations
        .iter()
        .filter(|o| o.station_id.starts_with("QCTEST"))
        .count();
    assert_eq!(ours, 4);

    cleanup(pool).await;
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_unsafe_parameter_is_rejected() {
    let pool = test_pool().await;
    let repo = ReadingRepository::new(pool.clone());
    let err = repo
        .fetch_history(
            &station("QCTEST1"),
            "air_temperature; DROP TABLE station",
            ts(-10),
            ts(0),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::InvalidIdentifier(_)));
}
