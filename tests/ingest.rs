use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};

use dbaccess::context::DbContext;
use dbaccess::ingest::{probe_columns, IngestSettings};
use dbaccess::query::{Filters, RequestOptions};
use dbaccess::repository::{BasicRepository, Error, PostgresRepository};

use crate::fixtures::{reading, station, ExtReading, ExtStation, Reading, Station};
use crate::make_weather_context;

struct Weather {
    context: Arc<DbContext>,
    station: Station,
    readings: PostgresRepository<Reading, ExtReading>,
}

impl Weather {
    async fn new(settings: IngestSettings) -> Option<Self> {
        let context = make_weather_context(settings).await?;
        let stations =
            PostgresRepository::<Station, ExtStation>::try_new(context.clone()).unwrap();
        let station = station("OSL-1");
        stations.create(&station).await.unwrap();

        Some(Self {
            readings: PostgresRepository::try_new(context.clone()).unwrap(),
            context,
            station,
        })
    }

    fn batch(&self, count: i64) -> Vec<Reading> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        (1..=count)
            .map(|i| reading(self.station.id, i, start + Duration::seconds(i)))
            .collect()
    }

    fn table(&self) -> String {
        self.readings.definition().base_table(false).to_string()
    }

    async fn alter(&self, change: &str) {
        sqlx::query(&format!("ALTER TABLE {} {change}", self.table()))
            .execute(self.context.pool())
            .await
            .unwrap();
    }

    async fn count(&self, predicate: &str) -> i64 {
        let (count,): (i64,) = sqlx::query_as(&format!(
            "SELECT COUNT(*) FROM {} WHERE {predicate}",
            self.table()
        ))
        .fetch_one(self.context.pool())
        .await
        .unwrap();
        count
    }
}

#[tokio::test]
async fn test_ingest_batch() {
    let Some(weather) = Weather::new(IngestSettings {
        batch_size: 250,
        ..Default::default()
    })
    .await
    else {
        return;
    };

    let batch = weather.batch(1200);
    assert_eq!(weather.readings.ingest(&batch).await.unwrap(), 1200);

    let page = weather
        .readings
        .get_page(&Filters::new(), &RequestOptions::new().page(1, 3).order_by("sequence"))
        .await
        .unwrap();
    assert_eq!(page.total_items, 1200);
    assert_eq!(page.items, batch[..3].to_vec());

    assert_eq!(
        weather
            .readings
            .get_by_id(batch[999].id, &RequestOptions::new())
            .await
            .unwrap(),
        Some(batch[999].clone())
    );
}

#[tokio::test]
async fn test_ingest_nothing() {
    let Some(weather) = Weather::new(IngestSettings::default()).await else {
        return;
    };

    assert_eq!(weather.readings.ingest(&[]).await.unwrap(), 0);
}

#[tokio::test]
async fn test_ingest_follows_live_columns() {
    let Some(weather) = Weather::new(IngestSettings::default()).await else {
        return;
    };

    // A column only the live table knows about keeps its default
    weather
        .alter("ADD COLUMN \"source\" TEXT NOT NULL DEFAULT 'import'")
        .await;

    let live = probe_columns(
        weather.context.pool(),
        &weather.readings.definition().base_table(false),
    )
    .await
    .unwrap();
    assert!(live.iter().any(|c| c.column_name == "source"));
    assert!(live.iter().any(|c| c.column_name == "takenAt" && c.udt_name == "timestamptz"));

    assert_eq!(weather.readings.ingest(&weather.batch(10)).await.unwrap(), 10);
    assert_eq!(weather.count("\"source\" = 'import'").await, 10);
}

#[tokio::test]
async fn test_ingest_substitutes_null_for_bad_field() {
    let Some(weather) = Weather::new(IngestSettings::default()).await else {
        return;
    };

    weather
        .alter("ALTER COLUMN \"quality\" TYPE SMALLINT, ALTER COLUMN \"quality\" DROP NOT NULL")
        .await;

    let mut batch = weather.batch(3);
    batch[1].quality = 70000;

    assert_eq!(weather.readings.ingest(&batch).await.unwrap(), 3);
    assert_eq!(weather.count("\"quality\" IS NULL").await, 1);
    assert_eq!(weather.count("\"quality\" = 100").await, 2);
}

#[tokio::test]
async fn test_ingest_aborts_when_null_is_rejected() {
    let Some(weather) = Weather::new(IngestSettings::default()).await else {
        return;
    };

    weather.alter("ALTER COLUMN \"quality\" TYPE SMALLINT").await;

    let mut batch = weather.batch(3);
    batch[2].quality = 70000;

    let error = weather.readings.ingest(&batch).await.unwrap_err();
    match error {
        Error::Ingest { column, .. } => assert_eq!(column, "quality"),
        other => panic!("Unexpected error {other:?}"),
    }
    // Nothing from the aborted transfer is kept
    assert_eq!(weather.count("TRUE").await, 0);
}
