use sqlx::PgPool;
use tracing::{debug, instrument};

use crate::db::{DbError, StationRow};
use crate::qc::Station;

const STATION_COLUMNS: &str = "station_id, station_type, \
    latitude::double precision AS latitude, \
    longitude::double precision AS longitude, \
    altitude::double precision AS altitude";

#[derive(Clone)]
pub struct StationRepository {
    pool: PgPool,
}

impl StationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[instrument(skip(self))]
    pub async fn find_by_id(&self, station_id: &str) -> Result<Option<Station>, DbError> {
        debug!("Querying station metadata");
        let sql = format!("SELECT {STATION_COLUMNS} FROM station WHERE station_id = $1");
        let row = sqlx::query_as::<_, StationRow>(&sql)
            .bind(station_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Station::try_from).transpose()
    }

    /// All stations, ordered by id
    #[instrument(skip(self))]
    pub async fn find_all(&self) -> Result<Vec<Station>, DbError> {
        let sql = format!("SELECT {STATION_COLUMNS} FROM station ORDER BY station_id");
        let rows = sqlx::query_as::<_, StationRow>(&sql)
            .fetch_all(&self.pool)
            .await?;
        debug!("Found {} stations", rows.len());
        rows.into_iter().map(Station::try_from).collect()
    }
}
