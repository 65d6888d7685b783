//! The persistence seam used by the ingestion pipeline.

use airviz_database_models::{
    AirQualityIndexEntry, HealthRecommendation, InsertedMeasurement, MeasurementRecord,
    PollutantConcentration,
};
use async_trait::async_trait;
use switchy_database::{Database, DatabaseTransaction};

use crate::{DbError, queries};

/// Source of per-batch units of work.
#[async_trait]
pub trait MeasurementStore: Send + Sync {
    /// Opens a unit of work for one outer batch. Nothing it writes is
    /// visible until [`BatchWriter::commit`].
    async fn begin_batch(&self) -> Result<Box<dyn BatchWriter + '_>, DbError>;
}

/// Bulk writer for the four ingestion row-sets of one batch.
///
/// Every insert writes its whole row-set in as few statements as the
/// parameter limit allows. An empty row-set is a no-op that returns zero.
#[async_trait]
pub trait BatchWriter: Send + Sync {
    /// Inserts parent records and returns the ids of rows actually inserted.
    async fn insert_measurements(
        &self,
        rows: &[MeasurementRecord],
    ) -> Result<Vec<InsertedMeasurement>, DbError>;

    /// Inserts pollutant concentration rows.
    async fn insert_pollutants(&self, rows: &[PollutantConcentration]) -> Result<u64, DbError>;

    /// Inserts air-quality index rows.
    async fn insert_aqi_entries(&self, rows: &[AirQualityIndexEntry]) -> Result<u64, DbError>;

    /// Inserts health recommendation rows.
    async fn insert_health_recommendations(
        &self,
        rows: &[HealthRecommendation],
    ) -> Result<u64, DbError>;

    /// Makes every row written through this batch visible.
    async fn commit(self: Box<Self>) -> Result<(), DbError>;

    /// Discards every row written through this batch.
    async fn rollback(self: Box<Self>) -> Result<(), DbError>;
}

/// [`MeasurementStore`] backed by a Postgres connection.
///
/// The connection is owned by the store and released when it is dropped.
pub struct PostgresStore {
    db: Box<dyn Database>,
}

impl PostgresStore {
    /// Wraps an open connection.
    #[must_use]
    pub fn new(db: Box<dyn Database>) -> Self {
        Self { db }
    }

    /// Borrows the underlying connection.
    #[must_use]
    pub fn database(&self) -> &dyn Database {
        &*self.db
    }
}

#[async_trait]
impl MeasurementStore for PostgresStore {
    async fn begin_batch(&self) -> Result<Box<dyn BatchWriter + '_>, DbError> {
        let txn = self.db.begin_transaction().await?;
        Ok(Box::new(PostgresBatch { txn }))
    }
}

/// One outer batch written inside a Postgres transaction.
struct PostgresBatch {
    txn: Box<dyn DatabaseTransaction>,
}

#[async_trait]
impl BatchWriter for PostgresBatch {
    async fn insert_measurements(
        &self,
        rows: &[MeasurementRecord],
    ) -> Result<Vec<InsertedMeasurement>, DbError> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        queries::insert_measurements(self.txn.as_ref(), rows).await
    }

    async fn insert_pollutants(&self, rows: &[PollutantConcentration]) -> Result<u64, DbError> {
        if rows.is_empty() {
            return Ok(0);
        }
        queries::insert_pollutants(self.txn.as_ref(), rows).await
    }

    async fn insert_aqi_entries(&self, rows: &[AirQualityIndexEntry]) -> Result<u64, DbError> {
        if rows.is_empty() {
            return Ok(0);
        }
        queries::insert_aqi_entries(self.txn.as_ref(), rows).await
    }

    async fn insert_health_recommendations(
        &self,
        rows: &[HealthRecommendation],
    ) -> Result<u64, DbError> {
        if rows.is_empty() {
            return Ok(0);
        }
        queries::insert_health_recommendations(self.txn.as_ref(), rows).await
    }

    async fn commit(self: Box<Self>) -> Result<(), DbError> {
        self.txn.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), DbError> {
        self.txn.rollback().await?;
        Ok(())
    }
}
