//! Facility data for the popline voice line.
//!
//! Holds the rentable sections of a facility, their reservations and the
//! inquiries callers leave. The conversation agent reaches this data only
//! through the [`FacilityData`] trait; [`SqliteFacility`] implements it over
//! a pooled SQLite database whose schema is managed by embedded migrations.

mod migrations;
mod pool;
pub mod store;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use popline_types::{Facility, Inquiry, NewInquiry, Section, SectionFilter};
use rusqlite::Connection;
use thiserror::Error;

pub use migrations::{run_migrations, MigrationError};
pub use pool::{create_pool, DbPool, PoolError, PoolSettings};

#[derive(Debug, Error)]
pub enum FacilityError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("json serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid date range: {start} is after {end}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },
    #[error("blocking task failed: {0}")]
    Task(String),
}

/// Read and inquiry operations the conversation agent needs.
#[async_trait]
pub trait FacilityData: Send + Sync {
    async fn list_sections(&self, filter: &SectionFilter) -> Result<Vec<Section>, FacilityError>;

    /// Exact name match first, falling back to a substring match.
    async fn get_section_by_name(&self, name: &str) -> Result<Option<Section>, FacilityError>;

    /// True iff no reservation overlaps `[start, end]` (inclusive).
    async fn is_section_available(
        &self,
        section_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<bool, FacilityError>;

    async fn create_inquiry(&self, inquiry: NewInquiry) -> Result<Inquiry, FacilityError>;

    async fn get_facility(&self) -> Result<Option<Facility>, FacilityError>;
}

/// [`FacilityData`] over an r2d2 SQLite pool. Queries run on the blocking
/// thread pool.
#[derive(Clone)]
pub struct SqliteFacility {
    pool: DbPool,
}

impl SqliteFacility {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub fn into_shared(self) -> Arc<dyn FacilityData> {
        Arc::new(self)
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, FacilityError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, FacilityError> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            f(&conn)
        })
        .await
        .map_err(|e| FacilityError::Task(e.to_string()))?
    }
}

#[async_trait]
impl FacilityData for SqliteFacility {
    async fn list_sections(&self, filter: &SectionFilter) -> Result<Vec<Section>, FacilityError> {
        let filter = filter.clone();
        self.with_conn(move |conn| store::list_sections(conn, &filter))
            .await
    }

    async fn get_section_by_name(&self, name: &str) -> Result<Option<Section>, FacilityError> {
        let name = name.to_string();
        self.with_conn(move |conn| store::find_section_by_name(conn, &name))
            .await
    }

    async fn is_section_available(
        &self,
        section_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<bool, FacilityError> {
        let section_id = section_id.to_string();
        self.with_conn(move |conn| store::is_section_available(conn, &section_id, start, end))
            .await
    }

    async fn create_inquiry(&self, inquiry: NewInquiry) -> Result<Inquiry, FacilityError> {
        let created = self
            .with_conn(move |conn| store::create_inquiry(conn, &inquiry))
            .await?;
        tracing::info!(
            inquiry_id = %created.id,
            section_id = %created.section_id,
            inquiry_type = %created.inquiry_type,
            "inquiry recorded"
        );
        Ok(created)
    }

    async fn get_facility(&self) -> Result<Option<Facility>, FacilityError> {
        self.with_conn(store::get_facility).await
    }
}
