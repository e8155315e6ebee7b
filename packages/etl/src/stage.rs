//! Per-stage sink connections.
//!
//! A [`StageConnection`] is acquired at the start of a stage and released
//! when it goes out of scope, whether the stage returns normally, fails
//! with `?`, or unwinds. Release logs how long the stage held it.

use std::{ops::Deref, time::Instant};

use crime_warehouse_database::{Connector, WarehouseSink};
use crime_warehouse_etl_models::Stage;

use crate::error::{EtlError, StageError};

/// A sink connection owned by one stage.
pub struct StageConnection {
    stage: Stage,
    sink: Box<dyn WarehouseSink>,
    acquired_at: Instant,
}

impl StageConnection {
    /// Connects through `connector` on behalf of `stage`.
    ///
    /// # Errors
    ///
    /// Returns a resource [`StageError`] if the connection or its probe
    /// fails.
    pub async fn acquire(connector: &dyn Connector, stage: Stage) -> Result<Self, StageError> {
        let sink = connector
            .connect()
            .await
            .map_err(|e| StageError::new(stage, EtlError::Sink(e)))?;

        log::debug!("Acquired {} connection for {stage} stage", connector.label());

        Ok(Self {
            stage,
            sink,
            acquired_at: Instant::now(),
        })
    }

    #[must_use]
    pub const fn stage(&self) -> Stage {
        self.stage
    }

    /// Borrows the sink.
    #[must_use]
    pub fn sink(&self) -> &dyn WarehouseSink {
        self.sink.as_ref()
    }
}

impl Deref for StageConnection {
    type Target = dyn WarehouseSink;

    fn deref(&self) -> &Self::Target {
        self.sink.as_ref()
    }
}

impl Drop for StageConnection {
    fn drop(&mut self) {
        log::info!(
            "Released database connection for {} stage: held for {:.3} seconds",
            self.stage,
            self.acquired_at.elapsed().as_secs_f64()
        );
    }
}

#[cfg(test)]
mod tests {
    use crime_warehouse_database::memory::MemoryConnector;
    use crime_warehouse_etl_models::AnomalyKind;

    use super::*;

    async fn failing_stage(connector: &MemoryConnector) -> Result<(), StageError> {
        let conn = StageConnection::acquire(connector, Stage::Facts).await?;
        assert_eq!(connector.open_connections(), 1);
        conn.table_exists("fact_table")
            .await
            .map_err(|e| StageError::new(conn.stage(), e.into()))?;
        Err(StageError::new(
            Stage::Facts,
            EtlError::DuplicateFactKey { key: [1, 1, 1, 1] },
        ))
    }

    #[tokio::test]
    async fn releases_on_success_and_failure() {
        let connector = MemoryConnector::new();

        {
            let conn = StageConnection::acquire(&connector, Stage::Extract)
                .await
                .unwrap();
            assert_eq!(conn.stage(), Stage::Extract);
            assert_eq!(connector.open_connections(), 1);
        }
        assert_eq!(connector.open_connections(), 0);

        assert!(failing_stage(&connector).await.is_err());
        assert_eq!(connector.open_connections(), 0);
    }

    #[tokio::test]
    async fn unavailable_sink_is_resource_error() {
        let connector = MemoryConnector::new();
        connector.set_available(false);

        let err = StageConnection::acquire(&connector, Stage::Dimensions)
            .await
            .err()
            .unwrap();
        assert_eq!(err.stage, Stage::Dimensions);
        assert_eq!(err.kind, AnomalyKind::Resource);
        assert_eq!(connector.open_connections(), 0);
    }
}
