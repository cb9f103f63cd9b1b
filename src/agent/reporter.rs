use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::gauge::GaugeHandle;
use crate::progress::{IngestError, ProgressHandle};
use crate::status::{BlockNumber, StatusError, StatusStore};

/// Consumer-facing handle: one call per processed event feeds both the
/// progress table and the health gauges.
#[derive(Clone, Debug)]
pub struct Reporter {
    progress: Option<ProgressHandle>,
    gauges: Option<GaugeHandle>,
    status: Arc<StatusStore>,
}

impl Reporter {
    pub(crate) fn new(
        progress: Option<ProgressHandle>,
        gauges: Option<GaugeHandle>,
        status: Arc<StatusStore>,
    ) -> Self {
        Self {
            progress,
            gauges,
            status,
        }
    }

    /// Reports one processed event at `height` carrying `timestamp`.
    pub async fn event_processed(
        &self,
        stream_id: &str,
        height: i64,
        timestamp: DateTime<Utc>,
    ) -> Result<(), IngestError> {
        if let Some(progress) = &self.progress {
            progress.submit_event(stream_id, height, timestamp).await?;
        }
        if let Some(gauges) = &self.gauges {
            gauges.submit_event(stream_id, timestamp).await?;
        }
        Ok(())
    }

    pub fn register_stream(&self, stream_id: &str, network: &str) -> Result<(), StatusError> {
        self.status.register_stream(stream_id, network)
    }

    pub fn update_status(
        &self,
        stream_id: &str,
        timestamp: DateTime<Utc>,
        block_number: BlockNumber,
    ) -> Result<(), StatusError> {
        self.status.update_status(stream_id, timestamp, block_number)
    }
}
