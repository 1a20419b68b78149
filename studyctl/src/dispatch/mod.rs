//! Hand-off of client-source processing jobs to the work queue.
//!
//! A [`TaskQueue`] opens a [`QueueSession`] to the broker, and the session publishes a single
//! [`QueueMessage`]. [`TaskDispatcher`] decides, from [`DispatchMode`], whether the HTTP response
//! waits for the broker to confirm the publish.

pub mod amqp;

use crate::config::DispatchMode;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{Instrument, debug, error, info, instrument, warn};

pub use amqp::AmqpTaskQueue;

/// Work item consumed by the out-of-process transpiler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueMessage {
    pub survey_id: String,
    pub step_id: String,
    pub path: String,
}

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("could not connect to broker: {0}")]
    Connect(#[source] lapin::Error),

    #[error("could not open broker channel: {0}")]
    Channel(#[source] lapin::Error),

    #[error("could not declare queue {queue}: {source}")]
    Declare {
        queue: String,
        #[source]
        source: lapin::Error,
    },

    #[error("could not publish to {queue}: {source}")]
    Publish {
        queue: String,
        #[source]
        source: lapin::Error,
    },

    #[error("broker refused message for {queue}")]
    Rejected { queue: String },

    #[error("could not encode job: {0}")]
    Encode(#[from] serde_json::Error),
}

/// A broker that jobs can be published to.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Open a connection. Failures here are always reported to the caller.
    async fn connect(&self) -> Result<Box<dyn QueueSession>, DispatchError>;
}

/// An open broker connection, good for one publish.
#[async_trait]
pub trait QueueSession: Send {
    async fn publish(self: Box<Self>, message: QueueMessage) -> Result<(), DispatchError>;
}

#[derive(Clone)]
pub struct TaskDispatcher {
    queue: Arc<dyn TaskQueue>,
    mode: DispatchMode,
}

impl TaskDispatcher {
    pub fn new(queue: Arc<dyn TaskQueue>, mode: DispatchMode) -> Self {
        Self { queue, mode }
    }

    /// Enqueue a job. In [`DispatchMode::Confirmed`] this returns once the broker has acknowledged
    /// the message; in [`DispatchMode::FireAndForget`] it returns once the connection is open and
    /// publish failures are only logged.
    #[instrument(skip(self), fields(survey_id = %job.survey_id, step_id = %job.step_id, mode = ?self.mode))]
    pub async fn dispatch(&self, job: QueueMessage) -> Result<(), DispatchError> {
        if job.step_id.is_empty() {
            warn!("Job has no step id, not publishing");
            return Ok(());
        }

        let session = self.queue.connect().await?;
        debug!("Connected to broker");

        match self.mode {
            DispatchMode::Confirmed => {
                session.publish(job).await?;
                info!("Job published and confirmed");
            }
            DispatchMode::FireAndForget => {
                tokio::spawn(
                    async move {
                        match session.publish(job).await {
                            Ok(()) => info!("Job published"),
                            Err(e) => error!(error = %e, "Failed to publish job after response"),
                        }
                    }
                    .in_current_span(),
                );
            }
        }
        Ok(())
    }
}
