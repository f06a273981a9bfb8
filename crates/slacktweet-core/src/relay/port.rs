use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{relay::types::StreamItem, Result};

/// Callbacks the transport invokes while a filtered stream is open.
pub trait StreamListener: Send + Sync {
    /// Per item. `false` asks the transport to stop streaming.
    fn on_status(&self, item: &StreamItem) -> bool;

    /// Per upstream error status. `false` asks the transport to disconnect.
    fn on_error(&self, status_code: u16) -> bool;
}

/// Upstream content service (authenticated client).
#[async_trait]
pub trait StreamTransport: Send + Sync {
    /// Open a stream scoped to `terms`, delivering to `listener` until the
    /// returned handle is disconnected or a callback returns `false`.
    async fn open_filtered_stream(
        &self,
        terms: &[String],
        listener: Arc<dyn StreamListener>,
    ) -> Result<StreamHandle>;
}

/// A live filtered stream. Dropping the handle disconnects it.
#[derive(Debug)]
pub struct StreamHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl StreamHandle {
    pub fn new(cancel: CancellationToken, task: JoinHandle<()>) -> Self {
        Self {
            cancel,
            task: Some(task),
        }
    }

    /// A handle with no reader task; live until disconnected.
    pub fn detached(cancel: CancellationToken) -> Self {
        Self { cancel, task: None }
    }

    pub fn is_live(&self) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        self.task.as_ref().map_or(true, |t| !t.is_finished())
    }

    pub fn disconnect(&self) {
        self.cancel.cancel();
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
