//! Cooperative cancellation shared by every stage of a run.

use std::sync::Arc;
use tokio::sync::watch;

use crate::error::{PipelineError, PipelineResult};

/// Cloneable cancel flag backed by a watch channel.
///
/// FFmpeg runners and analyzers get a receiver and stop their work when the
/// flag flips; stage boundaries call [`CancelToken::check`].
#[derive(Debug, Clone)]
pub struct CancelToken {
    sender: Arc<watch::Sender<bool>>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }

    pub fn check(&self) -> PipelineResult<()> {
        if self.is_cancelled() {
            Err(PipelineError::Cancelled)
        } else {
            Ok(())
        }
    }
}
