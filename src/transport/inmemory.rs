use std::sync::Arc;

use tokio::sync::Mutex;

use crate::{Envelope, transport::Sender};

/// In-memory sender that records every published envelope.
///
/// Clones share the same record, so a test can keep one handle while the
/// recoverer publishes through another. Useful for:
/// - Unit and integration testing
/// - Running the recovery pipeline without a broker
pub struct InMemory<H, M> {
    sent: Arc<Mutex<Vec<Envelope<H, M>>>>,
}

impl<H: Clone, M: Clone> InMemory<H, M> {
    /// Snapshot of everything published so far, oldest first.
    pub async fn sent_messages(&self) -> Vec<Envelope<H, M>> {
        self.sent.lock().await.clone()
    }

    /// Drain the record.
    pub async fn take_sent_messages(&self) -> Vec<Envelope<H, M>> {
        std::mem::take(&mut *self.sent.lock().await)
    }
}

impl<H, M> Clone for InMemory<H, M> {
    fn clone(&self) -> Self {
        Self {
            sent: Arc::clone(&self.sent),
        }
    }
}

impl<H, M> Default for InMemory<H, M> {
    fn default() -> Self {
        Self {
            sent: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

#[async_trait::async_trait]
impl<H, M> Sender<H, M> for InMemory<H, M>
where
    H: std::fmt::Debug + Send,
    M: std::fmt::Debug + Send,
{
    type Error = std::convert::Infallible;

    #[tracing::instrument(skip_all)]
    async fn send(&mut self, envelope: Envelope<H, M>) -> Result<(), Self::Error> {
        tracing::debug!(headers = ?envelope.headers, "Message recorded by in-memory sender");
        self.sent.lock().await.push(envelope);
        Ok(())
    }
}
