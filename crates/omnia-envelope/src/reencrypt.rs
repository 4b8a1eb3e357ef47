//! Bulk re-encryption: walk every persisted envelope in cursor-paginated
//! batches, decrypt with the current provider, re-encrypt under the current
//! key, and write the copy back through an injected store interface.
//!
//! Per-message failures are counted, not fatal to the batch.

use crate::{Envelope, EnvelopeCipher, EnvelopeError};
use async_trait::async_trait;
use tracing::{info, warn};

/// One persisted encrypted message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    /// Message id within the store.
    pub id: String,
    /// The persisted envelope, JSON-encoded.
    pub envelope_json: String,
}

/// One page of messages plus the cursor for the next page.
#[derive(Debug, Clone, Default)]
pub struct MessagePage {
    /// Messages in this page.
    pub messages: Vec<StoredMessage>,
    /// Cursor for the next page; `None` ends the walk.
    pub next_cursor: Option<String>,
}

/// Paginated access to persisted envelopes.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Fetch one page starting at `cursor` (`None` = first page).
    async fn page(&self, cursor: Option<&str>, limit: usize)
    -> Result<MessagePage, EnvelopeError>;

    /// Replace one message's persisted envelope.
    async fn update(&self, id: &str, envelope_json: &str) -> Result<(), EnvelopeError>;
}

/// Counters from one re-encryption run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReencryptReport {
    /// Messages visited.
    pub scanned: usize,
    /// Messages re-encrypted and written back.
    pub reencrypted: usize,
    /// Messages that failed to decrypt, re-encrypt, or persist.
    pub failed: usize,
}

/// Bulk re-encryptor over any provider.
pub struct Reencryptor {
    cipher: EnvelopeCipher,
    batch_size: usize,
}

impl Reencryptor {
    /// Build a re-encryptor processing `batch_size` messages per page.
    pub fn new(cipher: EnvelopeCipher, batch_size: usize) -> Self {
        Self {
            cipher,
            batch_size: batch_size.max(1),
        }
    }

    /// Re-encrypt every message in the store under the current key.
    pub async fn run(&self, store: &dyn MessageStore) -> Result<ReencryptReport, EnvelopeError> {
        let mut report = ReencryptReport::default();
        let mut cursor: Option<String> = None;

        loop {
            let page = store.page(cursor.as_deref(), self.batch_size).await?;
            for message in &page.messages {
                report.scanned += 1;
                match self.reencrypt_one(store, message).await {
                    Ok(()) => report.reencrypted += 1,
                    Err(err) => {
                        report.failed += 1;
                        warn!(id = %message.id, error = %err, "re-encryption failed for message");
                    }
                }
            }
            cursor = page.next_cursor;
            if cursor.is_none() {
                break;
            }
        }

        info!(
            scanned = report.scanned,
            reencrypted = report.reencrypted,
            failed = report.failed,
            "re-encryption run complete"
        );
        Ok(report)
    }

    async fn reencrypt_one(
        &self,
        store: &dyn MessageStore,
        message: &StoredMessage,
    ) -> Result<(), EnvelopeError> {
        let envelope = Envelope::from_json(&message.envelope_json)?;
        let plaintext = self.cipher.decrypt(&envelope).await?;
        let fresh = self.cipher.encrypt(&plaintext).await?;
        store.update(&message.id, &fresh.to_json()).await
    }
}
