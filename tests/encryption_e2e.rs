//! Envelope encryption properties end-to-end: round trips, tamper
//! detection, and rotation with bulk re-encryption.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use omnia_envelope::{
    Envelope, EnvelopeCipher, EnvelopeError, LocalKms, MessagePage, MessageStore, Reencryptor,
    StoredMessage,
};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

fn cipher() -> EnvelopeCipher {
    EnvelopeCipher::new(Arc::new(LocalKms::new("e2e-master")))
}

#[tokio::test]
async fn encrypt_then_decrypt_is_identity() {
    let cipher = cipher();
    let envelope = cipher.encrypt(b"hello").await.unwrap();
    assert_eq!(cipher.decrypt(&envelope).await.unwrap(), b"hello");
}

#[tokio::test]
async fn single_bit_tamper_fails_decryption() {
    let cipher = cipher();
    let envelope = cipher.encrypt(b"hello").await.unwrap();

    let mut ct = STANDARD.decode(&envelope.ct).unwrap();
    ct[0] ^= 0x01;
    let tampered = Envelope {
        ct: STANDARD.encode(&ct),
        ..envelope
    };

    let err = cipher.decrypt(&tampered).await.unwrap_err();
    assert!(matches!(err, EnvelopeError::DecryptFailed));
}

struct MapStore(Mutex<BTreeMap<String, String>>);

#[async_trait::async_trait]
impl MessageStore for MapStore {
    async fn page(
        &self,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<MessagePage, EnvelopeError> {
        let messages = self.0.lock().unwrap();
        let page: Vec<StoredMessage> = messages
            .iter()
            .skip_while(|(id, _)| cursor.is_some_and(|c| id.as_str() <= c))
            .take(limit)
            .map(|(id, json)| StoredMessage {
                id: id.clone(),
                envelope_json: json.clone(),
            })
            .collect();
        let next_cursor = (page.len() == limit).then(|| page.last().unwrap().id.clone());
        Ok(MessagePage {
            messages: page,
            next_cursor,
        })
    }

    async fn update(&self, id: &str, envelope_json: &str) -> Result<(), EnvelopeError> {
        self.0
            .lock()
            .unwrap()
            .insert(id.to_string(), envelope_json.to_string());
        Ok(())
    }
}

#[tokio::test]
async fn rotation_and_bulk_reencryption_keep_messages_readable() {
    let cipher = cipher();
    let mut seeded = BTreeMap::new();
    for index in 0..5 {
        let envelope = cipher
            .encrypt(format!("session-{index}").as_bytes())
            .await
            .unwrap();
        seeded.insert(format!("s{index}"), envelope.to_json());
    }
    let store = MapStore(Mutex::new(seeded));

    let rotation = cipher.rotate_key().await.unwrap();
    assert_ne!(rotation.previous_version, rotation.new_version);

    let report = Reencryptor::new(cipher.clone(), 2).run(&store).await.unwrap();
    assert_eq!(report.scanned, 5);
    assert_eq!(report.reencrypted, 5);
    assert_eq!(report.failed, 0);

    for (id, json) in store.0.lock().unwrap().iter() {
        let envelope = Envelope::from_json(json).unwrap();
        assert_eq!(
            envelope.kv.as_deref(),
            Some(rotation.new_version.as_str()),
            "{id} should be wrapped under the new key"
        );
    }

    let sample = Envelope::from_json(&store.0.lock().unwrap()["s3"].clone()).unwrap();
    assert_eq!(cipher.decrypt(&sample).await.unwrap(), b"session-3");
}
