//! ConfigMap-backed source fetcher.
//!
//! Materialises a config map's keys as files under scratch, sorted
//! lexicographically, with all mod-times equal to the config map's creation
//! timestamp so repeated fetches are deterministic. Binary-data entries
//! merge with text-data entries; text takes precedence on key conflict.

use crate::{Artifact, SourceError, SourceFetcher, dir_checksum, dir_size};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use omnia_core::{ConfigMap, Object, SourceType};
use omnia_store::Api;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::SystemTime;
use tracing::debug;

const REVISION_LEN: usize = 12;

/// ConfigMap fetcher reading from the state store.
pub struct ConfigMapFetcher {
    api: Api<ConfigMap>,
    namespace: String,
    name: String,
    scratch: PathBuf,
}

impl ConfigMapFetcher {
    /// Build a fetcher for one config map, writing under `scratch`.
    pub fn new(
        api: Api<ConfigMap>,
        namespace: impl Into<String>,
        name: impl Into<String>,
        scratch: impl Into<PathBuf>,
    ) -> Self {
        Self {
            api,
            namespace: namespace.into(),
            name: name.into(),
            scratch: scratch.into(),
        }
    }

    async fn load(&self) -> Result<ConfigMap, SourceError> {
        self.api
            .get(&self.namespace, &self.name)
            .await?
            .ok_or_else(|| SourceError::Missing {
                kind: ConfigMap::KIND.to_string(),
                name: format!("{}/{}", self.namespace, self.name),
            })
    }

    /// Binary entries merged under text entries, text winning on conflict,
    /// iterated in sorted key order.
    fn merged_entries(config_map: &ConfigMap) -> Result<BTreeMap<String, Vec<u8>>, SourceError> {
        let mut entries: BTreeMap<String, Vec<u8>> = BTreeMap::new();
        for (key, encoded) in &config_map.binary_data {
            let bytes = STANDARD
                .decode(encoded)
                .map_err(|e| SourceError::InvalidReference {
                    reference: key.clone(),
                    detail: format!("binary entry is not valid base64: {e}"),
                })?;
            entries.insert(key.clone(), bytes);
        }
        for (key, text) in &config_map.data {
            entries.insert(key.clone(), text.clone().into_bytes());
        }
        Ok(entries)
    }

    /// Content revision: a short digest over the sorted entries.
    fn content_revision(entries: &BTreeMap<String, Vec<u8>>) -> String {
        let mut hasher = Sha256::new();
        for (key, value) in entries {
            hasher.update(key.as_bytes());
            hasher.update([0u8]);
            hasher.update(value);
        }
        let digest = hex::encode(hasher.finalize());
        format!("cfg:{}", &digest[..REVISION_LEN])
    }
}

#[async_trait]
impl SourceFetcher for ConfigMapFetcher {
    fn source_type(&self) -> SourceType {
        SourceType::ConfigMap
    }

    async fn latest_revision(&self) -> Result<String, SourceError> {
        let config_map = self.load().await?;
        Ok(Self::content_revision(&Self::merged_entries(&config_map)?))
    }

    async fn fetch(&self, _revision: &str) -> Result<Artifact, SourceError> {
        let config_map = self.load().await?;
        let entries = Self::merged_entries(&config_map)?;
        let revision = Self::content_revision(&entries);
        let created: DateTime<Utc> = config_map
            .metadata
            .creation_timestamp
            .unwrap_or_else(Utc::now);

        let content_root = self.scratch.join("content");
        if content_root.exists() {
            std::fs::remove_dir_all(&content_root)
                .map_err(|e| SourceError::io(&content_root, e))?;
        }
        std::fs::create_dir_all(&content_root)
            .map_err(|e| SourceError::io(&content_root, e))?;

        let mtime = SystemTime::from(created);
        for (key, bytes) in &entries {
            let path = content_root.join(key);
            std::fs::write(&path, bytes).map_err(|e| SourceError::io(&path, e))?;
            let file = std::fs::File::options()
                .write(true)
                .open(&path)
                .map_err(|e| SourceError::io(&path, e))?;
            file.set_modified(mtime)
                .map_err(|e| SourceError::io(&path, e))?;
        }
        debug!(
            config_map = %self.name,
            entries = entries.len(),
            revision = %revision,
            "materialised config map"
        );

        Ok(Artifact {
            path: content_root.clone(),
            revision,
            checksum: dir_checksum(&content_root)?,
            size: dir_size(&content_root)?,
            last_modified: created,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use omnia_core::ObjectMeta;
    use omnia_store::MemoryStore;
    use std::sync::Arc;

    async fn fetcher_with(
        data: &[(&str, &str)],
        binary: &[(&str, &[u8])],
    ) -> (tempfile::TempDir, ConfigMapFetcher) {
        let api: Api<ConfigMap> = Api::new(Arc::new(MemoryStore::new()));
        let config_map = ConfigMap {
            metadata: ObjectMeta::named("prod", "arena-files"),
            data: data
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            binary_data: binary
                .iter()
                .map(|(k, v)| (k.to_string(), STANDARD.encode(v)))
                .collect(),
        };
        api.create(&config_map).await.unwrap();

        let scratch = tempfile::tempdir().unwrap();
        let fetcher = ConfigMapFetcher::new(api, "prod", "arena-files", scratch.path());
        (scratch, fetcher)
    }

    #[tokio::test]
    async fn fetch_writes_sorted_keys_as_files() {
        let (_scratch, fetcher) =
            fetcher_with(&[("b.yaml", "two"), ("a.yaml", "one")], &[]).await;
        let artifact = fetcher.fetch("any").await.unwrap();
        assert!(artifact.path.join("a.yaml").exists());
        assert!(artifact.path.join("b.yaml").exists());
        assert_eq!(
            std::fs::read_to_string(artifact.path.join("a.yaml")).unwrap(),
            "one"
        );
    }

    #[tokio::test]
    async fn text_wins_over_binary_on_conflict() {
        let (_scratch, fetcher) = fetcher_with(
            &[("suite.yaml", "text-content")],
            &[("suite.yaml", b"binary-content"), ("extra.bin", b"\x00\x01")],
        )
        .await;
        let artifact = fetcher.fetch("any").await.unwrap();
        assert_eq!(
            std::fs::read_to_string(artifact.path.join("suite.yaml")).unwrap(),
            "text-content"
        );
        assert_eq!(
            std::fs::read(artifact.path.join("extra.bin")).unwrap(),
            vec![0u8, 1u8]
        );
    }

    #[tokio::test]
    async fn fetch_is_deterministic() {
        let (_scratch, fetcher) =
            fetcher_with(&[("a.yaml", "one"), ("b.yaml", "two")], &[]).await;
        let first = fetcher.fetch("any").await.unwrap();
        let second = fetcher.fetch("any").await.unwrap();
        assert_eq!(first.checksum, second.checksum);
        assert_eq!(first.revision, second.revision);
        assert_eq!(first.last_modified, second.last_modified);
    }

    #[tokio::test]
    async fn mtimes_equal_creation_timestamp() {
        let (_scratch, fetcher) = fetcher_with(&[("a.yaml", "one")], &[]).await;
        let artifact = fetcher.fetch("any").await.unwrap();
        let modified = std::fs::metadata(artifact.path.join("a.yaml"))
            .unwrap()
            .modified()
            .unwrap();
        let expected = SystemTime::from(artifact.last_modified);
        let drift = modified
            .duration_since(expected)
            .unwrap_or_else(|e| e.duration());
        assert!(drift.as_secs() < 2, "mtime should track creation time");
    }

    #[tokio::test]
    async fn missing_config_map_is_reported() {
        let api: Api<ConfigMap> = Api::new(Arc::new(MemoryStore::new()));
        let scratch = tempfile::tempdir().unwrap();
        let fetcher = ConfigMapFetcher::new(api, "prod", "absent", scratch.path());
        let err = fetcher.latest_revision().await.unwrap_err();
        assert!(matches!(err, SourceError::Missing { .. }));
    }

    #[tokio::test]
    async fn revision_tracks_content() {
        let (_scratch, fetcher) = fetcher_with(&[("a.yaml", "one")], &[]).await;
        let r1 = fetcher.latest_revision().await.unwrap();
        assert!(r1.starts_with("cfg:"));

        let (_scratch2, fetcher2) = fetcher_with(&[("a.yaml", "changed")], &[]).await;
        let r2 = fetcher2.latest_revision().await.unwrap();
        assert_ne!(r1, r2);
    }
}
