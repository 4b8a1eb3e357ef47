//! OCI-registry-backed source fetcher.
//!
//! Speaks the registry v2 HTTP API directly: a manifest head resolves the
//! digest, blobs are pulled and extracted onto scratch with path-traversal
//! protection (secure join plus a symlink-escape check), and the extracted
//! directory's recursive hash becomes the artefact checksum.

use crate::{Artifact, SourceError, SourceFetcher, dir_checksum, dir_size, secure_join};
use async_trait::async_trait;
use chrono::Utc;
use flate2::read::GzDecoder;
use omnia_core::{OciSourceSpec, SourceType};
use serde::Deserialize;
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

const MANIFEST_ACCEPT: &str = "application/vnd.oci.image.manifest.v1+json, \
     application/vnd.docker.distribution.manifest.v2+json";
const DIGEST_HEADER: &str = "Docker-Content-Digest";
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

// ---------------------------------------------------------------------------
// Reference parsing
// ---------------------------------------------------------------------------

/// A parsed `oci://` image reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OciReference {
    /// Registry host (and optional port).
    pub registry: String,
    /// Repository path under the registry.
    pub repository: String,
    /// Tag, when referenced by tag.
    pub tag: Option<String>,
    /// Digest, when referenced by digest.
    pub digest: Option<String>,
}

impl OciReference {
    /// Parse `oci://host/path:tag` or `oci://host/path@digest`.
    pub fn parse(reference: &str) -> Result<Self, SourceError> {
        let invalid = |detail: &str| SourceError::InvalidReference {
            reference: reference.to_string(),
            detail: detail.to_string(),
        };

        let rest = reference
            .strip_prefix("oci://")
            .ok_or_else(|| invalid("missing oci:// scheme"))?;

        let (path_part, digest) = match rest.split_once('@') {
            Some((path, digest)) => (path, Some(digest.to_string())),
            None => (rest, None),
        };

        let (path_part, tag) = if digest.is_none() {
            // A colon after the last slash is a tag separator; earlier
            // colons belong to the registry port.
            let last_slash = path_part.rfind('/').unwrap_or(0);
            match path_part[last_slash..].find(':') {
                Some(offset) => {
                    let split = last_slash + offset;
                    (
                        &path_part[..split],
                        Some(path_part[split + 1..].to_string()),
                    )
                }
                None => (path_part, None),
            }
        } else {
            (path_part, None)
        };

        let (registry, repository) = path_part
            .split_once('/')
            .ok_or_else(|| invalid("missing repository path"))?;
        if registry.is_empty() || repository.is_empty() {
            return Err(invalid("empty registry or repository"));
        }
        if tag.is_none() && digest.is_none() {
            return Err(invalid("a tag or digest is required"));
        }

        Ok(Self {
            registry: registry.to_string(),
            repository: repository.to_string(),
            tag,
            digest,
        })
    }

    /// The tag or digest used to address manifests.
    pub fn manifest_reference(&self) -> &str {
        self.digest
            .as_deref()
            .or(self.tag.as_deref())
            .unwrap_or("latest")
    }

    /// Scheme-qualified registry base URL. Local registries go over plain
    /// HTTP.
    pub fn registry_base(&self) -> String {
        if self.registry.starts_with("localhost")
            || self.registry.starts_with("127.")
            || self.registry.starts_with("[::1]")
        {
            format!("http://{}", self.registry)
        } else {
            format!("https://{}", self.registry)
        }
    }
}

// ---------------------------------------------------------------------------
// Manifest model
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(default)]
    layers: Vec<Descriptor>,
}

#[derive(Debug, Deserialize)]
struct Descriptor {
    digest: String,
}

// ---------------------------------------------------------------------------
// Fetcher
// ---------------------------------------------------------------------------

/// OCI fetcher over one [`OciSourceSpec`].
pub struct OciFetcher {
    spec: OciSourceSpec,
    scratch: PathBuf,
    client: reqwest::Client,
}

impl OciFetcher {
    /// Build a fetcher writing under `scratch`.
    pub fn new(
        spec: OciSourceSpec,
        scratch: impl Into<PathBuf>,
        timeout: Duration,
    ) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SourceError::Http {
                detail: e.to_string(),
            })?;
        Ok(Self {
            spec,
            scratch: scratch.into(),
            client,
        })
    }

    fn reference(&self) -> Result<OciReference, SourceError> {
        OciReference::parse(&self.spec.image)
    }

    fn authenticate(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.spec.auth {
            Some(auth) => request.basic_auth(&auth.username, Some(&auth.password)),
            None => request,
        }
    }

    async fn head_digest(&self, reference: &OciReference) -> Result<String, SourceError> {
        let url = format!(
            "{}/v2/{}/manifests/{}",
            reference.registry_base(),
            reference.repository,
            reference.manifest_reference()
        );
        let response = self
            .authenticate(self.client.head(&url).header("Accept", MANIFEST_ACCEPT))
            .send()
            .await
            .map_err(|e| SourceError::Http {
                detail: e.to_string(),
            })?;
        if !response.status().is_success() {
            return Err(SourceError::Http {
                detail: format!("manifest head for {url} returned {}", response.status()),
            });
        }
        response
            .headers()
            .get(DIGEST_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| SourceError::Http {
                detail: format!("manifest head for {url} carried no digest header"),
            })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        accept: &str,
    ) -> Result<T, SourceError> {
        let response = self
            .authenticate(self.client.get(url).header("Accept", accept))
            .send()
            .await
            .map_err(|e| SourceError::Http {
                detail: e.to_string(),
            })?;
        if !response.status().is_success() {
            return Err(SourceError::Http {
                detail: format!("{url} returned {}", response.status()),
            });
        }
        response.json().await.map_err(|e| SourceError::Http {
            detail: e.to_string(),
        })
    }

    async fn get_blob(&self, url: &str) -> Result<Vec<u8>, SourceError> {
        let response =
            self.authenticate(self.client.get(url))
                .send()
                .await
                .map_err(|e| SourceError::Http {
                    detail: e.to_string(),
                })?;
        if !response.status().is_success() {
            return Err(SourceError::Http {
                detail: format!("{url} returned {}", response.status()),
            });
        }
        Ok(response
            .bytes()
            .await
            .map_err(|e| SourceError::Http {
                detail: e.to_string(),
            })?
            .to_vec())
    }

    /// Returns `true` when a symlink target lexically resolves inside the
    /// extraction root.
    fn symlink_stays_inside(root: &Path, link_path: &Path, target: &Path) -> bool {
        if target.is_absolute() {
            return false;
        }
        // Depth of the link's parent directory relative to the root.
        let Ok(rel_parent) = link_path
            .parent()
            .unwrap_or(Path::new(""))
            .strip_prefix(root)
        else {
            return false;
        };
        let mut depth: i32 = rel_parent.components().count() as i32;
        for component in target.components() {
            match component {
                Component::ParentDir => {
                    depth -= 1;
                    if depth < 0 {
                        return false;
                    }
                }
                Component::Normal(_) => depth += 1,
                Component::CurDir => {}
                _ => return false,
            }
        }
        true
    }

    /// Extract one layer tarball (gzipped or plain) under `root`.
    fn extract_layer(bytes: &[u8], root: &Path) -> Result<(), SourceError> {
        let reader: Box<dyn Read> = if bytes.starts_with(&GZIP_MAGIC) {
            Box::new(GzDecoder::new(std::io::Cursor::new(bytes.to_vec())))
        } else {
            Box::new(std::io::Cursor::new(bytes.to_vec()))
        };
        let mut archive = tar::Archive::new(reader);

        for entry in archive.entries().map_err(|e| SourceError::io(root, e))? {
            let mut entry = entry.map_err(|e| SourceError::io(root, e))?;
            let entry_path = entry
                .path()
                .map_err(|e| SourceError::io(root, e))?
                .into_owned();
            let dest = secure_join(root, &entry_path)?;

            match entry.header().entry_type() {
                tar::EntryType::Directory => {
                    std::fs::create_dir_all(&dest).map_err(|e| SourceError::io(&dest, e))?;
                }
                tar::EntryType::Regular => {
                    if let Some(parent) = dest.parent() {
                        std::fs::create_dir_all(parent)
                            .map_err(|e| SourceError::io(parent, e))?;
                    }
                    let mut file = std::fs::File::create(&dest)
                        .map_err(|e| SourceError::io(&dest, e))?;
                    std::io::copy(&mut entry, &mut file)
                        .map_err(|e| SourceError::io(&dest, e))?;
                }
                tar::EntryType::Symlink => {
                    let Some(target) = entry
                        .link_name()
                        .map_err(|e| SourceError::io(&dest, e))?
                        .map(|t| t.into_owned())
                    else {
                        continue;
                    };
                    if !Self::symlink_stays_inside(root, &dest, &target) {
                        warn!(
                            entry = %entry_path.display(),
                            target = %target.display(),
                            "skipping symlink escaping the extraction root"
                        );
                        continue;
                    }
                    if let Some(parent) = dest.parent() {
                        std::fs::create_dir_all(parent)
                            .map_err(|e| SourceError::io(parent, e))?;
                    }
                    #[cfg(unix)]
                    std::os::unix::fs::symlink(&target, &dest)
                        .map_err(|e| SourceError::io(&dest, e))?;
                }
                _ => {
                    debug!(entry = %entry_path.display(), "skipping unsupported entry type");
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl SourceFetcher for OciFetcher {
    fn source_type(&self) -> SourceType {
        SourceType::Oci
    }

    async fn latest_revision(&self) -> Result<String, SourceError> {
        let reference = self.reference()?;
        if let Some(digest) = &reference.digest {
            return Ok(digest.clone());
        }
        self.head_digest(&reference).await
    }

    async fn fetch(&self, revision: &str) -> Result<Artifact, SourceError> {
        let reference = self.reference()?;
        let digest = if revision.starts_with("sha256:") {
            revision.to_string()
        } else {
            self.head_digest(&reference).await?
        };

        let manifest_url = format!(
            "{}/v2/{}/manifests/{}",
            reference.registry_base(),
            reference.repository,
            digest
        );
        let manifest: Manifest = self.get_json(&manifest_url, MANIFEST_ACCEPT).await?;
        debug!(digest = %digest, layers = manifest.layers.len(), "pulled manifest");

        let content_root = self.scratch.join("content");
        if content_root.exists() {
            std::fs::remove_dir_all(&content_root)
                .map_err(|e| SourceError::io(&content_root, e))?;
        }
        std::fs::create_dir_all(&content_root)
            .map_err(|e| SourceError::io(&content_root, e))?;

        for layer in &manifest.layers {
            let blob_url = format!(
                "{}/v2/{}/blobs/{}",
                reference.registry_base(),
                reference.repository,
                layer.digest
            );
            let bytes = self.get_blob(&blob_url).await?;
            Self::extract_layer(&bytes, &content_root)?;
        }

        Ok(Artifact {
            path: content_root.clone(),
            revision: digest,
            checksum: dir_checksum(&content_root)?,
            size: dir_size(&content_root)?,
            last_modified: Utc::now(),
        })
    }
}
