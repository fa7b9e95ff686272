//! Archive file storage + HTTP fact fetching for factkeep.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use factkeep_core::{Archive, FetchedFact};
use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "factkeep-storage";

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive {} is not valid JSON: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("{action} {}: {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("encoding archive: {0}")]
    Encode(#[from] serde_json::Error),
}

/// JSON file holding every accepted fact.
#[derive(Debug, Clone)]
pub struct ArchiveStore {
    path: PathBuf,
}

impl ArchiveStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the archive, treating a missing, empty or unparseable file as empty.
    pub async fn load(&self) -> Archive {
        match self.load_strict().await {
            Ok(archive) => archive,
            Err(err) => {
                warn!(
                    path = %self.path.display(),
                    error = %err,
                    "could not read archive; starting with an empty one"
                );
                Archive::new()
            }
        }
    }

    /// Load the archive; a missing or blank file is empty, anything unparseable is an error.
    pub async fn load_strict(&self) -> Result<Archive, ArchiveError> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "archive file absent");
                return Ok(Archive::new());
            }
            Err(err) => return Err(io_error("reading archive", &self.path)(err)),
        };

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Archive::new());
        }

        serde_json::from_slice(&bytes).map_err(|source| ArchiveError::Corrupt {
            path: self.path.clone(),
            source,
        })
    }

    /// Rewrite the whole archive through a temp file and an atomic rename.
    pub async fn save(&self, archive: &Archive) -> Result<(), ArchiveError> {
        let bytes = encode_archive(archive)?;
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        fs::create_dir_all(&dir)
            .await
            .map_err(io_error("creating archive directory", &dir))?;

        let temp_path = dir.join(format!(".{}.tmp", Uuid::new_v4()));
        if let Err(err) = write_new_file(&temp_path, &bytes).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(err);
        }

        if let Err(err) = fs::rename(&temp_path, &self.path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(io_error("replacing archive", &self.path)(err));
        }

        debug!(path = %self.path.display(), records = archive.len(), "archive saved");
        Ok(())
    }
}

fn encode_archive(archive: &Archive) -> Result<Vec<u8>, serde_json::Error> {
    let mut bytes = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut bytes, formatter);
    archive.serialize(&mut serializer)?;
    bytes.push(b'\n');
    Ok(bytes)
}

fn io_error(action: &'static str, path: &Path) -> impl FnOnce(std::io::Error) -> ArchiveError {
    let path = path.to_path_buf();
    move |source| ArchiveError::Io {
        action,
        path,
        source,
    }
}

async fn write_new_file(path: &Path, bytes: &[u8]) -> Result<(), ArchiveError> {
    let mut file = fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(path)
        .await
        .map_err(io_error("opening temp archive", path))?;
    file.write_all(bytes)
        .await
        .map_err(io_error("writing temp archive", path))?;
    file.flush()
        .await
        .map_err(io_error("flushing temp archive", path))?;
    file.sync_all()
        .await
        .map_err(io_error("syncing temp archive", path))?;
    Ok(())
}

#[derive(Debug, Clone, Default)]
pub struct HttpClientConfig {
    /// `None` leaves the request unbounded.
    pub timeout: Option<Duration>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("unreadable response body from {url}: {reason}")]
    InvalidBody { url: String, reason: String },
    #[error("response from {url} has no usable `text` field")]
    MissingText { url: String },
}

impl FetchError {
    /// Whether the failure happened before a response body could be inspected.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Request(_) | Self::HttpStatus { .. })
    }
}

#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder().gzip(true).brotli(true);

        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self { client })
    }

    /// Issue one GET and pull the fact out of the JSON body.
    pub async fn fetch_fact(&self, url: &str) -> Result<FetchedFact, FetchError> {
        let span = info_span!("http_fetch", url);
        async move {
            let resp = self.client.get(url).send().await?;
            let status = resp.status();
            if !status.is_success() {
                return Err(FetchError::HttpStatus {
                    status: status.as_u16(),
                    url: url.to_string(),
                });
            }

            let body = resp.bytes().await?;
            let fact = parse_fact(url, &body)?;
            info!(chars = fact.text.chars().count(), "fact retrieved");
            Ok(fact)
        }
        .instrument(span)
        .await
    }
}

/// Decode an upstream body into a fact; the body must be an object with a non-blank `text`.
pub fn parse_fact(url: &str, body: &[u8]) -> Result<FetchedFact, FetchError> {
    let value: JsonValue = serde_json::from_slice(body).map_err(|err| FetchError::InvalidBody {
        url: url.to_string(),
        reason: err.to_string(),
    })?;

    let JsonValue::Object(payload) = value else {
        return Err(FetchError::InvalidBody {
            url: url.to_string(),
            reason: "expected a JSON object".to_string(),
        });
    };

    let text = match payload.get("text").and_then(JsonValue::as_str) {
        Some(text) if !text.trim().is_empty() => text.to_string(),
        _ => {
            return Err(FetchError::MissingText {
                url: url.to_string(),
            })
        }
    };

    Ok(FetchedFact {
        text,
        payload,
        source_url: url.to_string(),
        fetched_at: Utc::now(),
    })
}
