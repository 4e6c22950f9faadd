use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context as _;
use futures_util::StreamExt as _;
use reqwest::header::{ACCEPT, USER_AGENT};
use tokio::io::AsyncWriteExt as _;
use url::Url;

use crate::error::DownloadError;

pub const USER_AGENT_VALUE: &str = "flyerscrape/0.1";

/// Plain HTTP downloader. One GET per call, no retries.
#[derive(Debug, Clone)]
pub struct AssetFetcher {
    client: reqwest::Client,
}

impl AssetFetcher {
    pub fn new() -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .context("build asset fetcher http client")?;
        Ok(Self { client })
    }

    /// Streams `url` into `destination`, replacing any existing file. Returns
    /// the number of bytes written.
    pub async fn fetch(&self, url: &Url, destination: &Path) -> Result<u64, DownloadError> {
        let resp = self
            .client
            .get(url.clone())
            .header(USER_AGENT, USER_AGENT_VALUE)
            .header(ACCEPT, "image/avif,image/webp,image/*,*/*;q=0.8")
            .send()
            .await
            .map_err(|err| network(url, &err))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(DownloadError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| DownloadError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        let part_path = partial_path(destination);
        match write_stream(resp, url, &part_path).await {
            Ok(written) => {
                tokio::fs::rename(&part_path, destination)
                    .await
                    .map_err(|source| DownloadError::Io {
                        path: destination.to_path_buf(),
                        source,
                    })?;
                tracing::debug!(%url, path = %destination.display(), bytes = written, "downloaded");
                Ok(written)
            }
            Err(err) => {
                if let Err(rm_err) = tokio::fs::remove_file(&part_path).await
                    && rm_err.kind() != std::io::ErrorKind::NotFound
                {
                    tracing::warn!(path = %part_path.display(), ?rm_err, "failed to remove partial download");
                }
                Err(err)
            }
        }
    }
}

async fn write_stream(
    resp: reqwest::Response,
    url: &Url,
    part_path: &Path,
) -> Result<u64, DownloadError> {
    let io_err = |source| DownloadError::Io {
        path: part_path.to_path_buf(),
        source,
    };

    let mut file = tokio::fs::File::create(part_path).await.map_err(io_err)?;
    let mut stream = resp.bytes_stream();
    let mut written = 0_u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|err| network(url, &err))?;
        file.write_all(&chunk).await.map_err(io_err)?;
        written += chunk.len() as u64;
    }
    file.flush().await.map_err(io_err)?;
    Ok(written)
}

fn network(url: &Url, err: &reqwest::Error) -> DownloadError {
    DownloadError::Network {
        url: url.to_string(),
        message: err.to_string(),
    }
}

pub fn partial_path(destination: &Path) -> PathBuf {
    let mut name = destination
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    destination.with_file_name(name)
}

pub fn is_partial(name: &OsStr) -> bool {
    Path::new(name).extension() == Some(OsStr::new("part"))
}

/// Removes the files in `dir` whose name matches `doomed`. Subdirectories are
/// left alone.
pub async fn remove_files_matching(
    dir: &Path,
    doomed: impl Fn(&OsStr) -> bool,
) -> anyhow::Result<usize> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(err) => return Err(err).with_context(|| format!("read dir: {}", dir.display())),
    };
    let mut removed = 0;
    while let Some(entry) = entries
        .next_entry()
        .await
        .with_context(|| format!("list dir: {}", dir.display()))?
    {
        let is_file = entry
            .file_type()
            .await
            .with_context(|| format!("stat: {}", entry.path().display()))?
            .is_file();
        if !is_file || !doomed(entry.file_name().as_os_str()) {
            continue;
        }
        let path = entry.path();
        tokio::fs::remove_file(&path)
            .await
            .with_context(|| format!("remove stale file: {}", path.display()))?;
        removed += 1;
    }
    Ok(removed)
}

/// Removes one file; a file that is already gone is not an error.
pub async fn remove_if_exists(path: &Path) -> anyhow::Result<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err).with_context(|| format!("remove file: {}", path.display())),
    }
}
