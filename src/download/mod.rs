//! Fetching installer scripts to the local filesystem.

use crate::http::HttpClient;
use crate::runtime::Runtime;
use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, info};
use std::path::Path;

/// Something that can put the contents of a URL at a local path.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ScriptFetcher: Send + Sync {
    /// Fetch `url` into `dest`, overwriting it. Returns the number of bytes written.
    async fn fetch<'a>(&self, runtime: &'a (dyn Runtime + 'a), url: &str, dest: &Path) -> Result<u64>;
}

#[async_trait]
impl ScriptFetcher for HttpClient {
    async fn fetch<'a>(&self, runtime: &'a (dyn Runtime + 'a), url: &str, dest: &Path) -> Result<u64> {
        fetch_file(runtime, url, dest, self).await
    }
}

/// Downloads `url` to `dest`, replacing any existing file.
///
/// Single attempt. If the transfer fails after `dest` was created, the partial
/// file is removed.
#[tracing::instrument(skip(runtime, http_client))]
pub async fn fetch_file<R: Runtime + ?Sized>(
    runtime: &R,
    url: &str,
    dest: &Path,
    http_client: &HttpClient,
) -> Result<u64> {
    info!("Downloading {} to {}...", url, dest.display());

    let dest_buf = dest.to_path_buf();
    let result = http_client
        .download_file(url, || {
            runtime
                .create_file(&dest_buf)
                .with_context(|| format!("Failed to create file at {:?}", dest_buf))
        })
        .await;

    match result {
        Ok(bytes) => {
            info!("Download complete ({} bytes).", bytes);
            Ok(bytes)
        }
        Err(e) => {
            if runtime.exists(dest) {
                debug!("Removing partial download {:?}", dest);
                let _ = runtime.remove_file(dest);
            }
            Err(e)
        }
    }
}
