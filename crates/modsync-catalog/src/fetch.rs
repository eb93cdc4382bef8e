//! Network and archive capabilities used by bundle synchronization.

use std::fs;
use std::path::Path;
use std::process::Command;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, LOCATION};
use reqwest::redirect::Policy;
use tracing::debug;

use crate::bundle_types::Bundle;

/// Default HTTP request timeout (30 seconds).
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

const USER_AGENT: &str = concat!("modsync/", env!("CARGO_PKG_VERSION"));

/// Where bundle releases come from.
pub trait ReleaseSource: Send + Sync {
    /// Tag of the newest published release.
    fn latest_tag(&self, bundle: &Bundle) -> Result<String>;

    /// Fetches `url` into `destination`, replacing any existing file.
    fn download(&self, url: &str, destination: &Path) -> Result<()>;
}

pub trait ArchiveExtractor: Send + Sync {
    fn extract(&self, archive: &Path, destination: &Path) -> Result<()>;
}

/// [`ReleaseSource`] backed by the GitHub release endpoints.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
    release_lookup: Client,
    timeout: Duration,
}

impl std::fmt::Debug for HttpFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpFetcher")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl HttpFetcher {
    pub fn new(token: Option<&str>) -> Result<Self> {
        Self::with_timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS), token)
    }

    pub fn with_timeout(timeout: Duration, token: Option<&str>) -> Result<Self> {
        let mut headers = HeaderMap::new();
        if let Some(token) = token.filter(|token| !token.trim().is_empty()) {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token.trim()))
                .context("invalid API token for Authorization header")?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .default_headers(headers.clone())
            .build()
            .context("failed to create HTTP client")?;
        // The latest-release endpoint answers with a redirect whose target
        // names the tag; that redirect must not be followed.
        let release_lookup = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .redirect(Policy::none())
            .build()
            .context("failed to create HTTP client")?;

        Ok(Self {
            client,
            release_lookup,
            timeout,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl ReleaseSource for HttpFetcher {
    fn latest_tag(&self, bundle: &Bundle) -> Result<String> {
        let url = bundle.latest_release_url();
        let response = self
            .release_lookup
            .head(&url)
            .send()
            .with_context(|| format!("failed querying latest release: {url}"))?;

        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| {
                anyhow!(
                    "latest release query for {url} returned HTTP {} without a redirect",
                    response.status()
                )
            })?;
        let tag = tag_from_release_location(location)
            .ok_or_else(|| anyhow!("no release tag in redirect location '{location}'"))?;
        debug!(bundle = %bundle, tag = %tag, "resolved latest release");
        Ok(tag)
    }

    fn download(&self, url: &str, destination: &Path) -> Result<()> {
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create download dir: {}", parent.display()))?;
        }

        let mut response = self
            .client
            .get(url)
            .send()
            .with_context(|| format!("failed downloading {url}"))?;
        if !response.status().is_success() {
            anyhow::bail!("HTTP {} for {url}", response.status());
        }

        let part_path = destination.with_extension("part");
        let result = (|| -> Result<()> {
            let mut file = fs::File::create(&part_path)
                .with_context(|| format!("failed creating {}", part_path.display()))?;
            response
                .copy_to(&mut file)
                .with_context(|| format!("failed reading response body for {url}"))?;
            fs::rename(&part_path, destination).with_context(|| {
                format!("failed moving download into {}", destination.display())
            })
        })();
        if result.is_err() {
            let _ = fs::remove_file(&part_path);
        }
        result
    }
}

/// Last path segment of a `/releases/tag/<tag>` redirect target.
pub fn tag_from_release_location(location: &str) -> Option<String> {
    let trimmed = location.trim().trim_end_matches('/');
    let (head, tag) = trimmed.rsplit_once('/')?;
    if tag.is_empty() || !head.ends_with("/tag") {
        return None;
    }
    Some(tag.to_string())
}

/// [`ArchiveExtractor`] that shells out to the platform's zip tooling.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandExtractor;

impl ArchiveExtractor for CommandExtractor {
    fn extract(&self, archive: &Path, destination: &Path) -> Result<()> {
        fs::create_dir_all(destination)
            .with_context(|| format!("failed to create {}", destination.display()))?;

        if cfg!(windows) {
            let mut command = Command::new("powershell");
            command.arg("-NoProfile").arg("-Command").arg(format!(
                "Expand-Archive -LiteralPath '{}' -DestinationPath '{}' -Force",
                escape_ps_single_quote(archive),
                escape_ps_single_quote(destination)
            ));
            if run_command(
                &mut command,
                "failed to extract zip archive with powershell",
            )
            .is_ok()
            {
                return Ok(());
            }
        }

        let mut unzip_command = Command::new("unzip");
        unzip_command
            .arg("-q")
            .arg("-o")
            .arg(archive)
            .arg("-d")
            .arg(destination);
        if run_command(
            &mut unzip_command,
            "failed to extract zip archive with unzip",
        )
        .is_ok()
        {
            return Ok(());
        }

        run_command(
            Command::new("tar")
                .arg("-xf")
                .arg(archive)
                .arg("-C")
                .arg(destination),
            "failed to extract zip archive with tar fallback",
        )
    }
}

fn run_command(command: &mut Command, context_message: &str) -> Result<()> {
    let output = command
        .output()
        .with_context(|| format!("{context_message}: command failed to start"))?;
    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);
    Err(anyhow!(
        "{context_message}: status={} stdout='{}' stderr='{}'",
        output.status,
        stdout.trim(),
        stderr.trim()
    ))
}

fn escape_ps_single_quote(path: &Path) -> String {
    path.display().to_string().replace('\'', "''")
}
