//! Release registry access.
//!
//! Fetches "latest release" metadata and downloads individual assets. The
//! [`ReleaseRegistry`] trait keeps the resolver testable without a network;
//! [`GithubRegistry`] is the production implementation and [`MockRegistry`]
//! serves fabricated releases in tests.

use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info};

use crate::board::LATEST_RELEASE_URL;
use crate::error::UpdateError;

/// One downloadable file attached to a release.
#[derive(Debug, Clone, Deserialize)]
pub struct ReleaseAsset {
    pub name: String,
    #[serde(rename = "browser_download_url")]
    pub download_url: String,
    pub size: Option<u64>,
}

/// Latest-release metadata: a tag and its assets, in listed order.
#[derive(Debug, Clone, Deserialize)]
pub struct Release {
    #[serde(rename = "tag_name")]
    pub tag: String,
    #[serde(default)]
    pub assets: Vec<ReleaseAsset>,
}

/// Abstract release registry.
pub trait ReleaseRegistry: Send + Sync {
    /// Fetch metadata for the latest release.
    fn latest(&self) -> Result<Release, UpdateError>;

    /// Download one asset's content verbatim into `dest`.
    fn download(&self, asset: &ReleaseAsset, dest: &Path) -> Result<(), UpdateError>;
}

/// Explicit registry configuration; nothing is read from the environment
/// inside this module.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Latest-release metadata endpoint.
    pub api_url: String,
    /// Optional bearer token to raise GitHub's rate limits.
    pub token: Option<String>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            api_url: LATEST_RELEASE_URL.to_string(),
            token: None,
        }
    }
}

/// GitHub-backed registry using a blocking HTTP client.
pub struct GithubRegistry {
    client: reqwest::blocking::Client,
    config: RegistryConfig,
}

impl GithubRegistry {
    pub fn new(config: RegistryConfig) -> Result<Self, UpdateError> {
        // GitHub rejects requests without a User-Agent.
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("blup/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { client, config })
    }

    fn get(&self, url: &str, timeout: Duration) -> reqwest::blocking::RequestBuilder {
        let mut req = self
            .client
            .get(url)
            .header("Accept", "application/vnd.github+json")
            .timeout(timeout);
        if let Some(token) = &self.config.token {
            req = req.bearer_auth(token);
        }
        req
    }
}

impl ReleaseRegistry for GithubRegistry {
    fn latest(&self) -> Result<Release, UpdateError> {
        info!(url = %self.config.api_url, "Fetching latest release metadata");
        let release: Release = self
            .get(&self.config.api_url, Duration::from_secs(30))
            .send()?
            .error_for_status()?
            .json()?;
        debug!(tag = %release.tag, assets = release.assets.len(), "Release metadata fetched");
        Ok(release)
    }

    fn download(&self, asset: &ReleaseAsset, dest: &Path) -> Result<(), UpdateError> {
        info!(asset = %asset.name, "Downloading");
        let mut resp = self
            .get(&asset.download_url, Duration::from_secs(120))
            .send()?
            .error_for_status()?;
        let mut file = File::create(dest).map_err(|source| UpdateError::Download {
            name: asset.name.clone(),
            source,
        })?;
        let written = resp.copy_to(&mut file)?;
        file.flush().map_err(|source| UpdateError::Download {
            name: asset.name.clone(),
            source,
        })?;
        info!(
            asset = %asset.name,
            kib = %format!("{:.1}", written as f64 / 1024.0),
            "Downloaded"
        );
        Ok(())
    }
}

/// Mock registry serving a fabricated release, for unit tests.
///
/// Counts calls so tests can assert "no network activity happened".
pub struct MockRegistry {
    release: Release,
    /// Bytes written by `download` regardless of asset.
    payload: Vec<u8>,
    latest_calls: Mutex<u32>,
    download_calls: Mutex<u32>,
}

impl MockRegistry {
    pub fn new(release: Release) -> Self {
        Self {
            release,
            payload: b"uf2-payload".to_vec(),
            latest_calls: Mutex::new(0),
            download_calls: Mutex::new(0),
        }
    }

    /// Build a release from `(tag, asset names)`; download URLs are synthetic.
    pub fn with_assets(tag: &str, names: &[&str]) -> Self {
        let assets = names
            .iter()
            .map(|name| ReleaseAsset {
                name: (*name).to_string(),
                download_url: format!("mock://assets/{name}"),
                size: Some(1024),
            })
            .collect();
        Self::new(Release {
            tag: tag.to_string(),
            assets,
        })
    }

    pub fn latest_calls(&self) -> u32 {
        *self.latest_calls.lock().unwrap()
    }

    pub fn download_calls(&self) -> u32 {
        *self.download_calls.lock().unwrap()
    }
}

impl ReleaseRegistry for MockRegistry {
    fn latest(&self) -> Result<Release, UpdateError> {
        *self.latest_calls.lock().unwrap() += 1;
        Ok(self.release.clone())
    }

    fn download(&self, asset: &ReleaseAsset, dest: &Path) -> Result<(), UpdateError> {
        *self.download_calls.lock().unwrap() += 1;
        std::fs::write(dest, &self.payload).map_err(|source| UpdateError::Download {
            name: asset.name.clone(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_release_metadata_parses() {
        let json = r#"{
            "tag_name": "0.9.2",
            "assets": [
                {
                    "name": "update-xiao_nrf52840_ble_sense_bootloader-0.9.2_nosd.uf2",
                    "browser_download_url": "https://example.invalid/a.uf2",
                    "size": 40960
                },
                {
                    "name": "xiao_nrf52840_ble_sense_bootloader-0.9.2.zip",
                    "browser_download_url": "https://example.invalid/a.zip"
                }
            ]
        }"#;
        let release: Release = serde_json::from_str(json).unwrap();
        assert_eq!(release.tag, "0.9.2");
        assert_eq!(release.assets.len(), 2);
        assert_eq!(release.assets[0].size, Some(40960));
        assert_eq!(release.assets[1].size, None);
    }

    #[test]
    fn test_release_without_assets_parses() {
        let release: Release = serde_json::from_str(r#"{"tag_name": "0.9.2"}"#).unwrap();
        assert!(release.assets.is_empty());
    }

    #[test]
    fn test_mock_counts_calls() {
        let mock = MockRegistry::with_assets("0.9.2", &["a.zip"]);
        assert_eq!(mock.latest_calls(), 0);
        mock.latest().unwrap();
        mock.latest().unwrap();
        assert_eq!(mock.latest_calls(), 2);
        assert_eq!(mock.download_calls(), 0);
    }
}
