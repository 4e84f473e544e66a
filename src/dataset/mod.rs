pub mod archive;
pub mod feed;

use std::{path::Path, time::Duration, time::Instant};

use async_trait::async_trait;
use futures::StreamExt;
use log::info;
use reqwest::{header::CONTENT_TYPE, Client};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::fs::{self, File};
use tokio_util::io::StreamReader;

use crate::{
    config::{DatasetConfig, Settings},
    dates::DateStatus,
    error::{Result, SyncError},
};
use feed::{find_update_date, FeedQuery};

pub const DOWNLOAD_API_BASE_URL: &str = "https://nedlasting.geonorge.no/api";
pub const METADATA_API_URL: &str = "https://kartkatalog.geonorge.no/api/getdata";
pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(1800);
const ATOM_FEED_PROTOCOL: &str = "W3C:AtomFeed";

/// Where the dataset comes from.
#[async_trait]
pub trait DatasetSource: Send + Sync {
    /// Last time the publisher updated the dataset.
    async fn resolve_update_date(&self, dataset: &DatasetConfig) -> Result<DateStatus>;

    /// Place a download order, return the URL of the ordered file.
    async fn place_order(&self, dataset: &DatasetConfig) -> Result<String>;

    async fn download(&self, url: &str, dest: &Path) -> Result<()>;
}

/// Body of a download order for one area, projection and format.
pub fn order_request_body(dataset: &DatasetConfig) -> Value {
    json!({
        "orderLines": [
            {
                "metadataUuid": dataset.metadata_id.to_string(),
                "areas": [
                    {
                        "code": dataset.area_code,
                        "type": dataset.area_type.to_string(),
                    }
                ],
                "projections": [
                    { "code": dataset.epsg }
                ],
                "formats": [
                    { "name": dataset.format.to_string() }
                ]
            }
        ]
    })
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    #[serde(rename = "referenceNumber")]
    reference_number: Value,
    #[serde(default)]
    files: Vec<OrderFile>,
}

#[derive(Debug, Deserialize)]
struct OrderFile {
    #[serde(rename = "fileId")]
    file_id: Value,
}

#[derive(Debug, Deserialize)]
struct Metadata {
    #[serde(rename = "DistributionsFormats", default)]
    distributions: Vec<Distribution>,
}

#[derive(Debug, Deserialize)]
struct Distribution {
    #[serde(rename = "Protocol")]
    protocol: Option<String>,
    #[serde(rename = "FormatName")]
    format_name: Option<String>,
    #[serde(rename = "URL")]
    url: Option<String>,
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Download URL of the first file of an order response.
fn download_url(base_url: &str, response: &OrderResponse) -> Result<String> {
    let file = response.files.first().ok_or_else(|| {
        SyncError::acquisition(
            "Error placing download order",
            "The download order did not contain any files",
        )
    })?;
    Ok(format!(
        "{}/v3/download/order/{}/{}",
        base_url,
        value_to_string(&response.reference_number),
        value_to_string(&file.file_id)
    ))
}

/// Atom feed advertised for the requested format, if any.
fn feed_url(metadata: &Metadata, format: &str) -> Option<String> {
    metadata
        .distributions
        .iter()
        .find(|d| {
            d.protocol.as_deref() == Some(ATOM_FEED_PROTOCOL)
                && d.format_name.as_deref() == Some(format)
        })
        .and_then(|d| d.url.clone())
        .filter(|url| !url.is_empty())
}

/// Geonorge download and metadata APIs.
pub struct GeonorgeClient {
    client: Client,
    credentials: Option<(String, String)>,
    download_base_url: String,
    metadata_url: String,
}

impl GeonorgeClient {
    pub fn new(settings: &Settings) -> Self {
        GeonorgeClient {
            client: Client::new(),
            credentials: settings.api_credentials().ok(),
            download_base_url: DOWNLOAD_API_BASE_URL.to_string(),
            metadata_url: METADATA_API_URL.to_string(),
        }
    }

    fn credentials(&self) -> Result<&(String, String)> {
        self.credentials.as_ref().ok_or_else(|| {
            SyncError::configuration(
                "Environment variables \"API_USERNAME\" and \"API_PASSWORD\" must be set",
            )
        })
    }

    async fn get_text(&self, url: &str, context: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| SyncError::acquisition(context, e))?;
        response
            .text()
            .await
            .map_err(|e| SyncError::acquisition(context, e))
    }
}

#[async_trait]
impl DatasetSource for GeonorgeClient {
    async fn resolve_update_date(&self, dataset: &DatasetConfig) -> Result<DateStatus> {
        let context = "Error fetching dataset metadata";
        let body = self
            .get_text(&format!("{}/{}", self.metadata_url, dataset.metadata_id), context)
            .await?;
        let metadata: Metadata =
            serde_json::from_str(&body).map_err(|e| SyncError::acquisition(context, e))?;

        let Some(url) = feed_url(&metadata, &dataset.format.to_string()) else {
            info!("No Atom feed for format {}", dataset.format);
            return Ok(DateStatus::Unknown);
        };
        let xml = self.get_text(&url, "Error fetching feed").await?;
        let query = FeedQuery {
            area_code: &dataset.area_code,
            area_type: dataset.area_type,
            epsg: &dataset.epsg,
        };
        let updated = find_update_date(&xml, &query);
        info!("Dataset updated: {}", updated);
        Ok(updated)
    }

    async fn place_order(&self, dataset: &DatasetConfig) -> Result<String> {
        let context = "Error placing download order";
        let (username, password) = self.credentials()?;
        let response = self
            .client
            .post(format!("{}/order", self.download_base_url))
            .header(CONTENT_TYPE, "application/json")
            .basic_auth(username, Some(password))
            .body(order_request_body(dataset).to_string())
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| SyncError::acquisition(context, e))?;
        let order: OrderResponse = response
            .json()
            .await
            .map_err(|e| SyncError::acquisition(context, e))?;
        info!("Download order placed");
        download_url(&self.download_base_url, &order)
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<()> {
        let context = "Error downloading file";
        let (username, password) = self.credentials()?;
        let start = Instant::now();
        if let Some(dir) = dest.parent() {
            fs::create_dir_all(dir).await?;
        }

        let response = self
            .client
            .get(url)
            .basic_auth(username, Some(password))
            .timeout(DOWNLOAD_TIMEOUT)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| SyncError::acquisition(context, e))?;
        let size_mb = response.content_length().unwrap_or(0) as f64 / (1024.0 * 1024.0);
        info!("Downloading file ({:.2} MB)...", size_mb);

        let stream = response.bytes_stream();
        let mut reader = StreamReader::new(stream.map(|r| r.map_err(std::io::Error::other)));
        let mut out = File::create(dest).await?;
        tokio::io::copy(&mut reader, &mut out)
            .await
            .map_err(|e| SyncError::acquisition(context, e))?;

        info!(
            "File downloaded from \"{}\" in {:.2} sec.",
            url,
            start.elapsed().as_secs_f64()
        );
        Ok(())
    }
}
