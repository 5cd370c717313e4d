//! HTTP client for the Copernicus token and Process API endpoints.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use sat_common::{
    AreaOfInterest, ImageryProvider, ProviderError, Raster, SatError, SatResult, SceneRequest,
};

use crate::evalscript::build_evalscript;

const DEFAULT_TOKEN_URL: &str =
    "https://identity.dataspace.copernicus.eu/auth/realms/CDSE/protocol/openid-connect/token";
const DEFAULT_PROCESS_URL: &str = "https://sh.dataspace.copernicus.eu/api/v1/process";
const CRS_4326: &str = "http://www.opengis.net/def/crs/EPSG/0/4326";

/// Client configuration. Credentials come from the environment in normal
/// operation; tests construct configs directly against stub URLs.
#[derive(Debug, Clone)]
pub struct SentinelConfig {
    pub client_id: String,
    pub client_secret: String,
    pub token_url: String,
    pub process_url: String,
    /// Timeout for imagery requests.
    pub request_timeout: Duration,
    /// Timeout for token acquisition.
    pub token_timeout: Duration,
}

impl SentinelConfig {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            token_url: DEFAULT_TOKEN_URL.to_string(),
            process_url: DEFAULT_PROCESS_URL.to_string(),
            request_timeout: Duration::from_secs(120),
            token_timeout: Duration::from_secs(30),
        }
    }

    /// Load credentials from `COPERNICUS_CLIENT_ID` / `COPERNICUS_CLIENT_SECRET`.
    ///
    /// Missing credentials are a fatal configuration error for any request
    /// that would need them; no retry can fix this.
    pub fn from_env() -> SatResult<Self> {
        let client_id = std::env::var("COPERNICUS_CLIENT_ID")
            .map_err(|_| SatError::MissingCredentials("COPERNICUS_CLIENT_ID".to_string()))?;
        let client_secret = std::env::var("COPERNICUS_CLIENT_SECRET")
            .map_err(|_| SatError::MissingCredentials("COPERNICUS_CLIENT_SECRET".to_string()))?;
        Ok(Self::new(client_id, client_secret))
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

// === Process API request payload ===

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProcessPayload {
    input: ProcessInput,
    output: ProcessOutput,
    processing: Processing,
    evalscript: String,
}

#[derive(Debug, Serialize)]
struct ProcessInput {
    bounds: ProcessBounds,
    data: Vec<DataSpec>,
}

#[derive(Debug, Serialize)]
struct ProcessBounds {
    #[serde(skip_serializing_if = "Option::is_none")]
    bbox: Option<[f64; 4]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    geometry: Option<GeoJsonPolygon>,
    properties: BoundsProperties,
}

#[derive(Debug, Serialize)]
struct GeoJsonPolygon {
    #[serde(rename = "type")]
    kind: &'static str,
    coordinates: Vec<Vec<[f64; 2]>>,
}

#[derive(Debug, Serialize)]
struct BoundsProperties {
    crs: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DataSpec {
    #[serde(rename = "type")]
    kind: &'static str,
    data_filter: DataFilter,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DataFilter {
    time_range: TimeRange,
    max_cloud_coverage: f64,
    mosaicking_order: &'static str,
}

#[derive(Debug, Serialize)]
struct TimeRange {
    from: String,
    to: String,
}

#[derive(Debug, Serialize)]
struct ProcessOutput {
    width: u32,
    height: u32,
    responses: Vec<ResponseSpec>,
}

#[derive(Debug, Serialize)]
struct ResponseSpec {
    identifier: &'static str,
    format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize)]
struct Processing {
    upsampling: &'static str,
    downsampling: &'static str,
}

/// Reqwest-backed Copernicus client. Performs no retries: the acquisition
/// layer owns the single shared retry policy.
pub struct SentinelClient {
    http: reqwest::Client,
    config: SentinelConfig,
}

impl SentinelClient {
    pub fn new(config: SentinelConfig) -> SatResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| SatError::Internal(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { http, config })
    }

    /// OAuth2 client-credentials grant; returns an opaque bearer token.
    pub async fn fetch_token(&self) -> SatResult<String> {
        let response = self
            .http
            .post(&self.config.token_url)
            .timeout(self.config.token_timeout)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
            ])
            .send()
            .await
            .map_err(|e| SatError::Provider {
                status: None,
                message: format!("token request failed: {}", e),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = truncated_body(response).await;
            return Err(SatError::Provider {
                status: Some(status.as_u16()),
                message: format!("token endpoint rejected request: {}", body),
            });
        }

        let token: TokenResponse = response.json().await.map_err(|e| SatError::Provider {
            status: None,
            message: format!("malformed token response: {}", e),
        })?;
        Ok(token.access_token)
    }

    fn build_payload(&self, request: &SceneRequest) -> Result<ProcessPayload, ProviderError> {
        let bounds = match &request.aoi {
            AreaOfInterest::BBox(bbox) => ProcessBounds {
                bbox: Some(bbox.as_array()),
                geometry: None,
                properties: BoundsProperties { crs: CRS_4326 },
            },
            aoi => {
                let ring = aoi
                    .normalized_ring()
                    .map_err(|e| ProviderError::Decode(format!("unusable geometry: {}", e)))?;
                ProcessBounds {
                    bbox: None,
                    geometry: Some(GeoJsonPolygon {
                        kind: "Polygon",
                        coordinates: vec![ring],
                    }),
                    properties: BoundsProperties { crs: CRS_4326 },
                }
            }
        };

        Ok(ProcessPayload {
            input: ProcessInput {
                bounds,
                data: vec![DataSpec {
                    kind: "sentinel-2-l2a",
                    data_filter: DataFilter {
                        time_range: TimeRange {
                            from: format!("{}T00:00:00Z", request.window.start_iso()),
                            to: format!("{}T23:59:59Z", request.window.end_iso()),
                        },
                        max_cloud_coverage: request.max_cloud_coverage,
                        mosaicking_order: request.mosaicking_order.wire_name(),
                    },
                }],
            },
            output: ProcessOutput {
                width: request.width,
                height: request.height,
                responses: vec![ResponseSpec {
                    identifier: "default",
                    format: ResponseFormat {
                        kind: "application/octet-stream",
                    },
                }],
            },
            processing: Processing {
                upsampling: "BILINEAR",
                downsampling: "BILINEAR",
            },
            evalscript: build_evalscript(request.index, request.masked, request.include_water),
        })
    }
}

#[async_trait]
impl ImageryProvider for SentinelClient {
    async fn fetch_scene(
        &self,
        token: &str,
        request: &SceneRequest,
    ) -> Result<Raster, ProviderError> {
        let payload = self.build_payload(request)?;

        debug!(
            window = %request.window,
            index = %request.index,
            width = request.width,
            height = request.height,
            max_cloud = request.max_cloud_coverage,
            "Requesting composite"
        );

        let response = self
            .http
            .post(&self.config.process_url)
            .bearer_auth(token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = parse_retry_after_ms(
                response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok()),
            );
            warn!(retry_after = ?retry_after, "Process API rate limit hit");
            return Err(ProviderError::RateLimited { retry_after });
        }
        if !status.is_success() {
            let message = truncated_body(response).await;
            return Err(ProviderError::Http {
                status: status.as_u16(),
                message,
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| ProviderError::Network(format!("body read failed: {}", e)))?;
        decode_raster(&body, request.width, request.height)
    }
}

/// Parse a `Retry-After` header value. The provider sends milliseconds;
/// anything non-numeric is ignored and the caller falls back to its own
/// backoff schedule.
fn parse_retry_after_ms(value: Option<&str>) -> Option<Duration> {
    value
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_millis)
}

/// Decode a single-band little-endian float32 body into a raster.
fn decode_raster(body: &[u8], width: u32, height: u32) -> Result<Raster, ProviderError> {
    let expected = width as usize * height as usize * 4;
    if body.len() != expected {
        return Err(ProviderError::Decode(format!(
            "expected {} bytes for {}x{} float32, got {}",
            expected,
            width,
            height,
            body.len()
        )));
    }
    let data = body
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    Ok(Raster::new(width as usize, height as usize, data))
}

async fn truncated_body(response: reqwest::Response) -> String {
    let mut body = response.text().await.unwrap_or_default();
    body.truncate(500);
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use sat_common::{BoundingBox, DateWindow, MosaickingOrder, VegetationIndex};

    fn sample_request() -> SceneRequest {
        let mut request = SceneRequest::new(
            AreaOfInterest::BBox(BoundingBox::new(-4.5, 37.2, -4.4, 37.3)),
            DateWindow::from_iso("2024-06-01", "2024-06-10").unwrap(),
            VegetationIndex::Ndvi,
            512,
            384,
        );
        request.max_cloud_coverage = 95.0;
        request.mosaicking_order = MosaickingOrder::MostRecent;
        request
    }

    fn test_client() -> SentinelClient {
        SentinelClient::new(SentinelConfig::new("id", "secret")).unwrap()
    }

    #[test]
    fn test_payload_bbox_request() {
        let payload = test_client().build_payload(&sample_request()).unwrap();
        let json = serde_json::to_value(&payload).unwrap();

        assert_eq!(json["input"]["bounds"]["bbox"][0], -4.5);
        assert!(json["input"]["bounds"].get("geometry").is_none());
        assert_eq!(json["input"]["data"][0]["type"], "sentinel-2-l2a");
        let filter = &json["input"]["data"][0]["dataFilter"];
        assert_eq!(filter["timeRange"]["from"], "2024-06-01T00:00:00Z");
        assert_eq!(filter["timeRange"]["to"], "2024-06-10T23:59:59Z");
        assert_eq!(filter["maxCloudCoverage"], 95.0);
        assert_eq!(filter["mosaickingOrder"], "mostRecent");
        assert_eq!(json["output"]["width"], 512);
        assert_eq!(json["output"]["height"], 384);
    }

    #[test]
    fn test_payload_polygon_request() {
        let mut request = sample_request();
        request.aoi = AreaOfInterest::Polygon(vec![
            [-4.5, 37.2],
            [-4.4, 37.2],
            [-4.4, 37.3],
            [-4.5, 37.3],
        ]);
        let payload = test_client().build_payload(&request).unwrap();
        let json = serde_json::to_value(&payload).unwrap();

        assert!(json["input"]["bounds"].get("bbox").is_none());
        assert_eq!(json["input"]["bounds"]["geometry"]["type"], "Polygon");
        // Normalization closes the ring.
        let ring = json["input"]["bounds"]["geometry"]["coordinates"][0]
            .as_array()
            .unwrap();
        assert_eq!(ring.len(), 5);
        assert_eq!(ring[0], ring[4]);
    }

    #[test]
    fn test_parse_retry_after_milliseconds() {
        assert_eq!(
            parse_retry_after_ms(Some("1500")),
            Some(Duration::from_millis(1500))
        );
        assert_eq!(parse_retry_after_ms(Some(" 200 ")), Some(Duration::from_millis(200)));
        assert_eq!(parse_retry_after_ms(Some("soon")), None);
        assert_eq!(parse_retry_after_ms(None), None);
    }

    #[test]
    fn test_decode_raster_roundtrip() {
        let pixels = [0.5f32, f32::NAN, -0.25, 1.0, 0.0, 0.75];
        let body: Vec<u8> = pixels.iter().flat_map(|v| v.to_le_bytes()).collect();
        let raster = decode_raster(&body, 3, 2).unwrap();
        assert_eq!(raster.width(), 3);
        assert_eq!(raster.height(), 2);
        assert_eq!(raster.finite_count(), 5);
    }

    #[test]
    fn test_decode_raster_rejects_short_body() {
        assert!(decode_raster(&[0u8; 10], 3, 2).is_err());
    }
}
