//! HTTP client for the scan event API.
//!
//! Fetches pages from `GET /v1/scans/scanevents` and maps each record to a
//! [`ScanEvent`]. Records that fail validation are dropped one by one so a
//! single bad row never fails the page.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDateTime};
use serde::Deserialize;
use tracing::{debug, warn};

use super::config::SourceConfig;
use super::error::SourceError;
use super::EventSource;
use crate::events::{EntityId, EventId, ScanEvent, ScanType};

/// Longest backoff exponent for timed-out requests (100ms << 10, about 102s).
const MAX_BACKOFF_EXPONENT: u32 = 10;

/// Delay before retrying a timed-out request.
fn timeout_backoff(retry_count: u32) -> Duration {
    Duration::from_millis(100u64 << retry_count.min(MAX_BACKOFF_EXPONENT))
}

/// Page returned by the scan event API.
#[derive(Debug, Deserialize)]
struct ScanEventsResponse {
    /// Raw records, validated individually.
    #[serde(rename = "ScanEvents")]
    scan_events: Vec<serde_json::Value>,
}

/// A scan event record as sent by the API.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ScanEventDto {
    /// Event id.
    #[serde(default)]
    pub event_id: i64,
    /// Entity id, named after parcels on the wire.
    #[serde(rename = "ParcelId", default)]
    pub entity_id: i64,
    /// Classification.
    #[serde(rename = "Type", default)]
    pub scan_type: Option<String>,
    /// Scan timestamp. Values without an offset are read as UTC.
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub created_date_time_utc: Option<DateTime<FixedOffset>>,
    /// Status code.
    #[serde(default)]
    pub status_code: Option<String>,
    /// User block carrying the run id.
    #[serde(default)]
    pub user: Option<UserDto>,
}

/// User block of a scan event record.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UserDto {
    /// Run id.
    #[serde(default)]
    pub run_id: Option<String>,
}

fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<FixedOffset>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let Some(raw) = Option::<String>::deserialize(deserializer)? else {
        return Ok(None);
    };
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }

    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(Some(ts));
    }

    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| Some(naive.and_utc().fixed_offset()))
        .map_err(serde::de::Error::custom)
}

/// Maps an API record to a domain event.
///
/// # Errors
///
/// Returns [`SourceError::InvalidRecord`] if the id, entity, type, or
/// timestamp is missing or invalid.
pub fn map_to_domain(dto: ScanEventDto) -> Result<ScanEvent, SourceError> {
    if dto.event_id <= 0 {
        return Err(SourceError::InvalidRecord(format!(
            "Invalid EventId: {}",
            dto.event_id
        )));
    }

    if dto.entity_id <= 0 {
        return Err(SourceError::InvalidRecord(format!(
            "Invalid ParcelId: {}",
            dto.entity_id
        )));
    }

    let scan_type = match dto.scan_type.as_deref().map(str::trim) {
        Some(t) if !t.is_empty() => ScanType::parse(t),
        _ => {
            return Err(SourceError::InvalidRecord(format!(
                "Missing Type for EventId {}",
                dto.event_id
            )))
        }
    };

    let Some(occurred_at) = dto.created_date_time_utc else {
        return Err(SourceError::InvalidRecord(format!(
            "Missing CreatedDateTimeUtc for EventId {}",
            dto.event_id
        )));
    };

    Ok(ScanEvent {
        event_id: EventId(dto.event_id),
        entity_id: EntityId(dto.entity_id),
        scan_type,
        occurred_at,
        status_code: dto.status_code.unwrap_or_default(),
        run_id: dto.user.and_then(|u| u.run_id).unwrap_or_default(),
    })
}

/// Parses a response page, dropping malformed records.
///
/// # Errors
///
/// Returns an error only if the page itself is not valid JSON.
pub fn parse_page(body: &str) -> Result<Vec<ScanEvent>, SourceError> {
    let response: ScanEventsResponse =
        serde_json::from_str(body).map_err(|e| SourceError::Deserialization(e.to_string()))?;

    let mut events = Vec::with_capacity(response.scan_events.len());
    for raw in response.scan_events {
        let mapped = serde_json::from_value::<ScanEventDto>(raw)
            .map_err(|e| SourceError::InvalidRecord(e.to_string()))
            .and_then(map_to_domain);

        match mapped {
            Ok(event) => events.push(event),
            Err(e) => warn!(error = %e, "Dropping malformed scan event"),
        }
    }

    Ok(events)
}

/// HTTP client for the scan event API.
#[derive(Debug, Clone)]
pub struct ScanEventClient {
    config: SourceConfig,
    http: reqwest::Client,
}

impl ScanEventClient {
    /// Creates a new client.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the HTTP client
    /// cannot be created.
    pub fn new(config: SourceConfig) -> Result<Self, SourceError> {
        config.validate()?;

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(SourceError::Request)?;

        Ok(Self { config, http })
    }

    /// Returns the client configuration.
    #[must_use]
    pub fn config(&self) -> &SourceConfig {
        &self.config
    }

    /// Builds the page URL for a cursor and limit.
    #[must_use]
    pub fn page_url(&self, after: EventId, limit: usize) -> String {
        format!(
            "{}/v1/scans/scanevents?FromEventId={}&Limit={}",
            self.config.base(),
            after,
            limit
        )
    }

    /// Makes a GET request, retrying timeouts and rate limiting.
    async fn get_with_retry(&self, url: &str) -> Result<String, SourceError> {
        let mut retry_count: u32 = 0;

        loop {
            match self.http.get(url).send().await {
                Ok(resp) => {
                    let status = resp.status();

                    if status.is_success() {
                        return resp
                            .text()
                            .await
                            .map_err(|e| SourceError::Deserialization(e.to_string()));
                    }

                    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                        let retry_after = resp
                            .headers()
                            .get("Retry-After")
                            .and_then(|v| v.to_str().ok())
                            .and_then(|s| s.parse().ok());

                        if retry_count < self.config.max_retries {
                            retry_count += 1;
                            let wait = retry_after.unwrap_or(1);
                            debug!(retry_count, wait_secs = wait, "Scan API rate limited, retrying");
                            tokio::time::sleep(Duration::from_secs(wait)).await;
                            continue;
                        }

                        return Err(SourceError::RateLimited { retry_after });
                    }

                    let message = resp.text().await.unwrap_or_default();
                    return Err(SourceError::Api {
                        status: status.as_u16(),
                        message,
                    });
                }
                Err(e) => {
                    if e.is_timeout() && retry_count < self.config.max_retries {
                        retry_count += 1;
                        debug!(retry_count, "Scan API request timed out, retrying");
                        tokio::time::sleep(timeout_backoff(retry_count)).await;
                        continue;
                    }
                    return Err(SourceError::from(e));
                }
            }
        }
    }
}

#[async_trait]
impl EventSource for ScanEventClient {
    async fn fetch(&self, after: EventId, limit: usize) -> Result<Vec<ScanEvent>, SourceError> {
        let url = self.page_url(after, limit);
        let body = self.get_with_retry(&url).await?;
        parse_page(&body)
    }
}
