//! HTTP transport abstraction.
//!
//! [`HttpClient`] is the seam between the caching source and the network so
//! tests can inject scripted clients. [`ReqwestClient`] is the real thing.

use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use futures::future::BoxFuture;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::StatusCode;
use tracing::trace;

use super::FetchError;

/// Default transfer timeout.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Upper bound applied to `max-age` (one year).
const MAX_AGE_CAP_SECS: i64 = 365 * 24 * 60 * 60;

const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Conditional request headers derived from a cached record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Validators {
    pub etag: Option<String>,
    pub modified: Option<DateTime<Utc>>,
}

impl Validators {
    /// True when at least one validator is present.
    pub fn is_usable(&self) -> bool {
        self.etag.is_some() || self.modified.is_some()
    }
}

/// Caching metadata of an HTTP response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Freshness {
    pub expires: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
    pub etag: Option<String>,
}

impl Freshness {
    /// Extracts freshness from response headers.
    ///
    /// `Cache-Control: max-age` wins over `Expires`. `no-cache` and
    /// `no-store` yield no expiry, so the record is treated as stale.
    pub fn from_headers(headers: &HeaderMap, now: DateTime<Utc>) -> Self {
        let expires = match cache_control(headers) {
            CacheControl::Uncacheable => None,
            CacheControl::MaxAge(secs) => {
                let secs = i64::try_from(secs).unwrap_or(MAX_AGE_CAP_SECS).min(MAX_AGE_CAP_SECS);
                now.checked_add_signed(chrono::Duration::seconds(secs))
            }
            CacheControl::Unspecified => header_date(headers, header::EXPIRES),
        };

        Self {
            expires,
            modified: header_date(headers, header::LAST_MODIFIED),
            etag: headers
                .get(header::ETAG)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
        }
    }
}

enum CacheControl {
    Unspecified,
    Uncacheable,
    MaxAge(u64),
}

fn cache_control(headers: &HeaderMap) -> CacheControl {
    let Some(value) = headers.get(header::CACHE_CONTROL).and_then(|v| v.to_str().ok()) else {
        return CacheControl::Unspecified;
    };

    let mut result = CacheControl::Unspecified;
    for directive in value.split(',').map(str::trim) {
        let lower = directive.to_ascii_lowercase();
        if lower == "no-cache" || lower == "no-store" {
            return CacheControl::Uncacheable;
        }
        if let Some(secs) = lower.strip_prefix("max-age=") {
            if let Ok(secs) = secs.trim_matches('"').parse::<u64>() {
                result = CacheControl::MaxAge(secs);
            }
        }
    }
    result
}

fn header_date(headers: &HeaderMap, name: header::HeaderName) -> Option<DateTime<Utc>> {
    let raw = headers.get(name)?.to_str().ok()?;
    parse_http_date(raw)
}

/// Parses an IMF-fixdate (`Sun, 06 Nov 1994 08:49:37 GMT`).
pub fn parse_http_date(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(raw.trim())
        .ok()
        .map(|d| d.with_timezone(&Utc))
        .or_else(|| {
            chrono::NaiveDateTime::parse_from_str(raw.trim(), HTTP_DATE_FORMAT)
                .ok()
                .map(|naive| Utc.from_utc_datetime(&naive))
        })
}

/// Formats a timestamp for `If-Modified-Since`.
pub fn format_http_date(date: DateTime<Utc>) -> String {
    date.format(HTTP_DATE_FORMAT).to_string()
}

/// Outcome of a successful HTTP exchange.
#[derive(Debug, Clone, PartialEq)]
pub enum HttpResponse {
    /// 2xx with a body.
    Fresh { data: Bytes, freshness: Freshness },
    /// 304: the cached copy is still valid.
    NotModified { freshness: Freshness },
}

/// Async HTTP GET abstraction.
pub trait HttpClient: Send + Sync {
    /// Fetches `url`, sending conditional headers when `validators` is given.
    fn get<'a>(
        &'a self,
        url: &'a str,
        validators: Option<&'a Validators>,
    ) -> BoxFuture<'a, Result<HttpResponse, FetchError>>;
}

/// Maps a non-success status to the error the caller sees.
pub fn status_error(url: &str, status: StatusCode) -> FetchError {
    match status {
        StatusCode::NOT_FOUND | StatusCode::GONE => FetchError::NotFound {
            url: url.to_string(),
        },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => FetchError::AccessDenied {
            url: url.to_string(),
        },
        other => FetchError::Status {
            url: url.to_string(),
            status: other.as_u16(),
        },
    }
}

/// Real HTTP client implementation using reqwest.
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    /// Creates a client with the default timeout.
    pub fn new() -> Result<Self, FetchError> {
        Self::with_timeout(DEFAULT_TIMEOUT_SECS)
    }

    /// Creates a client with a custom timeout.
    pub fn with_timeout(timeout_secs: u64) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(concat!("tilestream/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchError::Network {
                url: String::new(),
                reason: format!("failed to create HTTP client: {}", e),
            })?;

        Ok(Self { client })
    }

    async fn fetch(&self, url: &str, validators: Option<&Validators>) -> Result<HttpResponse, FetchError> {
        let network = |e: reqwest::Error| FetchError::Network {
            url: url.to_string(),
            reason: e.to_string(),
        };

        let mut request = self.client.get(url);
        if let Some(validators) = validators {
            if let Some(etag) = validators.etag.as_deref() {
                if let Ok(value) = HeaderValue::from_str(etag) {
                    request = request.header(header::IF_NONE_MATCH, value);
                }
            }
            if let Some(modified) = validators.modified {
                request = request.header(header::IF_MODIFIED_SINCE, format_http_date(modified));
            }
        }

        let response = request.send().await.map_err(network)?;
        let status = response.status();
        let freshness = Freshness::from_headers(response.headers(), Utc::now());
        trace!(url = %url, status = status.as_u16(), "HTTP response");

        if status == StatusCode::NOT_MODIFIED {
            return Ok(HttpResponse::NotModified { freshness });
        }
        if !status.is_success() {
            return Err(status_error(url, status));
        }

        let data = response.bytes().await.map_err(network)?;
        Ok(HttpResponse::Fresh { data, freshness })
    }
}

impl HttpClient for ReqwestClient {
    fn get<'a>(
        &'a self,
        url: &'a str,
        validators: Option<&'a Validators>,
    ) -> BoxFuture<'a, Result<HttpResponse, FetchError>> {
        Box::pin(self.fetch(url, validators))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(header::HeaderName, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(name.clone(), HeaderValue::from_str(value).unwrap());
        }
        map
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_max_age_sets_expiry() {
        let map = headers(&[(header::CACHE_CONTROL, "public, max-age=3600")]);
        let freshness = Freshness::from_headers(&map, now());
        assert_eq!(freshness.expires, Some(now() + chrono::Duration::hours(1)));
    }

    #[test]
    fn test_max_age_overrides_expires() {
        let map = headers(&[
            (header::CACHE_CONTROL, "max-age=60"),
            (header::EXPIRES, "Fri, 01 Mar 2030 12:00:00 GMT"),
        ]);
        let freshness = Freshness::from_headers(&map, now());
        assert_eq!(freshness.expires, Some(now() + chrono::Duration::seconds(60)));
    }

    #[test]
    fn test_expires_header_parsed() {
        let map = headers(&[(header::EXPIRES, "Fri, 01 Mar 2024 13:00:00 GMT")]);
        let freshness = Freshness::from_headers(&map, now());
        assert_eq!(freshness.expires, Some(now() + chrono::Duration::hours(1)));
    }

    #[test]
    fn test_no_cache_has_no_expiry() {
        let map = headers(&[
            (header::CACHE_CONTROL, "no-cache, max-age=600"),
            (header::ETAG, "\"abc\""),
        ]);
        let freshness = Freshness::from_headers(&map, now());
        assert_eq!(freshness.expires, None);
        assert_eq!(freshness.etag.as_deref(), Some("\"abc\""));
    }

    #[test]
    fn test_last_modified_parsed() {
        let map = headers(&[(header::LAST_MODIFIED, "Sun, 06 Nov 1994 08:49:37 GMT")]);
        let freshness = Freshness::from_headers(&map, now());
        assert_eq!(
            freshness.modified,
            Some(Utc.with_ymd_and_hms(1994, 11, 6, 8, 49, 37).unwrap())
        );
    }

    #[test]
    fn test_garbage_dates_ignored() {
        let map = headers(&[(header::EXPIRES, "0"), (header::LAST_MODIFIED, "yesterday")]);
        let freshness = Freshness::from_headers(&map, now());
        assert_eq!(freshness, Freshness::default());
    }

    #[test]
    fn test_http_date_round_trip() {
        let date = Utc.with_ymd_and_hms(2015, 10, 21, 7, 28, 0).unwrap();
        let formatted = format_http_date(date);
        assert_eq!(formatted, "Wed, 21 Oct 2015 07:28:00 GMT");
        assert_eq!(parse_http_date(&formatted), Some(date));
    }

    #[test]
    fn test_status_mapping() {
        let url = "http://example.com/t";
        assert!(matches!(
            status_error(url, StatusCode::NOT_FOUND),
            FetchError::NotFound { .. }
        ));
        assert!(matches!(
            status_error(url, StatusCode::FORBIDDEN),
            FetchError::AccessDenied { .. }
        ));
        assert_eq!(
            status_error(url, StatusCode::BAD_GATEWAY),
            FetchError::Status {
                url: url.to_string(),
                status: 502
            }
        );
    }

    #[test]
    fn test_validators_usable() {
        assert!(!Validators::default().is_usable());
        assert!(Validators {
            etag: Some("x".into()),
            modified: None
        }
        .is_usable());
    }
}
