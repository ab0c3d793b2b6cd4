//! `Link` header pagination
//!
//! Registries truncate large listings and point at the rest with
//! `Link: </v2/_catalog?last=foo&n=100>; rel="next"`. [`Paginator::pages`]
//! follows those links lazily; [`Paginator::cursor`] extracts the cursor
//! value, whose query key differs between registries.

use crate::error::{RegistryError, Result};
use crate::registry::client::{RegistryClient, RegistryRequest};
use bytes::Bytes;
use futures::stream::{self, Stream};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::{HeaderMap, LINK};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use url::Url;

/// Parse a `Link` header into `rel -> url`
pub fn parse_link_header(header: &str) -> BTreeMap<String, String> {
    static LINK_ENTRY: Lazy<Regex> =
        Lazy::new(|| Regex::new(r#"<([^>]*)>[^,<]*?rel="?([^";,\s]+)"?"#).unwrap());

    LINK_ENTRY
        .captures_iter(header)
        .map(|captures| (captures[2].to_string(), captures[1].to_string()))
        .collect()
}

/// URL of the next page, if the response advertises one
pub fn next_link(headers: &HeaderMap) -> Option<String> {
    headers
        .get(LINK)
        .and_then(|v| v.to_str().ok())
        .and_then(|header| parse_link_header(header).remove("next"))
        .filter(|link| !link.is_empty())
}

/// One fetched page of a paginated listing
#[derive(Debug, Clone)]
pub struct Page {
    pub headers: HeaderMap,
    pub body: Bytes,
    pub next: Option<String>,
}

impl Page {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body)
            .map_err(|e| RegistryError::MalformedResponse(format!("invalid page body: {}", e)))
    }
}

pub struct Paginator<'a> {
    client: &'a RegistryClient,
}

impl<'a> Paginator<'a> {
    pub fn new(client: &'a RegistryClient) -> Self {
        Self { client }
    }

    /// Cursor for the next page, read from the `Link` header under this
    /// registry's cursor key. An empty cursor counts as none.
    pub fn cursor(&self, headers: &HeaderMap) -> Option<String> {
        let link = next_link(headers)?;
        let base = self.client.config().base_url();
        let url = Url::parse(&link).or_else(|_| base.join(&link)).ok()?;
        let key = self.client.config().cursor_key();

        url.query_pairs()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.into_owned())
            .filter(|value| !value.is_empty())
    }

    /// Lazily fetch `path` and every page linked from it.
    ///
    /// The stream ends after the first page without a `rel="next"` link or
    /// after the first error.
    pub fn pages(&self, path: &str) -> impl Stream<Item = Result<Page>> + use<'a> {
        let client = self.client;
        stream::try_unfold(Some(path.to_string()), move |next| async move {
            let Some(path) = next else {
                return Ok::<_, RegistryError>(None);
            };

            client.logger().detail(&format!("Fetching page {}", path));
            let response = client.send(RegistryRequest::get(path)).await?;
            let headers = response.headers.clone();
            let body = response.bytes().await?;
            let next = next_link(&headers);

            let page = Page {
                headers,
                body,
                next: next.clone(),
            };
            Ok(Some((page, next)))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegistryConfig;
    use crate::registry::transport::{RegistryTransport, TransportRequest, TransportResponse};
    use async_trait::async_trait;
    use futures::TryStreamExt;
    use reqwest::StatusCode;
    use reqwest::header::HeaderValue;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_parse_link_header() {
        let links = parse_link_header(r#"</v2/_catalog?last=b&n=2>; rel="next", </v2/_catalog?n=2>; rel=first"#);
        assert_eq!(links.get("next").unwrap(), "/v2/_catalog?last=b&n=2");
        assert_eq!(links.get("first").unwrap(), "/v2/_catalog?n=2");
        assert!(parse_link_header("").is_empty());
    }

    fn headers_with_link(link: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(LINK, HeaderValue::from_static(link));
        headers
    }

    fn client_for(uri: &str) -> RegistryClient {
        RegistryClient::builder(RegistryConfig::new(uri).unwrap())
            .build()
            .unwrap()
    }

    #[test]
    fn test_cursor_standard_registry() {
        let client = client_for("https://registry.example.com");
        let paginator = Paginator::new(&client);
        let headers = headers_with_link(r#"</v2/app/tags/list?last=v1.2&n=2>; rel="next""#);
        assert_eq!(paginator.cursor(&headers).as_deref(), Some("v1.2"));
        assert_eq!(paginator.cursor(&HeaderMap::new()), None);
    }

    #[test]
    fn test_cursor_vendor_key() {
        let client = client_for("https://quay.io");
        let paginator = Paginator::new(&client);
        let headers = headers_with_link(r#"</v2/app/tags/list?n=50&next_page=gAAAAAB>; rel="next""#);
        assert_eq!(paginator.cursor(&headers).as_deref(), Some("gAAAAAB"));

        let headers = headers_with_link(r#"</v2/app/tags/list?last=v1>; rel="next""#);
        assert_eq!(paginator.cursor(&headers), None);
    }

    #[test]
    fn test_empty_cursor_is_none() {
        let client = client_for("https://registry.example.com");
        let headers = headers_with_link(r#"</v2/app/tags/list?last=>; rel="next""#);
        assert_eq!(Paginator::new(&client).cursor(&headers), None);
    }

    struct Catalog {
        urls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl RegistryTransport for Catalog {
        async fn execute(&self, request: TransportRequest) -> Result<TransportResponse> {
            self.urls.lock().unwrap().push(request.url.clone());
            let (link, body) = if request.url.contains("last=b") {
                (None, r#"{"repositories": ["c"]}"#)
            } else {
                (
                    Some(r#"</v2/_catalog?last=b&n=2>; rel="next""#),
                    r#"{"repositories": ["a", "b"]}"#,
                )
            };
            let headers = link.map(headers_with_link).unwrap_or_default();
            Ok(TransportResponse::from_bytes(StatusCode::OK, headers, body))
        }
    }

    #[tokio::test]
    async fn test_pages_follow_links() {
        let transport = Arc::new(Catalog {
            urls: Mutex::new(Vec::new()),
        });
        let client = RegistryClient::builder(RegistryConfig::new("https://registry.example.com").unwrap())
            .with_transport(transport.clone())
            .build()
            .unwrap();

        let pages: Vec<Page> = Paginator::new(&client)
            .pages("/v2/_catalog")
            .try_collect()
            .await
            .unwrap();
        assert_eq!(pages.len(), 2);
        assert!(pages[1].next.is_none());

        let second: serde_json::Value = pages[1].json().unwrap();
        assert_eq!(second["repositories"][0], "c");
        assert_eq!(
            *transport.urls.lock().unwrap(),
            vec![
                "https://registry.example.com/v2/_catalog".to_string(),
                "https://registry.example.com/v2/_catalog?last=b&n=2".to_string(),
            ]
        );
    }
}
