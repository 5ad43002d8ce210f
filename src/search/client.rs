//! Client for the remote image-search HTTP API.

use crate::error::{DiscimError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://www.googleapis.com/customsearch/v1";

/// Image type filter. Only these values are recognized by the service;
/// anything else is suppressed rather than forwarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageType {
    Clipart,
    Face,
    Lineart,
    News,
    Photo,
}

impl ImageType {
    /// Parses a filter value, returning `None` for unrecognized input.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "clipart" => Some(Self::Clipart),
            "face" => Some(Self::Face),
            "lineart" => Some(Self::Lineart),
            "news" => Some(Self::News),
            "photo" => Some(Self::Photo),
            _ => None,
        }
    }

    fn as_param(self) -> &'static str {
        match self {
            Self::Clipart => "clipart",
            Self::Face => "face",
            Self::Lineart => "lineart",
            Self::News => "news",
            Self::Photo => "photo",
        }
    }
}

/// Image size filter. Same suppression rule as [`ImageType`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSize {
    Huge,
    Icon,
    Large,
    Medium,
    Small,
    XLarge,
    XxLarge,
}

impl ImageSize {
    /// Parses a filter value, returning `None` for unrecognized input.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "huge" => Some(Self::Huge),
            "icon" => Some(Self::Icon),
            "large" => Some(Self::Large),
            "medium" => Some(Self::Medium),
            "small" => Some(Self::Small),
            "xlarge" => Some(Self::XLarge),
            "xxlarge" => Some(Self::XxLarge),
            _ => None,
        }
    }

    fn as_param(self) -> &'static str {
        match self {
            Self::Huge => "huge",
            Self::Icon => "icon",
            Self::Large => "large",
            Self::Medium => "medium",
            Self::Small => "small",
            Self::XLarge => "xlarge",
            Self::XxLarge => "xxlarge",
        }
    }
}

/// Optional search filters.
#[derive(Debug, Clone, Copy, Default)]
pub struct SearchFilters {
    pub image_type: Option<ImageType>,
    pub image_size: Option<ImageSize>,
}

impl SearchFilters {
    /// Builds filters from raw strings, suppressing unrecognized values.
    pub fn from_values(image_type: &str, image_size: &str) -> Self {
        Self {
            image_type: ImageType::parse(image_type),
            image_size: ImageSize::parse(image_size),
        }
    }
}

/// Thumbnail and sizing metadata of a search result.
#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ImageMeta {
    pub byte_size: i64,
    pub context_link: String,
    pub height: u32,
    pub width: u32,
    pub thumbnail_link: String,
    pub thumbnail_height: u32,
    pub thumbnail_width: u32,
}

/// One image search result. Only `link` is load-bearing downstream.
#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ImageResult {
    pub link: String,
    pub mime: String,
    pub display_link: String,
    pub image: Option<ImageMeta>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct SearchResponse {
    items: Vec<ImageResult>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct ErrorBody {
    message: String,
}

/// Anything the annotation pipeline can query for images. Lets tests drive
/// the pipeline without the remote service.
#[async_trait]
pub trait ImageSearcher: Send + Sync {
    /// Returns the candidate images for a query, in the order the service
    /// ranked them. An empty result set is an empty list, not an error.
    async fn search_images(&self, query: &str) -> Result<Vec<ImageResult>>;
}

/// Stateless client for the image-search API.
pub struct ImageSearchClient {
    client: reqwest::Client,
    key: String,
    cx: String,
    base_url: String,
    filters: SearchFilters,
}

impl ImageSearchClient {
    /// Creates a client with an API key and a search-engine identifier.
    pub fn new(key: impl Into<String>, cx: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            key: key.into(),
            cx: cx.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            filters: SearchFilters::default(),
        }
    }

    pub fn with_filters(mut self, filters: SearchFilters) -> Self {
        self.filters = filters;
        self
    }

    /// Points the client at a different endpoint. Used by tests.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn validate(&self) -> Result<()> {
        if self.key.is_empty() {
            return Err(DiscimError::SearchRejected {
                message: "search client key missing".to_string(),
            });
        }
        if self.cx.is_empty() {
            return Err(DiscimError::SearchRejected {
                message: "search client cx missing".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ImageSearcher for ImageSearchClient {
    async fn search_images(&self, query: &str) -> Result<Vec<ImageResult>> {
        self.validate()?;

        let mut request = self.client.get(&self.base_url).query(&[
            ("key", self.key.as_str()),
            ("cx", self.cx.as_str()),
            ("searchType", "image"),
            ("q", query),
            ("prettyPrint", "false"),
        ]);
        if let Some(image_type) = self.filters.image_type {
            request = request.query(&[("imgType", image_type.as_param())]);
        }
        if let Some(image_size) = self.filters.image_size {
            request = request.query(&[("imgSize", image_size.as_param())]);
        }

        let response = request.send().await.map_err(|e| DiscimError::Search {
            message: format!("unable to contact image search: {e}"),
        })?;

        if !response.status().is_success() {
            let body: ErrorResponse =
                response.json().await.map_err(|e| DiscimError::Search {
                    message: format!("unable to decode error response: {e}"),
                })?;
            return Err(DiscimError::SearchRejected {
                message: body.error.message,
            });
        }

        let body: SearchResponse = response.json().await.map_err(|e| DiscimError::Search {
            message: format!("unable to decode response: {e}"),
        })?;
        debug!(query, results = body.items.len(), "image search completed");
        Ok(body.items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_image_type_parse_recognized() {
        assert_eq!(ImageType::parse("photo"), Some(ImageType::Photo));
        assert_eq!(ImageType::parse("clipart"), Some(ImageType::Clipart));
    }

    #[test]
    fn test_image_type_parse_suppresses_unknown() {
        assert_eq!(ImageType::parse("undefined"), None);
        assert_eq!(ImageType::parse(""), None);
        assert_eq!(ImageType::parse("PHOTO"), None);
    }

    #[test]
    fn test_image_size_parse() {
        assert_eq!(ImageSize::parse("xxlarge"), Some(ImageSize::XxLarge));
        assert_eq!(ImageSize::parse("gigantic"), None);
    }

    #[test]
    fn test_filters_from_values_suppresses_unknown() {
        let filters = SearchFilters::from_values("news", "gigantic");
        assert_eq!(filters.image_type, Some(ImageType::News));
        assert_eq!(filters.image_size, None);
    }

    #[tokio::test]
    async fn test_missing_key_is_rejected_without_request() {
        let client = ImageSearchClient::new("", "cx");
        let err = client.search_images("cat").await.unwrap_err();
        assert!(matches!(err, DiscimError::SearchRejected { .. }));
    }

    #[tokio::test]
    async fn test_search_decodes_items() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("q", "elephant"))
            .and(query_param("searchType", "image"))
            .and(query_param("key", "k"))
            .and(query_param("cx", "c"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [
                    {
                        "link": "https://img.example/1.jpg",
                        "mime": "image/jpeg",
                        "displayLink": "img.example",
                        "image": {"height": 600, "width": 800, "thumbnailLink": "https://img.example/t1.jpg"}
                    },
                    {"link": "https://img.example/2.png", "mime": "image/png"}
                ]
            })))
            .mount(&server)
            .await;

        let client = ImageSearchClient::new("k", "c").with_base_url(server.uri());
        let items = client.search_images("elephant").await.unwrap();

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].link, "https://img.example/1.jpg");
        assert_eq!(items[0].display_link, "img.example");
        assert_eq!(items[0].image.as_ref().unwrap().width, 800);
        assert_eq!(items[1].mime, "image/png");
    }

    #[tokio::test]
    async fn test_search_empty_items_is_not_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let client = ImageSearchClient::new("k", "c").with_base_url(server.uri());
        let items = client.search_images("nothing").await.unwrap();
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn test_search_error_body_surfaces_remote_message() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": {"message": "API key not valid. Please pass a valid API key."}
            })))
            .mount(&server)
            .await;

        let client = ImageSearchClient::new("bad", "c").with_base_url(server.uri());
        let err = client.search_images("cat").await.unwrap_err();
        match err {
            DiscimError::SearchRejected { message } => {
                assert!(message.contains("API key not valid"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_filters_forwarded_when_recognized() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("imgType", "photo"))
            .and(query_param("imgSize", "large"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [{"link": "https://img.example/1.jpg"}]
            })))
            .mount(&server)
            .await;

        let client = ImageSearchClient::new("k", "c")
            .with_base_url(server.uri())
            .with_filters(SearchFilters::from_values("photo", "large"));
        let items = client.search_images("cat").await.unwrap();
        assert_eq!(items.len(), 1);
    }

    #[tokio::test]
    async fn test_transport_failure_is_transient() {
        // Nothing is listening on this port.
        let client =
            ImageSearchClient::new("k", "c").with_base_url("http://127.0.0.1:1/customsearch");
        let err = client.search_images("cat").await.unwrap_err();
        assert!(matches!(err, DiscimError::Search { .. }));
    }
}
