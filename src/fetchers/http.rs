use std::error::Error;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use reqwest::header::HeaderName;
use reqwest::{Client, Response, Url};
use thiserror::Error;
use crate::error::{FetchError, FetchResult};
use crate::fetchers::fetcher::Fetcher;

/// Turns a successful HTTP response into data.
pub trait HttpDataExtractor<Data>: Send + Sync + 'static {
    fn extract(&self, response: Response) -> impl Future<Output = Result<Data, ExtractionError>> + Send;
}

/// Fetcher that GETs a URL built from the dependency values and extracts the body.
///
/// Every failure (bad URL, transport error, non-2xx status, undecodable body) settles the
/// resource with a [`FetchError::Operation`] wrapping an [`ExtractionError`].
pub struct HttpFetcher<D, Data, Extractor> {
    client: Client,
    target: Target<D>,
    extractor: Arc<Extractor>,
    _data: PhantomData<fn() -> Data>,
}

impl<D: 'static, Data, Extractor: HttpDataExtractor<Data>> HttpFetcher<D, Data, Extractor> {
    /// Build the request URL from the dependencies on every attempt, e.g. `|id| format!("{base}/deals/{id}")`.
    pub fn new(client: Client, url: impl Fn(&D) -> String + Send + Sync + 'static, extractor: Extractor) -> Self {
        HttpFetcher {
            client,
            target: Target::Built(Arc::new(url)),
            extractor: Arc::new(extractor),
            _data: PhantomData,
        }
    }

    /// Always request the same URL.
    pub fn fixed(client: Client, url: Url, extractor: Extractor) -> Self {
        HttpFetcher {
            client,
            target: Target::Fixed(url),
            extractor: Arc::new(extractor),
            _data: PhantomData,
        }
    }
}

enum Target<D> {
    Fixed(Url),
    Built(Arc<dyn Fn(&D) -> String + Send + Sync>),
}

impl<D> Target<D> {
    fn resolve(&self, deps: &D) -> Result<Url, ExtractionError> {
        match self {
            Target::Fixed(url) => Ok(url.clone()),
            Target::Built(build) => {
                let url = build(deps);
                Url::parse(&url).map_err(|e| ExtractionError::InvalidUrl(url, e.to_string()))
            }
        }
    }
}

impl<D, Data, Extractor> Fetcher<D, Data> for HttpFetcher<D, Data, Extractor>
where
    D: 'static,
    Data: Send + 'static,
    Extractor: HttpDataExtractor<Data>,
{
    fn fetch(&self, deps: &D) -> impl Future<Output = FetchResult<Data>> + Send + 'static {
        let url = self.target.resolve(deps);
        let client = self.client.clone();
        let extractor = Arc::clone(&self.extractor);
        async move {
            let url = url.map_err(FetchError::new)?;
            load(&client, url, extractor.as_ref()).await.map_err(FetchError::new)
        }
    }
}

async fn load<Data, Extractor: HttpDataExtractor<Data>>(
    client: &Client,
    url: Url,
    extractor: &Extractor,
) -> Result<Data, ExtractionError> {
    #[cfg(feature = "tracing")]
    tracing::trace!(url = %url, "GET");

    let response = client.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(ExtractionError::Status(status.as_u16()));
    }
    extractor.extract(response).await
}

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("invalid url '{0}': {1}")]
    InvalidUrl(String, String),
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("server responded with status {0}")]
    Status(u16),
    #[error("header '{0}' is not present in response, but is required to correctly extract data")]
    HeaderNotFound(HeaderName),
    #[error("header {0}: {1} could not be parsed")]
    HeaderParse(HeaderName, String),
    /// Optional feature name can be provided
    #[error("{msg}", msg = unsupported_message(.0, .1))]
    UnsupportedContentType(String, Option<&'static str>),
    #[error("failed to parse response body with Content-Type: {0}")]
    ContentParse(String, #[source] Box<dyn Error + Send + Sync>),
}

fn unsupported_message(content_type: &str, feature: &Option<&'static str>) -> String {
    match feature {
        Some(feature) => format!("content type '{content_type}' is supported only with feature '{feature}', which is disabled"),
        None => format!("unsupported content type: {content_type}"),
    }
}

#[cfg(feature = "serde")]
pub mod serde_extractor {
    use std::future::Future;
    use std::marker::PhantomData;
    use reqwest::header::CONTENT_TYPE;
    use reqwest::Response;
    use serde::de::DeserializeOwned;
    use crate::fetchers::http::{ExtractionError, HttpDataExtractor};
    use crate::fetchers::http::ExtractionError::{HeaderNotFound, HeaderParse, UnsupportedContentType};

    const JSON: &str = "application/json";
    // NOTE: as of 21.06.2024 no MIME type for TOML is registered officially
    const TOML: &str = "application/toml";
    const YAML: &str = "application/yaml";
    const XML: &str = "application/xml";

    type Parser<Data> = fn(&[u8]) -> Result<Data, ExtractionError>;

    /// Picks a deserializer by the response's `Content-Type`. Media type parameters such as `charset` are ignored.
    pub struct SerdeDataExtractor<Data>(PhantomData<fn() -> Data>);

    impl<Data> Default for SerdeDataExtractor<Data> {
        fn default() -> Self {
            SerdeDataExtractor(PhantomData)
        }
    }

    impl<Data: DeserializeOwned + Send + 'static> HttpDataExtractor<Data> for SerdeDataExtractor<Data> {
        fn extract(&self, response: Response) -> impl Future<Output = Result<Data, ExtractionError>> + Send {
            async move {
                let header = response.headers().get(CONTENT_TYPE).ok_or(HeaderNotFound(CONTENT_TYPE))?;
                let header = header
                    .to_str()
                    .map_err(|_| HeaderParse(CONTENT_TYPE, "<NON_ASCII_DATA>".to_string()))?;
                let media_type = header.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();

                let parse: Parser<Data> = match media_type.as_str() {
                    JSON => parse_json::<Data>,
                    TOML => parse_toml::<Data>,
                    YAML => parse_yaml::<Data>,
                    XML => parse_xml::<Data>,
                    other => return Err(UnsupportedContentType(other.to_string(), None)),
                };
                let body = response.bytes().await?;
                parse(&body)
            }
        }
    }

    fn content_error(content_type: &str, err: impl std::error::Error + Send + Sync + 'static) -> ExtractionError {
        ExtractionError::ContentParse(content_type.to_string(), Box::new(err))
    }

    #[cfg(feature = "json")]
    fn parse_json<Data: DeserializeOwned>(body: &[u8]) -> Result<Data, ExtractionError> {
        serde_json::from_slice(body).map_err(|e| content_error(JSON, e))
    }

    #[cfg(not(feature = "json"))]
    fn parse_json<Data>(_: &[u8]) -> Result<Data, ExtractionError> {
        Err(UnsupportedContentType(JSON.to_string(), Some("json")))
    }

    #[cfg(feature = "toml")]
    fn parse_toml<Data: DeserializeOwned>(body: &[u8]) -> Result<Data, ExtractionError> {
        let text = std::str::from_utf8(body).map_err(|e| content_error(TOML, e))?;
        toml::from_str(text).map_err(|e| content_error(TOML, e))
    }

    #[cfg(not(feature = "toml"))]
    fn parse_toml<Data>(_: &[u8]) -> Result<Data, ExtractionError> {
        Err(UnsupportedContentType(TOML.to_string(), Some("toml")))
    }

    #[cfg(feature = "yaml")]
    fn parse_yaml<Data: DeserializeOwned>(body: &[u8]) -> Result<Data, ExtractionError> {
        serde_yaml::from_slice(body).map_err(|e| content_error(YAML, e))
    }

    #[cfg(not(feature = "yaml"))]
    fn parse_yaml<Data>(_: &[u8]) -> Result<Data, ExtractionError> {
        Err(UnsupportedContentType(YAML.to_string(), Some("yaml")))
    }

    #[cfg(feature = "xml")]
    fn parse_xml<Data: DeserializeOwned>(body: &[u8]) -> Result<Data, ExtractionError> {
        serde_xml_rs::from_reader(body).map_err(|e| content_error(XML, e))
    }

    #[cfg(not(feature = "xml"))]
    fn parse_xml<Data>(_: &[u8]) -> Result<Data, ExtractionError> {
        Err(UnsupportedContentType(XML.to_string(), Some("xml")))
    }
}
