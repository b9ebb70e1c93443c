//! JSON-over-HTTP origin built on reqwest.

use std::error::Error as StdError;
use std::future::Future;
use std::io;
use std::marker::PhantomData;
use std::time::Duration;

use reqwest::{Client, IntoUrl, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use strata_core::{OriginError, TimeoutPhase};
use tracing::debug;

use super::OriginFetcher;

/// Factory for JSON origin requests sharing one connection pool.
#[derive(Debug, Clone, Default)]
pub struct HttpOrigin {
    client: Client,
}

impl HttpOrigin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build with connect and overall request timeouts.
    pub fn with_timeouts(connect: Duration, request: Duration) -> Result<Self, OriginError> {
        let client = Client::builder()
            .connect_timeout(connect)
            .timeout(request)
            .build()
            .map_err(from_reqwest)?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// `GET url`, decoding the body as `T`.
    pub fn get_json<T>(&self, url: impl IntoUrl) -> JsonRequest<T> {
        JsonRequest::new(self.client.get(url))
    }

    /// Wrap an arbitrary request (custom method, headers, body).
    pub fn request<T>(&self, request: RequestBuilder) -> JsonRequest<T> {
        JsonRequest::new(request)
    }
}

/// A pending request whose response body decodes to `T`.
///
/// - 2xx with a JSON body: `Some(value)`
/// - 204, or 2xx with an empty body: `None`
/// - any other status: [`OriginError::Status`]
/// - a body that is not valid `T`: [`OriginError::Parse`]
pub struct JsonRequest<T> {
    request: RequestBuilder,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonRequest<T> {
    fn new(request: RequestBuilder) -> Self {
        Self {
            request,
            _marker: PhantomData,
        }
    }
}

impl<T> OriginFetcher<T> for JsonRequest<T>
where
    T: DeserializeOwned + Send,
{
    fn fetch(self) -> impl Future<Output = Result<Option<T>, OriginError>> + Send {
        async move {
            let response = self.request.send().await.map_err(from_reqwest)?;
            let status = response.status();
            debug!(status = status.as_u16(), url = %response.url(), "Origin responded");

            if !status.is_success() {
                return Err(OriginError::status(status.as_u16()));
            }
            if status == StatusCode::NO_CONTENT {
                return Ok(None);
            }

            let body = response.bytes().await.map_err(from_reqwest)?;
            if body.iter().all(u8::is_ascii_whitespace) {
                return Ok(None);
            }

            serde_json::from_slice::<T>(&body)
                .map(Some)
                .map_err(OriginError::from)
        }
    }
}

/// Map a reqwest failure onto the origin error taxonomy.
pub fn from_reqwest(err: reqwest::Error) -> OriginError {
    if let Some(status) = err.status() {
        return OriginError::status(status.as_u16());
    }

    if err.is_timeout() {
        let phase = if err.is_connect() {
            TimeoutPhase::Connect
        } else {
            TimeoutPhase::Response
        };
        return OriginError::Timeout {
            phase,
            reason: err.to_string(),
        };
    }

    if err.is_decode() {
        return OriginError::Parse {
            reason: chain_text(&err),
        };
    }

    if err.is_connect() {
        if let Some(mapped) = typed_cause(&err) {
            return mapped;
        }
        let text = chain_text(&err);
        let lowered = text.to_ascii_lowercase();
        if lowered.contains("dns error") || lowered.contains("failed to lookup address") {
            let host = err
                .url()
                .and_then(|url| url.host_str())
                .unwrap_or_default()
                .to_string();
            return OriginError::Dns { host, reason: text };
        }
        if lowered.contains("certificate") || lowered.contains("tls") || lowered.contains("handshake")
        {
            return OriginError::Tls { reason: text };
        }
        return OriginError::Transport { reason: text };
    }

    if err.is_body() {
        return OriginError::Transport {
            reason: chain_text(&err),
        };
    }

    OriginError::Other(Box::new(err))
}

/// Map the first recognised typed cause in the source chain.
///
/// Resolver failures carry no typed marker, so DNS is left to the caller.
fn typed_cause(err: &(dyn StdError + 'static)) -> Option<OriginError> {
    let mut source = err.source();
    while let Some(cause) = source {
        if cause.downcast_ref::<rustls::Error>().is_some() {
            return Some(OriginError::Tls {
                reason: chain_text(err),
            });
        }
        if let Some(io) = cause.downcast_ref::<io::Error>() {
            if io
                .get_ref()
                .is_some_and(|inner| inner.downcast_ref::<rustls::Error>().is_some())
            {
                return Some(OriginError::Tls {
                    reason: chain_text(err),
                });
            }
            match io.kind() {
                io::ErrorKind::TimedOut => {
                    return Some(OriginError::Timeout {
                        phase: TimeoutPhase::Connect,
                        reason: chain_text(err),
                    })
                }
                io::ErrorKind::ConnectionRefused
                | io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::NotConnected
                | io::ErrorKind::AddrNotAvailable
                | io::ErrorKind::BrokenPipe => {
                    return Some(OriginError::Transport {
                        reason: chain_text(err),
                    })
                }
                _ => {}
            }
        }
        source = cause.source();
    }
    None
}

/// Render an error and all its sources on one line.
fn chain_text(err: &(dyn StdError + 'static)) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text
}
