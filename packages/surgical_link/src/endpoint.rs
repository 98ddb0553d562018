//! Page origin and the endpoint URLs derived from it.
//!
//! The WebSocket channels live on the same host as the page, on their own
//! ports, and inherit the page's security: an `https` origin yields `wss`
//! endpoints.

use reqwest::Url;

use crate::error::ClientError;

/// The origin the assistant's web front-end is served from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    secure: bool,
    host: String,
    port: Option<u16>,
}

impl Origin {
    /// Parse an origin such as `http://localhost:8050` or `https://or-3.local`.
    pub fn parse(origin: &str) -> Result<Self, ClientError> {
        let url = Url::parse(origin)
            .map_err(|e| ClientError::Config(format!("invalid origin {origin:?}: {e}")))?;

        let secure = match url.scheme() {
            "http" => false,
            "https" => true,
            other => {
                return Err(ClientError::Config(format!(
                    "unsupported origin scheme {other:?}"
                )));
            }
        };

        let host = url
            .host_str()
            .ok_or_else(|| ClientError::Config(format!("origin {origin:?} has no host")))?
            .to_string();

        Ok(Self {
            secure,
            host,
            port: url.port(),
        })
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn websocket_scheme(&self) -> &'static str {
        if self.secure { "wss://" } else { "ws://" }
    }

    /// `ws(s)://<host>:<port>` for one of the assistant's socket servers.
    pub fn websocket_url(&self, port: u16) -> String {
        format!("{}{}:{}", self.websocket_scheme(), self.host, port)
    }

    /// Base URL for the REST API (`http(s)://<host>[:<port>]`).
    pub fn http_base(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        match self.port {
            Some(port) => format!("{}://{}:{}", scheme, self.host, port),
            None => format!("{}://{}", scheme, self.host),
        }
    }

    /// Absolute URL for an API path such as `/api/videos`.
    pub fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.http_base(), path)
    }
}
