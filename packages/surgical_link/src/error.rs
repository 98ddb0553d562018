use tokio_tungstenite::tungstenite;

/// Errors produced inside the client.
///
/// The control channel and the capture pipeline absorb these (log, drop,
/// fall back); only the REST client, the audio uploader and configuration
/// loading hand them back to callers.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The remote endpoint refused or reset the connection.
    #[error("server is unavailable")]
    Unavailable,

    #[error("websocket error: {0}")]
    WebSocket(#[source] Box<tungstenite::Error>),

    /// The socket task went away before the command could be delivered.
    #[error("socket closed")]
    SocketClosed,

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame capture failed: {0}")]
    Capture(String),

    #[error("frame encoding failed: {0}")]
    Encode(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("http error: {0}")]
    Http(#[source] reqwest::Error),

    /// The backend answered with a non-success status and an `error` body.
    #[error("api error ({status}): {message}")]
    Api { status: u16, message: String },
}

impl ClientError {
    pub fn from_tungstenite(err: tungstenite::Error) -> Self {
        let is_connect = match &err {
            tungstenite::Error::Io(io_err) => matches!(
                io_err.kind(),
                std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
            ),
            _ => false,
        };
        if is_connect {
            Self::Unavailable
        } else {
            Self::WebSocket(Box::new(err))
        }
    }

    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_connect() {
            Self::Unavailable
        } else {
            Self::Http(err)
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        Self::from_reqwest(err)
    }
}

impl From<tungstenite::Error> for ClientError {
    fn from(err: tungstenite::Error) -> Self {
        Self::from_tungstenite(err)
    }
}

impl From<image::ImageError> for ClientError {
    fn from(err: image::ImageError) -> Self {
        Self::Encode(err.to_string())
    }
}

impl From<figment::Error> for ClientError {
    fn from(err: figment::Error) -> Self {
        Self::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refused_connection_is_unavailable() {
        let io = std::io::Error::from(std::io::ErrorKind::ConnectionRefused);
        let err = ClientError::from(tungstenite::Error::Io(io));
        assert!(matches!(err, ClientError::Unavailable));
    }

    #[test]
    fn test_other_io_errors_stay_websocket() {
        let io = std::io::Error::from(std::io::ErrorKind::InvalidData);
        let err = ClientError::from(tungstenite::Error::Io(io));
        assert!(matches!(err, ClientError::WebSocket(_)));
    }

    #[test]
    fn test_api_error_display() {
        let err = ClientError::Api {
            status: 404,
            message: "Video file not found".to_string(),
        };
        assert_eq!(err.to_string(), "api error (404): Video file not found");
    }

    #[tokio::test]
    async fn test_reqwest_connect_error_is_unavailable() {
        // Port 1 is reserved and nothing listens on it
        let err = reqwest::get("http://127.0.0.1:1/api/videos")
            .await
            .unwrap_err();
        assert!(matches!(
            ClientError::from_reqwest(err),
            ClientError::Unavailable
        ));
    }
}
