//! One-shot audio channel: one connection per recording, one binary frame,
//! then a clean close. Never retried.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::AudioConfig;
use crate::endpoint::Origin;
use crate::error::ClientError;
use crate::transport::{
    Connector, NORMAL_CLOSURE, Socket, SocketCommand, SocketEvent, TungsteniteConnector,
};

/// How long to wait for the server to acknowledge the close.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

pub struct AudioUploader {
    origin: Origin,
    port: u16,
    connector: Arc<dyn Connector>,
}

impl AudioUploader {
    pub fn new(origin: Origin, config: &AudioConfig) -> Self {
        Self::with_connector(origin, config, Arc::new(TungsteniteConnector))
    }

    pub fn with_connector(
        origin: Origin,
        config: &AudioConfig,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self {
            origin,
            port: config.port,
            connector,
        }
    }

    pub fn url(&self) -> String {
        self.origin.websocket_url(self.port)
    }

    /// Send one recording as a single binary frame.
    pub async fn upload(&self, audio: Vec<u8>) -> Result<(), ClientError> {
        let url = self.url();
        info!(bytes = audio.len(), "uploading recording to {}", url);

        let mut socket = self.connector.connect(&url).await.inspect_err(|e| {
            warn!("audio channel connect failed: {}", e);
        })?;
        socket.send(SocketCommand::Binary(audio))?;
        socket.send(SocketCommand::Close {
            code: NORMAL_CLOSURE,
        })?;

        if tokio::time::timeout(CLOSE_TIMEOUT, wait_closed(&mut socket))
            .await
            .is_err()
        {
            debug!("audio channel close not acknowledged");
        }
        Ok(())
    }
}

async fn wait_closed(socket: &mut Socket) {
    while let Some(event) = socket.inbound.recv().await {
        match event {
            SocketEvent::Closed { code } => {
                debug!(code, "audio channel closed");
                return;
            }
            SocketEvent::Error(e) => warn!("audio channel error: {}", e),
            SocketEvent::Text(_) | SocketEvent::Binary(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::{FakeConnector, Script};

    fn uploader(script: &[Script]) -> (
        AudioUploader,
        Arc<FakeConnector>,
        tokio::sync::mpsc::UnboundedReceiver<crate::transport::SocketPeer>,
    ) {
        let (connector, peers) = FakeConnector::new(script);
        let origin = Origin::parse("https://or-3.local").unwrap();
        let uploader =
            AudioUploader::with_connector(origin, &AudioConfig::default(), connector.clone());
        (uploader, connector, peers)
    }

    #[tokio::test]
    async fn test_upload_sends_one_frame_then_closes() {
        let (uploader, connector, mut peers) = uploader(&[Script::Accept]);
        let task = tokio::spawn(async move { uploader.upload(vec![1, 2, 3, 4]).await });

        let mut peer = peers.recv().await.unwrap();
        assert_eq!(
            peer.commands.recv().await,
            Some(SocketCommand::Binary(vec![1, 2, 3, 4]))
        );
        assert_eq!(
            peer.commands.recv().await,
            Some(SocketCommand::Close { code: 1000 })
        );
        peer.events.send(SocketEvent::Closed { code: 1000 }).unwrap();

        task.await.unwrap().unwrap();
        assert_eq!(connector.urls(), ["wss://or-3.local:49001"]);
    }

    #[tokio::test]
    async fn test_refused_upload_is_not_retried() {
        let (uploader, connector, _peers) = uploader(&[Script::Refuse]);
        let err = uploader.upload(vec![0; 16]).await.unwrap_err();
        assert!(matches!(err, ClientError::Unavailable));
        assert_eq!(connector.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unacknowledged_close_still_succeeds() {
        let (uploader, _connector, mut peers) = uploader(&[Script::Accept]);
        let task = tokio::spawn(async move { uploader.upload(vec![9]).await });
        // keep the peer alive but silent
        let _peer = peers.recv().await.unwrap();
        assert!(task.await.unwrap().is_ok());
    }
}
