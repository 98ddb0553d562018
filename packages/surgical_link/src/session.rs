//! Wiring of user-level intents onto the control channel and the capture
//! pipeline.

use std::sync::{Arc, Weak};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info};

use crate::audio::AudioUploader;
use crate::capture::{
    CapturePipeline, CapturedFrame, MediaSource, PeriodicCapture, SharedPipeline,
};
use crate::config::Settings;
use crate::connection::{
    ConnectionHandle, ConnectionManager, MessageHandler, SendOutcome, WeakConnectionHandle,
};
use crate::error::ClientError;
use crate::protocol::{InboundMessage, OutboundMessage, ServerAction};
use crate::transport::Connector;

/// One client session: a control channel, a capture pipeline, periodic
/// capture and the audio uploader. Cheap to clone.
#[derive(Clone)]
pub struct Session {
    connection: ConnectionHandle,
    pipeline: SharedPipeline,
    periodic: Arc<Mutex<PeriodicCapture>>,
    audio: Arc<AudioUploader>,
    control_port: u16,
    settle_delay: Duration,
}

/// A [`Session`] reference that does not keep the session's tasks alive.
///
/// Message handlers are owned by the connection manager; holding a strong
/// session there would keep the manager's command channel open forever.
#[derive(Clone)]
pub struct WeakSession {
    connection: WeakConnectionHandle,
    pipeline: Weak<Mutex<CapturePipeline>>,
    periodic: Weak<Mutex<PeriodicCapture>>,
    audio: Weak<AudioUploader>,
    control_port: u16,
    settle_delay: Duration,
}

impl WeakSession {
    pub fn upgrade(&self) -> Option<Session> {
        Some(Session {
            connection: self.connection.upgrade()?,
            pipeline: self.pipeline.upgrade()?,
            periodic: self.periodic.upgrade()?,
            audio: self.audio.upgrade()?,
            control_port: self.control_port,
            settle_delay: self.settle_delay,
        })
    }
}

impl Session {
    /// Start a session that dials real WebSockets. Does not connect yet.
    pub fn new(settings: &Settings) -> Self {
        let connection =
            ConnectionManager::spawn(settings.connection.clone(), settings.origin.clone());
        let audio = AudioUploader::new(settings.origin.clone(), &settings.audio);
        Self::from_parts(settings, connection, audio)
    }

    /// Start a session whose control and audio channels use `connector`.
    pub fn with_connector(settings: &Settings, connector: Arc<dyn Connector>) -> Self {
        let connection = ConnectionManager::spawn_with_connector(
            settings.connection.clone(),
            settings.origin.clone(),
            connector.clone(),
        );
        let audio =
            AudioUploader::with_connector(settings.origin.clone(), &settings.audio, connector);
        Self::from_parts(settings, connection, audio)
    }

    fn from_parts(settings: &Settings, connection: ConnectionHandle, audio: AudioUploader) -> Self {
        Self {
            connection,
            pipeline: CapturePipeline::new(&settings.capture).into_shared(),
            periodic: Arc::new(Mutex::new(PeriodicCapture::new(settings.capture.interval))),
            audio: Arc::new(audio),
            control_port: settings.connection.control_port,
            settle_delay: settings.audio.settle_delay,
        }
    }

    pub fn connection(&self) -> &ConnectionHandle {
        &self.connection
    }

    pub fn pipeline(&self) -> &SharedPipeline {
        &self.pipeline
    }

    /// Connect the control channel with a raw message handler.
    pub fn connect(&self, handler: impl MessageHandler) {
        self.connection.connect(self.control_port, handler);
    }

    pub fn downgrade(&self) -> WeakSession {
        WeakSession {
            connection: self.connection.downgrade(),
            pipeline: Arc::downgrade(&self.pipeline),
            periodic: Arc::downgrade(&self.periodic),
            audio: Arc::downgrade(&self.audio),
            control_port: self.control_port,
            settle_delay: self.settle_delay,
        }
    }

    /// Connect the control channel, hand every decoded action to
    /// `on_action` and then apply the default [`react`](Self::react).
    ///
    /// Reactions run one at a time on a single task, in arrival order. The
    /// task ends when the handler is replaced or the session is dropped.
    pub fn connect_with_reactions<F>(&self, mut on_action: F)
    where
        F: FnMut(&ServerAction) + Send + 'static,
    {
        let (reactions_tx, mut reactions) = mpsc::unbounded_channel::<ServerAction>();
        let session = self.downgrade();
        tokio::spawn(async move {
            while let Some(action) = reactions.recv().await {
                let Some(session) = session.upgrade() else {
                    break;
                };
                session.react(&action).await;
            }
            debug!("reaction queue closed");
        });

        self.connect(move |message: InboundMessage| {
            for action in message.actions() {
                on_action(&action);
                if reacts_to(&action) {
                    let _ = reactions_tx.send(action);
                }
            }
        });
    }

    /// Default reactions that are not presentation concerns: final speech is
    /// forwarded as user text, frame requests are answered with a frame.
    pub async fn react(&self, action: &ServerAction) -> Option<SendOutcome> {
        match action {
            ServerAction::RecognizedSpeech { text } => Some(self.send_user_text(text).await),
            ServerAction::FrameRequested { recognized_text } => {
                let text = recognized_text.as_deref().unwrap_or_default();
                Some(self.send_frame_with_text(text).await)
            }
            _ => None,
        }
    }

    pub async fn capture_frame(&self) -> Option<CapturedFrame> {
        self.pipeline.lock().await.capture_frame()
    }

    /// Send typed chat input with the current frame.
    pub async fn send_user_text(&self, text: &str) -> SendOutcome {
        let frame = self.capture_frame().await;
        debug!(freshness = ?frame.as_ref().map(CapturedFrame::freshness), "sending user text");
        self.connection
            .send(OutboundMessage::user_text(text, frame.as_ref()))
            .await
    }

    /// Answer a server frame request.
    pub async fn send_frame_with_text(&self, text: &str) -> SendOutcome {
        let frame = self.capture_frame().await;
        self.connection
            .send(OutboundMessage::frame_with_text(text, frame.as_ref()))
            .await
    }

    pub async fn send_note(&self, note: Value) -> SendOutcome {
        self.connection.send(OutboundMessage::note(note)).await
    }

    pub async fn attach_media(&self, source: Box<dyn MediaSource>) {
        self.pipeline.lock().await.attach_source(source);
    }

    pub async fn detach_media(&self) {
        self.pipeline.lock().await.detach_source();
    }

    pub async fn start_periodic_capture(&self) {
        self.periodic
            .lock()
            .await
            .start(self.pipeline.clone(), self.connection.clone());
    }

    pub async fn stop_periodic_capture(&self) {
        self.periodic.lock().await.stop();
    }

    pub async fn is_periodic_capture_running(&self) -> bool {
        self.periodic.lock().await.is_running()
    }

    /// Upload a finished recording after the settle delay. Returns whether
    /// anything was sent.
    pub async fn finish_recording(&self, chunks: Vec<Vec<u8>>) -> Result<bool, ClientError> {
        tokio::time::sleep(self.settle_delay).await;

        let audio = chunks.concat();
        if audio.is_empty() {
            debug!("recording empty; nothing to upload");
            return Ok(false);
        }
        self.audio.upload(audio).await?;
        Ok(true)
    }

    /// Stop periodic capture and the control channel.
    pub async fn close(&self) {
        self.stop_periodic_capture().await;
        self.connection.shutdown().await;
        info!("session closed");
    }
}

fn reacts_to(action: &ServerAction) -> bool {
    matches!(
        action,
        ServerAction::RecognizedSpeech { .. } | ServerAction::FrameRequested { .. }
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::capture::{Freshness, StillImageSource};
    use crate::config::{AudioConfig, CaptureConfig, ConnectionConfig};
    use crate::endpoint::Origin;
    use crate::transport::testing::{FakeConnector, Script};
    use crate::transport::{SocketCommand, SocketEvent, SocketPeer};
    use image::{Rgb, RgbImage};

    fn settings() -> Settings {
        Settings {
            origin: Origin::parse("http://localhost:8050").unwrap(),
            connection: ConnectionConfig::default(),
            capture: CaptureConfig::default(),
            audio: AudioConfig::default(),
        }
    }

    async fn open_session(
        script: &[Script],
    ) -> (
        Session,
        Arc<FakeConnector>,
        tokio::sync::mpsc::UnboundedReceiver<SocketPeer>,
        SocketPeer,
    ) {
        let (connector, mut peers) = FakeConnector::new(script);
        let session = Session::with_connector(&settings(), connector.clone());
        session.connect_with_reactions(|_| {});
        let peer = peers.recv().await.unwrap();
        session.connection().status().await;
        (session, connector, peers, peer)
    }

    async fn next_json(peer: &mut SocketPeer) -> Value {
        loop {
            match peer.commands.recv().await {
                Some(SocketCommand::Text(text)) => {
                    let value: Value = serde_json::from_str(&text).unwrap();
                    if value["type"] != "heartbeat" {
                        return value;
                    }
                }
                Some(other) => panic!("unexpected command {other:?}"),
                None => panic!("socket closed"),
            }
        }
    }

    #[tokio::test]
    async fn test_user_text_always_carries_a_frame() {
        let (session, _connector, _peers, mut peer) = open_session(&[Script::Accept]).await;

        assert_eq!(session.send_user_text("what is this").await, SendOutcome::Sent);
        let sent = next_json(&mut peer).await;
        assert_eq!(sent["user_input"], "what is this");
        assert_eq!(sent["original_user_input"], "what is this");
        assert!(sent["frame_data"].as_str().unwrap().starts_with("data:image/jpeg;base64,"));
    }

    #[tokio::test]
    async fn test_live_media_frame_is_sent_and_cached() {
        let (session, _connector, _peers, mut peer) = open_session(&[Script::Accept]).await;
        session
            .attach_media(Box::new(StillImageSource::new(RgbImage::from_pixel(
                32,
                18,
                Rgb([120, 30, 30]),
            ))))
            .await;

        session.send_user_text("bleeding?").await;
        let sent = next_json(&mut peer).await;

        session.detach_media().await;
        let cached = session.capture_frame().await.unwrap();
        assert_eq!(cached.freshness(), Freshness::Cached);
        assert_eq!(sent["frame_data"], cached.data_url());
    }

    #[tokio::test]
    async fn test_note_shape() {
        let (session, _connector, _peers, mut peer) = open_session(&[Script::Accept]).await;
        session
            .send_note(json!({"title": "Clip", "content": "clip applied to cystic artery"}))
            .await;
        let sent = next_json(&mut peer).await;
        assert_eq!(sent["note"]["title"], "Clip");
    }

    #[tokio::test]
    async fn test_frame_request_is_answered() {
        let (_session, _connector, _peers, mut peer) = open_session(&[Script::Accept]).await;
        peer.events
            .send(SocketEvent::Text(
                r#"{"request_frame": true, "recognized_text": "what phase is this"}"#.into(),
            ))
            .unwrap();

        let sent = next_json(&mut peer).await;
        assert_eq!(sent["user_input"], "what phase is this");
        assert_eq!(sent["asr_final"], true);
        assert!(sent["frame_data"].is_string());
    }

    #[tokio::test]
    async fn test_final_speech_is_forwarded_as_user_text() {
        let (_session, _connector, _peers, mut peer) = open_session(&[Script::Accept]).await;
        peer.events
            .send(SocketEvent::Text(
                r#"{"recognized_text": "take a note", "asr_final": true}"#.into(),
            ))
            .unwrap();

        let sent = next_json(&mut peer).await;
        assert_eq!(sent["user_input"], "take a note");
        assert_eq!(sent["original_user_input"], "take a note");
    }

    #[tokio::test]
    async fn test_reactions_keep_arrival_order() {
        let (_session, _connector, _peers, mut peer) = open_session(&[Script::Accept]).await;
        for text in ["first", "second", "third"] {
            let frame = json!({"recognized_text": text, "asr_final": true});
            peer.events
                .send(SocketEvent::Text(frame.to_string()))
                .unwrap();
        }

        for expected in ["first", "second", "third"] {
            assert_eq!(next_json(&mut peer).await["user_input"], expected);
        }
    }

    #[tokio::test]
    async fn test_dropping_session_stops_connection() {
        let (session, _connector, _peers, mut peer) = open_session(&[Script::Accept]).await;
        let mut status = session.connection().subscribe_status();
        session.start_periodic_capture().await;
        drop(session);

        tokio::time::timeout(Duration::from_secs(5), async {
            while status.changed().await.is_ok() {}
        })
        .await
        .expect("connection manager still running");

        let mut closed = false;
        while let Ok(cmd) = peer.commands.try_recv() {
            closed |= cmd == SocketCommand::Close { code: 1000 };
        }
        assert!(closed, "socket was not closed");
    }

    #[tokio::test]
    async fn test_actions_reach_observer_in_order() {
        let (connector, mut peers) = FakeConnector::new(&[Script::Accept]);
        let session = Session::with_connector(&settings(), connector);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        session.connect_with_reactions(move |action| {
            let _ = tx.send(action.clone());
        });
        let peer = peers.recv().await.unwrap();

        peer.events
            .send(SocketEvent::Text(
                r#"{"message": "Looks like dissection", "current_phase": "Calot triangle dissection"}"#
                    .into(),
            ))
            .unwrap();

        assert_eq!(
            rx.recv().await.unwrap(),
            ServerAction::ChatReply {
                text: "Looks like dissection".into()
            }
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            ServerAction::PhaseChanged {
                phase: "Calot triangle dissection".into()
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_capture_controls() {
        let (session, _connector, _peers, mut peer) = open_session(&[Script::Accept]).await;
        session.start_periodic_capture().await;
        session.start_periodic_capture().await;
        assert!(session.is_periodic_capture_running().await);

        tokio::time::sleep(Duration::from_secs(10)).await;
        let sent = next_json(&mut peer).await;
        assert_eq!(sent["auto_frame"], true);

        session.stop_periodic_capture().await;
        session.stop_periodic_capture().await;
        assert!(!session.is_periodic_capture_running().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_finish_recording_uploads_after_settle_delay() {
        let (session, connector, mut peers, _control) =
            open_session(&[Script::Accept, Script::Accept]).await;

        let upload = tokio::spawn({
            let session = session.clone();
            async move { session.finish_recording(vec![vec![1, 2], vec![], vec![3]]).await }
        });

        let mut audio_peer = peers.recv().await.unwrap();
        assert_eq!(
            audio_peer.commands.recv().await,
            Some(SocketCommand::Binary(vec![1, 2, 3]))
        );
        audio_peer.events.send(SocketEvent::Closed { code: 1000 }).unwrap();
        assert!(upload.await.unwrap().unwrap());
        assert_eq!(connector.urls().last().unwrap(), "ws://localhost:49001");
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_recording_is_not_uploaded() {
        let (session, connector, _peers, _control) = open_session(&[Script::Accept]).await;
        assert!(!session.finish_recording(vec![vec![], vec![]]).await.unwrap());
        assert_eq!(connector.attempts(), 1);
    }

    #[tokio::test]
    async fn test_close_shuts_down_connection() {
        let (session, _connector, _peers, mut peer) = open_session(&[Script::Accept]).await;
        session.close().await;
        assert_eq!(
            peer.commands.recv().await,
            Some(SocketCommand::Close { code: 1000 })
        );
        assert!(!session.connection().is_running());
    }
}
