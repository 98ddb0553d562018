//! Best-effort still-frame capture.
//!
//! `capture_frame` tries, in order:
//! - a live frame from the attached [`MediaSource`]
//! - the last successful live capture from the [`SessionStore`]
//! - a synthesised placeholder, generated once per session
//!
//! Callers get `None` only when even the placeholder cannot be encoded.

mod encoder;
mod periodic;
pub mod placeholder;
mod source;
mod store;

pub use encoder::{
    FrameEncoder, JPEG_DATA_URL_PREFIX, JpegDataUrlEncoder, decode_data_url, is_valid_data_url,
};
pub use periodic::PeriodicCapture;
pub use source::{MediaSource, ReadyState, StillImageSource};
pub use store::{LAST_FRAME_KEY, MemoryStore, PLACEHOLDER_KEY, SessionStore};

use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::CaptureConfig;
use crate::error::ClientError;

/// Where a captured frame came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Just drawn from the media source.
    Live,
    /// An earlier live capture.
    Cached,
    /// Synthesised; carries no video content.
    Placeholder,
}

/// A still image ready to attach to an outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedFrame {
    data_url: String,
    freshness: Freshness,
}

impl CapturedFrame {
    pub fn new(data_url: String, freshness: Freshness) -> Self {
        Self {
            data_url,
            freshness,
        }
    }

    /// `data:image/jpeg;base64,...`
    pub fn data_url(&self) -> &str {
        &self.data_url
    }

    pub fn freshness(&self) -> Freshness {
        self.freshness
    }

    pub fn is_placeholder(&self) -> bool {
        self.freshness == Freshness::Placeholder
    }

    pub fn jpeg_bytes(&self) -> Result<Vec<u8>, ClientError> {
        decode_data_url(&self.data_url)
    }

    pub fn into_data_url(self) -> String {
        self.data_url
    }
}

/// A pipeline shared between the session and the periodic capture task.
pub type SharedPipeline = Arc<tokio::sync::Mutex<CapturePipeline>>;

pub struct CapturePipeline {
    source: Option<Box<dyn MediaSource>>,
    store: Box<dyn SessionStore>,
    encoder: Box<dyn FrameEncoder>,
    placeholder_size: (u32, u32),
}

impl CapturePipeline {
    pub fn new(config: &CaptureConfig) -> Self {
        Self {
            source: None,
            store: Box::new(MemoryStore::new()),
            encoder: Box::new(JpegDataUrlEncoder::new(config.jpeg_quality)),
            placeholder_size: (config.placeholder_width, config.placeholder_height),
        }
    }

    pub fn into_shared(self) -> SharedPipeline {
        Arc::new(tokio::sync::Mutex::new(self))
    }

    pub fn with_store(mut self, store: impl SessionStore + 'static) -> Self {
        self.store = Box::new(store);
        self
    }

    pub fn with_encoder(mut self, encoder: impl FrameEncoder + 'static) -> Self {
        self.encoder = Box::new(encoder);
        self
    }

    /// Attach (or replace) the media source frames are drawn from.
    pub fn attach_source(&mut self, source: Box<dyn MediaSource>) {
        self.source = Some(source);
    }

    pub fn detach_source(&mut self) -> Option<Box<dyn MediaSource>> {
        self.source.take()
    }

    pub fn has_source(&self) -> bool {
        self.source.is_some()
    }

    /// Produce the best frame currently obtainable.
    pub fn capture_frame(&mut self) -> Option<CapturedFrame> {
        match self.capture_live() {
            Ok(data_url) => {
                self.store.set(LAST_FRAME_KEY, data_url.clone());
                debug!("frame captured");
                return Some(CapturedFrame::new(data_url, Freshness::Live));
            }
            Err(e) => debug!("live capture unavailable: {}", e),
        }

        if let Some(frame) = self.last_frame() {
            debug!("using previously captured frame");
            return Some(frame);
        }

        self.placeholder()
    }

    /// Most recent successful live capture, if any.
    pub fn last_frame(&self) -> Option<CapturedFrame> {
        self.store
            .get(LAST_FRAME_KEY)
            .map(|data_url| CapturedFrame::new(data_url, Freshness::Cached))
    }

    /// The session's placeholder frame, synthesised on first use.
    pub fn placeholder(&mut self) -> Option<CapturedFrame> {
        if let Some(data_url) = self.store.get(PLACEHOLDER_KEY) {
            return Some(CapturedFrame::new(data_url, Freshness::Placeholder));
        }

        let (width, height) = self.placeholder_size;
        let image = placeholder::render(width, height);
        match self.encoder.encode(&image) {
            Ok(data_url) if is_valid_data_url(&data_url) => {
                self.store.set(PLACEHOLDER_KEY, data_url.clone());
                debug!(width, height, "created placeholder frame");
                Some(CapturedFrame::new(data_url, Freshness::Placeholder))
            }
            Ok(_) => {
                warn!("placeholder encoding produced an invalid payload");
                None
            }
            Err(e) => {
                warn!("failed to create placeholder frame: {}", e);
                None
            }
        }
    }

    fn capture_live(&mut self) -> Result<String, ClientError> {
        let source = self
            .source
            .as_mut()
            .ok_or_else(|| ClientError::Capture("no media source".to_string()))?;

        if !source.has_source() {
            return Err(ClientError::Capture("media has no source".to_string()));
        }
        let ready = source.ready_state();
        if ready < ReadyState::HaveCurrentData {
            return Err(ClientError::Capture(format!(
                "media not ready ({ready:?})"
            )));
        }
        let (width, height) = source.intrinsic_size();
        if width == 0 || height == 0 {
            return Err(ClientError::Capture(
                "media dimensions not available".to_string(),
            ));
        }

        let image = source.render_frame(width, height)?;
        let data_url = self.encoder.encode(&image)?;
        if !is_valid_data_url(&data_url) {
            return Err(ClientError::Encode(
                "encoder returned an invalid data URL".to_string(),
            ));
        }
        Ok(data_url)
    }
}
