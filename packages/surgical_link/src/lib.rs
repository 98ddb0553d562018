//! surgical_link - client side of the surgical video annotation assistant
//!
//! Keeps one WebSocket control channel to the assistant backend alive
//! (heartbeat, bounded reconnection, in-order JSON dispatch) and always has a
//! still frame to attach to outgoing messages: a live capture, the last good
//! capture, or a generated placeholder.
//!
//! # Example
//!
//! ```no_run
//! use surgical_link::{ServerAction, Session, Settings};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), surgical_link::ClientError> {
//!     let settings = Settings::load(None)?;
//!     let session = Session::new(&settings);
//!
//!     session.connect_with_reactions(|action| {
//!         if let ServerAction::ChatReply { text } = action {
//!             println!("{text}");
//!         }
//!     });
//!
//!     session.send_user_text("Which phase is this?").await;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod audio;
pub mod capture;
pub mod config;
pub mod connection;
pub mod endpoint;
pub mod error;
pub mod protocol;
pub mod session;
pub mod transport;

pub use api::{ApiClient, VideoInfo, VideoSelection};
pub use audio::AudioUploader;
pub use capture::{
    CapturePipeline, CapturedFrame, Freshness, MediaSource, PeriodicCapture, ReadyState,
    StillImageSource,
};
pub use config::Settings;
pub use connection::{
    ConnectionHandle, ConnectionManager, ConnectionState, ConnectionStatus, MessageHandler,
    SendOutcome, WeakConnectionHandle,
};
pub use endpoint::Origin;
pub use error::ClientError;
pub use protocol::{AgentResponse, InboundMessage, OutboundMessage, ServerAction};
pub use session::{Session, WeakSession};
