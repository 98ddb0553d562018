//! REST client for the backend's `/api/*` endpoints.

use std::path::Path;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use reqwest::multipart;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::endpoint::Origin;
use crate::error::ClientError;

/// A video the backend can play.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoInfo {
    pub filename: String,
    pub video_src: String,
    #[serde(default)]
    pub size: u64,
    /// Modification time, seconds since the epoch.
    #[serde(default)]
    pub modified: f64,
}

#[derive(Debug, Deserialize)]
struct VideoList {
    #[serde(default)]
    videos: Vec<VideoInfo>,
}

/// The backend's answer to a select or upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoSelection {
    #[serde(default)]
    pub success: bool,
    pub video_src: String,
    #[serde(default)]
    pub video_path: Option<String>,
    /// Stored name; differs from the uploaded name when it was taken.
    #[serde(default)]
    pub filename: Option<String>,
}

#[derive(Debug, Serialize)]
struct PostOpRequest<'a> {
    notes: &'a [Value],
    annotations: &'a [Value],
    video_duration: &'a str,
}

#[derive(Debug, Deserialize)]
struct PostOpResponse {
    #[serde(default)]
    post_op_note: Option<Value>,
}

#[derive(Debug, Serialize)]
struct TtsRequest<'a> {
    text: &'a str,
    api_key: &'a str,
}

#[derive(Debug, Deserialize)]
struct TtsResponse {
    #[serde(alias = "audio_base64")]
    tts_base64: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    origin: Origin,
}

impl ApiClient {
    pub fn new(origin: Origin) -> Self {
        Self::with_client(origin, reqwest::Client::new())
    }

    pub fn with_client(origin: Origin, http: reqwest::Client) -> Self {
        Self { http, origin }
    }

    /// `GET /api/videos`, most recently modified first.
    pub async fn list_videos(&self) -> Result<Vec<VideoInfo>, ClientError> {
        let resp = self.http.get(self.origin.api_url("/api/videos")).send().await?;
        let list: VideoList = check(resp).await?.json().await?;
        debug!(count = list.videos.len(), "listed videos");
        Ok(list.videos)
    }

    /// `POST /api/select_video`. The backend also pushes `video_updated` on
    /// the control channel.
    pub async fn select_video(&self, filename: &str) -> Result<VideoSelection, ClientError> {
        let resp = self
            .http
            .post(self.origin.api_url("/api/select_video"))
            .json(&serde_json::json!({ "filename": filename }))
            .send()
            .await?;
        let selection: VideoSelection = check(resp).await?.json().await?;
        info!("selected video {}", selection.video_src);
        Ok(selection)
    }

    /// `POST /api/upload_video` as multipart field `video`.
    pub async fn upload_video(&self, path: &Path) -> Result<VideoSelection, ClientError> {
        let data = tokio::fs::read(path)
            .await
            .map_err(|e| ClientError::Config(format!("{}: {}", path.display(), e)))?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "video.mp4".to_string());
        info!(bytes = data.len(), "uploading video {}", filename);

        let part = multipart::Part::bytes(data).file_name(filename);
        let form = multipart::Form::new().part("video", part);
        let resp = self
            .http
            .post(self.origin.api_url("/api/upload_video"))
            .multipart(form)
            .send()
            .await?;
        Ok(check(resp).await?.json().await?)
    }

    /// `POST /api/generate_post_op_note`. `None` when the backend had
    /// nothing to summarise.
    pub async fn generate_post_op_note(
        &self,
        notes: &[Value],
        annotations: &[Value],
        video_duration: &str,
    ) -> Result<Option<Value>, ClientError> {
        let body = PostOpRequest {
            notes,
            annotations,
            video_duration,
        };
        let resp = self
            .http
            .post(self.origin.api_url("/api/generate_post_op_note"))
            .json(&body)
            .send()
            .await?;
        let note: PostOpResponse = check(resp).await?.json().await?;
        Ok(note.post_op_note)
    }

    /// `POST /api/tts`; returns the decoded audio bytes.
    pub async fn tts(&self, text: &str, api_key: &str) -> Result<Vec<u8>, ClientError> {
        let resp = self
            .http
            .post(self.origin.api_url("/api/tts"))
            .json(&TtsRequest { text, api_key })
            .send()
            .await?;
        let audio: TtsResponse = check(resp).await?.json().await?;
        STANDARD
            .decode(audio.tts_base64)
            .map_err(|e| ClientError::Encode(e.to_string()))
    }
}

/// Turn a non-success response into [`ClientError::Api`], preferring the
/// body's `error` field.
async fn check(resp: reqwest::Response) -> Result<reqwest::Response, ClientError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let message = match serde_json::from_str::<ErrorBody>(&body) {
        Ok(err) => err.error,
        Err(_) if !body.trim().is_empty() => body,
        Err(_) => status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string(),
    };
    Err(ClientError::Api {
        status: status.as_u16(),
        message,
    })
}
