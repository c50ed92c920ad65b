//! Speech feedback boundary

use std::path::PathBuf;

use chrono::Local;
use reqwest::Client;
use serde::Serialize;
use tokio::process::Command;
use tracing::{debug, info};

/// Turns driver feedback into speech. Implementations may be slow; callers
/// run them off the simulation loop.
#[async_trait::async_trait]
pub trait Narrator: Send + Sync {
    async fn synthesize_and_play(&self, text: &str) -> Result<(), NarrationError>;
}

/// Style hint sent with every narration request
pub const COACH_INSTRUCTION: &str = "You are the driver's assistant. Briefly tell the driver how to \
correct their driving, in a light tone and under thirty words.";

pub const SPEAKING_RATE: f32 = 1.35;

#[derive(Debug, Serialize)]
struct NarrationRequest<'a> {
    text: &'a str,
    instruction: &'a str,
    speaking_rate: f32,
}

/// Sends text to a speech gateway over HTTP, saves the returned audio and
/// plays it with an external player
#[derive(Clone)]
pub struct HttpNarrator {
    client: Client,
    url: String,
    api_key: Option<String>,
    audio_dir: PathBuf,
    player: String,
}

impl HttpNarrator {
    pub fn new(
        url: impl Into<String>,
        api_key: Option<String>,
        audio_dir: impl Into<PathBuf>,
        player: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
            api_key,
            audio_dir: audio_dir.into(),
            player: player.into(),
        }
    }

    async fn fetch_audio(&self, text: &str) -> Result<Vec<u8>, NarrationError> {
        let mut request = self.client.post(&self.url).json(&NarrationRequest {
            text,
            instruction: COACH_INSTRUCTION,
            speaking_rate: SPEAKING_RATE,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(NarrationError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let audio = response.bytes().await?;
        if audio.is_empty() {
            return Err(NarrationError::EmptyAudio);
        }
        Ok(audio.to_vec())
    }
}

#[async_trait::async_trait]
impl Narrator for HttpNarrator {
    async fn synthesize_and_play(&self, text: &str) -> Result<(), NarrationError> {
        let audio = self.fetch_audio(text).await?;

        tokio::fs::create_dir_all(&self.audio_dir)
            .await
            .map_err(NarrationError::Io)?;
        let path = self.audio_dir.join(format!(
            "narration_{}.mp3",
            Local::now().format("%Y%m%d_%H%M%S_%3f")
        ));
        tokio::fs::write(&path, &audio)
            .await
            .map_err(NarrationError::Io)?;
        debug!(path = %path.display(), bytes = audio.len(), "Narration audio saved");

        let status = Command::new(&self.player)
            .arg(&path)
            .status()
            .await
            .map_err(NarrationError::Player)?;
        if !status.success() {
            return Err(NarrationError::PlayerExit(status.code()));
        }
        Ok(())
    }
}

/// Logs the text instead of speaking it
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentNarrator;

#[async_trait::async_trait]
impl Narrator for SilentNarrator {
    async fn synthesize_and_play(&self, text: &str) -> Result<(), NarrationError> {
        info!(text, "Narration");
        Ok(())
    }
}

/// Narration errors
#[derive(Debug, thiserror::Error)]
pub enum NarrationError {
    #[error("Speech request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Speech service error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Speech service returned no audio")]
    EmptyAudio,

    #[error("Failed to save audio: {0}")]
    Io(#[source] std::io::Error),

    #[error("Failed to start audio player: {0}")]
    Player(#[source] std::io::Error),

    #[error("Audio player exited with {0:?}")]
    PlayerExit(Option<i32>),
}
