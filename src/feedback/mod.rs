//! Violation event log and spoken feedback

pub mod dispatcher;
pub mod event_log;
pub mod narrator;

pub use dispatcher::{spawn_worker, FeedbackDispatcher, FEEDBACK_QUEUE_CAPACITY};
pub use event_log::EventLog;
pub use narrator::{HttpNarrator, Narrator, SilentNarrator};

use std::sync::Arc;

use tracing::info;

use crate::config::Config;

/// HTTP narration when a gateway is configured, log-only otherwise
pub fn narrator_from_config(config: &Config) -> Arc<dyn Narrator> {
    match &config.narration_url {
        Some(url) => {
            info!(url = %url, player = %config.audio_player, "Narration enabled");
            Arc::new(HttpNarrator::new(
                url.clone(),
                config.narration_api_key.clone(),
                config.audio_dir.clone(),
                config.audio_player.clone(),
            ))
        }
        None => Arc::new(SilentNarrator),
    }
}
