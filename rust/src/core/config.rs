use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::conversation::ConversationConfig;
use crate::reconcile::ReconcileWindows;

use super::AppCore;

pub(crate) const CONFIG_FILE_NAME: &str = "parley_config.json";
const DEFAULT_HTTP_TIMEOUT_MS: u64 = 15_000;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub(crate) struct AppConfig {
    pub(crate) disable_network: Option<bool>,
    pub(crate) graphql_url: Option<String>,
    pub(crate) reply_webhook_url: Option<String>,
    pub(crate) http_timeout_ms: Option<u64>,
    pub(crate) optimistic_match_window_ms: Option<u64>,
    pub(crate) cross_origin_window_ms: Option<u64>,
    pub(crate) server_duplicate_window_ms: Option<u64>,
    pub(crate) send_debounce_ms: Option<u64>,
}

pub(crate) fn load_app_config(data_dir: &str) -> AppConfig {
    let path = Path::new(data_dir).join(CONFIG_FILE_NAME);
    let Ok(bytes) = std::fs::read(&path) else {
        return AppConfig::default();
    };
    match serde_json::from_slice::<AppConfig>(&bytes) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(path = %path.display(), err = %e, "ignoring malformed config");
            AppConfig::default()
        }
    }
}

pub(crate) fn default_app_config_json() -> String {
    let defaults = ConversationConfig::default();
    let doc = AppConfig {
        disable_network: Some(false),
        graphql_url: None,
        reply_webhook_url: None,
        http_timeout_ms: Some(DEFAULT_HTTP_TIMEOUT_MS),
        optimistic_match_window_ms: Some(millis(defaults.windows.optimistic_match)),
        cross_origin_window_ms: Some(millis(defaults.windows.cross_origin)),
        server_duplicate_window_ms: Some(millis(defaults.windows.server_duplicate)),
        send_debounce_ms: Some(millis(defaults.send_debounce)),
    };
    serde_json::to_string_pretty(&doc).unwrap_or_else(|_| "{}".to_string())
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
}

impl AppConfig {
    pub(crate) fn conversation_config(&self) -> ConversationConfig {
        let defaults = ConversationConfig::default();
        let ms = |v: Option<u64>, fallback: Duration| v.map(Duration::from_millis).unwrap_or(fallback);
        ConversationConfig {
            windows: ReconcileWindows {
                optimistic_match: ms(
                    self.optimistic_match_window_ms,
                    defaults.windows.optimistic_match,
                ),
                cross_origin: ms(self.cross_origin_window_ms, defaults.windows.cross_origin),
                server_duplicate: ms(
                    self.server_duplicate_window_ms,
                    defaults.windows.server_duplicate,
                ),
            },
            send_debounce: ms(self.send_debounce_ms, defaults.send_debounce),
        }
    }

    pub(crate) fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms.unwrap_or(DEFAULT_HTTP_TIMEOUT_MS))
    }

    pub(crate) fn graphql_url(&self) -> Option<String> {
        non_empty(self.graphql_url.as_deref())
    }

    pub(crate) fn reply_webhook_url(&self) -> Option<String> {
        non_empty(self.reply_webhook_url.as_deref()).or_else(|| {
            non_empty(std::env::var("PARLEY_REPLY_WEBHOOK_URL").ok().as_deref())
        })
    }
}

impl AppCore {
    pub(super) fn network_enabled(&self) -> bool {
        // Used to keep Rust tests deterministic and offline.
        if let Some(disable) = self.config.disable_network {
            return !disable;
        }
        std::env::var("PARLEY_DISABLE_NETWORK").ok().as_deref() != Some("1")
    }
}
