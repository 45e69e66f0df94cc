use notes::{LocalIdentity, Preferences, Theme};
use std::time::Duration;
use url::Url;

use crate::{Result, SessionError};

/// Quiet period after the last local edit before it is written to storage
pub const DEFAULT_AUTOSAVE_DEBOUNCE: Duration = Duration::from_millis(2000);
pub const DEFAULT_SHARE_BASE_URL: &str = "http://localhost:3000/";

/// Startup configuration handed to a `DocumentSession`
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub preferences: Preferences,
    pub autosave_debounce: Duration,
    /// Shareable links are this URL plus an `id` query parameter
    pub share_base_url: Url,
}

impl SessionConfig {
    pub fn from_preferences(preferences: Preferences) -> Self {
        Self {
            preferences,
            autosave_debounce: DEFAULT_AUTOSAVE_DEBOUNCE,
            share_base_url: Url::parse(DEFAULT_SHARE_BASE_URL)
                .expect("default share url is valid"),
        }
    }

    pub fn with_autosave_debounce(mut self, debounce: Duration) -> Self {
        self.autosave_debounce = debounce;
        self
    }

    pub fn with_share_base_url(mut self, base: &str) -> Result<Self> {
        self.share_base_url =
            Url::parse(base).map_err(|e| SessionError::InvalidLink(format!("{}: {}", base, e)))?;
        Ok(self)
    }

    pub fn identity(&self) -> &LocalIdentity {
        &self.preferences.identity
    }

    pub fn theme(&self) -> Theme {
        self.preferences.theme
    }
}
