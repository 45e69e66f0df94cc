use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{info, warn};

use crate::{Result, Storage, THEME_KEY, USER_ID_KEY, USER_NAME_KEY};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Dark,
    Light,
}

impl Theme {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Dark => "dark",
            Self::Light => "light",
        }
    }
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Theme {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dark" => Ok(Self::Dark),
            "light" => Ok(Self::Light),
            other => Err(format!("unknown theme: {}", other)),
        }
    }
}

/// Identity of this profile in shared sessions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalIdentity {
    pub id: String,
    pub name: String,
}

impl LocalIdentity {
    pub fn generate() -> Self {
        let id = uuid::Uuid::new_v4().simple().to_string();
        let name = default_user_name(&id);
        Self { id, name }
    }
}

pub fn default_user_name(id: &str) -> String {
    let prefix: String = id.chars().take(4).collect();
    format!("User-{}", prefix)
}

/// Scalars kept next to the note collection, loaded once at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preferences {
    pub theme: Theme,
    pub identity: LocalIdentity,
}

impl Preferences {
    /// Read preferences, creating and storing a local identity on first run.
    pub fn load<S: Storage>(storage: &mut S) -> Result<Self> {
        let theme = match storage.get(THEME_KEY)? {
            Some(raw) => raw.parse().unwrap_or_else(|e| {
                warn!("Ignoring stored theme: {}", e);
                Theme::default()
            }),
            None => Theme::default(),
        };

        let mut identity = match storage.get(USER_ID_KEY)?.filter(|id| !id.trim().is_empty()) {
            Some(id) => LocalIdentity {
                name: default_user_name(&id),
                id,
            },
            None => {
                let identity = LocalIdentity::generate();
                info!("Generated local user id {}", identity.id);
                identity
            }
        };
        if let Some(name) = storage
            .get(USER_NAME_KEY)?
            .filter(|name| !name.trim().is_empty())
        {
            identity.name = name;
        }

        storage.set(USER_ID_KEY, &identity.id)?;
        storage.set(USER_NAME_KEY, &identity.name)?;

        Ok(Self { theme, identity })
    }

    pub fn set_theme<S: Storage>(&mut self, storage: &mut S, theme: Theme) -> Result<()> {
        storage.set(THEME_KEY, theme.as_str())?;
        self.theme = theme;
        Ok(())
    }

    pub fn set_user_name<S: Storage>(&mut self, storage: &mut S, name: &str) -> Result<()> {
        let name = name.trim();
        let name = if name.is_empty() {
            default_user_name(&self.identity.id)
        } else {
            name.to_string()
        };
        storage.set(USER_NAME_KEY, &name)?;
        self.identity.name = name;
        Ok(())
    }
}
