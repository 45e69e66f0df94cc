use collaboration::DocumentId;
use url::Url;

use crate::{Result, SessionError};

/// Query parameter carrying the shared document id
pub const SHARE_QUERY_PARAM: &str = "id";

/// `base` with the document id as its only query parameter.
pub fn share_link(base: &Url, document_id: &DocumentId) -> Url {
    let mut url = base.clone();
    url.query_pairs_mut()
        .clear()
        .append_pair(SHARE_QUERY_PARAM, document_id.as_str());
    url
}

/// Where the application should start when opened from a URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchTarget {
    Local,
    Shared(DocumentId),
}

impl LaunchTarget {
    pub fn from_url(url: &Url) -> Self {
        url.query_pairs()
            .find(|(key, value)| key == SHARE_QUERY_PARAM && !value.trim().is_empty())
            .map(|(_, value)| Self::Shared(DocumentId::from(value.into_owned())))
            .unwrap_or(Self::Local)
    }

    pub fn parse(link: &str) -> Result<Self> {
        let url =
            Url::parse(link).map_err(|e| SessionError::InvalidLink(format!("{}: {}", link, e)))?;
        Ok(Self::from_url(&url))
    }
}
