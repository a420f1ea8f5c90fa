use std::fmt;
use reqwest::Url;
use crate::models::SessionError;

/// Where the collaboration server lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub secure: bool,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, secure: bool) -> Self {
        Self { host: host.into(), secure }
    }

    /// Build `{ws|wss}://{host}/ws/projects/{document_id}?token={token}`.
    ///
    /// The document id is encoded as one path segment and the token as a
    /// query value.
    pub fn target(&self, document_id: &str, token: &str) -> Result<String, SessionError> {
        let mut url = Url::parse(&format!("{}/", self))
            .map_err(|e| SessionError::InvalidTarget(format!("{}: {}", self.host, e)))?;

        url.path_segments_mut()
            .map_err(|_| SessionError::InvalidTarget(format!("{} cannot carry a path", self.host)))?
            .clear()
            .extend(["ws", "projects", document_id]);
        url.query_pairs_mut().append_pair("token", token);

        Ok(url.to_string())
    }

    pub fn scheme(&self) -> &'static str {
        if self.secure { "wss" } else { "ws" }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme(), self.host)
    }
}
