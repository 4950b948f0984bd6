//! Error taxonomy for the orchestration core.
//!
//! Caller input errors ([`AgentError::EmptyPrompt`], [`AgentError::SessionMissing`])
//! are raised before any side effect. Store failures are wrapped with the
//! operation that failed and propagated. Provider and tool failures are first
//! recovered into a well-formed terminal message by the orchestrator and then
//! re-raised, so callers can react without reading the transcript.

use thiserror::Error;

/// Default title used when a provider error carries none.
pub const DEFAULT_PROVIDER_ERROR_TITLE: &str = "Provider Error";

/// Errors surfaced by the session agent.
#[derive(Error, Debug, Clone)]
pub enum AgentError {
    /// The call carried neither prompt text nor a text attachment.
    #[error("prompt is empty")]
    EmptyPrompt,

    /// The call did not name a session.
    #[error("session id is missing")]
    SessionMissing,

    /// A summarization (or follow-up suggestion) was requested while the
    /// session already had an active request.
    #[error("session is busy")]
    SessionBusy,

    /// The user cancelled the active request.
    #[error("request canceled")]
    Canceled,

    /// A tool execution was refused by the user.
    #[error("permission denied")]
    PermissionDenied,

    /// The model provider returned an error.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// A message or session store operation failed.
    #[error("{context}: {source}")]
    Store {
        context: String,
        #[source]
        source: StoreError,
    },

    /// Anything else, already wrapped with context.
    #[error("{0}")]
    Other(String),
}

impl AgentError {
    /// Build a `map_err` adapter that wraps a [`StoreError`] with the name of
    /// the operation that failed.
    ///
    /// ```ignore
    /// let session = sessions.get(id).await.map_err(AgentError::store("failed to get session"))?;
    /// ```
    pub fn store(context: &'static str) -> impl FnOnce(StoreError) -> AgentError {
        move |source| AgentError::Store {
            context: context.to_string(),
            source,
        }
    }

    /// Whether this error is a user-initiated cancellation.
    pub fn is_canceled(&self) -> bool {
        matches!(self, AgentError::Canceled)
    }

    /// Whether this error is a refused tool permission.
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, AgentError::PermissionDenied)
    }
}

/// Special-cased provider failures that get user-facing remediation text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProviderErrorKind {
    #[default]
    Generic,
    /// The account ran out of credits.
    NoCredits,
    /// The selected model is not enabled for the account.
    ModelNotEnabled,
}

/// A classified error reported by a model provider.
#[derive(Error, Debug, Clone, Default)]
#[error("{}", self.display_text())]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    /// Short title, e.g. "rate limited". May be empty.
    pub title: String,
    /// Human-readable detail.
    pub message: String,
    /// Where the user can fix the problem (billing page, model settings).
    pub remediation_url: Option<String>,
}

impl ProviderError {
    pub fn new(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn no_credits(remediation_url: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::NoCredits,
            title: "no credits".into(),
            message: "out of credits".into(),
            remediation_url: Some(remediation_url.into()),
        }
    }

    pub fn model_not_enabled(message: impl Into<String>, remediation_url: Option<String>) -> Self {
        Self {
            kind: ProviderErrorKind::ModelNotEnabled,
            title: "model not enabled".into(),
            message: message.into(),
            remediation_url,
        }
    }

    fn display_text(&self) -> String {
        if self.title.is_empty() {
            self.message.clone()
        } else {
            format!("{}: {}", self.title, self.message)
        }
    }
}

/// Errors from the message and session stores.
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    #[error("io error: {0}")]
    Io(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_adapter_wraps_context() {
        let err = AgentError::store("failed to list messages")(StoreError::not_found("session", "s1"));
        assert_eq!(
            err.to_string(),
            "failed to list messages: session 's1' not found"
        );
    }

    #[test]
    fn provider_error_display_with_and_without_title() {
        assert_eq!(
            ProviderError::new("rate limited", "slow down").to_string(),
            "rate limited: slow down"
        );
        assert_eq!(ProviderError::new("", "boom").to_string(), "boom");
    }

    #[test]
    fn provider_error_converts_into_agent_error() {
        let err: AgentError = ProviderError::no_credits("https://example.com/billing").into();
        match err {
            AgentError::Provider(p) => assert_eq!(p.kind, ProviderErrorKind::NoCredits),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn classification_helpers() {
        assert!(AgentError::Canceled.is_canceled());
        assert!(AgentError::PermissionDenied.is_permission_denied());
        assert!(!AgentError::EmptyPrompt.is_canceled());
    }
}
