use thiserror::Error;

/// Errors raised while resolving, queueing or running a scrape workflow.
///
/// Three families matter to callers:
/// - configuration errors ([`is_client_error`](Self::is_client_error)) are
///   raised before any browser interaction;
/// - soft failures ([`is_soft`](Self::is_soft)) mean a UI element could not be
///   located and end up as a `success:false` payload;
/// - everything else is an infrastructure failure of the browser or queue.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("Unknown booking source: {0}")]
    UnknownSource(String),

    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),

    #[error("Invalid parameter {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("Failed to launch browser: {0}")]
    Launch(String),

    #[error("Navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("Browser automation error: {0}")]
    Automation(String),

    #[error("{0}")]
    ElementNotFound(String),

    #[error("Scrape queue is closed")]
    QueueClosed,

    #[error("Scrape job aborted: {0}")]
    JobAborted(String),
}

impl ScrapeError {
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ScrapeError::UnknownSource(_)
                | ScrapeError::MissingParameter(_)
                | ScrapeError::InvalidParameter { .. }
        )
    }

    pub fn is_soft(&self) -> bool {
        matches!(self, ScrapeError::ElementNotFound(_))
    }

    /// Errors that leave the shared browser in an unknown state.
    pub fn poisons_browser(&self) -> bool {
        matches!(
            self,
            ScrapeError::Navigation { .. } | ScrapeError::Automation(_)
        )
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        ScrapeError::ElementNotFound(what.into())
    }

    pub(crate) fn automation(err: impl std::fmt::Display) -> Self {
        ScrapeError::Automation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(ScrapeError::UnknownSource("x".into()).is_client_error());
        assert!(ScrapeError::MissingParameter("especialidad").is_client_error());
        assert!(!ScrapeError::Launch("boom".into()).is_client_error());

        assert!(ScrapeError::not_found("Especialidad no encontrada").is_soft());
        assert!(!ScrapeError::QueueClosed.is_soft());

        let nav = ScrapeError::Navigation {
            url: "https://example.test".into(),
            reason: "timeout".into(),
        };
        assert!(nav.poisons_browser());
        assert!(!ScrapeError::not_found("x").poisons_browser());
    }

    #[test]
    fn test_error_display() {
        let err = ScrapeError::MissingParameter("profesional");
        assert_eq!(err.to_string(), "Missing required parameter: profesional");

        let err = ScrapeError::not_found("Profesional no encontrado: Ana");
        assert_eq!(err.to_string(), "Profesional no encontrado: Ana");
    }
}
