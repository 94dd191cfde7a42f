use thiserror::Error;

/// Result type alias for probe operations.
pub type ProbeResult<T> = Result<T, ProbeError>;

/// Everything that can go wrong while probing credentials.
///
/// Only [`ProbeError::EndpointUnavailable`] is fatal, and only at startup.
/// The rest are logged by the probe loop and either trigger an immediate
/// retry (MSI failures) or are absorbed (ARM failures, token mismatch).
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("MSI endpoint unavailable ({endpoint}): {reason}")]
    EndpointUnavailable { endpoint: String, reason: String },

    #[error("failed to acquire a token from MSI: {message}")]
    Acquisition { message: String },

    #[error("failed to refresh token from msiEndpoint({endpoint}): {message}")]
    Refresh { endpoint: String, message: String },

    #[error("zero token found, msiEndpoint({endpoint})")]
    ZeroToken { endpoint: String },

    #[error("failed to create authorizer from environment: {message}")]
    Auth { message: String },

    #[error("failed to list virtual machines: {message}")]
    List { message: String },

    #[error("system-assigned and user-assigned tokens differ")]
    TokenMismatch,
}

impl ProbeError {
    /// Whether this error should stop the process.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ProbeError::EndpointUnavailable { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_endpoint_resolution_is_fatal() {
        let fatal = ProbeError::EndpointUnavailable {
            endpoint: "nope".into(),
            reason: "relative URL without a base".into(),
        };
        assert!(fatal.is_fatal());

        let absorbed = [
            ProbeError::Acquisition { message: "x".into() },
            ProbeError::Refresh { endpoint: "e".into(), message: "x".into() },
            ProbeError::ZeroToken { endpoint: "e".into() },
            ProbeError::Auth { message: "x".into() },
            ProbeError::List { message: "x".into() },
            ProbeError::TokenMismatch,
        ];
        assert!(absorbed.iter().all(|e| !e.is_fatal()));
    }

    #[test]
    fn refresh_error_names_the_endpoint() {
        let err = ProbeError::Refresh {
            endpoint: "http://169.254.169.254/metadata/identity/oauth2/token".into(),
            message: "HTTP 400".into(),
        };
        assert_eq!(
            err.to_string(),
            "failed to refresh token from msiEndpoint(http://169.254.169.254/metadata/identity/oauth2/token): HTTP 400"
        );
    }
}
