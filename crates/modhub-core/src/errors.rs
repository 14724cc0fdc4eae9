//! Hub error taxonomy and wire reason codes.
//!
//! Every failure the hub reports to a module carries one of the stable
//! `reason` strings below. The `Display` text of [`HubError`] is for logs; only
//! [`HubError::description`] ever reaches the wire, and only for format errors.

use thiserror::Error;

// ── Reason codes ────────────────────────────────────────────────────

/// Envelope could not be authenticated (parse, key, signature or origin).
pub const SIGNATURE_VERIFICATION_ERROR: &str = "signature_verification_error";
/// Required field missing or of the wrong type.
pub const MESSAGE_FORMAT_ERROR: &str = "message_format_error";
/// Message `type` is not part of the protocol.
pub const PROTOCOL_ERROR: &str = "protocol_error";
/// A module with this name is already registered.
pub const ALREADY_RUNNING: &str = "already_running";
/// No live connection for the addressed module.
pub const MODULE_OFFLINE: &str = "module_offline";
/// The user directory has no such user.
pub const USER_NOT_FOUND: &str = "user_not_found";
/// Token absent from the cache or expired.
pub const INVALID_TOKEN: &str = "invalid_token";
/// The template store has no such template.
pub const TEMPLATE_NOT_FOUND: &str = "template_not_found";
/// The user directory failed.
pub const DIRECTORY_ERROR: &str = "directory_error";
/// The template store failed.
pub const TEMPLATE_ERROR: &str = "template_error";

/// Failure reported by an external collaborator (user directory, template store).
#[derive(Debug, Error)]
pub enum CollaboratorError {
    /// The backing store failed.
    #[error("collaborator backend error: {0}")]
    Backend(String),
    /// Filesystem I/O failed.
    #[error("collaborator I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Stored data could not be decoded.
    #[error("collaborator data error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Error raised while validating or executing one inbound message.
///
/// None of these close the connection; each maps to a single failure response.
#[derive(Debug, Error)]
pub enum HubError {
    /// The envelope failed authentication.
    #[error("signature verification failed")]
    Authentication,

    /// A required field is missing or malformed.
    #[error("{description}")]
    Format {
        /// Which field is wrong, and how.
        description: String,
    },

    /// `module_start` for a name that is already registered.
    #[error("module '{module_name}' is already running")]
    AlreadyRunning {
        /// The contested module name.
        module_name: String,
    },

    /// Routing target has no live connection.
    #[error("module '{module}' is offline")]
    ModuleOffline {
        /// The addressed module.
        module: String,
    },

    /// The user directory has no such user.
    #[error("user '{username}' not found")]
    UserNotFound {
        /// Requested username.
        username: String,
    },

    /// Token absent from the cache or expired.
    #[error("access token not found or expired")]
    InvalidToken,

    /// The template store has no such template.
    #[error("template '{name}' not found")]
    TemplateNotFound {
        /// Requested template name.
        name: String,
    },

    /// Unrecognized message `type`.
    #[error("unrecognized message type '{message_type}'")]
    Protocol {
        /// The offending type string.
        message_type: String,
    },

    /// The user directory failed.
    #[error("user directory failed: {0}")]
    Directory(#[source] CollaboratorError),

    /// The template store failed.
    #[error("template store failed: {0}")]
    Template(#[source] CollaboratorError),
}

impl HubError {
    /// Build a format error for a missing field.
    pub fn missing_field(field: &str) -> Self {
        Self::Format {
            description: format!("missing required field '{field}'"),
        }
    }

    /// Build a format error for a field with the wrong JSON type or range.
    pub fn invalid_field(field: &str, expected: &str) -> Self {
        Self::Format {
            description: format!("field '{field}' must be {expected}"),
        }
    }

    /// Machine-readable reason for this error.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Authentication => SIGNATURE_VERIFICATION_ERROR,
            Self::Format { .. } => MESSAGE_FORMAT_ERROR,
            Self::AlreadyRunning { .. } => ALREADY_RUNNING,
            Self::ModuleOffline { .. } => MODULE_OFFLINE,
            Self::UserNotFound { .. } => USER_NOT_FOUND,
            Self::InvalidToken => INVALID_TOKEN,
            Self::TemplateNotFound { .. } => TEMPLATE_NOT_FOUND,
            Self::Protocol { .. } => PROTOCOL_ERROR,
            Self::Directory(_) => DIRECTORY_ERROR,
            Self::Template(_) => TEMPLATE_ERROR,
        }
    }

    /// Wire-safe description. Only format errors carry one.
    pub fn description(&self) -> Option<String> {
        match self {
            Self::Format { description } => Some(description.clone()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_field_is_format_error() {
        let err = HubError::missing_field("port");
        assert_eq!(err.reason(), MESSAGE_FORMAT_ERROR);
        assert_eq!(
            err.description().as_deref(),
            Some("missing required field 'port'")
        );
    }

    #[test]
    fn invalid_field_names_expectation() {
        let err = HubError::invalid_field("port", "a port number");
        assert!(err.to_string().contains("a port number"));
    }

    #[test]
    fn reasons_are_stable() {
        let cases = [
            (HubError::Authentication, SIGNATURE_VERIFICATION_ERROR),
            (
                HubError::AlreadyRunning { module_name: "a".into() },
                ALREADY_RUNNING,
            ),
            (HubError::ModuleOffline { module: "b".into() }, MODULE_OFFLINE),
            (HubError::UserNotFound { username: "u".into() }, USER_NOT_FOUND),
            (HubError::InvalidToken, INVALID_TOKEN),
            (HubError::TemplateNotFound { name: "t".into() }, TEMPLATE_NOT_FOUND),
            (HubError::Protocol { message_type: "x".into() }, PROTOCOL_ERROR),
            (
                HubError::Directory(CollaboratorError::Backend("down".into())),
                DIRECTORY_ERROR,
            ),
            (
                HubError::Template(CollaboratorError::Backend("disk".into())),
                TEMPLATE_ERROR,
            ),
        ];
        for (err, reason) in cases {
            assert_eq!(err.reason(), reason);
        }
    }

    #[test]
    fn non_format_errors_have_no_description() {
        let err = HubError::Directory(CollaboratorError::Backend(
            "connection refused at 10.0.0.3:5432".into(),
        ));
        assert!(err.description().is_none());
    }

    #[test]
    fn io_converts_into_collaborator_error() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: CollaboratorError = io.into();
        assert!(matches!(err, CollaboratorError::Io(_)));
    }
}
