//! Inner message protocol.
//!
//! An authenticated inner message is a JSON object `{type, resolve_id, origin, ...}`.
//! Validation happens in two steps:
//!
//! 1. [`MessageHeader::parse`] insists on `type` and `resolve_id`.
//! 2. [`Request::parse`] checks the per-type required fields declared by
//!    [`RequestKind::required_fields`] and extracts them into a typed variant.

use serde_json::{Map, Value};

use crate::errors::HubError;

/// A decoded JSON object.
pub type Fields = Map<String, Value>;

/// The closed set of request types the hub understands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// Announce a module's listening port.
    ModuleStart,
    /// Invalidate a session and broadcast the logout.
    UserLogout,
    /// Look up one user by name.
    GetUser,
    /// List every user.
    GetUserList,
    /// Resolve an access token to its user.
    TokenValidation,
    /// Renew an access token's TTL.
    UpdateTokenTtl,
    /// Look up a user's role.
    CheckPermission,
    /// List registered modules and their ports.
    GetRunningModules,
    /// Point-to-point message to another module.
    MessageModule,
    /// Reply to an earlier `message_module`.
    MessageModuleResponse,
    /// Read a template.
    GetTemplate,
    /// Write a template.
    PutTemplate,
}

impl RequestKind {
    /// Every request kind.
    pub const ALL: [Self; 12] = [
        Self::ModuleStart,
        Self::UserLogout,
        Self::GetUser,
        Self::GetUserList,
        Self::TokenValidation,
        Self::UpdateTokenTtl,
        Self::CheckPermission,
        Self::GetRunningModules,
        Self::MessageModule,
        Self::MessageModuleResponse,
        Self::GetTemplate,
        Self::PutTemplate,
    ];

    /// Wire name of this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ModuleStart => "module_start",
            Self::UserLogout => "user_logout",
            Self::GetUser => "get_user",
            Self::GetUserList => "get_user_list",
            Self::TokenValidation => "token_validation",
            Self::UpdateTokenTtl => "update_token_ttl",
            Self::CheckPermission => "check_permission",
            Self::GetRunningModules => "get_running_modules",
            Self::MessageModule => "message_module",
            Self::MessageModuleResponse => "message_module_response",
            Self::GetTemplate => "get_template",
            Self::PutTemplate => "put_template",
        }
    }

    /// Look up a kind by its wire name.
    pub fn from_type(message_type: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == message_type)
    }

    /// Fields that must be present (and non-null) for this kind.
    pub fn required_fields(self) -> &'static [&'static str] {
        match self {
            Self::ModuleStart => &["module_name", "port"],
            Self::GetUser | Self::CheckPermission => &["username"],
            Self::TokenValidation | Self::UpdateTokenTtl => &["access_token"],
            Self::MessageModule | Self::MessageModuleResponse => &["to"],
            Self::GetTemplate => &["template_name"],
            Self::PutTemplate => &["template_name", "template"],
            Self::UserLogout | Self::GetUserList | Self::GetRunningModules => &[],
        }
    }
}

/// Fields every request must carry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageHeader {
    /// Request type string, not yet matched against [`RequestKind`].
    pub message_type: String,
    /// Caller-chosen correlation token.
    pub resolve_id: String,
}

/// A message that failed header validation, with whatever can be echoed back.
#[derive(Debug)]
pub struct HeaderRejection {
    /// The `type` string, if one was present.
    pub message_type: Option<String>,
    /// The `resolve_id`, if one was present.
    pub resolve_id: Option<String>,
    /// What was wrong.
    pub error: HubError,
}

impl MessageHeader {
    /// Extract `type` and `resolve_id`.
    ///
    /// `resolve_id` is echoed in the rejection only when it was present.
    pub fn parse(fields: &Fields) -> Result<Self, HeaderRejection> {
        let message_type = fields.get("type").and_then(Value::as_str).map(str::to_owned);
        let resolve_id = fields
            .get("resolve_id")
            .and_then(Value::as_str)
            .map(str::to_owned);

        match (message_type, resolve_id) {
            (Some(message_type), Some(resolve_id)) => Ok(Self {
                message_type,
                resolve_id,
            }),
            (None, resolve_id) => Err(HeaderRejection {
                message_type: None,
                resolve_id,
                error: header_error(fields, "type"),
            }),
            (message_type, None) => Err(HeaderRejection {
                message_type,
                resolve_id: None,
                error: header_error(fields, "resolve_id"),
            }),
        }
    }
}

fn header_error(fields: &Fields, field: &str) -> HubError {
    match fields.get(field) {
        None | Some(Value::Null) => HubError::missing_field(field),
        Some(_) => HubError::invalid_field(field, "a string"),
    }
}

/// A validated request. Only fields the hub itself reads are extracted;
/// forwards keep the original frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Request {
    /// `module_start`.
    ModuleStart {
        /// Name to register.
        module_name: String,
        /// Port the module listens on.
        port: u16,
    },
    /// `user_logout`.
    UserLogout {
        /// Token to drop from the cache, if the caller sent one.
        access_token: Option<String>,
    },
    /// `get_user`.
    GetUser {
        /// Username to look up.
        username: String,
    },
    /// `get_user_list`.
    GetUserList,
    /// `token_validation`.
    TokenValidation {
        /// Token to resolve.
        access_token: String,
    },
    /// `update_token_ttl`.
    UpdateTokenTtl {
        /// Token to renew.
        access_token: String,
    },
    /// `check_permission`.
    CheckPermission {
        /// Username to look up.
        username: String,
    },
    /// `get_running_modules`.
    GetRunningModules,
    /// `message_module`.
    MessageModule {
        /// Addressed module.
        to: String,
    },
    /// `message_module_response`.
    MessageModuleResponse {
        /// Addressed module.
        to: String,
    },
    /// `get_template`.
    GetTemplate {
        /// Template name.
        template_name: String,
    },
    /// `put_template`.
    PutTemplate {
        /// Template name.
        template_name: String,
        /// Template body.
        template: String,
    },
}

impl Request {
    /// Validate `fields` against `kind`'s schema and extract a typed request.
    pub fn parse(kind: RequestKind, fields: &Fields) -> Result<Self, HubError> {
        if let Some(missing) = kind
            .required_fields()
            .iter()
            .find(|field| fields.get(**field).is_none_or(Value::is_null))
        {
            return Err(HubError::missing_field(missing));
        }

        let request = match kind {
            RequestKind::ModuleStart => Self::ModuleStart {
                module_name: name_field(fields, "module_name")?,
                port: port_field(fields, "port")?,
            },
            RequestKind::UserLogout => Self::UserLogout {
                access_token: fields
                    .get("access_token")
                    .and_then(Value::as_str)
                    .map(str::to_owned),
            },
            RequestKind::GetUser => Self::GetUser {
                username: text_field(fields, "username")?,
            },
            RequestKind::GetUserList => Self::GetUserList,
            RequestKind::TokenValidation => Self::TokenValidation {
                access_token: text_field(fields, "access_token")?,
            },
            RequestKind::UpdateTokenTtl => Self::UpdateTokenTtl {
                access_token: text_field(fields, "access_token")?,
            },
            RequestKind::CheckPermission => Self::CheckPermission {
                username: text_field(fields, "username")?,
            },
            RequestKind::GetRunningModules => Self::GetRunningModules,
            RequestKind::MessageModule => Self::MessageModule {
                to: name_field(fields, "to")?,
            },
            RequestKind::MessageModuleResponse => Self::MessageModuleResponse {
                to: name_field(fields, "to")?,
            },
            RequestKind::GetTemplate => Self::GetTemplate {
                template_name: name_field(fields, "template_name")?,
            },
            RequestKind::PutTemplate => Self::PutTemplate {
                template_name: name_field(fields, "template_name")?,
                template: text_field(fields, "template")?,
            },
        };
        Ok(request)
    }

    /// The kind this request was parsed as.
    pub fn kind(&self) -> RequestKind {
        match self {
            Self::ModuleStart { .. } => RequestKind::ModuleStart,
            Self::UserLogout { .. } => RequestKind::UserLogout,
            Self::GetUser { .. } => RequestKind::GetUser,
            Self::GetUserList => RequestKind::GetUserList,
            Self::TokenValidation { .. } => RequestKind::TokenValidation,
            Self::UpdateTokenTtl { .. } => RequestKind::UpdateTokenTtl,
            Self::CheckPermission { .. } => RequestKind::CheckPermission,
            Self::GetRunningModules => RequestKind::GetRunningModules,
            Self::MessageModule { .. } => RequestKind::MessageModule,
            Self::MessageModuleResponse { .. } => RequestKind::MessageModuleResponse,
            Self::GetTemplate { .. } => RequestKind::GetTemplate,
            Self::PutTemplate { .. } => RequestKind::PutTemplate,
        }
    }
}

fn text_field(fields: &Fields, field: &str) -> Result<String, HubError> {
    fields
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| HubError::invalid_field(field, "a string"))
}

fn name_field(fields: &Fields, field: &str) -> Result<String, HubError> {
    let value = text_field(fields, field)?;
    if value.trim().is_empty() {
        return Err(HubError::invalid_field(field, "a non-empty string"));
    }
    Ok(value)
}

fn port_field(fields: &Fields, field: &str) -> Result<u16, HubError> {
    fields
        .get(field)
        .and_then(Value::as_u64)
        .and_then(|port| u16::try_from(port).ok())
        .ok_or_else(|| HubError::invalid_field(field, "a port number"))
}
