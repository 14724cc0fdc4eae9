//! Protocol Dispatcher.
//!
//! Each inbound frame goes through authenticate, identity binding, header
//! check, typed parse and handler, in that order. Broadcasts and forwards are enqueued while the
//! handler runs; the direct reply (if any) is returned so the caller enqueues it
//! afterwards, which puts a sender's own copy of a broadcast ahead of its
//! response.

use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use modhub_auth::{Authenticator, TokenCache, VerificationMode};
use modhub_core::protocol::{Fields, MessageHeader};
use modhub_core::templates::TemplateStore;
use modhub_core::users::{UserDirectory, UserRecord};
use modhub_core::{ConnectionId, HubError, Request, RequestKind, Response};
use serde_json::{Map, Value, json};
use tracing::{Instrument, debug, info, info_span, warn};

use super::registry::{AttachError, ConnectionRegistry};
use crate::metrics::{
    HUB_CONNECTIONS_ACTIVE, HUB_CONNECTIONS_TOTAL, HUB_DISCONNECTIONS_TOTAL,
    HUB_DISPATCH_DURATION_SECONDS, HUB_ERRORS_TOTAL, HUB_MESSAGES_TOTAL,
};
use crate::websocket::broadcast::BroadcastManager;
use crate::websocket::connection::ModuleConnection;

/// Name under which the hub registers its own HTTP port.
pub const PLATFORM_MODULE: &str = "platform";

/// The hub: registry, authenticator, token cache and collaborators.
pub struct Hub {
    authenticator: Authenticator,
    registry: Arc<ConnectionRegistry>,
    broadcast: BroadcastManager,
    tokens: Arc<TokenCache>,
    users: Arc<dyn UserDirectory>,
    templates: Arc<dyn TemplateStore>,
}

impl Hub {
    /// Assemble a hub.
    pub fn new(
        authenticator: Authenticator,
        registry: Arc<ConnectionRegistry>,
        tokens: Arc<TokenCache>,
        users: Arc<dyn UserDirectory>,
        templates: Arc<dyn TemplateStore>,
    ) -> Self {
        Self {
            authenticator,
            broadcast: BroadcastManager::new(registry.clone()),
            registry,
            tokens,
            users,
            templates,
        }
    }

    /// Connection registry.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Token cache.
    pub fn tokens(&self) -> &Arc<TokenCache> {
        &self.tokens
    }

    /// Broadcast manager.
    pub fn broadcast(&self) -> &BroadcastManager {
        &self.broadcast
    }

    /// Whether signature checks are skipped.
    pub fn verification_skipped(&self) -> bool {
        self.authenticator.mode() == VerificationMode::InsecureSkip
    }

    /// Register the hub's own HTTP port as running module `platform`.
    pub fn register_platform(&self, port: u16) -> Result<(), HubError> {
        self.registry.register_module(PLATFORM_MODULE, port, None)?;
        info!(port, "platform registered");
        Ok(())
    }

    /// Pre-upgrade admission check for a module declaring `identity`.
    ///
    /// With verification enforced, only identities the key store knows may
    /// connect.
    pub fn admit(&self, identity: &str) -> Result<(), AttachError> {
        self.check_known(identity)?;
        self.registry.check_admission(identity)
    }

    fn check_known(&self, identity: &str) -> Result<(), AttachError> {
        if self.verification_skipped() || self.authenticator.keys().get(identity).is_some() {
            Ok(())
        } else {
            Err(AttachError::UnknownIdentity(identity.to_owned()))
        }
    }

    /// Record a newly opened connection.
    ///
    /// The connection stays pending until its first authenticated frame, except
    /// when verification is skipped.
    pub fn open(&self, connection: Arc<ModuleConnection>) -> Result<(), AttachError> {
        self.check_known(&connection.identity)?;
        let id = connection.id.clone();
        let module = connection.identity.clone();
        self.registry.attach(connection)?;
        if self.verification_skipped() {
            if let Err(e) = self.registry.confirm(&id) {
                let _ = self.registry.detach(&id);
                return Err(e);
            }
            warn!(connection_id = %id, module, "signature verification is disabled");
        }
        counter!(HUB_CONNECTIONS_TOTAL).increment(1);
        gauge!(HUB_CONNECTIONS_ACTIVE).increment(1.0);
        info!(connection_id = %id, module, "module connected");
        Ok(())
    }

    /// Bind `conn` to its identity, adding it to the broadcast set.
    pub fn confirm(&self, conn: &ModuleConnection) -> Result<(), AttachError> {
        if self.registry.confirm(&conn.id)? {
            info!(connection_id = %conn.id, module = %conn.identity, "module authenticated");
        }
        Ok(())
    }

    /// Tear down a connection. Later lookups for it report `module_offline`.
    pub fn close(&self, id: &ConnectionId) {
        let Some(connection) = self.registry.get(id) else {
            return;
        };
        let dropped = self.registry.detach(id);
        counter!(HUB_DISCONNECTIONS_TOTAL).increment(1);
        gauge!(HUB_CONNECTIONS_ACTIVE).decrement(1.0);
        info!(
            connection_id = %id,
            module = %connection.identity,
            unregistered = ?dropped,
            dropped_messages = connection.drop_count(),
            "module disconnected"
        );
    }

    /// Drop the session of a deleted account and tell every module about it.
    pub fn announce_user_delete(&self, user_id: i64, access_token: &str) {
        let _ = self.tokens.remove(access_token);
        let message = json!({
            "type": "user_delete",
            "userid": user_id,
            "access_token": access_token,
        });
        let delivered = self.broadcast.broadcast_all(&message.to_string());
        info!(user_id, delivered, "account deletion announced");
    }

    /// Drop a session and tell every module it ended.
    pub fn announce_logout(&self, access_token: &str) {
        let removed = self.tokens.remove(access_token);
        let message = json!({"type": "user_logout", "access_token": access_token});
        let delivered = self.broadcast.broadcast_all(&message.to_string());
        info!(
            username = removed.as_ref().map(|e| e.username.as_str()),
            delivered,
            "logout announced"
        );
    }

    /// Handle one inbound frame from `conn`.
    ///
    /// Returns the direct reply for the sender, or `None` when the request
    /// produces none (a successful forward).
    pub async fn handle_frame(&self, conn: &ModuleConnection, frame: &str) -> Option<Response> {
        let inner = match self.authenticator.verify(frame) {
            Ok(inner) => inner,
            Err(failure) => {
                debug!(
                    connection_id = %conn.id,
                    module = %conn.identity,
                    error = %failure.error,
                    "envelope rejected"
                );
                counter!(HUB_ERRORS_TOTAL, "reason" => HubError::Authentication.reason())
                    .increment(1);
                return Some(Response::signature_verification_error(
                    failure.resolve_id.as_deref(),
                ));
            }
        };

        if !self.verification_skipped() {
            let origin = inner.get("origin").and_then(Value::as_str);
            if origin != Some(conn.identity.as_str()) {
                debug!(
                    connection_id = %conn.id,
                    module = %conn.identity,
                    origin,
                    "envelope signed for another identity"
                );
                counter!(HUB_ERRORS_TOTAL, "reason" => HubError::Authentication.reason())
                    .increment(1);
                return Some(Response::signature_verification_error(
                    inner.get("resolve_id").and_then(Value::as_str),
                ));
            }
            if let Err(e) = self.confirm(conn) {
                warn!(connection_id = %conn.id, error = %e, "identity taken by another connection");
                conn.kick();
                return None;
            }
        }

        let header = match MessageHeader::parse(&inner) {
            Ok(header) => header,
            Err(rejection) => {
                counter!(HUB_ERRORS_TOTAL, "reason" => rejection.error.reason()).increment(1);
                debug!(connection_id = %conn.id, error = %rejection.error, "bad message header");
                return Some(match rejection.message_type {
                    Some(message_type) => Response::failure(
                        &message_type,
                        rejection.resolve_id.as_deref(),
                        &rejection.error,
                    ),
                    None => Response::message_format_error(
                        rejection.resolve_id.as_deref(),
                        &rejection.error,
                    ),
                });
            }
        };

        let span = info_span!(
            "dispatch",
            connection_id = %conn.id,
            module = %conn.identity,
            message_type = %header.message_type,
            resolve_id = %header.resolve_id,
        );
        self.dispatch(conn, &header, &inner, frame)
            .instrument(span)
            .await
    }

    async fn dispatch(
        &self,
        conn: &ModuleConnection,
        header: &MessageHeader,
        inner: &Fields,
        frame: &str,
    ) -> Option<Response> {
        let started = Instant::now();
        let Some(kind) = RequestKind::from_type(&header.message_type) else {
            counter!(HUB_MESSAGES_TOTAL, "type" => "unknown").increment(1);
            let err = HubError::Protocol {
                message_type: header.message_type.clone(),
            };
            return Some(self.fail(header, &err));
        };
        counter!(HUB_MESSAGES_TOTAL, "type" => kind.as_str()).increment(1);

        let reply = match Request::parse(kind, inner) {
            Ok(request) => self.execute(conn, header, request, inner, frame).await,
            Err(err) => Some(Err(err)),
        };

        histogram!(HUB_DISPATCH_DURATION_SECONDS, "type" => kind.as_str())
            .record(started.elapsed().as_secs_f64());

        match reply {
            Some(Ok(response)) => Some(response),
            Some(Err(err)) => Some(self.fail(header, &err)),
            None => None,
        }
    }

    fn fail(&self, header: &MessageHeader, err: &HubError) -> Response {
        counter!(HUB_ERRORS_TOTAL, "reason" => err.reason()).increment(1);
        match err {
            HubError::Directory(_) | HubError::Template(_) => {
                warn!(error = %err, "collaborator failed");
            }
            _ => debug!(error = %err, "request failed"),
        }
        Response::failure(&header.message_type, Some(header.resolve_id.as_str()), err)
    }

    async fn execute(
        &self,
        conn: &ModuleConnection,
        header: &MessageHeader,
        request: Request,
        inner: &Fields,
        frame: &str,
    ) -> Option<Result<Response, HubError>> {
        let ok = || Response::success(&header.message_type, &header.resolve_id);

        let result = match request {
            Request::ModuleStart { module_name, port } => self
                .registry
                .register_module(&module_name, port, Some(conn.id.clone()))
                .map(|()| {
                    info!(module_name, port, "module started");
                    ok().with("status", "recognized")
                }),

            Request::UserLogout { access_token } => {
                if let Some(token) = &access_token {
                    let _ = self.tokens.remove(token);
                }
                let delivered = self
                    .broadcast
                    .broadcast_all(&Value::Object(inner.clone()).to_string());
                debug!(delivered, "logout broadcast");
                Ok(ok())
            }

            Request::GetUser { username } => self
                .find_user(&username)
                .await
                .map(|user| ok().with("user", user_json(&user))),

            Request::GetUserList => self
                .users
                .list_all()
                .await
                .map_err(HubError::Directory)
                .map(|users| {
                    let map: Map<String, Value> = users
                        .iter()
                        .map(|user| (user.username.clone(), user_json(user)))
                        .collect();
                    ok().with("users", Value::Object(map))
                }),

            Request::TokenValidation { access_token } => self
                .tokens
                .get(&access_token)
                .ok_or(HubError::InvalidToken)
                .map(|entry| ok().with("user", serde_json::to_value(entry).unwrap_or(Value::Null))),

            Request::UpdateTokenTtl { access_token } => self
                .tokens
                .get(&access_token)
                .ok_or(HubError::InvalidToken)
                .map(|_| ok()),

            Request::CheckPermission { username } => match self.find_user(&username).await {
                Ok(user) => match self.users.get_role(user.id).await {
                    Ok(Some(role)) => Ok(ok().with("username", username).with("role", role)),
                    Ok(None) => Err(HubError::UserNotFound { username }),
                    Err(e) => Err(HubError::Directory(e)),
                },
                Err(err) => Err(err),
            },

            Request::GetRunningModules => {
                let running: Map<String, Value> = self
                    .registry
                    .running_modules()
                    .into_iter()
                    .map(|(name, module)| (name, json!({"port": module.port})))
                    .collect();
                Ok(ok().with("running_modules", Value::Object(running)))
            }

            Request::MessageModule { to } => match self.broadcast.forward(&to, frame) {
                Ok(()) => return None,
                Err(err) => Err(err),
            },

            Request::MessageModuleResponse { to } => {
                if self.broadcast.forward(&to, frame).is_err() {
                    debug!(to, "response for offline module dropped");
                }
                return None;
            }

            Request::GetTemplate { template_name } => {
                match self.templates.read(&template_name).await {
                    Ok(Some(template)) => Ok(ok()
                        .with("template_name", template_name)
                        .with("template", template)),
                    Ok(None) => Err(HubError::TemplateNotFound {
                        name: template_name,
                    }),
                    Err(e) => Err(HubError::Template(e)),
                }
            }

            Request::PutTemplate {
                template_name,
                template,
            } => self
                .templates
                .write(&template_name, &template)
                .await
                .map_err(HubError::Template)
                .map(|()| ok().with("template_name", template_name)),
        };
        Some(result)
    }

    async fn find_user(&self, username: &str) -> Result<UserRecord, HubError> {
        self.users
            .lookup_by_name(username)
            .await
            .map_err(HubError::Directory)?
            .ok_or_else(|| HubError::UserNotFound {
                username: username.to_owned(),
            })
    }
}

fn user_json(user: &UserRecord) -> Value {
    serde_json::to_value(user).unwrap_or(Value::Null)
}
