//! Application-owned SDK session.
//!
//! A [`Session`] is created once by the host application and passed to the
//! places that report telemetry. [`Session::init`] resolves credentials,
//! validates them with the service, derives the plan entitlement and, when
//! the plan allows it, opens the streaming channel. `send_log` and
//! `send_metric` are fire-and-forget: they never fail and never block on
//! anything but the channel task.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::channel::{stream_url, Channel, ChannelOptions};
use crate::client::{ClientError, Credentials, StatusResponse, ValidationClient, ValidationResponse};
use crate::config::Config;
use crate::config_store::{ConfigStore, StoredConfig};
use crate::event::{LogLevel, LogMessage, OutboundEvent};
use crate::transport::{Transport, WebSocketTransport};

/// Environment variable holding the API key.
pub const API_KEY_ENV: &str = "PULSEWIRE_API_KEY";

/// Environment variable holding the instance identifier.
pub const INSTANCE_ID_ENV: &str = "PULSEWIRE_INSTANCE_ID";

/// Plan statuses that allow sending telemetry.
const SENDING_PLAN_STATUSES: &[&str] = &["active", "trial"];

/// Errors returned by [`Session`] operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Credentials are missing or local state could not be read.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The service rejected the credentials or could not be reached.
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("session is not initialized")]
    NotInitialized,
}

/// Options for [`Session::init`].
///
/// Each credential is taken from here first, then from the environment,
/// then from the local config file.
#[derive(Debug, Clone, Default)]
pub struct InitOptions {
    pub api_key: Option<String>,
    pub instance_id: Option<String>,
    /// Directory holding the local config file. Defaults to the working directory.
    pub config_dir: Option<PathBuf>,
}

impl InitOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = Some(instance_id.into());
        self
    }

    pub fn with_config_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config_dir = Some(dir.into());
        self
    }
}

/// Plan entitlement derived from the validation response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Entitlement {
    pub company_name: Option<String>,
    pub plan_status: Option<String>,
    pub plan_expiry: Option<String>,
    pub is_allowed_to_send: bool,
}

impl Entitlement {
    pub fn from_validation(response: ValidationResponse) -> Self {
        let is_allowed_to_send = plan_allows_sending(response.plan_status.as_deref());
        Self {
            company_name: response.company_name,
            plan_status: response.plan_status,
            plan_expiry: response.plan_expiry,
            is_allowed_to_send,
        }
    }
}

/// Whether a plan status permits sending telemetry.
pub fn plan_allows_sending(plan_status: Option<&str>) -> bool {
    plan_status.is_some_and(|status| SENDING_PLAN_STATUSES.contains(&status))
}

struct ActiveSession {
    credentials: Credentials,
    entitlement: Entitlement,
    channel: Option<Channel>,
}

/// SDK session: credentials, entitlement and the streaming channel.
///
/// # Example
///
/// ```no_run
/// use pulsewire::config::Config;
/// use pulsewire::event::LogLevel;
/// use pulsewire::session::{InitOptions, Session};
///
/// #[tokio::main]
/// async fn main() {
///     let mut session = Session::new(Config::default()).expect("Failed to create session");
///
///     if let Err(e) = session.init(InitOptions::new()).await {
///         eprintln!("Telemetry disabled: {}", e);
///     }
///
///     session.send_log("service started", LogLevel::Info).await;
/// }
/// ```
pub struct Session<T = WebSocketTransport> {
    config: Config,
    client: ValidationClient,
    transport: T,
    active: Option<ActiveSession>,
}

impl Session<WebSocketTransport> {
    /// Create an uninitialized session that streams over WebSocket.
    pub fn new(config: Config) -> Result<Self, SessionError> {
        Self::with_transport(config, WebSocketTransport::new())
    }
}

impl<T: Transport + Clone> Session<T> {
    /// Create an uninitialized session with a custom transport.
    pub fn with_transport(config: Config, transport: T) -> Result<Self, SessionError> {
        let client = ValidationClient::new(&config)?;
        Ok(Self {
            config,
            client,
            transport,
            active: None,
        })
    }

    /// Validate credentials and open the streaming channel.
    ///
    /// Any previous state is torn down first. On failure the session is left
    /// uninitialized; nothing from the failed attempt is kept.
    ///
    /// # Errors
    ///
    /// `Configuration` if a credential cannot be resolved (no request is
    /// made), `Client` if validation fails.
    pub async fn init(&mut self, options: InitOptions) -> Result<(), SessionError> {
        self.reset_state().await;

        match self.establish(options).await {
            Ok(active) => {
                info!(
                    instance_id = %active.credentials.instance_id,
                    plan_status = ?active.entitlement.plan_status,
                    allowed_to_send = active.entitlement.is_allowed_to_send,
                    "Pulsewire session initialized"
                );
                self.active = Some(active);
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Pulsewire initialization failed");
                self.reset_state().await;
                Err(e)
            }
        }
    }

    async fn establish(&self, options: InitOptions) -> Result<ActiveSession, SessionError> {
        let credentials = resolve_credentials(&options)?;

        let response = self.client.validate(&credentials).await?;
        let entitlement = Entitlement::from_validation(response);

        let channel = if entitlement.is_allowed_to_send {
            let url = stream_url(&self.config.stream_url, &credentials).map_err(|e| {
                SessionError::Configuration(format!(
                    "invalid stream URL '{}': {}",
                    self.config.stream_url, e
                ))
            })?;
            let channel = Channel::spawn(
                self.transport.clone(),
                url,
                ChannelOptions::from(&self.config),
            );
            if !channel.connect().await {
                warn!("Streaming channel unavailable, will reconnect on next send");
            }
            Some(channel)
        } else {
            warn!(
                plan_status = ?entitlement.plan_status,
                "Plan does not allow sending telemetry"
            );
            None
        };

        Ok(ActiveSession {
            credentials,
            entitlement,
            channel,
        })
    }

    /// Send a log line. Silently does nothing when sending is not possible.
    pub async fn send_log(&self, message: impl Into<LogMessage>, level: LogLevel) {
        let Some((active, channel)) = self.ready_channel().await else {
            return;
        };
        let event = OutboundEvent::log(active.credentials.instance_id.as_str(), level, message);
        dispatch(channel, &event).await;
    }

    /// Send a metric sample. Silently does nothing when sending is not possible.
    pub async fn send_metric(
        &self,
        name: impl Into<String>,
        value: f64,
        tags: HashMap<String, String>,
    ) {
        let Some((active, channel)) = self.ready_channel().await else {
            return;
        };
        let event =
            OutboundEvent::metric(active.credentials.instance_id.as_str(), name, value, tags);
        dispatch(channel, &event).await;
    }

    /// The channel to send on, after at most one reconnect attempt.
    async fn ready_channel(&self) -> Option<(&ActiveSession, &Channel)> {
        let active = self.active.as_ref()?;
        if !active.entitlement.is_allowed_to_send {
            return None;
        }
        let channel = active.channel.as_ref()?;

        if !channel.is_connected() && !channel.connect().await {
            debug!("Streaming channel reconnect failed, dropping event");
            return None;
        }
        Some((active, channel))
    }

    /// Query the service-side status of this session's instance.
    pub async fn check_status(&self) -> Result<StatusResponse, SessionError> {
        let active = self.active.as_ref().ok_or(SessionError::NotInitialized)?;
        let status = self
            .client
            .check_status(&active.credentials.instance_id, &active.credentials.api_key)
            .await?;
        Ok(status)
    }

    /// Close the channel and forget credentials and entitlement.
    pub async fn reset_state(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        if let Some(channel) = active.channel {
            channel.disconnect().await;
            channel.shutdown().await;
        }
        debug!(instance_id = %active.credentials.instance_id, "Pulsewire session reset");
    }

    pub fn is_initialized(&self) -> bool {
        self.active.is_some()
    }

    pub fn is_allowed_to_send(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| active.entitlement.is_allowed_to_send)
    }

    pub fn is_connected(&self) -> bool {
        self.active
            .as_ref()
            .and_then(|active| active.channel.as_ref())
            .is_some_and(Channel::is_connected)
    }

    pub fn entitlement(&self) -> Option<&Entitlement> {
        self.active.as_ref().map(|active| &active.entitlement)
    }

    pub fn instance_id(&self) -> Option<&str> {
        self.active
            .as_ref()
            .map(|active| active.credentials.instance_id.as_str())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

async fn dispatch(channel: &Channel, event: &OutboundEvent) {
    let frame = match event.to_frame() {
        Ok(frame) => frame,
        Err(e) => {
            warn!(kind = event.kind(), error = %e, "Failed to serialize event, dropping it");
            return;
        }
    };

    if !channel.send(frame).await {
        debug!(kind = event.kind(), "Event was not delivered");
    }
}

/// Resolve each credential from options, then environment, then the config file.
fn resolve_credentials(options: &InitOptions) -> Result<Credentials, SessionError> {
    let mut api_key = non_empty(options.api_key.clone()).or_else(|| env_value(API_KEY_ENV));
    let mut instance_id =
        non_empty(options.instance_id.clone()).or_else(|| env_value(INSTANCE_ID_ENV));

    if api_key.is_none() || instance_id.is_none() {
        if let Some(stored) = read_stored_config(options)? {
            api_key = api_key.or_else(|| non_empty(Some(stored.api_key)));
            instance_id = instance_id.or_else(|| non_empty(Some(stored.instance_id)));
        }
    }

    match (api_key, instance_id) {
        (Some(api_key), Some(instance_id)) => Ok(Credentials::new(api_key, instance_id)),
        (None, _) => Err(SessionError::Configuration(format!(
            "API key not found; pass it explicitly, set {} or run `pulsewire config`",
            API_KEY_ENV
        ))),
        (_, None) => Err(SessionError::Configuration(format!(
            "instance ID not found; pass it explicitly, set {} or run `pulsewire config`",
            INSTANCE_ID_ENV
        ))),
    }
}

fn read_stored_config(options: &InitOptions) -> Result<Option<StoredConfig>, SessionError> {
    let store = match &options.config_dir {
        Some(dir) => ConfigStore::new(dir),
        None => ConfigStore::current_dir()
            .map_err(|e| SessionError::Configuration(e.to_string()))?,
    };
    store
        .read_partial()
        .map_err(|e| SessionError::Configuration(e.to_string()))
}

fn env_value(key: &str) -> Option<String> {
    non_empty(env::var(key).ok())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
