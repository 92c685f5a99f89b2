/*!
 * Pairing with a bridge.
 *
 * A bridge only issues a token after someone presses its link button. The
 * [`PairingCoordinator`] connects once, then asks for a token at a fixed
 * interval until the bridge agrees or the attempts run out.
 */
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn, Instrument};

use hueflow_core::config::PairingConfig;
use hueflow_core::logging::component_span;
use hueflow_core::utils::{unix_timestamp, Sleeper, TokioSleeper};
use hueflow_devices::protocol::util::client_identifier;
use hueflow_devices::{BridgeConnector, DeviceError};

use crate::error::{Error, Result};

/// Application part of the client identifier
pub const DEFAULT_APPLICATION: &str = "hueflow";

/// Progress of a pairing flow
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingState {
    /// Not started
    Idle,
    /// Opening a session with the bridge
    Connecting,
    /// Waiting for the link button
    AwaitingApproval {
        /// Attempts left, including the one in progress
        attempts_remaining: u32,
    },
    /// The bridge issued a token
    Paired {
        /// Token to put in `bridge.auth_token`
        token: String,
    },
    /// Gave up
    Failed {
        /// What went wrong
        reason: String,
    },
}

impl PairingState {
    /// Whether the flow has finished
    pub fn is_terminal(&self) -> bool {
        matches!(self, PairingState::Paired { .. } | PairingState::Failed { .. })
    }
}

impl fmt::Display for PairingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PairingState::Idle => write!(f, "idle"),
            PairingState::Connecting => write!(f, "connecting"),
            PairingState::AwaitingApproval { attempts_remaining } => {
                write!(f, "awaiting approval ({} attempts left)", attempts_remaining)
            }
            PairingState::Paired { .. } => write!(f, "paired"),
            PairingState::Failed { reason } => write!(f, "failed: {}", reason),
        }
    }
}

/// Runs one pairing flow against one bridge
pub struct PairingCoordinator {
    connector: Arc<dyn BridgeConnector>,
    sleeper: Arc<dyn Sleeper>,
    poll_interval: Duration,
    max_attempts: u32,
    application: String,
    state: watch::Sender<PairingState>,
}

impl fmt::Debug for PairingCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PairingCoordinator")
            .field("connector", &self.connector.name())
            .field("poll_interval", &self.poll_interval)
            .field("max_attempts", &self.max_attempts)
            .field("state", &*self.state.borrow())
            .finish()
    }
}

impl PairingCoordinator {
    /// Create a coordinator using the tokio timer
    pub fn new(connector: Arc<dyn BridgeConnector>, config: &PairingConfig) -> Self {
        let (state, _) = watch::channel(PairingState::Idle);
        Self {
            connector,
            sleeper: Arc::new(TokioSleeper),
            poll_interval: config.poll_interval(),
            max_attempts: config.max_attempts,
            application: DEFAULT_APPLICATION.to_string(),
            state,
        }
    }

    /// Replace the source of delays between attempts
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Replace the application part of the client identifier
    pub fn with_application<S: Into<String>>(mut self, application: S) -> Self {
        self.application = application.into();
        self
    }

    /// Current state
    pub fn state(&self) -> PairingState {
        self.state.borrow().clone()
    }

    /// Watch state changes
    pub fn subscribe(&self) -> watch::Receiver<PairingState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: PairingState) {
        debug!("Pairing state: {}", state);
        self.state.send_replace(state);
    }

    fn fail(&self, reason: String) {
        self.set_state(PairingState::Failed { reason });
    }

    /// Pair with the bridge at `address` and return the issued token
    ///
    /// The token is logged for the operator and is not stored anywhere.
    pub async fn pair(&self, address: &str) -> Result<String> {
        self.run(address)
            .instrument(component_span("pairing", Some(address)))
            .await
    }

    async fn run(&self, address: &str) -> Result<String> {
        self.set_state(PairingState::Connecting);
        let session = match self.connector.connect(address).await {
            Ok(session) => session,
            Err(e) => {
                warn!("Unable to reach bridge at {}: {}", address, e);
                self.fail(e.to_string());
                return Err(e.into());
            }
        };

        let identifier = client_identifier(&self.application, unix_timestamp());
        info!(
            "Press the link button on bridge {:?} to pair {}",
            session.friendly_name(),
            identifier
        );

        for attempt in 1..=self.max_attempts {
            self.set_state(PairingState::AwaitingApproval {
                attempts_remaining: self.max_attempts - attempt + 1,
            });
            self.sleeper.sleep(self.poll_interval).await;

            match session.create_user(&identifier).await {
                Ok(token) => {
                    info!("Paired with bridge at {}; auth token: {}", address, token);
                    self.set_state(PairingState::Paired {
                        token: token.clone(),
                    });
                    return Ok(token);
                }
                Err(DeviceError::NotAuthorizedYet) => {
                    debug!(
                        "Link button not pressed yet (attempt {}/{})",
                        attempt, self.max_attempts
                    );
                }
                Err(e) => {
                    warn!(
                        "Pairing attempt {}/{} failed: {}",
                        attempt, self.max_attempts, e
                    );
                }
            }
        }

        let reason = format!(
            "link button not pressed after {} attempts",
            self.max_attempts
        );
        warn!("Pairing with {} gave up: {}", address, reason);
        self.fail(reason.clone());
        Err(Error::pairing(reason))
    }
}
