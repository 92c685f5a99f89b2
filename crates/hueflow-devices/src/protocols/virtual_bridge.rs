/*!
 * In-process bridge.
 *
 * [`VirtualBridge`] behaves like a Hue bridge without a network: it holds
 * a list of lights, enforces the link-button pairing rule and only hands
 * out lights to authenticated sessions. It backs the `--virtual` run mode
 * and the test suites.
 */
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::device::{DeviceError, LightHandle, LightState, LightStateUpdate, Result};
use crate::protocol::{BridgeConnector, BridgeSession};

/// A light living in memory
pub struct VirtualLight {
    id: String,
    state: Mutex<LightState>,
    applies: AtomicUsize,
    failing: AtomicBool,
}

impl fmt::Debug for VirtualLight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualLight")
            .field("id", &self.id)
            .field("applies", &self.apply_count())
            .finish()
    }
}

impl VirtualLight {
    /// Create a light that is off, reachable and in hue/saturation mode
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: Mutex::new(LightState {
                on: false,
                bri: 254,
                hue: 8418,
                sat: 140,
                effect: "none".to_string(),
                xy: [0.4573, 0.41],
                ct: 366,
                alert: "none".to_string(),
                color_mode: "hs".to_string(),
                reachable: true,
            }),
            applies: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
        }
    }

    /// Current state without going through the handle
    pub fn snapshot(&self) -> LightState {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of updates that reached the light
    pub fn apply_count(&self) -> usize {
        self.applies.load(Ordering::SeqCst)
    }

    /// Make every subsequent update fail as a transport error
    pub fn fail_commands(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl LightHandle for VirtualLight {
    fn id(&self) -> &str {
        &self.id
    }

    async fn state(&self) -> Result<LightState> {
        Ok(self.snapshot())
    }

    async fn apply(&self, update: LightStateUpdate) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(DeviceError::communication(format!(
                "light {} did not answer",
                self.id
            )));
        }

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        update.apply_to(&mut state);
        self.applies.fetch_add(1, Ordering::SeqCst);
        debug!("Virtual light {} updated: {:?}", self.id, update);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Counters {
    connect: AtomicUsize,
    create_user: AtomicUsize,
    authenticate: AtomicUsize,
}

#[derive(Debug)]
struct BridgeInner {
    name: String,
    lights: Vec<Arc<VirtualLight>>,
    token: Mutex<Option<String>>,
    reachable: bool,
    listing_fails: bool,
    approve_after: Option<usize>,
    link_pressed: AtomicBool,
    counters: Counters,
}

impl BridgeInner {
    fn issue_token(&self) -> String {
        let mut token = self.token.lock().unwrap_or_else(PoisonError::into_inner);
        token
            .get_or_insert_with(|| uuid::Uuid::new_v4().simple().to_string())
            .clone()
    }

    fn accepts(&self, candidate: &str) -> bool {
        self.token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_deref()
            == Some(candidate)
    }
}

// A configured copy starts with fresh counters.
impl Clone for BridgeInner {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            lights: self.lights.clone(),
            token: Mutex::new(
                self.token
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone(),
            ),
            reachable: self.reachable,
            listing_fails: self.listing_fails,
            approve_after: self.approve_after,
            link_pressed: AtomicBool::new(self.link_pressed.load(Ordering::SeqCst)),
            counters: Counters::default(),
        }
    }
}

/// Connector for an in-memory bridge
///
/// Cloning shares the bridge, so a test can keep a handle to inspect it
/// after passing a clone to the code under test.
#[derive(Debug, Clone)]
pub struct VirtualBridge {
    inner: Arc<BridgeInner>,
}

impl VirtualBridge {
    /// Create a reachable bridge with no lights and no paired clients
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(BridgeInner {
                name: name.into(),
                lights: Vec::new(),
                token: Mutex::new(None),
                reachable: true,
                listing_fails: false,
                approve_after: None,
                link_pressed: AtomicBool::new(false),
                counters: Counters::default(),
            }),
        }
    }

    fn configure(mut self, f: impl FnOnce(&mut BridgeInner)) -> Self {
        f(Arc::make_mut(&mut self.inner));
        self
    }

    /// Add a light
    pub fn with_light(self, id: impl Into<String>) -> Self {
        let light = Arc::new(VirtualLight::new(id));
        self.configure(|inner| inner.lights.push(light))
    }

    /// Accept `token` as an already paired client
    pub fn with_token(self, token: impl Into<String>) -> Self {
        let token = token.into();
        self.configure(|inner| inner.token = Mutex::new(Some(token)))
    }

    /// Refuse every connection
    pub fn unreachable(self) -> Self {
        self.configure(|inner| inner.reachable = false)
    }

    /// Fail every light listing as a transport error
    pub fn failing_light_listing(self) -> Self {
        self.configure(|inner| inner.listing_fails = true)
    }

    /// Approve pairing on the `attempts`-th request
    pub fn approve_after(self, attempts: usize) -> Self {
        self.configure(|inner| inner.approve_after = Some(attempts))
    }

    /// Simulate someone pressing the link button
    pub fn press_link_button(&self) {
        info!("Link button pressed on virtual bridge {}", self.inner.name);
        self.inner.link_pressed.store(true, Ordering::SeqCst);
    }

    /// Light by id
    pub fn light(&self, id: &str) -> Option<Arc<VirtualLight>> {
        self.inner.lights.iter().find(|l| l.id == id).cloned()
    }

    /// Number of connection attempts
    pub fn connect_calls(&self) -> usize {
        self.inner.counters.connect.load(Ordering::SeqCst)
    }

    /// Number of pairing requests
    pub fn create_user_calls(&self) -> usize {
        self.inner.counters.create_user.load(Ordering::SeqCst)
    }

    /// Number of authentication attempts
    pub fn authenticate_calls(&self) -> usize {
        self.inner.counters.authenticate.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BridgeConnector for VirtualBridge {
    fn name(&self) -> &'static str {
        "virtual"
    }

    async fn connect(&self, address: &str) -> Result<Arc<dyn BridgeSession>> {
        self.inner.counters.connect.fetch_add(1, Ordering::SeqCst);
        if !self.inner.reachable {
            return Err(DeviceError::Connect(format!(
                "no bridge answering at {}",
                address
            )));
        }

        debug!("Connected to virtual bridge {} at {}", self.inner.name, address);
        Ok(Arc::new(VirtualSession {
            address: address.to_string(),
            bridge: self.inner.clone(),
            authenticated: AtomicBool::new(false),
        }))
    }
}

/// Session with a [`VirtualBridge`]
#[derive(Debug)]
pub struct VirtualSession {
    address: String,
    bridge: Arc<BridgeInner>,
    authenticated: AtomicBool,
}

#[async_trait]
impl BridgeSession for VirtualSession {
    fn address(&self) -> &str {
        &self.address
    }

    fn friendly_name(&self) -> &str {
        &self.bridge.name
    }

    async fn authenticate(&self, token: &str) -> Result<()> {
        self.bridge.counters.authenticate.fetch_add(1, Ordering::SeqCst);
        if !self.bridge.accepts(token) {
            return Err(DeviceError::Authentication("unauthorized user".to_string()));
        }
        self.authenticated.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn create_user(&self, device_type: &str) -> Result<String> {
        let attempt = self.bridge.counters.create_user.fetch_add(1, Ordering::SeqCst) + 1;
        let approved = self.bridge.link_pressed.load(Ordering::SeqCst)
            || self.bridge.approve_after.is_some_and(|n| attempt >= n);
        if !approved {
            return Err(DeviceError::NotAuthorizedYet);
        }

        debug!("Virtual bridge approved {}", device_type);
        Ok(self.bridge.issue_token())
    }

    async fn lights(&self) -> Result<Vec<Arc<dyn LightHandle>>> {
        if !self.authenticated.load(Ordering::SeqCst) {
            return Err(DeviceError::Authentication(
                "session is not authenticated".to_string(),
            ));
        }
        if self.bridge.listing_fails {
            return Err(DeviceError::communication("light listing timed out"));
        }
        Ok(self
            .bridge
            .lights
            .iter()
            .map(|light| light.clone() as Arc<dyn LightHandle>)
            .collect())
    }
}
