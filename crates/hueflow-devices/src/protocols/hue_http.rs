/*!
 * Hue REST API transport.
 *
 * Talks to a bridge over its local HTTP API:
 *
 * - `GET /api/config` (unauthenticated) for the bridge name
 * - `GET /api/<token>/config` to check that a token is whitelisted
 * - `POST /api` with `{"devicetype": ...}` to pair a new client
 * - `GET /api/<token>/lights` and `GET /api/<token>/lights/<id>`
 * - `PUT /api/<token>/lights/<id>/state` with a partial state
 *
 * Failures are reported by the bridge as a JSON array of
 * `{"error": {"type": .., "description": ..}}` items with status 200.
 */
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::device::{DeviceError, LightHandle, LightState, LightStateUpdate, Result};
use crate::protocol::{util, BridgeConnector, BridgeSession};

/// Error type for an unauthorized user
const UNAUTHORIZED_USER: u32 = 1;
/// Error type for "link button not pressed"
const LINK_BUTTON_NOT_PRESSED: u32 = 101;

#[derive(Debug, Clone, Deserialize)]
struct ApiError {
    #[serde(rename = "type")]
    kind: u32,
    #[serde(default)]
    address: String,
    #[serde(default)]
    description: String,
}

impl From<ApiError> for DeviceError {
    fn from(err: ApiError) -> Self {
        match err.kind {
            UNAUTHORIZED_USER => DeviceError::Authentication(err.description),
            LINK_BUTTON_NOT_PRESSED => DeviceError::NotAuthorizedYet,
            kind => DeviceError::communication(format!(
                "bridge error {} on {}: {}",
                kind, err.address, err.description
            )),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ApiItem {
    Success { success: Value },
    Error { error: ApiError },
}

/// Fail on the first error item of an array response
fn check_errors(body: &Value) -> Result<()> {
    let Some(items) = body.as_array() else {
        return Ok(());
    };
    for item in items {
        if let Ok(ApiItem::Error { error }) = ApiItem::deserialize(item) {
            return Err(error.into());
        }
    }
    Ok(())
}

fn decode<T: DeserializeOwned>(body: Value) -> Result<T> {
    check_errors(&body)?;
    serde_json::from_value(body)
        .map_err(|e| DeviceError::communication(format!("unexpected bridge response: {}", e)))
}

#[derive(Debug, Deserialize)]
struct BridgeInfo {
    name: String,
}

#[derive(Debug, Deserialize)]
struct LightRecord {
    name: String,
    #[serde(default)]
    state: LightState,
}

/// Extract the generated username from a pairing response
fn username_from(items: Vec<ApiItem>) -> Result<String> {
    for item in items {
        match item {
            ApiItem::Error { error } => return Err(error.into()),
            ApiItem::Success { success } => {
                if let Some(username) = success.get("username").and_then(Value::as_str) {
                    return Ok(username.to_string());
                }
            }
        }
    }
    Err(DeviceError::communication(
        "pairing response carried no username",
    ))
}

fn transport_error(context: &str, err: reqwest::Error) -> DeviceError {
    DeviceError::communication(format!("{}: {}", context, err))
}

async fn get_json(client: &Client, url: &str) -> Result<Value> {
    client
        .get(url)
        .send()
        .await
        .map_err(|e| transport_error(url, e))?
        .error_for_status()
        .map_err(|e| transport_error(url, e))?
        .json()
        .await
        .map_err(|e| transport_error(url, e))
}

/// Connector for bridges reachable over HTTP
#[derive(Debug, Clone)]
pub struct HttpConnector {
    client: Client,
}

impl HttpConnector {
    /// Create a connector whose requests time out after `timeout`
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DeviceError::communication(format!("building HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl BridgeConnector for HttpConnector {
    fn name(&self) -> &'static str {
        "hue-http"
    }

    async fn connect(&self, address: &str) -> Result<Arc<dyn BridgeSession>> {
        let base = util::base_url(address);
        let body = get_json(&self.client, &format!("{}/api/config", base))
            .await
            .map_err(|e| DeviceError::Connect(format!("{}: {}", address, e)))?;
        let info: BridgeInfo = decode(body)?;
        info!("Connected to bridge {:?} at {}", info.name, base);

        Ok(Arc::new(HttpSession {
            client: self.client.clone(),
            address: address.to_string(),
            base,
            name: info.name,
            token: RwLock::new(None),
        }))
    }
}

/// Session with one bridge over HTTP
pub struct HttpSession {
    client: Client,
    address: String,
    base: String,
    name: String,
    token: RwLock<Option<String>>,
}

impl fmt::Debug for HttpSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpSession")
            .field("base", &self.base)
            .field("name", &self.name)
            .finish()
    }
}

impl HttpSession {
    fn token(&self) -> Result<String> {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| DeviceError::Authentication("session is not authenticated".to_string()))
    }
}

#[async_trait]
impl BridgeSession for HttpSession {
    fn address(&self) -> &str {
        &self.address
    }

    fn friendly_name(&self) -> &str {
        &self.name
    }

    async fn authenticate(&self, token: &str) -> Result<()> {
        let body = get_json(&self.client, &format!("{}/api/{}/config", self.base, token)).await?;
        check_errors(&body)?;
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = Some(token.to_string());
        debug!("Authenticated with bridge {}", self.name);
        Ok(())
    }

    async fn create_user(&self, device_type: &str) -> Result<String> {
        let url = format!("{}/api", self.base);
        let items: Vec<ApiItem> = self
            .client
            .post(&url)
            .json(&json!({ "devicetype": device_type }))
            .send()
            .await
            .map_err(|e| transport_error(&url, e))?
            .json()
            .await
            .map_err(|e| transport_error(&url, e))?;
        username_from(items)
    }

    async fn lights(&self) -> Result<Vec<Arc<dyn LightHandle>>> {
        let token = self.token()?;
        let body = get_json(&self.client, &format!("{}/api/{}/lights", self.base, token)).await?;
        let records: HashMap<String, LightRecord> = decode(body)?;

        let mut records: Vec<(String, LightRecord)> = records.into_iter().collect();
        records.sort_by_key(|(key, _)| key.parse::<u32>().unwrap_or(u32::MAX));

        Ok(records
            .into_iter()
            .map(|(key, record)| {
                Arc::new(HttpLight {
                    client: self.client.clone(),
                    url: format!("{}/api/{}/lights/{}", self.base, token, key),
                    name: record.name,
                }) as Arc<dyn LightHandle>
            })
            .collect())
    }
}

/// One light behind an [`HttpSession`]
#[derive(Clone)]
pub struct HttpLight {
    client: Client,
    url: String,
    name: String,
}

impl fmt::Debug for HttpLight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpLight").field("name", &self.name).finish()
    }
}

#[async_trait]
impl LightHandle for HttpLight {
    fn id(&self) -> &str {
        &self.name
    }

    async fn state(&self) -> Result<LightState> {
        let record: LightRecord = decode(get_json(&self.client, &self.url).await?)?;
        Ok(record.state)
    }

    async fn apply(&self, update: LightStateUpdate) -> Result<()> {
        if update.is_empty() {
            return Ok(());
        }

        let url = format!("{}/state", self.url);
        let body: Value = self
            .client
            .put(&url)
            .json(&update)
            .send()
            .await
            .map_err(|e| transport_error(&self.name, e))?
            .json()
            .await
            .map_err(|e| transport_error(&self.name, e))?;
        check_errors(&body)
    }
}
