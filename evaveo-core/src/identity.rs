//! Identity state stamped onto every event record
//!
//! The API key, collector URL and device id are fixed once the SDK is
//! initialized. The user id is the only mutable piece and may be changed at
//! any time from any thread; records already built keep the value they were
//! stamped with.

use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};

use crate::config::Config;

/// Source of the stable per-device identifier
pub trait DeviceIdProvider: Send + Sync {
    fn device_id(&self) -> String;
}

/// Source of wall-clock time for event timestamps
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Reads the machine id of the host, falling back to a persisted random id
///
/// Hosts without a machine id get a uuid generated on first use and stored
/// at `$XDG_STATE_HOME/evaveo/device-id`, so later runs report the same
/// device.
#[derive(Debug, Clone)]
pub struct HostDeviceId {
    machine_id_paths: Vec<PathBuf>,
    fallback_path: PathBuf,
}

const MACHINE_ID_PATHS: &[&str] = &["/etc/machine-id", "/var/lib/dbus/machine-id"];

impl HostDeviceId {
    pub fn new() -> Self {
        Self {
            machine_id_paths: MACHINE_ID_PATHS.iter().map(PathBuf::from).collect(),
            fallback_path: Config::state_dir().join("device-id"),
        }
    }

    /// Store the fallback id at `path` instead of the state directory
    pub fn with_fallback_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.fallback_path = path.into();
        self
    }
}

impl Default for HostDeviceId {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceIdProvider for HostDeviceId {
    fn device_id(&self) -> String {
        self.machine_id_paths
            .iter()
            .find_map(|path| read_machine_id(path))
            .unwrap_or_else(|| persisted_device_id(&self.fallback_path))
    }
}

/// Id stored at `path`, generating and saving one if there is none
///
/// If the id cannot be saved it is still returned, but the next run will
/// see a different one.
fn persisted_device_id(path: &Path) -> String {
    if let Some(id) = read_machine_id(path) {
        return id;
    }

    let id = uuid::Uuid::new_v4().to_string();
    let saved = path
        .parent()
        .map_or(Ok(()), std::fs::create_dir_all)
        .and_then(|()| std::fs::write(path, &id));
    match saved {
        Ok(()) => tracing::debug!(path = %path.display(), "Generated device id"),
        Err(e) => tracing::warn!(
            path = %path.display(),
            error = %e,
            "Failed to save generated device id"
        ),
    }
    id
}

fn read_machine_id(path: &Path) -> Option<String> {
    let id = std::fs::read_to_string(path).ok()?;
    let id = id.trim();
    (!id.is_empty()).then(|| id.to_string())
}

/// Fixed device id, for hosts that supply their own identifier
#[derive(Debug, Clone)]
pub struct StaticDeviceId(pub String);

impl DeviceIdProvider for StaticDeviceId {
    fn device_id(&self) -> String {
        self.0.clone()
    }
}

/// `Utc::now()`
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// API key, endpoint, device id and current user id
#[derive(Debug)]
pub struct Identity {
    api_key: String,
    api_url: String,
    device_id: String,
    user_id: RwLock<Option<String>>,
}

impl Identity {
    /// Capture identity state; the device id is read exactly once here
    pub fn new(
        api_key: impl Into<String>,
        api_url: impl Into<String>,
        devices: &dyn DeviceIdProvider,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            api_url: api_url.into().trim_end_matches('/').to_string(),
            device_id: devices.device_id(),
            user_id: RwLock::new(None),
        }
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Collector base URL without trailing slash
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn user_id(&self) -> Option<String> {
        self.user_id
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Plain overwrite, no validation
    pub fn set_user_id(&self, user_id: impl Into<String>) {
        *self.user_id.write().unwrap_or_else(PoisonError::into_inner) = Some(user_id.into());
    }
}
