//! SDK handle: the composition root for identity, queue and producers
//!
//! One [`Sdk`] is constructed by the host application and shared by
//! reference. It starts uninitialized; the first successful `initialize*`
//! call fixes the identity, spawns the delivery worker and, when tracking is
//! enabled, starts a session, performance monitoring and crash reporting.
//!
//! Tracking calls never return errors. Calls made before initialization or
//! while tracking is disabled are ignored.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;

use crate::config::{Config, SdkConfig};
use crate::crash::CrashHandler;
use crate::delivery::{DeliveryQueue, DeliveryStats, HttpTransport, QueueHandle, Transport};
use crate::error::{Error, Result};
use crate::event::{EventBuilder, EventType, Payload};
use crate::identity::{Clock, DeviceIdProvider, HostDeviceId, Identity, SystemClock};
use crate::performance::{BatteryProvider, FrameCounter, HostSampler, PerformanceMonitor, SysfsBattery};
use crate::session::SessionTracker;

/// State that exists once the SDK is initialized
#[derive(Debug)]
struct Active {
    config: Config,
    builder: EventBuilder,
    queue: DeliveryQueue,
    session: SessionTracker,
    performance: PerformanceMonitor,
}

/// EVAVEO VR Manager telemetry SDK
pub struct Sdk {
    runtime: Handle,
    devices: Box<dyn DeviceIdProvider>,
    clock: Arc<dyn Clock>,
    battery: Arc<dyn BatteryProvider>,
    frames: FrameCounter,
    crash: Arc<CrashHandler>,
    enabled: AtomicBool,
    init_lock: Mutex<()>,
    active: OnceLock<Active>,
}

impl Sdk {
    /// Uninitialized SDK whose tasks run on `runtime`
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            devices: Box::new(HostDeviceId::new()),
            clock: Arc::new(SystemClock),
            battery: Arc::new(SysfsBattery),
            frames: FrameCounter::new(),
            crash: CrashHandler::new(),
            enabled: AtomicBool::new(true),
            init_lock: Mutex::new(()),
            active: OnceLock::new(),
        }
    }

    /// Uninitialized SDK on the current tokio runtime
    pub fn current() -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| Error::Runtime(format!("no tokio runtime: {}", e)))?;
        Ok(Self::new(runtime))
    }

    /// Replace the host device id source (read once at initialization)
    pub fn with_device_ids(mut self, devices: impl DeviceIdProvider + 'static) -> Self {
        self.devices = Box::new(devices);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_battery(mut self, battery: impl BatteryProvider) -> Self {
        self.battery = Arc::new(battery);
        self
    }

    /// Initialize with an API key and the default collector URL
    pub fn initialize(&self, api_key: &str) {
        self.initialize_with(&Config {
            sdk: SdkConfig::with_api_key(api_key),
            ..Default::default()
        });
    }

    /// Initialize with an API key and a collector base URL
    pub fn initialize_with_url(&self, api_key: &str, api_url: &str) {
        self.initialize_with(&Config {
            sdk: SdkConfig {
                api_url: api_url.to_string(),
                ..SdkConfig::with_api_key(api_key)
            },
            ..Default::default()
        });
    }

    /// Initialize from a full configuration, delivering over HTTP
    pub fn initialize_with(&self, config: &Config) {
        self.initialize_inner(config, |identity| {
            HttpTransport::new(identity, config.delivery.timeout())
        });
    }

    /// Initialize from a configuration with a caller-supplied transport
    pub fn initialize_with_transport<T: Transport>(&self, config: &Config, transport: T) {
        self.initialize_inner(config, |_| Ok(transport));
    }

    fn initialize_inner<T: Transport>(
        &self,
        config: &Config,
        make_transport: impl FnOnce(&Identity) -> Result<T>,
    ) {
        let _init = self.init_lock.lock().unwrap_or_else(PoisonError::into_inner);

        if self.active.get().is_some() {
            tracing::warn!("SDK already initialized");
            return;
        }

        if let Err(e) = config.sdk.validate() {
            tracing::error!(error = %e, "SDK initialization aborted");
            return;
        }

        let api_key = config.sdk.api_key.as_deref().unwrap_or_default();
        let identity = Arc::new(Identity::new(api_key, config.sdk.base_url(), self.devices.as_ref()));

        let transport = match make_transport(&identity) {
            Ok(transport) => transport,
            Err(e) => {
                tracing::error!(error = %e, "SDK initialization aborted");
                return;
            }
        };

        let builder = EventBuilder::new(Arc::clone(&identity), Arc::clone(&self.clock));
        let queue = DeliveryQueue::spawn(transport, &self.runtime, config.sdk.debug_logs);
        let session = SessionTracker::new(builder.clone(), queue.handle(), config.sdk.app_name.clone());
        let performance = PerformanceMonitor::new(
            builder.clone(),
            queue.handle(),
            self.runtime.clone(),
            config.performance.interval(),
        );
        self.crash.attach(builder.clone(), queue.handle());
        // Config can switch tracking off but never re-enables it
        self.enabled.fetch_and(config.sdk.enabled, Ordering::SeqCst);

        let active = self.active.get_or_init(|| Active {
            config: config.clone(),
            builder,
            queue,
            session,
            performance,
        });

        tracing::info!(
            api_url = %identity.api_url(),
            device_id = %identity.device_id(),
            "SDK initialized successfully"
        );

        if self.is_enabled() {
            active.session.start_session();
            if active.config.performance.enabled {
                let sampler = HostSampler::new(self.frames.clone(), Arc::clone(&self.battery))
                    .with_config(&active.config.performance);
                active.performance.start_monitoring(sampler);
            }
            self.crash.register_handlers();
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.active.get().is_some()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Enable or disable tracking
    ///
    /// May be called before initialization; a disabled SDK initializes
    /// without starting a session, monitoring or crash reporting.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
        tracing::info!(
            "Tracking {}",
            if enabled { "enabled" } else { "disabled" }
        );
    }

    /// Track a custom event
    pub fn track_event(&self, event_name: &str, payload: Option<Payload>) {
        self.enqueue(EventType::Custom, event_name, payload);
    }

    /// Build a record of the given type and queue it for delivery
    pub fn enqueue(&self, event_type: EventType, event_name: &str, payload: Option<Payload>) {
        let Some(active) = self.active.get() else {
            return;
        };
        if !self.is_enabled() {
            return;
        }
        active
            .queue
            .handle()
            .enqueue(active.builder.record(event_type, event_name, payload));
    }

    /// Set the user id stamped on records built from now on
    pub fn set_user_id(&self, user_id: &str) {
        if let Some(active) = self.active.get() {
            active.builder.identity().set_user_id(user_id);
        }
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.active.get().map(|a| a.builder.identity())
    }

    pub fn builder(&self) -> Option<&EventBuilder> {
        self.active.get().map(|a| &a.builder)
    }

    pub fn queue(&self) -> Option<QueueHandle> {
        self.active.get().map(|a| a.queue.handle())
    }

    pub fn session(&self) -> Option<&SessionTracker> {
        self.active.get().map(|a| &a.session)
    }

    pub fn performance(&self) -> Option<&PerformanceMonitor> {
        self.active.get().map(|a| &a.performance)
    }

    pub fn crash_handler(&self) -> &Arc<CrashHandler> {
        &self.crash
    }

    /// Frame counter the host render loop should tick
    pub fn frame_counter(&self) -> FrameCounter {
        self.frames.clone()
    }

    pub fn stats(&self) -> Option<DeliveryStats> {
        self.active.get().map(|a| a.queue.handle().stats())
    }

    /// Wait until the queue is empty; true immediately if uninitialized
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        match self.queue() {
            Some(queue) => queue.wait_idle(timeout).await,
            None => true,
        }
    }

    /// Host paused or resumed the application
    pub fn on_application_pause(&self, paused: bool) {
        let Some(active) = self.active.get() else {
            return;
        };
        if !self.is_enabled() {
            return;
        }
        if paused {
            active.session.pause_session();
        } else {
            active.session.resume_session();
        }
    }

    /// Host is quitting: end the session and stop sampling
    ///
    /// Pending records are not flushed; call [`Sdk::wait_idle`] first to
    /// give them a chance.
    pub fn on_application_quit(&self) {
        let Some(active) = self.active.get() else {
            return;
        };
        if self.is_enabled() {
            active.session.end_session();
        }
        active.performance.stop_monitoring();
    }
}

impl std::fmt::Debug for Sdk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sdk")
            .field("initialized", &self.is_initialized())
            .field("enabled", &self.is_enabled())
            .field("active", &self.active.get())
            .finish_non_exhaustive()
    }
}
