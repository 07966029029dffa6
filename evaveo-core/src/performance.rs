//! Periodic performance snapshots
//!
//! The monitor wakes on a fixed interval, takes one [`PerformanceSample`]
//! from its [`Sampler`] and enqueues it as a `performance` record. The first
//! sample is taken one full interval after start.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::PerformanceConfig;
use crate::delivery::QueueHandle;
use crate::event::{EventBuilder, PerformanceSample};

/// Produces one sample per monitor tick
pub trait Sampler: Send + 'static {
    fn sample(&mut self) -> PerformanceSample;
}

/// Reports battery charge in `0.0..=1.0`, or `None` when unknown
pub trait BatteryProvider: Send + Sync + 'static {
    fn battery_level(&self) -> Option<f32>;
}

/// Frame tick counter shared with the host render loop
#[derive(Debug, Clone, Default)]
pub struct FrameCounter(Arc<AtomicU64>);

impl FrameCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Call once per rendered frame
    pub fn record_frame(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn total(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Battery from `/sys/class/power_supply/*/capacity`
#[derive(Debug, Default, Clone, Copy)]
pub struct SysfsBattery;

impl BatteryProvider for SysfsBattery {
    fn battery_level(&self) -> Option<f32> {
        let entries = std::fs::read_dir("/sys/class/power_supply").ok()?;
        entries
            .flatten()
            .filter(|entry| entry.file_name().to_string_lossy().starts_with("BAT"))
            .find_map(|entry| read_capacity(&entry.path().join("capacity")))
    }
}

fn read_capacity(path: &Path) -> Option<f32> {
    let percent: f32 = std::fs::read_to_string(path).ok()?.trim().parse().ok()?;
    Some((percent / 100.0).clamp(0.0, 1.0))
}

/// Resident set size of this process in bytes, where the platform exposes it
pub fn process_memory() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    parse_vm_rss(&status)
}

fn parse_vm_rss(status: &str) -> Option<u64> {
    let line = status.lines().find(|line| line.starts_with("VmRSS:"))?;
    let kb: u64 = line
        .trim_start_matches("VmRSS:")
        .split_whitespace()
        .next()?
        .parse()
        .ok()?;
    Some(kb * 1024)
}

/// Default sampler: host frame counter, process memory and battery
pub struct HostSampler {
    frames: FrameCounter,
    battery: Arc<dyn BatteryProvider>,
    track_fps: bool,
    track_battery: bool,
    last_frames: u64,
    last_at: Instant,
}

impl HostSampler {
    pub fn new(frames: FrameCounter, battery: Arc<dyn BatteryProvider>) -> Self {
        let last_frames = frames.total();
        Self {
            frames,
            battery,
            track_fps: true,
            track_battery: true,
            last_frames,
            last_at: Instant::now(),
        }
    }

    /// Apply the `track_fps` / `track_battery` switches
    pub fn with_config(mut self, config: &PerformanceConfig) -> Self {
        self.track_fps = config.track_fps;
        self.track_battery = config.track_battery;
        self
    }

    /// Frames per second since the previous sample; `None` if the host has
    /// never recorded a frame
    fn fps(&mut self) -> Option<f32> {
        let total = self.frames.total();
        let elapsed = self.last_at.elapsed().as_secs_f64();
        let frames = total.saturating_sub(self.last_frames);
        self.last_frames = total;
        self.last_at = Instant::now();

        if total == 0 || elapsed <= 0.0 {
            return None;
        }
        Some((frames as f64 / elapsed) as f32)
    }
}

impl Sampler for HostSampler {
    fn sample(&mut self) -> PerformanceSample {
        PerformanceSample {
            fps: if self.track_fps { self.fps() } else { None },
            memory_usage: process_memory(),
            battery_level: if self.track_battery {
                self.battery.battery_level()
            } else {
                None
            },
        }
    }
}

/// Runs the sampling task and owns its lifetime
#[derive(Debug)]
pub struct PerformanceMonitor {
    builder: EventBuilder,
    queue: QueueHandle,
    runtime: Handle,
    interval: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PerformanceMonitor {
    pub fn new(builder: EventBuilder, queue: QueueHandle, runtime: Handle, interval: Duration) -> Self {
        Self {
            builder,
            queue,
            runtime,
            interval,
            task: Mutex::new(None),
        }
    }

    /// Start sampling; does nothing if already running
    pub fn start_monitoring(&self, sampler: impl Sampler) {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            tracing::debug!("Performance monitoring already running");
            return;
        }

        let builder = self.builder.clone();
        let queue = self.queue.clone();
        let period = self.interval;
        *task = Some(self.runtime.spawn(monitor(builder, queue, sampler, period)));

        tracing::info!(interval_ms = period.as_millis() as u64, "Performance monitoring started");
    }

    /// Cancel the sampling task
    pub fn stop_monitoring(&self) {
        if let Some(task) = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
            tracing::info!("Performance monitoring stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }
}

impl Drop for PerformanceMonitor {
    fn drop(&mut self) {
        if let Some(task) = self
            .task
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
    }
}

async fn monitor(builder: EventBuilder, queue: QueueHandle, mut sampler: impl Sampler, period: Duration) {
    let mut ticks = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticks.tick().await;
        let sample = sampler.sample();
        tracing::trace!(?sample, "Performance sample");
        queue.enqueue(builder.performance(sample));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::{DeliveryQueue, Transport};
    use crate::event::{EventRecord, EventType};
    use crate::identity::{Identity, StaticDeviceId, SystemClock};

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<EventRecord>>>);

    impl Transport for Capture {
        async fn send(&self, record: &EventRecord) -> crate::Result<()> {
            self.0.lock().unwrap().push(record.clone());
            Ok(())
        }
    }

    struct Fixed;

    impl Sampler for Fixed {
        fn sample(&mut self) -> PerformanceSample {
            PerformanceSample {
                fps: Some(90.0),
                memory_usage: Some(1024),
                battery_level: Some(0.5),
            }
        }
    }

    struct NoBattery;

    impl BatteryProvider for NoBattery {
        fn battery_level(&self) -> Option<f32> {
            None
        }
    }

    fn builder() -> EventBuilder {
        let identity = Identity::new("vr_test", "http://collector", &StaticDeviceId("d".into()));
        EventBuilder::new(Arc::new(identity), Arc::new(SystemClock))
    }

    #[test]
    fn test_parse_vm_rss() {
        let status = "Name:\tgame\nVmPeak:\t  9000 kB\nVmRSS:\t  2048 kB\nThreads:\t4\n";
        assert_eq!(parse_vm_rss(status), Some(2048 * 1024));
        assert_eq!(parse_vm_rss("Name:\tgame\n"), None);
    }

    #[test]
    fn test_read_capacity_scales_percent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capacity");
        std::fs::write(&path, "85\n").unwrap();
        assert_eq!(read_capacity(&path), Some(0.85));
        std::fs::write(&path, "n/a").unwrap();
        assert_eq!(read_capacity(&path), None);
    }

    #[test]
    fn test_host_sampler_fps() {
        let frames = FrameCounter::new();
        let mut sampler = HostSampler::new(frames.clone(), Arc::new(NoBattery));

        // No frames recorded yet
        assert_eq!(sampler.sample().fps, None);

        for _ in 0..30 {
            frames.record_frame();
        }
        std::thread::sleep(Duration::from_millis(50));
        let sample = sampler.sample();
        assert!(sample.fps.unwrap() > 0.0);
        assert_eq!(sample.battery_level, None);
    }

    #[test]
    fn test_host_sampler_respects_switches() {
        let frames = FrameCounter::new();
        frames.record_frame();
        let config = PerformanceConfig {
            track_fps: false,
            track_battery: false,
            ..Default::default()
        };
        let mut sampler = HostSampler::new(frames, Arc::new(SysfsBattery)).with_config(&config);

        let sample = sampler.sample();
        assert_eq!(sample.fps, None);
        assert_eq!(sample.battery_level, None);
    }

    #[tokio::test]
    async fn test_monitor_enqueues_until_stopped() {
        let capture = Capture::default();
        let queue = DeliveryQueue::spawn(capture.clone(), &Handle::current(), false);
        let monitor = PerformanceMonitor::new(
            builder(),
            queue.handle(),
            Handle::current(),
            Duration::from_millis(20),
        );

        monitor.start_monitoring(Fixed);
        assert!(monitor.is_running());
        tokio::time::sleep(Duration::from_millis(150)).await;
        monitor.stop_monitoring();
        assert!(!monitor.is_running());

        assert!(queue.handle().wait_idle(Duration::from_secs(5)).await);
        let delivered = capture.0.lock().unwrap().len();
        assert!(delivered >= 2, "expected at least two samples, got {delivered}");

        tokio::time::sleep(Duration::from_millis(100)).await;
        let records = capture.0.lock().unwrap();
        assert_eq!(records.len(), delivered);
        assert!(records
            .iter()
            .all(|r| r.event_type == EventType::Performance && r.fps == Some(90.0)));
    }
}
