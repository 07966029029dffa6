//! Crash and error reporting
//!
//! The process's `tracing` stream stands in for the host log stream: adding
//! [`CrashReportLayer`] to the subscriber turns every ERROR-level event into
//! an `error` record of type `Error`. Registering the handler also adds it to
//! a process-wide panic hook, installed once and chained to the previous one,
//! that reports panics as type `Exception` with a captured backtrace.
//!
//! Nothing is reported until the handler is both attached to a queue and
//! registered. Unregistering detaches the subscription; the layer and the
//! hook stay installed but go quiet.

use std::backtrace::Backtrace;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Once, OnceLock, PoisonError, Weak};

use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

use crate::delivery::QueueHandle;
use crate::event::EventBuilder;

/// Severity label for log events
pub const KIND_ERROR: &str = "Error";

/// Severity label for panics
pub const KIND_EXCEPTION: &str = "Exception";

/// Events from this crate are never reported, so a failing report cannot
/// feed itself.
const OWN_TARGET: &str = "evaveo_core";

/// Turns error log events and panics into `error` records
#[derive(Debug, Default)]
pub struct CrashHandler {
    sink: OnceLock<(EventBuilder, QueueHandle)>,
    registered: AtomicBool,
    /// Listed in `PANIC_HANDLERS`
    listed: AtomicBool,
}

impl CrashHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Connect the handler to a queue; only the first call takes effect
    pub fn attach(&self, builder: EventBuilder, queue: QueueHandle) {
        if self.sink.set((builder, queue)).is_err() {
            tracing::debug!("Crash handler already attached");
        }
    }

    /// Start reporting; joins the process-wide panic dispatch on first use
    pub fn register_handlers(self: &Arc<Self>) {
        self.registered.store(true, Ordering::SeqCst);

        if self
            .listed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            install_panic_hook();
            let mut handlers = PANIC_HANDLERS.lock().unwrap_or_else(PoisonError::into_inner);
            handlers.retain(|h| h.strong_count() > 0);
            handlers.push(Arc::downgrade(self));
        }

        tracing::info!("Crash handler registered");
    }

    /// Stop reporting
    pub fn unregister_handlers(&self) {
        self.registered.store(false, Ordering::SeqCst);
        tracing::info!("Crash handler unregistered");
    }

    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::SeqCst)
    }

    /// Layer to add to the global subscriber
    pub fn layer(self: &Arc<Self>) -> CrashReportLayer {
        CrashReportLayer {
            handler: Arc::clone(self),
        }
    }

    /// Enqueue an `error` record; returns false when inactive
    fn report(&self, message: &str, stack_trace: &str, kind: &str) -> bool {
        if !self.is_registered() {
            return false;
        }
        let Some((builder, queue)) = self.sink.get() else {
            return false;
        };
        queue.enqueue(builder.error(message, stack_trace, kind));
        true
    }
}

/// Handlers that receive panics; dead entries are pruned on registration
static PANIC_HANDLERS: Mutex<Vec<Weak<CrashHandler>>> = Mutex::new(Vec::new());

static PANIC_HOOK: Once = Once::new();

/// One hook per process, chained to the hook that was installed before it
fn install_panic_hook() {
    PANIC_HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let handlers: Vec<Arc<CrashHandler>> = PANIC_HANDLERS
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .iter()
                .filter_map(Weak::upgrade)
                .collect();

            if handlers.iter().any(|h| h.is_registered()) {
                let message = panic_message(info.payload());
                let location = info
                    .location()
                    .map(|l| format!("at {}:{}:{}\n", l.file(), l.line(), l.column()))
                    .unwrap_or_default();
                let stack_trace = format!("{}{}", location, Backtrace::force_capture());
                for handler in &handlers {
                    if handler.report(&message, &stack_trace, KIND_EXCEPTION) {
                        tracing::warn!(message = %message, "Panic reported");
                    }
                }
            }
            previous(info);
        }));
    });
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}

/// `tracing` layer feeding ERROR events to a [`CrashHandler`]
#[derive(Debug, Clone)]
pub struct CrashReportLayer {
    handler: Arc<CrashHandler>,
}

impl<S: Subscriber> Layer<S> for CrashReportLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if *metadata.level() != Level::ERROR || metadata.target().starts_with(OWN_TARGET) {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let stack_trace = match (metadata.file(), metadata.line()) {
            (Some(file), Some(line)) => format!("at {} ({}:{})", metadata.target(), file, line),
            _ => format!("at {}", metadata.target()),
        };
        self.handler
            .report(&visitor.finish(), &stack_trace, KIND_ERROR);
    }
}

/// Collects the `message` field followed by any other fields as `key=value`
#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl MessageVisitor {
    fn finish(self) -> String {
        if self.fields.is_empty() {
            self.message
        } else if self.message.is_empty() {
            self.fields
        } else {
            format!("{} {}", self.message, self.fields)
        }
    }
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.record_debug(field, &value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
            return;
        }
        if !self.fields.is_empty() {
            self.fields.push(' ');
        }
        let _ = write!(self.fields, "{}={:?}", field.name(), value);
    }
}
