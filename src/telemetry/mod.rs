// ============================================================================
// Telemetry - Diagnostic Events
// ============================================================================
//
// Fire-and-forget transport of DiagnosticEvents to a remote collector.
//
// - `TelemetryEmitter::emit` hands the event to a bounded queue and returns
// - A background task drains the queue and sends one UDP datagram per event
// - A full queue, a closed sink or a send error drops the event
//
// Nothing here ever returns an error to the caller.
//
// ============================================================================

pub mod dns;
pub mod stall;

pub use dns::{NameResolver, ResolutionTracer, SystemResolver, resolve};
pub use stall::StallDetector;

use serde::Serialize;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::TelemetryConfig;
use crate::metrics;

const EVENT_QUEUE_CAPACITY: usize = 4096;

/// A point-in-time observation. Timestamps are unix milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiagnosticEvent {
    pub start: i64,
    pub end: i64,
    pub label: String,
}

impl DiagnosticEvent {
    pub fn span(start: i64, end: i64, label: impl Into<String>) -> Self {
        Self {
            start,
            end,
            label: label.into(),
        }
    }

    /// Zero-length event stamped with the current time
    pub fn instant(label: impl Into<String>) -> Self {
        let now = now_millis();
        Self::span(now, now, label)
    }

    pub fn duration_ms(&self) -> i64 {
        self.end - self.start
    }
}

pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Best-effort handle to the telemetry sink.
///
/// Cheap to clone. `emit` never blocks and never reports failure, so callers
/// cannot assume an event reached the collector.
#[derive(Clone, Debug)]
pub struct TelemetryEmitter {
    tx: Option<mpsc::Sender<DiagnosticEvent>>,
}

impl TelemetryEmitter {
    /// Emitter that discards every event
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Emitter backed by an in-process queue; the receiver is the sink.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<DiagnosticEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx: Some(tx) }, rx)
    }

    /// Starts the UDP sink for `config`. Must be called inside a tokio runtime.
    ///
    /// The collector's host name is resolved once, through a
    /// `ResolutionTracer` feeding this emitter.
    pub fn start(
        config: &TelemetryConfig,
        service_name: &str,
    ) -> (Self, Option<JoinHandle<()>>) {
        if !config.enabled {
            info!("Telemetry disabled (LEV_ENABLED=false)");
            return (Self::disabled(), None);
        }

        let (emitter, rx) = Self::channel(EVENT_QUEUE_CAPACITY);
        info!(collector = %config.collector_address(), "Telemetry sink started");
        let resolver = ResolutionTracer::new(SystemResolver, emitter.clone(), service_name);
        let handle = tokio::spawn(run_udp_sink(
            config.host.clone(),
            config.port,
            resolver,
            rx,
        ));

        (emitter, Some(handle))
    }

    pub fn emit(&self, event: DiagnosticEvent) {
        let Some(tx) = &self.tx else {
            return;
        };
        if tx.try_send(event).is_err() {
            metrics::TELEMETRY_EVENTS_DROPPED_TOTAL.inc();
        }
    }

    pub fn emit_label(&self, label: impl Into<String>) {
        self.emit(DiagnosticEvent::instant(label));
    }
}

async fn run_udp_sink(
    host: String,
    port: u16,
    resolver: ResolutionTracer,
    mut rx: mpsc::Receiver<DiagnosticEvent>,
) {
    let collector = resolve(&resolver, &host, port).await;
    // The resolver holds a sender; keeping it would stop the queue from closing
    drop(resolver);
    let collector = match collector {
        Ok(addrs) => addrs,
        Err(e) => {
            warn!(host = %host, error = %e, "Telemetry collector not resolved, events will be dropped");
            return;
        }
    };

    let socket = match UdpSocket::bind("0.0.0.0:0").await {
        Ok(socket) => socket,
        Err(e) => {
            warn!(error = %e, "Telemetry socket bind failed, events will be dropped");
            return;
        }
    };
    if let Err(e) = socket.connect(collector.as_slice()).await {
        warn!(host = %host, error = %e, "Telemetry collector unreachable, events will be dropped");
        return;
    }

    while let Some(event) = rx.recv().await {
        let payload = match serde_json::to_vec(&event) {
            Ok(payload) => payload,
            Err(e) => {
                debug!(error = %e, "Failed to serialize diagnostic event");
                continue;
            }
        };
        if let Err(e) = socket.send(&payload).await {
            debug!(error = %e, label = %event.label, "Diagnostic event dropped");
        }
    }
}

/// Reports panics that would otherwise only reach stderr.
///
/// The previous hook still runs afterwards.
pub fn install_panic_hook(telemetry: TelemetryEmitter, service_name: String) {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let message = if let Some(s) = info.payload().downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        let location = info
            .location()
            .map(|l| format!(" at {}:{}", l.file(), l.line()))
            .unwrap_or_default();

        tracing::error!(panic = %message, location = %location, "Uncaught panic");
        telemetry.emit_label(format!(
            "{}: uncaught panic: {}{}",
            service_name, message, location
        ));
        previous(info);
    }));
}
