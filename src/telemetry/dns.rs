// ============================================================================
// Name Resolution Tracing
// ============================================================================
//
// `ResolutionTracer` decorates a `NameResolver`: it times each lookup and
// emits a DiagnosticEvent, returning the inner result untouched (addresses,
// error kind and message alike).
//
// The tracer also implements `reqwest::dns::Resolve`, so an HTTP client opts
// in by being built with it. Raw sockets (the ledger connection, the
// collector) go through `resolve`. Nothing is patched process-wide.
//
// ============================================================================

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::dns::{Addrs, Name, Resolve, Resolving};

use super::{DiagnosticEvent, TelemetryEmitter, now_millis};

/// Resolves a host name to socket addresses (port 0; callers set the port).
#[async_trait]
pub trait NameResolver: Send + Sync {
    async fn lookup(&self, host: &str) -> io::Result<Vec<SocketAddr>>;
}

/// The operating system resolver, via `tokio::net::lookup_host`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

#[async_trait]
impl NameResolver for SystemResolver {
    async fn lookup(&self, host: &str) -> io::Result<Vec<SocketAddr>> {
        Ok(tokio::net::lookup_host((host, 0)).await?.collect())
    }
}

/// Socket addresses for `host:port`. IP literals skip the resolver.
pub async fn resolve(
    resolver: &dyn NameResolver,
    host: &str,
    port: u16,
) -> io::Result<Vec<SocketAddr>> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(vec![SocketAddr::new(ip, port)]);
    }
    let mut addrs = resolver.lookup(host).await?;
    if addrs.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("no addresses for {}", host),
        ));
    }
    for addr in &mut addrs {
        addr.set_port(port);
    }
    Ok(addrs)
}

pub struct ResolutionTracer<R = SystemResolver> {
    inner: Arc<R>,
    telemetry: TelemetryEmitter,
    service_name: Arc<str>,
}

// Clones share the inner resolver; `R` need not be Clone
impl<R> Clone for ResolutionTracer<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            telemetry: self.telemetry.clone(),
            service_name: Arc::clone(&self.service_name),
        }
    }
}

impl<R: NameResolver> ResolutionTracer<R> {
    pub fn new(inner: R, telemetry: TelemetryEmitter, service_name: impl Into<Arc<str>>) -> Self {
        Self {
            inner: Arc::new(inner),
            telemetry,
            service_name: service_name.into(),
        }
    }
}

#[async_trait]
impl<R: NameResolver> NameResolver for ResolutionTracer<R> {
    async fn lookup(&self, host: &str) -> io::Result<Vec<SocketAddr>> {
        let start = now_millis();
        let result = self.inner.lookup(host).await;
        let end = now_millis();

        self.telemetry.emit(DiagnosticEvent::span(
            start,
            end,
            format!("{}: dns.lookup({:?})", self.service_name, host),
        ));
        result
    }
}

impl<R: NameResolver + 'static> Resolve for ResolutionTracer<R> {
    fn resolve(&self, name: Name) -> Resolving {
        let tracer = self.clone();
        Box::pin(async move {
            let addrs = tracer.lookup(name.as_str()).await?;
            let addrs: Addrs = Box::new(addrs.into_iter());
            Ok::<_, Box<dyn std::error::Error + Send + Sync>>(addrs)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;

    struct FixedResolver {
        result: Result<Vec<SocketAddr>, io::ErrorKind>,
        delay: Duration,
    }

    #[async_trait]
    impl NameResolver for FixedResolver {
        async fn lookup(&self, _host: &str) -> io::Result<Vec<SocketAddr>> {
            tokio::time::sleep(self.delay).await;
            self.result
                .clone()
                .map_err(|kind| io::Error::new(kind, "no such host"))
        }
    }

    fn addr(last: u8) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, last)), 0)
    }

    #[tokio::test]
    async fn test_addresses_pass_through_unchanged() {
        let (telemetry, mut rx) = TelemetryEmitter::channel(4);
        let tracer = ResolutionTracer::new(
            FixedResolver {
                result: Ok(vec![addr(2), addr(1)]),
                delay: Duration::ZERO,
            },
            telemetry,
            "gw",
        );

        let addrs = tracer.lookup("ledger.internal").await.unwrap();
        assert_eq!(addrs, vec![addr(2), addr(1)]);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.label, "gw: dns.lookup(\"ledger.internal\")");
        assert!(event.end >= event.start);
    }

    #[tokio::test]
    async fn test_errors_pass_through_unchanged() {
        let (telemetry, mut rx) = TelemetryEmitter::channel(4);
        let tracer = ResolutionTracer::new(
            FixedResolver {
                result: Err(io::ErrorKind::NotFound),
                delay: Duration::ZERO,
            },
            telemetry,
            "gw",
        );

        let err = tracer.lookup("missing.invalid").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        assert_eq!(err.to_string(), "no such host");
        // Failed lookups are still timed
        assert!(rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_latency_sample_covers_lookup() {
        let (telemetry, mut rx) = TelemetryEmitter::channel(4);
        let tracer = ResolutionTracer::new(
            FixedResolver {
                result: Ok(vec![addr(1)]),
                delay: Duration::from_millis(30),
            },
            telemetry,
            "gw",
        );

        tracer.lookup("slow.internal").await.unwrap();
        let event = rx.recv().await.unwrap();
        assert!(event.duration_ms() >= 29);
    }

    #[tokio::test]
    async fn test_resolve_sets_port_and_skips_ip_literals() {
        let (telemetry, mut rx) = TelemetryEmitter::channel(4);
        let tracer = ResolutionTracer::new(
            FixedResolver {
                result: Ok(vec![addr(7)]),
                delay: Duration::ZERO,
            },
            telemetry,
            "gw",
        );

        let addrs = resolve(&tracer, "ledger.internal", 3000).await.unwrap();
        assert_eq!(addrs, vec![SocketAddr::new(addr(7).ip(), 3000)]);
        assert_eq!(rx.recv().await.unwrap().label, "gw: dns.lookup(\"ledger.internal\")");

        let addrs = resolve(&tracer, "10.0.0.9", 3000).await.unwrap();
        assert_eq!(addrs, vec!["10.0.0.9:3000".parse().unwrap()]);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_resolve_rejects_empty_answer() {
        let tracer = ResolutionTracer::new(
            FixedResolver {
                result: Ok(vec![]),
                delay: Duration::ZERO,
            },
            TelemetryEmitter::disabled(),
            "gw",
        );
        let err = resolve(&tracer, "empty.internal", 80).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_system_resolver_handles_localhost() {
        let tracer = ResolutionTracer::new(SystemResolver, TelemetryEmitter::disabled(), "gw");
        let addrs = tracer.lookup("localhost").await.unwrap();
        assert!(addrs.iter().all(|a| a.ip().is_loopback()));
    }
}
