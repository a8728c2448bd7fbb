#![allow(dead_code)]

use axum::{
    body::Bytes,
    http::{HeaderMap, Method, StatusCode, Uri},
    Router,
};
use batch_gateway::{
    build_app,
    config::{Config, NotificationTarget},
    gateway::Gateway,
    ledger::codec::{REQUEST_HEADER_SIZE, TRANSFER_SIZE},
    telemetry::TelemetryEmitter,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

// ============================================================================
// Fake ledger
// ============================================================================

/// One request frame as received by the fake ledger
#[derive(Debug, Clone)]
pub struct LedgerBatch {
    pub operation: u8,
    pub records: Vec<[u8; TRANSFER_SIZE]>,
}

impl LedgerBatch {
    pub fn ids(&self) -> Vec<u128> {
        self.records.iter().map(|r| field_u128(r, 0)).collect()
    }

    pub fn pending_ids(&self) -> Vec<u128> {
        self.records.iter().map(|r| field_u128(r, 64)).collect()
    }

    pub fn flags(&self) -> Vec<u16> {
        self.records
            .iter()
            .map(|r| u16::from_le_bytes([r[118], r[119]]))
            .collect()
    }
}

fn field_u128(record: &[u8; TRANSFER_SIZE], offset: usize) -> u128 {
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&record[offset..offset + 16]);
    u128::from_le_bytes(bytes)
}

pub struct FakeLedger {
    pub port: u16,
    pub batches: Arc<Mutex<Vec<LedgerBatch>>>,
}

impl FakeLedger {
    pub fn batches(&self) -> Vec<LedgerBatch> {
        self.batches.lock().unwrap().clone()
    }
}

/// Raw TCP ledger answering every operation with result code 0.
pub async fn spawn_fake_ledger() -> FakeLedger {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let batches: Arc<Mutex<Vec<LedgerBatch>>> = Arc::default();

    let recorded = batches.clone();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(serve_ledger_connection(stream, recorded.clone()));
        }
    });

    FakeLedger { port, batches }
}

async fn serve_ledger_connection(mut stream: TcpStream, batches: Arc<Mutex<Vec<LedgerBatch>>>) {
    loop {
        let mut header = [0u8; REQUEST_HEADER_SIZE];
        if stream.read_exact(&mut header).await.is_err() {
            return;
        }
        let count = u32::from_le_bytes([header[1], header[2], header[3], header[4]]);

        let mut records = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let mut record = [0u8; TRANSFER_SIZE];
            if stream.read_exact(&mut record).await.is_err() {
                return;
            }
            records.push(record);
        }
        batches.lock().unwrap().push(LedgerBatch {
            operation: header[0],
            records,
        });

        let mut reply = Vec::with_capacity(4 + count as usize * 4);
        reply.extend_from_slice(&count.to_le_bytes());
        for _ in 0..count {
            reply.extend_from_slice(&0u32.to_le_bytes());
        }
        if stream.write_all(&reply).await.is_err() {
            return;
        }
    }
}

// ============================================================================
// Fake downstream consumer
// ============================================================================

#[derive(Debug, Clone)]
pub struct ReceivedNotification {
    pub method: Method,
    pub uri: String,
    pub content_length: Option<String>,
    pub body: Bytes,
}

pub struct FakeDownstream {
    pub port: u16,
    pub received: Arc<Mutex<Vec<ReceivedNotification>>>,
}

impl FakeDownstream {
    pub fn target(&self) -> NotificationTarget {
        NotificationTarget::new("127.0.0.1", self.port)
    }

    pub fn received(&self) -> Vec<ReceivedNotification> {
        self.received.lock().unwrap().clone()
    }
}

/// HTTP server recording every request it receives.
pub async fn spawn_fake_downstream() -> FakeDownstream {
    let received: Arc<Mutex<Vec<ReceivedNotification>>> = Arc::default();
    let recorded = received.clone();

    let app = Router::new().fallback(
        move |method: Method, uri: Uri, headers: HeaderMap, body: Bytes| {
            let recorded = recorded.clone();
            async move {
                let content_length = headers
                    .get("content-length")
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                recorded.lock().unwrap().push(ReceivedNotification {
                    method,
                    uri: uri.to_string(),
                    content_length,
                    body,
                });
                StatusCode::OK
            }
        },
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

    FakeDownstream { port, received }
}

/// A port nothing listens on
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

// ============================================================================
// Gateway under test
// ============================================================================

pub struct TestGateway {
    pub address: String,
    pub gateway: Gateway,
    pub client: reqwest::Client,
}

impl TestGateway {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.address, path)
    }
}

pub fn test_config(
    ledger_port: u16,
    create: NotificationTarget,
    accept: NotificationTarget,
    flush_window: Duration,
) -> Config {
    let mut config = Config::default();
    config.telemetry.enabled = false;
    config.ledger.port = ledger_port;
    config.ledger.connect_timeout = Duration::from_secs(1);
    config.notification.create = create;
    config.notification.accept = accept;
    config.batch.flush_window = flush_window;
    config
}

pub async fn spawn_gateway(config: Config) -> TestGateway {
    let app = build_app(Arc::new(config), TelemetryEmitter::disabled())
        .await
        .expect("Failed to build gateway");

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    let router = app.router;
    tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });

    TestGateway {
        address,
        gateway: app.gateway,
        client: reqwest::Client::new(),
    }
}

/// Polls `check` until it holds or `timeout` elapses.
pub async fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// ============================================================================
// Payloads
// ============================================================================

pub const CONDITION: &str = "f5sqb7tBTWPd5Y8BDFdMm9BJR_MNI4isf8p8n4D5pHA";
pub const FULFILMENT: &str = "UNlJ98hZTY_dsw0cAqw4i_UN3v4utt7CZFB4yfLbVFA";

pub fn prepare_body(transfer_id: &str) -> String {
    serde_json::json!({
        "transferId": transfer_id,
        "payerFsp": "dfsp1",
        "payeeFsp": "dfsp2",
        "amount": {"currency": "USD", "amount": "123.45"},
        "ilpPacket": "AYIBgQAAAAAAAASwNGxldmVsb25lLmRmc3AxLm1lci45T2RTOF81MDdqUUZERmZlakgyOVc4bXFmNEpLMHlGTFGCAUBQU0svMS4wCk5vbmNlOiB1SXlweUYzY3pYSXBFdzVVc05TYWh3CkVuY3J5cHRpb246IG5vbmUKUGF5bWVudC1JZDogMTMyMzZhM2ItOGZhOC00MTYzLTg0NDctNGMzZWQzZGE5OGE3",
        "condition": CONDITION,
        "expiration": "2016-05-24T08:38:08.699-04:00",
    })
    .to_string()
}

pub fn fulfil_body() -> String {
    serde_json::json!({
        "fulfilment": FULFILMENT,
        "completedTimestamp": "2016-05-24T08:38:08.699-04:00",
        "transferState": "COMMITTED",
    })
    .to_string()
}

pub fn error_body() -> String {
    serde_json::json!({
        "errorInformation": {
            "errorCode": "5105",
            "errorDescription": "Payee transaction limit reached",
        },
    })
    .to_string()
}
