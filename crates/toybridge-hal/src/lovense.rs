//! [`LovenseConnect`] – driver for the Lovense Connect local HTTP API.
//!
//! Lovense Connect (phone or desktop app) exposes a small HTTP control
//! surface on the local network.  Every command is a `GET` carrying the
//! intensity in `v` and the device id in `t`:
//!
//! | Capability | Endpoint(s) |
//! |---|---|
//! | discovery | `/GetToys` |
//! | vibration | `/Vibrate` (dual-motor "Edge" toys: `/Vibrate1` + `/Vibrate2`) |
//! | rotation | `/Rotate` |
//! | linear / pump | `/AirAuto` |
//! | stop-all | all of the above with `v=0` |
//!
//! A command only counts as accepted when the response body is JSON whose
//! `type` field is `"ok"`.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use toybridge_types::{BridgeError, ToyId};
use tracing::{debug, info, warn};

use crate::driver::{ActuatorDriver, Protocol};

/// Endpoints that `stop_all` zeroes.
const STOP_ENDPOINTS: [&str; 5] = ["Vibrate", "Vibrate1", "Vibrate2", "Rotate", "AirAuto"];

/// Name Lovense Connect reports for a toy it has lost track of.
const UNKNOWN_TOY_NAME: &str = "Unknown";

// ─────────────────────────────────────────────────────────────────────────────
// Wire shapes
// ─────────────────────────────────────────────────────────────────────────────

/// One toy entry from `/GetToys`.
#[derive(Debug, Clone, Deserialize)]
pub struct LovenseToy {
    /// Device id (the toy's MAC address).
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "nickName")]
    pub nick_name: String,
    /// `1` (or `"1"`) when connected.
    #[serde(default)]
    status: Value,
}

impl LovenseToy {
    /// `true` if the app reports the toy as switched on and connected.
    pub fn is_on(&self) -> bool {
        match &self.status {
            Value::Number(n) => n.as_i64().is_some_and(|n| n != 0),
            Value::String(s) => !s.is_empty() && s != "0",
            Value::Bool(b) => *b,
            _ => false,
        }
    }

    /// Dual-motor toys take two vibration channels.
    fn is_dual_motor(&self) -> bool {
        self.name.to_lowercase().contains("edge")
    }
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    code: Value,
    #[serde(default, rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

impl Envelope {
    fn is_ok(&self) -> bool {
        let code_ok = match &self.code {
            Value::Null => true,
            Value::Number(n) => n.as_i64() == Some(200),
            Value::String(s) => s == "200",
            _ => false,
        };
        code_ok && self.kind.eq_ignore_ascii_case("ok")
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Parsing helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Strip trailing slashes and an optional trailing `/GetToys` from a
/// user-supplied address.
pub fn normalize_base_url(url: &str) -> String {
    let trimmed = url.trim().trim_end_matches('/');
    let lower = trimmed.to_ascii_lowercase();
    let base = if lower.ends_with("/gettoys") {
        &trimmed[..trimmed.len() - "/gettoys".len()]
    } else {
        trimmed
    };
    base.trim_end_matches('/').to_string()
}

/// Parse a `/GetToys` body into the list of toys that are switched on.
///
/// # Errors
///
/// Returns [`BridgeError::Discovery`] if the body is not a successful
/// Lovense envelope.
pub fn parse_toys(body: &str) -> Result<Vec<LovenseToy>, BridgeError> {
    let envelope: Envelope = serde_json::from_str(body)
        .map_err(|e| BridgeError::Discovery(format!("malformed GetToys response: {e}")))?;
    if !envelope.is_ok() {
        return Err(BridgeError::Discovery(format!(
            "GetToys returned a non-ok response: {body}"
        )));
    }

    // Some app versions send `data` as a JSON-encoded string.
    let data = match envelope.data {
        Value::String(s) => serde_json::from_str(&s)
            .map_err(|e| BridgeError::Discovery(format!("malformed toy table: {e}")))?,
        other => other,
    };

    let Value::Object(entries) = data else {
        return Ok(Vec::new());
    };

    let mut toys = Vec::with_capacity(entries.len());
    for (key, entry) in entries {
        match serde_json::from_value::<LovenseToy>(entry) {
            Ok(toy) if toy.is_on() => toys.push(toy),
            Ok(_) => debug!(toy = %key, "skipping toy reported as off"),
            Err(e) => warn!(toy = %key, error = %e, "skipping malformed toy entry"),
        }
    }
    Ok(toys)
}

/// Check that a command response confirms acceptance.
fn confirm(toy: &ToyId, body: &str) -> Result<(), BridgeError> {
    match serde_json::from_str::<Envelope>(body) {
        Ok(envelope) if envelope.is_ok() => Ok(()),
        Ok(_) => Err(BridgeError::Rejected {
            toy: toy.clone(),
            details: body.to_string(),
        }),
        Err(e) => Err(BridgeError::Rejected {
            toy: toy.clone(),
            details: format!("unconfirmed response ({e}): {body}"),
        }),
    }
}

fn transport(e: reqwest::Error) -> BridgeError {
    BridgeError::Transport(e.to_string())
}

// ─────────────────────────────────────────────────────────────────────────────
// Driver
// ─────────────────────────────────────────────────────────────────────────────

/// Driver for toys paired with a Lovense Connect app.
///
/// Toys are addressed by their reported name; the driver maps names to
/// device ids using the toy table from the last [`discover`] call.
///
/// [`discover`]: ActuatorDriver::discover
pub struct LovenseConnect {
    base_url: String,
    client: reqwest::Client,
    toys: Vec<LovenseToy>,
}

impl LovenseConnect {
    /// Create a driver for the Lovense Connect instance at `url`
    /// (e.g. `"http://192.168.1.20:30010"`).  `request_timeout` bounds each
    /// individual HTTP request.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Transport`] if the HTTP client cannot be built.
    pub fn new(url: &str, request_timeout: Duration) -> Result<Self, BridgeError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .no_proxy()
            .build()
            .map_err(transport)?;
        Ok(Self {
            base_url: normalize_base_url(url),
            client,
            toys: Vec::new(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Toys seen by the last discovery.
    pub fn toys(&self) -> &[LovenseToy] {
        &self.toys
    }

    fn lookup(&self, toy: &ToyId) -> Result<&LovenseToy, BridgeError> {
        self.toys
            .iter()
            .find(|t| t.name == toy.as_str() && t.name != UNKNOWN_TOY_NAME)
            .ok_or_else(|| BridgeError::Disconnected(toy.clone()))
    }

    async fn get(&self, endpoint: &str, device_id: &str, value: u32) -> Result<String, BridgeError> {
        let url = format!("{}/{}", self.base_url, endpoint);
        self.client
            .get(&url)
            .query(&[("v", value.to_string()), ("t", device_id.to_string())])
            .send()
            .await
            .map_err(transport)?
            .error_for_status()
            .map_err(transport)?
            .text()
            .await
            .map_err(transport)
    }

    async fn command(&self, toy: &ToyId, endpoint: &str, value: u32) -> Result<(), BridgeError> {
        let entry = self.lookup(toy)?;
        let body = self.get(endpoint, &entry.id, value).await?;
        confirm(toy, &body)
    }
}

#[async_trait]
impl ActuatorDriver for LovenseConnect {
    fn protocol(&self) -> Protocol {
        Protocol::Lovense
    }

    async fn discover(&mut self) -> Result<Vec<ToyId>, BridgeError> {
        let url = format!("{}/GetToys", self.base_url);
        let body = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(transport)?
            .text()
            .await
            .map_err(transport)?;

        self.toys = parse_toys(&body)?;
        for toy in &self.toys {
            info!(toy = %toy.name, id = %toy.id, nick_name = %toy.nick_name, "lovense toy found");
        }
        Ok(self
            .toys
            .iter()
            .filter(|t| t.name != UNKNOWN_TOY_NAME)
            .map(|t| ToyId::new(t.name.clone()))
            .collect())
    }

    fn is_connected(&self, toy: &ToyId) -> bool {
        self.lookup(toy).is_ok_and(LovenseToy::is_on)
    }

    async fn set_vibration(&self, toy: &ToyId, value: u32) -> Result<(), BridgeError> {
        if self.lookup(toy)?.is_dual_motor() {
            let (first, second) = tokio::join!(
                self.command(toy, "Vibrate1", value),
                self.command(toy, "Vibrate2", value),
            );
            first.and(second)
        } else {
            self.command(toy, "Vibrate", value).await
        }
    }

    async fn set_rotation(&self, toy: &ToyId, value: u32) -> Result<(), BridgeError> {
        self.command(toy, "Rotate", value).await
    }

    async fn set_linear(&self, toy: &ToyId, value: u32) -> Result<(), BridgeError> {
        self.command(toy, "AirAuto", value).await
    }

    async fn stop_all(&self, toy: &ToyId) -> Result<(), BridgeError> {
        self.lookup(toy)?;
        // All five go out at once so the whole stop costs one round trip.
        let [vibrate, vibrate1, vibrate2, rotate, air] = STOP_ENDPOINTS;
        let results = tokio::join!(
            self.command(toy, vibrate, 0),
            self.command(toy, vibrate1, 0),
            self.command(toy, vibrate2, 0),
            self.command(toy, rotate, 0),
            self.command(toy, air, 0),
        );
        let results = [results.0, results.1, results.2, results.3, results.4];

        // Toys ignore endpoints they do not support, so one confirmation is
        // enough.
        let mut last_error = None;
        let mut confirmed = false;
        for (endpoint, result) in STOP_ENDPOINTS.iter().zip(results) {
            match result {
                Ok(()) => confirmed = true,
                Err(e) => {
                    debug!(toy = %toy, endpoint = *endpoint, error = %e, "stop command not confirmed");
                    last_error = Some(e);
                }
            }
        }
        match (confirmed, last_error) {
            (true, _) => Ok(()),
            (false, Some(e)) => Err(e),
            (false, None) => Err(BridgeError::Disconnected(toy.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Instant;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    const TOYS_BODY: &str = r#"{
        "code": 200,
        "type": "OK",
        "data": {
            "c44f3312a1b0": {"id": "c44f3312a1b0", "name": "Lush", "nickName": "", "status": 1},
            "d5a0c1e2f300": {"id": "d5a0c1e2f300", "name": "Edge", "nickName": "", "status": "1"},
            "aa0000000000": {"id": "aa0000000000", "name": "Nora", "nickName": "", "status": 0}
        }
    }"#;

    const OK_BODY: &str = r#"{"code":200,"type":"OK"}"#;

    /// Serve `bodies` to consecutive connections and report the request
    /// lines that were received.
    async fn serve(bodies: Vec<&'static str>) -> (String, JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let mut requests = Vec::new();
            for body in bodies {
                let (mut stream, _) = listener.accept().await.unwrap();
                let mut buf = Vec::new();
                let mut chunk = [0u8; 1024];
                while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    let n = stream.read(&mut chunk).await.unwrap();
                    if n == 0 {
                        break;
                    }
                    buf.extend_from_slice(&chunk[..n]);
                }
                let text = String::from_utf8_lossy(&buf);
                requests.push(text.lines().next().unwrap_or_default().to_string());
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                stream.write_all(response.as_bytes()).await.unwrap();
                stream.shutdown().await.ok();
            }
            requests
        });
        (format!("http://{addr}"), handle)
    }

    /// Answer every connection concurrently after `delay` with the body
    /// `respond` picks for its request line.  Returns the request lines seen
    /// so far.
    async fn serve_slowly(
        delay: Duration,
        respond: fn(&str) -> &'static str,
    ) -> (String, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    break;
                };
                let log = Arc::clone(&log);
                tokio::spawn(async move {
                    let mut buf = Vec::new();
                    let mut chunk = [0u8; 1024];
                    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                        let n = stream.read(&mut chunk).await.unwrap_or(0);
                        if n == 0 {
                            break;
                        }
                        buf.extend_from_slice(&chunk[..n]);
                    }
                    let line = String::from_utf8_lossy(&buf)
                        .lines()
                        .next()
                        .unwrap_or_default()
                        .to_string();
                    let body = respond(&line);
                    log.lock().unwrap().push(line);
                    tokio::time::sleep(delay).await;
                    let response = format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        body.len(),
                        body
                    );
                    stream.write_all(response.as_bytes()).await.ok();
                    stream.shutdown().await.ok();
                });
            }
        });
        (format!("http://{addr}"), seen)
    }

    #[test]
    fn normalize_strips_gettoys_and_slashes() {
        assert_eq!(
            normalize_base_url("http://10.0.0.2:30010/GetToys"),
            "http://10.0.0.2:30010"
        );
        assert_eq!(
            normalize_base_url("http://10.0.0.2:30010/gettoys/"),
            "http://10.0.0.2:30010"
        );
        assert_eq!(normalize_base_url("http://host:1/ "), "http://host:1");
    }

    #[test]
    fn parse_toys_keeps_only_switched_on_toys() {
        let mut names: Vec<String> = parse_toys(TOYS_BODY)
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["Edge", "Lush"]);
    }

    #[test]
    fn parse_toys_accepts_string_encoded_data() {
        let body = r#"{"code":200,"type":"ok","data":"{\"x\":{\"id\":\"x\",\"name\":\"Max\",\"status\":1}}"}"#;
        let toys = parse_toys(body).unwrap();
        assert_eq!(toys.len(), 1);
        assert_eq!(toys[0].name, "Max");
    }

    #[test]
    fn parse_toys_rejects_error_envelope() {
        let err = parse_toys(r#"{"code":400,"type":"error"}"#).unwrap_err();
        assert!(matches!(err, BridgeError::Discovery(_)));
        assert!(parse_toys("<html>").is_err());
    }

    #[test]
    fn confirm_requires_ok_type() {
        let toy = ToyId::new("Lush");
        assert!(confirm(&toy, OK_BODY).is_ok());
        assert!(matches!(
            confirm(&toy, r#"{"code":402,"type":"error"}"#),
            Err(BridgeError::Rejected { .. })
        ));
        assert!(confirm(&toy, "").is_err());
    }

    #[tokio::test]
    async fn unknown_toy_is_disconnected_without_network() {
        let driver = LovenseConnect::new("http://127.0.0.1:9", Duration::from_millis(100)).unwrap();
        let toy = ToyId::new("Lush");
        assert!(!driver.is_connected(&toy));
        assert_eq!(
            driver.set_vibration(&toy, 5).await,
            Err(BridgeError::Disconnected(toy))
        );
    }

    #[tokio::test]
    async fn discover_then_vibrate_over_http() {
        let (url, server) = serve(vec![TOYS_BODY, OK_BODY]).await;
        let mut driver = LovenseConnect::new(&url, Duration::from_secs(2)).unwrap();

        let mut found = driver.discover().await.unwrap();
        found.sort();
        assert_eq!(found, vec![ToyId::new("Edge"), ToyId::new("Lush")]);
        assert!(driver.is_connected(&ToyId::new("Lush")));
        assert!(!driver.is_connected(&ToyId::new("Nora")));

        driver.set_vibration(&ToyId::new("Lush"), 7).await.unwrap();

        let requests = server.await.unwrap();
        assert!(requests[0].starts_with("GET /GetToys"));
        assert!(requests[1].starts_with("GET /Vibrate?v=7&t=c44f3312a1b0"));
    }

    #[tokio::test]
    async fn edge_toys_drive_both_motors() {
        let (url, server) = serve(vec![TOYS_BODY, OK_BODY, OK_BODY]).await;
        let mut driver = LovenseConnect::new(&url, Duration::from_secs(2)).unwrap();
        driver.discover().await.unwrap();

        driver.set_vibration(&ToyId::new("Edge"), 12).await.unwrap();

        let requests = server.await.unwrap();
        assert!(requests[1].starts_with("GET /Vibrate1?v=12"));
        assert!(requests[2].starts_with("GET /Vibrate2?v=12"));
    }

    #[tokio::test]
    async fn rejected_command_is_an_error() {
        let (url, server) = serve(vec![TOYS_BODY, r#"{"code":402,"type":"error"}"#]).await;
        let mut driver = LovenseConnect::new(&url, Duration::from_secs(2)).unwrap();
        driver.discover().await.unwrap();

        let err = driver.set_rotation(&ToyId::new("Lush"), 3).await.unwrap_err();
        assert!(matches!(err, BridgeError::Rejected { .. }));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn stop_all_zeroes_every_endpoint_in_one_round_trip() {
        let delay = Duration::from_millis(300);
        let (url, seen) = serve_slowly(delay, |line| {
            if line.starts_with("GET /GetToys") { TOYS_BODY } else { OK_BODY }
        })
        .await;
        let mut driver = LovenseConnect::new(&url, Duration::from_secs(2)).unwrap();
        driver.discover().await.unwrap();

        // Same budget the command channel gives a single command.
        let started = Instant::now();
        let result = tokio::time::timeout(Duration::from_secs(1), driver.stop_all(&ToyId::new("Lush")))
            .await
            .expect("stop-all must finish inside one command timeout");
        assert_eq!(result, Ok(()));
        assert!(started.elapsed() < delay * 3);

        let requests = seen.lock().unwrap().clone();
        for endpoint in STOP_ENDPOINTS {
            let prefix = format!("GET /{endpoint}?v=0&t=c44f3312a1b0");
            assert!(
                requests.iter().any(|r| r.starts_with(&prefix)),
                "no zero command for {endpoint}: {requests:?}"
            );
        }
    }

    #[tokio::test]
    async fn stop_all_succeeds_when_only_some_endpoints_confirm() {
        let (url, seen) = serve_slowly(Duration::ZERO, |line| {
            if line.starts_with("GET /GetToys") {
                TOYS_BODY
            } else if line.starts_with("GET /Vibrate?") {
                OK_BODY
            } else {
                r#"{"code":402,"type":"error"}"#
            }
        })
        .await;
        let mut driver = LovenseConnect::new(&url, Duration::from_secs(2)).unwrap();
        driver.discover().await.unwrap();

        assert_eq!(driver.stop_all(&ToyId::new("Lush")).await, Ok(()));
        assert_eq!(seen.lock().unwrap().len(), 1 + STOP_ENDPOINTS.len());
    }

    #[tokio::test]
    async fn stop_all_fails_when_nothing_confirms() {
        let (url, _seen) = serve_slowly(Duration::ZERO, |line| {
            if line.starts_with("GET /GetToys") { TOYS_BODY } else { r#"{"code":402,"type":"error"}"# }
        })
        .await;
        let mut driver = LovenseConnect::new(&url, Duration::from_secs(2)).unwrap();
        driver.discover().await.unwrap();

        let err = driver.stop_all(&ToyId::new("Lush")).await.unwrap_err();
        assert!(matches!(err, BridgeError::Rejected { .. }));
        assert_eq!(
            driver.stop_all(&ToyId::new("Nora")).await,
            Err(BridgeError::Disconnected(ToyId::new("Nora")))
        );
    }
}
