//! Twinkly LED string over its local HTTP API.
//!
//! Every operation starts from scratch: find the device (UDP broadcast,
//! or a configured host), log in with a fresh challenge, verify the
//! session, then issue the request. Devices change addresses and drop
//! sessions often enough that a cached handle is not worth trusting.

use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hasher};
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tokio::time;

use super::{Color, Device, Signal, SignalError};
use crate::tracing::prelude::*;

const DISCOVERY_PORT: u16 = 5555;
const DISCOVERY_REQUEST: &[u8] = b"\x01discover";

/// How long to wait for the first discovery reply.
const DISCOVERY_WAIT: Duration = Duration::from_secs(2);

/// Every successful API response carries this code.
const API_OK: u32 = 1000;

const AUTH_HEADER: &str = "X-Auth-Token";

#[derive(Debug, Clone)]
pub struct TwinklyConfig {
    /// Fixed device address. When unset, the device is found by
    /// broadcast on every call.
    pub host: Option<String>,

    /// Upper bound for a single HTTP request.
    pub timeout: Duration,
}

impl Default for TwinklyConfig {
    fn default() -> Self {
        Self {
            host: None,
            timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Serialize)]
struct LoginRequest {
    challenge: String,
}

#[derive(Deserialize)]
struct LoginResponse {
    authentication_token: String,
    #[serde(rename = "challenge-response")]
    challenge_response: String,
    code: u32,
}

#[derive(Serialize)]
struct VerifyRequest<'a> {
    #[serde(rename = "challenge-response")]
    challenge_response: &'a str,
}

#[derive(Serialize)]
struct ModeRequest {
    mode: &'static str,
}

#[derive(Serialize)]
struct ColorRequest {
    red: u8,
    green: u8,
    blue: u8,
}

impl From<Color> for ColorRequest {
    fn from(color: Color) -> Self {
        Self {
            red: color.red,
            green: color.green,
            blue: color.blue,
        }
    }
}

#[derive(Deserialize)]
struct ApiResponse {
    code: u32,
}

/// Twinkly device controller.
pub struct Twinkly {
    config: TwinklyConfig,
    http: reqwest::Client,
    // Seeded from OS randomness.
    challenge_seed: RandomState,
    challenge_step: AtomicU64,
}

/// An authenticated session with one device.
struct Session<'a> {
    http: &'a reqwest::Client,
    base_url: String,
    token: String,
}

impl Twinkly {
    pub fn new(config: TwinklyConfig) -> Result<Self, SignalError> {
        // The device is on the local network; never route it through a proxy.
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .no_proxy()
            .build()?;
        Ok(Self {
            config,
            http,
            challenge_seed: RandomState::new(),
            challenge_step: AtomicU64::new(0),
        })
    }

    /// Broadcast a discovery request and take the first valid reply.
    async fn broadcast_discover(&self) -> Result<Device, SignalError> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
        socket.set_broadcast(true)?;
        socket
            .send_to(DISCOVERY_REQUEST, (Ipv4Addr::BROADCAST, DISCOVERY_PORT))
            .await?;

        match time::timeout(DISCOVERY_WAIT, first_device(&socket)).await {
            Ok(result) => result,
            Err(_) => Err(SignalError::Discovery(format!(
                "no device answered within {:?}",
                DISCOVERY_WAIT
            ))),
        }
    }

    /// 32 random bytes, base64 encoded.
    fn challenge(&self) -> String {
        let step = self.challenge_step.fetch_add(1, Ordering::Relaxed);
        let mut bytes = Vec::with_capacity(32);
        for word in 0..4u64 {
            let mut hasher = self.challenge_seed.build_hasher();
            hasher.write_u64(step);
            hasher.write_u64(word);
            bytes.extend_from_slice(&hasher.finish().to_le_bytes());
        }
        BASE64.encode(bytes)
    }

    async fn login(&self) -> Result<Session<'_>, SignalError> {
        let device = self.discover().await?;
        let base_url = format!("http://{}/xled/v1", device.host);

        let login: LoginResponse = self
            .http
            .post(format!("{base_url}/login"))
            .json(&LoginRequest {
                challenge: self.challenge(),
            })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        check_code("login", login.code)?;

        let session = Session {
            http: &self.http,
            base_url,
            token: login.authentication_token,
        };
        session
            .post(
                "verify",
                &VerifyRequest {
                    challenge_response: &login.challenge_response,
                },
            )
            .await?;

        debug!(device = %device, "Authenticated with device");
        Ok(session)
    }
}

impl Session<'_> {
    async fn post<T>(&self, endpoint: &str, body: &T) -> Result<(), SignalError>
    where
        T: Serialize + ?Sized,
    {
        let response: ApiResponse = self
            .http
            .post(format!("{}/{}", self.base_url, endpoint))
            .header(AUTH_HEADER, &self.token)
            .json(body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        check_code(endpoint, response.code)
    }
}

fn check_code(endpoint: &str, code: u32) -> Result<(), SignalError> {
    if code == API_OK {
        Ok(())
    } else {
        Err(SignalError::Protocol(format!("{endpoint} returned code {code}")))
    }
}

/// Wait for the first datagram that parses as a discovery reply.
async fn first_device(socket: &UdpSocket) -> Result<Device, SignalError> {
    let mut buf = [0u8; 256];
    loop {
        let (len, from) = socket.recv_from(&mut buf).await?;
        match parse_discovery_reply(&buf[..len]) {
            Some(device) => return Ok(device),
            None => trace!(%from, len, "Ignoring unexpected discovery reply"),
        }
    }
}

/// Parse a discovery reply: four address bytes in reverse order, `OK`,
/// then the NUL-terminated device name.
fn parse_discovery_reply(reply: &[u8]) -> Option<Device> {
    if reply.len() < 7 || &reply[4..6] != b"OK" {
        return None;
    }

    let address = Ipv4Addr::new(reply[3], reply[2], reply[1], reply[0]);
    let name = reply[6..]
        .split(|b| *b == 0)
        .next()
        .filter(|name| !name.is_empty())
        .map(|name| String::from_utf8_lossy(name).into_owned());

    Some(Device {
        host: address.to_string(),
        name,
    })
}

#[async_trait]
impl Signal for Twinkly {
    async fn discover(&self) -> Result<Device, SignalError> {
        match &self.config.host {
            Some(host) => Ok(Device {
                host: host.clone(),
                name: None,
            }),
            None => self.broadcast_discover().await,
        }
    }

    async fn set_color(&self, color: Color) -> Result<(), SignalError> {
        let session = self.login().await?;
        session.post("led/mode", &ModeRequest { mode: "color" }).await?;
        session.post("led/color", &ColorRequest::from(color)).await
    }

    async fn resume_normal(&self) -> Result<(), SignalError> {
        let session = self.login().await?;
        session.post("led/mode", &ModeRequest { mode: "effect" }).await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use axum::extract::State;
    use axum::http::{HeaderMap, Uri};
    use axum::{Json, Router};
    use serde_json::{Value, json};
    use test_case::test_case;
    use tokio::net::TcpListener;

    use super::*;

    const TOKEN: &str = "tok-5a1e";
    const CHALLENGE_RESPONSE: &str = "c0ffee";

    #[derive(Debug, Clone)]
    struct Request {
        endpoint: String,
        token: Option<String>,
        body: Value,
    }

    /// Minimal xled API: answers every endpoint with code 1000 unless told
    /// otherwise, and records what it was sent.
    #[derive(Clone, Default)]
    struct FakeDevice {
        requests: Arc<Mutex<Vec<Request>>>,
        codes: Arc<Mutex<HashMap<String, u32>>>,
    }

    impl FakeDevice {
        fn requests(&self) -> Vec<Request> {
            self.requests.lock().unwrap().clone()
        }

        fn endpoints(&self) -> Vec<String> {
            self.requests().into_iter().map(|r| r.endpoint).collect()
        }

        fn answer_with(&self, endpoint: &str, code: u32) {
            self.codes.lock().unwrap().insert(endpoint.to_string(), code);
        }
    }

    async fn handle(
        State(device): State<FakeDevice>,
        uri: Uri,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> Json<Value> {
        let endpoint = uri.path().trim_start_matches("/xled/v1/").to_string();
        let token = headers
            .get(AUTH_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let code = device
            .codes
            .lock()
            .unwrap()
            .get(&endpoint)
            .copied()
            .unwrap_or(API_OK);

        device.requests.lock().unwrap().push(Request {
            endpoint: endpoint.clone(),
            token,
            body,
        });

        if endpoint == "login" {
            Json(json!({
                "authentication_token": TOKEN,
                "challenge-response": CHALLENGE_RESPONSE,
                "code": code,
            }))
        } else {
            Json(json!({ "code": code }))
        }
    }

    async fn start_device() -> (Twinkly, FakeDevice) {
        let device = FakeDevice::default();
        let app = Router::new().fallback(handle).with_state(device.clone());

        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let twinkly = Twinkly::new(TwinklyConfig {
            host: Some(addr.to_string()),
            ..TwinklyConfig::default()
        })
        .unwrap();
        (twinkly, device)
    }

    #[tokio::test]
    async fn set_color_logs_in_then_sets_mode_and_color() {
        let (twinkly, device) = start_device().await;

        twinkly.set_color(Color::RED).await.unwrap();

        assert_eq!(
            device.endpoints(),
            ["login", "verify", "led/mode", "led/color"]
        );

        let requests = device.requests();
        let challenge = requests[0].body["challenge"].as_str().unwrap();
        assert_eq!(BASE64.decode(challenge).unwrap().len(), 32);
        assert_eq!(requests[0].token, None);

        for request in &requests[1..] {
            assert_eq!(request.token.as_deref(), Some(TOKEN), "{}", request.endpoint);
        }
        assert_eq!(
            requests[1].body,
            json!({ "challenge-response": CHALLENGE_RESPONSE })
        );
        assert_eq!(requests[2].body, json!({ "mode": "color" }));
        assert_eq!(
            requests[3].body,
            json!({ "red": 255, "green": 0, "blue": 0 })
        );
    }

    #[tokio::test]
    async fn resume_normal_switches_to_effect_mode() {
        let (twinkly, device) = start_device().await;

        twinkly.resume_normal().await.unwrap();

        assert_eq!(device.endpoints(), ["login", "verify", "led/mode"]);
        assert_eq!(device.requests()[2].body, json!({ "mode": "effect" }));
    }

    #[tokio::test]
    async fn every_call_logs_in_again() {
        let (twinkly, device) = start_device().await;

        twinkly.set_warning().await.unwrap();
        twinkly.resume_normal().await.unwrap();

        let logins = device
            .endpoints()
            .into_iter()
            .filter(|e| e == "login")
            .count();
        assert_eq!(logins, 2);
    }

    #[test_case("login", &["login"]; "login refused")]
    #[test_case("verify", &["login", "verify"]; "verify refused")]
    #[test_case("led/mode", &["login", "verify", "led/mode"]; "mode refused")]
    #[test_case("led/color", &["login", "verify", "led/mode", "led/color"]; "color refused")]
    #[tokio::test]
    async fn error_code_aborts_the_sequence(refusing: &str, reached: &[&str]) {
        let (twinkly, device) = start_device().await;
        device.answer_with(refusing, 1102);

        let result = twinkly.set_color(Color::AMBER).await;

        assert!(
            matches!(result, Err(SignalError::Protocol(ref msg)) if msg.contains(refusing)),
            "{result:?}"
        );
        assert_eq!(device.endpoints(), reached);
    }

    #[tokio::test]
    async fn unreachable_device_is_an_http_error() {
        // Bind then drop to get a port nothing listens on.
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let twinkly = Twinkly::new(TwinklyConfig {
            host: Some(addr.to_string()),
            ..TwinklyConfig::default()
        })
        .unwrap();

        assert!(matches!(
            twinkly.resume_normal().await,
            Err(SignalError::Http(_))
        ));
    }

    #[test_case(b"\x07\x01\xa8\xc0OKTwinkly_33AAFF\x00", "192.168.1.7", Some("Twinkly_33AAFF"); "named")]
    #[test_case(b"\x0a\x00\x00\x0aOKx\x00", "10.0.0.10", Some("x"); "short name")]
    #[test_case(b"\x01\x00\x00\x7fOK\x00", "127.0.0.1", None; "empty name")]
    #[test_case(b"\x01\x00\x00\x7fOKno-terminator", "127.0.0.1", Some("no-terminator"); "unterminated")]
    fn parses_discovery_reply(reply: &[u8], host: &str, name: Option<&str>) {
        let device = parse_discovery_reply(reply).unwrap();
        assert_eq!(device.host, host);
        assert_eq!(device.name.as_deref(), name);
    }

    #[test_case(b""; "empty")]
    #[test_case(b"\x01discover"; "our own request")]
    #[test_case(b"\x07\x01\xa8\xc0NOname\x00"; "not ok")]
    #[test_case(b"\x07\x01\xa8\xc0OK"; "truncated")]
    fn rejects_discovery_reply(reply: &[u8]) {
        assert_eq!(parse_discovery_reply(reply), None);
    }

    #[test]
    fn challenge_is_32_bytes_and_fresh() {
        let twinkly = Twinkly::new(TwinklyConfig::default()).unwrap();
        let first = BASE64.decode(twinkly.challenge()).unwrap();
        let second = BASE64.decode(twinkly.challenge()).unwrap();

        assert_eq!(first.len(), 32);
        assert_ne!(first, second);
    }

    #[test]
    fn api_codes() {
        assert!(check_code("led/mode", API_OK).is_ok());
        assert!(matches!(
            check_code("led/mode", 1102),
            Err(SignalError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn configured_host_skips_broadcast() {
        let twinkly = Twinkly::new(TwinklyConfig {
            host: Some("tree.local".into()),
            ..TwinklyConfig::default()
        })
        .unwrap();

        assert_eq!(
            twinkly.discover().await.unwrap(),
            Device {
                host: "tree.local".into(),
                name: None,
            }
        );
    }

    #[test]
    fn color_body_uses_channel_names() {
        let body = serde_json::to_value(ColorRequest::from(Color::AMBER)).unwrap();
        assert_eq!(
            body,
            serde_json::json!({ "red": 255, "green": 255, "blue": 0 })
        );
    }
}
