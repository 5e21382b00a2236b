//! HTTP control API.
//!
//! | Method | Path         | Body                     |
//! |--------|--------------|--------------------------|
//! | GET    | `/health`    |                          |
//! | GET    | `/stations`  | (`?genre=` filter)       |
//! | GET    | `/status`    |                          |
//! | POST   | `/play`      | `{"station_id": "vov1"}` |
//! | POST   | `/stop`      |                          |
//! | POST   | `/volume`    | `{"volume": 60}`         |
//! | POST   | `/activity`  | `{"activity": "speaking"}` |
//! | POST   | `/test-tone` | `{"duration_ms": 1000}`  |

use std::io::Read;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use radio_player::{RadioError, RadioPlayer, SharedActivity};
use radio_types::{DeviceActivity, RadioStatus, StationListing};
use serde::{Deserialize, Serialize};
use tiny_http::{Header, Method, Response, Server, StatusCode};

const MAX_TEST_TONE_MS: u64 = 10_000;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Deserialize)]
struct PlayRequest {
    station_id: String,
}

#[derive(Deserialize)]
struct VolumeRequest {
    volume: i32,
}

#[derive(Deserialize)]
struct ActivityRequest {
    activity: DeviceActivity,
}

#[derive(Deserialize)]
struct TestToneRequest {
    #[serde(default = "default_tone_ms")]
    duration_ms: u64,
}

fn default_tone_ms() -> u64 {
    1_000
}

/// Request handling, independent of the HTTP server.
#[derive(Clone)]
pub struct ControlSurface {
    player: Arc<RadioPlayer>,
    activity: SharedActivity,
}

type Reply = (u16, Vec<u8>);

impl ControlSurface {
    pub fn new(player: Arc<RadioPlayer>, activity: SharedActivity) -> Self {
        Self { player, activity }
    }

    /// Route one request. `path` may carry a query string.
    pub fn handle(&self, method: &Method, path: &str, body: &str) -> Reply {
        let (route, query) = path.split_once('?').unwrap_or((path, ""));
        match (method, route) {
            (Method::Get, "/health") => json_response(
                200,
                &HealthResponse {
                    status: "ok",
                    version: env!("CARGO_PKG_VERSION"),
                },
            ),
            (Method::Get, "/stations") => {
                let stations = match query_param(query, "genre") {
                    Some(genre) => self.player.stations_by_genre(genre),
                    None => self.player.list_stations(),
                };
                json_response(200, &StationListing::new(stations))
            }
            (Method::Get, "/status") => json_response(200, &self.player.status()),
            (Method::Post, "/play") => match serde_json::from_str::<PlayRequest>(body) {
                Ok(req) => self.play(&req.station_id),
                Err(e) => error_response(400, &format!("invalid json: {e}")),
            },
            (Method::Post, "/stop") => {
                self.player.stop();
                self.status_reply()
            }
            (Method::Post, "/volume") => match serde_json::from_str::<VolumeRequest>(body) {
                Ok(req) => {
                    self.player.set_volume(req.volume);
                    self.status_reply()
                }
                Err(e) => error_response(400, &format!("invalid json: {e}")),
            },
            (Method::Post, "/activity") => match serde_json::from_str::<ActivityRequest>(body) {
                Ok(req) => {
                    self.activity.set(req.activity);
                    json_response(200, &serde_json::json!({ "activity": req.activity }))
                }
                Err(e) => error_response(400, &format!("invalid json: {e}")),
            },
            (Method::Post, "/test-tone") => {
                let body = if body.trim().is_empty() { "{}" } else { body };
                match serde_json::from_str::<TestToneRequest>(body) {
                    Ok(req) => {
                        let ms = req.duration_ms.min(MAX_TEST_TONE_MS);
                        let samples = self.player.test_tone(Duration::from_millis(ms));
                        let reply = serde_json::json!({ "duration_ms": ms, "samples": samples });
                        json_response(200, &reply)
                    }
                    Err(e) => error_response(400, &format!("invalid json: {e}")),
                }
            }
            _ => error_response(404, "not found"),
        }
    }

    fn play(&self, station_id: &str) -> Reply {
        match self.player.play(station_id) {
            Ok(()) => self.status_reply(),
            Err(e @ RadioError::NotFound(_)) => error_response(404, &e.to_string()),
            Err(e) if e.is_connection_failure() => error_response(502, &e.to_string()),
            Err(e) => error_response(500, &e.to_string()),
        }
    }

    fn status_reply(&self) -> Reply {
        let status: RadioStatus = self.player.status();
        json_response(200, &status)
    }
}

/// Serve `surface` on `bind` from a background thread.
pub fn spawn_http_server(
    bind: SocketAddr,
    surface: ControlSurface,
) -> anyhow::Result<std::thread::JoinHandle<()>> {
    let server = Server::http(bind)
        .map_err(|e| anyhow::anyhow!("http server bind {bind} failed: {e}"))?;
    tracing::info!(bind = %bind, "http api listening");

    let handle = std::thread::Builder::new()
        .name("radiod-http".to_string())
        .spawn(move || {
            for mut request in server.incoming_requests() {
                let method = request.method().clone();
                let url = request.url().to_string();
                let mut body = String::new();
                let (status, payload) = match request.as_reader().read_to_string(&mut body) {
                    Ok(_) => surface.handle(&method, &url, &body),
                    Err(e) => error_response(400, &format!("read body failed: {e}")),
                };

                let mut response =
                    Response::from_data(payload).with_status_code(StatusCode(status));
                if let Ok(header) = Header::from_bytes("Content-Type", "application/json") {
                    response = response.with_header(header);
                }
                if should_log_path(&url) {
                    tracing::info!(method = %method, path = %url, status, "http request");
                }
                let _ = request.respond(response);
            }
        })?;
    Ok(handle)
}

fn query_param<'a>(query: &'a str, key: &str) -> Option<&'a str> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| *k == key)
        .map(|(_, v)| v)
        .filter(|v| !v.is_empty())
}

fn json_response<T: Serialize>(status: u16, body: &T) -> Reply {
    match serde_json::to_vec(body) {
        Ok(json) => (status, json),
        Err(e) => error_response(500, &format!("json encode error: {e}")),
    }
}

fn error_response(status: u16, message: &str) -> Reply {
    let body = serde_json::json!({ "error": message });
    (status, body.to_string().into_bytes())
}

fn should_log_path(path: &str) -> bool {
    !matches!(path, "/status" | "/health")
}
