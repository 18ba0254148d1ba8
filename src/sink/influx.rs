use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{encode_body, PointSink, SinkError};
use crate::model::Point;

/// Connection settings for the InfluxDB 1.x write endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfluxSettings {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub ssl: bool,
    pub username: Option<String>,
    pub password: Option<String>,
    pub timeout_secs: u64,
}

impl Default for InfluxSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8086,
            database: "insight".to_string(),
            ssl: false,
            username: None,
            password: None,
            timeout_secs: 30,
        }
    }
}

impl InfluxSettings {
    pub fn base_url(&self) -> String {
        let scheme = if self.ssl { "https" } else { "http" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }

    pub fn write_url(&self) -> String {
        format!("{}/write", self.base_url())
    }
}

/// Posts line protocol to `/write?db=<database>&precision=ns`
pub struct InfluxSink {
    agent: ureq::Agent,
    settings: InfluxSettings,
    url: String,
}

impl InfluxSink {
    pub fn new(settings: InfluxSettings) -> anyhow::Result<Self> {
        if settings.host.trim().is_empty() {
            anyhow::bail!("InfluxDB host must not be empty");
        }
        if settings.database.trim().is_empty() {
            anyhow::bail!("InfluxDB database must not be empty");
        }
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(settings.timeout_secs.max(1)))
            .build();
        let url = settings.write_url();
        Ok(Self {
            agent,
            settings,
            url,
        })
    }
}

impl PointSink for InfluxSink {
    fn write_points(&mut self, points: &[Point]) -> Result<(), SinkError> {
        let mut request = self
            .agent
            .post(&self.url)
            .query("db", &self.settings.database)
            .query("precision", "ns")
            .set("Content-Type", "text/plain; charset=utf-8");
        if let Some(username) = &self.settings.username {
            request = request.query("u", username);
        }
        if let Some(password) = &self.settings.password {
            request = request.query("p", password);
        }

        match request.send_string(&encode_body(points)) {
            Ok(_) => Ok(()),
            Err(ureq::Error::Status(status, response)) => {
                let body = response.into_string().unwrap_or_default();
                Err(classify_status(status, body))
            }
            Err(ureq::Error::Transport(transport)) => Err(self.classify_transport(&transport)),
        }
    }

    fn describe(&self) -> String {
        format!("InfluxDB at {}", self.settings.base_url())
    }
}

impl InfluxSink {
    fn classify_transport(&self, transport: &ureq::Transport) -> SinkError {
        let message = transport.to_string();
        let endpoint = self.settings.base_url();
        match transport.kind() {
            ureq::ErrorKind::InvalidUrl
            | ureq::ErrorKind::UnknownScheme
            | ureq::ErrorKind::InsecureRequestHttpsOnly
            | ureq::ErrorKind::InvalidProxyUrl => SinkError::Request(message),
            _ if looks_like_tls(&message) => SinkError::Tls { endpoint, message },
            ureq::ErrorKind::Io => SinkError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                message,
            )),
            _ => SinkError::Connection { endpoint, message },
        }
    }
}

fn looks_like_tls(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("tls") || lower.contains("certificate") || lower.contains("handshake")
}

/// 4xx means the payload or database was rejected; 5xx is the server's problem
fn classify_status(status: u16, body: String) -> SinkError {
    if (400..500).contains(&status) {
        SinkError::Client { status, body }
    } else {
        SinkError::Server { status, body }
    }
}
