use serde::{Deserialize, Serialize};

/// HTTP/WebSocket listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default = "d_port")]
    pub port: u16,
    /// Process-wide concurrent request ceiling (backpressure protection).
    #[serde(default = "d_max_concurrent")]
    pub max_concurrent: usize,
    /// Origins allowed to open browser sessions. `["*"]` allows all.
    #[serde(default = "d_origins")]
    pub cors_allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: d_host(),
            port: d_port(),
            max_concurrent: d_max_concurrent(),
            cors_allowed_origins: d_origins(),
        }
    }
}

fn d_host() -> String {
    "127.0.0.1".into()
}
fn d_port() -> u16 {
    8080
}
fn d_max_concurrent() -> usize {
    256
}
fn d_origins() -> Vec<String> {
    vec!["*".into()]
}
