use std::str::FromStr;
use std::time;

use envconfig::Envconfig;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "PORT", default = "8080")]
    pub port: u16,

    /// Shared secret GitLab sends as `X-Gitlab-Token`. Unset or empty
    /// accepts every hook.
    #[envconfig(from = "HOOK_SECRET")]
    pub hook_secret: Option<String>,

    #[envconfig(default = "false")]
    pub export_prometheus: bool,

    #[envconfig(from = "REQUEST_TIMEOUT_MS", default = "10000")]
    pub request_timeout: EnvMsDuration,

    #[envconfig(default = "10000")]
    pub max_queued_events: usize,

    #[envconfig(default = "16")]
    pub max_concurrent_sends: usize,

    pub otel_url: Option<String>,

    #[envconfig(default = "buildevents")]
    pub otel_service_name: String,
}

impl Config {
    /// Produce a host:port address for binding a TcpListener.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvMsDuration(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(time::Duration::from_millis(ms)))
    }
}
