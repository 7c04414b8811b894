use std::env;

/// Deployment settings read from the environment.
///
/// The shared-namespace store (etcd) and the proxy that forwards task
/// results are external services; only their addresses are carried here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub etcd_host: String,
    pub etcd_port: u16,
    pub proxy_host: String,
    pub proxy_port: u16,
    pub on_complete_port: u16,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup. `from_env` is this over the process environment.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let port =
            |key: &str, default: u16| get(key).and_then(|p| p.parse().ok()).unwrap_or(default);
        Self {
            etcd_host: get("ETCD_HOST").unwrap_or_else(|| "localhost".into()),
            etcd_port: port("ETCD_PORT", 2379),
            proxy_host: get("PROXY_HOST").unwrap_or_else(|| "localhost".into()),
            proxy_port: port("PROXY_PORT", 8080),
            on_complete_port: port("SELF_ON_COMPLETE_PORT", 4040),
        }
    }

    pub fn etcd_endpoint(&self) -> String {
        format!("http://{}:{}", self.etcd_host, self.etcd_port)
    }

    pub fn proxy_endpoint(&self) -> String {
        format!("http://{}:{}", self.proxy_host, self.proxy_port)
    }

    /// Address the task-completion listener binds to.
    pub fn on_complete_addr(&self) -> String {
        format!("0.0.0.0:{}", self.on_complete_port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}
