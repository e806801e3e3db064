use std::net::SocketAddr;
use std::time::Duration;

use envconfig::Envconfig;

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    #[envconfig(from = "HTTP_PORT", default = "8080")]
    pub http_port: u16,
    #[envconfig(from = "HTTP_BIND", default = "0.0.0.0")]
    pub http_bind: String,
    /// Bound of the controller to server route-event channel.
    #[envconfig(from = "ROUTE_CHANNEL_DEPTH", default = "16")]
    pub route_channel_depth: usize,
    #[envconfig(from = "SHUTDOWN_TIMEOUT_SECS", default = "10")]
    pub shutdown_timeout_secs: u64,
    /// `kube` or `memory`
    #[envconfig(from = "STORE_TYPE", default = "kube")]
    pub store_type: String,
    #[envconfig(from = "WATCH_CRDS", default = "true")]
    pub watch_crds: bool,
    #[envconfig(from = "WATCH_DATAMODELS", default = "true")]
    pub watch_datamodels: bool,
    // "json"/"structured" or "plain"/"text"
    #[envconfig(from = "LOG_FORMAT")]
    pub log_format: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreType {
    Kube,
    Memory,
}

impl Config {
    pub fn listen_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(format!("{}:{}", self.http_bind, self.http_port).parse()?)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn store(&self) -> anyhow::Result<StoreType> {
        match self.store_type.to_ascii_lowercase().as_str() {
            "kube" | "k8s" => Ok(StoreType::Kube),
            "memory" | "mem" => Ok(StoreType::Memory),
            other => anyhow::bail!("unsupported STORE_TYPE '{other}'"),
        }
    }

    pub fn json_logs(&self) -> bool {
        matches!(
            self.log_format.as_deref().map(|s| s.to_ascii_lowercase()),
            Some(ref v) if v == "json" || v == "structured"
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults() {
        let conf = Config::init_from_hashmap(&HashMap::new()).unwrap();
        assert_eq!(conf.http_port, 8080);
        assert_eq!(conf.route_channel_depth, 16);
        assert_eq!(conf.shutdown_timeout(), Duration::from_secs(10));
        assert_eq!(conf.store().unwrap(), StoreType::Kube);
        assert!(conf.watch_crds);
        assert!(!conf.json_logs());
        assert_eq!(conf.listen_addr().unwrap().to_string(), "0.0.0.0:8080");
    }

    #[test]
    fn overrides() {
        let env: HashMap<String, String> = [
            ("HTTP_PORT", "9090"),
            ("HTTP_BIND", "127.0.0.1"),
            ("STORE_TYPE", "memory"),
            ("WATCH_CRDS", "false"),
            ("LOG_FORMAT", "JSON"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        let conf = Config::init_from_hashmap(&env).unwrap();
        assert_eq!(conf.listen_addr().unwrap().to_string(), "127.0.0.1:9090");
        assert_eq!(conf.store().unwrap(), StoreType::Memory);
        assert!(!conf.watch_crds);
        assert!(conf.json_logs());
    }

    #[test]
    fn rejects_unknown_store() {
        let env: HashMap<String, String> =
            [("STORE_TYPE".to_string(), "etcd".to_string())].into();
        let conf = Config::init_from_hashmap(&env).unwrap();
        assert!(conf.store().is_err());
    }
}
