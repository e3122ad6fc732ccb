//! Demo mode: three simulated hosts, one of which never answers.

use sshtop_engine::transport::simulated::{SimulatedHost, SimulatedTransport};

use crate::config::{AuthMethod, Config, ServerEntry};

fn entry(name: &str, host: &str) -> ServerEntry {
    ServerEntry {
        name: name.into(),
        host: host.into(),
        port: 22,
        username: "demo".into(),
        auth: AuthMethod::Key,
        key_path: Some("/dev/null".into()),
        password_env: None,
    }
}

/// Config listing the demo hosts; never saved.
pub fn demo_config() -> Config {
    Config {
        servers: vec![
            entry("demo-web", "web.demo"),
            entry("demo-db", "db.demo"),
            entry("demo-offline", "offline.demo"),
        ],
        ..Config::default()
    }
}

pub fn demo_transport() -> SimulatedTransport {
    SimulatedTransport::new()
        .with_host(
            "web.demo",
            SimulatedHost {
                cores: 4,
                mem_total_kb: 8 * 1024 * 1024,
                seed: 7,
                ..Default::default()
            },
        )
        .with_host(
            "db.demo",
            SimulatedHost {
                cores: 16,
                mem_total_kb: 64 * 1024 * 1024,
                // an occasional dropped link shows the reconnect path
                drop_every: 97,
                seed: 42,
                ..Default::default()
            },
        )
        .with_host(
            "offline.demo",
            SimulatedHost {
                unreachable: true,
                ..Default::default()
            },
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demo_config_is_valid() {
        let cfg = demo_config();
        cfg.validate().unwrap();
        assert_eq!(cfg.servers.len(), 3);
    }
}
