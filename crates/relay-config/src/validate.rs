use std::net::SocketAddr;
use std::time::Duration;

use crate::{
    ConfigError, GatewayConfig, HubConfig, IngestConfig, RelayConfig, DEFAULT_WS_PATH, STATUS_PATH,
};

impl RelayConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let ingest_addr = self.ingest.socket_addr()?;
        let gateway_addr = self.gateway.socket_addr()?;
        // Port 0 asks the OS for an ephemeral port, so the two never clash.
        if ingest_addr == gateway_addr && ingest_addr.port() != 0 {
            return Err(ConfigError::Validation(format!(
                "ingest.listen_addr and gateway.listen_addr must differ (both {ingest_addr})"
            )));
        }

        if self.ingest.max_frame_bytes == 0 {
            return Err(ConfigError::Validation(
                "ingest.max_frame_bytes must be > 0".to_string(),
            ));
        }

        if self.gateway.mailbox_capacity == 0 {
            return Err(ConfigError::Validation(
                "gateway.mailbox_capacity must be > 0".to_string(),
            ));
        }
        if !self.gateway.ws_path.starts_with('/') {
            return Err(ConfigError::Validation(format!(
                "gateway.ws_path must start with '/': {}",
                self.gateway.ws_path
            )));
        }
        if self.gateway.ws_path == "/" || self.gateway.ws_path == STATUS_PATH {
            return Err(ConfigError::Validation(format!(
                "gateway.ws_path collides with a built-in route: {}",
                self.gateway.ws_path
            )));
        }

        if self.hub.command_buffer == 0 {
            return Err(ConfigError::Validation(
                "hub.command_buffer must be > 0".to_string(),
            ));
        }
        self.hub.shutdown_grace_duration()?;
        Ok(())
    }

    pub fn normalize(&mut self) {
        if self.ingest.listen_addr.trim().is_empty() {
            self.ingest.listen_addr = IngestConfig::default().listen_addr;
        }
        if self.gateway.listen_addr.trim().is_empty() {
            self.gateway.listen_addr = GatewayConfig::default().listen_addr;
        }
        if self.hub.shutdown_grace.trim().is_empty() {
            self.hub.shutdown_grace = HubConfig::default().shutdown_grace;
        }

        self.ingest.listen_addr = self.ingest.listen_addr.trim().to_string();
        self.gateway.listen_addr = self.gateway.listen_addr.trim().to_string();

        let ws_path = self.gateway.ws_path.trim().trim_end_matches('/');
        self.gateway.ws_path = if ws_path.is_empty() {
            DEFAULT_WS_PATH.to_string()
        } else if ws_path.starts_with('/') {
            ws_path.to_string()
        } else {
            format!("/{ws_path}")
        };
    }
}

impl IngestConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        parse_socket_addr("ingest.listen_addr", &self.listen_addr)
    }
}

impl GatewayConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        parse_socket_addr("gateway.listen_addr", &self.listen_addr)
    }
}

impl HubConfig {
    pub fn shutdown_grace_duration(&self) -> Result<Duration, ConfigError> {
        parse_duration_value("hub.shutdown_grace", &self.shutdown_grace)
    }
}

fn parse_socket_addr(field: &str, raw: &str) -> Result<SocketAddr, ConfigError> {
    raw.parse::<SocketAddr>().map_err(|err| {
        ConfigError::Validation(format!("{field} must be an ip:port address ({err}): {raw}"))
    })
}

fn parse_duration_value(field: &str, raw: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(raw).map_err(|err| {
        ConfigError::Validation(format!("{field} must be a valid duration string ({err})"))
    })
}
