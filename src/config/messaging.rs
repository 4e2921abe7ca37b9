//! Kafka configuration types.

use serde::Deserialize;

/// Kafka connection configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct KafkaConfig {
    /// Bootstrap brokers.
    pub brokers: Vec<String>,
    /// Client identifier reported to the brokers.
    pub client_id: String,
    /// Consumer group ID.
    pub group_id: String,
    /// SASL username (optional, for authenticated clusters).
    pub sasl_username: Option<String>,
    /// SASL password (optional, for authenticated clusters).
    pub sasl_password: Option<String>,
    /// SASL mechanism (PLAIN, SCRAM-SHA-256, SCRAM-SHA-512).
    pub sasl_mechanism: Option<String>,
    /// Security protocol (PLAINTEXT, SSL, SASL_PLAINTEXT, SASL_SSL).
    pub security_protocol: Option<String>,
    /// SSL CA certificate path (for SSL connections).
    pub ssl_ca_location: Option<String>,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: vec!["broker:9092".to_string()],
            client_id: "worker-jsonata".to_string(),
            group_id: "worker-jsonata".to_string(),
            sasl_username: None,
            sasl_password: None,
            sasl_mechanism: None,
            security_protocol: None,
            ssl_ca_location: None,
        }
    }
}

impl KafkaConfig {
    /// Comma-joined broker list.
    pub fn bootstrap_servers(&self) -> String {
        self.brokers.join(",")
    }

    /// Build the transport-level config.
    #[cfg(feature = "kafka")]
    pub fn transport_config(&self) -> crate::transport::KafkaTransportConfig {
        let mut config = crate::transport::KafkaTransportConfig::new(
            self.bootstrap_servers(),
            &self.client_id,
            &self.group_id,
        );
        if let (Some(username), Some(password)) = (&self.sasl_username, &self.sasl_password) {
            config = config.with_sasl(
                username,
                password,
                self.sasl_mechanism.as_deref().unwrap_or("PLAIN"),
            );
        }
        if let Some(protocol) = &self.security_protocol {
            config = config.with_security_protocol(protocol);
        }
        if let Some(ca_location) = &self.ssl_ca_location {
            config = config.with_ssl_ca(ca_location);
        }
        config
    }

    pub(super) fn normalize(&mut self) {
        self.brokers = self
            .brokers
            .iter()
            .map(|b| b.trim().to_string())
            .filter(|b| !b.is_empty())
            .collect();
        self.client_id = self.client_id.trim().to_string();
        self.group_id = self.group_id.trim().to_string();
        for value in [
            &mut self.sasl_username,
            &mut self.sasl_password,
            &mut self.sasl_mechanism,
            &mut self.security_protocol,
            &mut self.ssl_ca_location,
        ] {
            super::blank_to_none(value);
        }
    }
}
