//! Definition store configuration types.

use serde::Deserialize;

/// MongoDB-specific configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MongodbConfig {
    /// MongoDB connection URI, without a database path.
    pub uri: String,
    /// Database name.
    pub database: String,
}

impl Default for MongodbConfig {
    fn default() -> Self {
        Self {
            uri: "mongodb://mongodb:27017".to_string(),
            database: "control-api".to_string(),
        }
    }
}

impl MongodbConfig {
    /// URI with credentials masked, for logging.
    pub fn redacted_uri(&self) -> String {
        redact_credentials(&self.uri)
    }

    pub(super) fn normalize(&mut self) {
        self.uri = self.uri.trim().trim_end_matches('/').to_string();
        self.database = self.database.trim().to_string();
    }
}

/// Mask `user:pass@` in a connection URI.
pub fn redact_credentials(uri: &str) -> String {
    let Some(scheme_end) = uri.find("://") else {
        return uri.to_string();
    };
    let authority_start = scheme_end + 3;
    match uri.rfind('@') {
        Some(at) if at > authority_start => {
            format!("{}***:***{}", &uri[..authority_start], &uri[at..])
        }
        _ => uri.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_credentials() {
        assert_eq!(
            redact_credentials("mongodb://admin:s3cret@db:27017"),
            "mongodb://***:***@db:27017"
        );
    }

    #[test]
    fn test_redact_leaves_plain_uri() {
        assert_eq!(
            redact_credentials("mongodb://mongodb:27017"),
            "mongodb://mongodb:27017"
        );
        assert_eq!(redact_credentials("not a uri"), "not a uri");
    }

    #[test]
    fn test_normalize_strips_trailing_slashes() {
        let mut config = MongodbConfig {
            uri: " mongodb://db:27017// ".to_string(),
            database: " control-api ".to_string(),
        };
        config.normalize();
        assert_eq!(config.uri, "mongodb://db:27017");
        assert_eq!(config.database, "control-api");
    }
}
