//! Per-request limits and the values advertised to GET_VALUES queries.

use fcgi_transport::ServiceConfig;

/// Upper bounds on what one request may stream in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestLimits {
    /// Total PARAMS content bytes.
    pub max_params_bytes: usize,
    /// Total STDIN content bytes.
    pub max_body_bytes: usize,
}

impl Default for RequestLimits {
    fn default() -> Self {
        Self {
            max_params_bytes: 1024 * 1024,
            max_body_bytes: 64 * 1024 * 1024,
        }
    }
}

/// Answers to the standard GET_VALUES variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerInfo {
    pub max_conns: usize,
    pub max_reqs: usize,
}

impl ServerInfo {
    /// One request per connection, one connection per worker.
    pub fn from_config(config: &ServiceConfig) -> Self {
        Self {
            max_conns: config.worker_count,
            max_reqs: config.worker_count,
        }
    }

    /// Value for a GET_VALUES variable, or `None` if it is not one we know.
    pub fn lookup(&self, name: &str) -> Option<String> {
        match name {
            "FCGI_MAX_CONNS" => Some(self.max_conns.to_string()),
            "FCGI_MAX_REQS" => Some(self.max_reqs.to_string()),
            "FCGI_MPXS_CONNS" => Some("0".to_string()),
            _ => None,
        }
    }
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self::from_config(&ServiceConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_info_follows_worker_count() {
        let config = ServiceConfig {
            worker_count: 3,
            ..ServiceConfig::default()
        };
        let info = ServerInfo::from_config(&config);
        assert_eq!(info.lookup("FCGI_MAX_CONNS").as_deref(), Some("3"));
        assert_eq!(info.lookup("FCGI_MAX_REQS").as_deref(), Some("3"));
        assert_eq!(info.lookup("FCGI_MPXS_CONNS").as_deref(), Some("0"));
        assert_eq!(info.lookup("FCGI_SOMETHING_ELSE"), None);
    }
}
