use std::net::SocketAddr;

use crate::config::Config;
use crate::error::ConfigError;

/// Upper bound for `session.terminate_grace_ms` (ten minutes).
pub const MAX_TERMINATE_GRACE_MS: u64 = 600_000;

/// Validate a [`Config`], returning every violation found.
pub fn validate(config: &Config) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    if config.server.listen.parse::<SocketAddr>().is_err() {
        errors.push(ConfigError::Validation {
            field: "server.listen".to_string(),
            message: format!("not a socket address: {:?}", config.server.listen),
        });
    }

    if config.session.terminate_grace_ms > MAX_TERMINATE_GRACE_MS {
        errors.push(ConfigError::Validation {
            field: "session.terminate_grace_ms".to_string(),
            message: format!(
                "must be at most {MAX_TERMINATE_GRACE_MS}, got {}",
                config.session.terminate_grace_ms
            ),
        });
    }

    if config.build.cargo.trim().is_empty() {
        errors.push(ConfigError::Validation {
            field: "build.cargo".to_string(),
            message: "must not be empty".to_string(),
        });
    }

    if config.build.default_output.as_os_str().is_empty() {
        errors.push(ConfigError::Validation {
            field: "build.default_output".to_string(),
            message: "must not be empty".to_string(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn default_config_passes() {
        assert!(validate(&Config::default()).is_ok());
    }

    #[test]
    fn bad_listen_rejected() {
        let mut cfg = Config::default();
        cfg.server.listen = "localhost".into();
        let errs = validate(&cfg).unwrap_err();
        assert_eq!(errs.len(), 1);
        assert!(errs[0].to_string().contains("server.listen"));
    }

    #[test]
    fn ipv6_listen_accepted() {
        let mut cfg = Config::default();
        cfg.server.listen = "[::1]:4711".into();
        assert!(validate(&cfg).is_ok());
    }

    #[test]
    fn grace_bounds() {
        let mut cfg = Config::default();
        cfg.session.terminate_grace_ms = 0;
        assert!(validate(&cfg).is_ok());
        cfg.session.terminate_grace_ms = MAX_TERMINATE_GRACE_MS;
        assert!(validate(&cfg).is_ok());
        cfg.session.terminate_grace_ms = MAX_TERMINATE_GRACE_MS + 1;
        let errs = validate(&cfg).unwrap_err();
        assert!(errs[0].to_string().contains("session.terminate_grace_ms"));
    }

    #[test]
    fn all_errors_collected() {
        let mut cfg = Config::default();
        cfg.server.listen = String::new();
        cfg.build.cargo = "  ".into();
        cfg.build.default_output = PathBuf::new();
        let errs = validate(&cfg).unwrap_err();
        assert_eq!(errs.len(), 3);
    }
}
