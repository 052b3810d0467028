mod file_config;

pub use file_config::{
    CircuitBreakerFileConfig, DispatchConfig, FileConfig, PushConfig, RetryConfig,
    TimeoutProfileConfig,
};

use crate::db_access::{CircuitBreakerConfig, RetryPolicy, TimeoutProfile, TimeoutProfiles};
use crate::notifications::{DispatchSettings, NotificationConfig, VapidCredentials};
use anyhow::{bail, Result};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_VAPID_SUBJECT: &str = "mailto:admin@localhost";
const DEFAULT_RELAY_TIMEOUT_SEC: u64 = 10;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_path: Option<PathBuf>,
    pub metrics_port: u16,
    pub relay_url: Option<String>,
    pub relay_timeout_sec: Option<u64>,
    pub vapid_public_key: Option<String>,
    pub vapid_private_key: Option<String>,
    pub vapid_subject: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_path: PathBuf,
    /// 0 disables the metrics listener.
    pub metrics_port: u16,
    pub push: PushSettings,

    pub timeout_profiles: TimeoutProfiles,
    pub retry_policy: RetryPolicy,
    pub circuit_breaker: CircuitBreakerConfig,
    pub dispatch: DispatchSettings,
}

#[derive(Debug, Clone)]
pub struct PushSettings {
    /// Web Push relay; without it pushes are only logged.
    pub relay_url: Option<String>,
    pub relay_timeout_sec: u64,
    pub vapid_public_key: Option<String>,
    pub vapid_private_key: Option<String>,
    pub vapid_subject: String,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_path = file
            .db_path
            .map(PathBuf::from)
            .or_else(|| cli.db_path.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_path must be specified via --db-path or in config file")
            })?;
        if db_path.is_dir() {
            bail!("db_path points to a directory: {:?}", db_path);
        }

        let metrics_port = file.metrics_port.unwrap_or(cli.metrics_port);

        let push_file = file.push.unwrap_or_default();
        let push = PushSettings {
            relay_url: push_file.relay_url.or_else(|| cli.relay_url.clone()),
            relay_timeout_sec: push_file
                .relay_timeout_sec
                .or(cli.relay_timeout_sec)
                .unwrap_or(DEFAULT_RELAY_TIMEOUT_SEC),
            vapid_public_key: push_file
                .vapid_public_key
                .or_else(|| cli.vapid_public_key.clone()),
            vapid_private_key: push_file
                .vapid_private_key
                .or_else(|| cli.vapid_private_key.clone()),
            vapid_subject: push_file
                .vapid_subject
                .or_else(|| cli.vapid_subject.clone())
                .unwrap_or_else(|| DEFAULT_VAPID_SUBJECT.to_string()),
        };
        if push.relay_url.is_some() {
            if push.vapid_public_key.is_none() {
                bail!("A push relay requires a VAPID public key");
            }
            if push.vapid_private_key.is_none() {
                bail!("A push relay requires a VAPID private key");
            }
        }
        if push.relay_timeout_sec == 0 {
            bail!("push.relay_timeout_sec must be greater than 0");
        }

        let mut timeout_profiles = TimeoutProfiles::default();
        for (name, profile_file) in file.timeouts.unwrap_or_default() {
            let existing = timeout_profiles.get(&name).cloned();
            let timeout_ms = match (profile_file.timeout_ms, &existing) {
                (Some(ms), _) => ms,
                (None, Some(profile)) => profile.timeout.as_millis() as u64,
                (None, None) => bail!("Timeout profile '{}' needs a timeout_ms", name),
            };
            if timeout_ms == 0 {
                bail!("Timeout profile '{}' must have a timeout greater than 0", name);
            }
            let retry = profile_file
                .retry
                .or(existing.map(|p| p.retry_enabled))
                .unwrap_or(false);
            timeout_profiles.set(TimeoutProfile::new(&name, timeout_ms, retry));
        }

        let retry_defaults = RetryPolicy::default();
        let retry_file = file.retry.unwrap_or_default();
        let retry_policy = RetryPolicy {
            max_attempts: retry_file
                .max_attempts
                .unwrap_or(retry_defaults.max_attempts),
            initial_delay_ms: retry_file
                .initial_delay_ms
                .unwrap_or(retry_defaults.initial_delay_ms),
            max_delay_ms: retry_file
                .max_delay_ms
                .unwrap_or(retry_defaults.max_delay_ms),
            backoff_multiplier: retry_file
                .backoff_multiplier
                .unwrap_or(retry_defaults.backoff_multiplier),
        };
        if retry_policy.max_attempts == 0 {
            bail!("retry.max_attempts must be at least 1");
        }
        if retry_policy.backoff_multiplier < 1.0 {
            bail!("retry.backoff_multiplier must be at least 1.0");
        }

        let breaker_defaults = CircuitBreakerConfig::default();
        let breaker_file = file.circuit_breaker.unwrap_or_default();
        let circuit_breaker = CircuitBreakerConfig {
            failure_threshold: breaker_file
                .failure_threshold
                .unwrap_or(breaker_defaults.failure_threshold),
            success_threshold: breaker_file
                .success_threshold
                .unwrap_or(breaker_defaults.success_threshold),
            open_timeout: breaker_file
                .open_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(breaker_defaults.open_timeout),
            monitor_interval: breaker_file
                .monitor_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(breaker_defaults.monitor_interval),
        };
        if circuit_breaker.failure_threshold == 0 {
            bail!("circuit_breaker.failure_threshold must be greater than 0");
        }
        if circuit_breaker.success_threshold == 0 {
            bail!("circuit_breaker.success_threshold must be greater than 0");
        }
        if circuit_breaker.monitor_interval.is_zero() {
            bail!("circuit_breaker.monitor_interval_ms must be greater than 0");
        }

        let dispatch_defaults = DispatchSettings::default();
        let dispatch_file = file.dispatch.unwrap_or_default();
        let dispatch = DispatchSettings {
            batch_size: dispatch_file
                .batch_size
                .unwrap_or(dispatch_defaults.batch_size),
            ttl: dispatch_file
                .ttl_secs
                .map(Duration::from_secs)
                .unwrap_or(dispatch_defaults.ttl),
            urgency: dispatch_file.urgency.unwrap_or(dispatch_defaults.urgency),
            default_icon: dispatch_file
                .default_icon
                .unwrap_or(dispatch_defaults.default_icon),
            default_badge: dispatch_file
                .default_badge
                .unwrap_or(dispatch_defaults.default_badge),
            default_tag: dispatch_file
                .default_tag
                .unwrap_or(dispatch_defaults.default_tag),
        };
        if dispatch.batch_size == 0 {
            bail!("dispatch.batch_size must be greater than 0");
        }

        Ok(Self {
            db_path,
            metrics_port,
            push,
            timeout_profiles,
            retry_policy,
            circuit_breaker,
            dispatch,
        })
    }

    /// Credentials for signing pushes, when both keys are known.
    pub fn vapid_credentials(&self) -> Option<VapidCredentials> {
        match (&self.push.vapid_public_key, &self.push.vapid_private_key) {
            (Some(public_key), Some(private_key)) => Some(VapidCredentials {
                public_key: public_key.clone(),
                private_key: private_key.clone(),
                subject: self.push.vapid_subject.clone(),
            }),
            _ => None,
        }
    }

    pub fn notification_config(&self) -> NotificationConfig {
        NotificationConfig {
            vapid_public_key: self.push.vapid_public_key.clone().unwrap_or_default(),
            timeout_profiles: self.timeout_profiles.clone(),
            retry_policy: self.retry_policy.clone(),
            circuit_breaker: self.circuit_breaker.clone(),
            dispatch: self.dispatch.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db_access::{PROFILE_BACKGROUND, PROFILE_NORMAL, PROFILE_QUICK};
    use crate::notifications::Urgency;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn cli_with_db(dir: &TempDir) -> CliConfig {
        CliConfig {
            db_path: Some(dir.path().join("push.db")),
            ..Default::default()
        }
    }

    #[test]
    fn test_resolve_cli_only() {
        let temp_dir = TempDir::new().unwrap();
        let cli = CliConfig {
            db_path: Some(temp_dir.path().join("push.db")),
            metrics_port: 9091,
            relay_url: Some("http://relay:8080".to_string()),
            relay_timeout_sec: Some(3),
            vapid_public_key: Some("BPublic".to_string()),
            vapid_private_key: Some("private".to_string()),
            vapid_subject: Some("mailto:ops@example.org".to_string()),
        };

        let config = AppConfig::resolve(&cli, None).unwrap();

        assert_eq!(config.db_path, temp_dir.path().join("push.db"));
        assert_eq!(config.metrics_port, 9091);
        assert_eq!(config.push.relay_timeout_sec, 3);
        assert_eq!(config.retry_policy, RetryPolicy::default());
        assert_eq!(config.circuit_breaker, CircuitBreakerConfig::default());
        assert_eq!(config.dispatch, DispatchSettings::default());

        let credentials = config.vapid_credentials().unwrap();
        assert_eq!(credentials.subject, "mailto:ops@example.org");
        assert_eq!(config.notification_config().vapid_public_key, "BPublic");
    }

    #[test]
    fn test_resolve_toml_overrides_cli() {
        let temp_dir = TempDir::new().unwrap();
        let cli = CliConfig {
            db_path: Some(PathBuf::from("/should/be/overridden.db")),
            metrics_port: 9091,
            vapid_public_key: Some("cli-key".to_string()),
            ..Default::default()
        };
        let file = FileConfig {
            db_path: Some(temp_dir.path().join("file.db").to_string_lossy().into_owned()),
            metrics_port: Some(0),
            push: Some(PushConfig {
                vapid_public_key: Some("file-key".to_string()),
                ..Default::default()
            }),
            circuit_breaker: Some(CircuitBreakerFileConfig {
                failure_threshold: Some(3),
                open_timeout_ms: Some(1_000),
                ..Default::default()
            }),
            retry: Some(RetryConfig {
                max_attempts: Some(5),
                ..Default::default()
            }),
            dispatch: Some(DispatchConfig {
                batch_size: Some(50),
                urgency: Some(Urgency::High),
                ..Default::default()
            }),
            ..Default::default()
        };

        let config = AppConfig::resolve(&cli, Some(file)).unwrap();

        assert_eq!(config.db_path, temp_dir.path().join("file.db"));
        assert_eq!(config.metrics_port, 0);
        assert_eq!(config.push.vapid_public_key.as_deref(), Some("file-key"));
        assert_eq!(config.circuit_breaker.failure_threshold, 3);
        assert_eq!(config.circuit_breaker.success_threshold, 2);
        assert_eq!(config.circuit_breaker.open_timeout, Duration::from_secs(1));
        assert_eq!(config.retry_policy.max_attempts, 5);
        assert_eq!(config.retry_policy.initial_delay_ms, 100);
        assert_eq!(config.dispatch.batch_size, 50);
        assert_eq!(config.dispatch.urgency, Urgency::High);
        assert_eq!(config.dispatch.ttl, Duration::from_secs(86_400));
        // No private key, so nothing to sign with.
        assert!(config.vapid_credentials().is_none());
    }

    #[test]
    fn test_resolve_timeout_overrides() {
        let temp_dir = TempDir::new().unwrap();
        let mut timeouts = HashMap::new();
        timeouts.insert(
            PROFILE_QUICK.to_string(),
            TimeoutProfileConfig {
                timeout_ms: Some(750),
                retry: None,
            },
        );
        timeouts.insert(
            PROFILE_BACKGROUND.to_string(),
            TimeoutProfileConfig {
                timeout_ms: None,
                retry: Some(false),
            },
        );
        timeouts.insert(
            "reporting".to_string(),
            TimeoutProfileConfig {
                timeout_ms: Some(120_000),
                retry: Some(true),
            },
        );
        let file = FileConfig {
            timeouts: Some(timeouts),
            ..Default::default()
        };

        let config = AppConfig::resolve(&cli_with_db(&temp_dir), Some(file)).unwrap();
        let profiles = &config.timeout_profiles;

        let quick = profiles.get(PROFILE_QUICK).unwrap();
        assert_eq!(quick.timeout, Duration::from_millis(750));
        assert!(!quick.retry_enabled);

        let background = profiles.get(PROFILE_BACKGROUND).unwrap();
        assert_eq!(background.timeout, Duration::from_secs(30));
        assert!(!background.retry_enabled);

        assert_eq!(
            profiles.get(PROFILE_NORMAL).unwrap().timeout,
            Duration::from_secs(5)
        );
        assert!(profiles.get("reporting").unwrap().retry_enabled);
        assert_eq!(profiles.len(), 5);
    }

    #[test]
    fn test_resolve_missing_db_path_error() {
        let result = AppConfig::resolve(&CliConfig::default(), None);
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("db_path must be specified"));
    }

    #[test]
    fn test_resolve_db_path_is_directory_error() {
        let temp_dir = TempDir::new().unwrap();
        let cli = CliConfig {
            db_path: Some(temp_dir.path().to_path_buf()),
            ..Default::default()
        };
        assert!(AppConfig::resolve(&cli, None).is_err());
    }

    #[test]
    fn test_resolve_relay_without_keys_error() {
        let temp_dir = TempDir::new().unwrap();
        let mut cli = cli_with_db(&temp_dir);
        cli.relay_url = Some("http://relay:8080".to_string());

        let err = AppConfig::resolve(&cli, None).unwrap_err();
        assert!(err.to_string().contains("VAPID public key"));

        cli.vapid_public_key = Some("BPublic".to_string());
        let err = AppConfig::resolve(&cli, None).unwrap_err();
        assert!(err.to_string().contains("VAPID private key"));
    }

    #[test]
    fn test_resolve_rejects_zero_values() {
        let temp_dir = TempDir::new().unwrap();
        let cli = cli_with_db(&temp_dir);

        let zero_threshold = FileConfig {
            circuit_breaker: Some(CircuitBreakerFileConfig {
                failure_threshold: Some(0),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(AppConfig::resolve(&cli, Some(zero_threshold)).is_err());

        let zero_batch = FileConfig {
            dispatch: Some(DispatchConfig {
                batch_size: Some(0),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(AppConfig::resolve(&cli, Some(zero_batch)).is_err());

        let zero_attempts = FileConfig {
            retry: Some(RetryConfig {
                max_attempts: Some(0),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(AppConfig::resolve(&cli, Some(zero_attempts)).is_err());

        let mut timeouts = HashMap::new();
        timeouts.insert(
            "custom".to_string(),
            TimeoutProfileConfig {
                timeout_ms: None,
                retry: Some(true),
            },
        );
        let incomplete_profile = FileConfig {
            timeouts: Some(timeouts),
            ..Default::default()
        };
        assert!(AppConfig::resolve(&cli, Some(incomplete_profile)).is_err());
    }
}
