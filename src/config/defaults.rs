use super::*;

impl Default for HomeAssistantConfig {
    fn default() -> Self {
        Self {
            base_url: "http://homeassistant.local:8123".to_string(),
            token: None,
            max_retries: 3,
            retry_delay_ms: 500,
            request_timeout_ms: 10_000,
            state_watch_interval_ms: 2_000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            console_level: None,
            file_level: None,
            file: "/tmp/ev_load_balancing.log".to_string(),
            backup_count: 5,
            console_output: true,
            json_format: false,
        }
    }
}

impl Default for StatisticsConfig {
    fn default() -> Self {
        Self {
            min_samples: 10,
            max_age_seconds: 120,
        }
    }
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 30_000,
            cooldown_ms: 1_000,
            setup_retry_seconds: 30,
        }
    }
}

impl Default for AutoMatchConfig {
    fn default() -> Self {
        Self {
            threshold_amps: 6.0,
            max_attempts: 120,
            settle_seconds: 10,
            poll_interval_ms: 1_000,
            probe_current: 10.0,
        }
    }
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self { publish: true }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            homeassistant: HomeAssistantConfig::default(),
            logging: LoggingConfig::default(),
            statistics: StatisticsConfig::default(),
            refresh: RefreshConfig::default(),
            auto_match: AutoMatchConfig::default(),
            diagnostics: DiagnosticsConfig::default(),
            entries: Vec::new(),
        }
    }
}
