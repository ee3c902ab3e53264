use ev_load_balancing::config::PhasesConfig;
use ev_load_balancing::mains::MainsBackend;
use ev_load_balancing::{BalancerError, Config, Phase};
use std::io::Write;
use tempfile::NamedTempFile;

const CONFIG_YAML: &str = r#"
homeassistant:
  base_url: http://homeassistant.local:8123
  token: abc
statistics:
  min_samples: 6
refresh:
  poll_interval_ms: 0
entries:
  - id: garage
    name: Garage
    mains_type: sensor_entities
    charger_type: easee
    developer_mode: true
    mains:
      mains_phase1: sensor.l1
      mains_phase2: sensor.l2
      mains_phase3: sensor.l3
      mains_limit: 25
    charger:
      device_id: abc123
      charger_expires: 5
    phases:
      mains_phase1: PHASE3
      mains_phase2: PHASE1
      mains_phase3: PHASE2
      charger_phase1: PHASE1
      charger_phase2: PHASE2
      charger_phase3: PHASE3
"#;

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn loads_and_validates_file() {
    let file = write_config(CONFIG_YAML);
    let config = Config::from_file(file.path()).unwrap();
    config.validate().unwrap();

    assert_eq!(config.statistics.min_samples, 6);
    assert_eq!(config.statistics.max_age_seconds, 120);
    assert_eq!(config.refresh.poll_interval(), None);

    let entry = config.entry("garage").unwrap();
    assert!(entry.developer_mode);
    assert!(matches!(
        entry.mains_backend().unwrap(),
        MainsBackend::Sensors(ref o) if o.mains_limit == 25
    ));
    let mapping = entry.phases.mapping().unwrap();
    assert_eq!(mapping.mains_for(Phase::Phase1), Phase::Phase3);
    assert!(config.entry("missing").is_none());
}

#[test]
fn save_roundtrip_keeps_entries_but_not_token() {
    let file = write_config(CONFIG_YAML);
    let config = Config::from_file(file.path()).unwrap();

    let out = NamedTempFile::new().unwrap();
    config.save_to_file(out.path()).unwrap();
    let saved = std::fs::read_to_string(out.path()).unwrap();
    assert!(!saved.contains("token"));

    let reloaded = Config::from_file(out.path()).unwrap();
    assert_eq!(reloaded.entries.len(), 1);
    assert_eq!(reloaded.entries[0].phases, config.entries[0].phases);
    assert_eq!(reloaded.homeassistant.token, None);
}

#[test]
fn invalid_yaml_is_a_serialization_error() {
    let file = write_config("entries: [unterminated");
    let err = Config::from_file(file.path()).unwrap_err();
    assert!(matches!(err, BalancerError::Serialization { .. }));
    assert!(err.to_string().starts_with("Serialization error"));
}

#[test]
fn missing_file_is_an_io_error() {
    let err = Config::from_file("/nonexistent/ev_load_balancing.yaml").unwrap_err();
    assert!(matches!(err, BalancerError::Io { .. }));
}

#[test]
fn rejects_out_of_range_mains_limit() {
    let file = write_config(&CONFIG_YAML.replace("mains_limit: 25", "mains_limit: 100"));
    let config = Config::from_file(file.path()).unwrap();
    assert!(matches!(config.validate(), Err(BalancerError::Config { .. })));
}

#[test]
fn rejects_unknown_backend_type() {
    let file = write_config(&CONFIG_YAML.replace("charger_type: easee", "charger_type: zaptec"));
    let config = Config::from_file(file.path()).unwrap();
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("zaptec"));
}

#[test]
fn rejects_non_bijective_phases() {
    let file = write_config(&CONFIG_YAML.replace("mains_phase2: PHASE1", "mains_phase2: PHASE3"));
    let config = Config::from_file(file.path()).unwrap();
    assert!(matches!(config.validate(), Err(BalancerError::Config { .. })));
}

#[test]
fn rejects_zero_statistics_samples() {
    let mut config = Config::default();
    config.statistics.min_samples = 0;
    assert!(matches!(
        config.validate(),
        Err(BalancerError::Validation { ref field, .. }) if field == "statistics.min_samples"
    ));
}

#[test]
fn entry_without_phases_is_rejected() {
    let start = CONFIG_YAML.find("    phases:").unwrap();
    let file = write_config(&CONFIG_YAML[..start]);
    let err = Config::from_file(file.path()).unwrap_err();
    assert!(matches!(err, BalancerError::Serialization { .. }));
    assert!(err.to_string().contains("phases"));
}

#[test]
fn discovered_rows_round_trip_through_yaml() {
    let file = write_config(CONFIG_YAML);
    let config = Config::from_file(file.path()).unwrap();
    let mapping = config.entries[0].phases.mapping().unwrap();

    let yaml = serde_yaml::to_string(&PhasesConfig::from_mapping(&mapping)).unwrap();
    let parsed: PhasesConfig = serde_yaml::from_str(&yaml).unwrap();
    assert_eq!(parsed.mapping().unwrap(), mapping);
}
