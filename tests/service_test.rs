use ev_load_balancing::host::memory::MemoryHost;
use ev_load_balancing::service::BalancerService;
use ev_load_balancing::{Config, EntryConfig};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const TEMPLATE_ENTRY: &str = r#"
id: driveway
name: Driveway
mains_type: template
charger_type: template
mains:
  mains_phase1: mains1
  mains_phase2: mains2
  mains_phase3: mains3
  mains_limit: 20
charger:
  charger_phase1: charger1
  charger_phase2: charger2
  charger_phase3: charger3
  charger_active: active
  charger_limit: rated
  charger_command: command
phases:
  mains_phase1: PHASE1
  mains_phase2: PHASE2
  mains_phase3: PHASE3
  charger_phase1: PHASE1
  charger_phase2: PHASE2
  charger_phase3: PHASE3
"#;

const SENSOR_ENTRY: &str = r#"
id: garage
name: Garage
mains_type: sensors
charger_type: template
mains:
  mains_phase1: sensor.l1_current
  mains_phase2: sensor.l2_current
  mains_phase3: sensor.l3_current
  mains_limit: 20
charger:
  charger_phase1: charger1
  charger_phase2: charger2
  charger_phase3: charger3
  charger_active: active
  charger_limit: rated
  charger_command: command
phases:
  mains_phase1: PHASE1
  mains_phase2: PHASE2
  mains_phase3: PHASE3
  charger_phase1: PHASE1
  charger_phase2: PHASE2
  charger_phase3: PHASE3
"#;

fn template_host() -> MemoryHost {
    let host = MemoryHost::new();
    for (template, value) in [
        ("mains1", 10),
        ("mains2", 10),
        ("mains3", 10),
        ("charger1", 6),
        ("charger2", 6),
        ("charger3", 6),
        ("rated", 16),
    ] {
        host.set_template(template, value);
    }
    host.set_template("active", true);
    host.set_template_fn("command", |vars| {
        Ok(json!({
            "service": "script.set_limits",
            "data": {"l1": vars["phase1"], "l2": vars["phase2"], "l3": vars["phase3"]},
        }))
    });
    host
}

fn config(entries: &[&str], poll_interval_ms: u64) -> Config {
    let mut config = Config::default();
    config.refresh.poll_interval_ms = poll_interval_ms;
    config.entries = entries
        .iter()
        .map(|yaml| serde_yaml::from_str::<EntryConfig>(yaml).unwrap())
        .collect();
    config
}

#[tokio::test(start_paused = true)]
async fn polls_apply_limits_and_publish_diagnostics() {
    let host = template_host();
    let service = BalancerService::new(config(&[TEMPLATE_ENTRY], 1000), Arc::new(host.clone()));

    service
        .run_until(tokio::time::sleep(Duration::from_millis(2500)))
        .await;

    // ticks at 0 s, 1 s and 2 s
    let calls = host.service_calls();
    assert_eq!(calls.len(), 3);
    assert_eq!(calls[0].domain, "script");
    assert_eq!(calls[0].data, json!({"l1": 16.0, "l2": 16.0, "l3": 16.0}));

    let last_update = host
        .published_state("sensor.ev_load_balancing_driveway_last_update")
        .unwrap();
    assert_ne!(last_update.state, "unknown");
    let age = host
        .published_state("sensor.ev_load_balancing_driveway_update_age")
        .unwrap();
    assert_ne!(age.state, "unknown");
    assert_eq!(age.attribute("unit_of_measurement"), Some(&json!("s")));

    assert!(service.registry().is_empty());
}

#[tokio::test(start_paused = true)]
async fn fatal_entry_does_not_block_others() {
    let host = template_host();
    let mut broken: EntryConfig = serde_yaml::from_str(TEMPLATE_ENTRY).unwrap();
    broken.id = "broken".to_string();
    broken.charger_type = Some("wallbox".to_string());
    let mut config = config(&[TEMPLATE_ENTRY], 1000);
    config.entries.push(broken);

    let service = BalancerService::new(config, Arc::new(host.clone()));
    let registry = service.registry();
    let tasks = service.spawn_entries();

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(registry.entry_ids(), vec!["driveway".to_string()]);
    assert_eq!(host.service_calls().len(), 1);

    service.shutdown_handle().shutdown();
    for task in tasks {
        task.await.unwrap();
    }
    assert!(registry.is_empty());
}

#[tokio::test(start_paused = true)]
async fn setup_is_retried_until_sensors_exist() {
    let host = template_host();
    let mut config = config(&[SENSOR_ENTRY], 0);
    config.refresh.setup_retry_seconds = 30;
    config.refresh.cooldown_ms = 100;

    let service = BalancerService::new(config, Arc::new(host.clone()));
    let registry = service.registry();
    let tasks = service.spawn_entries();

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(registry.is_empty());

    host.set_state("sensor.l1_current", "10");
    host.set_state("sensor.l2_current", "12");
    host.set_state("sensor.l3_current", "20");

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(registry.contains("garage"));
    // the initial refresh after setup
    assert_eq!(host.service_calls().len(), 1);
    assert_eq!(
        host.service_calls()[0].data,
        json!({"l1": 16.0, "l2": 14.0, "l3": 6.0})
    );

    // a state change is debounced into one more tick
    host.set_state("sensor.l3_current", "21");
    host.set_state("sensor.l3_current", "22");
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(host.service_calls().len(), 2);

    service.shutdown_handle().shutdown();
    for task in tasks {
        task.await.unwrap();
    }
    assert!(registry.is_empty());
    assert_eq!(host.tracker_count(), 0);
}
