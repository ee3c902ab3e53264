#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    // Parsing and resolving arbitrary entries must never panic
    if let Ok(entry) = serde_yaml::from_str::<ev_load_balancing::EntryConfig>(text) {
        let _ = entry.validate();
        let _ = entry.mains_backend();
        let _ = entry.charger_backend();
        let _ = entry.phases.mapping();
        let _ = entry.slug();
    }
    let _ = serde_yaml::from_str::<ev_load_balancing::Config>(text).map(|c| c.validate());
});
