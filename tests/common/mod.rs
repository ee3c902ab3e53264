#![allow(dead_code)]

use ev_load_balancing::chargers::{Charger, ChargerPhaseReading};
use ev_load_balancing::mains::{Mains, MainsPhaseReading};
use ev_load_balancing::{ChargingState, Phase, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub struct FakeMainsPhase {
    pub name: String,
    pub current: Mutex<Option<f64>>,
    pub stddev: Mutex<f64>,
}

impl FakeMainsPhase {
    pub fn new(name: &str, current: Option<f64>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            current: Mutex::new(current),
            stddev: Mutex::new(0.0),
        })
    }

    pub fn set(&self, current: Option<f64>) {
        *self.current.lock().unwrap() = current;
    }
}

#[async_trait::async_trait]
impl MainsPhaseReading for FakeMainsPhase {
    fn name(&self) -> &str {
        &self.name
    }

    async fn update(&self) {}

    fn actual_current(&self) -> Option<f64> {
        *self.current.lock().unwrap()
    }

    fn stddev_current(&self) -> f64 {
        *self.stddev.lock().unwrap()
    }
}

pub struct FakeMains {
    pub phases: [Arc<FakeMainsPhase>; 3],
    pub rated: Option<u32>,
    pub rated_reads: Arc<AtomicUsize>,
    pub updates: Arc<AtomicUsize>,
    pub cleaned_up: Arc<AtomicUsize>,
}

impl FakeMains {
    pub fn new(currents: [Option<f64>; 3], rated: Option<u32>) -> Self {
        Self {
            phases: [
                FakeMainsPhase::new("mains1", currents[0]),
                FakeMainsPhase::new("mains2", currents[1]),
                FakeMainsPhase::new("mains3", currents[2]),
            ],
            rated,
            rated_reads: Arc::new(AtomicUsize::new(0)),
            updates: Arc::new(AtomicUsize::new(0)),
            cleaned_up: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait::async_trait]
impl Mains for FakeMains {
    fn device_id(&self) -> Option<&str> {
        Some("fake-meter")
    }

    fn get_phase(&self, phase: Phase) -> Option<Arc<dyn MainsPhaseReading>> {
        let reader: Arc<dyn MainsPhaseReading> = self.phases[phase.index()].clone();
        Some(reader)
    }

    async fn get_rated_limit(&self) -> Option<u32> {
        self.rated_reads.fetch_add(1, Ordering::SeqCst);
        self.rated
    }

    async fn update(&self) {
        self.updates.fetch_add(1, Ordering::SeqCst);
    }

    fn cleanup(&mut self) {
        self.cleaned_up.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct FakeChargerPhase {
    pub name: String,
    pub limit: Mutex<Option<f64>>,
}

#[async_trait::async_trait]
impl ChargerPhaseReading for FakeChargerPhase {
    fn name(&self) -> &str {
        &self.name
    }

    async fn update(&self) {}

    fn current_limit(&self) -> Option<f64> {
        *self.limit.lock().unwrap()
    }
}

pub struct FakeCharger {
    pub phases: [Arc<FakeChargerPhase>; 3],
    pub rated: Option<u32>,
    pub rated_reads: Arc<AtomicUsize>,
    pub state: Arc<Mutex<ChargingState>>,
    pub applied: Arc<Mutex<Vec<[f64; 3]>>>,
    pub cleaned_up: Arc<AtomicUsize>,
}

impl FakeCharger {
    pub fn new(limits: [Option<f64>; 3], rated: Option<u32>, state: ChargingState) -> Self {
        let phase = |i: usize| {
            Arc::new(FakeChargerPhase {
                name: format!("charger{}", i + 1),
                limit: Mutex::new(limits[i]),
            })
        };
        Self {
            phases: [phase(0), phase(1), phase(2)],
            rated,
            rated_reads: Arc::new(AtomicUsize::new(0)),
            state: Arc::new(Mutex::new(state)),
            applied: Arc::new(Mutex::new(Vec::new())),
            cleaned_up: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait::async_trait]
impl Charger for FakeCharger {
    fn device_id(&self) -> Option<&str> {
        Some("fake-charger")
    }

    fn get_phase(&self, phase: Phase) -> Option<Arc<dyn ChargerPhaseReading>> {
        let reader: Arc<dyn ChargerPhaseReading> = self.phases[phase.index()].clone();
        Some(reader)
    }

    async fn get_rated_limit(&self) -> Option<u32> {
        self.rated_reads.fetch_add(1, Ordering::SeqCst);
        self.rated
    }

    async fn charging_state(&self) -> ChargingState {
        *self.state.lock().unwrap()
    }

    async fn set_limits(&self, phase1: f64, phase2: f64, phase3: f64) -> Result<()> {
        self.applied.lock().unwrap().push([phase1, phase2, phase3]);
        Ok(())
    }

    async fn update(&self) {}

    fn cleanup(&mut self) {
        self.cleaned_up.fetch_add(1, Ordering::SeqCst);
    }
}
