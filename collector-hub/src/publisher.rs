//! Snapshots SENSOR périodiques vers le rule engine.

use chrono::{DateTime, Local};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::fifo::FifoWriter;
use crate::models::{MessageKind, SensorSnapshotMessage};
use crate::signal::StopSignal;
use crate::state::{HubState, Shared};

/// Heat index partagé avec le rule engine, arrondi à 2 décimales (moitié
/// loin de zéro). Les deux côtés doivent produire les mêmes bits.
pub fn heat_index(t: f64, rh: f64) -> f64 {
    let hi = -8.784695 + 1.61139411 * t + 2.338549 * rh
        - 0.14611605 * t * rh
        - 0.012308094 * t * t
        - 0.016424828 * rh * rh
        + 0.002211732 * t * t * rh
        + 0.00072546 * t * rh * rh
        - 0.000003582 * t * t * rh * rh;
    let half = if hi >= 0.0 { 0.5 } else { -0.5 };
    (hi * 100.0 + half).trunc() / 100.0
}

/// Heure de capture d'un tick.
#[derive(Debug, Clone, PartialEq)]
pub struct TickClock {
    pub epoch_seconds: f64,
    /// Heure locale sans décalage, ex: `2024-05-01T14:03:07`.
    pub local: String,
}

impl TickClock {
    pub fn now() -> Self {
        Self::from_datetime(Local::now())
    }

    pub fn from_datetime(now: DateTime<Local>) -> Self {
        Self {
            epoch_seconds: now.timestamp() as f64 + f64::from(now.timestamp_subsec_nanos()) / 1e9,
            local: now.format("%Y-%m-%dT%H:%M:%S").to_string(),
        }
    }
}

pub struct SnapshotPublisher {
    seq: u64,
    log_each: bool,
}

impl SnapshotPublisher {
    pub fn new(log_each: bool) -> Self {
        Self { seq: 0, log_each }
    }

    pub fn last_seq(&self) -> u64 {
        self.seq
    }

    /// Un message par device en cache, numérotés à la suite du dernier `seq`.
    /// L'appelant tient le verrou du hub.
    pub fn compose(&mut self, state: &HubState, clock: &TickClock) -> Vec<SensorSnapshotMessage> {
        let env = state.environment;
        let hi = if env.valid { heat_index(env.temperature, env.humidity) } else { 0.0 };

        state
            .devices
            .iter()
            .map(|dev| {
                self.seq += 1;
                SensorSnapshotMessage {
                    kind: MessageKind::Sensor,
                    seq: self.seq,
                    device_id: dev.device_id.clone(),
                    heat_index: hi,
                    heart_rate: dev.heart_rate,
                    skin_temperature: dev.skin_temperature,
                    captured_at_epoch_seconds: clock.epoch_seconds,
                    captured_at_local: clock.local.clone(),
                }
            })
            .collect()
    }

    /// Snapshot sous une seule prise du verrou, écriture hors verrou.
    /// Renvoie le nombre de lignes écrites; `seq` n'avance que pour elles.
    pub fn tick(&mut self, shared: &Shared<HubState>, out: &mut FifoWriter) -> usize {
        match out.ensure_open() {
            Ok(true) => {}
            Ok(false) => {
                debug!("[rule_in] no reader on the rule engine pipe yet");
                return 0;
            }
            Err(e) => {
                warn!("[rule_in] cannot open rule engine pipe: {e}");
                return 0;
            }
        }

        let clock = TickClock::now();
        let committed = self.seq;
        let mut messages = {
            let state = shared.lock();
            self.compose(&state, &clock)
        };
        self.seq = committed;

        let mut written = 0;
        for msg in &mut messages {
            msg.seq = self.seq + 1;
            let line = match msg.to_line() {
                Ok(line) => line,
                Err(e) => {
                    warn!("[rule_in] cannot encode snapshot for {}: {e}", msg.device_id);
                    continue;
                }
            };
            if let Err(e) = out.write_line(&line) {
                warn!("[rule_in] rule engine pipe closed: {e}");
                break;
            }
            self.seq = msg.seq;
            written += 1;
            if self.log_each {
                info!("[rule_in] {}", line.trim_end());
            } else {
                debug!("[rule_in] {}", line.trim_end());
            }
        }
        written
    }

    pub fn run(mut self, shared: Shared<HubState>, path: PathBuf, interval: Duration, stop: StopSignal) {
        let mut out = FifoWriter::new(path);
        while !stop.is_stopped() {
            self.tick(&shared, &mut out);
            if stop.wait(interval) {
                break;
            }
        }
        debug!("[rule_in] publisher stopped after seq {}", self.seq);
    }
}
