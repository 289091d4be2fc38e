//! Racine de composition : possède l'état partagé et les quatre threads agents.
//!
//! ```text
//! created --start--> running --stop--> stopping --> stopped --start--> running
//!            \--spawn failure--> faulted
//! ```
//!
//! L'arrêt joint chaque agent. Les lecteurs wearable et résultats ne voient
//! l'arrêt qu'entre deux lectures : `stop` attend que le pair de chacune de
//! ces FIFOs écrive une ligne ou ferme son côté. Rien ne force les lectures bloquées.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info};

use crate::acquisition::{FieldBus, ModbusTcp};
use crate::cache::CacheError;
use crate::config::HubConfig;
use crate::fifo::ensure_fifo;
use crate::ingest::WearableIngest;
use crate::models::{DeviceEntry, EnvironmentSample};
use crate::publisher::SnapshotPublisher;
use crate::relay::{ResultCallback, ResultRelay};
use crate::sensor::SensorPoller;
use crate::signal::StopSignal;
use crate::state::{new_state, HubState, Shared};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubPhase {
    Created,
    Running,
    Stopping,
    Stopped,
    Faulted,
}

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("cannot spawn {agent} agent: {source}")]
    Spawn {
        agent: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("hub faulted during a previous start")]
    Faulted,
    #[error("device table: {0}")]
    Allocation(#[source] CacheError),
}

pub struct CollectorHub<B: FieldBus + Clone + 'static = ModbusTcp> {
    config: HubConfig,
    bus: B,
    callback: ResultCallback,
    shared: Shared<HubState>,
    stop: StopSignal,
    workers: Vec<(&'static str, JoinHandle<()>)>,
    phase: HubPhase,
}

impl CollectorHub<ModbusTcp> {
    /// Hub qui parle Modbus/TCP au capteur. Ne démarre rien.
    pub fn create<F>(config: &HubConfig, on_result: F) -> Result<Self, HubError>
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        Self::with_bus(config, ModbusTcp, on_result)
    }
}

impl<B: FieldBus + Clone + 'static> CollectorHub<B> {
    /// Seule l'allocation de la table des devices peut échouer ici.
    pub fn with_bus<F>(config: &HubConfig, bus: B, on_result: F) -> Result<Self, HubError>
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let config = config.normalized();
        let state = HubState::new(config.max_devices).map_err(|e| {
            error!("[hub] {e}");
            HubError::Allocation(e)
        })?;
        Ok(Self {
            config,
            bus,
            callback: Arc::new(on_result),
            shared: new_state(state),
            stop: StopSignal::new(),
            workers: Vec::new(),
            phase: HubPhase::Created,
        })
    }

    pub fn phase(&self) -> HubPhase {
        self.phase
    }

    pub fn is_running(&self) -> bool {
        self.phase == HubPhase::Running
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn environment(&self) -> EnvironmentSample {
        self.shared.lock().environment
    }

    pub fn devices(&self) -> Vec<DeviceEntry> {
        self.shared.lock().devices.iter().cloned().collect()
    }

    /// Crée les FIFOs et lance les agents. Sans effet si déjà démarré.
    pub fn start(&mut self) -> Result<(), HubError> {
        match self.phase {
            HubPhase::Running => return Ok(()),
            HubPhase::Faulted => return Err(HubError::Faulted),
            _ => {}
        }

        let cfg = self.config.clone();
        let stop = StopSignal::new();
        self.stop = stop.clone();

        let wearable_pipe = prepare_pipe(&cfg.wearable_pipe, "wearable");
        let rule_in_pipe = prepare_pipe(&cfg.rule_in_pipe, "rule_in");
        let rule_out_pipe = prepare_pipe(&cfg.rule_out_pipe, "rule_out");
        let interval = cfg.publish_interval();

        self.phase = HubPhase::Running;

        let poller = SensorPoller::new(self.bus.clone(), cfg.bus.clone(), self.shared.clone(), cfg.log.sensor);
        let s = stop.clone();
        self.spawn_agent("sensor", move || poller.run(interval, s))?;

        let ingest = WearableIngest::new(self.shared.clone(), cfg.log.wearable);
        let s = stop.clone();
        self.spawn_agent("wearable", move || match wearable_pipe {
            Some(path) => ingest.run(path, s),
            None => debug!("[wearable] transport disabled"),
        })?;

        let publisher = SnapshotPublisher::new(cfg.log.rule_in);
        let shared = self.shared.clone();
        let s = stop.clone();
        self.spawn_agent("rule_in", move || match rule_in_pipe {
            Some(path) => publisher.run(shared, path, interval, s),
            None => debug!("[rule_in] transport disabled"),
        })?;

        let relay = ResultRelay::new(self.callback.clone(), cfg.log.rule_out);
        let s = stop;
        self.spawn_agent("rule_out", move || match rule_out_pipe {
            Some(path) => relay.run(path, s),
            None => debug!("[rule_out] transport disabled"),
        })?;

        info!(
            "[hub] started (interval {}s, {} device slots)",
            cfg.publish_interval_secs, cfg.max_devices
        );
        Ok(())
    }

    /// Demande l'arrêt et joint les agents. Peut bloquer sur des FIFOs inactives (voir doc du module).
    pub fn stop(&mut self) {
        if self.phase != HubPhase::Running {
            return;
        }
        self.phase = HubPhase::Stopping;
        self.stop.stop();
        for (agent, handle) in self.workers.drain(..) {
            if handle.join().is_err() {
                error!("[hub] {agent} agent panicked");
            }
        }
        self.phase = HubPhase::Stopped;
        info!("[hub] stopped");
    }

    /// Arrête si besoin et libère tout.
    pub fn destroy(mut self) {
        self.stop();
    }

    fn spawn_agent<F>(&mut self, agent: &'static str, body: F) -> Result<(), HubError>
    where
        F: FnOnce() + Send + 'static,
    {
        let spawned = thread::Builder::new()
            .name(format!("hub-{agent}"))
            .spawn(body);
        match spawned {
            Ok(handle) => {
                self.workers.push((agent, handle));
                Ok(())
            }
            Err(source) => {
                error!("[hub] cannot spawn {agent} agent: {source}");
                // les agents déjà lancés s'arrêtent seuls, sans être joints
                self.stop.stop();
                self.workers.clear();
                self.phase = HubPhase::Faulted;
                Err(HubError::Spawn { agent, source })
            }
        }
    }
}

impl<B: FieldBus + Clone + 'static> Drop for CollectorHub<B> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn prepare_pipe(path: &Path, agent: &str) -> Option<PathBuf> {
    match ensure_fifo(path) {
        Ok(()) => Some(path.to_path_buf()),
        Err(e) => {
            error!("[{agent}] transport disabled: {e}");
            None
        }
    }
}
