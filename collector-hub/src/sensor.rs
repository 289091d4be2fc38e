use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::acquisition::{AcquisitionError, FieldBus, SensorAcquisition};
use crate::config::BusConf;
use crate::signal::StopSignal;
use crate::state::{HubState, Shared};

/// Interroge le capteur T/H et publie les mesures fiables dans l'état du hub.
pub struct SensorPoller<B: FieldBus> {
    acquisition: SensorAcquisition<B>,
    conf: BusConf,
    shared: Shared<HubState>,
    log_each: bool,
}

impl<B: FieldBus> SensorPoller<B> {
    pub fn new(bus: B, conf: BusConf, shared: Shared<HubState>, log_each: bool) -> Self {
        Self {
            acquisition: SensorAcquisition::new(bus, conf.clone().into()),
            conf,
            shared,
            log_each,
        }
    }

    /// Une interrogation. Seules les mesures réussies atteignent l'échantillon
    /// partagé; un échec laisse la dernière bonne en place.
    pub fn poll(&mut self) -> Result<(), AcquisitionError> {
        match self.acquisition.read_once() {
            Ok(sample) => {
                self.shared.lock().environment = sample;
                if self.log_each {
                    info!("[sensor] T={:.2} H={:.2}", sample.temperature, sample.humidity);
                } else {
                    debug!("[sensor] T={:.2} H={:.2}", sample.temperature, sample.humidity);
                }
                Ok(())
            }
            Err(AcquisitionError::NotInitialized) => {
                // connexion initiale ratée ou lien perdu par la reprise hard
                self.connect();
                Err(AcquisitionError::NotInitialized)
            }
            Err(e) => {
                warn!("[sensor] {e}");
                Err(e)
            }
        }
    }

    fn connect(&mut self) -> bool {
        match self.acquisition.init(&self.conf.host, self.conf.port) {
            Ok(()) => {
                info!("[sensor] connected to {}:{}", self.conf.host, self.conf.port);
                true
            }
            Err(e) => {
                error!("[sensor] init {}:{} failed: {e}", self.conf.host, self.conf.port);
                false
            }
        }
    }

    pub fn run(mut self, interval: Duration, stop: StopSignal) {
        self.connect();
        while !stop.is_stopped() {
            let _ = self.poll();
            if stop.wait(interval) {
                break;
            }
        }
        self.acquisition.close();
        debug!("[sensor] poller stopped");
    }
}
