use parking_lot::Mutex;
use std::sync::Arc;

use crate::cache::{CacheError, DeviceCache};
use crate::models::EnvironmentSample;

pub type Shared<T> = Arc<Mutex<T>>;

pub fn new_state<T>(value: T) -> Shared<T> {
    Arc::new(Mutex::new(value))
}

/// Tout ce que les agents partagent. Un seul verrou pour les deux champs :
/// un snapshot voit l'environnement et la table au même instant.
#[derive(Debug)]
pub struct HubState {
    pub environment: EnvironmentSample,
    pub devices: DeviceCache,
}

impl HubState {
    pub fn new(max_devices: usize) -> Result<Self, CacheError> {
        Ok(Self {
            environment: EnvironmentSample::default(),
            devices: DeviceCache::try_with_capacity(max_devices)?,
        })
    }
}
