//! Collector hub : fusionne un capteur T/H interrogé et les constantes poussées
//! par les wearables, et livre des snapshots par device au rule engine via des
//! FIFOs.
//!
//! - `acquisition` : machine à états bus de terrain, reprises par niveaux (Modbus/TCP)
//! - `cache` : table des N premiers devices, sans éviction
//! - `ingest` / `publisher` / `relay` / `sensor` : les quatre agents
//! - `hub` : cycle de vie des agents autour d'un verrou partagé
//!
//! ```no_run
//! use collector_hub::{CollectorHub, HubConfig};
//!
//! let mut hub = CollectorHub::create(&HubConfig::default(), |line| println!("verdict: {line}"))?;
//! hub.start()?;
//! // ...
//! hub.stop();
//! # Ok::<(), collector_hub::HubError>(())
//! ```

pub mod acquisition;
pub mod cache;
pub mod config;
pub mod fifo;
pub mod hub;
pub mod ingest;
pub mod models;
pub mod publisher;
pub mod relay;
pub mod sensor;
pub mod signal;
pub mod state;

pub use acquisition::{AcquisitionError, BusAddress, BusLink, FieldBus, ModbusTcp, SensorAcquisition};
pub use cache::{CacheError, DeviceCache};
pub use config::{load_config, HubConfig};
pub use hub::{CollectorHub, HubError, HubPhase};
pub use models::{DeviceEntry, EnvironmentSample, SensorSnapshotMessage, WearableUpdate};
pub use publisher::heat_index;
pub use relay::ResultCallback;
pub use signal::StopSignal;
