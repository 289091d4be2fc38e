//! Acquisition température/humidité sur un bus de terrain.
//!
//! [`SensorAcquisition`] est une petite machine à états autour d'un lien bus.
//! Une lecture ratée passe par deux niveaux de reprise avant d'abandonner :
//!
//! 1. soft : fermer et reconnecter le même lien, réappliquer les options, relire;
//! 2. hard : jeter le lien, en construire un neuf depuis l'adresse gardée,
//!    réappliquer les options, connecter, relire.
//!
//! Une mesure hors de la fenêtre plausible a droit à une relecture différée
//! (bruit du bus) avant d'être rendue comme [`AcquisitionError::BadValue`].
//!
//! Piloté depuis un seul thread, sans verrou.

pub mod modbus;

use std::io;
use std::time::Duration;
use tracing::debug;

use crate::config::{BusConf, PlausibilityWindow};
use crate::models::EnvironmentSample;

pub use modbus::ModbusTcp;

/// Premier registre d'entrée : température ×10, puis humidité ×10.
pub const REGISTER_START: u16 = 0;
pub const REGISTER_COUNT: u16 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusAddress {
    pub host: String,
    pub port: u16,
}

/// Une connexion au capteur.
pub trait BusLink: Send {
    fn connect(&mut self) -> io::Result<()>;
    fn close(&mut self);
    fn set_unit_id(&mut self, unit_id: u8);
    fn set_response_timeout(&mut self, timeout: Duration);
    fn read_input_registers(&mut self, start: u16, count: u16) -> io::Result<Vec<u16>>;
}

/// Fabrique les liens. Créer un lien ne le connecte pas.
pub trait FieldBus: Send {
    type Link: BusLink;

    fn create(&mut self, address: &BusAddress) -> io::Result<Self::Link>;
}

#[derive(Debug, thiserror::Error)]
pub enum AcquisitionError {
    #[error("sensor not initialized")]
    NotInitialized,
    #[error("invalid bus address {host}:{port}")]
    InvalidAddress { host: String, port: u16 },
    #[error("cannot connect to sensor: {0}")]
    Connect(#[source] io::Error),
    #[error("sensor read failed after recovery (os error {os_error:?}): {source}")]
    ReadFailure {
        os_error: Option<i32>,
        #[source]
        source: io::Error,
    },
    #[error("implausible reading T={temperature} H={humidity}")]
    BadValue { temperature: f64, humidity: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AcquisitionSettings {
    pub unit_id: u8,
    pub response_timeout: Duration,
    pub noise_retry_delay: Duration,
    pub plausibility: PlausibilityWindow,
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        BusConf::default().into()
    }
}

impl From<BusConf> for AcquisitionSettings {
    fn from(conf: BusConf) -> Self {
        Self {
            unit_id: conf.unit_id,
            response_timeout: conf.response_timeout(),
            noise_retry_delay: conf.noise_retry_delay(),
            plausibility: conf.plausibility,
        }
    }
}

pub struct SensorAcquisition<B: FieldBus> {
    bus: B,
    settings: AcquisitionSettings,
    address: Option<BusAddress>,
    link: Option<B::Link>,
}

impl<B: FieldBus> SensorAcquisition<B> {
    pub fn new(bus: B, settings: AcquisitionSettings) -> Self {
        Self { bus, settings, address: None, link: None }
    }

    pub fn is_initialized(&self) -> bool {
        self.link.is_some()
    }

    /// Garde l'adresse et y ouvre une connexion neuve.
    pub fn init(&mut self, host: &str, port: u16) -> Result<(), AcquisitionError> {
        if host.trim().is_empty() || port == 0 {
            return Err(AcquisitionError::InvalidAddress { host: host.to_string(), port });
        }
        self.address = Some(BusAddress { host: host.to_string(), port });
        self.close();
        self.recreate_link().map_err(AcquisitionError::Connect)
    }

    /// Relance `init` sur l'adresse gardée.
    pub fn reinit(&mut self) -> Result<(), AcquisitionError> {
        let Some(addr) = self.address.clone() else {
            return Err(AcquisitionError::NotInitialized);
        };
        self.init(&addr.host, addr.port)
    }

    pub fn read_once(&mut self) -> Result<EnvironmentSample, AcquisitionError> {
        let Some(link) = self.link.as_mut() else {
            return Err(AcquisitionError::NotInitialized);
        };

        let registers = match read_registers(link) {
            Ok(regs) => regs,
            Err(err) => self.recover(err)?,
        };

        let (temperature, humidity) = decode_registers(&registers);
        if self.settings.plausibility.contains(temperature, humidity) {
            return Ok(EnvironmentSample::new(temperature, humidity));
        }

        debug!(temperature, humidity, "implausible reading, re-reading once");
        std::thread::sleep(self.settings.noise_retry_delay);

        let Some(link) = self.link.as_mut() else {
            return Err(AcquisitionError::NotInitialized);
        };
        let registers = read_registers(link).map_err(read_failure)?;
        let (temperature, humidity) = decode_registers(&registers);
        if self.settings.plausibility.contains(temperature, humidity) {
            Ok(EnvironmentSample::new(temperature, humidity))
        } else {
            Err(AcquisitionError::BadValue { temperature, humidity })
        }
    }

    pub fn close(&mut self) {
        if let Some(mut link) = self.link.take() {
            link.close();
        }
    }

    fn recover(&mut self, first: io::Error) -> Result<Vec<u16>, AcquisitionError> {
        let mut last = first;

        if let Some(link) = self.link.as_mut() {
            debug!(error = %last, "bus read failed, soft reconnect");
            match soft_reconnect(link, &self.settings).and_then(|_| read_registers(link)) {
                Ok(regs) => return Ok(regs),
                Err(e) => last = e,
            }
        }

        debug!(error = %last, "soft reconnect did not help, recreating link");
        match self.recreate_link() {
            Ok(()) => {
                if let Some(link) = self.link.as_mut() {
                    match read_registers(link) {
                        Ok(regs) => return Ok(regs),
                        Err(e) => last = e,
                    }
                }
            }
            Err(e) => last = e,
        }

        Err(read_failure(last))
    }

    /// Reprise hard : lâcher le lien courant et en monter un neuf, connecté.
    fn recreate_link(&mut self) -> io::Result<()> {
        self.close();
        let addr = self
            .address
            .clone()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "no bus address"))?;

        let mut link = self.bus.create(&addr)?;
        apply_options(&mut link, &self.settings);
        link.connect()?;
        self.link = Some(link);
        Ok(())
    }
}

impl<B: FieldBus> Drop for SensorAcquisition<B> {
    fn drop(&mut self) {
        self.close();
    }
}

fn apply_options<L: BusLink>(link: &mut L, settings: &AcquisitionSettings) {
    link.set_unit_id(settings.unit_id);
    link.set_response_timeout(settings.response_timeout);
}

fn soft_reconnect<L: BusLink>(link: &mut L, settings: &AcquisitionSettings) -> io::Result<()> {
    link.close();
    link.connect()?;
    apply_options(link, settings);
    Ok(())
}

fn read_registers<L: BusLink>(link: &mut L) -> io::Result<Vec<u16>> {
    let regs = link.read_input_registers(REGISTER_START, REGISTER_COUNT)?;
    if regs.len() < REGISTER_COUNT as usize {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("expected {REGISTER_COUNT} registers, got {}", regs.len()),
        ));
    }
    Ok(regs)
}

fn read_failure(source: io::Error) -> AcquisitionError {
    AcquisitionError::ReadFailure { os_error: source.raw_os_error(), source }
}

/// Virgule fixe ×10. Température en complément à deux pour garder les valeurs négatives.
pub fn decode_registers(regs: &[u16]) -> (f64, f64) {
    let temperature = f64::from(regs[0] as i16) / 10.0;
    let humidity = f64::from(regs[1]) / 10.0;
    (temperature, humidity)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_are_scaled_by_ten() {
        assert_eq!(decode_registers(&[300, 700]), (30.0, 70.0));
        assert_eq!(decode_registers(&[0xFF9C, 455]), (-10.0, 45.5));
    }

    #[test]
    fn settings_follow_bus_conf() {
        let s = AcquisitionSettings::from(BusConf {
            response_timeout_ms: 250,
            noise_retry_delay_ms: 20,
            unit_id: 7,
            ..BusConf::default()
        });
        assert_eq!(s.unit_id, 7);
        assert_eq!(s.response_timeout, Duration::from_millis(250));
        assert_eq!(s.noise_retry_delay, Duration::from_millis(20));
    }
}
