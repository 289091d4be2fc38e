/*!
Bus de terrain scripté pour tester l'acquisition sans capteur

Chaque lecture consomme l'étape suivante du script; toutes les opérations
(création, connexion, fermeture, options, lectures) sont journalisées pour
vérifier la séquence de récupération soft/hard.
*/

use collector_hub::acquisition::{BusAddress, BusLink, FieldBus};
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    Create,
    Connect,
    Close,
    SetUnitId(u8),
    SetTimeout(Duration),
    Read,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReadStep {
    Registers(Vec<u16>),
    Fail(io::ErrorKind),
    FailOs(i32),
}

impl ReadStep {
    /// Registres ×10 pour une lecture T/H donnée.
    pub fn reading(temperature: f64, humidity: f64) -> Self {
        let t = (temperature * 10.0).round() as i16 as u16;
        let h = (humidity * 10.0).round() as u16;
        ReadStep::Registers(vec![t, h])
    }

    fn into_result(self) -> io::Result<Vec<u16>> {
        match self {
            ReadStep::Registers(regs) => Ok(regs),
            ReadStep::Fail(kind) => Err(io::Error::new(kind, "scripted bus failure")),
            ReadStep::FailOs(code) => Err(io::Error::from_raw_os_error(code)),
        }
    }
}

#[derive(Debug)]
struct Script {
    reads: VecDeque<ReadStep>,
    /// Étape rejouée quand le script est épuisé.
    fallback: ReadStep,
    connect_failures: usize,
    create_failures: usize,
    events: Vec<BusEvent>,
}

/// Faux bus partagé: les clones voient le même script et le même journal.
#[derive(Clone)]
pub struct ScriptedBus {
    script: Arc<Mutex<Script>>,
}

impl ScriptedBus {
    pub fn new() -> Self {
        Self {
            script: Arc::new(Mutex::new(Script {
                reads: VecDeque::new(),
                fallback: ReadStep::Fail(io::ErrorKind::TimedOut),
                connect_failures: 0,
                create_failures: 0,
                events: Vec::new(),
            })),
        }
    }

    pub fn push_read(&self, step: ReadStep) -> &Self {
        self.script.lock().unwrap().reads.push_back(step);
        self
    }

    pub fn push_reading(&self, temperature: f64, humidity: f64) -> &Self {
        self.push_read(ReadStep::reading(temperature, humidity))
    }

    pub fn fail_reads(&self, count: usize, kind: io::ErrorKind) -> &Self {
        for _ in 0..count {
            self.push_read(ReadStep::Fail(kind));
        }
        self
    }

    pub fn otherwise(&self, step: ReadStep) -> &Self {
        self.script.lock().unwrap().fallback = step;
        self
    }

    pub fn fail_next_connects(&self, count: usize) -> &Self {
        self.script.lock().unwrap().connect_failures = count;
        self
    }

    pub fn fail_next_creates(&self, count: usize) -> &Self {
        self.script.lock().unwrap().create_failures = count;
        self
    }

    pub fn events(&self) -> Vec<BusEvent> {
        self.script.lock().unwrap().events.clone()
    }

    pub fn count(&self, event: &BusEvent) -> usize {
        self.script.lock().unwrap().events.iter().filter(|e| *e == event).count()
    }

    /// Journal sans les réglages d'options, pour comparer les séquences.
    pub fn lifecycle(&self) -> Vec<BusEvent> {
        self.events()
            .into_iter()
            .filter(|e| !matches!(e, BusEvent::SetUnitId(_) | BusEvent::SetTimeout(_)))
            .collect()
    }

    pub fn clear_events(&self) {
        self.script.lock().unwrap().events.clear();
    }

    fn record(&self, event: BusEvent) {
        log::debug!("🔌 [SCRIPTED BUS] {:?}", event);
        self.script.lock().unwrap().events.push(event);
    }
}

impl Default for ScriptedBus {
    fn default() -> Self {
        Self::new()
    }
}

impl FieldBus for ScriptedBus {
    type Link = ScriptedLink;

    fn create(&mut self, _address: &BusAddress) -> io::Result<ScriptedLink> {
        self.record(BusEvent::Create);
        let mut script = self.script.lock().unwrap();
        if script.create_failures > 0 {
            script.create_failures -= 1;
            return Err(io::Error::new(io::ErrorKind::AddrNotAvailable, "scripted create failure"));
        }
        Ok(ScriptedLink { bus: self.clone(), connected: false })
    }
}

pub struct ScriptedLink {
    bus: ScriptedBus,
    connected: bool,
}

impl BusLink for ScriptedLink {
    fn connect(&mut self) -> io::Result<()> {
        self.bus.record(BusEvent::Connect);
        let mut script = self.bus.script.lock().unwrap();
        if script.connect_failures > 0 {
            script.connect_failures -= 1;
            return Err(io::Error::from(io::ErrorKind::ConnectionRefused));
        }
        self.connected = true;
        Ok(())
    }

    fn close(&mut self) {
        self.bus.record(BusEvent::Close);
        self.connected = false;
    }

    fn set_unit_id(&mut self, unit_id: u8) {
        self.bus.record(BusEvent::SetUnitId(unit_id));
    }

    fn set_response_timeout(&mut self, timeout: Duration) {
        self.bus.record(BusEvent::SetTimeout(timeout));
    }

    fn read_input_registers(&mut self, _start: u16, _count: u16) -> io::Result<Vec<u16>> {
        self.bus.record(BusEvent::Read);
        if !self.connected {
            return Err(io::Error::from(io::ErrorKind::NotConnected));
        }
        let mut script = self.bus.script.lock().unwrap();
        let step = script.reads.pop_front().unwrap_or_else(|| script.fallback.clone());
        step.into_result()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> BusAddress {
        BusAddress { host: "stub".into(), port: 502 }
    }

    #[test]
    fn script_is_consumed_in_order_then_falls_back() {
        let mut bus = ScriptedBus::new();
        bus.push_reading(21.5, 40.0).fail_reads(1, io::ErrorKind::TimedOut);
        bus.otherwise(ReadStep::reading(1.0, 2.0));

        let mut link = bus.create(&addr()).unwrap();
        link.connect().unwrap();
        assert_eq!(link.read_input_registers(0, 2).unwrap(), vec![215, 400]);
        assert_eq!(link.read_input_registers(0, 2).unwrap_err().kind(), io::ErrorKind::TimedOut);
        assert_eq!(link.read_input_registers(0, 2).unwrap(), vec![10, 20]);
        assert_eq!(bus.count(&BusEvent::Read), 3);
    }

    #[test]
    fn negative_temperatures_use_twos_complement() {
        assert_eq!(ReadStep::reading(-10.0, 45.5), ReadStep::Registers(vec![0xFF9C, 455]));
    }

    #[test]
    fn scripted_connect_and_create_failures() {
        let mut bus = ScriptedBus::new();
        bus.fail_next_creates(1).fail_next_connects(1);
        assert!(bus.create(&addr()).is_err());
        let mut link = bus.create(&addr()).unwrap();
        assert!(link.connect().is_err());
        assert!(link.connect().is_ok());
        assert_eq!(
            bus.lifecycle(),
            vec![BusEvent::Create, BusEvent::Create, BusEvent::Connect, BusEvent::Connect]
        );
    }
}
