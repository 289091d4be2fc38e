use std::path::PathBuf;
use tracing::{debug, info, warn};

use crate::cache::CacheError;
use crate::fifo::{pump_lines, LineReader, WEARABLE_LINE_MAX};
use crate::models::WearableUpdate;
use crate::signal::StopSignal;
use crate::state::{HubState, Shared};

/// Fusionne les lignes du bridge wearable dans la table des devices.
pub struct WearableIngest {
    shared: Shared<HubState>,
    log_each: bool,
}

impl WearableIngest {
    pub fn new(shared: Shared<HubState>, log_each: bool) -> Self {
        Self { shared, log_each }
    }

    /// `None` pour une ligne qui n'est pas un objet JSON : elle est ignorée.
    pub fn apply_line(&self, line: &str) -> Option<Result<usize, CacheError>> {
        let update = WearableUpdate::parse_line(line)?;
        let res = self.shared.lock().devices.upsert(&update);
        Some(res)
    }

    pub fn run(self, path: PathBuf, stop: StopSignal) {
        let mut reader = LineReader::new(path, WEARABLE_LINE_MAX);
        pump_lines(&mut reader, &stop, "wearable", |line| match self.apply_line(&line) {
            Some(Ok(slot)) if self.log_each => info!("[wearable] slot {slot}: {line}"),
            Some(Ok(slot)) => debug!("[wearable] slot {slot}: {line}"),
            Some(Err(e)) => warn!("[wearable] {e}"),
            None => debug!("[wearable] dropping malformed line: {line}"),
        });
        debug!("[wearable] ingest stopped");
    }
}
