/*!
# Hub DevKit - Stubs et utilitaires pour tester le collector hub

Bibliothèque facilitant les tests du hub sans matériel ni rule engine:
- Bus de terrain scripté (pannes, reconnexions, valeurs aberrantes)
- Harnais FIFO (répertoire temporaire, lecteurs/écrivains de test)
- Builders de lignes wearable et décodeur de snapshots SENSOR
*/

pub mod bus_stub;
pub mod protocol_helpers;
pub mod test_utils;

pub use bus_stub::{BusEvent, ReadStep, ScriptedBus};
pub use protocol_helpers::{decode_snapshot_line, result_line, SnapshotRecord, WearableLineBuilder};
pub use test_utils::{FifoHarness, RecordingCallback, SnapshotTap};
