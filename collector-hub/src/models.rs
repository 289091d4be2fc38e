use serde::{Deserialize, Serialize};

/// Plus long device id gardé, en octets.
pub const MAX_DEVICE_ID_LEN: usize = 63;

/// Device id utilisé quand une mise à jour n'en porte pas.
pub const UNKNOWN_DEVICE: &str = "unknown";

/// Dernière mesure température/humidité fiable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentSample {
    pub temperature: f64,
    pub humidity: f64,
    pub valid: bool,
}

impl EnvironmentSample {
    pub fn new(temperature: f64, humidity: f64) -> Self {
        Self { temperature, humidity, valid: true }
    }
}

/// Constantes en cache d'un wearable.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeviceEntry {
    pub device_id: String,
    pub last_timestamp: String,
    pub heart_rate: Option<f64>,
    pub skin_temperature: Option<f64>,
}

/// Une ligne du bridge wearable. Champ absent ou `null` : `None` dans les deux cas.
#[derive(Debug, Clone, PartialEq)]
pub struct WearableUpdate {
    pub device_id: String,
    pub ts: Option<String>,
    pub heart_rate: Option<f64>,
    pub skin_temperature: Option<f64>,
}

impl WearableUpdate {
    /// Parse une ligne du bridge. `None` pour tout ce qui n'est pas un objet JSON.
    ///
    /// Un champ du mauvais type JSON compte comme absent, la ligne est gardée.
    pub fn parse_line(line: &str) -> Option<Self> {
        let value: serde_json::Value = serde_json::from_str(line.trim()).ok()?;
        let obj = value.as_object()?;

        let device_id = obj
            .get("deviceId")
            .and_then(|v| v.as_str())
            .unwrap_or(UNKNOWN_DEVICE);

        Some(Self {
            device_id: truncate_device_id(device_id).to_string(),
            ts: obj.get("ts").and_then(|v| v.as_str()).map(str::to_string),
            heart_rate: obj.get("heartRate").and_then(|v| v.as_f64()),
            skin_temperature: obj.get("skin_temperature").and_then(|v| v.as_f64()),
        })
    }
}

/// Coupe un id à [`MAX_DEVICE_ID_LEN`] octets au plus, sur une frontière de caractère.
pub fn truncate_device_id(id: &str) -> &str {
    if id.len() <= MAX_DEVICE_ID_LEN {
        return id;
    }
    let mut end = MAX_DEVICE_ID_LEN;
    while !id.is_char_boundary(end) {
        end -= 1;
    }
    &id[..end]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    #[serde(rename = "SENSOR")]
    Sensor,
}

/// Enregistrement envoyé au rule engine, un par device et par tick.
///
/// L'ordre des champs est l'ordre sur le fil. `hr` et `st` valent `null`
/// quand inconnus : le rule engine distingue "pas de donnée" d'une mesure à zéro.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorSnapshotMessage {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub seq: u64,
    #[serde(rename = "deviceId")]
    pub device_id: String,
    #[serde(rename = "hi")]
    pub heat_index: f64,
    #[serde(rename = "hr")]
    pub heart_rate: Option<f64>,
    #[serde(rename = "st")]
    pub skin_temperature: Option<f64>,
    #[serde(rename = "now_unix")]
    pub captured_at_epoch_seconds: f64,
    #[serde(rename = "now_local")]
    pub captured_at_local: String,
}

impl SensorSnapshotMessage {
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bridge_nulls_count_as_absent() {
        let u = WearableUpdate::parse_line(
            r#"{"deviceId":"w1","ts":"12:00","heartRate":null,"skin_temperature":33.5}"#,
        )
        .unwrap();
        assert_eq!(u.device_id, "w1");
        assert_eq!(u.ts.as_deref(), Some("12:00"));
        assert_eq!(u.heart_rate, None);
        assert_eq!(u.skin_temperature, Some(33.5));
    }

    #[test]
    fn missing_device_id_maps_to_unknown() {
        let u = WearableUpdate::parse_line(r#"{"heartRate":70}"#).unwrap();
        assert_eq!(u.device_id, UNKNOWN_DEVICE);
        assert_eq!(u.heart_rate, Some(70.0));
    }

    #[test]
    fn malformed_lines_are_rejected() {
        assert!(WearableUpdate::parse_line("not json").is_none());
        assert!(WearableUpdate::parse_line("[1,2]").is_none());
        assert!(WearableUpdate::parse_line(r#"{"deviceId":"w1""#).is_none());
    }

    #[test]
    fn wrong_types_are_ignored_per_field() {
        let u = WearableUpdate::parse_line(r#"{"deviceId":"w2","heartRate":"fast","ts":5}"#).unwrap();
        assert_eq!(u.heart_rate, None);
        assert_eq!(u.ts, None);
    }

    #[test]
    fn long_ids_are_truncated_on_char_boundary() {
        let long = "é".repeat(40); // 80 octets
        let cut = truncate_device_id(&long);
        assert!(cut.len() <= MAX_DEVICE_ID_LEN);
        assert_eq!(cut.len(), 62);
        assert_eq!(truncate_device_id("short"), "short");
    }

    #[test]
    fn snapshot_line_keeps_wire_names_and_nulls() {
        let msg = SensorSnapshotMessage {
            kind: MessageKind::Sensor,
            seq: 3,
            device_id: "w1".into(),
            heat_index: 35.04,
            heart_rate: Some(72.0),
            skin_temperature: None,
            captured_at_epoch_seconds: 1_700_000_000.5,
            captured_at_local: "2023-11-14T22:13:20".into(),
        };
        let line = msg.to_line().unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(
            line.trim_end(),
            r#"{"type":"SENSOR","seq":3,"deviceId":"w1","hi":35.04,"hr":72.0,"st":null,"now_unix":1700000000.5,"now_local":"2023-11-14T22:13:20"}"#
        );
    }
}
