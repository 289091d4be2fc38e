/*!
Helpers pour les lignes NDJSON échangées par le hub

- Construire des lignes wearable comme le bridge UDP les écrit
- Décoder les lignes SENSOR en distinguant `null` d'une clé absente
- Construire des lignes RESULT comme le rule engine les renvoie
*/

use anyhow::{bail, Context, Result};
use serde_json::{Map, Value};

/// Ligne wearable `{deviceId, ts, heartRate, skin_temperature}`.
#[derive(Debug, Clone)]
pub struct WearableLineBuilder {
    fields: Map<String, Value>,
    explicit_nulls: bool,
}

impl WearableLineBuilder {
    pub fn new<S: Into<String>>(device_id: S) -> Self {
        let mut fields = Map::new();
        fields.insert("deviceId".into(), Value::String(device_id.into()));
        Self { fields, explicit_nulls: false }
    }

    /// Ligne sans `deviceId`.
    pub fn anonymous() -> Self {
        Self { fields: Map::new(), explicit_nulls: false }
    }

    pub fn ts<S: Into<String>>(mut self, ts: S) -> Self {
        self.fields.insert("ts".into(), Value::String(ts.into()));
        self
    }

    /// Ajoute un timestamp ISO courant
    pub fn with_timestamp(self) -> Self {
        self.ts(chrono::Utc::now().to_rfc3339())
    }

    pub fn heart_rate(mut self, bpm: f64) -> Self {
        self.fields.insert("heartRate".into(), number(bpm));
        self
    }

    pub fn skin_temperature(mut self, celsius: f64) -> Self {
        self.fields.insert("skin_temperature".into(), number(celsius));
        self
    }

    /// Écrit `null` pour les mesures absentes, comme le bridge.
    pub fn explicit_nulls(mut self) -> Self {
        self.explicit_nulls = true;
        self
    }

    pub fn to_value(&self) -> Value {
        let mut fields = self.fields.clone();
        if self.explicit_nulls {
            for key in ["heartRate", "skin_temperature"] {
                fields.entry(key).or_insert(Value::Null);
            }
        }
        Value::Object(fields)
    }

    /// Ligne terminée par `\n`, prête à écrire dans la FIFO.
    pub fn build(&self) -> String {
        format!("{}\n", self.to_value())
    }
}

fn number(v: f64) -> Value {
    serde_json::Number::from_f64(v).map(Value::Number).unwrap_or(Value::Null)
}

/// Ligne SENSOR décodée. `hr`/`st` à `None` veulent dire `null` explicite.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotRecord {
    pub seq: u64,
    pub device_id: String,
    pub hi: f64,
    pub hr: Option<f64>,
    pub st: Option<f64>,
    pub now_unix: f64,
    pub now_local: String,
}

/// Décode une ligne SENSOR en refusant toute clé manquante, y compris `hr`/`st`.
pub fn decode_snapshot_line(line: &str) -> Result<SnapshotRecord> {
    let value: Value = serde_json::from_str(line.trim()).context("SENSOR line is not JSON")?;
    let obj = value.as_object().context("SENSOR line is not an object")?;

    for key in ["type", "seq", "deviceId", "hi", "hr", "st", "now_unix", "now_local"] {
        if !obj.contains_key(key) {
            bail!("SENSOR line misses key '{}'", key);
        }
    }
    if obj["type"] != "SENSOR" {
        bail!("unexpected type {}", obj["type"]);
    }

    Ok(SnapshotRecord {
        seq: obj["seq"].as_u64().context("seq is not an unsigned integer")?,
        device_id: obj["deviceId"].as_str().context("deviceId is not a string")?.to_string(),
        hi: obj["hi"].as_f64().context("hi is not a number")?,
        hr: nullable_number(&obj["hr"], "hr")?,
        st: nullable_number(&obj["st"], "st")?,
        now_unix: obj["now_unix"].as_f64().context("now_unix is not a number")?,
        now_local: obj["now_local"].as_str().context("now_local is not a string")?.to_string(),
    })
}

fn nullable_number(v: &Value, key: &str) -> Result<Option<f64>> {
    match v {
        Value::Null => Ok(None),
        Value::Number(n) => Ok(n.as_f64()),
        other => bail!("{} must be a number or null, got {}", key, other),
    }
}

/// Ligne RESULT telle que le rule engine la renvoie.
pub fn result_line(device_id: &str, level: &str) -> String {
    format!(
        "{}\n",
        serde_json::json!({
            "type": "RESULT",
            "deviceId": device_id,
            "level": level,
            "ts": chrono::Utc::now().to_rfc3339(),
        })
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_matches_bridge_format() {
        let line = WearableLineBuilder::new("watch-1")
            .ts("2024-05-01T10:00:00")
            .heart_rate(72.0)
            .explicit_nulls()
            .build();
        assert!(line.ends_with('\n'));

        let v: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(v["deviceId"], "watch-1");
        assert_eq!(v["heartRate"], 72.0);
        assert!(v["skin_temperature"].is_null());
    }

    #[test]
    fn anonymous_lines_have_no_device_id() {
        let v = WearableLineBuilder::anonymous().heart_rate(60.0).with_timestamp().to_value();
        assert!(v.get("deviceId").is_none());
        assert!(v["ts"].is_string());
    }

    #[test]
    fn decoder_tells_null_from_zero_and_from_missing() {
        let base = r#""type":"SENSOR","seq":1,"deviceId":"w","hi":35.04,"now_unix":1.5,"now_local":"2024-05-01T10:00:00""#;

        let nulls = decode_snapshot_line(&format!("{{{base},\"hr\":72,\"st\":null}}")).unwrap();
        assert_eq!(nulls.hr, Some(72.0));
        assert_eq!(nulls.st, None);

        let zeros = decode_snapshot_line(&format!("{{{base},\"hr\":0,\"st\":0.0}}")).unwrap();
        assert_eq!(zeros.st, Some(0.0));
        assert_ne!(nulls, zeros);

        assert!(decode_snapshot_line(&format!("{{{base},\"hr\":72}}")).is_err());
        assert!(decode_snapshot_line(&format!("{{{base},\"hr\":\"72\",\"st\":null}}")).is_err());
    }

    #[test]
    fn result_lines_are_single_json_objects() {
        let line = result_line("w", "WARN");
        assert_eq!(line.matches('\n').count(), 1);
        let v: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(v["type"], "RESULT");
    }
}
