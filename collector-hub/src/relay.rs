use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

use crate::fifo::{pump_lines, LineReader, RESULT_LINE_MAX};
use crate::signal::StopSignal;

/// Reçoit chaque ligne de résultat du rule engine. Tourne sur le thread du
/// relais : un callback lent retarde toutes les lignes suivantes.
pub type ResultCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Remet les verdicts du rule engine à l'hôte sans les lire.
pub struct ResultRelay {
    callback: ResultCallback,
    log_each: bool,
}

impl ResultRelay {
    pub fn new(callback: ResultCallback, log_each: bool) -> Self {
        Self { callback, log_each }
    }

    /// Chaque ligne part telle quelle, vide ou pas, sans son terminateur.
    pub fn deliver(&self, line: &str) {
        if self.log_each {
            info!("[rule_out] {line}");
        } else {
            debug!("[rule_out] {line}");
        }
        (self.callback)(line);
    }

    pub fn run(self, path: PathBuf, stop: StopSignal) {
        let mut reader = LineReader::new(path, RESULT_LINE_MAX);
        pump_lines(&mut reader, &stop, "rule_out", |line| self.deliver(&line));
        debug!("[rule_out] relay stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn every_line_reaches_the_callback_verbatim() {
        let seen = Arc::new(Mutex::new(Vec::<String>::new()));
        let sink = seen.clone();
        let relay = ResultRelay::new(Arc::new(move |l: &str| sink.lock().push(l.to_string())), false);

        relay.deliver(r#"{"type":"RESULT","deviceId":"w1","level":"WARN"}"#);
        relay.deliver("not even json");
        relay.deliver("");
        relay.deliver("   ");

        assert_eq!(
            *seen.lock(),
            vec![
                r#"{"type":"RESULT","deviceId":"w1","level":"WARN"}"#.to_string(),
                "not even json".to_string(),
                String::new(),
                "   ".to_string(),
            ]
        );
    }
}
