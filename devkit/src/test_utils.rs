/*!
Harnais de test pour le collector hub

Facilite l'écriture de tests bout-en-bout avec:
- FIFOs provisionnées dans un répertoire temporaire
- Lecture des snapshots SENSOR publiés vers le rule engine
- Callback qui enregistre les verdicts relayés
- Arrêt du hub en débloquant les lecteurs de FIFO
*/

use anyhow::{Context, Result};
use collector_hub::acquisition::FieldBus;
use collector_hub::config::{BusConf, HubConfig};
use collector_hub::fifo::{ensure_fifo, try_open_writer, LineReader, ReadEvent, RESULT_LINE_MAX};
use collector_hub::CollectorHub;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// Les trois FIFOs du hub dans un répertoire temporaire.
pub struct FifoHarness {
    _dir: TempDir,
    pub wearable: PathBuf,
    pub rule_in: PathBuf,
    pub rule_out: PathBuf,
}

impl FifoHarness {
    pub fn new() -> Result<Self> {
        env_logger::try_init().ok(); // Init logging pour tests

        let dir = tempfile::tempdir().context("cannot create temp dir")?;
        let wearable = dir.path().join("th_fifo");
        let rule_in = dir.path().join("rulebase_in.fifo");
        let rule_out = dir.path().join("rulebase_out.fifo");
        log::info!("📁 FIFO harness in {}", dir.path().display());

        Ok(Self { _dir: dir, wearable, rule_in, rule_out })
    }

    /// Config pointant sur les FIFOs du harnais et un capteur fictif.
    pub fn config(&self, interval_secs: u64) -> HubConfig {
        HubConfig {
            wearable_pipe: self.wearable.clone(),
            rule_in_pipe: self.rule_in.clone(),
            rule_out_pipe: self.rule_out.clone(),
            publish_interval_secs: interval_secs,
            bus: BusConf {
                host: "sensor.test".into(),
                port: 502,
                noise_retry_delay_ms: 1,
                ..BusConf::default()
            },
            ..HubConfig::default()
        }
    }

    /// Crée les FIFOs à l'avance (le hub le fait aussi au démarrage).
    pub fn provision(&self) -> Result<()> {
        for path in [&self.wearable, &self.rule_in, &self.rule_out] {
            ensure_fifo(path)?;
        }
        Ok(())
    }

    /// Ouvre la FIFO wearable en écriture; bloque jusqu'à ce que le hub lise.
    pub fn open_wearable_writer(&self) -> Result<File> {
        open_blocking_writer(&self.wearable)
    }

    /// Écrit des lignes comme le bridge UDP puis referme la FIFO.
    pub fn send_wearable_lines<S: AsRef<str>>(&self, lines: &[S]) -> Result<()> {
        send_lines(&self.wearable, lines)
    }

    /// Écrit des lignes comme le rule engine puis referme la FIFO.
    pub fn send_result_lines<S: AsRef<str>>(&self, lines: &[S]) -> Result<()> {
        send_lines(&self.rule_out, lines)
    }

    /// Ouvre et referme aussitôt les FIFOs lues par le hub, sans bloquer.
    /// Un lecteur coincé dans `open` voit alors EOF et regarde le signal d'arrêt.
    pub fn release_readers(&self) {
        for path in [&self.wearable, &self.rule_out] {
            match try_open_writer(path) {
                Ok(Some(file)) => drop(file),
                Ok(None) => {}
                Err(e) => log::debug!("release {}: {}", path.display(), e),
            }
        }
    }

    /// Arrête le hub sur un autre thread en débloquant les lecteurs jusqu'à la fin.
    pub fn shutdown<B>(&self, mut hub: CollectorHub<B>, deadline: Duration) -> Result<CollectorHub<B>>
    where
        B: FieldBus + Clone + Send + 'static,
    {
        let stopper = thread::spawn(move || {
            hub.stop();
            hub
        });

        let start = Instant::now();
        while !stopper.is_finished() {
            if start.elapsed() > deadline {
                anyhow::bail!("hub did not stop within {:?}", deadline);
            }
            self.release_readers();
            thread::sleep(Duration::from_millis(20));
        }
        stopper.join().map_err(|_| anyhow::anyhow!("stop thread panicked"))
    }
}

fn open_blocking_writer(path: &Path) -> Result<File> {
    OpenOptions::new()
        .write(true)
        .open(path)
        .with_context(|| format!("cannot open {} for writing", path.display()))
}

fn send_lines<S: AsRef<str>>(path: &Path, lines: &[S]) -> Result<()> {
    let mut file = open_blocking_writer(path)?;
    for line in lines {
        let line = line.as_ref();
        file.write_all(line.as_bytes())?;
        if !line.ends_with('\n') {
            file.write_all(b"\n")?;
        }
    }
    file.flush()?;
    log::info!("📨 Sent {} line(s) to {}", lines.len(), path.display());
    Ok(())
}

/// Lecteur de la FIFO rule_in, à la place du rule engine.
///
/// Le thread s'arrête quand le publisher referme la FIFO; il n'est pas joint.
pub struct SnapshotTap {
    lines: Receiver<String>,
}

impl SnapshotTap {
    pub fn attach(path: &Path) -> Result<Self> {
        let (tx, rx) = mpsc::channel();
        let path = path.to_path_buf();
        thread::Builder::new()
            .name("snapshot-tap".into())
            .spawn(move || {
                let mut reader = LineReader::new(&path, RESULT_LINE_MAX);
                loop {
                    match reader.next_line() {
                        Ok(ReadEvent::Line(line)) => {
                            if tx.send(line).is_err() {
                                break;
                            }
                        }
                        Ok(ReadEvent::Oversized(len)) => log::warn!("snapshot tap dropped {} bytes", len),
                        Ok(ReadEvent::Eof) => break,
                        Err(e) => {
                            log::warn!("snapshot tap on {}: {}", path.display(), e);
                            break;
                        }
                    }
                }
            })
            .context("cannot spawn snapshot tap")?;
        Ok(Self { lines: rx })
    }

    pub fn next_line(&self, timeout: Duration) -> Option<String> {
        match self.lines.recv_timeout(timeout) {
            Ok(line) => Some(line),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Première ligne qui satisfait `pred` avant l'échéance.
    pub fn wait_for(&self, timeout: Duration, pred: impl Fn(&str) -> bool) -> Option<String> {
        let start = Instant::now();
        while let Some(left) = timeout.checked_sub(start.elapsed()) {
            match self.next_line(left) {
                Some(line) if pred(&line) => return Some(line),
                Some(line) => log::debug!("skipped snapshot {}", line),
                None => return None,
            }
        }
        None
    }
}

/// Callback de résultats qui garde chaque ligne reçue.
#[derive(Clone, Default)]
pub struct RecordingCallback {
    seen: Arc<Mutex<Vec<String>>>,
}

impl RecordingCallback {
    pub fn new() -> Self {
        Self::default()
    }

    /// Closure à passer à `CollectorHub::create`/`with_bus`.
    pub fn callback(&self) -> impl Fn(&str) + Send + Sync + 'static {
        let seen = self.seen.clone();
        move |line: &str| {
            log::info!("📥 Result: {}", line);
            seen.lock().unwrap().push(line.to_string());
        }
    }

    pub fn lines(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }

    /// Attend au moins `count` lignes; renvoie ce qui a été reçu.
    pub fn wait_for_count(&self, count: usize, timeout: Duration) -> Vec<String> {
        let start = Instant::now();
        loop {
            let lines = self.lines();
            if lines.len() >= count || start.elapsed() > timeout {
                return lines;
            }
            thread::sleep(Duration::from_millis(20));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::FileTypeExt;

    #[test]
    fn harness_provisions_fifos_and_config() {
        let harness = FifoHarness::new().unwrap();
        harness.provision().unwrap();
        for path in [&harness.wearable, &harness.rule_in, &harness.rule_out] {
            assert!(std::fs::metadata(path).unwrap().file_type().is_fifo());
        }

        let cfg = harness.config(1);
        assert_eq!(cfg.publish_interval_secs, 1);
        assert_eq!(cfg.rule_out_pipe, harness.rule_out);
        assert_eq!(cfg.bus.unit_id, 1);
    }

    #[test]
    fn release_without_readers_is_a_no_op() {
        let harness = FifoHarness::new().unwrap();
        harness.provision().unwrap();
        harness.release_readers();
    }

    #[test]
    fn recording_callback_keeps_order() {
        let rec = RecordingCallback::new();
        let cb = rec.callback();
        cb("one");
        cb("two");
        assert_eq!(rec.wait_for_count(2, Duration::from_millis(10)), vec!["one", "two"]);
    }

    #[test]
    fn tap_reads_lines_until_the_writer_leaves() {
        let harness = FifoHarness::new().unwrap();
        harness.provision().unwrap();
        let tap = SnapshotTap::attach(&harness.rule_in).unwrap();

        send_lines(&harness.rule_in, &["a", "b\n"]).unwrap();
        assert_eq!(tap.next_line(Duration::from_secs(2)).as_deref(), Some("a"));
        assert_eq!(tap.wait_for(Duration::from_secs(2), |l| l == "b").as_deref(), Some("b"));
        assert_eq!(tap.next_line(Duration::from_millis(200)), None);
    }
}
