//! Plomberie FIFO commune aux trois agents de pipe.
//!
//! Les lignes viennent de producteurs externes : leur longueur est bornée et
//! une ligne trop longue est jetée en entier, jusqu'à son `\n`.

use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::sys::stat::Mode;
use nix::unistd::mkfifo;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Write};
use std::os::unix::fs::{FileTypeExt, OpenOptionsExt};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

use crate::signal::StopSignal;

/// Plus longue ligne wearable acceptée, terminateur exclu.
pub const WEARABLE_LINE_MAX: usize = 4096;
/// Plus longue ligne de résultat acceptée, terminateur exclu.
pub const RESULT_LINE_MAX: usize = 8192;

#[derive(Debug, thiserror::Error)]
pub enum FifoError {
    #[error("{0} exists but is not a FIFO")]
    NotFifo(PathBuf),
    #[error("mkfifo {path} failed: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: Errno,
    },
    #[error("stat {path} failed: {source}")]
    Stat {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Vérifie que `path` est une FIFO; la crée en mode 0666 si elle manque.
pub fn ensure_fifo(path: &Path) -> Result<(), FifoError> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.file_type().is_fifo() => Ok(()),
        Ok(_) => Err(FifoError::NotFifo(path.to_path_buf())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            match mkfifo(path, Mode::from_bits_truncate(0o666)) {
                Ok(()) => Ok(()),
                // course perdue avec un autre créateur : vérifier ce qu'il a fait
                Err(Errno::EEXIST) => match std::fs::metadata(path) {
                    Ok(meta) if meta.file_type().is_fifo() => Ok(()),
                    _ => Err(FifoError::NotFifo(path.to_path_buf())),
                },
                Err(source) => Err(FifoError::Create { path: path.to_path_buf(), source }),
            }
        }
        Err(source) => Err(FifoError::Stat { path: path.to_path_buf(), source }),
    }
}

/// Ouvre le côté écriture sans attendre de lecteur.
///
/// `Ok(None)` quand personne n'a la FIFO ouverte en lecture. Le fichier
/// rendu repasse en mode bloquant.
pub fn try_open_writer(path: &Path) -> io::Result<Option<File>> {
    let file = match OpenOptions::new()
        .write(true)
        .custom_flags(OFlag::O_NONBLOCK.bits())
        .open(path)
    {
        Ok(file) => file,
        Err(e) if e.raw_os_error() == Some(Errno::ENXIO as i32) => return Ok(None),
        Err(e) => return Err(e),
    };
    fcntl(file.as_raw_fd(), FcntlArg::F_SETFL(OFlag::empty())).map_err(io::Error::from)?;
    Ok(Some(file))
}

#[derive(Debug, PartialEq, Eq)]
pub enum ReadEvent {
    /// Ligne sans terminateur. Les octets non UTF-8 sont remplacés par U+FFFD.
    Line(String),
    /// Tous les écrivains sont partis; la prochaine lecture rouvre la FIFO.
    Eof,
    /// Ligne plus longue que la limite, jetée. Porte le nombre d'octets perdus.
    Oversized(usize),
}

/// Lecteur de lignes sur une FIFO dont l'écrivain va et vient.
///
/// L'ouverture bloque jusqu'à l'arrivée d'un écrivain, la lecture aussi tant
/// que l'écrivain se tait.
pub struct LineReader {
    path: PathBuf,
    max_len: usize,
    reader: Option<BufReader<File>>,
}

impl LineReader {
    pub fn new(path: impl Into<PathBuf>, max_len: usize) -> Self {
        Self { path: path.into(), max_len, reader: None }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn next_line(&mut self) -> io::Result<ReadEvent> {
        let reader = match self.reader.take() {
            Some(r) => r,
            None => BufReader::new(File::open(&self.path)?),
        };
        let reader = self.reader.insert(reader);

        let mut buf = Vec::new();
        // place pour la ligne, son '\r' éventuel et le '\n'
        let limit = self.max_len as u64 + 2;
        let n = reader.by_ref().take(limit).read_until(b'\n', &mut buf)?;
        if n == 0 {
            self.reader = None;
            return Ok(ReadEvent::Eof);
        }
        if n as u64 == limit && buf.last() != Some(&b'\n') {
            return skip_rest_of_line(reader, n).map(ReadEvent::Oversized);
        }
        while matches!(buf.last(), Some(&b'\n') | Some(&b'\r')) {
            buf.pop();
        }
        if buf.len() > self.max_len {
            return Ok(ReadEvent::Oversized(buf.len()));
        }
        Ok(ReadEvent::Line(String::from_utf8_lossy(&buf).into_owned()))
    }
}

/// Consomme jusqu'au prochain `\n` inclus. Renvoie le total d'octets jetés.
fn skip_rest_of_line(reader: &mut BufReader<File>, already: usize) -> io::Result<usize> {
    let mut dropped = already;
    loop {
        let chunk = reader.fill_buf()?;
        if chunk.is_empty() {
            return Ok(dropped);
        }
        match chunk.iter().position(|&b| b == b'\n') {
            Some(i) => {
                reader.consume(i + 1);
                return Ok(dropped + i);
            }
            None => {
                let len = chunk.len();
                reader.consume(len);
                dropped += len;
            }
        }
    }
}

/// Passe les lignes à `on_line` jusqu'à la demande d'arrêt.
///
/// EOF rouvre la FIFO. Le drapeau d'arrêt est lu entre deux lectures et juste
/// après EOF : un arrêt demandé pendant une lecture bloquée n'aboutit que
/// quand le pair écrit ou ferme.
pub fn pump_lines(reader: &mut LineReader, stop: &StopSignal, tag: &str, mut on_line: impl FnMut(String)) {
    while !stop.is_stopped() {
        match reader.next_line() {
            Ok(ReadEvent::Line(line)) => on_line(line),
            Ok(ReadEvent::Eof) => debug!("[{tag}] writer left {}, reopening", reader.path().display()),
            Ok(ReadEvent::Oversized(len)) => warn!("[{tag}] dropped a {len}-byte line over the length limit"),
            Err(e) => {
                warn!("[{tag}] cannot read {}: {e}", reader.path().display());
                if stop.wait(Duration::from_secs(1)) {
                    break;
                }
            }
        }
    }
}

/// Côté écriture d'une FIFO, (ré)ouvert à la demande et oublié sur EPIPE.
pub struct FifoWriter {
    path: PathBuf,
    file: Option<File>,
}

impl FifoWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), file: None }
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    /// `false` tant qu'aucun lecteur n'est branché.
    pub fn ensure_open(&mut self) -> io::Result<bool> {
        if self.file.is_none() {
            self.file = try_open_writer(&self.path)?;
        }
        Ok(self.file.is_some())
    }

    pub fn write_line(&mut self, line: &str) -> io::Result<()> {
        let Some(file) = self.file.as_mut() else {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "fifo writer not open"));
        };
        let res = file.write_all(line.as_bytes()).and_then(|_| file.flush());
        if res.is_err() {
            self.file = None;
        }
        res
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn ensure_fifo_creates_and_accepts_existing_fifo() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.fifo");
        ensure_fifo(&path).unwrap();
        assert!(std::fs::metadata(&path).unwrap().file_type().is_fifo());
        ensure_fifo(&path).unwrap();
    }

    #[test]
    fn ensure_fifo_rejects_regular_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain");
        std::fs::write(&path, b"x").unwrap();
        assert!(matches!(ensure_fifo(&path), Err(FifoError::NotFifo(_))));
    }

    #[test]
    fn writer_without_reader_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.fifo");
        ensure_fifo(&path).unwrap();
        assert!(try_open_writer(&path).unwrap().is_none());

        let mut writer = FifoWriter::new(&path);
        assert!(!writer.ensure_open().unwrap());
        assert!(writer.write_line("x\n").is_err());
    }

    #[test]
    fn reader_strips_terminators_and_reports_eof() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("in.fifo");
        ensure_fifo(&path).unwrap();

        let writer_path = path.clone();
        let writer = thread::spawn(move || {
            let mut f = OpenOptions::new().write(true).open(&writer_path).unwrap();
            f.write_all(b"first\r\nsecond\n").unwrap();
        });

        let mut reader = LineReader::new(&path, 64);
        assert_eq!(reader.next_line().unwrap(), ReadEvent::Line("first".into()));
        assert_eq!(reader.next_line().unwrap(), ReadEvent::Line("second".into()));
        writer.join().unwrap();
        assert_eq!(reader.next_line().unwrap(), ReadEvent::Eof);
    }

    #[test]
    fn overlong_lines_are_dropped_whole() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("in.fifo");
        ensure_fifo(&path).unwrap();

        let writer_path = path.clone();
        let writer = thread::spawn(move || {
            let mut f = OpenOptions::new().write(true).open(&writer_path).unwrap();
            let mut payload = vec![b'x'; 20_000];
            payload.extend_from_slice(b"\nfits\n");
            payload.extend_from_slice(&[b'y'; 16]);
            payload.extend_from_slice(b"\r\n\xffok\n");
            f.write_all(&payload).unwrap();
        });

        let mut reader = LineReader::new(&path, 16);
        assert_eq!(reader.next_line().unwrap(), ReadEvent::Oversized(20_000));
        assert_eq!(reader.next_line().unwrap(), ReadEvent::Line("fits".into()));
        // pile à la limite, CRLF compris
        assert_eq!(reader.next_line().unwrap(), ReadEvent::Line("y".repeat(16)));
        assert_eq!(reader.next_line().unwrap(), ReadEvent::Line("\u{FFFD}ok".into()));
        writer.join().unwrap();
        assert_eq!(reader.next_line().unwrap(), ReadEvent::Eof);
    }
}
