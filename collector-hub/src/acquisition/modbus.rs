//! Client Modbus/TCP minimal : fonction 0x04 (read input registers) seulement.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use super::{BusAddress, BusLink, FieldBus};

const FC_READ_INPUT_REGISTERS: u8 = 0x04;
const MBAP_LEN: usize = 7;
/// Plus grand PDU qu'une trame Modbus peut porter.
const MAX_PDU_LEN: usize = 253;

#[derive(Debug, Clone, Copy, Default)]
pub struct ModbusTcp;

impl FieldBus for ModbusTcp {
    type Link = ModbusTcpLink;

    fn create(&mut self, address: &BusAddress) -> io::Result<ModbusTcpLink> {
        let peer = (address.host.as_str(), address.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::AddrNotAvailable,
                    format!("{}:{} did not resolve", address.host, address.port),
                )
            })?;
        Ok(ModbusTcpLink::new(peer))
    }
}

pub struct ModbusTcpLink {
    peer: SocketAddr,
    stream: Option<TcpStream>,
    unit_id: u8,
    timeout: Duration,
    transaction_id: u16,
}

impl ModbusTcpLink {
    pub fn new(peer: SocketAddr) -> Self {
        Self {
            peer,
            stream: None,
            unit_id: 1,
            timeout: Duration::from_secs(1),
            transaction_id: 0,
        }
    }

    fn apply_timeout(&self) -> io::Result<()> {
        if let Some(stream) = &self.stream {
            stream.set_read_timeout(Some(self.timeout))?;
            stream.set_write_timeout(Some(self.timeout))?;
        }
        Ok(())
    }
}

impl BusLink for ModbusTcpLink {
    fn connect(&mut self) -> io::Result<()> {
        self.close();
        let stream = TcpStream::connect_timeout(&self.peer, self.timeout)?;
        stream.set_nodelay(true)?;
        self.stream = Some(stream);
        self.apply_timeout()
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    fn set_unit_id(&mut self, unit_id: u8) {
        self.unit_id = unit_id;
    }

    fn set_response_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
        if let Err(e) = self.apply_timeout() {
            tracing::warn!("cannot apply modbus timeout: {e}");
        }
    }

    fn read_input_registers(&mut self, start: u16, count: u16) -> io::Result<Vec<u16>> {
        self.transaction_id = self.transaction_id.wrapping_add(1);
        let tid = self.transaction_id;
        let unit_id = self.unit_id;

        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "modbus link closed"))?;

        stream.write_all(&encode_read_input_registers(tid, unit_id, start, count))?;

        let mut header = [0u8; MBAP_LEN];
        stream.read_exact(&mut header)?;
        let pdu_len = parse_mbap(&header, tid, unit_id)?;

        let mut pdu = vec![0u8; pdu_len];
        stream.read_exact(&mut pdu)?;
        decode_read_input_registers(&pdu, count)
    }
}

/// En-tête MBAP + PDU d'une requête read-input-registers.
pub fn encode_read_input_registers(tid: u16, unit_id: u8, start: u16, count: u16) -> [u8; 12] {
    let [t0, t1] = tid.to_be_bytes();
    let [s0, s1] = start.to_be_bytes();
    let [c0, c1] = count.to_be_bytes();
    // longueur = unit id + code fonction + début + nombre
    [t0, t1, 0, 0, 0, 6, unit_id, FC_READ_INPUT_REGISTERS, s0, s1, c0, c1]
}

/// Valide l'en-tête d'une réponse et renvoie la longueur du PDU qui suit.
pub fn parse_mbap(header: &[u8; MBAP_LEN], tid: u16, unit_id: u8) -> io::Result<usize> {
    let got_tid = u16::from_be_bytes([header[0], header[1]]);
    let protocol = u16::from_be_bytes([header[2], header[3]]);
    let length = u16::from_be_bytes([header[4], header[5]]) as usize;

    if got_tid != tid {
        return Err(invalid(format!("transaction id {got_tid}, expected {tid}")));
    }
    if protocol != 0 {
        return Err(invalid(format!("protocol id {protocol}")));
    }
    if header[6] != unit_id {
        return Err(invalid(format!("unit id {}, expected {unit_id}", header[6])));
    }
    // la longueur compte l'octet unit id déjà consommé
    if length < 2 || length - 1 > MAX_PDU_LEN {
        return Err(invalid(format!("bad MBAP length {length}")));
    }
    Ok(length - 1)
}

pub fn decode_read_input_registers(pdu: &[u8], count: u16) -> io::Result<Vec<u16>> {
    match pdu {
        [fc, code, ..] if *fc == FC_READ_INPUT_REGISTERS | 0x80 => {
            Err(invalid(format!("modbus exception 0x{code:02x}")))
        }
        [fc, byte_count, data @ ..] if *fc == FC_READ_INPUT_REGISTERS => {
            let expected = count as usize * 2;
            if *byte_count as usize != expected || data.len() < expected {
                return Err(invalid(format!(
                    "byte count {byte_count} (payload {}), expected {expected}",
                    data.len()
                )));
            }
            Ok(data[..expected]
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect())
        }
        [fc, ..] => Err(invalid(format!("unexpected function code 0x{fc:02x}"))),
        [] => Err(invalid("empty PDU".to_string())),
    }
}

fn invalid(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}
