// src/util/io/modbus.rs
//! Modbus/TCP framing for the one operation the kiosk needs: read coils.
//!
//! Frame = 7 byte MBAP header + PDU. Both the client side (request encode,
//! response decode) and the device side used by `coil-sim` and the tests
//! (request decode, response encode) live here so they cannot drift apart.

use std::fmt;

use crate::error::ReadError;
use crate::log_warn;

pub const READ_COILS: u8 = 0x01;
pub const EXCEPTION_FLAG: u8 = 0x80;
pub const MBAP_LEN: usize = 7;
/// Largest coil count a single read-coils request may ask for.
pub const MAX_READ_COILS: u16 = 2000;
const MAX_PDU_LEN: usize = 253;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionCode {
    IllegalFunction,
    IllegalDataAddress,
    IllegalDataValue,
    ServerDeviceFailure,
    Acknowledge,
    ServerDeviceBusy,
    GatewayPathUnavailable,
    GatewayTargetFailed,
    Other(u8),
}

impl From<u8> for ExceptionCode {
    fn from(code: u8) -> Self {
        match code {
            0x01 => ExceptionCode::IllegalFunction,
            0x02 => ExceptionCode::IllegalDataAddress,
            0x03 => ExceptionCode::IllegalDataValue,
            0x04 => ExceptionCode::ServerDeviceFailure,
            0x05 => ExceptionCode::Acknowledge,
            0x06 => ExceptionCode::ServerDeviceBusy,
            0x0A => ExceptionCode::GatewayPathUnavailable,
            0x0B => ExceptionCode::GatewayTargetFailed,
            other => ExceptionCode::Other(other),
        }
    }
}

impl From<ExceptionCode> for u8 {
    fn from(code: ExceptionCode) -> Self {
        match code {
            ExceptionCode::IllegalFunction => 0x01,
            ExceptionCode::IllegalDataAddress => 0x02,
            ExceptionCode::IllegalDataValue => 0x03,
            ExceptionCode::ServerDeviceFailure => 0x04,
            ExceptionCode::Acknowledge => 0x05,
            ExceptionCode::ServerDeviceBusy => 0x06,
            ExceptionCode::GatewayPathUnavailable => 0x0A,
            ExceptionCode::GatewayTargetFailed => 0x0B,
            ExceptionCode::Other(code) => code,
        }
    }
}

impl fmt::Display for ExceptionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExceptionCode::Other(code) => write!(f, "code {:#04x}", code),
            known => write!(f, "{:?}", known),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbapHeader {
    pub transaction_id: u16,
    pub protocol_id: u16,
    pub length: u16,
    pub unit_id: u8,
}

impl MbapHeader {
    pub fn new(transaction_id: u16, unit_id: u8, pdu_len: usize) -> Self {
        Self {
            transaction_id,
            protocol_id: 0,
            length: (pdu_len + 1) as u16,
            unit_id,
        }
    }

    pub fn parse(bytes: &[u8; MBAP_LEN]) -> Self {
        Self {
            transaction_id: u16::from_be_bytes([bytes[0], bytes[1]]),
            protocol_id: u16::from_be_bytes([bytes[2], bytes[3]]),
            length: u16::from_be_bytes([bytes[4], bytes[5]]),
            unit_id: bytes[6],
        }
    }

    pub fn encode(&self) -> [u8; MBAP_LEN] {
        let tid = self.transaction_id.to_be_bytes();
        let pid = self.protocol_id.to_be_bytes();
        let len = self.length.to_be_bytes();
        [tid[0], tid[1], pid[0], pid[1], len[0], len[1], self.unit_id]
    }

    /// Number of PDU bytes that follow the header.
    pub fn pdu_len(&self) -> Result<usize, ReadError> {
        if self.protocol_id != 0 {
            return Err(ReadError::Malformed(format!(
                "protocol id {} is not Modbus",
                self.protocol_id
            )));
        }
        let len = self.length as usize;
        if len < 2 || len - 1 > MAX_PDU_LEN {
            return Err(ReadError::Malformed(format!("MBAP length {} out of range", len)));
        }
        Ok(len - 1)
    }
}

/// Client request: read `count` coils starting at `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadCoilsRequest {
    pub transaction_id: u16,
    pub unit_id: u8,
    pub start: u16,
    pub count: u16,
}

impl ReadCoilsRequest {
    pub fn encode(&self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(MBAP_LEN + 5);
        frame.extend_from_slice(&MbapHeader::new(self.transaction_id, self.unit_id, 5).encode());
        frame.push(READ_COILS);
        frame.extend_from_slice(&self.start.to_be_bytes());
        frame.extend_from_slice(&self.count.to_be_bytes());
        frame
    }
}

/// What a device sees after decoding one request PDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceRequest {
    ReadCoils { start: u16, count: u16 },
    Unsupported { function: u8 },
}

impl DeviceRequest {
    pub fn decode(pdu: &[u8]) -> Result<Self, ReadError> {
        let (&function, body) = pdu
            .split_first()
            .ok_or_else(|| ReadError::Malformed("empty request PDU".to_string()))?;

        if function != READ_COILS {
            return Ok(DeviceRequest::Unsupported { function });
        }
        if body.len() != 4 {
            return Err(ReadError::Malformed(format!(
                "read coils request body is {} bytes",
                body.len()
            )));
        }
        Ok(DeviceRequest::ReadCoils {
            start: u16::from_be_bytes([body[0], body[1]]),
            count: u16::from_be_bytes([body[2], body[3]]),
        })
    }
}

/// Decode a read-coils response PDU into exactly `count` booleans.
pub fn decode_read_coils_response(pdu: &[u8], count: u16) -> Result<Vec<bool>, ReadError> {
    let (&function, body) = pdu
        .split_first()
        .ok_or_else(|| ReadError::Malformed("empty response PDU".to_string()))?;

    if function == READ_COILS | EXCEPTION_FLAG {
        let code = body
            .first()
            .copied()
            .ok_or_else(|| ReadError::Malformed("exception frame without code".to_string()))?;
        return Err(ReadError::Exception {
            function: READ_COILS,
            code: ExceptionCode::from(code),
        });
    }
    if function != READ_COILS {
        return Err(ReadError::Malformed(format!(
            "unexpected function code {:#04x}",
            function
        )));
    }

    let (&byte_count, bits) = body
        .split_first()
        .ok_or_else(|| ReadError::Malformed("missing byte count".to_string()))?;
    let expected = coil_bytes(count);
    if byte_count as usize != expected || bits.len() != expected {
        return Err(ReadError::Malformed(format!(
            "expected {} coil bytes for {} coils, got count {} with {} bytes",
            expected,
            count,
            byte_count,
            bits.len()
        )));
    }

    Ok(unpack_bits(bits, count as usize))
}

pub fn encode_read_coils_response(transaction_id: u16, unit_id: u8, coils: &[bool]) -> Vec<u8> {
    let packed = pack_bits(coils);
    let pdu_len = 2 + packed.len();

    let mut frame = Vec::with_capacity(MBAP_LEN + pdu_len);
    frame.extend_from_slice(&MbapHeader::new(transaction_id, unit_id, pdu_len).encode());
    frame.push(READ_COILS);
    frame.push(packed.len() as u8);
    frame.extend_from_slice(&packed);
    frame
}

pub fn encode_exception(transaction_id: u16, unit_id: u8, function: u8, code: ExceptionCode) -> Vec<u8> {
    let mut frame = Vec::with_capacity(MBAP_LEN + 2);
    frame.extend_from_slice(&MbapHeader::new(transaction_id, unit_id, 2).encode());
    frame.push(function | EXCEPTION_FLAG);
    frame.push(code.into());
    frame
}

fn coil_bytes(count: u16) -> usize {
    (count as usize).div_ceil(8)
}

/// Device-side answer to one request against a coil table starting at 0.
pub fn device_reply(header: &MbapHeader, pdu: &[u8], coils: &[bool]) -> Vec<u8> {
    let tid = header.transaction_id;
    let unit = header.unit_id;

    match DeviceRequest::decode(pdu) {
        Ok(DeviceRequest::ReadCoils { start, count }) => {
            if count == 0 || count > MAX_READ_COILS {
                return encode_exception(tid, unit, READ_COILS, ExceptionCode::IllegalDataValue);
            }
            let end = start as usize + count as usize;
            match coils.get(start as usize..end) {
                Some(slice) => encode_read_coils_response(tid, unit, slice),
                None => encode_exception(tid, unit, READ_COILS, ExceptionCode::IllegalDataAddress),
            }
        }
        Ok(DeviceRequest::Unsupported { function }) => {
            log_warn!("Unsupported function {:#04x}", function);
            encode_exception(tid, unit, function, ExceptionCode::IllegalFunction)
        }
        Err(e) => {
            log_warn!("Malformed request: {}", e);
            encode_exception(tid, unit, READ_COILS, ExceptionCode::IllegalDataValue)
        }
    }
}

/// Coils are packed LSB first: coil `start` is bit 0 of the first byte.
fn pack_bits(coils: &[bool]) -> Vec<u8> {
    let mut bytes = vec![0u8; coils.len().div_ceil(8)];
    for (i, &on) in coils.iter().enumerate() {
        if on {
            bytes[i / 8] |= 1 << (i % 8);
        }
    }
    bytes
}

fn unpack_bits(bytes: &[u8], count: usize) -> Vec<bool> {
    (0..count).map(|i| bytes[i / 8] & (1 << (i % 8)) != 0).collect()
}
