// src/util/io/register_client.rs
//! Field-bus client - one TCP session to the PLC, coil reads only

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::config::FieldBusConfig;
use crate::error::{ConnError, ReadError};
use crate::trigger::Snapshot;
use crate::util::io::modbus::{
    decode_read_coils_response, MbapHeader, ReadCoilsRequest, MAX_READ_COILS, MBAP_LEN,
};
use crate::util::io::ConnectionState;
use crate::{log_debug, log_info, log_warn};

/// Owns the socket to the field device. Only the poll loop holds one.
pub struct RegisterClient {
    config: FieldBusConfig,
    stream: Option<TcpStream>,
    state: ConnectionState,
    next_transaction: u16,
    /// Points read by the connect handshake.
    handshake_count: u16,
}

impl RegisterClient {
    pub fn new(config: FieldBusConfig, handshake_count: u16) -> Self {
        Self {
            config,
            stream: None,
            state: ConnectionState::Disconnected,
            next_transaction: 0,
            handshake_count: handshake_count.max(1),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Consecutive failed reads since the last good one.
    pub fn failure_streak(&self) -> u32 {
        self.state.failure_streak()
    }

    /// Opens a fresh session and proves it with one verification read.
    pub async fn connect(&mut self) -> Result<(), ConnError> {
        self.close();

        let addr = self.config.addr();
        let connect_timeout = self.config.connect_timeout();

        let stream = match timeout(connect_timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(ConnError::Unreachable {
                    addr,
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                return Err(ConnError::Unreachable {
                    addr,
                    reason: format!("connect timed out after {:?}", connect_timeout),
                })
            }
        };
        let _ = stream.set_nodelay(true);
        self.stream = Some(stream);

        let unit_id = self.config.unit_id;
        let count = self.handshake_count;
        match self.timed_exchange(0, count, unit_id).await {
            Ok(_) => {
                self.state = ConnectionState::Connected;
                log_info!("Field-bus session open to {} (unit {})", addr, unit_id);
                Ok(())
            }
            Err(e) => {
                self.close();
                Err(match e {
                    ReadError::Exception { .. } | ReadError::Malformed(_) => {
                        ConnError::Protocol(e.to_string())
                    }
                    ReadError::Timeout(_) | ReadError::Io(_) | ReadError::NotConnected => {
                        ConnError::Unreachable {
                            addr,
                            reason: e.to_string(),
                        }
                    }
                })
            }
        }
    }

    /// Reads `count` coils starting at `start`. Every failure bumps the streak.
    pub async fn read_points(
        &mut self,
        start: u16,
        count: u16,
        unit_id: u8,
    ) -> Result<Snapshot, ReadError> {
        if self.stream.is_none() {
            return Err(ReadError::NotConnected);
        }

        match self.timed_exchange(start, count, unit_id).await {
            Ok(points) => {
                self.state = ConnectionState::Connected;
                Ok(Snapshot::new(points))
            }
            Err(e) => {
                let streak = self.state.failure_streak().saturating_add(1);
                self.state = ConnectionState::Degraded(streak);
                log_debug!("Coil read failed (streak {}): {}", streak, e);
                Err(e)
            }
        }
    }

    pub fn close(&mut self) {
        if self.stream.take().is_some() {
            log_info!("Field-bus session to {} closed", self.config.addr());
        }
        self.state = ConnectionState::Disconnected;
    }

    async fn timed_exchange(
        &mut self,
        start: u16,
        count: u16,
        unit_id: u8,
    ) -> Result<Vec<bool>, ReadError> {
        let read_timeout = self.config.read_timeout();
        match timeout(read_timeout, self.exchange(start, count, unit_id)).await {
            Ok(result) => result,
            Err(_) => Err(ReadError::Timeout(read_timeout)),
        }
    }

    async fn exchange(
        &mut self,
        start: u16,
        count: u16,
        unit_id: u8,
    ) -> Result<Vec<bool>, ReadError> {
        if count == 0 || count > MAX_READ_COILS {
            return Err(ReadError::Malformed(format!(
                "coil count {} outside 1..={}",
                count, MAX_READ_COILS
            )));
        }

        self.next_transaction = self.next_transaction.wrapping_add(1);
        let transaction_id = self.next_transaction;
        let stream = self.stream.as_mut().ok_or(ReadError::NotConnected)?;

        let request = ReadCoilsRequest {
            transaction_id,
            unit_id,
            start,
            count,
        };
        stream.write_all(&request.encode()).await?;

        loop {
            let mut header = [0u8; MBAP_LEN];
            stream.read_exact(&mut header).await?;
            let header = MbapHeader::parse(&header);

            let mut pdu = vec![0u8; header.pdu_len()?];
            stream.read_exact(&mut pdu).await?;

            // Late reply to a request that already timed out
            if header.transaction_id != transaction_id {
                log_warn!(
                    "Skipping stale response (transaction {}, waiting for {})",
                    header.transaction_id,
                    transaction_id
                );
                continue;
            }

            return decode_read_coils_response(&pdu, count);
        }
    }
}
