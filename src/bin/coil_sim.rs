//! Virtual coil device for bench testing without a PLC.
//!
//! Serves read-coils over Modbus/TCP on 16 coils and walks coils 0-4 through
//! a one-hot sequence followed by all-off, one step every `KIOSK_SIM_STEP_MS`.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;

use coil_kiosk::util::io::modbus::{device_reply, MbapHeader, MBAP_LEN};
use coil_kiosk::{log_error, log_info, log_warn};

const COIL_COUNT: usize = 16;
const SEQUENCE_COILS: usize = 5;

type Coils = Arc<RwLock<Vec<bool>>>;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    tracing_subscriber::fmt::init();
    color_eyre::install()?;

    let bind = std::env::args().nth(1).unwrap_or_else(|| "0.0.0.0:5020".to_string());
    let step = std::env::var("KIOSK_SIM_STEP_MS")
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_secs(5));

    let coils: Coils = Arc::new(RwLock::new(vec![false; COIL_COUNT]));
    let listener = TcpListener::bind(&bind).await?;
    log_info!("Virtual coil device listening on {} ({} coils)", bind, COIL_COUNT);

    tokio::spawn(step_sequence(coils.clone(), step));

    loop {
        let (stream, peer) = listener.accept().await?;
        log_info!("Client connected from {}", peer);
        let coils = coils.clone();
        tokio::spawn(async move {
            if let Err(e) = serve(stream, coils).await {
                log_warn!("Client {} dropped: {}", peer, e);
            }
        });
    }
}

async fn step_sequence(coils: Coils, step: Duration) {
    let mut position = 0usize;
    loop {
        {
            let mut coils = coils.write().await;
            for (index, coil) in coils.iter_mut().take(SEQUENCE_COILS).enumerate() {
                *coil = index == position;
            }
            log_info!("Coils 0-4: {:?}", &coils[..SEQUENCE_COILS]);
        }
        // One extra step with everything off
        position = (position + 1) % (SEQUENCE_COILS + 1);
        tokio::time::sleep(step).await;
    }
}

async fn serve(mut stream: TcpStream, coils: Coils) -> std::io::Result<()> {
    loop {
        let mut header = [0u8; MBAP_LEN];
        match stream.read_exact(&mut header).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e),
        }
        let header = MbapHeader::parse(&header);

        let pdu_len = match header.pdu_len() {
            Ok(len) => len,
            Err(e) => {
                log_error!("Bad request header: {}", e);
                return Ok(());
            }
        };
        let mut pdu = vec![0u8; pdu_len];
        stream.read_exact(&mut pdu).await?;

        let reply = device_reply(&header, &pdu, &coils.read().await);
        stream.write_all(&reply).await?;
    }
}
