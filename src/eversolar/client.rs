use std::sync::Mutex;

use chrono::Utc;
use log::{debug, info, warn};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::config;
use crate::error::{Error, Result};
use crate::eversolar::codec;
use crate::eversolar::frame::{self, Frame};
use crate::eversolar::reading::{decode_reading, Reading};
use crate::eversolar::{
    CMD_IDENTITY, CMD_INIT, CMD_KEEPALIVE, CMD_VALUES, IDENTITY_COMPAT, IDENTITY_FULL,
};
use crate::utils::Utils;

/// Identity discovered during a poll. The id and code list are assumed
/// stable for a given unit, but every poll rediscovers them anyway; this is
/// kept for diagnostics only.
#[derive(Clone, Debug, PartialEq)]
pub struct Identity {
    pub inverter_id: String,
    pub codes: Vec<u8>,
}

/// Client for one PMU.
///
/// Each poll or time-sync owns a fresh socket for its whole duration and
/// drops it on every exit path. Exchanges are strictly sequential: one
/// request, then a blocking read for its response.
pub struct Pmu {
    config: config::Pmu,
    identity: Mutex<Option<Identity>>,
}

impl Pmu {
    pub fn new(config: config::Pmu) -> Self {
        Self {
            config,
            identity: Mutex::new(None),
        }
    }

    pub fn host(&self) -> &str {
        self.config.host()
    }

    /// Identity seen by the most recent poll that got far enough to read it.
    pub fn identity(&self) -> Option<Identity> {
        self.identity.lock().ok().and_then(|cached| cached.clone())
    }

    /// Run the full poll sequence once and return the decoded reading.
    ///
    /// Any exchange failure aborts the remaining sequence and surfaces as a
    /// single `PollFailed` carrying the cause; no partial reading escapes.
    pub async fn poll(&self) -> Result<Reading> {
        let mut stream = self
            .connect()
            .await
            .map_err(|cause| Error::PollFailed(Box::new(cause)))?;

        self.poll_session(&mut stream)
            .await
            .map_err(|cause| Error::PollFailed(Box::new(cause)))
    }

    /// Push the host clock to the PMU: connect, one init exchange, done.
    /// Failure is routine for periodic callers; log it and carry on.
    pub async fn sync_time(&self) -> Result<()> {
        let mut stream = self.connect().await?;
        self.init(&mut stream).await?;
        Ok(())
    }

    /// Probe reachability with the same single init exchange.
    pub async fn test_connection(&self) -> Result<()> {
        self.sync_time().await
    }

    async fn connect(&self) -> Result<TcpStream> {
        let address = (self.config.host().to_owned(), self.config.port());
        debug!(
            "connecting to PMU at {}:{}",
            self.config.host(),
            self.config.port()
        );

        let stream =
            match tokio::time::timeout(self.config.timeout(), TcpStream::connect(address)).await {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => return Err(Error::Io(e)),
                Err(_) => return Err(Error::Timeout),
            };

        if let Err(e) = stream.set_nodelay(true) {
            warn!("failed to set TCP_NODELAY: {}", e);
        }

        Ok(stream)
    }

    /// Init exchange: push the configured-timezone wall clock. The response
    /// is an ack; nothing in it is decoded.
    async fn init<S>(&self, stream: &mut S) -> Result<Frame>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let now = Utc::now().with_timezone(&self.config.timezone());
        let payload = codec::encode_time_payload(&now)?;
        self.exchange(stream, CMD_INIT, &payload).await
    }

    /// The fixed six-exchange poll sequence. No step may be skipped or
    /// reordered; the keepalives and the compatibility identity query keep
    /// the device-side session alive.
    async fn poll_session<S>(&self, stream: &mut S) -> Result<Reading>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        self.init(stream).await?;

        let response = self.exchange(stream, CMD_IDENTITY, &[IDENTITY_FULL]).await?;
        let inverter_id = codec::decode_inverter_id(&response.payload)?;
        let codes = codec::decode_code_list(&response.payload)?;
        debug!(
            "{}: inverter {} reports {} telemetry codes",
            self.config.host(),
            inverter_id,
            codes.len()
        );
        if let Ok(mut cached) = self.identity.lock() {
            *cached = Some(Identity {
                inverter_id: inverter_id.clone(),
                codes: codes.clone(),
            });
        }

        self.exchange(stream, CMD_KEEPALIVE, &[]).await?;
        self.exchange(stream, CMD_IDENTITY, &[IDENTITY_COMPAT]).await?;
        self.exchange(stream, CMD_KEEPALIVE, &[]).await?;

        let response = self
            .exchange(stream, CMD_VALUES, inverter_id.as_bytes())
            .await?;
        let host_time = Utils::utc();

        let device_epoch = codec::decode_device_epoch(&response.payload);
        let raw = codec::decode_value_table(&response.payload, &codes)?;

        let reading = decode_reading(&inverter_id, raw, device_epoch, host_time);
        info!(
            "{}: polled inverter {} ({} values)",
            self.config.host(),
            inverter_id,
            reading.raw.len()
        );
        Ok(reading)
    }

    /// One request/response exchange: send a framed request, block on the
    /// reply until the configured timeout.
    async fn exchange<S>(&self, stream: &mut S, command: u8, payload: &[u8]) -> Result<Frame>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let timeout = self.config.timeout();
        let request = frame::build_request(command, payload)?;

        match tokio::time::timeout(timeout, stream.write_all(&request)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(Error::Io(e)),
            Err(_) => return Err(Error::Timeout),
        }

        frame::read_frame(stream, timeout, self.config.strict_crc()).await
    }
}
