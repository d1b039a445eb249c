use bytes::{BufMut, BytesMut};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{Error, Result};
use crate::eversolar::SYNC;

/// CRC-16/XMODEM over sync + header + payload.
pub fn checksum(data: &[u8]) -> u16 {
    crc16::State::<crc16::XMODEM>::calculate(data)
}

/// One response frame. Requests are built straight to bytes and never pass
/// through this.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    pub command: u8,
    pub payload: Vec<u8>,
}

/// Build a request frame: `AA 55 <cmd> 00 <len> <payload> <crc BE>`.
pub fn build_request(command: u8, payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() > u8::MAX as usize {
        return Err(Error::PayloadTooLarge(payload.len()));
    }

    let mut frame = BytesMut::with_capacity(5 + payload.len() + 2);
    frame.put_slice(&SYNC);
    frame.put_u8(command);
    frame.put_u8(0x00);
    frame.put_u8(payload.len() as u8);
    frame.put_slice(payload);
    let crc = checksum(&frame);
    frame.put_u16(crc);

    Ok(frame.to_vec())
}

/// Read exactly `buf.len()` bytes within the timeout window.
async fn read_exact<S>(stream: &mut S, buf: &mut [u8], timeout: Duration) -> Result<()>
where
    S: AsyncRead + Unpin,
{
    match tokio::time::timeout(timeout, stream.read_exact(buf)).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(Error::ConnectionClosed),
        Ok(Err(e)) => Err(Error::Io(e)),
        Err(_) => Err(Error::Timeout),
    }
}

/// Read one response frame.
///
/// The length byte in the header covers the payload only. The PMU's response
/// checksum trailer is only read (and checked) when `verify_crc` is set;
/// responses are otherwise accepted on sync + length alone.
pub async fn read_frame<S>(stream: &mut S, timeout: Duration, verify_crc: bool) -> Result<Frame>
where
    S: AsyncRead + Unpin,
{
    let mut header = [0u8; 5];
    read_exact(stream, &mut header, timeout).await?;

    if header[..2] != SYNC {
        return Err(Error::BadSync(header[0], header[1]));
    }

    let command = header[2];
    let mut payload = vec![0u8; header[4] as usize];
    if !payload.is_empty() {
        read_exact(stream, &mut payload, timeout).await?;
    }

    if verify_crc {
        let mut trailer = [0u8; 2];
        read_exact(stream, &mut trailer, timeout).await?;

        let mut covered = header.to_vec();
        covered.extend_from_slice(&payload);
        let calculated = checksum(&covered);
        let expected = u16::from_be_bytes(trailer);
        if expected != calculated {
            return Err(Error::CrcMismatch {
                expected,
                calculated,
            });
        }
    }

    Ok(Frame { command, payload })
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(1);

    #[test]
    fn checksum_matches_xmodem_vectors() {
        assert_eq!(checksum(b"123456789"), 0x31C3);
        assert_eq!(checksum(b""), 0x0000);
        assert_eq!(checksum(b"A"), 0x58E5);
    }

    #[test]
    fn build_request_layout() {
        let frame = build_request(0x11, &[0x00]).unwrap();

        assert_eq!(&frame[..5], &[0xAA, 0x55, 0x11, 0x00, 0x01]);
        assert_eq!(frame[5], 0x00);
        assert_eq!(&frame[6..], &checksum(&frame[..6]).to_be_bytes());
    }

    #[test]
    fn build_request_empty_payload() {
        let frame = build_request(0x73, &[]).unwrap();

        assert_eq!(frame.len(), 7);
        assert_eq!(frame[4], 0x00);
        assert_eq!(&frame[5..], &checksum(&frame[..5]).to_be_bytes());
    }

    #[test]
    fn build_request_payload_size_limit() {
        let frame = build_request(0x01, &[0u8; 255]).unwrap();
        assert_eq!(frame.len(), 5 + 255 + 2);
        assert_eq!(frame[4], 255);

        match build_request(0x01, &[0u8; 256]) {
            Err(Error::PayloadTooLarge(256)) => {}
            other => panic!("expected PayloadTooLarge, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn read_frame_round_trips_a_request() {
        let payload = b"ABCDEF1234567890";
        let bytes = build_request(0x13, payload).unwrap();

        let mut input: &[u8] = &bytes;
        let frame = read_frame(&mut input, TIMEOUT, true).await.unwrap();

        assert_eq!(frame.command, 0x13);
        assert_eq!(frame.payload, payload);
    }

    #[tokio::test]
    async fn read_frame_accepts_empty_payload() {
        let bytes = build_request(0x74, &[]).unwrap();

        let mut input: &[u8] = &bytes;
        let frame = read_frame(&mut input, TIMEOUT, true).await.unwrap();

        assert_eq!(frame.command, 0x74);
        assert!(frame.payload.is_empty());
    }

    #[tokio::test]
    async fn read_frame_rejects_bad_sync() {
        let mut bytes = build_request(0x11, &[0x00]).unwrap();
        bytes[0] = 0x55;

        let mut input: &[u8] = &bytes;
        match read_frame(&mut input, TIMEOUT, false).await {
            Err(Error::BadSync(0x55, 0x55)) => {}
            other => panic!("expected BadSync, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn read_frame_rejects_corrupt_crc() {
        let mut bytes = build_request(0x11, &[0x00]).unwrap();
        let at = bytes.len() - 1;
        bytes[at] ^= 0xFF;

        let mut input: &[u8] = &bytes;
        match read_frame(&mut input, TIMEOUT, true).await {
            Err(Error::CrcMismatch { .. }) => {}
            other => panic!("expected CrcMismatch, got {:?}", other),
        }

        // the same frame passes when verification is off
        let mut input: &[u8] = &bytes[..bytes.len() - 2];
        assert!(read_frame(&mut input, TIMEOUT, false).await.is_ok());
    }

    #[tokio::test]
    async fn read_frame_reports_truncation_as_closed() {
        let bytes = build_request(0x11, &[0x00]).unwrap();

        let mut input: &[u8] = &bytes[..3];
        match read_frame(&mut input, TIMEOUT, false).await {
            Err(Error::ConnectionClosed) => {}
            other => panic!("expected ConnectionClosed, got {:?}", other),
        }
    }
}
