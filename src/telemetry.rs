//! DataVis telemetry: a fixed binary frame per publish tick, streamed to at
//! most one TCP client.
//!
//! Wire format (little-endian), preceded by a single length byte:
//!
//! ```text
//! "FBEGIN" | mode u8 | night u8 | step u64 | tnow_us u64 | tstart_us u64 |
//! B f32x3 | Bdot f32x3 | omega f32x3 | sun f32x3 | "FEND"
//! ```

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

use crate::error::{AcsError, AcsResult};
use crate::estimator::Estimate;

pub const DEFAULT_PORT: u16 = 12376;
pub const FRAME_START: &[u8; 6] = b"FBEGIN";
pub const FRAME_END: &[u8; 4] = b"FEND";
pub const FRAME_LEN: usize = 6 + 1 + 1 + 3 * 8 + 12 * 4 + 4;
/// Publish rate of the DataVis stream.
pub const PUBLISH_PERIOD: Duration = Duration::from_millis(100);

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TelemetryFrame {
    pub mode: u8,
    pub night: bool,
    pub step: u64,
    pub tnow_us: u64,
    pub tstart_us: u64,
    pub field: [f32; 3],
    pub field_rate: [f32; 3],
    pub omega: [f32; 3],
    pub sun: [f32; 3],
}

impl TelemetryFrame {
    pub fn from_estimate(estimate: &Estimate, tnow_us: u64, tstart_us: u64) -> Self {
        let narrow = |v: &nalgebra::Vector3<f64>| [v.x as f32, v.y as f32, v.z as f32];
        Self {
            mode: estimate.mode.as_u8(),
            night: estimate.night,
            step: estimate.cycle,
            tnow_us,
            tstart_us,
            field: narrow(&estimate.field),
            field_rate: narrow(&estimate.field_rate),
            omega: estimate.omega.into(),
            sun: estimate.sun.into(),
        }
    }

    pub fn encode(&self) -> [u8; FRAME_LEN] {
        let mut buf = [0u8; FRAME_LEN];
        let mut pos = 0;
        let mut put = |bytes: &[u8]| {
            buf[pos..pos + bytes.len()].copy_from_slice(bytes);
            pos += bytes.len();
        };
        put(FRAME_START);
        put(&[self.mode, u8::from(self.night)]);
        put(&self.step.to_le_bytes());
        put(&self.tnow_us.to_le_bytes());
        put(&self.tstart_us.to_le_bytes());
        for v in [&self.field, &self.field_rate, &self.omega, &self.sun] {
            for c in v {
                put(&c.to_le_bytes());
            }
        }
        put(FRAME_END);
        buf
    }

    /// Length byte followed by the frame.
    pub fn encode_wire(&self) -> Vec<u8> {
        let mut wire = Vec::with_capacity(FRAME_LEN + 1);
        wire.push(FRAME_LEN as u8);
        wire.extend_from_slice(&self.encode());
        wire
    }

    pub fn decode(bytes: &[u8]) -> AcsResult<Self> {
        if bytes.len() != FRAME_LEN {
            return Err(AcsError::BadFrame(format!(
                "expected {} bytes, got {}",
                FRAME_LEN,
                bytes.len()
            )));
        }
        if &bytes[..6] != FRAME_START {
            return Err(AcsError::BadFrame("missing FBEGIN marker".to_string()));
        }
        if &bytes[FRAME_LEN - 4..] != FRAME_END {
            return Err(AcsError::BadFrame("missing FEND marker".to_string()));
        }

        let mut reader = FieldReader {
            bytes,
            pos: FRAME_START.len(),
        };
        let mode = reader.u8();
        let night = match reader.u8() {
            0 => false,
            1 => true,
            other => {
                return Err(AcsError::BadFrame(format!("night byte {} not 0 or 1", other)))
            }
        };
        Ok(Self {
            mode,
            night,
            step: reader.u64(),
            tnow_us: reader.u64(),
            tstart_us: reader.u64(),
            field: reader.vec3(),
            field_rate: reader.vec3(),
            omega: reader.vec3(),
            sun: reader.vec3(),
        })
    }
}

/// Cursor over a frame already checked for length.
struct FieldReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl FieldReader<'_> {
    fn take<const K: usize>(&mut self) -> [u8; K] {
        let mut out = [0u8; K];
        out.copy_from_slice(&self.bytes[self.pos..self.pos + K]);
        self.pos += K;
        out
    }

    fn u8(&mut self) -> u8 {
        self.take::<1>()[0]
    }

    fn u64(&mut self) -> u64 {
        u64::from_le_bytes(self.take())
    }

    fn vec3(&mut self) -> [f32; 3] {
        [
            f32::from_le_bytes(self.take()),
            f32::from_le_bytes(self.take()),
            f32::from_le_bytes(self.take()),
        ]
    }
}

/// Read one length-prefixed frame, as a DataVis client would.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> AcsResult<TelemetryFrame> {
    let len = reader.read_u8().await? as usize;
    if len != FRAME_LEN {
        return Err(AcsError::BadFrame(format!("length prefix {}", len)));
    }
    let mut buf = [0u8; FRAME_LEN];
    reader.read_exact(&mut buf).await?;
    TelemetryFrame::decode(&buf)
}

/// Write one encoded frame, giving up after `limit`. A client that stops
/// reading fills the socket buffer and would otherwise stall the publisher.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    wire: &[u8],
    limit: Duration,
) -> AcsResult<()> {
    match tokio::time::timeout(limit, writer.write_all(wire)).await {
        Ok(written) => Ok(written?),
        Err(_) => Err(AcsError::Io(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            format!("write stalled for {:?}", limit),
        ))),
    }
}

pub fn now_micros() -> u64 {
    Utc::now().timestamp_micros().max(0) as u64
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PublishStats {
    pub sent: u64,
    pub dropped: u64,
    pub clients: u64,
}

pub struct TelemetryServer {
    listener: TcpListener,
    period: Duration,
    tstart_us: u64,
    connected: Arc<AtomicBool>,
}

impl TelemetryServer {
    pub async fn bind(addr: SocketAddr) -> AcsResult<Self> {
        let listener = TcpListener::bind(addr).await?;
        log::info!("[DATAVIS] Listening on {}", listener.local_addr()?);
        Ok(Self {
            listener,
            period: PUBLISH_PERIOD,
            tstart_us: now_micros(),
            connected: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    pub fn local_addr(&self) -> AcsResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Shared flag, true while a client is attached.
    pub fn connected_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.connected)
    }

    /// Publish the latest estimate every period until `shutdown` flips to
    /// true. A new connection replaces the current client. A write that
    /// fails or takes longer than one period drops the client and the frame.
    pub async fn run(
        self,
        estimates: watch::Receiver<Estimate>,
        mut shutdown: watch::Receiver<bool>,
    ) -> AcsResult<PublishStats> {
        let mut client: Option<(TcpStream, SocketAddr)> = None;
        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut stats = PublishStats::default();

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            if let Some((_, old)) = client.as_ref() {
                                log::info!("[DATAVIS] Client {} replaced by {}", old, peer);
                            } else {
                                log::info!("[DATAVIS] Client connected: {}", peer);
                            }
                            let _ = stream.set_nodelay(true);
                            client = Some((stream, peer));
                            stats.clients += 1;
                            self.connected.store(true, Ordering::Relaxed);
                        }
                        Err(e) => log::warn!("[DATAVIS] Accept failed: {}", e),
                    }
                }
                _ = ticker.tick() => {
                    let Some((stream, peer)) = client.as_mut() else {
                        stats.dropped += 1;
                        continue;
                    };
                    let estimate = *estimates.borrow();
                    let frame = TelemetryFrame::from_estimate(&estimate, now_micros(), self.tstart_us);
                    match write_frame(stream, &frame.encode_wire(), self.period).await {
                        Ok(()) => stats.sent += 1,
                        Err(e) => {
                            log::warn!("[DATAVIS] Client {} dropped: {}", peer, e);
                            stats.dropped += 1;
                            client = None;
                            self.connected.store(false, Ordering::Relaxed);
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.connected.store(false, Ordering::Relaxed);
        log::info!(
            "[DATAVIS] Stopped: {} frames sent, {} dropped, {} clients",
            stats.sent,
            stats.dropped,
            stats.clients
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode::AcsMode;
    use crate::types::{Vec3d, Vec3f};

    fn sample_frame() -> TelemetryFrame {
        TelemetryFrame {
            mode: 0,
            night: true,
            step: 1234,
            tnow_us: 1_700_000_000_000_000,
            tstart_us: 1_699_999_999_000_000,
            field: [31.5, -12.25, 0.125],
            field_rate: [1.0, 2.0, 3.0],
            omega: [0.0, 0.0, 1.0],
            sun: [0.6, 0.0, 0.8],
        }
    }

    #[test]
    fn test_frame_length() {
        assert_eq!(FRAME_LEN, 84);
        assert_eq!(sample_frame().encode().len(), 84);
        assert_eq!(sample_frame().encode_wire()[0], 84);
    }

    #[test]
    fn test_frame_layout() {
        let bytes = sample_frame().encode();
        assert_eq!(&bytes[..6], b"FBEGIN");
        assert_eq!(bytes[6], 0);
        assert_eq!(bytes[7], 1);
        assert_eq!(&bytes[8..16], &1234u64.to_le_bytes());
        assert_eq!(&bytes[32..36], &31.5f32.to_le_bytes());
        assert_eq!(&bytes[76..80], &0.8f32.to_le_bytes());
        assert_eq!(&bytes[80..], b"FEND");
    }

    #[test]
    fn test_decode_recovers_frame() {
        let frame = sample_frame();
        assert_eq!(TelemetryFrame::decode(&frame.encode()).unwrap(), frame);
    }

    #[test]
    fn test_decode_rejects_bad_frames() {
        let good = sample_frame().encode();
        assert!(matches!(
            TelemetryFrame::decode(&good[..80]),
            Err(AcsError::BadFrame(_))
        ));

        let mut bad_start = good;
        bad_start[0] = b'X';
        assert!(matches!(
            TelemetryFrame::decode(&bad_start),
            Err(AcsError::BadFrame(_))
        ));

        let mut bad_end = good;
        bad_end[83] = b'X';
        assert!(TelemetryFrame::decode(&bad_end).is_err());

        let mut bad_night = good;
        bad_night[7] = 9;
        assert!(TelemetryFrame::decode(&bad_night).is_err());
    }

    #[test]
    fn test_from_estimate_narrows_field() {
        let estimate = Estimate {
            cycle: 7,
            field: Vec3d::new(1.5, 2.5, -3.5),
            omega: Vec3f::new(0.1, 0.2, 0.3),
            mode: AcsMode::SunPointing,
            ..Estimate::default()
        };
        let frame = TelemetryFrame::from_estimate(&estimate, 10, 5);
        assert_eq!(frame.step, 7);
        assert_eq!(frame.mode, 1);
        assert_eq!(frame.field, [1.5, 2.5, -3.5]);
        assert_eq!(frame.omega, [0.1, 0.2, 0.3]);
        assert_eq!((frame.tnow_us, frame.tstart_us), (10, 5));
    }

    #[tokio::test]
    async fn test_read_frame_rejects_wrong_prefix() {
        let mut wire = sample_frame().encode_wire();
        wire[0] = 83;
        let mut reader: &[u8] = &wire;
        assert!(matches!(
            read_frame(&mut reader).await,
            Err(AcsError::BadFrame(_))
        ));

        let wire = sample_frame().encode_wire();
        let mut reader: &[u8] = &wire;
        assert_eq!(read_frame(&mut reader).await.unwrap(), sample_frame());
    }

    #[tokio::test]
    async fn test_write_frame_times_out_on_stalled_reader() {
        let (mut writer, _reader) = tokio::io::duplex(8);
        let wire = sample_frame().encode_wire();
        let err = write_frame(&mut writer, &wire, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, AcsError::Io(e) if e.kind() == std::io::ErrorKind::TimedOut));
    }

    #[tokio::test]
    async fn test_write_frame_delivers_to_reader() {
        let (mut writer, mut reader) = tokio::io::duplex(256);
        let wire = sample_frame().encode_wire();
        write_frame(&mut writer, &wire, Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(read_frame(&mut reader).await.unwrap(), sample_frame());
    }
}
