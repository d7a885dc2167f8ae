//! Real device source backed by gpsd.
//!
//! gpsd streams JSON reports over TCP once a `?WATCH` command enables them.
//! Only `TPV` (time-position-velocity) reports carry a fix. Each watch runs
//! in its own tokio task and reconnects after the daemon goes away.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::DateTime;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use geoguard_shared::types::now_ms;
use geoguard_shared::{PositionSample, SamplerError};

use crate::sampler::{PositionSource, SamplerEvent, WatchId, WatchOptions};

const WATCH_COMMAND: &[u8] = b"?WATCH={\"enable\":true,\"json\":true}\n";

/// Subset of a gpsd report we care about.
#[derive(Debug, Deserialize)]
struct GpsdReport {
    class: String,
    #[serde(default)]
    mode: u8,
    lat: Option<f64>,
    lon: Option<f64>,
    eph: Option<f64>,
    epx: Option<f64>,
    epy: Option<f64>,
    time: Option<String>,
}

/// Outcome of one line read from gpsd.
#[derive(Debug, PartialEq)]
enum Report {
    Fix(PositionSample),
    NoFix,
    Other,
}

fn parse_report(line: &str) -> Report {
    let report: GpsdReport = match serde_json::from_str(line) {
        Ok(r) => r,
        Err(e) => {
            debug!(error = %e, "ignoring unparsable gpsd line");
            return Report::Other;
        }
    };

    if report.class != "TPV" {
        return Report::Other;
    }

    // mode: 0 unknown, 1 no fix, 2 = 2D, 3 = 3D
    let (Some(lat), Some(lon)) = (report.lat, report.lon) else {
        return Report::NoFix;
    };
    if report.mode < 2 {
        return Report::NoFix;
    }

    let accuracy = report.eph.or(match (report.epx, report.epy) {
        (Some(x), Some(y)) => Some(x.max(y)),
        (x, y) => x.or(y),
    });

    let captured_at_ms = report
        .time
        .as_deref()
        .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
        .map(|t| t.timestamp_millis())
        .unwrap_or_else(now_ms);

    Report::Fix(PositionSample::at(lat, lon, accuracy, captured_at_ms))
}

/// Reader over a gpsd connection. The write half is kept so the daemon does
/// not see a half-closed socket.
struct GpsdStream {
    lines: Lines<BufReader<OwnedReadHalf>>,
    _write: OwnedWriteHalf,
}

impl GpsdStream {
    async fn open(addr: &str) -> std::io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        let (read, mut write) = stream.into_split();
        write.write_all(WATCH_COMMAND).await?;
        Ok(Self {
            lines: BufReader::new(read).lines(),
            _write: write,
        })
    }

    async fn next_line(&mut self) -> std::io::Result<Option<String>> {
        self.lines.next_line().await
    }
}

pub struct GpsdSource {
    addr: String,
    next_id: AtomicU64,
    watches: Mutex<HashMap<WatchId, JoinHandle<()>>>,
}

impl GpsdSource {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            next_id: AtomicU64::new(1),
            watches: Mutex::new(HashMap::new()),
        }
    }
}

impl Drop for GpsdSource {
    fn drop(&mut self) {
        if let Ok(watches) = self.watches.get_mut() {
            for (_, task) in watches.drain() {
                task.abort();
            }
        }
    }
}

async fn watch_loop(
    addr: String,
    options: WatchOptions,
    sink: mpsc::UnboundedSender<SamplerEvent>,
) {
    let mut reachable_once = false;

    while !sink.is_closed() {
        let mut stream = match GpsdStream::open(&addr).await {
            Ok(stream) => {
                reachable_once = true;
                info!(addr = %addr, "connected to gpsd");
                stream
            }
            Err(e) => {
                warn!(addr = %addr, error = %e, "gpsd unreachable");
                let err = if reachable_once {
                    SamplerError::PositionUnavailable
                } else {
                    SamplerError::NotSupported
                };
                if sink.send(SamplerEvent::Error(err)).is_err() {
                    return;
                }
                tokio::time::sleep(options.timeout).await;
                continue;
            }
        };

        // Only reports about the fix itself push the deadline out; SKY,
        // DEVICE and similar chatter do not count.
        let mut deadline = Instant::now() + options.timeout;
        loop {
            let event = match tokio::time::timeout_at(deadline, stream.next_line()).await {
                Err(_) => SamplerEvent::Error(SamplerError::Timeout),
                Ok(Ok(Some(line))) => match parse_report(&line) {
                    Report::Fix(sample) => SamplerEvent::Fix(sample),
                    Report::NoFix => SamplerEvent::Error(SamplerError::PositionUnavailable),
                    Report::Other => continue,
                },
                Ok(Ok(None)) | Ok(Err(_)) => {
                    warn!(addr = %addr, "gpsd connection closed");
                    let _ = sink.send(SamplerEvent::Error(SamplerError::PositionUnavailable));
                    break;
                }
            };
            deadline = Instant::now() + options.timeout;
            if sink.send(event).is_err() {
                return;
            }
        }
    }
}

#[async_trait]
impl PositionSource for GpsdSource {
    fn watch_position(
        &self,
        options: WatchOptions,
        sink: mpsc::UnboundedSender<SamplerEvent>,
    ) -> Result<WatchId, SamplerError> {
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| SamplerError::NotSupported)?;
        let id = WatchId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let task = runtime.spawn(watch_loop(self.addr.clone(), options, sink));

        let mut watches = self.watches.lock().map_err(|_| SamplerError::NotSupported)?;
        watches.insert(id, task);
        Ok(id)
    }

    fn clear_watch(&self, id: WatchId) {
        if let Ok(mut watches) = self.watches.lock() {
            if let Some(task) = watches.remove(&id) {
                task.abort();
            }
        }
    }

    async fn current_position(
        &self,
        options: WatchOptions,
    ) -> Result<PositionSample, SamplerError> {
        let mut stream = GpsdStream::open(&self.addr)
            .await
            .map_err(|_| SamplerError::NotSupported)?;

        let read_fix = async {
            loop {
                match stream.next_line().await {
                    Ok(Some(line)) => {
                        if let Report::Fix(sample) = parse_report(&line) {
                            return Ok(sample);
                        }
                    }
                    _ => return Err(SamplerError::PositionUnavailable),
                }
            }
        };

        tokio::time::timeout(options.timeout, read_fix)
            .await
            .map_err(|_| SamplerError::Timeout)?
    }
}
