//! Session transport and the typed instrument facade.
//!
//! A session owns one TCP connection. A background reader thread
//! demultiplexes response frames into per-request completions by sequence
//! id, so any number of commands can be in flight at once; callers block on
//! a rendezvous channel until their response arrives.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::{Local, NaiveDateTime};
use crossbeam_channel::{bounded, Receiver, Sender};
use nom::number::complete::{be_f32, be_u32};
use parking_lot::Mutex;

use crate::config::{Configuration, MAX_ANALOG_CHANNELS, MAX_COMPUTED_CHANNELS};
use crate::error::Error;
use crate::protocol::{self, parse, serialize, Command, FrameHeader, Serializer, HEADER_LEN};
use crate::readings::ReadingBatch;

const INITIAL_SEQUENCE_ID: u32 = 2;
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(10);
const DEFAULT_MAX_READINGS: u32 = 0xFF;

/// Acquisition-running bit of the `STATUS_QUERY` word.
const STATUS_BUSY: u32 = 0x8000_0000;

type Completion = Sender<Result<Vec<u8>, Error>>;
type Pending = Arc<Mutex<HashMap<u32, Completion>>>;

struct Session {
    writer: TcpStream,
    reader: Option<JoinHandle<()>>,
    closing: Arc<AtomicBool>,
}

/// A driver handle for one instrument.
///
/// All operations take `&self`; a handle can be shared across threads and
/// commands from different threads interleave on the wire.
pub struct NetDaq {
    host: String,
    port: u16,
    sequence_id: AtomicU32,
    session: Mutex<Option<Session>>,
    pending: Pending,
}

impl NetDaq {
    /// Create a disconnected handle. See [protocol::DEFAULT_PORT] for the
    /// port instruments normally listen on.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            sequence_id: AtomicU32::new(INITIAL_SEQUENCE_ID),
            session: Mutex::new(None),
            pending: Arc::default(),
        }
    }

    /// Analog input slots on this instrument family.
    pub fn analog_channels(&self) -> usize {
        MAX_ANALOG_CHANNELS
    }

    /// Computed slots on this instrument family.
    pub fn computed_channels(&self) -> usize {
        MAX_COMPUTED_CHANNELS
    }

    /// Connect, replacing any previous session, and start the reader.
    pub fn connect(&self) -> Result<(), Error> {
        self.close()?;

        let stream = TcpStream::connect((self.host.as_str(), self.port))?;
        let reader_stream = stream.try_clone()?;
        let closing = Arc::new(AtomicBool::new(false));

        let pending = Arc::clone(&self.pending);
        let reader_closing = Arc::clone(&closing);
        let reader = std::thread::Builder::new()
            .name("netdaq-reader".into())
            .spawn(move || reader_loop(reader_stream, pending, reader_closing))?;

        *self.session.lock() = Some(Session {
            writer: stream,
            reader: Some(reader),
            closing,
        });
        Ok(())
    }

    /// Stop the reader, send the best-effort teardown commands without
    /// waiting for replies, and close the stream.
    pub fn close(&self) -> Result<(), Error> {
        let Some(mut session) = self.session.lock().take() else {
            return Ok(());
        };

        // stop the reader before the teardown writes so their replies are
        // not logged as unsolicited
        session.closing.store(true, Ordering::Release);
        let _ = session.writer.shutdown(Shutdown::Read);
        if let Some(reader) = session.reader.take() {
            let _ = reader.join();
        }

        for command in [
            Command::ClearMonitorChannel,
            Command::Stop,
            Command::DisableSpy,
            Command::Close,
        ] {
            let sequence_id = self.sequence_id.fetch_add(1, Ordering::Relaxed);
            let mut frame = Vec::with_capacity(HEADER_LEN);
            protocol::write_frame(&mut frame, sequence_id, command, &[]);
            if (&session.writer).write_all(&frame).is_err() {
                break;
            }
        }

        let _ = session.writer.shutdown(Shutdown::Both);

        for (_, completion) in self.pending.lock().drain() {
            let _ = completion.send(Err(Error::SessionClosed));
        }
        Ok(())
    }

    /// Allocate a sequence id, register a completion, write the frame, and
    /// block until the response arrives. The teardown commands in
    /// [NetDaq::close] are the only fire-and-forget writes; they bypass the
    /// completion table entirely.
    fn send_rpc(&self, command: Command, payload: &[u8]) -> Result<Vec<u8>, Error> {
        let receiver = self.send_frame(command, payload)?;
        receiver.recv().map_err(|_| Error::SessionClosed)?
    }

    fn send_frame(
        &self,
        command: Command,
        payload: &[u8],
    ) -> Result<Receiver<Result<Vec<u8>, Error>>, Error> {
        // the session lock also serializes writes, so frames hit the wire
        // in issue order
        let session = self.session.lock();
        let session = session.as_ref().ok_or(Error::NotConnected)?;

        let sequence_id = self.sequence_id.fetch_add(1, Ordering::Relaxed);
        let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
        protocol::write_frame(&mut frame, sequence_id, command, payload);

        let (completion, receiver) = bounded(1);
        self.pending.lock().insert(sequence_id, completion);

        let mut writer = &session.writer;
        if let Err(err) = writer.write_all(&frame).and_then(|()| writer.flush()) {
            self.pending.lock().remove(&sequence_id);
            return Err(err.into());
        }

        Ok(receiver)
    }

    /// Liveness check; any successful response counts.
    pub fn ping(&self) -> Result<(), Error> {
        self.send_rpc(Command::Ping, &[]).map(drop)
    }

    pub fn reset_totalizer(&self) -> Result<(), Error> {
        self.send_rpc(Command::ResetTotalizer, &[]).map(drop)
    }

    /// Index of the instrument's first channel (101 on some units).
    pub fn get_base_channel(&self) -> Result<u32, Error> {
        let payload = self.send_rpc(Command::GetBaseChannel, &[])?;
        Ok(parse::expect_response("GET_BASE_CHANNEL", be_u32, &payload)?)
    }

    /// NUL-separated version strings reported by the instrument.
    pub fn get_version_info(&self) -> Result<Vec<Vec<u8>>, Error> {
        self.version_blobs(Command::GetVersionInfo)
    }

    pub fn get_lc_version(&self) -> Result<Vec<Vec<u8>>, Error> {
        self.version_blobs(Command::GetLcVersion)
    }

    fn version_blobs(&self, command: Command) -> Result<Vec<Vec<u8>>, Error> {
        let payload = self.send_rpc(command, &[])?;
        Ok(parse::split_nul_blobs(&payload))
    }

    /// Poll `STATUS_QUERY` until the busy bit clears.
    pub fn wait_for_idle(&self) -> Result<(), Error> {
        loop {
            let payload = self.send_rpc(Command::StatusQuery, &[])?;
            let status = parse::expect_response("STATUS_QUERY", be_u32, &payload)?;
            if status & STATUS_BUSY == 0 {
                return Ok(());
            }
            std::thread::sleep(IDLE_POLL_INTERVAL);
        }
    }

    /// Set the instrument clock; `None` uses the host clock.
    pub fn set_time(&self, time: Option<NaiveDateTime>) -> Result<(), Error> {
        let time = time.unwrap_or_else(|| Local::now().naive_local());
        let mut payload = Vec::with_capacity(12);
        serialize::write_packed_time(&mut payload, &time);
        payload.write_be_u32(serialize::time_millis(&time));
        self.send_rpc(Command::SetTime, &payload)?;
        self.wait_for_idle()
    }

    /// Upload a configuration and wait for the instrument to settle.
    ///
    /// If the instrument rejects a layout with disabled slots before
    /// enabled ones, the error is wrapped with the sequential-channels
    /// advisory.
    pub fn set_config(&self, config: &Configuration) -> Result<(), Error> {
        let encoded = config.encode()?;
        match self.send_rpc(Command::SetConfig, &encoded.payload) {
            Ok(_) => {}
            Err(err @ Error::Instrument { .. }) if encoded.interleaved => {
                return Err(Error::UnsupportedChannelLayout(Box::new(err)));
            }
            Err(err) => return Err(err),
        }
        self.wait_for_idle()
    }

    /// Start acquisition immediately.
    pub fn start(&self) -> Result<(), Error> {
        self.send_rpc(Command::Start, &[0u8; 16]).map(drop)
    }

    /// Start acquisition at a future wall-clock time.
    pub fn start_at(&self, time: NaiveDateTime) -> Result<(), Error> {
        let mut payload = Vec::with_capacity(16);
        serialize::write_packed_time(&mut payload, &time);
        payload.write_be_u32(serialize::time_millis(&time));
        payload.write_be_u32(0);
        self.send_rpc(Command::Start, &payload).map(drop)
    }

    /// Stop acquisition. Idle instruments answer with an error status,
    /// which is swallowed.
    pub fn stop(&self) -> Result<(), Error> {
        match self.send_rpc(Command::Stop, &[]) {
            Ok(_) | Err(Error::Instrument { .. }) => Ok(()),
            Err(err) => Err(err),
        }
    }

    pub fn enable_spy(&self) -> Result<(), Error> {
        self.send_rpc(Command::EnableSpy, &[]).map(drop)
    }

    pub fn disable_spy(&self) -> Result<(), Error> {
        self.send_rpc(Command::DisableSpy, &[]).map(drop)
    }

    /// Read one channel's raw value through the spy diagnostic.
    pub fn query_spy(&self, channel: u32) -> Result<f32, Error> {
        let mut payload = Vec::with_capacity(4);
        payload.write_be_u32(channel);
        let response = self.send_rpc(Command::QuerySpy, &payload)?;
        Ok(parse::expect_response("QUERY_SPY", be_f32, &response)?)
    }

    /// Select the live monitor channel; 0 clears it.
    pub fn set_monitor_channel(&self, channel: u32) -> Result<(), Error> {
        if channel == 0 {
            self.send_rpc(Command::ClearMonitorChannel, &[])
                .map(drop)
        } else {
            let mut payload = Vec::with_capacity(4);
            payload.write_be_u32(channel);
            self.send_rpc(Command::SetMonitorChannel, &payload)
                .map(drop)
        }
    }

    /// Drain up to 255 readings from the instrument queue.
    pub fn get_readings(&self) -> Result<ReadingBatch, Error> {
        self.get_readings_limit(DEFAULT_MAX_READINGS)
    }

    /// Drain up to `max_readings` readings from the instrument queue.
    pub fn get_readings_limit(&self, max_readings: u32) -> Result<ReadingBatch, Error> {
        let mut payload = Vec::with_capacity(4);
        payload.write_be_u32(max_readings);
        let response = self.send_rpc(Command::GetReadings, &payload)?;
        Ok(ReadingBatch::parse(&response, Local::now().naive_local())?)
    }
}

impl Drop for NetDaq {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Demultiplex response frames into registered completions until the
/// stream breaks or the frame layer does. Either way the session dies from
/// inside the reader; anything still pending is failed.
fn reader_loop(mut stream: TcpStream, pending: Pending, closing: Arc<AtomicBool>) {
    loop {
        let mut raw = [0u8; HEADER_LEN];
        if let Err(err) = stream.read_exact(&mut raw) {
            if !closing.load(Ordering::Acquire) {
                log::error!("session read failed: {err}");
            }
            break;
        }

        let header = match FrameHeader::parse(&raw) {
            Ok(header) => header,
            Err(err) => {
                log::error!("invalid response header: {err}");
                break;
            }
        };
        let payload_len = match header.payload_len() {
            Ok(len) => len,
            Err(err) => {
                log::error!("invalid response length: {err}");
                break;
            }
        };

        let mut payload = vec![0u8; payload_len];
        if let Err(err) = stream.read_exact(&mut payload) {
            if !closing.load(Ordering::Acquire) {
                log::error!("session read failed: {err}");
            }
            break;
        }

        let Some(completion) = pending.lock().remove(&header.sequence_id) else {
            log::warn!(
                "unsolicited response for sequence {} (status 0x{:08x}, {} bytes), ignoring",
                header.sequence_id,
                header.status,
                payload.len()
            );
            continue;
        };

        let result = if header.status != 0 {
            Err(Error::Instrument {
                code: header.status,
                payload,
            })
        } else {
            Ok(payload)
        };
        if completion.send(result).is_err() {
            log::debug!(
                "response for sequence {} dropped by cancelled caller",
                header.sequence_id
            );
        }
    }

    // on a reader-side failure the session dies here; during an orderly
    // close() the stream stays open for the teardown writes
    if !closing.load(Ordering::Acquire) {
        let _ = stream.shutdown(Shutdown::Both);
    }
    for (_, completion) in pending.lock().drain() {
        let _ = completion.send(Err(Error::SessionClosed));
    }
}
