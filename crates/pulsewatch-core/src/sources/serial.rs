//! Line-oriented serial transport.
//!
//! The ingestion loop never touches `serialport` directly. It reads through
//! [`LineTransport`], and the controller opens ports through
//! [`TransportOpener`], so tests can substitute scripted fakes.

use std::io::{self, BufRead, BufReader};
use std::time::Duration;

use serialport::{DataBits, Parity, SerialPort, StopBits};

use crate::source::PortDescriptor;

/// A byte stream delivering newline-terminated text records.
pub trait LineTransport: Send {
    /// Read one line without its terminator.
    ///
    /// `Ok(None)` means nothing complete arrived before the read timeout.
    /// [`io::ErrorKind::InvalidData`] means one record was dropped and the
    /// link is still usable. Any other `Err` means the link is unusable until
    /// [`reopen`](Self::reopen).
    fn read_line(&mut self) -> io::Result<Option<String>>;

    /// Close and open the underlying port again.
    fn reopen(&mut self) -> io::Result<()>;

    fn descriptor(&self) -> &PortDescriptor;
}

/// Enumerates and opens transports.
pub trait TransportOpener: Send + Sync {
    /// Names of the real ports currently present on the host.
    fn available_ports(&self) -> Vec<String>;

    /// Open `port` with 8 data bits, no parity, one stop bit.
    fn open(&self, port: &PortDescriptor, timeout: Duration) -> io::Result<Box<dyn LineTransport>>;
}

// ---------------------------------------------------------------------------
// Line assembly
// ---------------------------------------------------------------------------

/// Longest record carried while waiting for its newline.
pub const MAX_LINE_BYTES: usize = 4096;

fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

/// Splits a byte stream into lines, keeping partial lines across read
/// timeouts.
#[derive(Debug, Default)]
pub struct LineReader {
    pending: Vec<u8>,
    /// Skipping the rest of a line that outgrew [`MAX_LINE_BYTES`].
    discarding: bool,
}

impl LineReader {
    /// Pull bytes from `reader` until a full line is available.
    ///
    /// Returns `Ok(None)` on a read timeout. A line longer than
    /// [`MAX_LINE_BYTES`] is reported once as `InvalidData`, and everything
    /// up to its newline is skipped. End of stream is `UnexpectedEof`.
    pub fn read_from<R: BufRead + ?Sized>(&mut self, reader: &mut R) -> io::Result<Option<String>> {
        loop {
            let chunk = match reader.fill_buf() {
                Ok(chunk) => chunk,
                Err(e) if is_timeout(&e) => return Ok(None),
                Err(e) => return Err(e),
            };
            if chunk.is_empty() {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "port closed by peer",
                ));
            }
            let newline = chunk.iter().position(|&b| b == b'\n');
            let take = newline.map_or(chunk.len(), |i| i + 1);
            if !self.discarding {
                self.pending.extend_from_slice(&chunk[..take]);
            }
            reader.consume(take);

            match (newline.is_some(), self.discarding) {
                (true, true) => self.discarding = false,
                // Bounded work per call while skipping.
                (false, true) => return Ok(None),
                (true, false) => {
                    let line = self.take_line();
                    if line.len() > MAX_LINE_BYTES {
                        return Err(overlong());
                    }
                    return Ok(Some(line));
                }
                (false, false) if self.pending.len() > MAX_LINE_BYTES => {
                    self.pending.clear();
                    self.discarding = true;
                    return Err(overlong());
                }
                (false, false) => {}
            }
        }
    }

    fn take_line(&mut self) -> String {
        let bytes = std::mem::take(&mut self.pending);
        String::from_utf8_lossy(&bytes)
            .trim_end_matches(['\r', '\n'])
            .to_string()
    }
}

fn overlong() -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("record longer than {MAX_LINE_BYTES} bytes"),
    )
}

// ---------------------------------------------------------------------------
// serialport-backed implementation
// ---------------------------------------------------------------------------

/// Opens host serial ports.
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialOpener;

impl TransportOpener for SerialOpener {
    fn available_ports(&self) -> Vec<String> {
        match serialport::available_ports() {
            Ok(ports) => ports.into_iter().map(|p| p.port_name).collect(),
            Err(e) => {
                log::warn!("serial port enumeration failed: {e}");
                Vec::new()
            }
        }
    }

    fn open(&self, port: &PortDescriptor, timeout: Duration) -> io::Result<Box<dyn LineTransport>> {
        let transport = SerialTransport::open(port.clone(), timeout)?;
        Ok(Box::new(transport))
    }
}

fn open_port(port: &PortDescriptor, timeout: Duration) -> io::Result<Box<dyn SerialPort>> {
    let handle = serialport::new(&port.name, port.baudrate)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .timeout(timeout)
        .open()?;
    Ok(handle)
}

/// A host serial port read line by line.
pub struct SerialTransport {
    descriptor: PortDescriptor,
    timeout: Duration,
    reader: Option<BufReader<Box<dyn SerialPort>>>,
    lines: LineReader,
}

impl SerialTransport {
    pub fn open(descriptor: PortDescriptor, timeout: Duration) -> io::Result<Self> {
        let port = open_port(&descriptor, timeout)?;
        log::info!("opened serial port {descriptor}");
        Ok(Self {
            descriptor,
            timeout,
            reader: Some(BufReader::new(port)),
            lines: LineReader::default(),
        })
    }
}

impl LineTransport for SerialTransport {
    fn read_line(&mut self) -> io::Result<Option<String>> {
        let Some(reader) = self.reader.as_mut() else {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "port is closed"));
        };
        match self.lines.read_from(reader) {
            Err(e) if e.kind() != io::ErrorKind::InvalidData => {
                self.reader = None;
                Err(e)
            }
            other => other,
        }
    }

    fn reopen(&mut self) -> io::Result<()> {
        self.reader = None;
        self.lines = LineReader::default();
        let port = open_port(&self.descriptor, self.timeout)?;
        log::info!("reopened serial port {}", self.descriptor);
        self.reader = Some(BufReader::new(port));
        Ok(())
    }

    fn descriptor(&self) -> &PortDescriptor {
        &self.descriptor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io::Read;

    /// Hands out one chunk per read, then times out.
    struct Chunks(VecDeque<Vec<u8>>);

    impl Chunks {
        fn reader(parts: Vec<Vec<u8>>) -> BufReader<Self> {
            BufReader::new(Self(parts.into()))
        }
    }

    impl Read for Chunks {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let Some(front) = self.0.front_mut() else {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
            };
            let n = front.len().min(buf.len());
            buf[..n].copy_from_slice(&front[..n]);
            front.drain(..n);
            if front.is_empty() {
                self.0.pop_front();
            }
            Ok(n)
        }
    }

    // -----------------------------------------------------------------------
    // LineReader
    // -----------------------------------------------------------------------

    #[test]
    fn partial_line_survives_a_timeout() {
        let mut reader = Chunks::reader(vec![b"1,2".to_vec(), b",3\n4,5,6\r\n".to_vec()]);
        let mut lines = LineReader::default();
        assert_eq!(lines.read_from(&mut reader).unwrap(), None);
        assert_eq!(lines.read_from(&mut reader).unwrap().as_deref(), Some("1,2,3"));
        assert_eq!(lines.read_from(&mut reader).unwrap().as_deref(), Some("4,5,6"));
        assert_eq!(lines.read_from(&mut reader).unwrap(), None);
    }

    #[test]
    fn unterminated_flood_is_capped_and_its_tail_skipped() {
        let mut reader = Chunks::reader(vec![
            vec![b'9'; MAX_LINE_BYTES + 100],
            vec![b'9'; MAX_LINE_BYTES],
            b"1,2,3\n7,8,9\n".to_vec(),
        ]);
        let mut lines = LineReader::default();

        let err = lines.read_from(&mut reader).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(lines.pending.len() <= MAX_LINE_BYTES);

        // Still inside the overlong line: nothing is kept.
        assert_eq!(lines.read_from(&mut reader).unwrap(), None);
        assert!(lines.pending.is_empty());

        // "1,2,3" closes the overlong line and is dropped with it.
        assert_eq!(lines.read_from(&mut reader).unwrap().as_deref(), Some("7,8,9"));
    }

    #[test]
    fn overlong_terminated_line_is_dropped() {
        let mut flood = vec![b'1'; MAX_LINE_BYTES + 1];
        flood.extend_from_slice(b"\n4,5,6\n");
        let mut reader = Chunks::reader(vec![flood]);
        let mut lines = LineReader::default();

        let err = lines.read_from(&mut reader).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert_eq!(lines.read_from(&mut reader).unwrap().as_deref(), Some("4,5,6"));
    }

    #[test]
    fn end_of_stream_is_an_error() {
        let mut reader = io::Cursor::new(Vec::<u8>::new());
        let err = LineReader::default().read_from(&mut reader).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    // -----------------------------------------------------------------------
    // SerialOpener
    // -----------------------------------------------------------------------

    #[test]
    fn opening_missing_port_fails() {
        let port = PortDescriptor::new("/dev/pulsewatch-does-not-exist", 115_200);
        assert!(SerialOpener.open(&port, Duration::from_millis(10)).is_err());
    }

    #[test]
    fn enumeration_never_panics() {
        let _ = SerialOpener.available_ports();
    }
}
