//! Data source implementations: the serial-backed live source and the
//! built-in simulator.

pub mod live;
pub mod serial;
pub mod simulated;

pub use live::{LiveFields, LiveSource, parse_record};
pub use serial::{
    LineReader, LineTransport, MAX_LINE_BYTES, SerialOpener, SerialTransport, TransportOpener,
};
pub use simulated::SimulatedSource;
