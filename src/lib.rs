//! Host-side driver for Fluke NetDAQ networked data-acquisition
//! instruments (2640A/2645A family): 20 analog inputs, 10 computed
//! channels, digital I/O, alarms and a totalizer behind a framed TCP
//! request/response protocol.
//!
//! ```no_run
//! use netdaq::config::{AnalogChannel, Configuration, VdcRange};
//! use netdaq::NetDaq;
//!
//! # fn main() -> Result<(), netdaq::Error> {
//! let daq = NetDaq::new("192.168.1.50", netdaq::protocol::DEFAULT_PORT);
//! daq.connect()?;
//! daq.ping()?;
//!
//! daq.set_config(&Configuration {
//!     analog_channels: vec![AnalogChannel::vdc(VdcRange::Volts3, Default::default())?],
//!     ..Default::default()
//! })?;
//! daq.start()?;
//!
//! let batch = daq.get_readings()?;
//! for reading in &batch.readings {
//!     println!("{} {:?}", reading.time, reading.values);
//! }
//! daq.close()?;
//! # Ok(())
//! # }
//! ```

mod client;
pub use client::NetDaq;

pub mod config;
pub mod equation;
pub mod error;
pub mod protocol;
pub mod readings;

pub use config::Configuration;
pub use equation::compiler::compile as compile_equation;
pub use equation::Equation;
pub use error::{ConfigError, Error, ProtocolError};
pub use readings::{Reading, ReadingBatch};
