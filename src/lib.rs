//! A bridge serving Shelly Pro 3EM readings as a SunSpec meter over Modbus TCP.
//!
//! Fronius inverters read an external grid meter through a fixed SunSpec
//! register layout. This crate polls the Shelly HTTP API, derives the meter
//! quantities the layout needs and keeps a shared register image up to date
//! for a Modbus TCP server to answer from.
//!
//! ## Building blocks
//!
//! - [`register_store::RegisterStore`]: the lock-protected register image,
//!   written by one poller and read by every Modbus connection.
//! - [`register_map::RegisterMap`]: which quantity lands at which offset and
//!   how it is encoded. Model 213 (float) and model 203 (integer with scale
//!   factors) are built in.
//! - [`telemetry`]: the raw snapshot and the derived quantities (averages,
//!   line-to-line voltages, reactive power, signed power factor).
//! - [`poller::Poller`]: the fetch/derive/encode/write cycle with failure
//!   counting.
//! - `shelly::ShellyClient` (feature `shelly`) and `server` (feature
//!   `server`) connect both ends.
//!
//! ## Energy counters on Fronius firmware
//!
//! Model 213 declares the energy totals as 32 bit accumulators, yet the
//! inverter firmware decodes them as IEEE-754 float32. The built-in model 213
//! map therefore encodes them as float32, see
//! [`register_map::RegisterMap::set_energy_encoding`] to change that.
//!
//! ## Quick Start
//!
//! ```no_run
//! use shelly_fronius_lib::{
//!     poller::Poller,
//!     register_map::{Identity, MeterModel},
//!     register_store::RegisterStore,
//!     shelly::ShellyClient,
//! };
//! use std::{sync::Arc, time::Duration};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let map = MeterModel::Float213.register_map();
//!     let store = Arc::new(RegisterStore::new(40000, map.required_len()));
//!     store.apply(&map.header_image(40000, &Identity::default())?);
//!
//!     let meter = ShellyClient::new("http://192.168.1.100", 0, Duration::from_secs(2))?;
//!     tokio::spawn(Poller::new(meter, store.clone(), map).run());
//!
//!     shelly_fronius_lib::server::serve("0.0.0.0:502".parse()?, store).await?;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod poller;
pub mod protocol;
pub mod register_map;
pub mod register_store;

#[cfg_attr(docsrs, doc(cfg(feature = "server")))]
#[cfg(feature = "server")]
pub mod server;

#[cfg_attr(docsrs, doc(cfg(feature = "shelly")))]
#[cfg(feature = "shelly")]
pub mod shelly;

pub mod telemetry;

pub use error::{Error, Result};
