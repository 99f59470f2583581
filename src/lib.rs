//! Read live telemetry from LiTime-style MPPT solar charge controllers over Bluetooth Low Energy
//!
//! The controller has a BLE interface with a single characteristic (`0xFFE1` in service
//! `0xFFE0`). Requests are written to it as MODBUS RTU frames and responses come back as
//! notifications, often split over several of them.
//!
//! Every poll interval a fixed read-holding-registers request is sent. The response is
//! reassembled, decoded and each value handed to an optional [`Sinks`] consumer. If the
//! controller stops answering for 10 consecutive polls it is reported offline once.
//!
//! Currently the following data can be accessed:
//!
//! - Battery voltage (V), current (A) and power (W)
//! - Load voltage (V), current (A) and power (W)
//! - Panel voltage (V)
//! - Controller temperature (°C)
//! - Peak power today (W)
//! - Energy produced today and over the lifetime (Wh)
//! - Days running
//!
//! The response CRC is not checked unless [`Config::verify_checksum`] is set.
//!
//! # Example
//!
//! ```rust,no_run
//! # use mpptread::{Config, MpptClient, Poller, Reading, Sinks};
//! #
//! # #[tokio::main(flavor = "current_thread")]
//! # pub async fn main() -> anyhow::Result<()> {
//!     let config = Config::default();
//!     let sinks = Sinks::new().with_all_channels(|reading: Reading| println!("{reading}"));
//!     let poller = Poller::new(&config, sinks);
//!     let client = MpptClient::new(config).await?;
//!     let poller = client.run(poller, tokio::time::sleep(std::time::Duration::from_secs(60))).await;
//!     println!("{:?}", poller.status());
//!     client.stop().await
//! # }
//! ```

mod config;
mod controller_state;
mod frame_assembler;
mod liveness;
mod message;
mod mppt_client;
mod poller;
mod sink;

pub use config::{log_config, Config};
pub use controller_state::{Channel, ControllerState, PackedTemperatures, Reading};
pub use frame_assembler::FrameAssembler;
pub use liveness::{Liveness, LivenessTracker};
pub use message::read_registers::{DecodeError, PAYLOAD_LEN, REQUEST as READ_REGISTERS_REQUEST};
pub use mppt_client::MpptClient;
pub use poller::{Event, LinkState, Poller, RequestWriter};
pub use sink::Sinks;
