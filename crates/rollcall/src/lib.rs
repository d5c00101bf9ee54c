//! Rollcall: attendance server for unattended edge cameras.
//!
//! Devices hold a WebSocket session open for directives and submit frames over
//! HTTP. Each frame runs through the [`pipeline::Pipeline`]: decode on the
//! event path, match on the bounded [`pool::WorkerPool`], cooldown-guarded
//! commit through the [`ledger::AttendanceLedger`], then an indicator
//! directive back to the device via the [`dispatch::Dispatcher`].

pub mod decode;
pub mod dispatch;
pub mod encoder;
pub mod gallery;
pub mod ledger;
pub mod matcher;
pub mod pipeline;
pub mod pool;
pub mod registry;
pub mod session;
pub mod telemetry;
pub mod web;

pub use dispatch::{DispatchError, Dispatcher};
pub use pipeline::{AttendanceOutcome, Directive, Frame, FramePayload, Pipeline, PipelineError};
pub use pool::{PoolError, WorkerPool};
pub use registry::{DeviceChannel, DeviceRegistry, SessionId};
pub use web::{router, AppState};
