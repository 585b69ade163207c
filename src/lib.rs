//! RGM: samples NVIDIA GPU telemetry once a second, keeps a two-minute
//! rolling history per device and renders it with egui.
//!
//! The [`monitor::Sampler`] owns the connection to the driver and all
//! published state; the [`poller::Poller`] drives it on a fixed cadence;
//! [`app::RgmApp`] reads a [`data::TelemetryView`] once per frame.

pub mod app;
pub mod config;
pub mod data;
pub mod history;
pub mod metric;
pub mod monitor;
pub mod nvml;
pub mod poller;
pub mod process;
pub mod source;
