//! # Engine Module
//!
//! The frame pipeline: everything between a loaded sample plus scan and a filled output
//! volume.
//!
//! ## Overview
//!
//! For every frame index the pipeline selects the atoms under the padded detector window
//! ([`fov`]), moves them into the frame pose, optionally partitions them in depth
//! ([`slicer`]) and hands them to a simulation engine ([`backend`]). The engine's raw field is
//! cropped back to the detector and may receive shot noise ([`noise`]) before the
//! [`dispatch`]er stores it in a [`sink`].
//!
//! ## Architecture
//!
//! - **Configuration** ([`config`]) - Run parameters, execution mode and device selection
//! - **Engine boundary** ([`backend`]) - The capability traits an engine implements, plus the
//!   deterministic reference engine in [`projection`]
//! - **Frame jobs** ([`frame`], [`tasks`]) - Per-frame preparation and the exit-wave and
//!   projected-potential strategies
//! - **Dispatch** ([`dispatch`]) - Sequential and pooled execution with run-wide cancellation
//! - **Progress Monitoring** ([`progress`]) - Callback-based progress events
//! - **Error Handling** ([`error`]) - Engine error types and propagation

pub mod backend;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod fov;
pub mod frame;
pub mod noise;
pub mod perturb;
pub mod progress;
pub mod projection;
pub mod sink;
pub mod slicer;
pub mod tasks;

#[cfg(test)]
pub(crate) mod testing;
