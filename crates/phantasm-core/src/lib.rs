//! # Phantasm Core Library
//!
//! A frame-parallel pipeline for generating synthetic cryo-electron-microscopy datasets. Each
//! frame of an acquisition scan is turned into a self-contained simulation job, handed to a
//! simulation engine, and written into a pre-allocated output volume.
//!
//! ## Architectural Philosophy
//!
//! The library follows a three-layer architecture:
//!
//! - **[`core`]: The Foundation.** Stateless data models (`Sample`, `Scan`, `Microscope`),
//!   geometric helpers, and I/O for sample and volume files.
//!
//! - **[`engine`]: The Logic Core.** Field-of-view selection, z-slicing, the per-frame job
//!   strategies, the engine capability traits, result sinks, and the dispatcher that runs jobs
//!   sequentially or across a worker pool.
//!
//! - **[`workflows`]: The Public API.** Validates a fully-resolved set of inputs and drives a
//!   complete exit-wave or projected-potential simulation run.

pub mod core;
pub mod engine;
pub mod workflows;
