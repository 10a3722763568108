//! # Workflows Module
//!
//! High-level entry points that run a complete simulation.
//!
//! ## Overview
//!
//! A workflow takes fully resolved inputs (microscope, sample, scan, run parameters, execution
//! mode and device), validates them before any frame runs, resolves the compute device against
//! the engine, and drives the dispatcher until every frame has been written or the run aborts.
//!
//! - **Simulation Workflow** ([`simulate`]) - Exit-wave image stacks and per-frame projected
//!   potentials, plus a generic entry point for custom frame tasks.

pub mod simulate;
