//! # Core Models Module
//!
//! Plain data describing what is simulated and how it is acquired.
//!
//! - [`atom`] - A single atom record and the element symbol table
//! - [`sample`] - The specimen: atoms, bounding boxes, and a spatial range query
//! - [`scan`] - Acquisition poses and the scan builder
//! - [`microscope`] - Beam, lens, and detector parameters
//!
//! ```ignore
//! use phantasm::core::models::{atom::AtomRecord, sample::Sample};
//!
//! let sample = Sample::new(vec![AtomRecord::new(6, Point3::new(1.0, 2.0, 3.0))]);
//! let window = sample.select_atoms_in_rect(&Rect::new([0.0, 0.0], [10.0, 10.0]));
//! ```

pub mod atom;
pub mod microscope;
pub mod sample;
pub mod scan;
