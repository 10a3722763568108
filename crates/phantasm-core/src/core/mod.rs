//! # Core Module
//!
//! Stateless building blocks shared by the simulation engine.
//!
//! - **Models** ([`models`]) - Atoms, samples with a spatial index, scans and poses, and the
//!   virtual microscope description
//! - **Geometry** ([`geometry`]) - Rectangles, bounding boxes, and rotation helpers
//! - **File I/O** ([`io`]) - CSV sample files and MRC output volumes

pub mod geometry;
pub mod io;
pub mod models;
