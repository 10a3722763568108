//! # I/O Module
//!
//! Readers and writers for the files a simulation run touches.
//!
//! - [`atoms`] - Sample atoms in CSV form (`element,x,y,z[,sigma,occupancy]`)
//! - [`mrc`] - Float32 MRC image stacks, written section by section

pub mod atoms;
pub mod mrc;
