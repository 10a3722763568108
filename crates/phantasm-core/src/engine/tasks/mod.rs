//! Frame tasks: the per-frame simulation strategies run by the dispatcher.
//!
//! Both tasks share the selection and input preparation in [`crate::engine::frame`]. They
//! differ in which engine operation they call and in what they return: [`ExitWaveTask`]
//! produces a cropped, optionally noisy image, while [`ProjectedPotentialTask`] streams slab
//! potentials into a [`crate::engine::sink::PotentialSink`] and returns no image.

pub mod exit_wave;
pub mod projected_potential;

pub use exit_wave::ExitWaveTask;
pub use projected_potential::ProjectedPotentialTask;
