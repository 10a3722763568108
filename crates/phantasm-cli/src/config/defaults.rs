pub const PIXEL_SIZE: f64 = 1.0;
pub const SCAN_AXIS: [f64; 3] = [0.0, 1.0, 0.0];
pub const EXPOSURE_TIME: f64 = 1.0;

pub const MARGIN: usize = 100;
pub const SLICE_THICKNESS: f64 = 3.0;
pub const NUM_SLICES: usize = 1;

/// One worker per available core, as reported by the OS.
pub fn max_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
