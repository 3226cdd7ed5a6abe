pub mod frame;
pub mod keyboard;
pub mod raster;
pub mod spill;
