pub mod decode;
pub mod spectral;
