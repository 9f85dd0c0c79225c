pub mod device;
pub mod submission;

pub use device::Device;
pub use submission::{GpsLocation, MapProjection, Submission};
