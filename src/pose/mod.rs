pub mod keypoint;
pub mod normalize;

pub use keypoint::{Keypoint, Landmark, LandmarkSet, Point};
pub use normalize::{KeypointNormalizer, RawBody};
