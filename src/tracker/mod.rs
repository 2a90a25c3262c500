pub mod butterworth;
pub mod lerp;
pub mod person;
pub mod smooth;
pub mod zero_phase;

pub use butterworth::Butterworth;
pub use lerp::Sample;
pub use person::{AssignedPerson, Assignment, PersonId, PersonTracker, TrackedPerson};
pub use smooth::{Axis, Filtered, SignalFilter};
pub use zero_phase::smooth_series;
