pub mod session;
pub mod test_type;

pub use session::{RomReport, RomSession, RomState};
pub use test_type::TestType;
