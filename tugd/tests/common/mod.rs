pub mod fixtures;
pub mod logging;

pub use fixtures::Fleet;
pub use logging::init_test_logging;
