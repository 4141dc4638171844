//! Integration test driver for `tests/integration/` submodule.
//!
//! Each `mod` below maps to a file that exercises the running controller
//! against in-memory pins and simulated probes.  All tests run on the host
//! with no real hardware required.

mod controller_tests;
mod mock_hw;
