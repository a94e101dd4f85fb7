//! Library half of the demonstration binary, split out so the documented
//! scenarios are reachable both from `main` and from the integration test
//! suite in `tests/`.

pub mod device;
pub mod scenarios;
