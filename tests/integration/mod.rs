//! Integration tests for the gridbake template builder

mod build_scenarios;
mod config_loading;
mod step_cleanup;
mod test_utils;
