//! kernel-p2p End-to-End Test Suite
//!
//! Runs several nodes in one process, connected over loopback TCP, with a
//! recording handle standing in for the kernel on every node.
//!
//! Each test file can be run independently:
//!
//! ```bash
//! cargo test -p kernel-p2p-e2e-tests --test handshake -- --nocapture
//! cargo test -p kernel-p2p-e2e-tests --test cosi_round -- --nocapture
//! cargo test -p kernel-p2p-e2e-tests --test relay_mesh -- --nocapture
//! cargo test -p kernel-p2p-e2e-tests --test teardown -- --nocapture
//! cargo test -p kernel-p2p-e2e-tests --test backpressure -- --nocapture
//! ```

pub mod helpers;
