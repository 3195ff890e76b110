//! Presence verification for class attendance.
//!
//! A student proves they are in the room with three signals: a rotating
//! HMAC-signed QR token, a GPS geofence, and a device fingerprint reuse check.
//! [`services::check_in::CheckInCoordinator`] combines them into one verdict and
//! records every attempt.

pub mod cache;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod routes;
pub mod state;

pub mod crypto {
    pub mod token;
}

pub mod models {
    pub mod attempt;
    pub mod session;
    pub mod verdict;
}

pub mod repositories {
    pub mod attempts;
    pub mod memory;
}

pub mod services {
    pub mod anomaly;
    pub mod check_in;
    pub mod geofence;
    pub mod tokens;
}

pub mod handlers {
    pub mod attendance;
    pub mod check_in;
    pub mod response;
    pub mod tokens;
}

pub mod middleware_layer {
    pub mod identity;
}

pub mod validation {
    pub mod check_in;
}
