// Library exports for dropspot
// This allows integration tests and external code to use dropspot modules

pub mod config;
pub mod db;
pub mod decision;
pub mod drops;
pub mod error;
pub mod geo;
pub mod geofence;
pub mod inventory;
pub mod moderation;
pub mod notify;
pub mod routes;
pub mod state;
pub mod sync;
pub mod username;
pub mod users;
