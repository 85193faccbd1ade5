//! Demo traffic simulator
//!
//! A headless grid world implementing the engine's simulator interface, so
//! the binary and tests can run the engine without an external simulator.

mod junction;
mod network;
mod vehicle;
mod world;

pub use junction::{Junction, SIGNAL_HOLD_SECS, SIGNAL_RELEASE_SECS};
pub use network::{JunctionId, Road, RoadId, RoadNetwork};
pub use vehicle::{
    parse_vehicle_label, vehicle_label, DemoVehicle, SpeedCapHold, VehicleUpdate, CAP_HOLD_SECS,
    MIN_GAP, STOP_LINE,
};
pub use world::{speed_range, DemoSettings, DemoStats, GridSimulator, SPAWN_CLEARANCE};
