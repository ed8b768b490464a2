pub mod route_stops;
pub mod routes;
pub mod stops;

pub use route_stops::*;
pub use routes::*;
pub use stops::*;
