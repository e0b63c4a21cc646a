pub mod config;
pub mod deploy;
pub mod external;
pub mod gtfs;
pub mod provision;
