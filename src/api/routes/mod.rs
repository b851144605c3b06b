pub mod health;
pub mod probes;
pub mod snapshot;
pub mod windows;
