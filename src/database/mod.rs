pub mod probe;
pub mod statements;

pub use probe::{ConnectTarget, DatabaseProbe, DbFailure, DbHandle, MySqlProbe, ProbeResult};
