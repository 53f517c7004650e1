//! Infrastructure layer - external adapters (local database, remote store,
//! network reachability, config file).
//!
//! This layer handles all I/O operations and external dependencies.

pub mod config;
pub mod connectivity;
pub mod local_store;
pub mod remote;

pub use config::{ensure_config_exists, load_config, save_config};
pub use connectivity::{ConnectivityOracle, ManualOracle, ProbeOracle};
pub use local_store::{LocalStore, MirrorWrite};
pub use remote::{RemoteDelta, RemoteStore, RestRemote};
