pub mod factory;
pub mod local;
pub mod remote;

pub use factory::{create_brain, default_index_dir};
pub use local::LocalBrain;
pub use remote::RemoteBrain;
