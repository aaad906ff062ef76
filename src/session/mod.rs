pub mod manager;
pub mod naming;
pub mod registry;
pub mod sink;
pub mod types;


pub use manager::*;
pub use naming::*;
pub use registry::*;
pub use sink::*;
pub use types::*;
