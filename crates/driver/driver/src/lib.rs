pub mod cache;
pub mod cmd;
pub mod driver;
pub mod error;
pub mod options;
pub mod script;
pub mod testing;
pub mod value;

pub use cache::LocalCache;
pub use cmd::{Cmd, IntoArg};
pub use driver::{Connector, DedicatedConnection, Driver, Message};
pub use error::DriverError;
pub use options::DriverOptions;
pub use script::Script;
pub use value::{FromValue, ScoredMember, Value};
