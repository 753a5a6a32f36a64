pub(crate) mod command;
pub(crate) mod listen;
pub(crate) mod scan;
pub(crate) mod status;
pub(crate) mod ui;

pub use self::command::{Args, Command, FakeArgs, LogLevel, OutputFormat};
pub use self::listen::ListenArgs;
pub use self::status::StoppedArgs;
