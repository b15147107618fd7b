//! Command implementations.

mod fmt;
mod parse;
mod sessions;
mod watch;

pub use fmt::FmtCommand;
pub use parse::ParseCommand;
pub use sessions::SessionsCommand;
pub use watch::WatchCommand;
