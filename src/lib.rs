pub mod config;
pub mod output;
pub mod sink;
pub mod supervisor;

pub use config::Args;
pub use output::{OutData, OutputBuffer};
pub use sink::LogSink;
pub use supervisor::run;
