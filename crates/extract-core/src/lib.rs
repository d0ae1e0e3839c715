pub mod config;
pub mod connector;
pub mod error;
pub mod history;
pub mod io;
pub mod jobs;
pub mod matching;
pub mod notify;
pub mod paths;
pub mod plugin;
pub mod process;
pub mod remark;
pub mod request;
pub mod schedule;
pub mod state;
pub mod types;
pub mod user;

pub use error::{ExtractError, Result};
