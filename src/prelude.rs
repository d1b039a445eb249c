pub use std::io::Write;
pub use std::sync::Arc;

pub use anyhow::{anyhow, bail, Result};
pub use log::{debug, error, info, trace, warn};
pub use tokio::sync::broadcast;

pub use crate::config::Config;
pub use crate::options::Options;
pub use crate::utils::Utils;
