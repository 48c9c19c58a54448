//! Errors raised outside the Vulkan wrappers.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Surface setup that happens before the RHI takes over.
    #[error("Vulkan: {0}")]
    Vulkan(String),

    #[error("Window: {0}")]
    Window(String),

    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),

    /// Unparseable TOML or an out-of-range value.
    #[error("Invalid config: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
