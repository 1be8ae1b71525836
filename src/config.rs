use crate::error::{RelayError, Result};

/// Server runtime parameters, validated before any socket is opened.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port the server listens on.
    pub port: u16,
    /// Maximum number of jobs that may wait in the queue at once.
    pub buffer_size: usize,
    /// Fixed number of worker units executing jobs.
    pub thread_pool_size: usize,
}

impl ServerConfig {
    /// Build a config, rejecting non-positive sizes.
    pub fn new(port: u16, buffer_size: i64, thread_pool_size: i64) -> Result<Self> {
        if buffer_size <= 0 {
            return Err(RelayError::Config(
                "buffer size must be a positive integer".to_string(),
            ));
        }
        if thread_pool_size <= 0 {
            return Err(RelayError::Config(
                "thread pool size must be a positive integer".to_string(),
            ));
        }
        Ok(Self {
            port,
            buffer_size: buffer_size as usize,
            thread_pool_size: thread_pool_size as usize,
        })
    }
}
