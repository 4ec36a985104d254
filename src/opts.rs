//! Connection options.

use std::sync::Arc;

use no_panic::no_panic;
use url::Url;

use crate::buffer_pool::{BufferPool, DEFAULT_BUFFER_SIZE, GLOBAL_BUFFER_POOL};
use crate::error::Error;

const DEDICATED_POOL_CAPACITY: usize = 16;

/// Connection options for PostgreSQL.
#[derive(Debug, Clone)]
pub struct Opts {
    /// Hostname or IP address.
    ///
    /// Default: `""`
    pub host: String,

    /// Port number for the PostgreSQL server.
    ///
    /// Default: `5432`
    pub port: u16,

    /// Unix socket path.
    ///
    /// Default: `None`
    pub socket: Option<String>,

    /// Username for authentication.
    ///
    /// Default: `""`
    pub user: String,

    /// Database name to use.
    ///
    /// Default: `None`
    pub database: Option<String>,

    /// Password for authentication.
    ///
    /// Default: `None`
    pub password: Option<String>,

    /// Application name to report to the server.
    ///
    /// Default: `None`
    pub application_name: Option<String>,

    /// Additional startup parameters.
    ///
    /// Default: `[]`
    pub params: Vec<(String, String)>,

    /// Size of each pooled output buffer.
    ///
    /// Default: `8192`
    pub buffer_size: usize,

    /// Initial size of the read buffer. It grows to fit larger frames.
    ///
    /// Default: `8192`
    pub read_buffer_size: usize,

    /// Pool for output buffers. `None` uses the process-wide pool, or a
    /// dedicated one when `buffer_size` differs from its buffer size.
    ///
    /// Default: `None`
    pub buffer_pool: Option<Arc<BufferPool>>,
}

impl Default for Opts {
    #[no_panic]
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 5432,
            socket: None,
            user: String::new(),
            database: None,
            password: None,
            application_name: None,
            params: Vec::new(),
            buffer_size: DEFAULT_BUFFER_SIZE,
            read_buffer_size: DEFAULT_BUFFER_SIZE,
            buffer_pool: None,
        }
    }
}

impl Opts {
    /// The buffer pool a connection built from these options writes through.
    pub fn pool(&self) -> Arc<BufferPool> {
        match &self.buffer_pool {
            Some(pool) => Arc::clone(pool),
            None if self.buffer_size == GLOBAL_BUFFER_POOL.buffer_size() => {
                Arc::clone(&GLOBAL_BUFFER_POOL)
            }
            None => Arc::new(BufferPool::new(DEDICATED_POOL_CAPACITY, self.buffer_size)),
        }
    }

    /// Parameters for the StartupMessage, in the order they are sent.
    pub fn startup_params(&self) -> Vec<(String, String)> {
        let mut params = vec![("user".to_string(), self.user.clone())];
        if let Some(database) = &self.database {
            params.push(("database".to_string(), database.clone()));
        }
        if let Some(application_name) = &self.application_name {
            params.push(("application_name".to_string(), application_name.clone()));
        }
        params.push(("client_encoding".to_string(), "UTF8".to_string()));
        for (name, value) in &self.params {
            if !params.iter().any(|(n, _)| n == name) {
                params.push((name.clone(), value.clone()));
            }
        }
        params
    }
}

fn parse_size(key: &str, value: &str) -> Result<usize, Error> {
    match value.parse::<usize>() {
        Ok(size) if size > 0 => Ok(size),
        _ => Err(Error::InvalidUsage(format!(
            "Invalid {}: expected a positive integer, got {}",
            key, value
        ))),
    }
}

impl TryFrom<&Url> for Opts {
    type Error = Error;

    /// Parse a PostgreSQL connection URL.
    ///
    /// Format: `postgres://[user[:password]@]host[:port][/database][?param1=value1&param2=value2&..]`
    ///
    /// Supported query parameters:
    /// - `application_name`: application name
    /// - `buffer_size`: pooled output buffer size (positive integer)
    /// - `read_buffer_size`: initial read buffer size (positive integer)
    ///
    /// Anything else is sent to the server as a startup parameter.
    fn try_from(url: &Url) -> Result<Self, Self::Error> {
        if !["postgres", "pg"].contains(&url.scheme()) {
            return Err(Error::InvalidUsage(format!(
                "Invalid scheme: expected 'postgres://' or 'pg://', got '{}://'",
                url.scheme()
            )));
        }

        let mut opts = Opts {
            host: url.host_str().unwrap_or("localhost").to_string(),
            port: url.port().unwrap_or(5432),
            user: url.username().to_string(),
            password: url.password().map(|s| s.to_string()),
            database: url
                .path()
                .strip_prefix('/')
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            ..Opts::default()
        };

        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "application_name" => {
                    opts.application_name = Some(value.to_string());
                }
                "buffer_size" => opts.buffer_size = parse_size(&key, &value)?,
                "read_buffer_size" => opts.read_buffer_size = parse_size(&key, &value)?,
                _ => {
                    opts.params.push((key.to_string(), value.to_string()));
                }
            }
        }

        Ok(opts)
    }
}

impl TryFrom<&str> for Opts {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        let url = Url::parse(s).map_err(|e| Error::InvalidUsage(format!("Invalid URL: {}", e)))?;
        Self::try_from(&url)
    }
}
