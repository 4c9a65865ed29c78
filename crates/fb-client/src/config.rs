//! Client configuration.

use std::time::Duration;

use bytes::Bytes;
use fb_wire::params::{dpb, spb};
use fb_wire::{ParameterBuffer, ProtocolVersion};

use crate::error::{Error, Result};

/// Timeout configuration for the various phases of a session.
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    /// Time allowed for the TCP connection (default: 15s).
    pub connect_timeout: Duration,
    /// Time to wait for a single response (default: none).
    pub read_timeout: Option<Duration>,
    /// Time to wait for the detach response (default: 5s).
    pub detach_timeout: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(15),
            read_timeout: None,
            detach_timeout: Duration::from_secs(5),
        }
    }
}

impl TimeoutConfig {
    /// Create a new timeout configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the TCP connect timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the network read timeout.
    #[must_use]
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    /// Set the detach timeout.
    #[must_use]
    pub fn detach_timeout(mut self, timeout: Duration) -> Self {
        self.detach_timeout = timeout;
        self
    }
}

/// Configuration for a database or service manager connection.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct Config {
    /// Server hostname or IP address.
    pub host: String,

    /// Server port (default: 3050).
    pub port: u16,

    /// Database path or alias.
    pub database: String,

    /// User name.
    pub user: String,

    /// Password.
    pub password: String,

    /// Connection character set (default: UTF8).
    pub charset: String,

    /// SQL dialect (default: 3).
    pub dialect: u8,

    /// Page size used when creating a database.
    pub page_size: Option<u32>,

    /// Service manager name (default: `service_mgr`).
    pub service_name: String,

    /// Highest protocol version offered (default: 13).
    pub max_protocol: ProtocolVersion,

    /// Host name reported in the user identification.
    pub client_host: String,

    /// Timeouts.
    pub timeouts: TimeoutConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 3050,
            database: String::new(),
            user: "SYSDBA".to_string(),
            password: String::new(),
            charset: "UTF8".to_string(),
            dialect: 3,
            page_size: None,
            service_name: "service_mgr".to_string(),
            max_protocol: ProtocolVersion::V13,
            client_host: "localhost".to_string(),
            timeouts: TimeoutConfig::default(),
        }
    }
}

impl Config {
    /// Create a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a connection string into configuration.
    ///
    /// Keys are case-insensitive and separated by `;`:
    /// `host=localhost;port=3050;database=employee;user=SYSDBA;password=...`.
    /// Recognized keys are `host`, `port`, `database`, `user`, `password`,
    /// `charset`, `dialect`, `connect_timeout` (seconds), `read_timeout`
    /// (seconds), `service` and `protocol` (highest version, 10 to 13).
    pub fn from_connection_string(conn_str: &str) -> Result<Self> {
        let mut config = Self::default();

        for part in conn_str.split(';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }

            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| Error::Config(format!("invalid key-value: {part}")))?;

            let key = key.trim().to_lowercase();
            let value = value.trim();

            match key.as_str() {
                "host" | "server" => {
                    // host/port shorthand
                    if let Some((host, port)) = value.rsplit_once('/') {
                        config.host = host.to_string();
                        config.port = parse_number(port, "port")?;
                    } else {
                        config.host = value.to_string();
                    }
                }
                "port" => config.port = parse_number(value, "port")?,
                "database" | "dbname" => config.database = value.to_string(),
                "user" | "user_name" => config.user = value.to_string(),
                "password" => config.password = value.to_string(),
                "charset" | "encoding" | "lc_ctype" => config.charset = value.to_uppercase(),
                "dialect" | "sql_dialect" => {
                    let dialect: u8 = parse_number(value, "dialect")?;
                    if !(1..=3).contains(&dialect) {
                        return Err(Error::Config(format!("invalid dialect: {value}")));
                    }
                    config.dialect = dialect;
                }
                "connect_timeout" => {
                    config.timeouts.connect_timeout = Duration::from_secs(parse_number(value, "timeout")?);
                }
                "read_timeout" | "so_timeout" => {
                    config.timeouts.read_timeout = Some(Duration::from_secs(parse_number(value, "timeout")?));
                }
                "service" | "service_name" => config.service_name = value.to_string(),
                "protocol" => {
                    config.max_protocol = match value {
                        "10" => ProtocolVersion::V10,
                        "11" => ProtocolVersion::V11,
                        "12" => ProtocolVersion::V12,
                        "13" => ProtocolVersion::V13,
                        _ => return Err(Error::Config(format!("unsupported protocol: {value}"))),
                    };
                }
                _ => {
                    tracing::debug!(
                        key = key,
                        value = value,
                        "ignoring unknown connection string option"
                    );
                }
            }
        }

        Ok(config)
    }

    /// Set the server host.
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the server port.
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the database path or alias.
    #[must_use]
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Set user name and password.
    #[must_use]
    pub fn credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = user.into();
        self.password = password.into();
        self
    }

    /// Set the connection character set.
    #[must_use]
    pub fn charset(mut self, charset: impl Into<String>) -> Self {
        self.charset = charset.into();
        self
    }

    /// Set the SQL dialect.
    #[must_use]
    pub fn dialect(mut self, dialect: u8) -> Self {
        self.dialect = dialect;
        self
    }

    /// Set the page size for database creation.
    #[must_use]
    pub fn page_size(mut self, page_size: u32) -> Self {
        self.page_size = Some(page_size);
        self
    }

    /// Set the service manager name.
    #[must_use]
    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = name.into();
        self
    }

    /// Limit the protocol versions offered during negotiation.
    #[must_use]
    pub fn max_protocol(mut self, version: ProtocolVersion) -> Self {
        self.max_protocol = version;
        self
    }

    /// Set the timeout configuration.
    #[must_use]
    pub fn timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Build the database parameter buffer for attach or create.
    pub fn database_parameter_buffer(&self, create: bool) -> Result<Bytes> {
        let mut buf = ParameterBuffer::database();
        buf.add_string(dpb::USER_NAME, &self.user).map_err(config_error)?;
        buf.add_string(dpb::PASSWORD, &self.password).map_err(config_error)?;
        buf.add_string(dpb::LC_CTYPE, &self.charset).map_err(config_error)?;
        buf.add_int(dpb::SQL_DIALECT, i32::from(self.dialect));
        let timeout = i32::try_from(self.timeouts.connect_timeout.as_secs()).unwrap_or(i32::MAX);
        buf.add_int(dpb::CONNECT_TIMEOUT, timeout);
        if create {
            if let Some(page_size) = self.page_size {
                let page_size = i32::try_from(page_size)
                    .map_err(|_| Error::Config(format!("invalid page size: {page_size}")))?;
                buf.add_int(dpb::PAGE_SIZE, page_size);
            }
        }
        Ok(buf.freeze())
    }

    /// Build the service parameter buffer for `op_service_attach`.
    pub fn service_parameter_buffer(&self) -> Result<Bytes> {
        let mut buf = ParameterBuffer::service_attach();
        buf.add_string(spb::USER_NAME, &self.user).map_err(config_error)?;
        buf.add_string(spb::PASSWORD, &self.password).map_err(config_error)?;
        Ok(buf.freeze())
    }
}

fn parse_number<T: std::str::FromStr>(value: &str, what: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::Config(format!("invalid {what}: {value}")))
}

fn config_error(e: fb_wire::ProtocolError) -> Error {
    Error::Config(e.to_string())
}
