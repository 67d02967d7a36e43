use std::fmt;
use std::io::Read;
use std::time::Duration;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    Passive,
    Active,
}

/// Where and how to reach the remote store.
#[derive(Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub mode: TransferMode,
    pub connect_timeout: Duration,
    pub data_timeout: Duration,
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"********")
            .field("mode", &self.mode)
            .field("connect_timeout", &self.connect_timeout)
            .field("data_timeout", &self.data_timeout)
            .finish()
    }
}

/// Opens control connections. A successful connect means the server greeted
/// with a positive reply.
pub trait Connector {
    fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn RemoteSession>>;
}

/// The file-transfer primitives delivery needs. Dropping the session closes
/// the connection.
pub trait RemoteSession {
    fn login(&mut self, user: &str, password: &str) -> Result<()>;
    fn set_transfer_mode(&mut self, mode: TransferMode) -> Result<()>;
    fn set_binary(&mut self) -> Result<()>;
    fn change_dir(&mut self, path: &str) -> Result<()>;
    fn make_dir(&mut self, path: &str) -> Result<()>;
    /// Store `reader` under `name` in the current directory, returning bytes sent.
    fn put(&mut self, name: &str, reader: &mut dyn Read) -> Result<u64>;
    fn rename(&mut self, from: &str, to: &str) -> Result<()>;
    fn delete(&mut self, name: &str) -> Result<()>;
    fn logout(&mut self) -> Result<()>;
}
