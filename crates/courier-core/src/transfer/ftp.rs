use std::io::Read;
use std::net::ToSocketAddrs;
use suppaftp::types::FileType;
use suppaftp::{FtpStream, Mode};
use tracing::debug;

use super::session::{Connector, Endpoint, RemoteSession, TransferMode};
use crate::error::{Error, Result};

/// FTP transport backed by `suppaftp`.
#[derive(Debug, Default, Clone, Copy)]
pub struct FtpConnector;

impl Connector for FtpConnector {
    fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn RemoteSession>> {
        let target = format!("{}:{}", endpoint.host, endpoint.port);
        let addr = (endpoint.host.as_str(), endpoint.port)
            .to_socket_addrs()
            .map_err(|e| Error::protocol("resolve", format!("{}: {}", target, e)))?
            .next()
            .ok_or_else(|| Error::protocol("resolve", format!("{}: no address", target)))?;

        // A non-positive greeting surfaces here as an error.
        let stream = FtpStream::connect_timeout(addr, endpoint.connect_timeout)
            .map_err(|e| Error::protocol("connect", format!("{}: {}", target, e)))?;

        let socket = stream.get_ref();
        socket
            .set_read_timeout(Some(endpoint.data_timeout))
            .and_then(|_| socket.set_write_timeout(Some(endpoint.data_timeout)))
            .map_err(|e| Error::protocol("configure timeouts", e))?;

        debug!("Connected to {}", target);
        Ok(Box::new(FtpSession { stream }))
    }
}

struct FtpSession {
    stream: FtpStream,
}

impl RemoteSession for FtpSession {
    fn login(&mut self, user: &str, password: &str) -> Result<()> {
        self.stream
            .login(user, password)
            .map_err(|e| Error::protocol("login", e))
    }

    fn set_transfer_mode(&mut self, mode: TransferMode) -> Result<()> {
        self.stream.set_mode(match mode {
            TransferMode::Passive => Mode::Passive,
            TransferMode::Active => Mode::Active,
        });
        Ok(())
    }

    fn set_binary(&mut self) -> Result<()> {
        self.stream
            .transfer_type(FileType::Binary)
            .map_err(|e| Error::protocol("set binary type", e))
    }

    fn change_dir(&mut self, path: &str) -> Result<()> {
        self.stream
            .cwd(path)
            .map_err(|e| Error::protocol("change directory", format!("{}: {}", path, e)))
    }

    fn make_dir(&mut self, path: &str) -> Result<()> {
        self.stream
            .mkdir(path)
            .map_err(|e| Error::protocol("make directory", format!("{}: {}", path, e)))
    }

    fn put(&mut self, name: &str, mut reader: &mut dyn Read) -> Result<u64> {
        self.stream
            .put_file(name, &mut reader)
            .map_err(|e| Error::protocol("store", format!("{}: {}", name, e)))
    }

    fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        self.stream
            .rename(from, to)
            .map_err(|e| Error::protocol("rename", format!("{} -> {}: {}", from, to, e)))
    }

    fn delete(&mut self, name: &str) -> Result<()> {
        self.stream
            .rm(name)
            .map_err(|e| Error::protocol("delete", format!("{}: {}", name, e)))
    }

    fn logout(&mut self) -> Result<()> {
        self.stream.quit().map_err(|e| Error::protocol("logout", e))
    }
}
