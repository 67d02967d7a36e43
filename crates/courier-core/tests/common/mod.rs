#![allow(dead_code)]

use chrono::{DateTime, Local, TimeZone};
use filetime::FileTime;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Read;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime};

use courier_core::error::{Error, Result};
use courier_core::transfer::{Connector, Endpoint, RemoteSession, Sleeper, TransferMode};

/// In-memory FTP server state shared by every session it hands out.
#[derive(Debug, Default)]
pub struct FakeState {
    /// Stored files keyed by absolute remote path.
    pub files: BTreeMap<String, Vec<u8>>,
    pub dirs: BTreeSet<String>,
    pub calls: Vec<String>,
    pub connects: u32,
    pub open_sessions: i32,
    /// Refuse this many connects before accepting.
    pub fail_connects: u32,
    pub fail_login: bool,
    pub fail_put: bool,
    pub fail_rename: bool,
}

#[derive(Clone, Default)]
pub struct FakeServer {
    state: Arc<Mutex<FakeState>>,
}

impl FakeServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn configure(self, f: impl FnOnce(&mut FakeState)) -> Self {
        f(&mut self.state());
        self
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn count_calls(&self, prefix: &str) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }
}

impl Connector for FakeServer {
    fn connect(&self, _endpoint: &Endpoint) -> Result<Box<dyn RemoteSession>> {
        let mut state = self.state();
        state.connects += 1;
        state.calls.push("connect".into());
        if state.fail_connects > 0 {
            state.fail_connects -= 1;
            return Err(Error::protocol("connect", "421 service not available"));
        }
        state.open_sessions += 1;
        Ok(Box::new(FakeSession {
            state: Arc::clone(&self.state),
            cwd: "/".into(),
        }))
    }
}

struct FakeSession {
    state: Arc<Mutex<FakeState>>,
    cwd: String,
}

impl FakeSession {
    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    fn path_of(&self, name: &str) -> String {
        if self.cwd == "/" {
            format!("/{}", name)
        } else {
            format!("{}/{}", self.cwd, name)
        }
    }
}

impl RemoteSession for FakeSession {
    fn login(&mut self, user: &str, _password: &str) -> Result<()> {
        let mut state = self.state();
        state.calls.push(format!("login {}", user));
        if state.fail_login {
            return Err(Error::protocol("login", "530 login incorrect"));
        }
        Ok(())
    }

    fn set_transfer_mode(&mut self, mode: TransferMode) -> Result<()> {
        self.state().calls.push(format!("mode {:?}", mode));
        Ok(())
    }

    fn set_binary(&mut self) -> Result<()> {
        self.state().calls.push("type binary".into());
        Ok(())
    }

    fn change_dir(&mut self, path: &str) -> Result<()> {
        let mut state = self.state();
        state.calls.push(format!("cwd {}", path));
        if path == "/" || state.dirs.contains(path) {
            drop(state);
            self.cwd = path.to_string();
            Ok(())
        } else {
            Err(Error::protocol("change directory", "550 no such directory"))
        }
    }

    fn make_dir(&mut self, path: &str) -> Result<()> {
        let mut state = self.state();
        state.calls.push(format!("mkdir {}", path));
        state.dirs.insert(path.to_string());
        Ok(())
    }

    fn put(&mut self, name: &str, reader: &mut dyn Read) -> Result<u64> {
        let path = self.path_of(name);
        let mut data = Vec::new();
        reader
            .read_to_end(&mut data)
            .map_err(|e| Error::protocol("store", e))?;
        let mut state = self.state();
        state.calls.push(format!("put {}", name));
        if state.fail_put {
            // The connection drops mid-transfer, leaving half a file behind.
            data.truncate(data.len() / 2);
            state.files.insert(path, data);
            return Err(Error::protocol("store", "426 connection closed"));
        }
        let len = data.len() as u64;
        state.files.insert(path, data);
        Ok(len)
    }

    fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        let (from_path, to_path) = (self.path_of(from), self.path_of(to));
        let mut state = self.state();
        state.calls.push(format!("rename {} {}", from, to));
        if state.fail_rename {
            return Err(Error::protocol("rename", "553 not allowed"));
        }
        let data = state
            .files
            .remove(&from_path)
            .ok_or_else(|| Error::protocol("rename", "550 no such file"))?;
        state.files.insert(to_path, data);
        Ok(())
    }

    fn delete(&mut self, name: &str) -> Result<()> {
        let path = self.path_of(name);
        let mut state = self.state();
        state.calls.push(format!("delete {}", name));
        state.files.remove(&path);
        Ok(())
    }

    fn logout(&mut self) -> Result<()> {
        self.state().calls.push("quit".into());
        Ok(())
    }
}

impl Drop for FakeSession {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            state.open_sessions -= 1;
        }
    }
}

/// Records requested delays instead of sleeping.
#[derive(Clone, Default)]
pub struct RecordingSleeper {
    delays: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingSleeper {
    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().unwrap().clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, delay: Duration) {
        self.delays.lock().unwrap().push(delay);
    }
}

pub fn endpoint() -> Endpoint {
    Endpoint {
        host: "ftp.test".into(),
        port: 21,
        user: "drop".into(),
        password: "secret".into(),
        mode: TransferMode::Passive,
        connect_timeout: Duration::from_secs(5),
        data_timeout: Duration::from_secs(5),
    }
}

/// 2026-03-10 09:00 local, the start time of every pipeline test run.
pub fn run_clock() -> DateTime<Local> {
    Local.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).unwrap()
}

pub fn write_file(path: &Path, contents: &str, modified: DateTime<Local>) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
    let at: SystemTime = modified.into();
    filetime::set_file_mtime(path, FileTime::from_system_time(at)).unwrap();
}

/// Forward-slash form for embedding in TOML literal strings.
pub fn toml_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
