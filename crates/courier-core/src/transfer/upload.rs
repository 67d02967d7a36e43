use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

use super::retry::{run_with_retry, RetryPolicy, Sleeper};
use super::session::{Connector, Endpoint, RemoteSession};
use crate::error::{Error, Result};

const TEMP_SUFFIX: &str = ".part";

/// One archive bound for one remote directory. Consumed by a single delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTask {
    pub archive: PathBuf,
    pub remote_dir: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    Disconnected,
    Connected,
    Authenticated,
    DirectoryReady,
    Uploading,
    Finalizing,
}

impl fmt::Display for UploadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UploadState::Disconnected => "disconnected",
            UploadState::Connected => "connected",
            UploadState::Authenticated => "authenticated",
            UploadState::DirectoryReady => "directory ready",
            UploadState::Uploading => "uploading",
            UploadState::Finalizing => "finalizing",
        };
        f.write_str(s)
    }
}

#[derive(Debug)]
pub struct UploadReport {
    pub task: UploadTask,
    pub attempts: u32,
    /// Remote path of the delivered file, or the error of the last attempt.
    pub result: Result<String>,
}

impl UploadReport {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }
}

/// Delivers archives one at a time: connect, authenticate, prepare the remote
/// directory, store under `<name>.part`, then rename to the final name.
pub struct Uploader<'a> {
    connector: &'a dyn Connector,
    endpoint: Endpoint,
    retry: RetryPolicy,
    sleeper: &'a dyn Sleeper,
}

impl<'a> Uploader<'a> {
    pub fn new(
        connector: &'a dyn Connector,
        endpoint: Endpoint,
        retry: RetryPolicy,
        sleeper: &'a dyn Sleeper,
    ) -> Self {
        Self {
            connector,
            endpoint,
            retry,
            sleeper,
        }
    }

    /// Run the whole attempt under the retry policy. Failure is reported, never panics.
    pub fn upload(&self, task: UploadTask) -> UploadReport {
        info!(
            "Uploading {} to {}:{}{}",
            task.archive.display(),
            self.endpoint.host,
            self.endpoint.port,
            normalize_remote_dir(&task.remote_dir)
        );
        let outcome = run_with_retry(self.retry, self.sleeper, |attempt| {
            debug!("Upload attempt {} for {}", attempt, task.archive.display());
            self.attempt(&task)
        });

        match &outcome.result {
            Ok(remote) => info!(
                "Delivered {} as {} after {} attempt(s)",
                task.archive.display(),
                remote,
                outcome.attempts
            ),
            Err(err) => error!(
                "Giving up on {} after {} attempt(s): {}",
                task.archive.display(),
                outcome.attempts,
                err
            ),
        }

        UploadReport {
            task,
            attempts: outcome.attempts,
            result: outcome.result,
        }
    }

    fn attempt(&self, task: &UploadTask) -> Result<String> {
        let final_name = archive_file_name(&task.archive)?;
        let file = File::open(&task.archive).map_err(|e| Error::io("open", &task.archive, e))?;

        let mut state = UploadState::Disconnected;
        let mut session = self.connector.connect(&self.endpoint)?;
        state = advance(state, UploadState::Connected);

        let result = self.deliver(session.as_mut(), &mut state, task, &final_name, file);
        if let Err(err) = &result {
            warn!("Upload of {} failed while {}: {}", final_name, state, err);
        }

        // Teardown runs on every path; dropping the session closes the connection.
        if let Err(err) = session.logout() {
            debug!("Logout after {} ignored: {}", state, err);
        }
        drop(session);
        advance(state, UploadState::Disconnected);
        result
    }

    fn deliver(
        &self,
        session: &mut dyn RemoteSession,
        state: &mut UploadState,
        task: &UploadTask,
        final_name: &str,
        file: File,
    ) -> Result<String> {
        session.login(&self.endpoint.user, &self.endpoint.password)?;
        *state = advance(*state, UploadState::Authenticated);

        session.set_transfer_mode(self.endpoint.mode)?;
        session.set_binary()?;

        let remote_dir = normalize_remote_dir(&task.remote_dir);
        ensure_remote_dir(session, &remote_dir)?;
        *state = advance(*state, UploadState::DirectoryReady);

        let temp_name = format!("{}{}", final_name, TEMP_SUFFIX);
        *state = advance(*state, UploadState::Uploading);
        let mut reader = BufReader::new(file);
        match session.put(&temp_name, &mut reader) {
            Ok(bytes) => debug!("Stored {} bytes as {}", bytes, temp_name),
            Err(err) => {
                remove_temp(session, &temp_name);
                return Err(err);
            }
        }

        *state = advance(*state, UploadState::Finalizing);
        if let Err(err) = session.rename(&temp_name, final_name) {
            remove_temp(session, &temp_name);
            return Err(err);
        }

        Ok(remote_join(&remote_dir, final_name))
    }
}

fn advance(from: UploadState, to: UploadState) -> UploadState {
    debug!("Upload state {} -> {}", from, to);
    to
}

fn remove_temp(session: &mut dyn RemoteSession, temp_name: &str) {
    if let Err(err) = session.delete(temp_name) {
        debug!("Could not remove temporary {}: {}", temp_name, err);
    }
}

fn archive_file_name(path: &Path) -> Result<String> {
    if !path.is_file() {
        return Err(Error::path(path, "archive to upload does not exist"));
    }
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| Error::path(path, "archive has no file name"))
}

/// Leading `/`, no trailing `/`, empty becomes `/`.
pub fn normalize_remote_dir(dir: &str) -> String {
    let trimmed = dir.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return "/".to_string();
    }
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

/// Enter `dir` one segment at a time, creating segments that cannot be entered.
pub fn ensure_remote_dir(session: &mut dyn RemoteSession, dir: &str) -> Result<()> {
    let mut current = String::new();
    for segment in dir.split('/').filter(|s| !s.is_empty()) {
        current.push('/');
        current.push_str(segment);
        if session.change_dir(&current).is_ok() {
            continue;
        }
        debug!("Creating remote directory {}", current);
        session.make_dir(&current)?;
        session.change_dir(&current)?;
    }
    if current.is_empty() {
        session.change_dir("/")?;
    }
    Ok(())
}

fn remote_join(dir: &str, name: &str) -> String {
    if dir == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", dir, name)
    }
}
