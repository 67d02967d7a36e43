pub mod ftp;
pub mod retry;
pub mod session;
pub mod upload;

pub use ftp::FtpConnector;
pub use retry::{RetryPolicy, Sleeper, ThreadSleeper};
pub use session::{Connector, Endpoint, RemoteSession, TransferMode};
pub use upload::{normalize_remote_dir, UploadReport, UploadTask, Uploader};
