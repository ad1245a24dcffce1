use std::path::{Path, PathBuf};

// Well-known filenames used within the workspace directory
const PID_FILE_NAME: &str = "courierd.pid";
const IDENTITY_FILE_NAME: &str = "identity.json";
const BACKLOG_DB_NAME: &str = "backlog.sqlite3";

/// Path to the daemon PID file inside the workspace.
pub fn pid_file(workspace_dir: &Path) -> PathBuf {
    workspace_dir.join(PID_FILE_NAME)
}

/// Path to the persisted identity file inside the workspace.
pub fn identity_file(workspace_dir: &Path) -> PathBuf {
    workspace_dir.join(IDENTITY_FILE_NAME)
}

/// Path to the durable delivery backlog database.
pub fn backlog_db(workspace_dir: &Path) -> PathBuf {
    workspace_dir.join(BACKLOG_DB_NAME)
}
