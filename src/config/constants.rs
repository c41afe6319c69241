pub const LOG_FILE_PATH: &str = "/tmp/secretary.log";

/// How long info notices stay on screen.
pub const NOTICE_DURATION: std::time::Duration = std::time::Duration::from_secs(3);
