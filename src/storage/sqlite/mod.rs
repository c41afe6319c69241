pub(crate) mod migration;
mod sqlite;

pub use sqlite::{Sqlite, file_url, parse_file_url};
