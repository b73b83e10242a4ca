//! This module manages connections to the underlying sqlite database the
//! judge node persists its state in.
//!
//! All stores share one connection behind a mutex; a store operation runs
//! as a closure under that lock, which is what makes multi-statement queue
//! operations atomic with respect to concurrent workers.
//!

use std::path::Path;
use std::sync::Mutex;

use sqlite::Connection;

error_chain::error_chain! {
    types {
        Error, ErrorKind, ResultExt, Result;
    }

    foreign_links {
        SqliteError(::sqlite::Error);
    }
}

/// Represent a database connection to the sqlite database.
pub struct SqliteConnection {
    /// The raw connection protected by a `Mutex`.
    raw: Mutex<Connection>,
}

impl SqliteConnection {
    /// Create a new `SqliteConnection` instance connecting to a sqlite
    /// database instance stored in the specified file.
    pub fn new<P>(path: P) -> Result<Self>
        where P: AsRef<Path> {
        let raw = Connection::open(path)?;
        Ok(SqliteConnection { raw: Mutex::new(raw) })
    }

    /// Create a new `SqliteConnection` instance backed by a private
    /// in-memory database.
    pub fn in_memory() -> Result<Self> {
        SqliteConnection::new(":memory:")
    }

    /// Execute the given callback on the underlying raw connection. The
    /// connection lock is held for the whole duration of the callback.
    pub fn execute<F, R>(&self, callback: F) -> R
        where F: FnOnce(&Connection) -> R {
        let lock = self.raw.lock().expect("failed to lock mutex of the sqlite connection.");
        callback(&*lock)
    }

    /// Get names of all tables contained in the database instance.
    pub fn get_table_names(&self) -> Result<Vec<String>> {
        self.execute(|conn| {
            let mut names: Vec<String> = Vec::new();
            conn.iterate("SELECT name FROM sqlite_master WHERE type='table'", |pairs| {
                for (_, value) in pairs.iter() {
                    if value.is_none() {
                        continue;
                    }
                    names.push(String::from(value.unwrap()));
                }
                true
            })?;
            Ok(names)
        })
    }

    /// Create the given table unless a table with the given name already
    /// exists in the database instance.
    pub fn ensure_table(&self, name: &str, create_stmt: &str) -> Result<()> {
        if self.get_table_names()?.contains(&String::from(name)) {
            log::debug!("Table `{}` already exists in the sqlite database.", name);
            return Ok(());
        }

        log::info!("Creating table `{}` on sqlite database", name);
        self.execute(|conn| conn.execute(create_stmt))?;

        Ok(())
    }
}
