//! Per-connection cache of server-side prepared statement names.

use std::collections::HashMap;

/// Maps SQL text to the name of the statement prepared for it on this connection.
///
/// Entries live as long as the connection. A Parse that the server rejects
/// is [forgotten](Self::forget) so the SQL is parsed again on next use.
#[derive(Debug, Default)]
pub struct PreparedStatementCache {
    names: HashMap<String, String>,
    counter: u64,
}

impl PreparedStatementCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the statement name for `sql`, assigning a fresh one if unseen.
    ///
    /// Returns `(true, name)` the first time a given SQL string is seen and
    /// `(false, name)` with the previously issued name afterwards.
    pub fn get_or_assign(&mut self, sql: &str) -> (bool, &str) {
        if self.names.contains_key(sql) {
            let name = self.names.get(sql).map(String::as_str).unwrap_or_default();
            return (false, name);
        }

        self.counter += 1;
        let name = format!("_pgnio_s{}", self.counter);
        tracing::debug!("assigned prepared statement {} to {:?}", name, sql);
        let name = self.names.entry(sql.to_string()).or_insert(name);
        (true, name.as_str())
    }

    /// Drop the entry for `sql`, if any.
    pub fn forget(&mut self, sql: &str) -> Option<String> {
        self.names.remove(sql)
    }

    /// Number of cached statements.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Returns true if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
