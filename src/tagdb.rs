use crate::error::{Result, TagTrailError, VerifyFailure};
use rusqlite::{params, Connection};
use std::path::Path;

/// One online-secret row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnlineSecret {
    pub reader: u32,
    pub b: String,
}

/// External table holding RFChain online secrets, one row per chain
/// step, keyed by the derived `ID_i` hex string. Rows are inserted and
/// never updated.
pub struct TagDb {
    conn: Connection,
}

impl TagDb {
    /// Create or open a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init_schema()?;
        Ok(db)
    }

    /// Create an in-memory database for testing.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS tagdb (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                tagID TEXT NOT NULL,
                b TEXT NOT NULL,
                reader INTEGER NOT NULL,
                timestamp TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                UNIQUE (id, tagID)
            )",
            [],
        )?;
        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_tagdb_tagid ON tagdb(tagID)",
            [],
        )?;
        Ok(())
    }

    /// Deletes every row; used when a deployment is (re)initialized.
    pub fn reset(&self) -> Result<()> {
        self.conn.execute("DELETE FROM tagdb", [])?;
        Ok(())
    }

    /// Inserts a new online secret row.
    pub fn insert(&self, tag_id: &str, b: &str, reader: u32) -> Result<()> {
        self.conn.execute(
            "INSERT INTO tagdb (tagID, b, reader) VALUES (?1, ?2, ?3)",
            params![tag_id, b, reader],
        )?;
        Ok(())
    }

    /// Fetches the online secret for `tag_id`.
    ///
    /// Exactly one row must exist; zero or multiple rows are a
    /// verification failure, not a lookup miss.
    pub fn lookup(&self, tag_id: &str) -> Result<OnlineSecret> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM tagdb WHERE tagID = ?1",
            params![tag_id],
            |row| row.get(0),
        )?;
        if count != 1 {
            log::warn!("tagdb has {} rows for ID {}", count, tag_id);
            return Err(TagTrailError::VerificationFailed(
                VerifyFailure::OnlineSecretMissing {
                    tag_id: tag_id.to_string(),
                },
            ));
        }
        let secret = self.conn.query_row(
            "SELECT reader, b FROM tagdb WHERE tagID = ?1 ORDER BY id DESC LIMIT 1",
            params![tag_id],
            |row| {
                Ok(OnlineSecret {
                    reader: row.get(0)?,
                    b: row.get(1)?,
                })
            },
        )?;
        Ok(secret)
    }

    /// Removes the rows for one `tagID`, returning how many were
    /// deleted. Maintenance aid; the protocols themselves never delete.
    pub fn delete(&self, tag_id: &str) -> Result<usize> {
        let n = self
            .conn
            .execute("DELETE FROM tagdb WHERE tagID = ?1", params![tag_id])?;
        Ok(n)
    }

    /// Total number of stored rows.
    pub fn len(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM tagdb", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_lookup() {
        let db = TagDb::in_memory().unwrap();
        db.insert("ab12", "deadbeef", 3).unwrap();

        let secret = db.lookup("ab12").unwrap();
        assert_eq!(secret.reader, 3);
        assert_eq!(secret.b, "deadbeef");
    }

    #[test]
    fn test_missing_row_is_verification_failure() {
        let db = TagDb::in_memory().unwrap();
        let err = db.lookup("absent").unwrap_err();
        assert!(err.is_verification_failure());
    }

    #[test]
    fn test_duplicate_rows_are_verification_failure() {
        let db = TagDb::in_memory().unwrap();
        db.insert("dup", "aa", 0).unwrap();
        db.insert("dup", "bb", 1).unwrap();

        let err = db.lookup("dup").unwrap_err();
        assert!(err.is_verification_failure());
    }

    #[test]
    fn test_reset_empties_table() {
        let db = TagDb::in_memory().unwrap();
        db.insert("x", "aa", 0).unwrap();
        db.insert("y", "bb", 1).unwrap();
        assert_eq!(db.len().unwrap(), 2);

        db.reset().unwrap();
        assert!(db.is_empty().unwrap());
    }

    #[test]
    fn test_delete_single_key() {
        let db = TagDb::in_memory().unwrap();
        db.insert("x", "aa", 0).unwrap();
        db.insert("y", "bb", 1).unwrap();

        assert_eq!(db.delete("x").unwrap(), 1);
        assert!(db.lookup("x").is_err());
        assert!(db.lookup("y").is_ok());
    }

    #[test]
    fn test_open_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tagdb.sqlite");
        {
            let db = TagDb::open(&path).unwrap();
            db.insert("persist", "cc", 2).unwrap();
        }
        let db = TagDb::open(&path).unwrap();
        assert_eq!(db.lookup("persist").unwrap().reader, 2);
    }
}
