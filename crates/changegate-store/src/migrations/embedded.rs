//! SQL migrations compiled into the binary

use sha2::{Digest, Sha256};

pub struct Migration {
    pub id: &'static str,
    pub sql: &'static str,
}

impl Migration {
    /// SHA-256 of the SQL with line endings normalized, so a CRLF checkout
    /// records the same checksum as an LF one
    pub fn checksum(&self) -> String {
        let normalized = self.sql.replace("\r\n", "\n");
        hex::encode(Sha256::digest(normalized.as_bytes()))
    }
}

/// All migrations, oldest first
pub fn get_migrations() -> Vec<Migration> {
    vec![Migration {
        id: "001_initial_schema",
        sql: include_str!("../../migrations/001_initial_schema.sql"),
    }]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_ignores_line_endings() {
        let lf = Migration {
            id: "t",
            sql: "CREATE TABLE t (id INTEGER);\nSELECT 1;\n",
        };
        let crlf = Migration {
            id: "t",
            sql: "CREATE TABLE t (id INTEGER);\r\nSELECT 1;\r\n",
        };
        assert_eq!(lf.checksum(), crlf.checksum());
        assert_eq!(lf.checksum().len(), 64);
    }

    #[test]
    fn test_ids_are_ordered_and_unique() {
        let ids: Vec<_> = get_migrations().iter().map(|m| m.id).collect();
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(ids, sorted);
    }
}
