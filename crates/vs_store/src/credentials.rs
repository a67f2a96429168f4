use std::sync::{Arc, Mutex};

use duckdb::Connection;

use crate::{now_rfc3339, Credentials, StoreError};

/// Single-row credentials store. `set` overwrites the previous row.
pub struct CredentialsStore {
    conn: Arc<Mutex<Connection>>,
}

impl CredentialsStore {
    pub(crate) fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// Load the stored credentials.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when no credentials have been
    /// stored yet.
    pub fn get(&self) -> Result<Credentials, StoreError> {
        let conn = self.conn.lock().unwrap();
        match conn.query_row(
            "SELECT url, username, password FROM credentials WHERE id = 1",
            [],
            |row| {
                Ok(Credentials {
                    url: row.get(0)?,
                    username: row.get(1)?,
                    password: row.get(2)?,
                })
            },
        ) {
            Ok(creds) => Ok(creds),
            Err(duckdb::Error::QueryReturnedNoRows) => Err(StoreError::NotFound("credentials")),
            Err(err) => Err(err.into()),
        }
    }

    /// Store credentials, replacing any previous row.
    pub fn set(&self, creds: &Credentials) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r"
            INSERT INTO credentials (id, url, username, password, created_at)
            VALUES (1, ?, ?, ?, ?)
            ON CONFLICT (id) DO UPDATE SET
                url = excluded.url,
                username = excluded.username,
                password = excluded.password,
                created_at = excluded.created_at
            ",
            duckdb::params![creds.url, creds.username, creds.password, now_rfc3339()],
        )?;
        Ok(())
    }

    /// Whether a credentials row is present.
    pub fn exists(&self) -> Result<bool, StoreError> {
        let conn = self.conn.lock().unwrap();
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM credentials WHERE id = 1", [], |row| {
                row.get(0)
            })?;
        Ok(count > 0)
    }
}

#[cfg(test)]
mod tests {
    use crate::{Credentials, Store};

    #[test]
    fn get_before_set_is_not_found() {
        let store = Store::open_memory().unwrap();
        let err = store.credentials().get().unwrap_err();
        assert!(err.is_not_found());
        assert!(!store.credentials().exists().unwrap());
    }

    #[test]
    fn set_then_get_round_trip() {
        let store = Store::open_memory().unwrap();
        store
            .credentials()
            .set(&Credentials {
                url: "https://vcenter.local/sdk".into(),
                username: "admin".into(),
                password: "secret".into(),
            })
            .unwrap();

        let creds = store.credentials().get().unwrap();
        assert_eq!(creds.url, "https://vcenter.local/sdk");
        assert_eq!(creds.username, "admin");
        assert!(store.credentials().exists().unwrap());
    }

    #[test]
    fn set_overwrites_previous_row() {
        let store = Store::open_memory().unwrap();
        for (url, user) in [("https://a/sdk", "first"), ("https://b/sdk", "second")] {
            store
                .credentials()
                .set(&Credentials {
                    url: url.into(),
                    username: user.into(),
                    password: "pw".into(),
                })
                .unwrap();
        }
        let creds = store.credentials().get().unwrap();
        assert_eq!(creds.username, "second");
    }
}
