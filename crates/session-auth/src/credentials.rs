//! Credential storage for the session's token pair
//!
//! The store holds a single logical record: a JSON object whose `accessToken`
//! and `refreshToken` fields form the credential pair. The same record carries
//! other session metadata (the user profile), so writes of the pair must keep
//! every unrelated field intact.
//!
//! The token fields are owned by this process: `FileCredentialStore` assumes
//! it is the only writer of `accessToken`/`refreshToken`. Other fields may be
//! added to the file by other programs and survive every write.
//!
//! Reads never fail. A missing, unreadable or malformed record reads as "no
//! credentials" and the caller proceeds anonymously.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use common::Secret;
use serde_json::{Map, Value};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::constants::{ACCESS_TOKEN_FIELD, REFRESH_TOKEN_FIELD, USER_FIELD};
use crate::error::{Error, Result};
use crate::token::SessionUser;

/// Access token plus the refresh token that re-obtains it.
///
/// Always written and replaced as a whole; there is no way to update one
/// token without the other.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialPair {
    pub access_token: Secret<String>,
    pub refresh_token: Secret<String>,
}

impl CredentialPair {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: Secret::new(access_token.into()),
            refresh_token: Secret::new(refresh_token.into()),
        }
    }

    pub fn access_token(&self) -> &str {
        self.access_token.expose()
    }

    pub fn refresh_token(&self) -> &str {
        self.refresh_token.expose()
    }

    /// Extract the pair from a session record. Both fields must be strings.
    fn from_record(record: &Map<String, Value>) -> Option<Self> {
        let access = record.get(ACCESS_TOKEN_FIELD);
        let refresh = record.get(REFRESH_TOKEN_FIELD);
        match (access.and_then(Value::as_str), refresh.and_then(Value::as_str)) {
            (Some(access), Some(refresh)) => Some(Self::new(access, refresh)),
            _ => {
                if access.is_some() || refresh.is_some() {
                    warn!("session record has malformed token fields, treating as signed out");
                }
                None
            }
        }
    }

    fn write_into(&self, record: &mut Map<String, Value>) {
        record.insert(
            ACCESS_TOKEN_FIELD.into(),
            Value::String(self.access_token().to_owned()),
        );
        record.insert(
            REFRESH_TOKEN_FIELD.into(),
            Value::String(self.refresh_token().to_owned()),
        );
    }
}

/// Persistence port for the credential pair.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility (`Arc<dyn CredentialStore>`).
pub trait CredentialStore: Send + Sync {
    /// Current pair, or `None` when signed out or the record is unreadable.
    fn get(&self) -> Pin<Box<dyn Future<Output = Option<CredentialPair>> + Send + '_>>;

    /// Replace the pair. Readers observe either the old or the new pair, never a mix.
    fn set<'a>(
        &'a self,
        pair: &'a CredentialPair,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    /// Remove the session record. After this `get()` returns `None`.
    fn clear(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Replace the pair only while the stored refresh token is still
    /// `expected_refresh`. Returns `false`, writing nothing, when the session
    /// was cleared or replaced in the meantime.
    fn replace_if<'a>(
        &'a self,
        expected_refresh: &'a str,
        pair: &'a CredentialPair,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + 'a>>;

    /// Remove the record only while the stored refresh token is still
    /// `expected_refresh`. Returns whether anything was removed.
    fn clear_if<'a>(
        &'a self,
        expected_refresh: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + 'a>>;
}

fn holds_refresh_token(record: &Map<String, Value>, expected: &str) -> bool {
    record.get(REFRESH_TOKEN_FIELD).and_then(Value::as_str) == Some(expected)
}

/// Session record persisted as a JSON file.
///
/// The record is kept in memory behind a tokio Mutex, which serializes
/// writers and gives readers a consistent snapshot. Before each write the
/// file is re-read so fields other programs added since `open` are kept;
/// the token fields themselves are owned by this process. Every write goes
/// to disk with temp-file + rename so a crash never leaves a torn record.
pub struct FileCredentialStore {
    path: PathBuf,
    record: Mutex<Map<String, Value>>,
}

impl FileCredentialStore {
    /// Open the session file at `path`.
    ///
    /// A missing file is an empty (signed-out) session. A file that is not a
    /// JSON object is logged and treated as empty; it is replaced on the next
    /// write. Other I/O failures are returned.
    pub async fn open(path: PathBuf) -> Result<Self> {
        let record = match read_record(&path).await? {
            Some(record) => {
                info!(path = %path.display(), "loaded session record");
                record
            }
            None => {
                info!(path = %path.display(), "no usable session file, starting signed out");
                Map::new()
            }
        };

        Ok(Self {
            path,
            record: Mutex::new(record),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Store a freshly issued pair together with the signed-in user's profile.
    pub async fn set_session(&self, pair: &CredentialPair, user: &SessionUser) -> Result<()> {
        let user = serde_json::to_value(user)
            .map_err(|e| Error::CredentialParse(format!("serializing user: {e}")))?;
        let mut record = self.record.lock().await;
        let mut next = self.current_on_disk(&record).await?;
        pair.write_into(&mut next);
        next.insert(USER_FIELD.into(), user);
        write_atomic(&self.path, &next).await?;
        *record = next;
        debug!("stored new session");
        Ok(())
    }

    /// Profile of the signed-in user, if the record has one.
    pub async fn user(&self) -> Option<SessionUser> {
        let record = self.record.lock().await;
        record
            .get(USER_FIELD)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Base for the next write: the file's record if it is readable, else
    /// the cached one.
    async fn current_on_disk(&self, cached: &Map<String, Value>) -> Result<Map<String, Value>> {
        Ok(read_record(&self.path).await?.unwrap_or_else(|| cached.clone()))
    }

    async fn replace_pair(
        &self,
        expected_refresh: Option<&str>,
        pair: &CredentialPair,
    ) -> Result<bool> {
        let mut record = self.record.lock().await;
        if let Some(expected) = expected_refresh
            && !holds_refresh_token(&record, expected)
        {
            debug!("session changed since refresh began, not replacing pair");
            return Ok(false);
        }
        let mut next = self.current_on_disk(&record).await?;
        pair.write_into(&mut next);
        write_atomic(&self.path, &next).await?;
        *record = next;
        debug!("replaced credential pair");
        Ok(true)
    }

    async fn remove_record(&self, expected_refresh: Option<&str>) -> Result<bool> {
        let mut record = self.record.lock().await;
        if let Some(expected) = expected_refresh
            && !holds_refresh_token(&record, expected)
        {
            debug!("session changed since refresh began, not clearing");
            return Ok(false);
        }
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::Io(format!("removing session file: {e}"))),
        }
        record.clear();
        debug!(path = %self.path.display(), "cleared session record");
        Ok(true)
    }
}

impl CredentialStore for FileCredentialStore {
    fn get(&self) -> Pin<Box<dyn Future<Output = Option<CredentialPair>> + Send + '_>> {
        Box::pin(async move {
            let record = self.record.lock().await;
            CredentialPair::from_record(&record)
        })
    }

    fn set<'a>(
        &'a self,
        pair: &'a CredentialPair,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move { self.replace_pair(None, pair).await.map(|_| ()) })
    }

    fn clear(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move { self.remove_record(None).await.map(|_| ()) })
    }

    fn replace_if<'a>(
        &'a self,
        expected_refresh: &'a str,
        pair: &'a CredentialPair,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + 'a>> {
        Box::pin(self.replace_pair(Some(expected_refresh), pair))
    }

    fn clear_if<'a>(
        &'a self,
        expected_refresh: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + 'a>> {
        Box::pin(self.remove_record(Some(expected_refresh)))
    }
}

/// Read the record at `path`. `None` when the file is missing or does not
/// hold a JSON object.
async fn read_record(path: &Path) -> Result<Option<Map<String, Value>>> {
    let contents = match tokio::fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(Error::Io(format!("reading session file: {e}"))),
    };
    match serde_json::from_str::<Value>(&contents) {
        Ok(Value::Object(record)) => Ok(Some(record)),
        Ok(_) | Err(_) => {
            warn!(path = %path.display(), "session file is not a JSON object");
            Ok(None)
        }
    }
}

/// In-process credential slot with no persistence.
#[derive(Default)]
pub struct MemoryCredentialStore {
    slot: RwLock<Option<CredentialPair>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pair(pair: CredentialPair) -> Self {
        Self {
            slot: RwLock::new(Some(pair)),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self) -> Pin<Box<dyn Future<Output = Option<CredentialPair>> + Send + '_>> {
        Box::pin(async move { self.slot.read().await.clone() })
    }

    fn set<'a>(
        &'a self,
        pair: &'a CredentialPair,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            *self.slot.write().await = Some(pair.clone());
            Ok(())
        })
    }

    fn clear(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            *self.slot.write().await = None;
            Ok(())
        })
    }

    fn replace_if<'a>(
        &'a self,
        expected_refresh: &'a str,
        pair: &'a CredentialPair,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + 'a>> {
        Box::pin(async move {
            let mut slot = self.slot.write().await;
            match slot.as_ref() {
                Some(current) if current.refresh_token() == expected_refresh => {
                    *slot = Some(pair.clone());
                    Ok(true)
                }
                _ => Ok(false),
            }
        })
    }

    fn clear_if<'a>(
        &'a self,
        expected_refresh: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + 'a>> {
        Box::pin(async move {
            let mut slot = self.slot.write().await;
            match slot.as_ref() {
                Some(current) if current.refresh_token() == expected_refresh => {
                    *slot = None;
                    Ok(true)
                }
                _ => Ok(false),
            }
        })
    }
}

/// Write the session record to a file atomically.
///
/// Writes to a temporary file in the same directory, then renames it over
/// the target. Permissions are 0600 since the file holds bearer tokens.
async fn write_atomic(path: &Path, record: &Map<String, Value>) -> Result<()> {
    let json = serde_json::to_string_pretty(record)
        .map_err(|e| Error::CredentialParse(format!("serializing session record: {e}")))?;

    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };

    let tmp_path = dir.join(format!(".session.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp session file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting session file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp session file: {e}")))?;

    debug!(path = %path.display(), "persisted session record");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn user() -> SessionUser {
        SessionUser {
            id: "u1".into(),
            username: "ada".into(),
            display_name: "Ada L.".into(),
        }
    }

    #[tokio::test]
    async fn missing_file_reads_as_signed_out() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::open(dir.path().join("session.json"))
            .await
            .unwrap();
        assert!(store.get().await.is_none());
        assert!(store.user().await.is_none());
    }

    #[tokio::test]
    async fn pair_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");

        let store = FileCredentialStore::open(path.clone()).await.unwrap();
        store.set(&CredentialPair::new("at_1", "rt_1")).await.unwrap();

        let reopened = FileCredentialStore::open(path).await.unwrap();
        let pair = reopened.get().await.unwrap();
        assert_eq!(pair.access_token(), "at_1");
        assert_eq!(pair.refresh_token(), "rt_1");
    }

    #[tokio::test]
    async fn corrupt_file_reads_as_signed_out() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        tokio::fs::write(&path, "{not json").await.unwrap();

        let store = FileCredentialStore::open(path).await.unwrap();
        assert!(store.get().await.is_none());
    }

    #[tokio::test]
    async fn non_string_token_reads_as_signed_out() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        tokio::fs::write(&path, r#"{"accessToken":42,"refreshToken":"rt_1"}"#)
            .await
            .unwrap();

        let store = FileCredentialStore::open(path).await.unwrap();
        assert!(store.get().await.is_none());
    }

    #[tokio::test]
    async fn set_preserves_unrelated_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        tokio::fs::write(
            &path,
            r#"{"accessToken":"at_1","refreshToken":"rt_1","theme":"dark","user":{"id":"u1","username":"ada","displayName":"Ada L."}}"#,
        )
        .await
        .unwrap();

        let store = FileCredentialStore::open(path.clone()).await.unwrap();
        store.set(&CredentialPair::new("at_2", "rt_2")).await.unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let record: Value = serde_json::from_str(&contents).unwrap();
        assert_eq!(record["accessToken"], "at_2");
        assert_eq!(record["refreshToken"], "rt_2");
        assert_eq!(record["theme"], "dark");
        assert_eq!(store.user().await.unwrap(), user());
    }

    #[tokio::test]
    async fn set_session_stores_pair_and_user() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::open(dir.path().join("session.json"))
            .await
            .unwrap();

        store
            .set_session(&CredentialPair::new("at_1", "rt_1"), &user())
            .await
            .unwrap();

        assert_eq!(store.get().await.unwrap(), CredentialPair::new("at_1", "rt_1"));
        assert_eq!(store.user().await.unwrap().display_name, "Ada L.");
    }

    #[tokio::test]
    async fn clear_removes_record_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        let store = FileCredentialStore::open(path.clone()).await.unwrap();
        store
            .set_session(&CredentialPair::new("at_1", "rt_1"), &user())
            .await
            .unwrap();

        store.clear().await.unwrap();
        assert!(store.get().await.is_none());
        assert!(store.user().await.is_none());
        assert!(!path.exists());

        store.clear().await.unwrap();
        assert!(store.get().await.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn file_permissions_are_0600() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        let store = FileCredentialStore::open(path.clone()).await.unwrap();
        store.set(&CredentialPair::new("at_1", "rt_1")).await.unwrap();

        let mode = tokio::fs::metadata(&path).await.unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600, "session file must be 0600, got {mode:o}");
    }

    #[tokio::test]
    async fn concurrent_writes_leave_a_whole_pair() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        let store = Arc::new(FileCredentialStore::open(path.clone()).await.unwrap());

        let mut handles = vec![];
        for i in 0..10 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let pair = CredentialPair::new(format!("at_{i}"), format!("rt_{i}"));
                store.set(&pair).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        // Whichever write won, both tokens belong to it
        let pair = store.get().await.unwrap();
        let suffix = pair.access_token().trim_start_matches("at_");
        assert_eq!(pair.refresh_token(), format!("rt_{suffix}"));

        let reopened = FileCredentialStore::open(path).await.unwrap();
        assert_eq!(reopened.get().await.unwrap(), pair);
    }

    #[tokio::test]
    async fn memory_store_set_get_clear() {
        let store = MemoryCredentialStore::new();
        assert!(store.get().await.is_none());

        store.set(&CredentialPair::new("at_1", "rt_1")).await.unwrap();
        assert_eq!(store.get().await.unwrap().access_token(), "at_1");

        store.clear().await.unwrap();
        assert!(store.get().await.is_none());
    }

    #[tokio::test]
    async fn set_keeps_fields_written_by_other_programs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        let store = FileCredentialStore::open(path.clone()).await.unwrap();
        store.set(&CredentialPair::new("at_1", "rt_1")).await.unwrap();

        tokio::fs::write(
            &path,
            r#"{"accessToken":"at_1","refreshToken":"rt_1","theme":"dark"}"#,
        )
        .await
        .unwrap();
        store.set(&CredentialPair::new("at_2", "rt_2")).await.unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let record: Value = serde_json::from_str(&contents).unwrap();
        assert_eq!(record["accessToken"], "at_2");
        assert_eq!(record["theme"], "dark");
    }

    #[tokio::test]
    async fn replace_if_skips_cleared_session() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        let store = FileCredentialStore::open(path.clone()).await.unwrap();
        store
            .set_session(&CredentialPair::new("at_1", "rt_1"), &user())
            .await
            .unwrap();
        store.clear().await.unwrap();

        let written = store
            .replace_if("rt_1", &CredentialPair::new("at_2", "rt_2"))
            .await
            .unwrap();

        assert!(!written);
        assert!(store.get().await.is_none());
        assert!(!path.exists(), "a skipped replace must not recreate the file");
    }

    #[tokio::test]
    async fn replace_if_skips_replaced_session() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::open(dir.path().join("session.json"))
            .await
            .unwrap();
        store.set(&CredentialPair::new("at_new", "rt_new")).await.unwrap();

        let written = store
            .replace_if("rt_1", &CredentialPair::new("at_2", "rt_2"))
            .await
            .unwrap();

        assert!(!written);
        assert_eq!(store.get().await.unwrap().access_token(), "at_new");
    }

    #[tokio::test]
    async fn replace_if_and_clear_if_apply_on_match() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::open(dir.path().join("session.json"))
            .await
            .unwrap();
        store
            .set_session(&CredentialPair::new("at_1", "rt_1"), &user())
            .await
            .unwrap();

        let refreshed = CredentialPair::new("at_2", "rt_2");
        assert!(store.replace_if("rt_1", &refreshed).await.unwrap());
        assert_eq!(store.get().await.unwrap(), refreshed);
        assert_eq!(store.user().await.unwrap(), user());

        assert!(!store.clear_if("rt_1").await.unwrap());
        assert!(store.get().await.is_some());
        assert!(store.clear_if("rt_2").await.unwrap());
        assert!(store.get().await.is_none());
    }

    #[tokio::test]
    async fn memory_store_conditional_writes() {
        let store = MemoryCredentialStore::with_pair(CredentialPair::new("at_1", "rt_1"));

        let stray = CredentialPair::new("at_x", "rt_x");
        assert!(!store.replace_if("rt_other", &stray).await.unwrap());
        let refreshed = CredentialPair::new("at_2", "rt_2");
        assert!(store.replace_if("rt_1", &refreshed).await.unwrap());
        assert_eq!(store.get().await.unwrap().access_token(), "at_2");

        assert!(!store.clear_if("rt_1").await.unwrap());
        assert!(store.clear_if("rt_2").await.unwrap());
        assert!(!store.clear_if("rt_2").await.unwrap());
        assert!(store.get().await.is_none());
    }

    #[test]
    fn pair_debug_is_redacted() {
        let debug = format!("{:?}", CredentialPair::new("at_secret", "rt_secret"));
        assert!(!debug.contains("at_secret"));
        assert!(!debug.contains("rt_secret"));
    }
}
