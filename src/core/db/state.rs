use sqlx::{
    Sqlite,
    pool::PoolConnection,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous},
};
use tokio::{
    fs as async_fs,
    sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard},
};
use tracing::{debug, info, warn};

use std::{
    ops::{Deref, DerefMut},
    path::{Component, Path, PathBuf},
    time::Duration,
};
use uuid::Uuid;

use crate::error::{GraderError, Result};

const IMAGE_DIR_NAME: &str = "images";
const MAX_CONNECTIONS: u32 = 5;

pub(super) struct StoreState {
    database_file: PathBuf,
    images_dir: PathBuf,
    pool: RwLock<SqlitePool>,
    write_gate: Mutex<()>,
}

impl std::fmt::Debug for StoreState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreState")
            .field("database_file", &self.database_file)
            .field("images_dir", &self.images_dir)
            .finish()
    }
}

impl StoreState {
    pub(super) async fn open<P: AsRef<Path>>(database_file: P) -> Result<Self> {
        let database_file = database_file.as_ref().to_path_buf();
        let parent = database_file
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        async_fs::create_dir_all(&parent).await?;

        let connect_opts = SqliteConnectOptions::new()
            .filename(&database_file)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(connect_opts)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        info!("Opened result store {}", database_file.display());

        Ok(Self {
            database_file,
            images_dir: parent.join(IMAGE_DIR_NAME),
            pool: RwLock::new(pool),
            write_gate: Mutex::new(()),
        })
    }

    pub(super) fn database_file(&self) -> &Path {
        &self.database_file
    }

    pub(super) fn images_dir(&self) -> &Path {
        &self.images_dir
    }

    /// Acquire a pooled connection and hold the pool read lock for the entire lifetime
    /// of the returned guard.
    pub(super) async fn conn(&self) -> Result<DbConnGuard<'_>> {
        let pool_guard = self.pool.read().await;
        let conn = pool_guard.acquire().await?;
        Ok(DbConnGuard {
            _pool_guard: pool_guard,
            conn,
        })
    }

    /// Like [`conn`](Self::conn), but also holds the single-writer gate so
    /// writes never interleave.
    pub(super) async fn writer(&self) -> Result<WriteGuard<'_>> {
        let gate = self.write_gate.lock().await;
        let conn = self.conn().await?;
        Ok(WriteGuard { _gate: gate, conn })
    }

    /// Copy an image into the archive directory under a fresh name.
    pub(super) async fn store_image<P: AsRef<Path>>(&self, img_path: P) -> Result<PathBuf> {
        let img_path = img_path.as_ref();
        async_fs::create_dir_all(&self.images_dir).await?;

        let img_fname = match img_path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) => format!("{}.{}", Uuid::new_v4(), ext),
            None => Uuid::new_v4().to_string(),
        };
        let dest_path = self.images_dir.join(&img_fname);
        async_fs::copy(img_path, &dest_path).await.map_err(|e| {
            GraderError::Io(std::io::Error::new(
                e.kind(),
                format!(
                    "Failed to copy image from {:?} to {:?}: {}",
                    img_path, dest_path, e
                ),
            ))
        })?;
        Ok(dest_path)
    }

    /// Whether `path` names a file directly inside the archive directory.
    fn is_archived(&self, path: &Path) -> bool {
        let Ok(rest) = path.strip_prefix(&self.images_dir) else {
            return false;
        };
        let mut components = rest.components();
        matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        )
    }

    /// Remove archived copies. Paths outside the archive are left alone.
    pub(super) async fn delete_archived_images(&self, paths: impl IntoIterator<Item = PathBuf>) {
        for path in paths {
            if !self.is_archived(&path) {
                debug!("Keeping {:?}, it is not an archived image", path);
                continue;
            }
            if let Err(e) = async_fs::remove_file(&path).await {
                warn!("Failed to delete archived image {:?}: {}", path, e);
            }
        }
    }

    /// Waits for in-flight queries, checkpoints the WAL and closes the pool.
    pub(super) async fn close(&self) -> Result<()> {
        let pool_guard = self.pool.write().await;
        if pool_guard.is_closed() {
            return Ok(());
        }
        sqlx::query("PRAGMA wal_checkpoint(TRUNCATE);")
            .execute(&*pool_guard)
            .await?;
        pool_guard.close().await;
        info!("Closed result store {}", self.database_file.display());
        Ok(())
    }
}

pub struct DbConnGuard<'a> {
    _pool_guard: RwLockReadGuard<'a, SqlitePool>,
    conn: PoolConnection<Sqlite>,
}

impl<'a> Deref for DbConnGuard<'a> {
    type Target = PoolConnection<Sqlite>;
    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl<'a> DerefMut for DbConnGuard<'a> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.conn
    }
}

pub struct WriteGuard<'a> {
    _gate: MutexGuard<'a, ()>,
    conn: DbConnGuard<'a>,
}

impl<'a> Deref for WriteGuard<'a> {
    type Target = PoolConnection<Sqlite>;
    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl<'a> DerefMut for WriteGuard<'a> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.conn
    }
}
