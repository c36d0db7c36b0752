mod model;
mod result;
mod state;

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use sqlx::{Connection, QueryBuilder, Sqlite, SqliteConnection};
use state::StoreState;
use time::OffsetDateTime;
use tracing::{debug, info};

use crate::error::{GraderError, Result};
use crate::models::{Category, Classification, ClassificationResult};
use model::{ResultRow, contains_pattern, to_nanos};

pub use result::{ResultRepository, ResultStats};

const SELECT_RESULTS: &str = r#"SELECT
    id, class_name, class_index, confidence, category,
    is_poisonous, grade, image_path, timestamp, notes
FROM classification_results"#;
const NEWEST_FIRST: &str = " ORDER BY timestamp DESC, id ASC";
const POISONOUS: &str = "is_poisonous = 1";
const EDIBLE: &str = "is_poisonous = 0 AND category <> 'POISONOUS'";

enum Filter<'a> {
    All,
    Category(Category),
    Poisonous,
    Edible,
    NameContains(&'a str),
}

impl Filter<'_> {
    fn push_where(&self, query: &mut QueryBuilder<'_, Sqlite>) {
        match self {
            Filter::All => {}
            Filter::Category(category) => {
                query.push(" WHERE category = ").push_bind(category.as_str());
            }
            Filter::Poisonous => {
                query.push(" WHERE ").push(POISONOUS);
            }
            Filter::Edible => {
                query.push(" WHERE ").push(EDIBLE);
            }
            Filter::NameContains(needle) => {
                query
                    .push(" WHERE class_name LIKE ")
                    .push_bind(contains_pattern(needle))
                    .push(r" ESCAPE '\'");
            }
        }
    }
}

/// SQLite-backed classification history, opened once and shared by cloning.
#[derive(Debug, Clone)]
pub struct ResultStore {
    state: Arc<StoreState>,
}

impl ResultStore {
    /// Open (or create) the database file and apply pending migrations.
    pub async fn open<P: AsRef<Path>>(database_file: P) -> Result<Self> {
        Ok(Self {
            state: Arc::new(StoreState::open(database_file).await?),
        })
    }

    pub fn database_file(&self) -> &Path {
        self.state.database_file()
    }

    /// Directory next to the database that holds archived source images.
    pub fn images_dir(&self) -> &Path {
        self.state.images_dir()
    }

    /// Copy a source image into the archive, returning the archived path.
    pub async fn archive_image<P: AsRef<Path>>(&self, image_path: P) -> Result<PathBuf> {
        let archived = self.state.store_image(image_path).await?;
        debug!("Archived image as {:?}", archived);
        Ok(archived)
    }

    /// Flush and close the database. Later calls on any clone fail.
    pub async fn close(&self) -> Result<()> {
        self.state.close().await
    }

    async fn fetch_results(
        &self,
        filter: Filter<'_>,
        limit: Option<u32>,
    ) -> Result<Vec<ClassificationResult>> {
        let mut query = QueryBuilder::<Sqlite>::new(SELECT_RESULTS);
        filter.push_where(&mut query);
        query.push(NEWEST_FIRST);
        if let Some(limit) = limit {
            query.push(" LIMIT ").push_bind(i64::from(limit));
        }

        let mut conn = self.state.conn().await?;
        query
            .build_query_as::<ResultRow>()
            .fetch_all(&mut **conn)
            .await?
            .into_iter()
            .map(ClassificationResult::try_from)
            .collect()
    }

    async fn count_where(&self, filter: Filter<'_>) -> Result<u64> {
        let mut query = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM classification_results");
        filter.push_where(&mut query);

        let mut conn = self.state.conn().await?;
        let count: i64 = query.build_query_scalar().fetch_one(&mut **conn).await?;
        Ok(count.max(0) as u64)
    }

    async fn delete_returning_images(&self, sql: &str, bind: Option<i64>) -> Result<u64> {
        let mut conn = self.state.writer().await?;
        let mut query = sqlx::query_scalar::<_, Option<String>>(sql);
        if let Some(value) = bind {
            query = query.bind(value);
        }
        let image_paths = query.fetch_all(&mut **conn).await?;
        let deleted = image_paths.len() as u64;

        let mut image_paths: Vec<String> = image_paths.into_iter().flatten().collect();
        image_paths.sort_unstable();
        image_paths.dedup();

        // A file another record still points at is kept.
        let mut unreferenced = Vec::with_capacity(image_paths.len());
        for path in image_paths {
            let referenced: bool = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM classification_results WHERE image_path = $1)",
            )
            .bind(path.as_str())
            .fetch_one(&mut **conn)
            .await?;
            if !referenced {
                unreferenced.push(PathBuf::from(path));
            }
        }
        self.state.delete_archived_images(unreferenced).await;
        Ok(deleted)
    }
}

async fn insert_row(conn: &mut SqliteConnection, result: &Classification) -> Result<i64> {
    let image_path = result
        .image_path
        .as_ref()
        .map(|path| path.to_string_lossy().into_owned());
    let id = sqlx::query_scalar::<_, i64>(
        r#"INSERT INTO classification_results
        (class_name, class_index, confidence, category, is_poisonous, grade, image_path, timestamp, notes)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING id"#,
    )
    .bind(result.class_name.as_str())
    .bind(i64::from(result.class_index))
    .bind(f64::from(result.confidence))
    .bind(result.category.as_str())
    .bind(result.is_poisonous)
    .bind(result.grade.as_deref())
    .bind(image_path)
    .bind(to_nanos(result.timestamp)?)
    .bind(result.notes.as_deref())
    .fetch_one(conn)
    .await?;
    Ok(id)
}

async fn select_by_id(conn: &mut SqliteConnection, id: i64) -> Result<Option<ClassificationResult>> {
    let sql = format!("{} WHERE id = $1", SELECT_RESULTS);
    sqlx::query_as::<_, ResultRow>(&sql)
        .bind(id)
        .fetch_optional(conn)
        .await?
        .map(ClassificationResult::try_from)
        .transpose()
}

impl ResultRepository for ResultStore {
    async fn insert(&self, result: &Classification) -> Result<i64> {
        let mut conn = self.state.writer().await?;
        let id = insert_row(&mut conn, result).await?;
        debug!("Stored result {} ({})", id, result.class_name);
        Ok(id)
    }

    async fn insert_many(&self, results: &[Classification]) -> Result<Vec<i64>> {
        let mut conn = self.state.writer().await?;
        let mut tx = conn.begin().await?;
        let mut ids = Vec::with_capacity(results.len());
        for result in results {
            ids.push(insert_row(&mut tx, result).await?);
        }
        tx.commit().await?;
        debug!("Stored {} results", ids.len());
        Ok(ids)
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<ClassificationResult>> {
        let mut conn = self.state.conn().await?;
        select_by_id(&mut conn, id).await
    }

    async fn list_all(&self) -> Result<Vec<ClassificationResult>> {
        self.fetch_results(Filter::All, None).await
    }

    async fn list_recent(&self, limit: u32) -> Result<Vec<ClassificationResult>> {
        self.fetch_results(Filter::All, Some(limit)).await
    }

    async fn list_by_category(&self, category: Category) -> Result<Vec<ClassificationResult>> {
        self.fetch_results(Filter::Category(category), None).await
    }

    async fn list_poisonous(&self) -> Result<Vec<ClassificationResult>> {
        self.fetch_results(Filter::Poisonous, None).await
    }

    async fn list_edible(&self) -> Result<Vec<ClassificationResult>> {
        self.fetch_results(Filter::Edible, None).await
    }

    async fn search_by_name(&self, needle: &str) -> Result<Vec<ClassificationResult>> {
        self.fetch_results(Filter::NameContains(needle), None).await
    }

    async fn count_all(&self) -> Result<u64> {
        self.count_where(Filter::All).await
    }

    async fn count_poisonous(&self) -> Result<u64> {
        self.count_where(Filter::Poisonous).await
    }

    async fn count_edible(&self) -> Result<u64> {
        self.count_where(Filter::Edible).await
    }

    async fn stats(&self) -> Result<ResultStats> {
        let totals_sql = format!(
            "SELECT COUNT(*), COALESCE(SUM({}), 0), COALESCE(SUM({}), 0) FROM classification_results",
            POISONOUS, EDIBLE
        );

        let mut conn = self.state.conn().await?;
        // One read transaction so the totals and the breakdown agree.
        let mut tx = conn.begin().await?;
        let (total, poisonous, edible): (i64, i64, i64) =
            sqlx::query_as(&totals_sql).fetch_one(&mut *tx).await?;
        let per_category: Vec<(String, i64)> = sqlx::query_as(
            "SELECT category, COUNT(*) FROM classification_results GROUP BY category",
        )
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;

        let mut by_category = BTreeMap::new();
        for (category, count) in per_category {
            by_category.insert(category.parse::<Category>()?, count.max(0) as u64);
        }
        Ok(ResultStats {
            total: total.max(0) as u64,
            poisonous: poisonous.max(0) as u64,
            edible: edible.max(0) as u64,
            by_category,
        })
    }

    async fn attach_image_path(&self, id: i64, path: &Path) -> Result<ClassificationResult> {
        let path = path.to_string_lossy().into_owned();
        let mut conn = self.state.writer().await?;
        let updated = sqlx::query(
            "UPDATE classification_results SET image_path = $1 WHERE id = $2 AND image_path IS NULL",
        )
        .bind(path)
        .bind(id)
        .execute(&mut **conn)
        .await?
        .rows_affected();

        let current = select_by_id(&mut conn, id).await?;
        match (updated, current) {
            (_, None) => Err(GraderError::NotFound(id)),
            (0, Some(_)) => Err(GraderError::ImagePathAlreadySet(id)),
            (_, Some(result)) => Ok(result),
        }
    }

    async fn attach_notes(&self, id: i64, notes: &str) -> Result<ClassificationResult> {
        let mut conn = self.state.writer().await?;
        sqlx::query("UPDATE classification_results SET notes = $1 WHERE id = $2")
            .bind(notes)
            .bind(id)
            .execute(&mut **conn)
            .await?;
        select_by_id(&mut conn, id)
            .await?
            .ok_or(GraderError::NotFound(id))
    }

    async fn delete_by_id(&self, id: i64) -> Result<bool> {
        let deleted = self
            .delete_returning_images(
                "DELETE FROM classification_results WHERE id = $1 RETURNING image_path",
                Some(id),
            )
            .await?;
        if deleted > 0 {
            info!("Deleted result {}", id);
        }
        Ok(deleted > 0)
    }

    async fn delete_all(&self) -> Result<u64> {
        let deleted = self
            .delete_returning_images("DELETE FROM classification_results RETURNING image_path", None)
            .await?;
        info!("Deleted all {} results", deleted);
        Ok(deleted)
    }

    async fn delete_older_than(&self, timestamp: OffsetDateTime) -> Result<u64> {
        let deleted = self
            .delete_returning_images(
                "DELETE FROM classification_results WHERE timestamp < $1 RETURNING image_path",
                Some(to_nanos(timestamp)?),
            )
            .await?;
        info!("Deleted {} results older than {}", deleted, timestamp);
        Ok(deleted)
    }
}
