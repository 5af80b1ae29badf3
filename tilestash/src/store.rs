//! SQLite-backed persistent store for regions and cached resources.
//!
//! One database file holds three tables: the region records, the shared
//! resource cache keyed by `(url, kind)`, and the ownership table mapping
//! resources to the regions that pinned them. A resource's reference count is
//! its number of ownership rows; rows with no owner form the ambient cache.
//!
//! The pool is limited to a single connection, which serializes all writes to
//! the shared database file.

use std::path::Path;
use std::str::FromStr;

use bytes::Bytes;
use log::debug;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{ConnectOptions, Connection, Row, SqliteConnection};

use crate::error::OfflineError;
use crate::time::unix_now;
use crate::region::{Region, RegionDefinition, RegionId};
use crate::resource::{Resource, ResourceKind};

/// A resource row read back from the cache.
#[derive(Debug, Clone)]
pub(crate) struct CachedResource {
    pub data: Bytes,
    pub expires: Option<i64>,
    pub must_revalidate: bool,
}

/// Cache metadata of a resource, without its payload.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ResourceMeta {
    pub size: u64,
    pub expires: Option<i64>,
    pub must_revalidate: bool,
}

fn is_fresh(expires: Option<i64>, must_revalidate: bool, now: i64) -> bool {
    !must_revalidate && expires.map(|at| at > now).unwrap_or(true)
}

impl CachedResource {
    pub fn is_fresh(&self, now: i64) -> bool {
        is_fresh(self.expires, self.must_revalidate, now)
    }
}

impl ResourceMeta {
    pub fn is_fresh(&self, now: i64) -> bool {
        is_fresh(self.expires, self.must_revalidate, now)
    }
}

/// Per-region aggregate of the ownership table.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct RegionCounts {
    pub resources: u64,
    pub resource_size: u64,
    pub tiles: u64,
    pub tile_size: u64,
}

/// Persistent store shared by all offline regions and the ambient cache.
pub(crate) struct OfflineStore {
    pool: SqlitePool,
}

impl OfflineStore {
    /// Opens (or creates) the store at the given database path.
    pub async fn open(path: &Path) -> Result<Self, OfflineError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let store = Self::connect(options).await?;
        debug!("Opened offline store at {path:?}");
        Ok(store)
    }

    /// Opens a store backed by a private in-memory database.
    pub async fn in_memory() -> Result<Self, OfflineError> {
        Self::connect(SqliteConnectOptions::from_str("sqlite::memory:")?).await
    }

    async fn connect(options: SqliteConnectOptions) -> Result<Self, OfflineError> {
        // A single connection both serializes writes and keeps in-memory
        // databases alive for the lifetime of the pool.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), OfflineError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS regions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                definition TEXT NOT NULL,
                metadata BLOB NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS resources (
                url TEXT NOT NULL,
                kind INTEGER NOT NULL,
                data BLOB NOT NULL,
                size INTEGER NOT NULL,
                is_tile INTEGER NOT NULL,
                expires INTEGER,
                must_revalidate INTEGER NOT NULL DEFAULT 0,
                accessed INTEGER NOT NULL,
                PRIMARY KEY (url, kind)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS region_resources (
                region_id INTEGER NOT NULL,
                url TEXT NOT NULL,
                kind INTEGER NOT NULL,
                PRIMARY KEY (region_id, url, kind)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn create_region(
        &self,
        definition: &RegionDefinition,
        metadata: &[u8],
    ) -> Result<Region, OfflineError> {
        let json = definition.to_json()?;
        let result = sqlx::query("INSERT INTO regions (definition, metadata) VALUES (?1, ?2)")
            .bind(&json)
            .bind(metadata)
            .execute(&self.pool)
            .await?;

        let id = RegionId::new(result.last_insert_rowid());
        debug!("Created offline region {id}");
        Ok(Region::new(id, definition.clone(), metadata.to_vec()))
    }

    pub async fn list_regions(&self) -> Result<Vec<Region>, OfflineError> {
        let rows = sqlx::query("SELECT id, definition, metadata FROM regions ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(region_from_row).collect()
    }

    pub async fn get_region(&self, id: RegionId) -> Result<Option<Region>, OfflineError> {
        let row = sqlx::query("SELECT id, definition, metadata FROM regions WHERE id = ?1")
            .bind(id.value())
            .fetch_optional(&self.pool)
            .await?;

        row.map(region_from_row).transpose()
    }

    pub async fn update_metadata(
        &self,
        id: RegionId,
        metadata: &[u8],
    ) -> Result<Vec<u8>, OfflineError> {
        let result = sqlx::query("UPDATE regions SET metadata = ?1 WHERE id = ?2")
            .bind(metadata)
            .bind(id.value())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(OfflineError::RegionNotFound(id));
        }
        Ok(metadata.to_vec())
    }

    /// Deletes a region record and evicts resources it was the last owner of.
    pub async fn delete_region(&self, id: RegionId) -> Result<(), OfflineError> {
        let mut tx = self.pool.begin().await?;

        let exists = sqlx::query("SELECT 1 FROM regions WHERE id = ?1")
            .bind(id.value())
            .fetch_optional(&mut *tx)
            .await?
            .is_some();
        if !exists {
            return Err(OfflineError::RegionNotFound(id));
        }

        sqlx::query(
            r#"
            DELETE FROM resources WHERE rowid IN (
                SELECT r.rowid
                FROM resources r
                JOIN region_resources owned
                    ON owned.url = r.url AND owned.kind = r.kind AND owned.region_id = ?1
                WHERE NOT EXISTS (
                    SELECT 1 FROM region_resources other
                    WHERE other.url = r.url AND other.kind = r.kind AND other.region_id <> ?1
                )
            )
            "#,
        )
        .bind(id.value())
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM region_resources WHERE region_id = ?1")
            .bind(id.value())
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM regions WHERE id = ?1")
            .bind(id.value())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        debug!("Deleted offline region {id}");
        Ok(())
    }

    /// Flags every resource the region owns for a freshness re-check.
    pub async fn invalidate_region(&self, id: RegionId) -> Result<(), OfflineError> {
        sqlx::query(
            r#"
            UPDATE resources SET must_revalidate = 1
            WHERE EXISTS (
                SELECT 1 FROM region_resources rr
                WHERE rr.region_id = ?1 AND rr.url = resources.url AND rr.kind = resources.kind
            )
            "#,
        )
        .bind(id.value())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_resource(
        &self,
        resource: &Resource,
    ) -> Result<Option<CachedResource>, OfflineError> {
        let row = sqlx::query(
            "SELECT data, expires, must_revalidate FROM resources WHERE url = ?1 AND kind = ?2",
        )
        .bind(resource.url())
        .bind(resource.kind().to_db())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        sqlx::query("UPDATE resources SET accessed = ?1 WHERE url = ?2 AND kind = ?3")
            .bind(unix_now())
            .bind(resource.url())
            .bind(resource.kind().to_db())
            .execute(&self.pool)
            .await?;

        let data: Vec<u8> = row.try_get("data")?;
        Ok(Some(CachedResource {
            data: data.into(),
            expires: row.try_get("expires")?,
            must_revalidate: row.try_get::<i64, _>("must_revalidate")? != 0,
        }))
    }

    pub async fn resource_meta(
        &self,
        resource: &Resource,
    ) -> Result<Option<ResourceMeta>, OfflineError> {
        let row = sqlx::query(
            "SELECT size, expires, must_revalidate FROM resources WHERE url = ?1 AND kind = ?2",
        )
        .bind(resource.url())
        .bind(resource.kind().to_db())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row
            .map(|row| {
                Ok::<_, OfflineError>(ResourceMeta {
                    size: row.try_get::<i64, _>("size")? as u64,
                    expires: row.try_get("expires")?,
                    must_revalidate: row.try_get::<i64, _>("must_revalidate")? != 0,
                })
            })
            .transpose()?)
    }

    /// Inserts or replaces a cached resource. Clears any revalidation flag.
    pub async fn put_resource(
        &self,
        resource: &Resource,
        data: &[u8],
        expires: Option<i64>,
    ) -> Result<(), OfflineError> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO resources
                (url, kind, data, size, is_tile, expires, must_revalidate, accessed)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7)
            "#,
        )
        .bind(resource.url())
        .bind(resource.kind().to_db())
        .bind(data)
        .bind(data.len() as i64)
        .bind(resource.kind().is_tile() as i64)
        .bind(expires)
        .bind(unix_now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Adds an ownership row. Returns `true` if the region did not own the
    /// resource before.
    pub async fn mark_owned(
        &self,
        id: RegionId,
        resource: &Resource,
    ) -> Result<bool, OfflineError> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO region_resources (region_id, url, kind) VALUES (?1, ?2, ?3)",
        )
        .bind(id.value())
        .bind(resource.url())
        .bind(resource.kind().to_db())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn region_counts(&self, id: RegionId) -> Result<RegionCounts, OfflineError> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS resources,
                COALESCE(SUM(r.size), 0) AS resource_size,
                COALESCE(SUM(r.is_tile), 0) AS tiles,
                COALESCE(SUM(CASE WHEN r.is_tile = 1 THEN r.size ELSE 0 END), 0) AS tile_size
            FROM region_resources rr
            JOIN resources r ON r.url = rr.url AND r.kind = rr.kind
            WHERE rr.region_id = ?1
            "#,
        )
        .bind(id.value())
        .fetch_one(&self.pool)
        .await?;

        Ok(RegionCounts {
            resources: row.try_get::<i64, _>("resources")? as u64,
            resource_size: row.try_get::<i64, _>("resource_size")? as u64,
            tiles: row.try_get::<i64, _>("tiles")? as u64,
            tile_size: row.try_get::<i64, _>("tile_size")? as u64,
        })
    }

    /// Imports regions and resources from another database of the same schema.
    ///
    /// The side database is opened on its own connection and copied through
    /// the local pool, so the import works the same for file-backed and
    /// in-memory stores. Resources already present locally are not copied
    /// again; imported regions get fresh local identifiers.
    pub async fn merge(&self, path: &Path) -> Result<Vec<Region>, OfflineError> {
        let mut side = SqliteConnectOptions::new().filename(path).connect().await?;
        let result = self.merge_from(&mut side).await;
        let _ = side.close().await;
        result
    }

    async fn merge_from(&self, side: &mut SqliteConnection) -> Result<Vec<Region>, OfflineError> {
        let resource_rows = sqlx::query(
            "SELECT url, kind, data, size, is_tile, expires, must_revalidate FROM resources",
        )
        .fetch_all(&mut *side)
        .await?;
        let region_rows = sqlx::query("SELECT id, definition, metadata FROM regions ORDER BY id")
            .fetch_all(&mut *side)
            .await?;

        // Deserialize every side region before touching the local database,
        // so a corrupt side row imports nothing.
        let mut side_regions = Vec::with_capacity(region_rows.len());
        for row in region_rows {
            let side_id: i64 = row.try_get("id")?;
            let definition_json: String = row.try_get("definition")?;
            let metadata: Vec<u8> = row.try_get("metadata")?;
            let definition = RegionDefinition::from_json(&definition_json)?;

            let owned = sqlx::query("SELECT url, kind FROM region_resources WHERE region_id = ?1")
                .bind(side_id)
                .fetch_all(&mut *side)
                .await?
                .into_iter()
                .map(|row| {
                    Ok::<_, OfflineError>((
                        row.try_get::<String, _>("url")?,
                        row.try_get::<i64, _>("kind")?,
                    ))
                })
                .collect::<Result<Vec<_>, _>>()?;

            side_regions.push((definition_json, definition, metadata, owned));
        }

        // All writes land in one transaction: a failed import leaves the
        // local store untouched.
        let mut tx = self.pool.begin().await?;
        let now = unix_now();
        for row in &resource_rows {
            sqlx::query(
                r#"
                INSERT OR IGNORE INTO resources
                    (url, kind, data, size, is_tile, expires, must_revalidate, accessed)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
            )
            .bind(row.try_get::<String, _>("url")?)
            .bind(row.try_get::<i64, _>("kind")?)
            .bind(row.try_get::<Vec<u8>, _>("data")?)
            .bind(row.try_get::<i64, _>("size")?)
            .bind(row.try_get::<i64, _>("is_tile")?)
            .bind(row.try_get::<Option<i64>, _>("expires")?)
            .bind(row.try_get::<i64, _>("must_revalidate")?)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        let mut merged = Vec::with_capacity(side_regions.len());
        for (definition_json, definition, metadata, owned) in side_regions {
            let result = sqlx::query("INSERT INTO regions (definition, metadata) VALUES (?1, ?2)")
                .bind(&definition_json)
                .bind(&metadata)
                .execute(&mut *tx)
                .await?;
            let new_id = result.last_insert_rowid();

            for (url, kind) in owned {
                sqlx::query(
                    "INSERT OR IGNORE INTO region_resources (region_id, url, kind) VALUES (?1, ?2, ?3)",
                )
                .bind(new_id)
                .bind(&url)
                .bind(kind)
                .execute(&mut *tx)
                .await?;
            }

            merged.push(Region::new(RegionId::new(new_id), definition, metadata));
        }
        tx.commit().await?;

        debug!("Merged {} regions from side database", merged.len());
        Ok(merged)
    }

    /// Flags all resources not owned by any region for revalidation.
    pub async fn invalidate_ambient(&self) -> Result<(), OfflineError> {
        sqlx::query(
            r#"
            UPDATE resources SET must_revalidate = 1
            WHERE NOT EXISTS (
                SELECT 1 FROM region_resources rr
                WHERE rr.url = resources.url AND rr.kind = resources.kind
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Removes all resources not owned by any region.
    pub async fn clear_ambient(&self) -> Result<(), OfflineError> {
        sqlx::query(
            r#"
            DELETE FROM resources
            WHERE NOT EXISTS (
                SELECT 1 FROM region_resources rr
                WHERE rr.url = resources.url AND rr.kind = resources.kind
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn ambient_size(&self) -> Result<u64, OfflineError> {
        let size: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(size), 0) FROM resources
            WHERE NOT EXISTS (
                SELECT 1 FROM region_resources rr
                WHERE rr.url = resources.url AND rr.kind = resources.kind
            )
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(size as u64)
    }

    /// Evicts least-recently-accessed unowned resources until the ambient
    /// cache fits the given byte limit. Returns the number of bytes freed.
    pub async fn evict_ambient_to(&self, limit: u64) -> Result<u64, OfflineError> {
        let mut size = self.ambient_size().await?;
        let mut freed = 0u64;

        while size > limit {
            let row = sqlx::query(
                r#"
                SELECT url, kind, size FROM resources
                WHERE NOT EXISTS (
                    SELECT 1 FROM region_resources rr
                    WHERE rr.url = resources.url AND rr.kind = resources.kind
                )
                ORDER BY accessed ASC, url ASC
                LIMIT 1
                "#,
            )
            .fetch_optional(&self.pool)
            .await?;

            let Some(row) = row else {
                break;
            };
            let url: String = row.try_get("url")?;
            let kind = ResourceKind::from_db(row.try_get("kind")?).ok_or_else(|| {
                OfflineError::Generic("unknown resource kind in cache".to_string())
            })?;
            let resource = Resource::new(kind, url);
            let row_size = row.try_get::<i64, _>("size")? as u64;

            sqlx::query("DELETE FROM resources WHERE url = ?1 AND kind = ?2")
                .bind(resource.url())
                .bind(resource.kind().to_db())
                .execute(&self.pool)
                .await?;

            debug!("Evicted ambient cache entry {resource}");
            freed += row_size;
            size = size.saturating_sub(row_size);
        }

        Ok(freed)
    }

    /// Total byte size of all cached resource payloads, owned and ambient.
    pub async fn total_size(&self) -> Result<u64, OfflineError> {
        let size: i64 = sqlx::query_scalar("SELECT COALESCE(SUM(size), 0) FROM resources")
            .fetch_one(&self.pool)
            .await?;
        Ok(size as u64)
    }

    /// Removes all regions and all cached resources.
    pub async fn reset(&self) -> Result<(), OfflineError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM region_resources")
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM regions").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM resources")
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        self.pack().await
    }

    /// Reclaims free pages in the database file.
    pub async fn pack(&self) -> Result<(), OfflineError> {
        sqlx::query("VACUUM").execute(&self.pool).await?;
        Ok(())
    }
}

fn region_from_row(row: sqlx::sqlite::SqliteRow) -> Result<Region, OfflineError> {
    let id: i64 = row.try_get("id")?;
    let definition_json: String = row.try_get("definition")?;
    let metadata: Vec<u8> = row.try_get("metadata")?;
    let definition = RegionDefinition::from_json(&definition_json)?;
    Ok(Region::new(RegionId::new(id), definition, metadata))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::bounds::LatLonBounds;
    use crate::region::RegionExtent;

    fn definition() -> RegionDefinition {
        RegionDefinition::new(
            "https://styles.test/basic.json",
            RegionExtent::Bounds(LatLonBounds::point(0.0, 0.0)),
            0.0,
            5.0,
            1.0,
            false,
        )
        .expect("definition should be valid")
    }

    fn tile(url: &str) -> Resource {
        Resource::new(ResourceKind::Tile, url)
    }

    #[tokio::test]
    async fn region_crud_round_trip() {
        let store = OfflineStore::in_memory().await.expect("store should open");

        let region = store
            .create_region(&definition(), b"home")
            .await
            .expect("create should succeed");
        let listed = store.list_regions().await.expect("list should succeed");
        assert_eq!(listed, vec![region.clone()]);

        let fetched = store
            .get_region(region.id())
            .await
            .expect("get should succeed");
        assert_eq!(fetched.as_ref(), Some(&region));

        store
            .update_metadata(region.id(), b"work")
            .await
            .expect("update should succeed");
        let fetched = store
            .get_region(region.id())
            .await
            .expect("get should succeed")
            .expect("region should exist");
        assert_eq!(fetched.metadata(), b"work");

        store
            .delete_region(region.id())
            .await
            .expect("delete should succeed");
        assert!(store
            .list_regions()
            .await
            .expect("list should succeed")
            .is_empty());
    }

    #[tokio::test]
    async fn missing_region_operations_fail() {
        let store = OfflineStore::in_memory().await.expect("store should open");
        let id = RegionId::new(42);

        assert_matches!(
            store.update_metadata(id, b"x").await,
            Err(OfflineError::RegionNotFound(_))
        );
        assert_matches!(
            store.delete_region(id).await,
            Err(OfflineError::RegionNotFound(_))
        );
        assert_matches!(store.get_region(id).await, Ok(None));
    }

    #[tokio::test]
    async fn delete_keeps_resources_owned_elsewhere() {
        let store = OfflineStore::in_memory().await.expect("store should open");
        let first = store
            .create_region(&definition(), b"")
            .await
            .expect("create should succeed");
        let second = store
            .create_region(&definition(), b"")
            .await
            .expect("create should succeed");

        let shared = tile("https://tiles.test/1/0/0.pbf");
        let exclusive = tile("https://tiles.test/1/1/0.pbf");
        for resource in [&shared, &exclusive] {
            store
                .put_resource(resource, b"tile-data", None)
                .await
                .expect("put should succeed");
        }
        store
            .mark_owned(first.id(), &shared)
            .await
            .expect("own should succeed");
        store
            .mark_owned(second.id(), &shared)
            .await
            .expect("own should succeed");
        store
            .mark_owned(first.id(), &exclusive)
            .await
            .expect("own should succeed");

        store
            .delete_region(first.id())
            .await
            .expect("delete should succeed");

        assert!(store
            .resource_meta(&shared)
            .await
            .expect("meta should succeed")
            .is_some());
        assert!(store
            .resource_meta(&exclusive)
            .await
            .expect("meta should succeed")
            .is_none());

        let counts = store
            .region_counts(second.id())
            .await
            .expect("counts should succeed");
        assert_eq!(counts.resources, 1);
        assert_eq!(counts.tiles, 1);
    }

    #[tokio::test]
    async fn invalidate_region_flags_owned_resources_only() {
        let store = OfflineStore::in_memory().await.expect("store should open");
        let region = store
            .create_region(&definition(), b"")
            .await
            .expect("create should succeed");

        let owned = tile("https://tiles.test/1/0/0.pbf");
        let ambient = tile("https://tiles.test/9/0/0.pbf");
        store
            .put_resource(&owned, b"a", None)
            .await
            .expect("put should succeed");
        store
            .put_resource(&ambient, b"b", None)
            .await
            .expect("put should succeed");
        store
            .mark_owned(region.id(), &owned)
            .await
            .expect("own should succeed");

        store
            .invalidate_region(region.id())
            .await
            .expect("invalidate should succeed");

        let now = unix_now();
        let owned_meta = store
            .resource_meta(&owned)
            .await
            .expect("meta should succeed")
            .expect("resource should exist");
        assert!(!owned_meta.is_fresh(now));
        let ambient_meta = store
            .resource_meta(&ambient)
            .await
            .expect("meta should succeed")
            .expect("resource should exist");
        assert!(ambient_meta.is_fresh(now));

        // A refetch clears the flag.
        store
            .put_resource(&owned, b"a2", None)
            .await
            .expect("put should succeed");
        let owned_meta = store
            .resource_meta(&owned)
            .await
            .expect("meta should succeed")
            .expect("resource should exist");
        assert!(owned_meta.is_fresh(now));
    }

    #[tokio::test]
    async fn ambient_eviction_spares_owned_resources() {
        let store = OfflineStore::in_memory().await.expect("store should open");
        let region = store
            .create_region(&definition(), b"")
            .await
            .expect("create should succeed");

        let owned = tile("https://tiles.test/owned.pbf");
        store
            .put_resource(&owned, &[0u8; 100], None)
            .await
            .expect("put should succeed");
        store
            .mark_owned(region.id(), &owned)
            .await
            .expect("own should succeed");

        for i in 0..4 {
            let ambient = tile(&format!("https://tiles.test/ambient-{i}.pbf"));
            store
                .put_resource(&ambient, &[0u8; 100], None)
                .await
                .expect("put should succeed");
        }

        assert_eq!(
            store.ambient_size().await.expect("size should succeed"),
            400
        );
        let freed = store
            .evict_ambient_to(150)
            .await
            .expect("eviction should succeed");
        assert_eq!(freed, 300);
        assert_eq!(
            store.ambient_size().await.expect("size should succeed"),
            100
        );
        assert!(store
            .resource_meta(&owned)
            .await
            .expect("meta should succeed")
            .is_some());
    }

    #[tokio::test]
    async fn merge_imports_a_file_database_into_an_in_memory_store() {
        let path = std::env::temp_dir().join(format!(
            "tilestash-store-merge-{}.db",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);

        let resource = tile("https://tiles.test/1/0/0.pbf");
        {
            let side = OfflineStore::open(&path).await.expect("side store should open");
            let region = side
                .create_region(&definition(), b"sideloaded")
                .await
                .expect("create should succeed");
            side.put_resource(&resource, b"tile-data", None)
                .await
                .expect("put should succeed");
            side.mark_owned(region.id(), &resource)
                .await
                .expect("own should succeed");
        }

        let store = OfflineStore::in_memory().await.expect("store should open");
        let merged = store.merge(&path).await.expect("merge should succeed");

        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].metadata(), b"sideloaded");
        let counts = store
            .region_counts(merged[0].id())
            .await
            .expect("counts should succeed");
        assert_eq!(counts.resources, 1);
        assert_eq!(counts.tiles, 1);
        assert!(store
            .resource_meta(&resource)
            .await
            .expect("meta should succeed")
            .is_some());

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn merge_with_a_corrupt_side_region_imports_nothing() {
        let path = std::env::temp_dir().join(format!(
            "tilestash-store-merge-corrupt-{}.db",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);

        {
            let side = OfflineStore::open(&path).await.expect("side store should open");
            let region = side
                .create_region(&definition(), b"good")
                .await
                .expect("create should succeed");
            let resource = tile("https://tiles.test/1/0/0.pbf");
            side.put_resource(&resource, b"tile-data", None)
                .await
                .expect("put should succeed");
            side.mark_owned(region.id(), &resource)
                .await
                .expect("own should succeed");
            sqlx::query("INSERT INTO regions (definition, metadata) VALUES ('not json', ?1)")
                .bind(Vec::<u8>::new())
                .execute(&side.pool)
                .await
                .expect("insert should succeed");
        }

        let store = OfflineStore::in_memory().await.expect("store should open");
        let result = store.merge(&path).await;
        assert_matches!(result, Err(OfflineError::Serialization(_)));

        // Neither the valid region nor any resource landed locally.
        assert!(store
            .list_regions()
            .await
            .expect("list should succeed")
            .is_empty());
        assert_eq!(store.total_size().await.expect("size should succeed"), 0);

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn reset_clears_everything() {
        let store = OfflineStore::in_memory().await.expect("store should open");
        let region = store
            .create_region(&definition(), b"")
            .await
            .expect("create should succeed");
        let resource = tile("https://tiles.test/1/0/0.pbf");
        store
            .put_resource(&resource, b"data", None)
            .await
            .expect("put should succeed");
        store
            .mark_owned(region.id(), &resource)
            .await
            .expect("own should succeed");

        store.reset().await.expect("reset should succeed");

        assert!(store
            .list_regions()
            .await
            .expect("list should succeed")
            .is_empty());
        assert_eq!(store.total_size().await.expect("size should succeed"), 0);
    }
}
