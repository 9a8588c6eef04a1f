//! Main store implementation.

use std::path::Path;

use rusqlite::{Connection, ErrorCode, OptionalExtension, Row};
use time::OffsetDateTime;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::models::{
    BlogPost, NewReading, NewSensor, PostInput, PostStatus, StoredReading, StoredSensor,
};
use crate::queries::ReadingQuery;
use crate::schema;

/// Column list matching [`reading_from_row`].
pub(crate) const READING_COLUMNS: &str = "id, sensor_id, slave_id, timestamp, temperature, \
     humidity, air_quality, aqi, aqi_category, aqi_color, co_level, no_level, smoke, \
     latitude, longitude";

const SENSOR_COLUMNS: &str = "id, name, area, latitude, longitude, is_active, created_at";

const POST_COLUMNS: &str = "id, title, slug, author, content, excerpt, image, status, \
     published_at, created_at, updated_at";

/// SQLite-based store for sensors, readings and blog posts.
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        // Create parent directories if needed
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| Error::CreateDirectory {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        info!("Opening database at {}", path.display());
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;

        schema::initialize(&conn)?;

        Ok(Self { conn })
    }

    /// Open the default database location.
    pub fn open_default() -> Result<Self> {
        Self::open(crate::default_db_path())
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        schema::initialize(&conn)?;
        Ok(Self { conn })
    }

    // === Sensor operations ===

    /// Fetch a sensor, creating it from `sensor` when it does not exist yet.
    ///
    /// Returns the stored sensor and whether it was created by this call.
    /// An existing sensor is returned unchanged.
    pub fn get_or_create_sensor(&self, sensor: &NewSensor) -> Result<(StoredSensor, bool)> {
        let inserted = self.conn.execute(
            "INSERT INTO sensors (id, name, area, latitude, longitude, is_active, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6)
             ON CONFLICT(id) DO NOTHING",
            rusqlite::params![
                sensor.id,
                sensor.name,
                sensor.area,
                sensor.latitude,
                sensor.longitude,
                OffsetDateTime::now_utc().unix_timestamp()
            ],
        )?;

        if inserted > 0 {
            debug!("Created sensor {}", sensor.id);
        }

        let stored = self
            .get_sensor(&sensor.id)?
            .ok_or_else(|| Error::SensorNotFound(sensor.id.clone()))?;

        Ok((stored, inserted > 0))
    }

    /// Get a sensor by ID.
    pub fn get_sensor(&self, sensor_id: &str) -> Result<Option<StoredSensor>> {
        let sql = format!("SELECT {SENSOR_COLUMNS} FROM sensors WHERE id = ?");
        let sensor = self
            .conn
            .query_row(&sql, [sensor_id], sensor_from_row)
            .optional()?;
        Ok(sensor)
    }

    /// List sensors ordered by id.
    pub fn list_sensors(&self, active_only: bool) -> Result<Vec<StoredSensor>> {
        let filter = if active_only { "WHERE is_active = 1" } else { "" };
        let sql = format!("SELECT {SENSOR_COLUMNS} FROM sensors {filter} ORDER BY id");

        let mut stmt = self.conn.prepare(&sql)?;
        let sensors = stmt
            .query_map([], sensor_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(sensors)
    }

    // === Reading operations ===

    /// Fetch the reading identified by `(sensor_id, timestamp, slave_id)`,
    /// inserting `reading` when no such row exists.
    ///
    /// Returns the stored reading and whether it was created by this call.
    /// A missing timestamp means "now".
    pub fn get_or_create_reading(&self, reading: &NewReading) -> Result<(StoredReading, bool)> {
        let timestamp = reading
            .timestamp
            .unwrap_or_else(OffsetDateTime::now_utc)
            .unix_timestamp();

        if let Some(existing) = self.find_reading(reading, timestamp)? {
            return Ok((existing, false));
        }

        let id = self.insert_row(reading, timestamp)?;
        let stored = self.get_reading(id)?.ok_or(Error::ReadingNotFound(id))?;
        Ok((stored, true))
    }

    /// Insert a reading, failing with [`Error::DuplicateReading`] when its
    /// `(sensor_id, timestamp, slave_id)` key is already taken.
    pub fn insert_reading(&self, reading: &NewReading) -> Result<StoredReading> {
        let timestamp = reading
            .timestamp
            .unwrap_or_else(OffsetDateTime::now_utc)
            .unix_timestamp();

        // NULL columns never collide under SQLite UNIQUE, so check explicitly
        if self.find_reading(reading, timestamp)?.is_some() {
            return Err(duplicate(reading, timestamp));
        }

        let id = self.insert_row(reading, timestamp)?;
        self.get_reading(id)?.ok_or(Error::ReadingNotFound(id))
    }

    fn find_reading(&self, reading: &NewReading, timestamp: i64) -> Result<Option<StoredReading>> {
        let sql = format!(
            "SELECT {READING_COLUMNS} FROM readings
             WHERE sensor_id IS ?1 AND timestamp = ?2 AND slave_id IS ?3"
        );
        let found = self
            .conn
            .query_row(
                &sql,
                rusqlite::params![reading.sensor_id, timestamp, reading.slave_id],
                reading_from_row,
            )
            .optional()?;
        Ok(found)
    }

    fn insert_row(&self, reading: &NewReading, timestamp: i64) -> Result<i64> {
        let result = self.conn.execute(
            "INSERT INTO readings (sensor_id, slave_id, timestamp, temperature, humidity,
                air_quality, aqi, aqi_category, aqi_color, co_level, no_level, smoke,
                latitude, longitude)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            rusqlite::params![
                reading.sensor_id,
                reading.slave_id,
                timestamp,
                reading.temperature,
                reading.humidity,
                reading.air_quality,
                reading.aqi,
                reading.aqi_category,
                reading.aqi_color,
                reading.co_level,
                reading.no_level,
                reading.smoke,
                reading.latitude,
                reading.longitude,
            ],
        );

        match result {
            Ok(_) => {
                let id = self.conn.last_insert_rowid();
                debug!("Inserted reading {} for {:?}", id, reading.sensor_id);
                Ok(id)
            }
            Err(e) if is_unique_violation(&e) => Err(duplicate(reading, timestamp)),
            Err(e) => Err(e.into()),
        }
    }

    /// Get a reading by its row id.
    pub fn get_reading(&self, id: i64) -> Result<Option<StoredReading>> {
        let sql = format!("SELECT {READING_COLUMNS} FROM readings WHERE id = ?");
        let reading = self
            .conn
            .query_row(&sql, [id], reading_from_row)
            .optional()?;
        Ok(reading)
    }

    /// Query readings with filters.
    pub fn query_readings(&self, query: &ReadingQuery) -> Result<Vec<StoredReading>> {
        let (_, params) = query.build_where();
        let sql = query.build_sql();

        let mut stmt = self.conn.prepare(&sql)?;
        let params_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let readings = stmt
            .query_map(params_refs.as_slice(), reading_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(readings)
    }

    /// Most recent reading of a sensor.
    pub fn latest_reading(&self, sensor_id: &str) -> Result<Option<StoredReading>> {
        let query = ReadingQuery::new().sensor(sensor_id).limit(1);
        Ok(self.query_readings(&query)?.into_iter().next())
    }

    /// Count readings, optionally for one sensor.
    pub fn count_readings(&self, sensor_id: Option<&str>) -> Result<u64> {
        let count: i64 = match sensor_id {
            Some(id) => self.conn.query_row(
                "SELECT COUNT(*) FROM readings WHERE sensor_id = ?",
                [id],
                |row| row.get(0),
            )?,
            None => self
                .conn
                .query_row("SELECT COUNT(*) FROM readings", [], |row| row.get(0))?,
        };
        Ok(count as u64)
    }

    // === Post operations ===

    /// Create a blog post.
    ///
    /// Publishing without an explicit `published_at` stamps the current time.
    pub fn create_post(&self, input: &PostInput) -> Result<BlogPost> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let published_at = publication_time(input, None);

        let result = self.conn.execute(
            "INSERT INTO posts (title, slug, author, content, excerpt, image, status,
                published_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
            rusqlite::params![
                input.title,
                input.slug,
                input.author,
                input.content,
                input.excerpt,
                input.image,
                input.status.as_str(),
                published_at,
                now,
            ],
        );

        match result {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => {
                return Err(Error::DuplicateSlug(input.slug.clone()));
            }
            Err(e) => return Err(e.into()),
        }

        let id = self.conn.last_insert_rowid();
        info!("Created post {} ({})", id, input.slug);
        self.get_post(id)?.ok_or(Error::PostNotFound(id))
    }

    /// Get a post by ID.
    pub fn get_post(&self, id: i64) -> Result<Option<BlogPost>> {
        let sql = format!("SELECT {POST_COLUMNS} FROM posts WHERE id = ?");
        let post = self.conn.query_row(&sql, [id], post_from_row).optional()?;
        Ok(post)
    }

    /// List posts, newest publication first.
    ///
    /// With `published_only`, drafts are skipped.
    pub fn list_posts(&self, published_only: bool) -> Result<Vec<BlogPost>> {
        let filter = if published_only {
            "WHERE status = 'published'"
        } else {
            ""
        };
        let sql = format!(
            "SELECT {POST_COLUMNS} FROM posts {filter}
             ORDER BY published_at IS NULL, published_at DESC, id DESC"
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let posts = stmt
            .query_map([], post_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(posts)
    }

    /// Replace the fields of an existing post.
    pub fn update_post(&self, id: i64, input: &PostInput) -> Result<BlogPost> {
        let existing = self.get_post(id)?.ok_or(Error::PostNotFound(id))?;
        let published_at = publication_time(input, existing.published_at);

        let result = self.conn.execute(
            "UPDATE posts SET title = ?2, slug = ?3, author = ?4, content = ?5, excerpt = ?6,
                image = ?7, status = ?8, published_at = ?9, updated_at = ?10
             WHERE id = ?1",
            rusqlite::params![
                id,
                input.title,
                input.slug,
                input.author,
                input.content,
                input.excerpt,
                input.image,
                input.status.as_str(),
                published_at,
                OffsetDateTime::now_utc().unix_timestamp(),
            ],
        );

        match result {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => {
                return Err(Error::DuplicateSlug(input.slug.clone()));
            }
            Err(e) => return Err(e.into()),
        }

        self.get_post(id)?.ok_or(Error::PostNotFound(id))
    }

    /// Delete a post.
    pub fn delete_post(&self, id: i64) -> Result<()> {
        let deleted = self.conn.execute("DELETE FROM posts WHERE id = ?", [id])?;
        if deleted == 0 {
            return Err(Error::PostNotFound(id));
        }
        info!("Deleted post {}", id);
        Ok(())
    }
}

/// Unix timestamp to store as `published_at`.
///
/// An explicit value wins; otherwise a published post keeps its previous
/// publication time or gets the current time.
fn publication_time(input: &PostInput, previous: Option<OffsetDateTime>) -> Option<i64> {
    if let Some(at) = input.published_at {
        return Some(at.unix_timestamp());
    }
    match input.status {
        PostStatus::Published => Some(
            previous
                .unwrap_or_else(OffsetDateTime::now_utc)
                .unix_timestamp(),
        ),
        PostStatus::Draft => previous.map(|at| at.unix_timestamp()),
    }
}

fn duplicate(reading: &NewReading, timestamp: i64) -> Error {
    Error::DuplicateReading {
        sensor: reading.sensor_id.clone(),
        timestamp,
        slave_id: reading.slave_id,
    }
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == ErrorCode::ConstraintViolation
                && e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

fn timestamp_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<OffsetDateTime> {
    let secs: i64 = row.get(idx)?;
    OffsetDateTime::from_unix_timestamp(secs).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Integer, Box::new(e))
    })
}

fn optional_timestamp_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<OffsetDateTime>> {
    match row.get::<_, Option<i64>>(idx)? {
        Some(_) => timestamp_at(row, idx).map(Some),
        None => Ok(None),
    }
}

fn sensor_from_row(row: &Row<'_>) -> rusqlite::Result<StoredSensor> {
    Ok(StoredSensor {
        id: row.get(0)?,
        name: row.get(1)?,
        area: row.get(2)?,
        latitude: row.get(3)?,
        longitude: row.get(4)?,
        is_active: row.get(5)?,
        created_at: timestamp_at(row, 6)?,
    })
}

fn reading_from_row(row: &Row<'_>) -> rusqlite::Result<StoredReading> {
    Ok(StoredReading {
        id: row.get(0)?,
        sensor_id: row.get(1)?,
        slave_id: row.get(2)?,
        timestamp: timestamp_at(row, 3)?,
        temperature: row.get(4)?,
        humidity: row.get(5)?,
        air_quality: row.get(6)?,
        aqi: row.get(7)?,
        aqi_category: row.get(8)?,
        aqi_color: row.get(9)?,
        co_level: row.get(10)?,
        no_level: row.get(11)?,
        smoke: row.get(12)?,
        latitude: row.get(13)?,
        longitude: row.get(14)?,
    })
}

fn post_from_row(row: &Row<'_>) -> rusqlite::Result<BlogPost> {
    let status: String = row.get(7)?;
    Ok(BlogPost {
        id: row.get(0)?,
        title: row.get(1)?,
        slug: row.get(2)?,
        author: row.get(3)?,
        content: row.get(4)?,
        excerpt: row.get(5)?,
        image: row.get(6)?,
        status: PostStatus::parse(&status),
        published_at: optional_timestamp_at(row, 8)?,
        created_at: timestamp_at(row, 9)?,
        updated_at: timestamp_at(row, 10)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn reading(sensor: &str, at: OffsetDateTime, aqi: u16) -> NewReading {
        NewReading {
            sensor_id: Some(sensor.to_string()),
            slave_id: Some(1),
            timestamp: Some(at),
            air_quality: Some(f64::from(aqi)),
            aqi: Some(aqi),
            aqi_category: "Moderate".to_string(),
            aqi_color: "Yellow".to_string(),
            ..Default::default()
        }
    }

    fn post(slug: &str, status: PostStatus) -> PostInput {
        PostInput {
            title: format!("Post {slug}"),
            slug: slug.to_string(),
            content: "Body".to_string(),
            status,
            ..Default::default()
        }
    }

    #[test]
    fn test_open_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("data.db");

        let store = Store::open(&path).unwrap();
        assert!(path.exists());
        assert!(store.list_sensors(false).unwrap().is_empty());
    }

    #[test]
    fn test_get_or_create_sensor() {
        let store = Store::open_in_memory().unwrap();
        let new = NewSensor {
            id: "KP-002".to_string(),
            name: "KP-002".to_string(),
            area: "Ormes Road".to_string(),
            latitude: Some(13.08),
            longitude: Some(80.24),
        };

        let (sensor, created) = store.get_or_create_sensor(&new).unwrap();
        assert!(created);
        assert_eq!(sensor.area, "Ormes Road");
        assert!(sensor.is_active);

        // Second call returns the existing row untouched
        let renamed = NewSensor {
            name: "Other".to_string(),
            ..new
        };
        let (sensor, created) = store.get_or_create_sensor(&renamed).unwrap();
        assert!(!created);
        assert_eq!(sensor.name, "KP-002");
    }

    #[test]
    fn test_list_sensors_active_only() {
        let store = Store::open_in_memory().unwrap();
        store.get_or_create_sensor(&NewSensor::with_id("B")).unwrap();
        store.get_or_create_sensor(&NewSensor::with_id("A")).unwrap();
        // Sensors are only ever retired by editing the database directly
        store
            .conn
            .execute("UPDATE sensors SET is_active = 0 WHERE id = 'B'", [])
            .unwrap();

        let all: Vec<_> = store.list_sensors(false).unwrap().into_iter().map(|s| s.id).collect();
        assert_eq!(all, vec!["A", "B"]);

        let active = store.list_sensors(true).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, "A");
    }

    #[test]
    fn test_get_or_create_reading_dedupes() {
        let store = Store::open_in_memory().unwrap();
        store.get_or_create_sensor(&NewSensor::with_id("KP-002")).unwrap();

        let at = datetime!(2024-01-31 12:00:00 UTC);
        let (first, created) = store.get_or_create_reading(&reading("KP-002", at, 50)).unwrap();
        assert!(created);

        let (second, created) = store.get_or_create_reading(&reading("KP-002", at, 99)).unwrap();
        assert!(!created);
        assert_eq!(first.id, second.id);
        assert_eq!(second.aqi, Some(50));
        assert_eq!(store.count_readings(None).unwrap(), 1);
    }

    #[test]
    fn test_dedupe_without_sensor() {
        let store = Store::open_in_memory().unwrap();
        let at = datetime!(2024-01-31 12:00:00 UTC);
        let orphan = NewReading {
            timestamp: Some(at),
            ..Default::default()
        };

        let (_, created) = store.get_or_create_reading(&orphan).unwrap();
        assert!(created);
        let (_, created) = store.get_or_create_reading(&orphan).unwrap();
        assert!(!created);
        assert!(matches!(
            store.insert_reading(&orphan),
            Err(Error::DuplicateReading { sensor: None, .. })
        ));
    }

    #[test]
    fn test_insert_reading_duplicate() {
        let store = Store::open_in_memory().unwrap();
        store.get_or_create_sensor(&NewSensor::with_id("KP-002")).unwrap();
        let at = datetime!(2024-01-31 12:00:00 UTC);

        store.insert_reading(&reading("KP-002", at, 10)).unwrap();
        let err = store.insert_reading(&reading("KP-002", at, 10)).unwrap_err();
        assert!(matches!(err, Error::DuplicateReading { timestamp, .. } if timestamp == at.unix_timestamp()));

        // Different slave id is a different reading
        let mut other = reading("KP-002", at, 10);
        other.slave_id = Some(2);
        store.insert_reading(&other).unwrap();
    }

    #[test]
    fn test_reading_requires_known_sensor() {
        let store = Store::open_in_memory().unwrap();
        let err = store
            .insert_reading(&reading("nope", OffsetDateTime::UNIX_EPOCH, 1))
            .unwrap_err();
        assert!(matches!(err, Error::Database(_)));
    }

    #[test]
    fn test_query_readings_filters() {
        let store = Store::open_in_memory().unwrap();
        for id in ["KP-002", "KP-003"] {
            store.get_or_create_sensor(&NewSensor::with_id(id)).unwrap();
        }

        let base = datetime!(2024-01-31 00:00:00 UTC);
        for hour in 0..5 {
            let at = base + time::Duration::hours(hour);
            store.insert_reading(&reading("KP-002", at, hour as u16)).unwrap();
            let mut other = reading("KP-003", at, 100);
            other.slave_id = Some(2);
            store.insert_reading(&other).unwrap();
        }

        let all = store.query_readings(&ReadingQuery::new()).unwrap();
        assert_eq!(all.len(), 10);

        let kp2 = store.query_readings(&ReadingQuery::new().sensor("KP-002")).unwrap();
        assert_eq!(kp2.len(), 5);
        assert_eq!(kp2[0].aqi, Some(4), "newest first");

        let by_slave = store
            .query_readings(&ReadingQuery::new().sensor_or_slave("2"))
            .unwrap();
        assert_eq!(by_slave.len(), 5);
        assert!(by_slave.iter().all(|r| r.sensor_id.as_deref() == Some("KP-003")));

        let window = store
            .query_readings(
                &ReadingQuery::new()
                    .sensor("KP-002")
                    .since(base + time::Duration::hours(1))
                    .until(base + time::Duration::hours(3))
                    .oldest_first(),
            )
            .unwrap();
        let aqis: Vec<_> = window.iter().filter_map(|r| r.aqi).collect();
        assert_eq!(aqis, vec![1, 2, 3]);

        let latest = store.latest_reading("KP-003").unwrap().unwrap();
        assert_eq!(latest.timestamp, base + time::Duration::hours(4));
        assert_eq!(store.count_readings(Some("KP-002")).unwrap(), 5);
    }

    #[test]
    fn test_post_lifecycle() {
        let store = Store::open_in_memory().unwrap();

        let draft = store.create_post(&post("hello", PostStatus::Draft)).unwrap();
        assert_eq!(draft.status, PostStatus::Draft);
        assert!(draft.published_at.is_none());

        let published = store
            .update_post(draft.id, &post("hello", PostStatus::Published))
            .unwrap();
        assert!(published.published_at.is_some());

        // Re-saving keeps the original publication time
        let again = store
            .update_post(draft.id, &post("hello", PostStatus::Published))
            .unwrap();
        assert_eq!(again.published_at, published.published_at);

        store.delete_post(draft.id).unwrap();
        assert!(store.get_post(draft.id).unwrap().is_none());
        assert!(matches!(store.delete_post(draft.id), Err(Error::PostNotFound(_))));
    }

    #[test]
    fn test_post_slug_unique() {
        let store = Store::open_in_memory().unwrap();
        store.create_post(&post("same", PostStatus::Draft)).unwrap();
        let other = store.create_post(&post("other", PostStatus::Draft)).unwrap();

        assert!(matches!(
            store.create_post(&post("same", PostStatus::Draft)),
            Err(Error::DuplicateSlug(slug)) if slug == "same"
        ));
        assert!(matches!(
            store.update_post(other.id, &post("same", PostStatus::Draft)),
            Err(Error::DuplicateSlug(_))
        ));
    }

    #[test]
    fn test_list_published_posts_ordered() {
        let store = Store::open_in_memory().unwrap();

        let mut older = post("older", PostStatus::Published);
        older.published_at = Some(datetime!(2024-01-01 00:00 UTC));
        let mut newer = post("newer", PostStatus::Published);
        newer.published_at = Some(datetime!(2024-06-01 00:00 UTC));

        store.create_post(&older).unwrap();
        store.create_post(&post("draft", PostStatus::Draft)).unwrap();
        store.create_post(&newer).unwrap();

        let slugs: Vec<_> = store
            .list_posts(true)
            .unwrap()
            .into_iter()
            .map(|p| p.slug)
            .collect();
        assert_eq!(slugs, vec!["newer", "older"]);
        assert_eq!(store.list_posts(false).unwrap().len(), 3);
    }
}
