use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{Connection, ErrorCode, OptionalExtension, params};

use crate::day::day_starts_within;
use crate::error::{CoreError, Result};
use crate::memory::day_taken;
use crate::models::{
    DEFAULT_DAILY_CALORIE_GOAL, DailyCalorie, FoodLogEntry, NewDailyCalorie, NewFoodLogEntry,
    NewUser, UpdateDailyCalorie, UpdateUser, User, total_overflow,
};
use crate::store::Storage;

const USER_COLUMNS: &str =
    "id, username, password, email, daily_calorie_goal, push_notifications, dark_mode";
const FOOD_LOG_COLUMNS: &str = "id, user_id, food_name, calories, created_at_ms";
const DAILY_COLUMNS: &str = "id, user_id, day, total_calories";

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        // Concurrent CLI invocations against the server's file wait instead of failing.
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        let store = Self::from_connection(conn)?;
        tracing::debug!(path = %path.display(), "opened sqlite store");
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn migrate(conn: &Connection) -> Result<()> {
    let version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    if version < 1 {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT NOT NULL UNIQUE,
                password TEXT NOT NULL,
                email TEXT,
                daily_calorie_goal INTEGER NOT NULL DEFAULT 2000,
                push_notifications INTEGER NOT NULL DEFAULT 1,
                dark_mode INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS food_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                food_name TEXT NOT NULL,
                calories INTEGER NOT NULL CHECK (calories >= 0),
                created_at_ms INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS daily_calories (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                day TEXT NOT NULL,
                total_calories INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_food_logs_user_created ON food_logs(user_id, created_at_ms);
            CREATE UNIQUE INDEX IF NOT EXISTS idx_daily_calories_user_day ON daily_calories(user_id, day);

            PRAGMA user_version = 1;",
        )?;
    }

    Ok(())
}

// --- Row mapping helpers ---

fn user_from_row(row: &rusqlite::Row) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        password: row.get(2)?,
        email: row.get(3)?,
        daily_calorie_goal: row.get(4)?,
        push_notifications: row.get(5)?,
        dark_mode: row.get(6)?,
    })
}

fn food_log_from_row(row: &rusqlite::Row) -> rusqlite::Result<FoodLogEntry> {
    let created_at_ms: i64 = row.get(4)?;
    let created_at = DateTime::from_timestamp_millis(created_at_ms)
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(4, created_at_ms))?;
    Ok(FoodLogEntry {
        id: row.get(0)?,
        user_id: row.get(1)?,
        food_name: row.get(2)?,
        calories: row.get(3)?,
        created_at,
    })
}

fn daily_calorie_from_row(row: &rusqlite::Row) -> rusqlite::Result<DailyCalorie> {
    let day: String = row.get(2)?;
    let date = NaiveDate::parse_from_str(&day, "%Y-%m-%d").map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(DailyCalorie {
        id: row.get(0)?,
        user_id: row.get(1)?,
        date,
        total_calories: row.get(3)?,
    })
}

fn day_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

fn get_user_with(conn: &Connection, id: i64) -> Result<Option<User>> {
    Ok(conn
        .query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
            params![id],
            user_from_row,
        )
        .optional()?)
}

fn get_daily_calorie_with(conn: &Connection, id: i64) -> Result<Option<DailyCalorie>> {
    Ok(conn
        .query_row(
            &format!("SELECT {DAILY_COLUMNS} FROM daily_calories WHERE id = ?1"),
            params![id],
            daily_calorie_from_row,
        )
        .optional()?)
}

impl Storage for SqliteStore {
    // --- Users ---

    fn get_user(&self, id: i64) -> Result<Option<User>> {
        get_user_with(&self.conn(), id)
    }

    fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        Ok(self
            .conn()
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?1"),
                params![username],
                user_from_row,
            )
            .optional()?)
    }

    fn create_user(&self, user: &NewUser) -> Result<User> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO users (username, password, email, daily_calorie_goal)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                user.username,
                user.password,
                user.email,
                user.daily_calorie_goal.unwrap_or(DEFAULT_DAILY_CALORIE_GOAL),
            ],
        )
        .map_err(|e| {
            if is_unique_violation(&e) {
                CoreError::Conflict(format!("Username '{}' is already taken", user.username))
            } else {
                e.into()
            }
        })?;
        let id = conn.last_insert_rowid();
        get_user_with(&conn, id)?.ok_or_else(|| CoreError::not_found("User", id))
    }

    fn update_user(&self, id: i64, update: &UpdateUser) -> Result<User> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let mut user = get_user_with(&tx, id)?.ok_or_else(|| CoreError::not_found("User", id))?;
        update.apply_to(&mut user);
        tx.execute(
            "UPDATE users SET username = ?1, password = ?2, email = ?3,
                daily_calorie_goal = ?4, push_notifications = ?5, dark_mode = ?6
             WHERE id = ?7",
            params![
                user.username,
                user.password,
                user.email,
                user.daily_calorie_goal,
                user.push_notifications,
                user.dark_mode,
                id,
            ],
        )
        .map_err(|e| {
            if is_unique_violation(&e) {
                CoreError::Conflict(format!("Username '{}' is already taken", user.username))
            } else {
                e.into()
            }
        })?;
        tx.commit()?;
        Ok(user)
    }

    // --- Food log ---

    fn get_food_log(&self, id: i64) -> Result<Option<FoodLogEntry>> {
        Ok(self
            .conn()
            .query_row(
                &format!("SELECT {FOOD_LOG_COLUMNS} FROM food_logs WHERE id = ?1"),
                params![id],
                food_log_from_row,
            )
            .optional()?)
    }

    fn list_food_logs(&self, user_id: i64) -> Result<Vec<FoodLogEntry>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {FOOD_LOG_COLUMNS} FROM food_logs
             WHERE user_id = ?1
             ORDER BY created_at_ms, id"
        ))?;
        let logs = stmt
            .query_map(params![user_id], food_log_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(logs)
    }

    fn list_food_logs_in_range(
        &self,
        user_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<FoodLogEntry>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {FOOD_LOG_COLUMNS} FROM food_logs
             WHERE user_id = ?1 AND created_at_ms BETWEEN ?2 AND ?3
             ORDER BY created_at_ms, id"
        ))?;
        let logs = stmt
            .query_map(
                params![user_id, start.timestamp_millis(), end.timestamp_millis()],
                food_log_from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(logs)
    }

    fn create_food_log(&self, entry: &NewFoodLogEntry) -> Result<FoodLogEntry> {
        let conn = self.conn();
        // Stored at millisecond precision; return what a later read would see.
        let created_at_ms = entry.created_at.timestamp_millis();
        conn.execute(
            "INSERT INTO food_logs (user_id, food_name, calories, created_at_ms)
             VALUES (?1, ?2, ?3, ?4)",
            params![entry.user_id, entry.food_name, entry.calories, created_at_ms],
        )?;
        let id = conn.last_insert_rowid();
        Ok(FoodLogEntry {
            id,
            user_id: entry.user_id,
            food_name: entry.food_name.clone(),
            calories: entry.calories,
            created_at: DateTime::from_timestamp_millis(created_at_ms)
                .unwrap_or(entry.created_at),
        })
    }

    // --- Daily totals ---

    fn get_daily_calorie(&self, id: i64) -> Result<Option<DailyCalorie>> {
        get_daily_calorie_with(&self.conn(), id)
    }

    fn get_daily_calorie_by_date(
        &self,
        user_id: i64,
        date: NaiveDate,
    ) -> Result<Option<DailyCalorie>> {
        Ok(self
            .conn()
            .query_row(
                &format!("SELECT {DAILY_COLUMNS} FROM daily_calories WHERE user_id = ?1 AND day = ?2"),
                params![user_id, day_key(date)],
                daily_calorie_from_row,
            )
            .optional()?)
    }

    fn list_daily_calories_in_range(
        &self,
        user_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<DailyCalorie>> {
        let Some(days) = day_starts_within(start, end) else {
            return Ok(Vec::new());
        };
        let conn = self.conn();
        // ISO dates sort lexically in calendar order.
        let mut stmt = conn.prepare(&format!(
            "SELECT {DAILY_COLUMNS} FROM daily_calories
             WHERE user_id = ?1 AND day BETWEEN ?2 AND ?3
             ORDER BY day"
        ))?;
        let totals = stmt
            .query_map(
                params![user_id, day_key(*days.start()), day_key(*days.end())],
                daily_calorie_from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(totals)
    }

    fn create_daily_calorie(&self, new: &NewDailyCalorie) -> Result<DailyCalorie> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO daily_calories (user_id, day, total_calories) VALUES (?1, ?2, ?3)",
            params![new.user_id, day_key(new.date), new.total_calories],
        )
        .map_err(|e| {
            if is_unique_violation(&e) {
                day_taken(new.user_id, new.date)
            } else {
                e.into()
            }
        })?;
        Ok(DailyCalorie {
            id: conn.last_insert_rowid(),
            user_id: new.user_id,
            date: new.date,
            total_calories: new.total_calories,
        })
    }

    fn update_daily_calorie(&self, id: i64, update: &UpdateDailyCalorie) -> Result<DailyCalorie> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let mut dc = get_daily_calorie_with(&tx, id)?
            .ok_or_else(|| CoreError::not_found("Daily calorie record", id))?;
        if let Some(date) = update.date {
            dc.date = date;
        }
        if let Some(total) = update.total_calories {
            dc.total_calories = total;
        }
        tx.execute(
            "UPDATE daily_calories SET day = ?1, total_calories = ?2 WHERE id = ?3",
            params![day_key(dc.date), dc.total_calories, id],
        )
        .map_err(|e| {
            if is_unique_violation(&e) {
                day_taken(dc.user_id, dc.date)
            } else {
                e.into()
            }
        })?;
        tx.commit()?;
        Ok(dc)
    }

    fn increment_daily_calories(
        &self,
        user_id: i64,
        date: NaiveDate,
        delta: i64,
    ) -> Result<DailyCalorie> {
        // One statement: the unique (user_id, day) index turns a racing
        // second insert into an increment instead of a duplicate row.
        // The WHERE guard skips an update that would leave the i64 range,
        // so RETURNING yields no row instead of a REAL total.
        self.conn()
            .query_row(
                "INSERT INTO daily_calories (user_id, day, total_calories) VALUES (?1, ?2, ?3)
                 ON CONFLICT(user_id, day) DO UPDATE SET
                    total_calories = total_calories + excluded.total_calories
                 WHERE (excluded.total_calories >= 0
                        AND total_calories <= ?4 - excluded.total_calories)
                    OR (excluded.total_calories < 0
                        AND total_calories >= ?5 - excluded.total_calories)
                 RETURNING id, user_id, day, total_calories",
                params![user_id, day_key(date), delta, i64::MAX, i64::MIN],
                daily_calorie_from_row,
            )
            .optional()?
            .ok_or_else(|| total_overflow(delta))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::conformance;

    #[test]
    fn test_users() {
        conformance::users(&SqliteStore::open_in_memory().unwrap());
    }

    #[test]
    fn test_food_logs() {
        conformance::food_logs(&SqliteStore::open_in_memory().unwrap());
    }

    #[test]
    fn test_food_log_range_is_inclusive() {
        conformance::food_log_range_is_inclusive(&SqliteStore::open_in_memory().unwrap());
    }

    #[test]
    fn test_daily_calories() {
        conformance::daily_calories(&SqliteStore::open_in_memory().unwrap());
    }

    #[test]
    fn test_daily_calorie_range() {
        conformance::daily_calorie_range(&SqliteStore::open_in_memory().unwrap());
    }

    #[test]
    fn test_increment() {
        conformance::increment(&SqliteStore::open_in_memory().unwrap());
    }

    #[test]
    fn test_increment_overflow() {
        conformance::increment_overflow(&SqliteStore::open_in_memory().unwrap());
    }

    #[test]
    fn test_concurrent_increments() {
        conformance::concurrent_increments(&SqliteStore::open_in_memory().unwrap());
    }

    #[test]
    fn test_concurrent_increments_across_connections() {
        // Two handles on one file, as when the CLI logs while the server runs.
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bite.db");
        let a = SqliteStore::open(&path).unwrap();
        let b = SqliteStore::open(&path).unwrap();
        let day = conformance::date(2024, 6, 15);

        std::thread::scope(|s| {
            for store in [&a, &b] {
                s.spawn(move || {
                    for _ in 0..50 {
                        store.increment_daily_calories(1, day, 10).unwrap();
                    }
                });
            }
        });

        let total = a.get_daily_calorie_by_date(1, day).unwrap().unwrap();
        assert_eq!(total.total_calories, 1000);
    }

    #[test]
    fn test_reopen_keeps_schema_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bite.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store
                .increment_daily_calories(1, conformance::date(2024, 6, 15), 95)
                .unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        let version: i64 = store
            .conn()
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap();
        assert_eq!(version, 1);
        assert!(
            store
                .get_daily_calorie_by_date(1, conformance::date(2024, 6, 15))
                .unwrap()
                .is_some()
        );
    }

    #[test]
    fn test_created_at_round_trips_to_the_millisecond() {
        let store = SqliteStore::open_in_memory().unwrap();
        let at = conformance::at(2024, 6, 15, 23, 59) + chrono::Duration::milliseconds(59_999);
        let created = store
            .create_food_log(&NewFoodLogEntry {
                user_id: 1,
                food_name: "Late snack".to_string(),
                calories: 150,
                created_at: at,
            })
            .unwrap();
        let fetched = store.get_food_log(created.id).unwrap().unwrap();
        assert_eq!(fetched.created_at, at);
        assert_eq!(fetched, created);
    }
}
