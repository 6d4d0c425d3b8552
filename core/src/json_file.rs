use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, NaiveDate, Utc};

use crate::error::Result;
use crate::memory::Tables;
use crate::models::{
    DailyCalorie, FoodLogEntry, NewDailyCalorie, NewFoodLogEntry, NewUser, UpdateDailyCalorie,
    UpdateUser, User,
};
use crate::store::Storage;

/// Store kept in memory and rewritten to a single JSON file after every write.
///
/// The file is replaced atomically (write to a sibling temp file, then rename),
/// so a crash mid-write leaves the previous contents intact.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    tables: Mutex<Tables>,
}

impl JsonFileStore {
    /// Load `path`, or start empty when it does not exist yet.
    pub fn open(path: &Path) -> Result<Self> {
        let tables = if path.exists() {
            let raw = fs::read_to_string(path)?;
            let mut tables: Tables = serde_json::from_str(&raw)?;
            tables.check_unique_days()?;
            tables.normalize();
            tables
        } else {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let tables = Tables::default();
            write_atomic(path, &tables)?;
            tables
        };
        tracing::debug!(path = %path.display(), "opened JSON file store");
        Ok(Self {
            path: path.to_path_buf(),
            tables: Mutex::new(tables),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read<T>(&self, f: impl FnOnce(&Tables) -> T) -> T {
        f(&self.lock())
    }

    /// Apply `f` and persist. If persisting fails the in-memory tables are
    /// rolled back so memory never runs ahead of disk.
    fn write<T>(&self, f: impl FnOnce(&mut Tables) -> Result<T>) -> Result<T> {
        let mut tables = self.lock();
        let before = tables.clone();
        let out = f(&mut tables)?;
        if let Err(e) = write_atomic(&self.path, &tables) {
            *tables = before;
            return Err(e);
        }
        Ok(out)
    }
}

fn write_atomic(path: &Path, tables: &Tables) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    let json = serde_json::to_vec_pretty(tables)?;
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(&json)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

impl Storage for JsonFileStore {
    fn get_user(&self, id: i64) -> Result<Option<User>> {
        Ok(self.read(|t| t.get_user(id)))
    }

    fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        Ok(self.read(|t| t.get_user_by_username(username)))
    }

    fn create_user(&self, user: &NewUser) -> Result<User> {
        self.write(|t| t.create_user(user))
    }

    fn update_user(&self, id: i64, update: &UpdateUser) -> Result<User> {
        self.write(|t| t.update_user(id, update))
    }

    fn get_food_log(&self, id: i64) -> Result<Option<FoodLogEntry>> {
        Ok(self.read(|t| t.get_food_log(id)))
    }

    fn list_food_logs(&self, user_id: i64) -> Result<Vec<FoodLogEntry>> {
        Ok(self.read(|t| t.list_food_logs(user_id, |_| true)))
    }

    fn list_food_logs_in_range(
        &self,
        user_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<FoodLogEntry>> {
        Ok(self.read(|t| {
            t.list_food_logs(user_id, |l| start <= l.created_at && l.created_at <= end)
        }))
    }

    fn create_food_log(&self, entry: &NewFoodLogEntry) -> Result<FoodLogEntry> {
        self.write(|t| Ok(t.create_food_log(entry)))
    }

    fn get_daily_calorie(&self, id: i64) -> Result<Option<DailyCalorie>> {
        Ok(self.read(|t| t.get_daily_calorie(id)))
    }

    fn get_daily_calorie_by_date(
        &self,
        user_id: i64,
        date: NaiveDate,
    ) -> Result<Option<DailyCalorie>> {
        Ok(self.read(|t| t.get_daily_calorie_by_date(user_id, date)))
    }

    fn list_daily_calories_in_range(
        &self,
        user_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<DailyCalorie>> {
        Ok(self.read(|t| t.list_daily_calories_in_range(user_id, start, end)))
    }

    fn create_daily_calorie(&self, new: &NewDailyCalorie) -> Result<DailyCalorie> {
        self.write(|t| t.create_daily_calorie(new))
    }

    fn update_daily_calorie(&self, id: i64, update: &UpdateDailyCalorie) -> Result<DailyCalorie> {
        self.write(|t| t.update_daily_calorie(id, update))
    }

    fn increment_daily_calories(
        &self,
        user_id: i64,
        date: NaiveDate,
        delta: i64,
    ) -> Result<DailyCalorie> {
        self.write(|t| t.increment_daily_calories(user_id, date, delta))
    }
}
