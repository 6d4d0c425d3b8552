use chrono::{DateTime, NaiveDate, Utc};

use crate::error::Result;
use crate::models::{
    DailyCalorie, FoodLogEntry, NewDailyCalorie, NewFoodLogEntry, NewUser, UpdateDailyCalorie,
    UpdateUser, User,
};

/// Persistence for users, the append-only food log, and per-day calorie totals.
///
/// Lookups return `Ok(None)` for missing records; only writes against a
/// missing id fail with `NotFound`. Implementations must keep at most one
/// `DailyCalorie` per `(user_id, date)`.
pub trait Storage: Send + Sync {
    // --- Users ---

    fn get_user(&self, id: i64) -> Result<Option<User>>;
    fn get_user_by_username(&self, username: &str) -> Result<Option<User>>;
    fn create_user(&self, user: &NewUser) -> Result<User>;
    fn update_user(&self, id: i64, update: &UpdateUser) -> Result<User>;

    // --- Food log ---

    fn get_food_log(&self, id: i64) -> Result<Option<FoodLogEntry>>;
    /// All entries for a user, oldest first.
    fn list_food_logs(&self, user_id: i64) -> Result<Vec<FoodLogEntry>>;
    /// Entries with `created_at` in `[start, end]`, oldest first.
    fn list_food_logs_in_range(
        &self,
        user_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<FoodLogEntry>>;
    fn create_food_log(&self, entry: &NewFoodLogEntry) -> Result<FoodLogEntry>;

    // --- Daily totals ---

    fn get_daily_calorie(&self, id: i64) -> Result<Option<DailyCalorie>>;
    fn get_daily_calorie_by_date(
        &self,
        user_id: i64,
        date: NaiveDate,
    ) -> Result<Option<DailyCalorie>>;
    /// Totals whose day starts (local midnight) within `[start, end]`, by date.
    fn list_daily_calories_in_range(
        &self,
        user_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<DailyCalorie>>;
    fn create_daily_calorie(&self, new: &NewDailyCalorie) -> Result<DailyCalorie>;
    fn update_daily_calorie(&self, id: i64, update: &UpdateDailyCalorie) -> Result<DailyCalorie>;

    /// Add `delta` to the user's total for `date`, creating the record when
    /// absent. Must be atomic with respect to concurrent callers.
    fn increment_daily_calories(
        &self,
        user_id: i64,
        date: NaiveDate,
        delta: i64,
    ) -> Result<DailyCalorie>;
}
