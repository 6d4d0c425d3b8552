use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::day::day_starts_within;
use crate::error::{CoreError, Result};
use crate::models::{
    DEFAULT_DAILY_CALORIE_GOAL, DailyCalorie, FoodLogEntry, NewDailyCalorie, NewFoodLogEntry,
    NewUser, UpdateDailyCalorie, UpdateUser, User, add_to_total,
};
use crate::store::Storage;

/// Next identifier for each table. Persisted alongside the rows so ids are
/// never reused across restarts of the JSON file backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Counters {
    user_id: i64,
    food_log_id: i64,
    daily_calorie_id: i64,
}

impl Default for Counters {
    fn default() -> Self {
        Self {
            user_id: 1,
            food_log_id: 1,
            daily_calorie_id: 1,
        }
    }
}

/// Row storage shared by the in-memory and JSON file backends.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Tables {
    #[serde(default)]
    users: Vec<User>,
    #[serde(default)]
    food_logs: Vec<FoodLogEntry>,
    #[serde(default)]
    daily_calories: Vec<DailyCalorie>,
    #[serde(default)]
    counters: Counters,
}

fn next_id(counter: &mut i64) -> i64 {
    let id = *counter;
    *counter += 1;
    id
}

impl Tables {
    /// Bump counters past any id already present (hand-edited files, old dumps).
    pub(crate) fn normalize(&mut self) {
        let max_user = self.users.iter().map(|u| u.id).max().unwrap_or(0);
        let max_log = self.food_logs.iter().map(|l| l.id).max().unwrap_or(0);
        let max_daily = self.daily_calories.iter().map(|d| d.id).max().unwrap_or(0);
        self.counters.user_id = self.counters.user_id.max(max_user + 1);
        self.counters.food_log_id = self.counters.food_log_id.max(max_log + 1);
        self.counters.daily_calorie_id = self.counters.daily_calorie_id.max(max_daily + 1);
    }

    /// Reject files that already break the one-total-per-day rule.
    pub(crate) fn check_unique_days(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for dc in &self.daily_calories {
            if !seen.insert((dc.user_id, dc.date)) {
                return Err(CoreError::Corrupt(format!(
                    "duplicate daily total for user {} on {}",
                    dc.user_id, dc.date
                )));
            }
        }
        Ok(())
    }

    // --- Users ---

    pub(crate) fn get_user(&self, id: i64) -> Option<User> {
        self.users.iter().find(|u| u.id == id).cloned()
    }

    pub(crate) fn get_user_by_username(&self, username: &str) -> Option<User> {
        self.users.iter().find(|u| u.username == username).cloned()
    }

    pub(crate) fn create_user(&mut self, new: &NewUser) -> Result<User> {
        if self.users.iter().any(|u| u.username == new.username) {
            return Err(CoreError::Conflict(format!(
                "Username '{}' is already taken",
                new.username
            )));
        }
        let user = User {
            id: next_id(&mut self.counters.user_id),
            username: new.username.clone(),
            password: new.password.clone(),
            email: new.email.clone(),
            daily_calorie_goal: new.daily_calorie_goal.unwrap_or(DEFAULT_DAILY_CALORIE_GOAL),
            push_notifications: true,
            dark_mode: false,
        };
        self.users.push(user.clone());
        Ok(user)
    }

    pub(crate) fn update_user(&mut self, id: i64, update: &UpdateUser) -> Result<User> {
        if let Some(username) = &update.username {
            if self.users.iter().any(|u| u.id != id && &u.username == username) {
                return Err(CoreError::Conflict(format!(
                    "Username '{username}' is already taken"
                )));
            }
        }
        let user = self
            .users
            .iter_mut()
            .find(|u| u.id == id)
            .ok_or_else(|| CoreError::not_found("User", id))?;
        update.apply_to(user);
        Ok(user.clone())
    }

    // --- Food log ---

    pub(crate) fn get_food_log(&self, id: i64) -> Option<FoodLogEntry> {
        self.food_logs.iter().find(|l| l.id == id).cloned()
    }

    pub(crate) fn list_food_logs<F>(&self, user_id: i64, keep: F) -> Vec<FoodLogEntry>
    where
        F: Fn(&FoodLogEntry) -> bool,
    {
        let mut logs: Vec<FoodLogEntry> = self
            .food_logs
            .iter()
            .filter(|l| l.user_id == user_id && keep(l))
            .cloned()
            .collect();
        logs.sort_by_key(|l| (l.created_at, l.id));
        logs
    }

    pub(crate) fn create_food_log(&mut self, new: &NewFoodLogEntry) -> FoodLogEntry {
        let entry = FoodLogEntry {
            id: next_id(&mut self.counters.food_log_id),
            user_id: new.user_id,
            food_name: new.food_name.clone(),
            calories: new.calories,
            created_at: new.created_at,
        };
        self.food_logs.push(entry.clone());
        entry
    }

    // --- Daily totals ---

    pub(crate) fn get_daily_calorie(&self, id: i64) -> Option<DailyCalorie> {
        self.daily_calories.iter().find(|d| d.id == id).cloned()
    }

    pub(crate) fn get_daily_calorie_by_date(
        &self,
        user_id: i64,
        date: NaiveDate,
    ) -> Option<DailyCalorie> {
        self.daily_calories
            .iter()
            .find(|d| d.user_id == user_id && d.date == date)
            .cloned()
    }

    pub(crate) fn list_daily_calories_in_range(
        &self,
        user_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<DailyCalorie> {
        let Some(days) = day_starts_within(start, end) else {
            return Vec::new();
        };
        let mut totals: Vec<DailyCalorie> = self
            .daily_calories
            .iter()
            .filter(|d| d.user_id == user_id && days.contains(&d.date))
            .cloned()
            .collect();
        totals.sort_by_key(|d| d.date);
        totals
    }

    pub(crate) fn create_daily_calorie(&mut self, new: &NewDailyCalorie) -> Result<DailyCalorie> {
        if self.get_daily_calorie_by_date(new.user_id, new.date).is_some() {
            return Err(day_taken(new.user_id, new.date));
        }
        let dc = DailyCalorie {
            id: next_id(&mut self.counters.daily_calorie_id),
            user_id: new.user_id,
            date: new.date,
            total_calories: new.total_calories,
        };
        self.daily_calories.push(dc.clone());
        Ok(dc)
    }

    pub(crate) fn update_daily_calorie(
        &mut self,
        id: i64,
        update: &UpdateDailyCalorie,
    ) -> Result<DailyCalorie> {
        let current = self
            .get_daily_calorie(id)
            .ok_or_else(|| CoreError::not_found("Daily calorie record", id))?;
        if let Some(date) = update.date {
            if self
                .daily_calories
                .iter()
                .any(|d| d.id != id && d.user_id == current.user_id && d.date == date)
            {
                return Err(day_taken(current.user_id, date));
            }
        }
        let dc = self
            .daily_calories
            .iter_mut()
            .find(|d| d.id == id)
            .ok_or_else(|| CoreError::not_found("Daily calorie record", id))?;
        if let Some(date) = update.date {
            dc.date = date;
        }
        if let Some(total) = update.total_calories {
            dc.total_calories = total;
        }
        Ok(dc.clone())
    }

    pub(crate) fn increment_daily_calories(
        &mut self,
        user_id: i64,
        date: NaiveDate,
        delta: i64,
    ) -> Result<DailyCalorie> {
        if let Some(dc) = self
            .daily_calories
            .iter_mut()
            .find(|d| d.user_id == user_id && d.date == date)
        {
            dc.total_calories = add_to_total(dc.total_calories, delta)?;
            return Ok(dc.clone());
        }
        let dc = DailyCalorie {
            id: next_id(&mut self.counters.daily_calorie_id),
            user_id,
            date,
            total_calories: delta,
        };
        self.daily_calories.push(dc.clone());
        Ok(dc)
    }
}

pub(crate) fn day_taken(user_id: i64, date: NaiveDate) -> CoreError {
    CoreError::Conflict(format!(
        "User {user_id} already has a daily total for {date}"
    ))
}

/// Process-local store. Contents are lost on exit.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Storage for MemoryStore {
    fn get_user(&self, id: i64) -> Result<Option<User>> {
        Ok(self.lock().get_user(id))
    }

    fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        Ok(self.lock().get_user_by_username(username))
    }

    fn create_user(&self, user: &NewUser) -> Result<User> {
        self.lock().create_user(user)
    }

    fn update_user(&self, id: i64, update: &UpdateUser) -> Result<User> {
        self.lock().update_user(id, update)
    }

    fn get_food_log(&self, id: i64) -> Result<Option<FoodLogEntry>> {
        Ok(self.lock().get_food_log(id))
    }

    fn list_food_logs(&self, user_id: i64) -> Result<Vec<FoodLogEntry>> {
        Ok(self.lock().list_food_logs(user_id, |_| true))
    }

    fn list_food_logs_in_range(
        &self,
        user_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<FoodLogEntry>> {
        Ok(self
            .lock()
            .list_food_logs(user_id, |l| start <= l.created_at && l.created_at <= end))
    }

    fn create_food_log(&self, entry: &NewFoodLogEntry) -> Result<FoodLogEntry> {
        Ok(self.lock().create_food_log(entry))
    }

    fn get_daily_calorie(&self, id: i64) -> Result<Option<DailyCalorie>> {
        Ok(self.lock().get_daily_calorie(id))
    }

    fn get_daily_calorie_by_date(
        &self,
        user_id: i64,
        date: NaiveDate,
    ) -> Result<Option<DailyCalorie>> {
        Ok(self.lock().get_daily_calorie_by_date(user_id, date))
    }

    fn list_daily_calories_in_range(
        &self,
        user_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<DailyCalorie>> {
        Ok(self.lock().list_daily_calories_in_range(user_id, start, end))
    }

    fn create_daily_calorie(&self, new: &NewDailyCalorie) -> Result<DailyCalorie> {
        self.lock().create_daily_calorie(new)
    }

    fn update_daily_calorie(&self, id: i64, update: &UpdateDailyCalorie) -> Result<DailyCalorie> {
        self.lock().update_daily_calorie(id, update)
    }

    fn increment_daily_calories(
        &self,
        user_id: i64,
        date: NaiveDate,
        delta: i64,
    ) -> Result<DailyCalorie> {
        self.lock().increment_daily_calories(user_id, date, delta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::conformance;

    #[test]
    fn test_users() {
        conformance::users(&MemoryStore::new());
    }

    #[test]
    fn test_food_logs() {
        conformance::food_logs(&MemoryStore::new());
    }

    #[test]
    fn test_food_log_range_is_inclusive() {
        conformance::food_log_range_is_inclusive(&MemoryStore::new());
    }

    #[test]
    fn test_daily_calories() {
        conformance::daily_calories(&MemoryStore::new());
    }

    #[test]
    fn test_daily_calorie_range() {
        conformance::daily_calorie_range(&MemoryStore::new());
    }

    #[test]
    fn test_increment() {
        conformance::increment(&MemoryStore::new());
    }

    #[test]
    fn test_increment_overflow() {
        conformance::increment_overflow(&MemoryStore::new());
    }

    #[test]
    fn test_concurrent_increments() {
        conformance::concurrent_increments(&MemoryStore::new());
    }

    #[test]
    fn test_normalize_bumps_counters() {
        let mut tables: Tables = serde_json::from_value(serde_json::json!({
            "users": [{
                "id": 7, "username": "demo", "password": "password", "email": null,
                "dailyCalorieGoal": 2000, "pushNotifications": true, "darkMode": false
            }]
        }))
        .unwrap();
        tables.normalize();
        let user = tables
            .create_user(&NewUser {
                username: "next".to_string(),
                password: "pw".to_string(),
                email: None,
                daily_calorie_goal: None,
            })
            .unwrap();
        assert_eq!(user.id, 8);
    }
}
