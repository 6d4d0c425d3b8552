use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

pub const DEFAULT_DAILY_CALORIE_GOAL: i64 = 2000;

pub const DEMO_USERNAME: &str = "demo";
pub const DEMO_PASSWORD: &str = "password";
pub const DEMO_EMAIL: &str = "demo@example.com";

// --- Users ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    pub username: String,
    pub password: String,
    pub email: Option<String>,
    pub daily_calorie_goal: i64,
    pub push_notifications: bool,
    pub dark_mode: bool,
}

/// A user without credentials, for display and API responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: i64,
    pub username: String,
    pub email: Option<String>,
    pub daily_calorie_goal: i64,
    pub push_notifications: bool,
    pub dark_mode: bool,
}

impl From<User> for UserProfile {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            username: u.username,
            email: u.email,
            daily_calorie_goal: u.daily_calorie_goal,
            push_notifications: u.push_notifications,
            dark_mode: u.dark_mode,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUser {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub daily_calorie_goal: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUser {
    pub username: Option<String>,
    pub password: Option<String>,
    pub email: Option<String>,
    pub daily_calorie_goal: Option<i64>,
    pub push_notifications: Option<bool>,
    pub dark_mode: Option<bool>,
}

impl UpdateUser {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.username.is_none()
            && self.password.is_none()
            && self.email.is_none()
            && self.daily_calorie_goal.is_none()
            && self.push_notifications.is_none()
            && self.dark_mode.is_none()
    }

    /// Merge the provided fields over `user`.
    pub fn apply_to(&self, user: &mut User) {
        if let Some(username) = &self.username {
            user.username.clone_from(username);
        }
        if let Some(password) = &self.password {
            user.password.clone_from(password);
        }
        if let Some(email) = &self.email {
            user.email = Some(email.clone());
        }
        if let Some(goal) = self.daily_calorie_goal {
            user.daily_calorie_goal = goal;
        }
        if let Some(push) = self.push_notifications {
            user.push_notifications = push;
        }
        if let Some(dark) = self.dark_mode {
            user.dark_mode = dark;
        }
    }
}

pub fn validate_new_user(user: &NewUser) -> Result<()> {
    if user.username.trim().is_empty() {
        return Err(CoreError::Validation("Username is required".to_string()));
    }
    if user.password.is_empty() {
        return Err(CoreError::Validation("Password is required".to_string()));
    }
    if let Some(goal) = user.daily_calorie_goal {
        validate_calorie_goal(goal)?;
    }
    Ok(())
}

pub fn validate_user_update(update: &UpdateUser) -> Result<()> {
    if update.is_empty() {
        return Err(CoreError::Validation(
            "At least one field must be provided".to_string(),
        ));
    }
    if update.username.as_deref().is_some_and(|u| u.trim().is_empty()) {
        return Err(CoreError::Validation("Username must not be empty".to_string()));
    }
    if update.password.as_deref().is_some_and(str::is_empty) {
        return Err(CoreError::Validation("Password must not be empty".to_string()));
    }
    if let Some(goal) = update.daily_calorie_goal {
        validate_calorie_goal(goal)?;
    }
    Ok(())
}

fn validate_calorie_goal(goal: i64) -> Result<()> {
    if goal <= 0 {
        return Err(CoreError::Validation(
            "dailyCalorieGoal must be greater than 0".to_string(),
        ));
    }
    Ok(())
}

// --- Food log ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FoodLogEntry {
    pub id: i64,
    pub user_id: i64,
    pub food_name: String,
    pub calories: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewFoodLogEntry {
    pub user_id: i64,
    pub food_name: String,
    pub calories: i64,
    pub created_at: DateTime<Utc>,
}

/// Name must be non-empty after trimming, calories must not be negative.
/// Returns the trimmed name.
pub fn validate_food_log(food_name: &str, calories: i64) -> Result<String> {
    let name = food_name.trim();
    if name.is_empty() {
        return Err(CoreError::Validation("foodName must not be empty".to_string()));
    }
    if calories < 0 {
        return Err(CoreError::Validation(
            "calories must not be negative".to_string(),
        ));
    }
    Ok(name.to_string())
}

// --- Daily aggregates ---

/// Add `delta` to a running daily total, refusing to overflow.
pub fn add_to_total(total: i64, delta: i64) -> Result<i64> {
    total
        .checked_add(delta)
        .ok_or_else(|| total_overflow(delta))
}

pub(crate) fn total_overflow(delta: i64) -> CoreError {
    CoreError::Validation(format!(
        "adding {delta} calories would overflow the daily total"
    ))
}

/// Materialized running calorie total for one user on one local calendar day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyCalorie {
    pub id: i64,
    pub user_id: i64,
    pub date: NaiveDate,
    pub total_calories: i64,
}

#[derive(Debug, Clone)]
pub struct NewDailyCalorie {
    pub user_id: i64,
    pub date: NaiveDate,
    pub total_calories: i64,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateDailyCalorie {
    pub date: Option<NaiveDate>,
    pub total_calories: Option<i64>,
}

/// Result of logging one food item: the new entry plus the day's total after it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggedFood {
    pub log: FoodLogEntry,
    pub daily_calorie: DailyCalorie,
}

/// Materialized total next to the sum recomputed from the day's log entries.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DayReconciliation {
    pub date: NaiveDate,
    pub materialized: Option<i64>,
    pub recomputed: i64,
    pub entry_count: usize,
}

impl DayReconciliation {
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        match self.materialized {
            Some(total) => total == self.recomputed,
            None => self.entry_count == 0,
        }
    }
}
