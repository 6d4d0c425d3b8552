use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, SubsecRound, Utc};

use crate::day::{DayWindow, local_day};
use crate::error::{CoreError, Result};
use crate::models::{
    DEFAULT_DAILY_CALORIE_GOAL, DEMO_EMAIL, DEMO_PASSWORD, DEMO_USERNAME, DailyCalorie,
    DayReconciliation, FoodLogEntry, LoggedFood, NewFoodLogEntry, NewUser, UpdateUser, User,
    add_to_total, validate_food_log, validate_new_user, validate_user_update,
};
use crate::store::Storage;

/// Days before today covered by a daily-calories listing with no start day.
pub const DEFAULT_HISTORY_DAYS: i64 = 7;

/// Source of "now". Swapped for a fixed clock in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Use cases over a [`Storage`] backend. Every food log write goes through
/// [`CalorieService::log_food`] so the daily totals stay in step with the log.
#[derive(Clone)]
pub struct CalorieService {
    store: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
}

impl CalorieService {
    pub fn new(store: Arc<dyn Storage>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    pub fn with_clock(store: Arc<dyn Storage>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Local calendar day right now.
    #[must_use]
    pub fn today(&self) -> NaiveDate {
        local_day(self.clock.now())
    }

    // --- Users ---

    pub fn create_user(&self, user: &NewUser) -> Result<User> {
        validate_new_user(user)?;
        let user = NewUser {
            username: user.username.trim().to_string(),
            ..user.clone()
        };
        let created = self.store.create_user(&user)?;
        tracing::info!(user_id = created.id, username = %created.username, "created user");
        Ok(created)
    }

    pub fn get_user(&self, id: i64) -> Result<Option<User>> {
        self.store.get_user(id)
    }

    pub fn update_user(&self, id: i64, update: &UpdateUser) -> Result<User> {
        validate_user_update(update)?;
        self.store.update_user(id, update)
    }

    /// The user whose credentials match, if any.
    pub fn authenticate(&self, username: &str, password: &str) -> Result<Option<User>> {
        Ok(self
            .store
            .get_user_by_username(username)?
            .filter(|u| u.password == password))
    }

    /// Create the demo account unless a user with its name already exists.
    pub fn ensure_demo_user(&self) -> Result<User> {
        if let Some(user) = self.store.get_user_by_username(DEMO_USERNAME)? {
            return Ok(user);
        }
        let user = self.store.create_user(&NewUser {
            username: DEMO_USERNAME.to_string(),
            password: DEMO_PASSWORD.to_string(),
            email: Some(DEMO_EMAIL.to_string()),
            daily_calorie_goal: Some(DEFAULT_DAILY_CALORIE_GOAL),
        })?;
        tracing::info!(user_id = user.id, "seeded demo user");
        Ok(user)
    }

    // --- Food log ---

    /// Record what a user ate and add it to that day's running total.
    ///
    /// The total is bumped for the local day of the entry's own timestamp,
    /// through the store's atomic increment. Timestamps are kept at
    /// millisecond precision so every entry falls inside a day window.
    pub fn log_food(&self, user_id: i64, food_name: &str, calories: i64) -> Result<LoggedFood> {
        let food_name = validate_food_log(food_name, calories)?;
        if self.store.get_user(user_id)?.is_none() {
            return Err(CoreError::not_found("User", user_id));
        }

        let created_at = self.clock.now().trunc_subsecs(3);
        let day = local_day(created_at);
        // Checked before the entry is written: a rejected total must not
        // leave a log behind.
        if let Some(current) = self.store.get_daily_calorie_by_date(user_id, day)? {
            add_to_total(current.total_calories, calories)?;
        }

        let log = self.store.create_food_log(&NewFoodLogEntry {
            user_id,
            food_name,
            calories,
            created_at,
        })?;
        let daily_calorie = self
            .store
            .increment_daily_calories(user_id, day, calories)?;

        tracing::debug!(
            user_id,
            log_id = log.id,
            calories,
            day = %daily_calorie.date,
            total = daily_calorie.total_calories,
            "logged food"
        );
        Ok(LoggedFood { log, daily_calorie })
    }

    pub fn food_log(&self, id: i64) -> Result<Option<FoodLogEntry>> {
        self.store.get_food_log(id)
    }

    pub fn food_logs(&self, user_id: i64) -> Result<Vec<FoodLogEntry>> {
        self.store.list_food_logs(user_id)
    }

    /// Entries from the start of `start` through the end of `end`, local time.
    pub fn food_logs_between(
        &self,
        user_id: i64,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<FoodLogEntry>> {
        self.store.list_food_logs_in_range(
            user_id,
            DayWindow::of(start).start,
            DayWindow::of(end).end,
        )
    }

    pub fn food_logs_today(&self, user_id: i64) -> Result<Vec<FoodLogEntry>> {
        let today = self.today();
        self.food_logs_between(user_id, today, today)
    }

    // --- Daily totals ---

    pub fn daily_calorie_for(&self, user_id: i64, day: NaiveDate) -> Result<Option<DailyCalorie>> {
        self.store.get_daily_calorie_by_date(user_id, day)
    }

    /// Totals for `start..=end`. A missing start means a week before today,
    /// a missing end means today.
    pub fn daily_calories_between(
        &self,
        user_id: i64,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<DailyCalorie>> {
        let today = self.today();
        let start = start.unwrap_or_else(|| today - Duration::days(DEFAULT_HISTORY_DAYS));
        let end = end.unwrap_or(today);
        self.store.list_daily_calories_in_range(
            user_id,
            DayWindow::of(start).start,
            DayWindow::of(end).end,
        )
    }

    /// Re-sum the day's log entries and compare with the stored total.
    pub fn recompute_daily_calories(
        &self,
        user_id: i64,
        day: NaiveDate,
    ) -> Result<DayReconciliation> {
        let logs = self.food_logs_between(user_id, day, day)?;
        let materialized = self
            .store
            .get_daily_calorie_by_date(user_id, day)?
            .map(|d| d.total_calories);
        Ok(DayReconciliation {
            date: day,
            materialized,
            recomputed: logs.iter().map(|l| l.calories).sum(),
            entry_count: logs.len(),
        })
    }
}
