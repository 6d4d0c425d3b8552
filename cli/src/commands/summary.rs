use anyhow::Result;
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::HashMap;
use std::process;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use bite_core::service::CalorieService;

use super::require_user;

/// Longest history the `history` command will show, about ten years.
pub(crate) const MAX_HISTORY_DAYS: i64 = 3660;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HistoryDay {
    date: NaiveDate,
    total_calories: i64,
    daily_calorie_goal: i64,
}

/// One row per day, newest first, with zero for days that have no total.
fn history_days(
    service: &CalorieService,
    user_id: i64,
    days: u32,
    goal: i64,
) -> Result<Vec<HistoryDay>> {
    let today = service.today();
    let first = today - chrono::Duration::days(i64::from(days) - 1);
    let totals: HashMap<NaiveDate, i64> = service
        .daily_calories_between(user_id, Some(first), Some(today))?
        .into_iter()
        .map(|d| (d.date, d.total_calories))
        .collect();

    Ok((0..days)
        .map(|i| today - chrono::Duration::days(i64::from(i)))
        .map(|date| HistoryDay {
            date,
            total_calories: totals.get(&date).copied().unwrap_or(0),
            daily_calorie_goal: goal,
        })
        .collect())
}

pub(crate) fn cmd_history(service: &CalorieService, user_id: i64, days: u32, json: bool) -> Result<()> {
    #[derive(Tabled)]
    struct HistoryRow {
        #[tabled(rename = "Date")]
        date: String,
        #[tabled(rename = "Calories")]
        calories: String,
        #[tabled(rename = "Goal")]
        goal: String,
        #[tabled(rename = "Remaining")]
        remaining: String,
    }

    let user = require_user(service, user_id)?;
    let history = history_days(service, user_id, days, user.daily_calorie_goal)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&history)?);
        return Ok(());
    }

    if history.iter().all(|d| d.total_calories == 0) {
        eprintln!("No entries in the last {days} days");
        process::exit(2);
    }

    let rows: Vec<HistoryRow> = history
        .iter()
        .map(|d| HistoryRow {
            date: d.date.to_string(),
            calories: d.total_calories.to_string(),
            goal: d.daily_calorie_goal.to_string(),
            remaining: (d.daily_calorie_goal - d.total_calories).to_string(),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(1..)).with(Alignment::right()))
        .to_string();
    println!("{table}");

    Ok(())
}
