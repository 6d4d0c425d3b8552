use anyhow::Result;
use serde::Serialize;
use std::process;

use bite_core::models::FoodLogEntry;
use bite_core::service::CalorieService;

use super::helpers::{json_error, print_food_log_table};
use super::require_user;

pub(crate) fn cmd_log(
    service: &CalorieService,
    user_id: i64,
    food: &str,
    calories: i64,
    json: bool,
) -> Result<()> {
    let logged = service.log_food(user_id, food, calories)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&logged)?);
    } else {
        let name = &logged.log.food_name;
        let cal = logged.log.calories;
        let total = logged.daily_calorie.total_calories;
        let date = logged.daily_calorie.date;
        println!("Logged: {name} ({cal} kcal). Total for {date}: {total} kcal");
    }

    Ok(())
}

pub(crate) fn cmd_today(service: &CalorieService, user_id: i64, json: bool) -> Result<()> {
    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    struct TodayOutput {
        date: chrono::NaiveDate,
        entries: Vec<FoodLogEntry>,
        total_calories: i64,
        daily_calorie_goal: i64,
    }

    let user = require_user(service, user_id)?;
    let date = service.today();
    let entries = service.food_logs_today(user_id)?;
    let total_calories = service
        .daily_calorie_for(user_id, date)?
        .map_or(0, |d| d.total_calories);

    if json {
        if entries.is_empty() {
            println!("{}", json_error(&format!("No entries for {date}")));
            process::exit(2);
        }
        let out = TodayOutput {
            date,
            entries,
            total_calories,
            daily_calorie_goal: user.daily_calorie_goal,
        };
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if entries.is_empty() {
        eprintln!("No entries for {date}");
        process::exit(2);
    }

    println!("=== {date} ===\n");
    print_food_log_table(&entries);

    let goal = user.daily_calorie_goal;
    let remaining = goal - total_calories;
    println!("\n  TOTAL: {total_calories} kcal");
    println!("  GOAL: {goal} kcal");
    if remaining >= 0 {
        println!("  REMAINING: {remaining} kcal");
    } else {
        let over = -remaining;
        println!("  OVER BY: {over} kcal");
    }

    Ok(())
}
