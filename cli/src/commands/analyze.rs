use anyhow::{Context, Result, bail};
use serde::Serialize;
use std::process;

use bite_core::models::LoggedFood;
use bite_core::recognition::FoodRecognition;
use bite_core::service::CalorieService;

use super::helpers::json_error;
use crate::ai::FoodAnalyzer;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeOutput {
    #[serde(flatten)]
    recognition: FoodRecognition,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    logged: Vec<LoggedFood>,
}

pub(crate) async fn cmd_analyze(
    service: &CalorieService,
    analyzer: Option<&dyn FoodAnalyzer>,
    user_id: i64,
    text: &str,
    log: bool,
    json: bool,
) -> Result<()> {
    let Some(analyzer) = analyzer else {
        bail!("OPENAI_API_KEY is not set. Add it to the environment or a .env file");
    };
    let text = text.trim();
    if text.is_empty() {
        bail!("Please enter what you ate");
    }

    let mut recognition = analyzer
        .analyze(text)
        .await
        .context("Failed to analyze food description")?;
    recognition.transcript = Some(text.to_string());

    if recognition.food_items.is_empty() {
        if json {
            println!("{}", json_error(&format!("No food recognized in '{text}'")));
        } else {
            eprintln!("No food recognized in '{text}'");
        }
        process::exit(2);
    }

    let logged = if log {
        log_items(service, user_id, &recognition)?
    } else {
        Vec::new()
    };

    if json {
        let out = AnalyzeOutput {
            recognition,
            logged,
        };
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    for item in &recognition.food_items {
        let name = &item.name;
        let cal = item.calories;
        println!("  {name} — {cal:.0} kcal");
    }
    let total = recognition.total_calories;
    println!("  TOTAL: {total:.0} kcal");

    if let Some(last) = logged.last() {
        let count = logged.len();
        let day_total = last.daily_calorie.total_calories;
        let date = last.daily_calorie.date;
        println!("\nLogged {count} item(s). Total for {date}: {day_total} kcal");
    }

    Ok(())
}

fn log_items(
    service: &CalorieService,
    user_id: i64,
    recognition: &FoodRecognition,
) -> Result<Vec<LoggedFood>> {
    recognition
        .food_items
        .iter()
        .map(|item| {
            service
                .log_food(user_id, &item.name, item.logged_calories())
                .with_context(|| format!("Failed to log '{}'", item.name))
        })
        .collect()
}
