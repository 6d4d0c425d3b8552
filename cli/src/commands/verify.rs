use anyhow::Result;
use std::process;

use bite_core::service::CalorieService;

use super::helpers::parse_date;

/// Compare the stored daily total with the sum of that day's log entries.
/// Exits with status 1 when they disagree.
pub(crate) fn cmd_verify(
    service: &CalorieService,
    user_id: i64,
    date: Option<String>,
    json: bool,
) -> Result<()> {
    let date = parse_date(date)?;
    let check = service.recompute_daily_calories(user_id, date)?;
    let consistent = check.is_consistent();

    if json {
        println!("{}", serde_json::to_string_pretty(&check)?);
    } else {
        let count = check.entry_count;
        let recomputed = check.recomputed;
        let stored = check
            .materialized
            .map_or_else(|| "none".to_string(), |t| format!("{t} kcal"));
        println!("{date}: {count} entries, {recomputed} kcal logged, stored total {stored}");
        if consistent {
            println!("OK");
        } else {
            eprintln!("Mismatch: stored total does not match the food log");
        }
    }

    if !consistent {
        process::exit(1);
    }
    Ok(())
}
