use anyhow::Result;

use bite_core::models::{NewUser, UpdateUser, UserProfile};
use bite_core::service::CalorieService;

use super::require_user;

fn print_profile(profile: &UserProfile) {
    let id = profile.id;
    let name = &profile.username;
    let goal = profile.daily_calorie_goal;
    println!("[{id}] {name}");
    if let Some(email) = &profile.email {
        println!("  Email: {email}");
    }
    println!("  Daily goal: {goal} kcal");
}

pub(crate) fn cmd_user_create(
    service: &CalorieService,
    username: &str,
    password: &str,
    email: Option<String>,
    goal: Option<i64>,
    json: bool,
) -> Result<()> {
    let user = service.create_user(&NewUser {
        username: username.to_string(),
        password: password.to_string(),
        email,
        daily_calorie_goal: goal,
    })?;
    let profile = UserProfile::from(user);

    if json {
        println!("{}", serde_json::to_string_pretty(&profile)?);
    } else {
        println!("Created user:");
        print_profile(&profile);
    }
    Ok(())
}

pub(crate) fn cmd_user_show(service: &CalorieService, user_id: i64, json: bool) -> Result<()> {
    let profile = UserProfile::from(require_user(service, user_id)?);

    if json {
        println!("{}", serde_json::to_string_pretty(&profile)?);
    } else {
        print_profile(&profile);
    }
    Ok(())
}

pub(crate) fn cmd_user_goal(
    service: &CalorieService,
    user_id: i64,
    calories: i64,
    json: bool,
) -> Result<()> {
    let user = service.update_user(
        user_id,
        &UpdateUser {
            daily_calorie_goal: Some(calories),
            ..UpdateUser::default()
        },
    )?;
    let profile = UserProfile::from(user);

    if json {
        println!("{}", serde_json::to_string_pretty(&profile)?);
    } else {
        let name = &profile.username;
        println!("Daily goal for {name} set to {calories} kcal");
    }
    Ok(())
}
