mod analyze;
mod helpers;
mod log;
mod summary;
mod user;
mod verify;

use anyhow::{Result, bail};

use bite_core::models::User;
use bite_core::service::CalorieService;

pub(crate) use analyze::cmd_analyze;
pub(crate) use log::{cmd_log, cmd_today};
pub(crate) use summary::{MAX_HISTORY_DAYS, cmd_history};
pub(crate) use user::{cmd_user_create, cmd_user_goal, cmd_user_show};
pub(crate) use verify::cmd_verify;

/// Look up the user a command acts on.
pub(super) fn require_user(service: &CalorieService, user_id: i64) -> Result<User> {
    match service.get_user(user_id)? {
        Some(user) => Ok(user),
        None => bail!("User {user_id} not found. Create one with `bite user create`"),
    }
}
