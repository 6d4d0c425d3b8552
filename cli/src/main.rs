mod ai;
mod commands;
mod config;
mod server;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::process;
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::ai::{FoodAnalyzer, OpenAiClient, RetryPolicy};
use crate::commands::{
    MAX_HISTORY_DAYS, cmd_analyze, cmd_history, cmd_log, cmd_today, cmd_user_create,
    cmd_user_goal, cmd_user_show, cmd_verify,
};
use crate::config::{Config, StorageKind};
use bite_core::service::CalorieService;

const SERVE_LOG_FILTER: &str = "bite=info,bite_core=info,tower_http=info";
const CLI_LOG_FILTER: &str = "bite=warn,bite_core=warn";

#[derive(Parser)]
#[command(
    name = "bite",
    version,
    about = "A calorie tracker with AI-assisted food logging"
)]
struct Cli {
    /// Storage backend (overrides BITE_STORAGE)
    #[arg(long, global = true, value_enum)]
    storage: Option<StorageKind>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "5000")]
        port: u16,
        /// Address to bind to
        #[arg(long, default_value = "127.0.0.1")]
        bind: String,
        /// Do not create the demo user on startup
        #[arg(long)]
        no_seed: bool,
    },
    /// Log something you ate
    Log {
        /// Food name
        food: String,
        /// Calories in the portion you ate
        calories: i64,
        /// User to log for
        #[arg(short, long, default_value = "1")]
        user: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show today's entries and remaining calories
    Today {
        /// User to show
        #[arg(short, long, default_value = "1")]
        user: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show daily totals for the last N days
    History {
        /// Number of days to show
        #[arg(
            short,
            long,
            default_value = "7",
            value_parser = clap::value_parser!(u32).range(1..=MAX_HISTORY_DAYS)
        )]
        days: u32,
        /// User to show
        #[arg(short, long, default_value = "1")]
        user: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Manage users
    User {
        #[command(subcommand)]
        command: UserCommands,
    },
    /// Estimate calories from a description (e.g. "two eggs and toast")
    Analyze {
        /// What you ate
        text: String,
        /// Log every recognized item
        #[arg(long)]
        log: bool,
        /// User to log for
        #[arg(short, long, default_value = "1")]
        user: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Check a day's stored total against its food log
    Verify {
        /// Date to check (YYYY-MM-DD, default: today)
        #[arg(long)]
        date: Option<String>,
        /// User to check
        #[arg(short, long, default_value = "1")]
        user: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum UserCommands {
    /// Create a user
    Create {
        username: String,
        password: String,
        /// Email address
        #[arg(long)]
        email: Option<String>,
        /// Daily calorie goal (default: 2000)
        #[arg(long)]
        goal: Option<i64>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show a user's profile
    Show {
        /// User ID
        #[arg(default_value = "1")]
        id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Set a user's daily calorie goal
    Goal {
        /// Calories per day
        calories: i64,
        /// User to update
        #[arg(short, long, default_value = "1")]
        user: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing(default_filter: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let filter = if matches!(cli.command, Commands::Serve { .. }) {
        SERVE_LOG_FILTER
    } else {
        CLI_LOG_FILTER
    };
    init_tracing(filter);

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn build_analyzer(config: &Config) -> Result<Option<Arc<dyn FoodAnalyzer>>> {
    let Some(key) = config.openai_api_key.as_deref() else {
        return Ok(None);
    };
    let client = OpenAiClient::new(key, &config.openai_base_url)?;
    Ok(Some(Arc::new(client)))
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.storage)?;
    let service = CalorieService::new(config.open_store()?);

    if !matches!(cli.command, Commands::Serve { no_seed: true, .. }) {
        service.ensure_demo_user()?;
    }

    match cli.command {
        Commands::Serve { port, bind, .. } => {
            let state = server::AppState::new(service, build_analyzer(&config)?, RetryPolicy::default());
            server::start_server(state, &bind, port).await
        }
        Commands::Log {
            food,
            calories,
            user,
            json,
        } => cmd_log(&service, user, &food, calories, json),
        Commands::Today { user, json } => cmd_today(&service, user, json),
        Commands::History { days, user, json } => cmd_history(&service, user, days, json),
        Commands::User { command } => match command {
            UserCommands::Create {
                username,
                password,
                email,
                goal,
                json,
            } => cmd_user_create(&service, &username, &password, email, goal, json),
            UserCommands::Show { id, json } => cmd_user_show(&service, id, json),
            UserCommands::Goal {
                calories,
                user,
                json,
            } => cmd_user_goal(&service, user, calories, json),
        },
        Commands::Analyze {
            text,
            log,
            user,
            json,
        } => {
            let analyzer = build_analyzer(&config)?;
            cmd_analyze(&service, analyzer.as_deref(), user, &text, log, json).await
        }
        Commands::Verify { date, user, json } => cmd_verify(&service, user, date, json),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_days_are_bounded() {
        let days = |arg: &str| match Cli::try_parse_from(["bite", "history", "--days", arg]) {
            Ok(Cli {
                command: Commands::History { days, .. },
                ..
            }) => Some(days),
            _ => None,
        };
        assert_eq!(days("30"), Some(30));
        assert_eq!(days("3660"), Some(3660));
        assert_eq!(days("0"), None);
        assert_eq!(days("3661"), None);
        assert_eq!(days("4000000000"), None);
    }
}
