use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "lectio-cli", version, about = "Lectio reading program admin CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Family battle health scan and repair
    Battle {
        #[command(subcommand)]
        action: commands::battle::BattleAction,
    },
    /// Streak derivation and migration
    Streak {
        #[command(subcommand)]
        action: commands::streak::StreakAction,
    },
    /// Program phase lifecycle
    Phase {
        #[command(subcommand)]
        action: commands::phase::PhaseAction,
    },
    /// Student management
    Student {
        #[command(subcommand)]
        action: commands::student::StudentAction,
    },
    /// Family management
    Family {
        #[command(subcommand)]
        action: commands::family::FamilyAction,
    },
    /// Reading session log
    Session {
        #[command(subcommand)]
        action: commands::session::SessionAction,
    },
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Battle { action } => commands::battle::run(action),
        Commands::Streak { action } => commands::streak::run(action),
        Commands::Phase { action } => commands::phase::run(action),
        Commands::Student { action } => commands::student::run(action),
        Commands::Family { action } => commands::family::run(action),
        Commands::Session { action } => commands::session::run(action),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
