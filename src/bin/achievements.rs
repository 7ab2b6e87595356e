//! Train next-achievement models and query recommendations.
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use failure::{bail, Error};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use achievement_sbr::config::{Config, DEFAULT_DB_PATH, DEFAULT_MODEL_DIR};
use achievement_sbr::data::{player_based_split, take_players, TrainingData};
use achievement_sbr::evaluation::mrr_score;
use achievement_sbr::models::{Architecture, Hyperparameters, Loss};
use achievement_sbr::scoring::{decorate, history_from_events, rank, ExcludePolicy};
use achievement_sbr::source::{self, CatalogSource, CsvSource, EventSource};
use achievement_sbr::trainer;

#[derive(Parser, Debug)]
#[command(name = "achievements")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Recommend the achievements a player is likely to unlock next", long_about = None)]
struct Cli {
    /// SQLite database with unlock events and catalogs
    #[arg(long, env = "ACHIEVEMENTS_DB", default_value = DEFAULT_DB_PATH)]
    db: PathBuf,

    /// Directory holding model artifacts
    #[arg(long, env = "ACHIEVEMENTS_MODEL_DIR", default_value = DEFAULT_MODEL_DIR)]
    model_dir: PathBuf,

    /// Read unlock events from this CSV file instead of the database
    #[arg(long)]
    events: Option<PathBuf>,

    /// Read the achievement catalog from this CSV file instead of the database
    #[arg(long)]
    catalog: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fit a model on the first players of a game and save it
    Train {
        /// Game to train for
        game_id: String,

        /// Number of distinct players to train on
        num_players: usize,

        #[arg(long, value_enum, default_value = "recurrent")]
        architecture: ArchitectureArg,

        #[arg(long, value_enum, default_value = "adaptive-hinge")]
        loss: LossArg,

        #[arg(long, default_value = "10")]
        epochs: usize,

        #[arg(long, default_value = "256")]
        batch_size: usize,

        #[arg(long, default_value = "32")]
        embedding_dim: usize,

        #[arg(long, default_value = "0.01")]
        learning_rate: f32,

        #[arg(long, default_value = "0.0")]
        l2: f32,

        #[arg(long, default_value = "42")]
        seed: u64,

        /// Hold out this fraction of players and report their MRR
        #[arg(long, default_value = "0.0")]
        test_fraction: f32,
    },
    /// Rank the achievements a player has not unlocked yet
    Predict {
        player_id: String,

        game_id: String,

        /// Number of recommendations to print
        #[arg(long, default_value = "10")]
        top: usize,

        #[arg(long, value_enum, default_value = "drop-all")]
        exclude: ExcludeArg,
    },
    /// Load unlock events from a CSV file into the database
    ImportEvents { path: PathBuf },
    /// Replace a game's catalog in the database with the entries of a CSV file
    ImportCatalog { game_id: String, path: PathBuf },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ArchitectureArg {
    Recurrent,
    Convolutional,
}

impl From<ArchitectureArg> for Architecture {
    fn from(arg: ArchitectureArg) -> Self {
        match arg {
            ArchitectureArg::Recurrent => Architecture::Recurrent,
            ArchitectureArg::Convolutional => Architecture::Convolutional,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum LossArg {
    Hinge,
    AdaptiveHinge,
}

impl From<LossArg> for Loss {
    fn from(arg: LossArg) -> Self {
        match arg {
            LossArg::Hinge => Loss::Hinge,
            LossArg::AdaptiveHinge => Loss::AdaptiveHinge,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ExcludeArg {
    DropAll,
    DropLast,
}

impl From<ExcludeArg> for ExcludePolicy {
    fn from(arg: ExcludeArg) -> Self {
        match arg {
            ExcludeArg::DropAll => ExcludePolicy::DropAll,
            ExcludeArg::DropLast => ExcludePolicy::DropLast,
        }
    }
}

fn event_source(cli: &Cli, config: &Config) -> Result<Box<dyn EventSource>, Error> {
    Ok(match cli.events {
        Some(ref path) => Box::new(CsvSource::new(Some(path.clone()), None)),
        None => Box::new(config.open_db()?),
    })
}

fn catalog_source(cli: &Cli, config: &Config) -> Result<Box<dyn CatalogSource>, Error> {
    Ok(match cli.catalog {
        Some(ref path) => Box::new(CsvSource::new(None, Some(path.clone()))),
        None => Box::new(config.open_db()?),
    })
}

fn train(
    cli: &Cli,
    config: &Config,
    game_id: &str,
    num_players: usize,
    hyper: Hyperparameters,
    test_fraction: f32,
) -> Result<(), Error> {
    let events = event_source(cli, config)?.unlock_events(game_id, None)?;
    let events = take_players(events, num_players);

    if events.is_empty() {
        bail!("No unlock events found for game {}.", game_id);
    }

    let data = TrainingData::from_events(&events);

    let model = if test_fraction > 0.0 {
        let mut rng = hyper.rng();
        let (train, test) = player_based_split(&data.sequences, &mut rng, test_fraction);

        let model = trainer::fit(game_id, &train, &data.achievements, hyper)?;
        let mrr = mrr_score(&model, &test)?;

        info!(num_test_players = test.len(), mrr, "Holdout evaluation");

        model
    } else {
        trainer::fit(game_id, &data.sequences, &data.achievements, hyper)?
    };

    let path = config.model_store().save(&model)?;
    println!("Saved model to {}", path.display());

    Ok(())
}

fn predict(
    cli: &Cli,
    config: &Config,
    player_id: &str,
    game_id: &str,
    top: usize,
    exclude: ExcludePolicy,
) -> Result<(), Error> {
    let model = config.model_store().load_latest(game_id)?;
    let events = event_source(cli, config)?.unlock_events(game_id, Some(player_id))?;
    let history = history_from_events(&events, player_id);

    let mut ranked = rank(&model, &history, exclude)?;

    if ranked.is_empty() {
        println!("Nothing to recommend for player {}.", player_id);
        return Ok(());
    }

    ranked.truncate(top);

    let catalog = match catalog_source(cli, config).and_then(|source| source.catalog(game_id)) {
        Ok(catalog) => catalog,
        Err(err) => {
            warn!(%err, "Could not load achievement catalog");
            Vec::new()
        }
    };

    println!("{:<4} {:<32} {:>8}  {}", "#", "Achievement", "Score", "Description");

    for (idx, rec) in decorate(&ranked, &catalog).iter().enumerate() {
        let name = rec.display_name.as_ref().unwrap_or(&rec.achievement_code);
        let description = match rec.hidden {
            Some(true) => "(hidden)",
            _ => rec.description.as_ref().map_or("", |x| x.as_str()),
        };

        println!("{:<4} {:<32} {:>8.4}  {}", idx + 1, name, rec.score, description);
    }

    Ok(())
}

fn main() -> Result<(), Error> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config = Config::default()
        .db_path(cli.db.clone())
        .model_dir(cli.model_dir.clone());

    match cli.command {
        Command::Train {
            ref game_id,
            num_players,
            architecture,
            loss,
            epochs,
            batch_size,
            embedding_dim,
            learning_rate,
            l2,
            seed,
            test_fraction,
        } => {
            let hyper = Hyperparameters::new()
                .architecture(architecture.into())
                .loss(loss.into())
                .num_epochs(epochs)
                .batch_size(batch_size)
                .embedding_dim(embedding_dim)
                .learning_rate(learning_rate)
                .l2_penalty(l2)
                .seed(seed);

            train(&cli, &config, game_id, num_players, hyper, test_fraction)
        }
        Command::Predict {
            ref player_id,
            ref game_id,
            top,
            exclude,
        } => predict(&cli, &config, player_id, game_id, top, exclude.into()),
        Command::ImportEvents { ref path } => {
            let events = source::read_unlock_events(path)?;
            let num_inserted = config.open_db()?.save_unlock_events(&events)?;

            println!("Imported {} of {} unlock events.", num_inserted, events.len());
            Ok(())
        }
        Command::ImportCatalog {
            ref game_id,
            ref path,
        } => {
            let entries = source::read_catalog(path, game_id)?;
            config.open_db()?.save_catalog(game_id, &entries)?;

            println!("Imported {} catalog entries for game {}.", entries.len(), game_id);
            Ok(())
        }
    }
}
