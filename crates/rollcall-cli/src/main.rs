use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rollcall_hw::Camera;
use rollcall_storage::{video, MediaLayout, UserStore};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod config;
mod enroll;

use config::Config;

#[derive(Parser)]
#[command(name = "rollcall", about = "Enroll users into the attendance directory")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the user table and media roots
    Init,
    /// Capture a short session and enroll its best frame
    Enroll {
        /// Name of the person being enrolled
        #[arg(short, long)]
        name: String,
        /// Number of frames to sample (overrides config)
        #[arg(short, long)]
        frames: Option<i64>,
    },
    /// Show an enrolled user
    Show {
        id: i64,
        /// Write the stored profile image to this path
        #[arg(long)]
        export: Option<PathBuf>,
    },
    /// List enrolled users
    List {
        #[arg(long)]
        json: bool,
    },
    /// List V4L2 capture devices
    Devices,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load().context("loading configuration")?;
    tracing::debug!(?config, "configuration resolved");

    match cli.command {
        Commands::Init => {
            let store = UserStore::new(&config.db_path);
            store.bootstrap().context("bootstrapping user table")?;
            MediaLayout::new(&config.image_root, &config.video_root)
                .ensure_roots()
                .context("creating media roots")?;
            println!("database: {}", config.db_path.display());
            println!("images:   {}", config.image_root.display());
            println!("videos:   {}", config.video_root.display());
        }
        Commands::Enroll { name, frames } => {
            let budget = frames.unwrap_or(config.frames_per_enroll);
            let outcome = enroll::enroll(&config, &name, budget)
                .with_context(|| format!("enrolling {name:?}"))?;
            println!(
                "Enrolled {} as user {} (score {}, {} frames, took {:.1} secs)",
                outcome.name,
                outcome.user_id,
                outcome.best_score,
                outcome.samples_taken,
                outcome.elapsed.as_secs_f64()
            );
            println!("  image: {}", outcome.image_path.display());
            match &outcome.video_path {
                Some(path) => println!("  video: {}", path.display()),
                None => println!("  video: not recorded"),
            }
        }
        Commands::Show { id, export } => {
            let store = UserStore::new(&config.db_path);
            store.bootstrap().context("bootstrapping user table")?;
            let record = store
                .get(id)
                .context("querying user")?
                .with_context(|| format!("no user with id {id}"))?;
            let image = record.profile_image.unwrap_or_default();
            println!("id:    {}", record.id);
            println!("name:  {}", record.name);
            println!("image: {} bytes", image.len());
            let layout = MediaLayout::new(&config.image_root, &config.video_root);
            let clip_path = layout.video_path(record.id, &record.name);
            match std::fs::read(&clip_path) {
                Ok(clip) => println!(
                    "video: {} ({} frames)",
                    clip_path.display(),
                    video::split_frames(&clip).len()
                ),
                Err(_) => println!("video: none"),
            }
            if let Some(path) = export {
                std::fs::write(&path, &image)
                    .with_context(|| format!("writing {}", path.display()))?;
                println!("exported to {}", path.display());
            }
        }
        Commands::List { json } => {
            let store = UserStore::new(&config.db_path);
            store.bootstrap().context("bootstrapping user table")?;
            let users = store.list().context("listing users")?;
            if json {
                println!("{}", serde_json::to_string_pretty(&users)?);
            } else if users.is_empty() {
                println!("No users enrolled");
            } else {
                for user in users {
                    println!("{:>5}  {:<24} {} bytes", user.id, user.name, user.image_bytes);
                }
            }
        }
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No capture devices found");
            }
            for dev in devices {
                println!("{}  {} ({}, {})", dev.path, dev.name, dev.driver, dev.bus);
            }
        }
    }

    Ok(())
}
