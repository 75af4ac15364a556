use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rollcall_core::{ArcFaceEmbedder, Gallery, ARCFACE_MODEL_FILE};
use rollcall_hw::{Camera, FrameSource};
use rollcall_ledger::{SessionId, SqliteLedger};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall attendance administration")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List V4L2 capture devices
    Devices,
    /// Capture a frame and save it (camera diagnostics)
    Capture {
        #[arg(short, long, default_value = "/dev/video0")]
        device: String,
        #[arg(short, long, default_value = "rollcall-capture.png")]
        output: PathBuf,
        /// Frames to discard while exposure settles
        #[arg(long, default_value_t = 5)]
        warmup: usize,
        #[arg(long, default_value_t = 640)]
        width: u32,
        #[arg(long, default_value_t = 480)]
        height: u32,
    },
    /// List attendance sessions
    Sessions {
        /// Ledger database (default: $XDG_DATA_HOME/rollcall/attendance.db)
        #[arg(long)]
        db: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// List attendance entries
    Entries {
        /// Only entries from this session (e.g. 20261018_091502_7f3a)
        #[arg(short, long)]
        session: Option<String>,
        #[arg(long)]
        db: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// Write attendance entries to a CSV file
    Export {
        /// Only entries from this session; all sessions when omitted
        #[arg(short, long)]
        session: Option<String>,
        #[arg(short, long, default_value = "attendance.csv")]
        output: PathBuf,
        #[arg(long)]
        db: Option<PathBuf>,
    },
    /// Enroll the face gallery and show who it recognizes
    Gallery {
        #[arg(long, default_value = "data/faces")]
        faces: PathBuf,
        #[arg(long)]
        model_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No capture devices found");
            }
            for dev in devices {
                println!("{}  {} ({}, {})", dev.path, dev.name, dev.driver, dev.bus);
            }
        }
        Commands::Capture {
            device,
            output,
            warmup,
            width,
            height,
        } => capture(&device, &output, warmup, width, height)?,
        Commands::Sessions { db, json } => {
            let ledger = open_ledger(db)?;
            let sessions = ledger.sessions()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&sessions)?);
            } else if sessions.is_empty() {
                println!("No sessions recorded");
            } else {
                println!("{:<16}  {:>7}  {:<19}  {:<19}", "SESSION", "ENTRIES", "FIRST", "LAST");
                for s in sessions {
                    println!(
                        "{:<16}  {:>7}  {:<19}  {:<19}",
                        s.session.as_str(),
                        s.entries,
                        s.first.format("%Y-%m-%d %H:%M:%S").to_string(),
                        s.last.format("%Y-%m-%d %H:%M:%S").to_string()
                    );
                }
            }
        }
        Commands::Entries { session, db, json } => {
            let ledger = open_ledger(db)?;
            let session = session.map(SessionId::from);
            let entries = ledger.entries(session.as_ref())?;
            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else if entries.is_empty() {
                println!("No entries");
            } else {
                for e in entries {
                    println!(
                        "{}  {:<16}  {:<20}  {}",
                        e.timestamp.format("%Y-%m-%d %H:%M:%S"),
                        e.session.as_str(),
                        e.identity,
                        e.emotion
                    );
                }
            }
        }
        Commands::Export {
            session,
            output,
            db,
        } => {
            let ledger = open_ledger(db)?;
            let session = session.map(SessionId::from);
            let entries = ledger.entries(session.as_ref())?;
            if entries.is_empty() {
                tracing::warn!(session = ?session, "no entries to export");
            }
            let rows = rollcall_ledger::export_csv(&entries, &output)
                .with_context(|| format!("failed to export to {}", output.display()))?;
            println!("Exported {rows} entries to {}", output.display());
        }
        Commands::Gallery { faces, model_dir } => {
            let model_dir = model_dir.unwrap_or_else(rollcall_core::default_model_dir);
            let model = model_dir.join(ARCFACE_MODEL_FILE);
            let mut embedder = ArcFaceEmbedder::load(&model.to_string_lossy())
                .with_context(|| format!("failed to load {}", model.display()))?;
            let gallery = Gallery::enroll_dir(&faces, &mut embedder)?;

            let mut per_person: BTreeMap<&str, usize> = BTreeMap::new();
            for face in gallery.faces() {
                *per_person.entry(face.label.as_str()).or_default() += 1;
            }
            if per_person.is_empty() {
                println!("No usable face images under {}", faces.display());
            }
            for (label, count) in per_person {
                println!("{label}: {count} image(s)");
            }
        }
    }

    Ok(())
}

fn open_ledger(db: Option<PathBuf>) -> Result<SqliteLedger> {
    let path = db.unwrap_or_else(rollcall_ledger::default_db_path);
    if !path.exists() {
        bail!("no attendance ledger at {}", path.display());
    }
    SqliteLedger::open(&path).with_context(|| format!("failed to open {}", path.display()))
}

fn capture(device: &str, output: &Path, warmup: usize, width: u32, height: u32) -> Result<()> {
    let mut camera = Camera::open(device, width, height)?;
    println!(
        "{}: {}x{} {} ({:?})",
        device,
        camera.width,
        camera.height,
        camera.fourcc,
        camera.pixel_format()
    );

    let mut frame = camera.next_frame()?;
    for _ in 0..warmup {
        frame = camera.next_frame()?;
    }

    let saved = match frame.channels {
        1 => image::GrayImage::from_raw(frame.width, frame.height, frame.data.clone())
            .map(|img| img.save(output)),
        _ => image::RgbImage::from_raw(frame.width, frame.height, frame.data.clone())
            .map(|img| img.save(output)),
    };
    saved
        .context("frame buffer does not match its dimensions")?
        .with_context(|| format!("failed to write {}", output.display()))?;
    println!("Saved frame #{} to {}", frame.sequence, output.display());
    Ok(())
}
