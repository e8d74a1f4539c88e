use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rollcall_core::{
    AttendanceMarker, DistanceMetric, DuplicatePolicy, Encoding, MarkRequest, MatchConfig,
    DEFAULT_THRESHOLD,
};
use rollcall_store::SqliteStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "rollcall", about = "rollcall attendance CLI")]
struct Cli {
    /// SQLite database (default: $ROLLCALL_DB_PATH or ~/.local/share/rollcall/attendance.db)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage the subject catalogue
    Subject {
        #[command(subcommand)]
        action: SubjectAction,
    },
    /// Enroll a face encoding for a student
    Enroll {
        /// Student identity
        #[arg(short, long)]
        student: String,
        /// JSON file holding one encoding (array of numbers); omit to enroll a placeholder
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
    /// Match a batch of captured encodings and mark attendance
    Mark {
        /// Subject code
        #[arg(short, long)]
        subject: String,
        /// JSON file holding the batch (array of encodings)
        #[arg(short, long)]
        file: PathBuf,
        /// Session id (default: a fresh id for this batch)
        #[arg(long)]
        session: Option<String>,
        /// Maximum distance for a match
        #[arg(long, default_value_t = DEFAULT_THRESHOLD)]
        threshold: f32,
        /// Distance metric: euclidean or cosine
        #[arg(long, default_value = "euclidean")]
        metric: DistanceMetric,
        /// Duplicate suppression: batch or store
        #[arg(long, default_value = "batch")]
        duplicate_policy: DuplicatePolicy,
    },
    /// List attendance marks for a subject or a student
    Attendance {
        /// Subject code
        #[arg(short, long)]
        subject: Option<String>,
        /// Student id; with --subject, only that subject's marks
        #[arg(long)]
        student: Option<String>,
    },
    /// Show database status
    Status,
}

#[derive(Subcommand)]
enum SubjectAction {
    /// Add a subject, or rename an existing one
    Add {
        #[arg(short, long)]
        code: String,
        #[arg(short, long)]
        name: String,
    },
    /// List subjects
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let db_path = cli.db.unwrap_or_else(rollcall_store::default_db_path);
    tracing::debug!(db = %db_path.display(), "opening database");
    let store = Arc::new(
        SqliteStore::open(&db_path)
            .await
            .with_context(|| format!("opening {}", db_path.display()))?,
    );

    match cli.command {
        Commands::Subject { action } => match action {
            SubjectAction::Add { code, name } => {
                let subject = store.upsert_subject(&code, &name).await?;
                println!("{}  {}  {}", subject.code, subject.name, subject.id);
            }
            SubjectAction::List => {
                let subjects = store.list_subjects().await?;
                if subjects.is_empty() {
                    println!("No subjects");
                }
                for s in subjects {
                    println!("{}  {}", s.code, s.name);
                }
            }
        },
        Commands::Enroll { student, file } => {
            let encoding = match file {
                Some(path) => {
                    let values: Vec<f32> = serde_json::from_value(read_json(&path)?)
                        .with_context(|| format!("{} must hold an array of numbers", path.display()))?;
                    Encoding::new(values)
                }
                None => Encoding::placeholder(),
            };
            let id = store.enroll(&student, &encoding).await?;
            println!("Enrolled {}-dim encoding for {student}: {id}", encoding.len());
        }
        Commands::Mark {
            subject,
            file,
            session,
            threshold,
            metric,
            duplicate_policy,
        } => {
            if !(threshold.is_finite() && threshold > 0.0) {
                bail!("threshold must be a positive number");
            }
            let body = serde_json::json!({
                "subject_code": &subject,
                "encodings": read_json(&file)?,
                "session_id": session,
            });
            let request = MarkRequest::from_value(&body)?;
            let config = MatchConfig {
                metric,
                threshold,
                duplicate_policy,
            };
            let marker = AttendanceMarker::with_backend(store.clone(), config);
            let report = marker
                .mark(&request, || uuid::Uuid::new_v4().to_string())
                .await
                .with_context(|| format!("marking attendance for {subject}"))?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Attendance { subject, student } => {
            let subject = match subject {
                Some(code) => match store.subject_by_code(&code).await? {
                    Some(found) => Some(found),
                    None => bail!("unknown subject: {code}"),
                },
                None => None,
            };
            match (student, subject) {
                (Some(student), subject) => {
                    let subject_id = subject.as_ref().map(|s| s.id.as_str());
                    let records = store.attendance_for_student(&student, subject_id).await?;
                    if records.is_empty() {
                        println!("No attendance recorded for {student}");
                    }
                    for r in records {
                        println!("{}  {}  {}", r.marked_at.to_rfc3339(), r.subject_id, r.session_id);
                    }
                }
                (None, Some(found)) => {
                    let records = store.attendance_for_subject(&found.id).await?;
                    if records.is_empty() {
                        println!("No attendance recorded for {}", found.code);
                    }
                    for r in records {
                        println!("{}  {}  {}", r.marked_at.to_rfc3339(), r.student_id, r.session_id);
                    }
                }
                (None, None) => bail!("pass --subject, --student, or both"),
            }
        }
        Commands::Status => {
            println!("database: {}", db_path.display());
            println!("subjects: {}", store.list_subjects().await?.len());
            println!("gallery encodings: {}", store.gallery_size().await?);
        }
    }

    Ok(())
}

fn read_json(path: &Path) -> Result<serde_json::Value> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}
