use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info};

use appraisal::db::Database;
use appraisal::logging::{self, LogFormat};
use appraisal::worker::PoolResult;
use appraisal::{
    load_config, value_property, Config, DedupIndex, DocumentFormat, MemoryDedupIndex, Pipeline,
    PipelineConfig, SqliteDedupIndex, StorageError, Submission, Upload, ValuationRequest,
    WorkerPool,
};

/// Property-assessment document intake and valuation
#[derive(Parser, Debug)]
#[command(name = "appraisal", version)]
struct Cli {
    /// Log output format (text or json)
    #[arg(long, global = true, default_value = "text")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run uploads through the ingestion pipeline, one JSON line per run
    Ingest {
        #[arg(long, value_name = "FILE")]
        config: PathBuf,

        #[arg(long)]
        tenant: String,

        #[arg(long)]
        workfile: String,

        /// Declared mime type for every file (guessed from the name otherwise)
        #[arg(long)]
        mime: Option<String>,

        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Reconcile a valuation request and print the response
    Value {
        #[arg(long, value_name = "FILE")]
        config: PathBuf,

        request: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = logging::init(cli.log_format) {
        eprintln!("Failed to initialise logging: {}", e);
        return ExitCode::FAILURE;
    }

    let result = match cli.command {
        Command::Ingest {
            config,
            tenant,
            workfile,
            mime,
            files,
        } => ingest(&config, &tenant, &workfile, mime.as_deref(), &files),
        Command::Value { config, request } => value(&config, &request),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "Command failed");
            ExitCode::FAILURE
        }
    }
}

fn ingest(
    config_path: &Path,
    tenant: &str,
    workfile: &str,
    mime: Option<&str>,
    files: &[PathBuf],
) -> appraisal::Result<ExitCode> {
    let config = load_config(config_path)?;

    let mut uploads = Vec::with_capacity(files.len());
    for file in files {
        uploads.push(read_upload(file, tenant, workfile, mime)?);
    }
    let submission = Submission::new(uploads, &config.limits)?;

    let pool = WorkerPool::new(Arc::new(build_pipeline(&config)?), config.worker_count)?;
    let in_flight_limit = config.worker_count.max(1);
    let mut in_flight = 0;
    let mut all_ok = true;

    info!(uploads = submission.len(), "Ingesting submission");
    for upload in submission.into_uploads() {
        if in_flight == in_flight_limit {
            all_ok &= print_result(pool.recv_result())?;
            in_flight -= 1;
        }
        pool.submit(upload)?;
        in_flight += 1;
    }
    for _ in 0..in_flight {
        all_ok &= print_result(pool.recv_result())?;
    }

    pool.shutdown();
    pool.wait();

    Ok(if all_ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn read_upload(
    file: &Path,
    tenant: &str,
    workfile: &str,
    mime: Option<&str>,
) -> appraisal::Result<Upload> {
    let content = std::fs::read(file).map_err(|e| StorageError::ReadFile {
        path: file.to_path_buf(),
        source: e,
    })?;
    let filename = file
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "upload".to_string());
    let declared = match mime {
        Some(mime) => mime.to_string(),
        None => DocumentFormat::from_filename(&filename)
            .map(|f| f.mime_type().to_string())
            .unwrap_or_else(|| "application/octet-stream".to_string()),
    };

    Ok(Upload::new(tenant, workfile, filename, declared, content))
}

fn build_pipeline(config: &Config) -> appraisal::Result<Pipeline> {
    let pipeline_config = Arc::new(PipelineConfig::from_config(config));

    let pipeline = match &config.database_path {
        Some(path) => {
            let db = Database::open(Path::new(path))?;
            let dedup: Arc<dyn DedupIndex> = Arc::new(SqliteDedupIndex::new(db.clone()));
            Pipeline::from_config(pipeline_config, dedup).with_run_log(db)
        }
        None => Pipeline::from_config(pipeline_config, Arc::new(MemoryDedupIndex::new())),
    };
    Ok(pipeline)
}

/// Prints one run as a JSON line. Returns false for infrastructure faults.
fn print_result(result: Option<PoolResult>) -> appraisal::Result<bool> {
    let Some(PoolResult { upload_id, result }) = result else {
        return Err(appraisal::WorkerError::ChannelClosed.into());
    };

    match result {
        Ok(run) => {
            println!("{}", serde_json::to_string(&run)?);
            Ok(true)
        }
        Err(e) => {
            error!(upload_id = %upload_id, error = %e, "Upload could not be processed");
            let line = serde_json::json!({ "upload_id": upload_id, "error": e.to_string() });
            println!("{}", line);
            Ok(false)
        }
    }
}

fn value(config_path: &Path, request_path: &Path) -> appraisal::Result<ExitCode> {
    let config = load_config(config_path)?;
    let content = std::fs::read_to_string(request_path).map_err(|e| StorageError::ReadFile {
        path: request_path.to_path_buf(),
        source: e,
    })?;
    let request: ValuationRequest = serde_json::from_str(&content)?;

    let response = value_property(&request, &config.valuation.settings, &config.valuation.policy());
    println!("{}", serde_json::to_string_pretty(&response)?);

    Ok(if response.errors.is_empty() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(2)
    })
}
