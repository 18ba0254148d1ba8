use clap::Parser;
use tracing::error;

use mongolog_ingest::cli::{Cli, Command, RunArgs};
use mongolog_ingest::config::IngestConfig;
use mongolog_ingest::config_file::ConfigFile;
use mongolog_ingest::logging;
use mongolog_ingest::platform::ExitCode;
use mongolog_ingest::runner::Runner;
use mongolog_ingest::worker_proc::{read_spec, run_worker, worker_input};

fn main() {
    let cli = Cli::parse();

    let code = match cli.command {
        Some(Command::Worker { worker_id }) => worker_main(worker_id),
        None => import_main(&cli.run),
    };
    code.exit();
}

fn import_main(args: &RunArgs) -> ExitCode {
    let file = if args.ignore_config {
        ConfigFile::default()
    } else {
        match ConfigFile::load_with_custom_path(args.config.as_deref()) {
            Ok(file) => file,
            Err(e) => {
                eprintln!("mongolog-ingest: Error: {:#}", e);
                return ExitCode::InvalidUsage;
            }
        }
    };

    let config = match IngestConfig::resolve(args, &file) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("mongolog-ingest: Error: {}", e);
            return ExitCode::InvalidUsage;
        }
    };

    if let Err(e) = logging::init(&config.log) {
        eprintln!("mongolog-ingest: Error: {:#}", e);
        return ExitCode::InvalidUsage;
    }

    match Runner::new(config).run() {
        Ok(report) => {
            eprintln!("{}", report.format_summary());
            ExitCode::Success
        }
        Err(e) => {
            let message = format!("{:#}", e);
            error!(error = %message, "import failed");
            eprintln!("mongolog-ingest: Error: {:#}", e);
            ExitCode::GeneralError
        }
    }
}

fn worker_main(worker_id: usize) -> ExitCode {
    let mut input = worker_input();
    let spec = match read_spec(&mut input) {
        Ok(spec) => spec,
        Err(e) => {
            eprintln!("mongolog-ingest worker {}: Error: {:#}", worker_id, e);
            return ExitCode::InvalidUsage;
        }
    };

    if let Err(e) = logging::init(&spec.log) {
        eprintln!("mongolog-ingest worker {}: Error: {:#}", worker_id, e);
        return ExitCode::InvalidUsage;
    }

    match run_worker(worker_id, &spec, input) {
        Ok(_) => ExitCode::Success,
        Err(e) => {
            eprintln!("mongolog-ingest worker {}: Error: {:#}", worker_id, e);
            ExitCode::GeneralError
        }
    }
}
