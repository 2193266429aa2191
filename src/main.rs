use std::path::PathBuf;

use anyhow::Result;
use clap::{Args as ClapArgs, Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};

use logsink::{Config, Location, LogReader, LogSink};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Command {
    /// Log stdin into a rotated log directory
    Run(RunArgs),
    /// Print historical log lines
    Query {
        #[arg(long)]
        dir: PathBuf,
        /// 0 for the most recent lines, >0 for lines since, <0 for lines before
        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        start: i64,
        /// Approximate number of bytes to return
        #[arg(long, default_value_t = 64 * 1024)]
        bytes: i64,
    },
}

#[derive(ClapArgs, Debug, PartialEq)]
struct RunArgs {
    /// Config file (defaults to ~/.logsink/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Log directory, overriding the config file
    #[arg(long)]
    dir: Option<PathBuf>,
    #[arg(long)]
    max_file_size: Option<u64>,
    #[arg(long)]
    max_dir_size: Option<u64>,
    /// Also copy every line to the original stdout
    #[arg(long)]
    also_log_to_stdout: bool,
    /// Verbosity level
    #[arg(short = 'v', long)]
    verbose: Option<i32>,
}

impl RunArgs {
    fn into_config(self) -> Result<Config> {
        let mut config = match self.config {
            Some(path) => Config::load_from(&path)?,
            None => Config::load()?,
        };
        if let Some(dir) = self.dir {
            config.log_dir = dir;
        }
        if let Some(size) = self.max_file_size {
            config.max_file_size = size;
        }
        if let Some(size) = self.max_dir_size {
            config.max_dir_size = size;
        }
        if self.also_log_to_stdout {
            config.also_log_to_stdout = true;
        }
        if let Some(level) = self.verbose {
            config.verbose_level = level;
        }
        Ok(config)
    }
}

async fn run(args: RunArgs) -> Result<()> {
    let sink = LogSink::start(args.into_config()?)?;
    logsink::init_tracing(&sink)?;
    tracing::info!("Logging to {}", sink.log_dir().display());

    let stdin_location = Location::new("stdin", 0);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        sink.print(Some(stdin_location), line);
    }
    tracing::info!("Input closed, flushing");

    // Joins the worker threads
    let closer = sink.clone();
    tokio::task::spawn_blocking(move || closer.close()).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    match args.command {
        Command::Run(run_args) => run(run_args).await?,
        Command::Query { dir, start, bytes } => {
            let lines = LogReader::new(dir).log_lines_async(start, bytes).await;
            for line in lines {
                println!("{}", line);
            }
        }
    }

    Ok(())
}
