use std::{
    io::{self, BufRead, Write},
    path::PathBuf,
};

use clap::Parser;
use kvs::{config::StoreConfig, error::status_message, shell::Shell, Store};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "kvs", about = "Interactive integer-keyed key-value store")]
struct Cli {
    /// JSON configuration file.
    #[clap(long)]
    pub config: Option<PathBuf>,

    /// Directory holding the data files.
    #[clap(long, default_value = ".")]
    pub dir: PathBuf,

    /// Data file to autoload and autosave, overriding the configuration.
    #[clap(long)]
    pub file: Option<String>,

    /// Do not save on exit.
    #[clap(long)]
    pub no_autosave: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();
    let args = Cli::parse();

    let mut config = match &args.config {
        Some(path) => StoreConfig::load(path)?,
        None => StoreConfig::default(),
    };
    if let Some(file) = args.file {
        config.data_file = file;
    }
    if args.no_autosave {
        config.autosave = false;
    }
    let data_file = config.data_file.clone();
    let autosave = config.autosave;

    println!("Key-value Store Interactive Shell");
    println!("Type 'help' for available commands, 'quit' or 'exit' to leave.");
    println!();

    let mut store = Store::open_dir(&args.dir, config);
    if store.exists(&data_file) {
        let result = store.load(&data_file);
        match result {
            Ok(_) => println!("Loaded {} entries from '{}'", store.count(), data_file),
            Err(ref e) => {
                warn!(file = %data_file, error = %e, "autoload failed");
                println!(
                    "Warning: Could not load '{}': {}",
                    data_file,
                    status_message(&result)
                );
            }
        }
        println!();
    }

    let mut shell = Shell::new(store);
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("kvs> ");
        io::stdout().flush()?;

        let line = match lines.next() {
            Some(line) => line?,
            None => {
                println!();
                break;
            }
        };

        let outcome = shell.run_line(&line);
        if !outcome.output.is_empty() {
            println!("{}", outcome.output);
        }
        if outcome.quit {
            break;
        }
    }

    let store = shell.store_mut();
    if autosave && store.count() > 0 {
        println!("Auto-saving data to '{}'...", data_file);
        let result = store.save(&data_file);
        match result {
            Ok(n) => info!(entries = n, file = %data_file, "autosaved"),
            Err(ref e) => {
                warn!(file = %data_file, error = %e, "autosave failed");
                println!("Warning: Could not save data: {}", status_message(&result));
            }
        }
    }

    println!("Goodbye!");
    Ok(())
}
