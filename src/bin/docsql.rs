use clap::Parser;
use std::{
    error::Error,
    io::{self, Write},
    path::PathBuf,
};

use docsql::{Command, DocumentStorage, Settings, engine::memory::MemoryEngine, prompt};

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to a JSON settings file
    #[arg(short, long)]
    settings: Option<PathBuf>,

    /// Snapshot file for the embedded engine; data stays in memory when omitted
    #[arg(long)]
    data: Option<PathBuf>,

    #[arg(long, default_value = "docsql")]
    database: String,

    #[arg(long, default_value = "documents")]
    table: String,

    /// Identity column, discovered from the table when omitted
    #[arg(long)]
    id_field: Option<String>,

    /// Allow creating the table and adding columns
    #[arg(long)]
    modify_schema: bool,
}

impl Cli {
    fn settings(&self) -> Result<Settings, Box<dyn Error>> {
        let mut settings = match &self.settings {
            Some(path) => Settings::from_file(path)?,
            None => Settings::new(&self.database, &self.table, "root", ""),
        };
        if let Some(id_field) = &self.id_field {
            settings = settings.with_id_field(id_field);
        }
        if self.modify_schema {
            settings = settings.with_modify_schema(true);
        }
        Ok(settings)
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    // Initialize env_logger; For logging to STDOUT/STDERR
    env_logger::init();

    let cli = Cli::parse();
    let engine = match &cli.data {
        Some(path) => MemoryEngine::open(path)?,
        None => MemoryEngine::new(),
    };
    let storage = DocumentStorage::new(engine, cli.settings()?)?;

    let stdin = io::stdin();
    let stdout = io::stdout();

    loop {
        let cmd = match prompt(stdin.lock(), stdout.lock()) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("error: {e}");
                continue;
            }
        };

        let reply = match cmd {
            Command::Exit => break,
            Command::Drop => storage.drop_storage().map(serde_json::Value::from),
            Command::Flush => Ok(serde_json::Value::from(storage.flush_storage())),
            Command::Operation { operation, options } => operation
                .run(&storage, &options)
                .map(|reply| reply.to_json()),
        };

        match reply {
            Ok(value) => {
                let mut out = stdout.lock();
                serde_json::to_writer_pretty(&mut out, &value)?;
                writeln!(out)?;
            }
            Err(e) => eprintln!("error: {e}"),
        }
    }

    Ok(())
}
