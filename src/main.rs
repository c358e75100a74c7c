use std::fs;
use std::io::Write;
use std::process;

use clap::Parser;
use log::{error, info};

use score::crypto;
use score::key::MemKey;

use strand::cli::{Cli, Commands};
use strand::compile::compile;
use strand::config::Config;
use strand::extract::{extract, fetch};
use strand::Error;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Parse the cli
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        error!("{}", e);
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Error> {
    crypto::init()?;

    match cli.command {
        Commands::Compile { config } => {
            let config = Config::load(&config)?;
            let outputs = compile(&config)?;
            info!("Compiled {} configurations", outputs.len());
        }
        Commands::Extract {
            file,
            key_file,
            out_dir,
        } => {
            let (directory, written) = extract(&file, &key_file, out_dir.as_deref(), &Default::default())?;
            info!("Extracted {} files into {:?}", written, directory);
        }
        Commands::Fetch {
            file,
            key_file,
            name,
            out,
        } => {
            let payload = fetch(&file, &key_file, &name)?;
            match out {
                Some(path) => fs::write(&path, &payload).map_err(|source| Error::Write { path, source })?,
                None => std::io::stdout()
                    .write_all(&payload)
                    .map_err(|source| Error::Write {
                        path: "<stdout>".into(),
                        source,
                    })?,
            }
        }
        Commands::Keygen { key_file } => {
            MemKey::new().save(&key_file)?;
            info!("Wrote key to {:?}", key_file);
        }
    }
    Ok(())
}
