use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use contract_sign::{
    Config, ContractMetadata, SignatureRequest, SigningEngine, SignaturePayload, SourceFile,
};
use log::{info, warn};
use serde_json::json;
use std::fs;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Upload contracts and collect a single signature per contract.")]
struct Args {
    #[clap(short, long, help = "Path to the TOML config (default: contract_sign.toml).")]
    config: Option<PathBuf>,
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Convert a document and create a contract with a signing link.
    Upload {
        file: PathBuf,
        #[clap(long)]
        client_email: Option<String>,
    },
    /// Sign a contract with a typed name or a drawn image.
    Sign {
        contract_id: String,
        token: String,
        #[clap(short = 't', long, conflicts_with = "image", help = "Name to render as the signature.")]
        text: Option<String>,
        #[clap(short, long, help = "PNG/JPEG file with a drawn signature.")]
        image: Option<PathBuf>,
        #[clap(short, long, default_value_t = 0, allow_negative_numbers = true)]
        page: i64,
        #[clap(short = 'x', long, default_value_t = 0.5)]
        x_pct: f64,
        #[clap(short = 'y', long, default_value_t = 0.85)]
        y_pct: f64,
    },
    /// Print the status of a contract.
    Status { contract_id: String },
    /// Write the signed PDF to a file.
    Download {
        contract_id: String,
        token: String,
        #[clap(short, long, default_value = "signed.pdf")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    match dotenv::dotenv() {
        Ok(path) => info!("Loaded .env file from: {:?}", path),
        Err(_) => warn!("No .env file found. Relying on environment variables."),
    }

    let args = Args::parse();
    let config = Config::load(args.config.as_deref()).context("loading configuration")?;
    let engine = SigningEngine::open(config).context("opening data directory")?;

    match args.command {
        Command::Upload { file, client_email } => {
            let bytes = fs::read(&file).with_context(|| format!("reading {}", file.display()))?;
            let filename = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let created = engine
                .create_contract(SourceFile::new(filename, bytes), ContractMetadata { client_email })
                .await?;
            println!("{}", serde_json::to_string_pretty(&created)?);
        }
        Command::Sign {
            contract_id,
            token,
            text,
            image,
            page,
            x_pct,
            y_pct,
        } => {
            let payload = match (text, image) {
                (Some(text), _) => SignaturePayload::Text(text),
                (None, Some(path)) => SignaturePayload::Raster(
                    fs::read(&path).with_context(|| format!("reading {}", path.display()))?,
                ),
                (None, None) => anyhow::bail!("either --text or --image is required"),
            };
            let request = SignatureRequest::new(payload).at(page, x_pct, y_pct);
            match engine.request_signature(&contract_id, &token, request).await {
                Ok(signed) => println!("{}", serde_json::to_string_pretty(&signed)?),
                Err(e) => {
                    println!(
                        "{}",
                        json!({"success": false, "status": e.status_code(), "message": e.to_string()})
                    );
                    return Err(e.into());
                }
            }
        }
        Command::Status { contract_id } => {
            let status = engine.contract_status(&contract_id)?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Command::Download {
            contract_id,
            token,
            output,
        } => {
            let bytes = engine.signed_document(&contract_id, &token)?;
            fs::write(&output, &bytes).with_context(|| format!("writing {}", output.display()))?;
            info!("Saved signed contract to {}", output.display());
        }
    }
    Ok(())
}
