use anyhow::Result;
use clap::{Parser, Subcommand};
use newsletter_uploader::app::{clear_caches, App};
use newsletter_uploader::models::{AssetRequest, Config, Document, Priority, UsageContext};
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "newsletter-uploader")]
#[command(about = "Upload newsletter images and templates to Mailchimp")]
struct CliArgs {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Upload images, then documents as templates.
    Upload {
        /// Image to upload, optionally as PATH=REFERENCE where REFERENCE is
        /// how the documents refer to it.
        #[arg(long = "image", value_name = "PATH[=REF]", value_parser = parse_image_arg)]
        images: Vec<ImageArg>,

        /// Images that must be uploaded; the run aborts if one cannot be
        /// compressed under the limit.
        #[arg(long = "hero", value_name = "PATH[=REF]", value_parser = parse_image_arg)]
        heroes: Vec<ImageArg>,

        /// Rendered HTML document to upload as a template. The file stem is
        /// the template name.
        #[arg(long = "document", value_name = "FILE")]
        documents: Vec<PathBuf>,
    },
    /// Delete every entry from the image and template caches.
    ClearCache,
}

#[derive(Debug, Clone, PartialEq)]
struct ImageArg {
    path: PathBuf,
    reference: Option<String>,
}

fn parse_image_arg(input: &str) -> std::result::Result<ImageArg, String> {
    let (path, reference) = match input.split_once('=') {
        Some((path, reference)) => (path, Some(reference.to_string())),
        None => (input, None),
    };
    if path.is_empty() {
        return Err(format!("Invalid image '{}'. Expected PATH or PATH=REF", input));
    }
    Ok(ImageArg {
        path: PathBuf::from(path),
        reference: reference.filter(|r| !r.is_empty()),
    })
}

fn to_request(arg: ImageArg, usage: UsageContext, priority: Priority) -> AssetRequest {
    let request = AssetRequest::new(arg.path)
        .with_usage(usage)
        .with_priority(priority);
    match arg.reference {
        Some(reference) => request.with_reference(reference),
        None => request,
    }
}

fn read_documents(paths: &[PathBuf]) -> Result<Vec<Document>> {
    paths
        .iter()
        .map(|path| -> Result<Document> {
            let html = std::fs::read_to_string(path)?;
            let name = path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());
            Ok(Document::new(name, html))
        })
        .collect()
}

async fn upload(
    config: &Config,
    images: Vec<ImageArg>,
    heroes: Vec<ImageArg>,
    documents: &[PathBuf],
) -> Result<bool> {
    let requests: Vec<AssetRequest> = heroes
        .into_iter()
        .map(|arg| to_request(arg, UsageContext::Hero, Priority::Critical))
        .chain(
            images
                .into_iter()
                .map(|arg| to_request(arg, UsageContext::Inline, Priority::Normal)),
        )
        .collect();
    let documents = read_documents(documents)?;

    let mut app = App::new(config)?;
    let report = app.run(&requests, &documents).await?;

    for (reference, url) in &report.images.url_mapping {
        info!("{} -> {}", reference, url);
    }
    for message in &report.images.errors {
        warn!("{}", message);
    }

    let templates = report.template_summary();
    for (name, id) in &templates.template_ids {
        info!("Template {} -> {}", name, id);
    }
    for message in &templates.errors {
        warn!("{}", message);
    }

    info!(
        "Images: {}/{} ok ({} cached), templates: {}/{} ok",
        report.images.succeeded + report.images.cached_hits,
        report.images.total,
        report.images.cached_hits,
        templates.succeeded,
        templates.total
    );
    Ok(report.images.failed == 0 && templates.failed == 0)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "newsletter_uploader=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = CliArgs::parse();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    match args.command {
        Command::Upload {
            images,
            heroes,
            documents,
        } => {
            info!("Starting newsletter-uploader");
            match upload(&config, images, heroes, &documents).await {
                Ok(true) => {
                    info!("Upload completed successfully");
                    Ok(())
                }
                Ok(false) => {
                    warn!("Upload completed with failures");
                    Ok(())
                }
                Err(e) => {
                    error!("Upload failed: {}", e);
                    std::process::exit(1);
                }
            }
        }
        Command::ClearCache => match clear_caches(&config) {
            Ok(_) => Ok(()),
            Err(e) => {
                error!("Failed to clear caches: {}", e);
                std::process::exit(1);
            }
        },
    }
}
