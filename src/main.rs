use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use rfdocgen::records::invoice::{self, Invoice};
use rfdocgen::{GeneratedDocument, Generator, GeneratorConfig, RenderRequest};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rfdocgen", version, about = "Render agreements and proforma invoices to paginated A4 PDFs")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Args)]
struct CommonArgs {
    /// Directory the PDF is written into
    #[arg(long, global = true, default_value = ".")]
    out: PathBuf,
    /// Base URL for resolving relative image references
    #[arg(long, global = true)]
    base_url: Option<String>,
    /// Staging surface width in CSS pixels
    #[arg(long, global = true, default_value_t = 800)]
    width: u32,
    /// Device pixels per CSS pixel
    #[arg(long, global = true, default_value_t = 2)]
    scale: u32,
    /// Abort a generation after this many milliseconds
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,
    /// Render with headless Chrome instead of the built-in rasterizer
    #[cfg(feature = "cdp")]
    #[arg(long, global = true)]
    chrome: bool,
}

#[derive(Subcommand)]
enum Cmd {
    /// Render an HTML fragment from a file
    Html {
        file: PathBuf,
        /// Output base name (defaults to the file stem)
        #[arg(long)]
        name: Option<String>,
    },
    /// Render a proforma invoice from its JSON record
    Invoice { file: PathBuf },
    /// Fetch and render the agreement for a booking
    #[cfg(feature = "fetch")]
    Agreement {
        #[arg(long)]
        booking_id: String,
        #[command(flatten)]
        api: ApiArgs,
    },
    /// List bookings, optionally filtered
    #[cfg(feature = "fetch")]
    Bookings {
        /// Case-insensitive search across booking fields
        #[arg(long)]
        search: Option<String>,
        #[command(flatten)]
        api: ApiArgs,
    },
}

#[cfg(feature = "fetch")]
#[derive(Args)]
struct ApiArgs {
    /// Booking backend base URL
    #[arg(long, env = "RFDOC_API_BASE", default_value = "http://localhost:5000/api")]
    api_base: String,
    /// Session token sent as the Authorization header
    #[arg(long, env = "RFDOC_TOKEN", hide_env_values = true)]
    token: String,
}

fn build_generator(args: &CommonArgs) -> anyhow::Result<Generator> {
    let config = GeneratorConfig {
        staging_width_px: args.width,
        device_scale: args.scale,
        timeout_ms: args.timeout_ms,
        base_url: args.base_url.clone(),
        output_dir: args.out.clone(),
        ..Default::default()
    };

    #[cfg(feature = "cdp")]
    if args.chrome {
        use std::sync::Arc;
        config.validate()?;
        let chrome = Arc::new(rfdocgen::cdp::CdpDocument::launch(config.base_url.as_deref())?);
        let sink = Arc::new(rfdocgen::sink::FileSink::new(config.output_dir.clone()));
        return Ok(Generator::new(config, chrome.clone(), chrome, sink));
    }

    Ok(rfdocgen::new_generator(config)?)
}

fn report(doc: &GeneratedDocument) {
    let location = doc
        .location
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| doc.filename.clone());
    println!("{} ({} page(s), {} bytes, sha256 {})", location, doc.page_count, doc.byte_len, doc.sha256);
}

async fn render(args: &CommonArgs, request: RenderRequest) -> anyhow::Result<()> {
    if !args.out.is_dir() {
        std::fs::create_dir_all(&args.out).with_context(|| format!("creating {}", args.out.display()))?;
    }
    let generator = build_generator(args)?;
    let doc = generator.generate(request).await?;
    report(&doc);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match cli.command {
        Cmd::Html { file, name } => {
            let html = std::fs::read_to_string(&file).with_context(|| format!("reading {}", file.display()))?;
            let name = match name {
                Some(n) => n,
                None => file
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default(),
            };
            render(&cli.common, RenderRequest::html(html, name)).await
        }
        Cmd::Invoice { file } => {
            let json = std::fs::read_to_string(&file).with_context(|| format!("reading {}", file.display()))?;
            let mut record: Invoice =
                serde_json::from_str(&json).with_context(|| format!("parsing invoice {}", file.display()))?;
            if record.invoice_number.trim().is_empty() {
                record.invoice_number = invoice::generate_invoice_number();
            }
            record.recalculate();
            if !record.items.iter().any(|i| i.is_billable()) {
                bail!("invoice {} has no billable items", record.invoice_number);
            }
            render(&cli.common, record.render_request()).await
        }
        #[cfg(feature = "fetch")]
        Cmd::Agreement { booking_id, api } => {
            let client = rfdocgen::records::AgreementClient::new(&api.api_base)?;
            let session = rfdocgen::records::Session::new(api.token);
            let html = client.fetch_agreement_html(&session, &booking_id).await?;
            render(&cli.common, rfdocgen::records::agreement::agreement_request(&booking_id, html)).await
        }
        #[cfg(feature = "fetch")]
        Cmd::Bookings { search, api } => {
            let client = rfdocgen::records::AgreementClient::new(&api.api_base)?;
            let session = rfdocgen::records::Session::new(api.token);
            let bookings = client.list_bookings(&session).await?;
            let query = search.unwrap_or_default();
            for b in bookings.iter().filter(|b| b.matches(&query)) {
                let amount = b.total_amount.map(invoice::format_inr).unwrap_or_else(|| "-".into());
                println!(
                    "{}\t{}\t{}\t{}\t{}",
                    b.id,
                    if b.company_name.is_empty() { "No Company Name" } else { b.company_name.as_str() },
                    b.contact_person,
                    b.status,
                    amount
                );
            }
            Ok(())
        }
    }
}
