use anyhow::Result;
use clap::{Parser, Subcommand};
use dnp3link_cli::{commands, FrameKind};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "dnp3link")]
#[command(about = "DNP3 link-layer frame inspection", long_about = None)]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build one LPDU and print it as hex
    Encode {
        /// Frame type to build
        #[arg(value_enum)]
        kind: FrameKind,

        /// Destination link address
        #[arg(long)]
        dest: u16,

        /// Source link address
        #[arg(long)]
        src: u16,

        /// Set the direction bit (frame sent by a master)
        #[arg(long)]
        master: bool,

        /// Frame-count bit for test and confirmed frames
        #[arg(long)]
        fcb: bool,

        /// Hex-encoded user payload for data frames
        #[arg(long)]
        payload: Option<String>,

        /// Also write the raw frame bytes to a file
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Scan a capture file and recover frames
    Scan {
        /// Input file to scan
        #[arg(short, long)]
        input: String,

        /// Output JSON file for recovered frames
        #[arg(short, long)]
        output: Option<String>,

        /// Show statistics only
        #[arg(long)]
        stats_only: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match cli.command {
        Commands::Encode {
            kind,
            dest,
            src,
            master,
            fcb,
            payload,
            output,
        } => commands::encode::execute(
            &commands::encode::EncodeOptions {
                kind,
                master,
                fcb,
                dest,
                src,
                payload_hex: payload.as_deref(),
            },
            output.as_deref(),
        ),

        Commands::Scan {
            input,
            output,
            stats_only,
        } => commands::scan::execute(&input, output.as_deref(), stats_only),
    }
}
