use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use thiserror::Error;

use ndr_marshal::tool::{self, Config, Document, LoggingError};
use ndr_marshal::{Heap, Ndr, Role, TypeId, TypeLibrary};

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Ndr(#[from] ndr_marshal::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Logging setup failed: {0}")]
    Logging(#[from] LoggingError),
}

impl From<ndr_marshal::MarshalError> for AppError {
    fn from(e: ndr_marshal::MarshalError) -> Self {
        Self::Ndr(e.into())
    }
}

impl From<ndr_marshal::FormatError> for AppError {
    fn from(e: ndr_marshal::FormatError) -> Self {
        Self::Ndr(e.into())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        Self::Ndr(e.into())
    }
}

/// Call role, overriding the configuration file.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum RoleArg {
    Client,
    Server,
}

impl From<RoleArg> for Role {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::Client => Role::Client,
            RoleArg::Server => Role::Server,
        }
    }
}

#[derive(Parser)]
#[command(name = "ndr-marshal")]
#[command(about = "Marshal and unmarshal values with NDR type-description byte-code")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true, env = "NDR_MARSHAL_CONFIG")]
    config: Option<PathBuf>,

    /// Run as client or server
    #[arg(long, global = true, value_enum)]
    role: Option<RoleArg>,

    #[command(subcommand)]
    command: Commands,
}

/// Where the type description comes from.
#[derive(Args)]
struct FormatArgs {
    /// Format string as hex, or @path to read raw bytes from a file
    #[arg(short, long)]
    format: String,

    /// Byte offset of the root type inside the format string
    #[arg(long, default_value_t = 0)]
    offset: usize,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the parsed type tree
    Inspect {
        #[command(flatten)]
        format: FormatArgs,
    },

    /// Print the wire size and host memory size of a value document
    Size {
        #[command(flatten)]
        format: FormatArgs,

        /// JSON value document
        #[arg(short, long)]
        doc: PathBuf,
    },

    /// Marshal a value document to wire bytes
    Marshal {
        #[command(flatten)]
        format: FormatArgs,

        /// JSON value document
        #[arg(short, long)]
        doc: PathBuf,

        /// Output file for the wire bytes (hex on stdout if not specified)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Unmarshal wire bytes into a value document
    Unmarshal {
        #[command(flatten)]
        format: FormatArgs,

        /// Input file containing wire bytes
        #[arg(short, long)]
        input: PathBuf,

        /// Output file for the JSON document (stdout if not specified)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn load_type(args: &FormatArgs, config: &Config) -> Result<(TypeLibrary, TypeId), AppError> {
    let bytes = tool::read_format(&args.format)?;
    let parsed =
        TypeLibrary::from_format_string(&bytes, args.offset, &config.engine.legacy_options())?;
    Ok(parsed)
}

fn load_doc(path: &Path) -> Result<Document, AppError> {
    let text = std::fs::read_to_string(path)?;
    Ok(Document::from_json(&text)?)
}

fn write_text(output: Option<&Path>, text: &str) -> Result<(), AppError> {
    match output {
        Some(path) => std::fs::write(path, text)?,
        None => println!("{}", text),
    }
    Ok(())
}

fn main() -> Result<(), AppError> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::from_file(path).map_err(ndr_marshal::Error::from)?,
        None => Config::default(),
    };
    if let Some(role) = cli.role {
        config.engine.role = role.into();
    }
    tool::init_logging(&config.logging)?;
    tracing::debug!(role = %config.engine.role, "configuration loaded");

    match cli.command {
        Commands::Inspect { format } => {
            let (lib, ty) = load_type(&format, &config)?;
            print!("{}", lib.describe(ty));
        }

        Commands::Size { format, doc } => {
            let (lib, ty) = load_type(&format, &config)?;
            let doc = load_doc(&doc)?;
            let heap = doc.to_heap();
            let ndr = Ndr::with_options(&lib, config.engine.call_options());
            println!("wire bytes:   {}", ndr.buffer_size(ty, &doc.root, &heap)?);
            println!("memory bytes: {}", ndr.memory_size(ty, &doc.root, &heap)?);
        }

        Commands::Marshal {
            format,
            doc,
            output,
        } => {
            let (lib, ty) = load_type(&format, &config)?;
            let doc = load_doc(&doc)?;
            let heap = doc.to_heap();
            let ndr = Ndr::with_options(&lib, config.engine.call_options());
            let wire = ndr.marshal(ty, &doc.root, &heap)?;

            match output {
                Some(path) => {
                    std::fs::write(&path, &wire)?;
                    println!("Marshalled value to {} ({} bytes)", path.display(), wire.len());
                }
                None => println!("{}", hex::encode(&wire)),
            }
        }

        Commands::Unmarshal {
            format,
            input,
            output,
        } => {
            let (lib, ty) = load_type(&format, &config)?;
            let wire = std::fs::read(&input)?;
            let ndr = Ndr::with_options(&lib, config.engine.call_options());
            let mut allocator = config.engine.allocator();
            let mut heap = Heap::new();
            let (root, consumed) =
                ndr.unmarshal_with(ty, &wire, &mut heap, None, allocator.as_mut())?;
            if consumed != wire.len() {
                tracing::warn!(consumed, total = wire.len(), "trailing bytes after value");
            }

            let doc = Document::capture(root, &heap)?;
            write_text(output.as_deref(), &doc.to_json()?)?;
        }
    }

    Ok(())
}
