use std::fs;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use serde::Deserialize;
use thiserror::Error;

use rcore::StreamError;
use rrec::idrec::{IdrecError, Layout, Width};

#[derive(Parser)]
#[command(name = "rstream")]
#[command(about = "Inspect files made of id-size-payload records")]
#[command(author, version, long_about = None)]
pub struct Cli {
    /// Sets a custom config file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Width of the id field in bytes
    #[arg(long, global = true)]
    pub id_width: Option<u64>,

    /// Width of the size field in bytes
    #[arg(long, global = true)]
    pub size_width: Option<u64>,

    /// Records are padded to a multiple of this
    #[arg(long, global = true)]
    pub align: Option<u64>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Lists every record in a file
    List {
        file: PathBuf,
    },

    /// Finds the first record with a tag, exits with 1 if there is none
    Find {
        file: PathBuf,

        /// Decimal, or hex with a 0x prefix
        #[arg(value_parser = parse_tag)]
        tag: u64,
    },

    /// Prints the payload of the first record with a tag as hex
    Dump {
        file: PathBuf,

        /// Decimal, or hex with a 0x prefix
        #[arg(value_parser = parse_tag)]
        tag: u64,
    },
}

pub fn parse_tag(tag: &str) -> Result<u64, String> {
    let parsed = match tag.strip_prefix("0x").or_else(|| tag.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => tag.parse(),
    };
    parsed.map_err(|e| format!("invalid tag {:?}: {}", tag, e))
}

#[derive(Error, Debug)]
pub enum CliError {
    #[error(transparent)]
    IO(#[from] std::io::Error),
    #[error(transparent)]
    Stream(#[from] StreamError),
    #[error(transparent)]
    Record(#[from] IdrecError),
    #[error("config: {0}")]
    Config(#[from] toml::de::Error),
    #[error("unsupported field width {0}, expected 1, 2, 4 or 8")]
    Width(u64),
    #[error("tag {0:#x} does not fit the id field")]
    Tag(u64),
    #[error("record at {0} is cut short")]
    Truncated(u64),
}

// Configuration
#[derive(Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub format: FormatConfig,
    pub io: IoConfig,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct FormatConfig {
    pub id_width: u64,
    pub size_width: u64,
    pub align: u64,
}

impl Default for FormatConfig {
    fn default() -> Self {
        FormatConfig {
            id_width: 4,
            size_width: 4,
            align: 4,
        }
    }
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct IoConfig {
    pub read_block: usize,
    pub cache_block: usize,
    pub cache_blocks: usize,
}

impl Default for IoConfig {
    fn default() -> Self {
        IoConfig {
            read_block: 4096,
            cache_block: 4096,
            cache_blocks: 2,
        }
    }
}

impl Config {
    /// Defaults when no file is given.
    pub fn load(path: Option<&Path>) -> Result<Config, CliError> {
        match path {
            None => Ok(Config::default()),
            Some(path) => Ok(toml::from_str(&fs::read_to_string(path)?)?),
        }
    }

    /// Command line flags win over the file.
    pub fn with_overrides(mut self, cli: &Cli) -> Config {
        if let Some(width) = cli.id_width {
            self.format.id_width = width;
        }
        if let Some(width) = cli.size_width {
            self.format.size_width = width;
        }
        if let Some(align) = cli.align {
            self.format.align = align;
        }
        self
    }

    pub fn layout(&self) -> Result<Layout, CliError> {
        let width = |bytes| Width::from_bytes(bytes).ok_or(CliError::Width(bytes));
        Ok(Layout {
            id: width(self.format.id_width)?,
            size: width(self.format.size_width)?,
            align: self.format.align,
        })
    }
}
