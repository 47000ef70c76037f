use std::{
    fs::File,
    io::{stdout, BufWriter, Write},
    path::PathBuf,
};

use clap::{Args, ValueEnum, ValueHint};
use strum_macros::Display;

/// Export formats for result sets
#[derive(Copy, Clone, Debug, Default, ValueEnum, Display, PartialEq, Eq)]
#[strum(serialize_all = "kebab-case")]
pub enum ExportFormat {
    #[default]
    Json,
    Csv,
}

/// Where and how results are written
#[derive(Args, Debug, Clone, Default)]
pub struct OutputArgs {
    /// Write results to this file instead of stdout
    #[arg(long, short, value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub output: Option<PathBuf>,

    /// Output format
    #[arg(long, value_name = "FORMAT", default_value_t = ExportFormat::Json)]
    pub format: ExportFormat,
}

impl OutputArgs {
    /// Buffered writer for the configured file, or stdout when none is set.
    pub fn get_writer(&self) -> std::io::Result<Box<dyn Write>> {
        match &self.output {
            None => Ok(Box::new(BufWriter::new(stdout()))),
            Some(path) => Ok(Box::new(BufWriter::new(File::create(path)?))),
        }
    }
}
