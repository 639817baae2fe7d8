use std::io::{self, Write};

use serde::Serialize;

use crate::app::DownloadSummary;
use crate::domain::DiscoveryOutcome;

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_discovery(outcome: &DiscoveryOutcome) -> io::Result<()> {
        Self::print_json(outcome)
    }

    pub fn print_download(summary: &DownloadSummary) -> io::Result<()> {
        Self::print_json(summary)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}
