use std::io::Write;
use std::process::Command;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tempfile::NamedTempFile;
use tracing::warn;

use crate::proc::{run_with_timeout, SubprocessError};

pub const AV_STATUS_PENDING: &str = "pending";
pub const AV_STATUS_CLEAN: &str = "clean";
pub const AV_STATUS_INFECTED: &str = "infected";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanVerdict {
    Clean,
    Infected { detail: String },
}

impl ScanVerdict {
    pub fn status(&self) -> &'static str {
        match self {
            ScanVerdict::Clean => AV_STATUS_CLEAN,
            ScanVerdict::Infected { .. } => AV_STATUS_INFECTED,
        }
    }

    pub fn detail(&self) -> Option<&str> {
        match self {
            ScanVerdict::Clean => None,
            ScanVerdict::Infected { detail } => Some(detail),
        }
    }
}

pub trait ScanEngine: Send + Sync + 'static {
    fn scan(&self, bytes: &[u8]) -> Result<ScanVerdict>;
}

/// Shells out to `clamscan`. Exit code 0 means clean, 1 means a signature
/// matched; anything else is an engine failure the worker may retry.
pub struct ClamavScanner {
    timeout: Duration,
}

impl ClamavScanner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl ScanEngine for ClamavScanner {
    fn scan(&self, bytes: &[u8]) -> Result<ScanVerdict> {
        let mut input = NamedTempFile::new().context("failed to create scan temp file")?;
        input
            .write_all(bytes)
            .context("failed to write scan temp file")?;
        input.flush().context("failed to flush scan temp file")?;

        let mut command = Command::new("clamscan");
        command.arg("--no-summary").arg(input.path());

        let output = match run_with_timeout(command, self.timeout) {
            Ok(output) => output,
            Err(SubprocessError::BinaryMissing(binary)) => {
                return Err(anyhow!("antivirus engine unavailable: {binary} not found"));
            }
            Err(err) => return Err(anyhow!(err)),
        };

        match output.status_code {
            Some(0) => Ok(ScanVerdict::Clean),
            Some(1) => {
                let detail = parse_clamscan_detail(&String::from_utf8_lossy(&output.stdout));
                Ok(ScanVerdict::Infected { detail })
            }
            code => {
                warn!(?code, "clamscan returned unexpected exit code");
                Err(anyhow!(
                    "clamscan failed: exit={code:?} stderr={}",
                    String::from_utf8_lossy(&output.stderr)
                ))
            }
        }
    }
}

fn parse_clamscan_detail(stdout: &str) -> String {
    stdout
        .lines()
        .find(|line| line.ends_with("FOUND"))
        .and_then(|line| line.splitn(2, ": ").nth(1))
        .map(|detail| detail.trim_end_matches(" FOUND").to_string())
        .unwrap_or_else(|| "signature matched".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_signature_name_from_clamscan_output() {
        let detail = parse_clamscan_detail("/tmp/file: Eicar-Signature FOUND\n");
        assert_eq!(detail, "Eicar-Signature");
    }

    #[test]
    fn falls_back_when_output_is_unparseable() {
        let detail = parse_clamscan_detail("garbage\n");
        assert_eq!(detail, "signature matched");
    }

    #[test]
    fn verdict_maps_to_av_status() {
        assert_eq!(ScanVerdict::Clean.status(), AV_STATUS_CLEAN);
        let infected = ScanVerdict::Infected {
            detail: "Eicar".into(),
        };
        assert_eq!(infected.status(), AV_STATUS_INFECTED);
        assert_eq!(infected.detail(), Some("Eicar"));
    }
}
