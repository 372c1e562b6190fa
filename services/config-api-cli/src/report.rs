//! Reading reported versions from upload input files.

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use attcfg_core::{SnpVersion, Variant, VariantFamily, VersionRecord};

#[derive(Deserialize)]
struct VerificationReport {
    #[serde(alias = "SNPReport")]
    snp_report: SnpReport,
}

#[derive(Deserialize)]
struct SnpReport {
    #[serde(alias = "LaunchTCB")]
    launch_tcb: LaunchTcb,
}

#[derive(Deserialize)]
struct LaunchTcb {
    #[serde(alias = "Bootloader")]
    bootloader: u8,
    #[serde(alias = "TEE")]
    tee: u8,
    #[serde(alias = "SNP")]
    snp: u8,
    #[serde(alias = "Microcode")]
    microcode: u8,
}

/// Parses a reported version for `variant`.
///
/// SEV-SNP input is a verification report carrying `snp_report.launch_tcb`,
/// or a bare version record. TDX input is a bare version record.
pub fn parse_report(variant: Variant, data: &[u8]) -> Result<VersionRecord> {
    match variant.family() {
        VariantFamily::Snp => {
            if let Ok(report) = serde_json::from_slice::<VerificationReport>(data) {
                let tcb = report.snp_report.launch_tcb;
                return Ok(SnpVersion { bootloader: tcb.bootloader, tee: tcb.tee, snp: tcb.snp, microcode: tcb.microcode }.into());
            }
            VersionRecord::from_json(VariantFamily::Snp, data).context("input is neither an SNP verification report nor an SNP version")
        }
        VariantFamily::Tdx => {
            if data.iter().all(u8::is_ascii_whitespace) { bail!("empty TDX version input"); }
            VersionRecord::from_json(VariantFamily::Tdx, data).context("parsing TDX version")
        }
    }
}
