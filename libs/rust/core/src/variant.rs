//! Attestation variants, their version-record families and version dates.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Timelike, Utc};

use crate::error::ApiError;

/// Canonical text form of a version date, e.g. `2023-06-11-14-30`.
pub const VERSION_FORMAT: &str = "%Y-%m-%d-%H-%M";
const DATE_ONLY_FORMAT: &str = "%Y-%m-%d";

/// Record shape and comparison rule shared by a group of variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VariantFamily { Snp, Tdx }

impl Display for VariantFamily {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self { VariantFamily::Snp => f.write_str("SEV-SNP"), VariantFamily::Tdx => f.write_str("TDX") }
    }
}

/// Attestation technology + cloud provider combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Variant { AwsSevSnp, AzureSevSnp, GcpSevSnp, AzureTdx }

impl Variant {
    pub const ALL: [Variant; 4] = [Variant::AwsSevSnp, Variant::AzureSevSnp, Variant::GcpSevSnp, Variant::AzureTdx];

    pub fn as_str(&self) -> &'static str {
        match self {
            Variant::AwsSevSnp => "aws-sev-snp",
            Variant::AzureSevSnp => "azure-sev-snp",
            Variant::GcpSevSnp => "gcp-sev-snp",
            Variant::AzureTdx => "azure-tdx",
        }
    }

    pub fn family(&self) -> VariantFamily {
        match self {
            Variant::AwsSevSnp | Variant::AzureSevSnp | Variant::GcpSevSnp => VariantFamily::Snp,
            Variant::AzureTdx => VariantFamily::Tdx,
        }
    }
}

impl Display for Variant {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for Variant {
    type Err = ApiError;

    /// Accepts variant names and, for SEV-SNP, bare provider names.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        match lower.as_str() {
            "aws" | "aws-sev-snp" => Ok(Variant::AwsSevSnp),
            "azure" | "azure-sev-snp" => Ok(Variant::AzureSevSnp),
            "gcp" | "gcp-sev-snp" => Ok(Variant::GcpSevSnp),
            "azure-tdx" => Ok(Variant::AzureTdx),
            _ => Err(ApiError::validation("variant", format!("unsupported attestation variant: {s}"))),
        }
    }
}

/// Observation / publication timestamp with minute resolution (UTC).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VersionDate(NaiveDateTime);

impl VersionDate {
    pub fn now() -> Self { Self::from_datetime(Utc::now()) }

    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        let naive = dt.naive_utc();
        let truncated = naive.with_second(0).and_then(|d| d.with_nanosecond(0)).unwrap_or(naive);
        Self(truncated)
    }

    /// Parses `YYYY-MM-DD-HH-MM`, or `YYYY-MM-DD` meaning midnight.
    pub fn parse(s: &str) -> Result<Self, ApiError> {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, VERSION_FORMAT) {
            return Ok(Self(dt));
        }
        NaiveDate::parse_from_str(s, DATE_ONLY_FORMAT)
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(Self)
            .ok_or_else(|| ApiError::validation("version date", format!("{s:?} does not match {VERSION_FORMAT}")))
    }

    /// Object file name for this date, `<date>.json`.
    pub fn file_name(&self) -> String { format!("{self}.json") }

    pub fn from_file_name(name: &str) -> Result<Self, ApiError> {
        let stem = name
            .strip_suffix(".json")
            .ok_or_else(|| ApiError::validation("version file name", format!("{name:?} has no .json suffix")))?;
        Self::parse(stem)
    }
}

impl Display for VersionDate {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result { write!(f, "{}", self.0.format(VERSION_FORMAT)) }
}

impl FromStr for VersionDate {
    type Err = ApiError;
    fn from_str(s: &str) -> Result<Self, Self::Err> { Self::parse(s) }
}
