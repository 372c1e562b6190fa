//! TCB version records and the no-regression partial order.
//!
//! A record is "newer" than another only if it differs and no tracked
//! component went down. Raising one field while lowering another is
//! never newer.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::variant::VariantFamily;

/// Component-wise comparable TCB version.
pub trait TcbVersion: PartialEq {
    /// Tracked components in a fixed order.
    fn components(&self) -> Vec<u16>;

    /// `true` iff `self != other` and no component of `self` is below `other`'s.
    fn is_newer_than(&self, other: &Self) -> bool {
        if self == other { return false; }
        self.components().iter().zip(other.components()).all(|(a, b)| *a >= b)
    }
}

/// AMD SEV-SNP TCB version (security patch levels).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct SnpVersion {
    pub bootloader: u8,
    pub tee: u8,
    pub snp: u8,
    pub microcode: u8,
}

impl TcbVersion for SnpVersion {
    fn components(&self) -> Vec<u16> {
        vec![self.bootloader.into(), self.tee.into(), self.snp.into(), self.microcode.into()]
    }
}

/// Intel TDX TCB version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct TdxVersion {
    #[serde(rename = "qeSVN")]
    pub qe_svn: u16,
    #[serde(rename = "pceSVN")]
    pub pce_svn: u16,
    #[serde(rename = "teeTCBSVN")]
    pub tee_tcb_svn: [u8; 16],
    #[serde(rename = "qeVendorID")]
    pub qe_vendor_id: [u8; 16],
    #[serde(rename = "xfam")]
    pub xfam: [u8; 8],
}

impl TcbVersion for TdxVersion {
    // every byte of the fixed arrays is its own component
    fn components(&self) -> Vec<u16> {
        let mut c = Vec::with_capacity(2 + 16 + 16 + 8);
        c.push(self.qe_svn);
        c.push(self.pce_svn);
        c.extend(self.tee_tcb_svn.iter().map(|b| u16::from(*b)));
        c.extend(self.qe_vendor_id.iter().map(|b| u16::from(*b)));
        c.extend(self.xfam.iter().map(|b| u16::from(*b)));
        c
    }
}

/// Version record of either family. The wire form is the bare inner record;
/// the family comes from the variant the record is stored under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VersionRecord {
    Snp(SnpVersion),
    Tdx(TdxVersion),
}

impl VersionRecord {
    pub fn family(&self) -> VariantFamily {
        match self { VersionRecord::Snp(_) => VariantFamily::Snp, VersionRecord::Tdx(_) => VariantFamily::Tdx }
    }

    /// All-zero record, used when nothing has been published yet.
    pub fn zero(family: VariantFamily) -> Self {
        match family {
            VariantFamily::Snp => VersionRecord::Snp(SnpVersion::default()),
            VariantFamily::Tdx => VersionRecord::Tdx(TdxVersion::default()),
        }
    }

    /// Records of different families are never newer than each other.
    pub fn is_newer_than(&self, other: &VersionRecord) -> bool {
        match (self, other) {
            (VersionRecord::Snp(a), VersionRecord::Snp(b)) => a.is_newer_than(b),
            (VersionRecord::Tdx(a), VersionRecord::Tdx(b)) => a.is_newer_than(b),
            _ => false,
        }
    }

    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        match self {
            VersionRecord::Snp(v) => serde_json::to_vec(v),
            VersionRecord::Tdx(v) => serde_json::to_vec(v),
        }
    }

    pub fn from_json(family: VariantFamily, data: &[u8]) -> Result<Self, serde_json::Error> {
        match family {
            VariantFamily::Snp => serde_json::from_slice(data).map(VersionRecord::Snp),
            VariantFamily::Tdx => serde_json::from_slice(data).map(VersionRecord::Tdx),
        }
    }
}

/// `a` is acceptable as a replacement for `b`.
pub fn compare(a: &VersionRecord, b: &VersionRecord) -> bool { a.is_newer_than(b) }

impl From<SnpVersion> for VersionRecord {
    fn from(v: SnpVersion) -> Self { VersionRecord::Snp(v) }
}

impl From<TdxVersion> for VersionRecord {
    fn from(v: TdxVersion) -> Self { VersionRecord::Tdx(v) }
}

impl Display for VersionRecord {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            VersionRecord::Snp(v) => write!(f, "bootloader={} tee={} snp={} microcode={}", v.bootloader, v.tee, v.snp, v.microcode),
            VersionRecord::Tdx(v) => write!(
                f,
                "qe_svn={} pce_svn={} tee_tcb_svn={} qe_vendor_id={} xfam={}",
                v.qe_svn, v.pce_svn, hex::encode(v.tee_tcb_svn), hex::encode(v.qe_vendor_id), hex::encode(v.xfam)
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn snp(bootloader: u8, tee: u8, snp: u8, microcode: u8) -> VersionRecord {
        SnpVersion { bootloader, tee, snp, microcode }.into()
    }

    #[test]
    fn equal_is_never_newer() {
        let a = snp(2, 0, 6, 93);
        assert!(!compare(&a, &a));
    }

    #[test]
    fn strictly_higher_field_is_newer() {
        assert!(compare(&snp(2, 0, 6, 94), &snp(2, 0, 6, 93)));
        assert!(compare(&snp(1, 0, 1, 1), &VersionRecord::zero(VariantFamily::Snp)));
    }

    #[test]
    fn any_regression_is_rejected() {
        // microcode up, tee down
        assert!(!compare(&snp(2, 0, 6, 94), &snp(2, 1, 6, 93)));
        assert!(!compare(&snp(1, 0, 1, 1), &snp(93, 0, 6, 2)));
    }

    #[test]
    fn tdx_array_bytes_compare_individually() {
        let base = TdxVersion { qe_svn: 2, pce_svn: 11, ..Default::default() };
        let mut higher = base;
        higher.tee_tcb_svn[3] = 4;
        assert!(VersionRecord::from(higher).is_newer_than(&base.into()));

        let mut mixed = higher;
        mixed.xfam[7] = 0;
        let mut other = base;
        other.xfam[7] = 1;
        assert!(!VersionRecord::from(mixed).is_newer_than(&other.into()));
    }

    #[test]
    fn families_do_not_compare() {
        let tdx = VersionRecord::from(TdxVersion { qe_svn: 9, ..Default::default() });
        assert!(!tdx.is_newer_than(&snp(0, 0, 0, 0)));
        assert!(!snp(9, 9, 9, 9).is_newer_than(&tdx));
    }

    #[test]
    fn snp_json_round_trip() {
        let rec = snp(2, 0, 6, 93);
        let raw = rec.to_json().unwrap();
        assert_eq!(String::from_utf8(raw.clone()).unwrap(), r#"{"bootloader":2,"tee":0,"snp":6,"microcode":93}"#);
        assert_eq!(VersionRecord::from_json(VariantFamily::Snp, &raw).unwrap(), rec);
    }

    #[test]
    fn tdx_wire_field_names() {
        let rec = VersionRecord::from(TdxVersion { qe_svn: 1, pce_svn: 2, ..Default::default() });
        let raw = String::from_utf8(rec.to_json().unwrap()).unwrap();
        assert!(raw.starts_with(r#"{"qeSVN":1,"pceSVN":2,"teeTCBSVN":[0,"#));
        assert!(raw.contains(r#""xfam":[0,0,0,0,0,0,0,0]"#));
        assert_eq!(VersionRecord::from_json(VariantFamily::Tdx, raw.as_bytes()).unwrap(), rec);
    }

    #[test]
    fn decoding_wrong_family_fails() {
        let raw = snp(1, 2, 3, 4).to_json().unwrap();
        assert!(VersionRecord::from_json(VariantFamily::Tdx, &raw).is_err());
    }

    fn arb_snp() -> impl Strategy<Value = SnpVersion> {
        (any::<u8>(), any::<u8>(), any::<u8>(), any::<u8>())
            .prop_map(|(bootloader, tee, snp, microcode)| SnpVersion { bootloader, tee, snp, microcode })
    }

    proptest! {
        #[test]
        fn prop_equal_never_newer(a in arb_snp()) {
            prop_assert!(!a.is_newer_than(&a));
        }

        #[test]
        fn prop_mixed_change_rejected(a in arb_snp(), up in 0usize..4, down in 0usize..4) {
            prop_assume!(up != down);
            let mut c = a.components();
            prop_assume!(c[up] < 255 && c[down] > 0);
            c[up] += 1;
            c[down] -= 1;
            let b = SnpVersion { bootloader: c[0] as u8, tee: c[1] as u8, snp: c[2] as u8, microcode: c[3] as u8 };
            prop_assert!(!b.is_newer_than(&a));
            prop_assert!(!a.is_newer_than(&b));
        }

        #[test]
        fn prop_newer_is_antisymmetric(a in arb_snp(), b in arb_snp()) {
            prop_assert!(!(a.is_newer_than(&b) && b.is_newer_than(&a)));
        }
    }
}
