//! Baseline file addressing
//!
//! Baseline files are named `pubmed<YY>n<NNNN>.xml.gz` (e.g.
//! `pubmed25n0001.xml.gz`) and all live under one directory URL.

use std::ops::RangeInclusive;

/// One remote archive: year tag plus sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FetchTarget {
    pub year_tag: u16,
    pub sequence: u32,
}

impl FetchTarget {
    pub fn new(year_tag: u16, sequence: u32) -> Self {
        Self { year_tag, sequence }
    }

    /// Remote (and local) file name
    pub fn filename(&self) -> String {
        format!("pubmed{:02}n{:04}.xml.gz", self.year_tag, self.sequence)
    }

    /// Full URL below `base_url` (trailing slash optional)
    pub fn url(&self, base_url: &str) -> String {
        format!("{}/{}", base_url.trim_end_matches('/'), self.filename())
    }

    /// Short label for logs, e.g. `25n0001`
    pub fn label(&self) -> String {
        format!("{:02}n{:04}", self.year_tag, self.sequence)
    }

    /// Parse a baseline file name back into a target
    pub fn from_filename(name: &str) -> Option<Self> {
        let rest = name.strip_prefix("pubmed")?.strip_suffix(".xml.gz")?;
        let (year, seq) = rest.split_once('n')?;
        Some(Self {
            year_tag: year.parse().ok()?,
            sequence: seq.parse().ok()?,
        })
    }
}

impl std::fmt::Display for FetchTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.filename())
    }
}

/// Targets for an inclusive sequence range, in ascending order
pub fn targets(year_tag: u16, range: RangeInclusive<u32>) -> Vec<FetchTarget> {
    range.map(|seq| FetchTarget::new(year_tag, seq)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filename_is_zero_padded() {
        assert_eq!(FetchTarget::new(25, 1).filename(), "pubmed25n0001.xml.gz");
        assert_eq!(FetchTarget::new(25, 1274).filename(), "pubmed25n1274.xml.gz");
        assert_eq!(FetchTarget::new(5, 42).filename(), "pubmed05n0042.xml.gz");
    }

    #[test]
    fn url_handles_trailing_slash() {
        let t = FetchTarget::new(26, 7);
        let expected = "https://ftp.ncbi.nlm.nih.gov/pubmed/baseline/pubmed26n0007.xml.gz";
        assert_eq!(t.url("https://ftp.ncbi.nlm.nih.gov/pubmed/baseline/"), expected);
        assert_eq!(t.url("https://ftp.ncbi.nlm.nih.gov/pubmed/baseline"), expected);
    }

    #[test]
    fn label_format() {
        assert_eq!(FetchTarget::new(25, 3).label(), "25n0003");
    }

    #[test]
    fn from_filename_roundtrip() {
        assert_eq!(
            FetchTarget::from_filename("pubmed26n0100.xml.gz"),
            Some(FetchTarget::new(26, 100))
        );
    }

    #[test]
    fn from_filename_invalid() {
        assert_eq!(FetchTarget::from_filename("invalid.xml.gz"), None);
        assert_eq!(FetchTarget::from_filename("pubmed26.xml.gz"), None);
        assert_eq!(FetchTarget::from_filename("pubmed26n0001"), None);
        assert_eq!(FetchTarget::from_filename(""), None);
    }

    #[test]
    fn targets_ascending_inclusive() {
        let ts = targets(25, 3..=5);
        let seqs: Vec<u32> = ts.iter().map(|t| t.sequence).collect();
        assert_eq!(seqs, vec![3, 4, 5]);
        assert!(ts.iter().all(|t| t.year_tag == 25));
    }

    #[test]
    fn targets_empty_when_inverted() {
        #[allow(clippy::reversed_empty_ranges)]
        let ts = targets(25, 5..=3);
        assert!(ts.is_empty());
    }
}
