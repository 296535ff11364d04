use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use anyhow::{Error, anyhow};
use chrono::NaiveDate;

/// Retention class of a snapshot. Weekly snapshots persist memory state,
/// nightly ones do not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SnapshotClass {
    Nightly,
    Weekly,
}

impl SnapshotClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotClass::Nightly => "nightly",
            SnapshotClass::Weekly => "weekly",
        }
    }

    pub fn for_memory(keep_memory: bool) -> Self {
        if keep_memory {
            SnapshotClass::Weekly
        } else {
            SnapshotClass::Nightly
        }
    }

    pub fn persists_memory(&self) -> bool {
        matches!(self, SnapshotClass::Weekly)
    }
}

impl fmt::Display for SnapshotClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SnapshotClass {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "nightly" => Ok(SnapshotClass::Nightly),
            "weekly" => Ok(SnapshotClass::Weekly),
            other => Err(anyhow!("unknown snapshot class {:?}", other)),
        }
    }
}

/// Structured form of a snapshot description,
/// `<YYYYMMDD>_<class>_<vmName>[_<seq>]`. The date field is the canonical
/// ordering key; the rendered string is only the wire representation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotLabel {
    pub date: NaiveDate,
    pub class: SnapshotClass,
    pub vm_name: String,
    pub seq: Option<u32>,
}

impl SnapshotLabel {
    pub fn new(date: NaiveDate, class: SnapshotClass, vm_name: impl Into<String>) -> Self {
        Self {
            date,
            class,
            vm_name: vm_name.into(),
            seq: None,
        }
    }

    /// Strict parse against a known VM name. Anything that is not exactly
    /// `<date>_<class>_<vm>` or `<date>_<class>_<vm>_<digits>` is rejected;
    /// such snapshots are never considered for eviction.
    pub fn parse_for(description: &str, vm_name: &str) -> Option<Self> {
        let (date, rest) = split_date(description)?;

        for class in [SnapshotClass::Nightly, SnapshotClass::Weekly] {
            let Some(tail) = rest.strip_prefix(class.as_str()) else {
                continue;
            };
            let Some(tail) = tail.strip_prefix('_') else {
                continue;
            };

            if tail == vm_name {
                return Some(SnapshotLabel {
                    date,
                    class,
                    vm_name: vm_name.to_string(),
                    seq: None,
                });
            }

            if let Some(suffix) = tail.strip_prefix(vm_name).and_then(|s| s.strip_prefix('_')) {
                if !suffix.is_empty() && suffix.bytes().all(|b| b.is_ascii_digit()) {
                    if let Ok(seq) = suffix.parse::<u32>() {
                        return Some(SnapshotLabel {
                            date,
                            class,
                            vm_name: vm_name.to_string(),
                            seq: Some(seq),
                        });
                    }
                }
            }
        }

        None
    }

    /// Best-effort parse without a known VM name, used for display. A VM
    /// name that itself ends in `_<digits>` is indistinguishable from a
    /// disambiguator here; retention always goes through [`Self::parse_for`].
    pub fn parse(description: &str) -> Option<Self> {
        let (date, rest) = split_date(description)?;
        let (class_part, name_part) = rest.split_once('_')?;
        let class = class_part.parse::<SnapshotClass>().ok()?;

        if name_part.is_empty() {
            return None;
        }

        let (vm_name, seq) = match name_part.rsplit_once('_') {
            Some((vm, suffix))
                if !vm.is_empty()
                    && !suffix.is_empty()
                    && suffix.bytes().all(|b| b.is_ascii_digit()) =>
            {
                (vm.to_string(), suffix.parse::<u32>().ok())
            }
            _ => (name_part.to_string(), None),
        };

        Some(SnapshotLabel {
            date,
            class,
            vm_name,
            seq,
        })
    }

    /// Newest-first ordering key. Same-date ordering by disambiguator is
    /// best-effort, matching the uniqueness guarantee of the scheme.
    pub fn sort_key(&self) -> (NaiveDate, u32) {
        (self.date, self.seq.unwrap_or(0))
    }
}

impl fmt::Display for SnapshotLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}_{}",
            self.date.format("%Y%m%d"),
            self.class,
            self.vm_name
        )?;
        if let Some(seq) = self.seq {
            write!(f, "_{}", seq)?;
        }
        Ok(())
    }
}

fn split_date(description: &str) -> Option<(NaiveDate, &str)> {
    let date_part = description.get(0..8)?;
    if !date_part.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let date = NaiveDate::parse_from_str(date_part, "%Y%m%d").ok()?;
    let rest = description.get(8..)?.strip_prefix('_')?;
    Some((date, rest))
}

/// Builds a description that is unique among `existing`. The caller must
/// pass the live listing from the engine; the first free `_1`, `_2`, …
/// suffix is appended on collision. The chosen description is recorded in
/// `existing`, so repeated calls against the same set keep incrementing.
pub fn unique_label(
    date: NaiveDate,
    class: SnapshotClass,
    vm_name: &str,
    existing: &mut HashSet<String>,
) -> SnapshotLabel {
    let mut label = SnapshotLabel::new(date, class, vm_name);
    let mut seq = 0u32;
    while existing.contains(&label.to_string()) {
        seq += 1;
        label.seq = Some(seq);
    }
    existing.insert(label.to_string());
    label
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y%m%d").expect("test date")
    }

    #[test]
    fn test_label_round_trip() {
        let label = SnapshotLabel::new(date("20240101"), SnapshotClass::Nightly, "vmA");
        assert_eq!(label.to_string(), "20240101_nightly_vmA");
        assert_eq!(
            SnapshotLabel::parse_for("20240101_nightly_vmA", "vmA"),
            Some(label)
        );
    }

    #[test]
    fn test_parse_for_with_disambiguator() {
        let label = SnapshotLabel::parse_for("20240101_weekly_vmA_3", "vmA").expect("parse");
        assert_eq!(label.class, SnapshotClass::Weekly);
        assert_eq!(label.seq, Some(3));
        assert_eq!(label.to_string(), "20240101_weekly_vmA_3");
    }

    #[test]
    fn test_parse_for_rejects_malformed() {
        // wrong VM
        assert_eq!(SnapshotLabel::parse_for("20240101_nightly_vmB", "vmA"), None);
        // unknown class
        assert_eq!(SnapshotLabel::parse_for("20240101_monthly_vmA", "vmA"), None);
        // not a date
        assert_eq!(SnapshotLabel::parse_for("2024x101_nightly_vmA", "vmA"), None);
        assert_eq!(SnapshotLabel::parse_for("20241301_nightly_vmA", "vmA"), None);
        // non-numeric suffix
        assert_eq!(
            SnapshotLabel::parse_for("20240101_nightly_vmA_final", "vmA"),
            None
        );
        // free-text descriptions like the engine's "Active VM"
        assert_eq!(SnapshotLabel::parse_for("Active VM", "vmA"), None);
        assert_eq!(SnapshotLabel::parse_for("", "vmA"), None);
    }

    #[test]
    fn test_parse_for_vm_name_with_underscores() {
        let label = SnapshotLabel::parse_for("20240101_nightly_db_01", "db_01").expect("parse");
        assert_eq!(label.vm_name, "db_01");
        assert_eq!(label.seq, None);

        let label = SnapshotLabel::parse_for("20240101_nightly_db_01_2", "db_01").expect("parse");
        assert_eq!(label.seq, Some(2));
    }

    #[test]
    fn test_unique_label_avoids_collisions() {
        let mut existing: HashSet<String> = [
            "20240101_nightly_vmA".to_string(),
            "20240101_nightly_vmA_1".to_string(),
        ]
        .into();

        let label = unique_label(date("20240101"), SnapshotClass::Nightly, "vmA", &mut existing);
        assert_eq!(label.to_string(), "20240101_nightly_vmA_2");
    }

    #[test]
    fn test_unique_label_first_collision() {
        let mut existing: HashSet<String> = ["20240101_nightly_vmA".to_string()].into();
        let label = unique_label(date("20240101"), SnapshotClass::Nightly, "vmA", &mut existing);
        assert_eq!(label.to_string(), "20240101_nightly_vmA_1");
    }

    #[test]
    fn test_unique_label_monotonic_without_refresh() {
        // Repeated builds against the same set keep incrementing, never
        // reuse a description.
        let mut existing: HashSet<String> = HashSet::new();
        let mut seen = Vec::new();
        for _ in 0..5 {
            let label = unique_label(date("20240101"), SnapshotClass::Nightly, "vmA", &mut existing);
            seen.push(label.to_string());
        }
        assert_eq!(
            seen,
            vec![
                "20240101_nightly_vmA",
                "20240101_nightly_vmA_1",
                "20240101_nightly_vmA_2",
                "20240101_nightly_vmA_3",
                "20240101_nightly_vmA_4",
            ]
        );
    }
}
