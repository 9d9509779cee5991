//! Selection engine: whitelist/exclusion filtering over a group's PVC
//! list, plus the per-group disable flag.
//!
//! Missing or empty list files are not errors — absence just means "no
//! filter".

use std::path::Path;

use crate::model::PvcRef;

/// Read one name per line from `path`, skipping blank lines. Returns an
/// empty vec (not an error) if the file is missing or unreadable.
fn read_names(path: Option<&Path>) -> Vec<String> {
    let Some(path) = path else {
        return Vec::new();
    };
    match std::fs::read_to_string(path) {
        Ok(contents) => contents
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect(),
        Err(_) => Vec::new(),
    }
}

/// A candidate PVC matches a whitelist/exclusion entry either by exact
/// name, or by the group's naming convention `<prefix><entry><postfix>`.
fn matches_entry(candidate_name: &str, entry: &str, prefix: &str, postfix: &str) -> bool {
    candidate_name == entry || candidate_name == format!("{prefix}{entry}{postfix}")
}

/// Apply whitelist-then-exclusion filtering to `candidates`.
///
/// `prefix`/`postfix` encode the group's naming convention (e.g. `"claim-"`,
/// `""` for users) used for the whitelist/exclusion equivalence check.
pub fn select_group(
    candidates: Vec<PvcRef>,
    disabled: bool,
    whitelist_path: Option<&Path>,
    exclusion_path: Option<&Path>,
    prefix: &str,
    postfix: &str,
) -> Vec<PvcRef> {
    if disabled {
        return Vec::new();
    }

    let whitelist = read_names(whitelist_path);
    let selected: Vec<PvcRef> = if whitelist.is_empty() {
        candidates
    } else {
        candidates
            .into_iter()
            .filter(|pvc| {
                whitelist
                    .iter()
                    .any(|entry| matches_entry(&pvc.source_name, entry, prefix, postfix))
            })
            .collect()
    };

    let exclusion = read_names(exclusion_path);
    if exclusion.is_empty() {
        return selected;
    }

    selected
        .into_iter()
        .filter(|pvc| {
            !exclusion
                .iter()
                .any(|entry| matches_entry(&pvc.source_name, entry, prefix, postfix))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PvcKind;
    use std::io::Write;

    fn pvc(name: &str) -> PvcRef {
        PvcRef {
            namespace: "hub".into(),
            source_name: name.into(),
            logical_name: name.into(),
            kind: PvcKind::User,
            capacity: "1Gi".into(),
            access_mode: None,
        }
    }

    fn write_tmp(lines: &[&str]) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "{}", lines.join("\n")).unwrap();
        f
    }

    #[test]
    fn whitelist_and_exclusion_round_trip() {
        let whitelist = write_tmp(&["alice", "bob"]);
        let exclusion = write_tmp(&["bob"]);

        let candidates = vec![pvc("claim-alice"), pvc("claim-bob"), pvc("claim-carol")];
        let selected = select_group(
            candidates,
            false,
            Some(whitelist.path()),
            Some(exclusion.path()),
            "claim-",
            "",
        );

        let names: Vec<_> = selected.iter().map(|p| p.source_name.as_str()).collect();
        assert_eq!(names, vec!["claim-alice"]);
    }

    #[test]
    fn disabled_group_yields_empty_list() {
        let candidates = vec![pvc("claim-alice")];
        let selected = select_group(candidates, true, None, None, "claim-", "");
        assert!(selected.is_empty());
    }

    #[test]
    fn missing_files_default_to_no_filter() {
        let candidates = vec![pvc("claim-alice"), pvc("claim-bob")];
        let selected = select_group(
            candidates,
            false,
            Some(Path::new("/nonexistent/whitelist")),
            Some(Path::new("/nonexistent/exclusion")),
            "claim-",
            "",
        );
        assert_eq!(selected.len(), 2);
    }
}
