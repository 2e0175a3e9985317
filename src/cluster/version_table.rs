//! The compiled-in software version support table (§6) and its
//! dotted-version comparator.

use std::cmp::Ordering;

use uuid::Uuid;

use crate::rpc::NodeVersions;

/// One row of the version support table.
pub struct VersionRequirement {
    pub category: &'static str,
    pub name: &'static str,
    pub min: &'static str,
    pub max: &'static str,
    pub required: bool,
}

/// The version support table, compiled into the binary (§6).
pub const SOFTWARE_VERSION: &[VersionRequirement] = &[
    VersionRequirement { category: "plugin", name: "Agent", min: "0.19", max: "0.19", required: true },
    VersionRequirement { category: "plugin", name: "OpenDNSSEC", min: "0.14", max: "0.14", required: true },
    VersionRequirement { category: "plugin", name: "SoftHSM", min: "0.14", max: "0.14", required: false },
    VersionRequirement { category: "plugin", name: "DNS", min: "0.12", max: "0.12", required: false },
    VersionRequirement { category: "program", name: "ods-control", min: "1", max: "1", required: true },
    VersionRequirement { category: "program", name: "ods-signerd", min: "1.3.14", max: "1.3.15", required: true },
    VersionRequirement { category: "program", name: "ods-signer", min: "1.3.14", max: "1.3.15", required: true },
    VersionRequirement { category: "program", name: "ods-enforcerd", min: "1.3.14", max: "1.3.15", required: true },
    VersionRequirement { category: "program", name: "ods-ksmutil", min: "1.3.14", max: "1.3.15", required: true },
    VersionRequirement { category: "program", name: "ods-hsmutil", min: "1.3.14", max: "1.3.15", required: false },
    VersionRequirement { category: "program", name: "softhsm", min: "1.3.3", max: "1.3.5", required: false },
];

/// Compare two dotted-version strings component-wise, left to right;
/// where both components parse as integers they're compared numerically,
/// otherwise lexicographically (§6).
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let mut ai = a.split('.');
    let mut bi = b.split('.');
    loop {
        return match (ai.next(), bi.next()) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(x), Some(y)) => match (x.parse::<u64>(), y.parse::<u64>()) {
                (Ok(xi), Ok(yi)) if xi != yi => xi.cmp(&yi),
                (Ok(_), Ok(_)) => continue,
                _ if x != y => x.cmp(y),
                _ => continue,
            },
        };
    }
}

fn in_range(version: &str, min: &str, max: &str) -> bool {
    compare_versions(version, min) != Ordering::Less && compare_versions(version, max) != Ordering::Greater
}

/// Check a node's reported versions against [`SOFTWARE_VERSION`] (§4.4 P1).
///
/// Returns the first violation found, formatted exactly as the log
/// message §8 scenario 2 expects.
pub fn check(node_uuid: Uuid, versions: &NodeVersions) -> Result<(), String> {
    for req in SOFTWARE_VERSION {
        let reported = match req.category {
            "plugin" => versions.plugin.get(req.name),
            _ => versions.program.get(req.name),
        };
        match reported {
            None => {
                if req.required {
                    return Err(format!(
                        "Required {} '{}' was not reported by node {node_uuid}",
                        req.category, req.name
                    ));
                }
            }
            Some(version) if !in_range(version, req.min, req.max) => {
                return Err(format!(
                    "Software {} version {version} on node {node_uuid} is not supported. Supported are minimum version {} and maximum version {}",
                    req.name, req.min, req.max
                ));
            }
            Some(_) => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_components_compare_numerically() {
        assert_eq!(compare_versions("1.3.9", "1.3.10"), Ordering::Less);
        assert_eq!(compare_versions("1.3.14", "1.3.14"), Ordering::Equal);
        assert_eq!(compare_versions("1.3.15", "1.3.14"), Ordering::Greater);
    }

    #[test]
    fn range_check_matches_scenario_2() {
        let mut versions = NodeVersions::default();
        versions.program.insert("ods-signerd".into(), "1.3.13".into());
        let uuid = Uuid::nil();
        let err = check(uuid, &versions).unwrap_err();
        assert_eq!(
            err,
            format!(
                "Software ods-signerd version 1.3.13 on node {uuid} is not supported. \
                 Supported are minimum version 1.3.14 and maximum version 1.3.15"
            )
        );
    }

    #[test]
    fn missing_required_entry_fails() {
        let versions = NodeVersions::default();
        assert!(check(Uuid::nil(), &versions).is_err());
    }
}
