//! Vocabulary registry.
//!
//! Static, hierarchical enumerations the tracker accepts: program,
//! priority and project codes with their canonical labels, flat value
//! sets, and the dependent vocabularies (systems per program, triage
//! assignments per triage category).

use tessa_common::AgentError;

/// Enumerated tag for every constrained field. Dispatch happens on this
/// tag, never on field-name substrings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    Project,
    Program,
    Priority,
    Severity,
    System,
    TriageCategory,
    TriageAssignment,
    SiliconRevision,
}

impl FieldKind {
    pub fn label(self) -> &'static str {
        match self {
            FieldKind::Project => "project",
            FieldKind::Program => "program",
            FieldKind::Priority => "priority",
            FieldKind::Severity => "severity",
            FieldKind::System => "system",
            FieldKind::TriageCategory => "triage category",
            FieldKind::TriageAssignment => "triage assignment",
            FieldKind::SiliconRevision => "silicon revision",
        }
    }

    /// Dependent vocabularies declare the field their valid set is
    /// resolved from.
    pub fn parent(self) -> Option<FieldKind> {
        match self {
            FieldKind::System => Some(FieldKind::Program),
            FieldKind::TriageAssignment => Some(FieldKind::TriageCategory),
            _ => None,
        }
    }
}

const PROGRAMS: &[(&str, &str)] = &[
    ("STX", "Strix1 [PRG-000384]"),
    ("STXH", "Strix Halo [PRG-000391]"),
    ("GNR", "Granite Ridge [PRG-000279]"),
    ("KRK", "Krackan1 [PRG-000388]"),
    ("KRK2E", "Krackan2e [PRG-000376]"),
    ("SHP", "Shimada Peak HEDT [PRG-000326]"),
    ("FRG", "Fire Range [PRG-000394]"),
];

const PRIORITIES: &[(&str, &str)] = &[
    ("P1", "P1 (Gating)"),
    ("P2", "P2 (Must Solve)"),
    ("P3", "P3 (Solution Desired)"),
    ("P4", "P4 (No Impact/Notify)"),
];

const PROJECTS: &[(&str, &str)] = &[("PLAT", "PLAT"), ("SWDEV", "SWDEV"), ("FWDEV", "FWDEV")];

const SEVERITIES: &[&str] = &["Critical", "High", "Medium", "Low"];

const TRIAGE_CATEGORIES: &[&str] = &["APU", "APU/CPU-FW", "CPU", "GPU"];

const SILICON_REVISIONS: &[&str] = &[
    "A0", "A0A", "A0B", "A0C", "A0D", "A1", "A1B", "A1C", "A1D", "A1E", "A2", "B0", "B0A", "B0B",
    "B0C", "B0D", "B1", "B1B", "B1C", "B1E", "B1F", "B1G", "B2", "B2D", "B3", "B3E", "C0", "C1",
    "C1A", "C1B", "C1C", "C1D", "DP",
];

/// Valid systems per program code. Programs without board definitions yet
/// have no entry.
const SYSTEMS: &[(&str, &[&str])] = &[
    (
        "STX",
        &[
            "System-Strix1 FP8 APU",
            "System-Strix1 FP7 APU",
            "System-Strix1 FP11 APU",
        ],
    ),
    (
        "STXH",
        &[
            "System-Strix Halo Reference Board",
            "System-Strix Halo Customer A Platform",
        ],
    ),
];

const TRIAGE_ASSIGNMENTS: &[(&str, &[&str])] = &[
    ("APU", &["Client- Platform Debug - HW", "Diags-GPU"]),
    (
        "APU/CPU-FW",
        &[
            "Firmware - Binary DXIO",
            "Firmware - Binary EC",
            "Firmware - Binary IMC",
            "Firmware - Binary PSP",
            "Firmware - Binary SMU",
            "Firmware - Binary XHC",
            "Firmware - BIOS Verification",
            "Firmware - IPE AGESA - ABL",
            "Firmware - IPE AGESA - CPU",
            "Firmware - IPE AGESA - CPU UCODE INTEGRATION",
            "Firmware - IPE AGESA - DF",
            "Firmware - IPE AGESA - GNB",
            "Firmware - IPE AGESA - IDS",
            "Firmware - IPE AGESA - MEM",
            "Firmware - IPE AGESA - Other",
            "Firmware - IPE AGESA - PROMONTORY",
            "Firmware - IPE AGESA - PSP",
            "Firmware - IPE AGESA - UEFI",
            "Firmware - IPE CBS - CPU",
            "Firmware - IPE CBS - FCH",
            "Firmware - IPE CBS - GNB",
            "Firmware - IPE CBS - MEM",
            "Firmware - IPE CBS - Other",
            "Firmware - IPE CPM",
        ],
    ),
    (
        "CPU",
        &[
            "3D Graphics",
            "AAA",
            "ABL",
            "ACP",
            "ACPI",
            "AGESA",
            "Analog IO",
            "APML",
            "Application Automation",
            "Atomics",
            "Automation Infrastructure",
            "AVL",
            "BIOS",
            "BMC",
            "Board",
            "Clarification/Validation",
            "Clock Characterization",
            "Coherency",
            "Core",
            "CXL",
            "Debug",
            "DF",
            "DFD",
            "DFx",
            "Diags",
            "Diags Framework",
            "Diags Release",
            "Diags-GPU",
            "Display",
            "Documentation",
            "DPM",
            "Driver",
            "DXIO",
            "FCH",
            "FCH Driver",
            "Firmware",
            "FPGA",
            "Fusing",
            "Gaming",
            "GFX Driver",
            "GMI",
            "HotPlug",
            "HSP",
            "Hybrid Graphics",
            "i2c",
            "i3c",
            "IO Compliance",
            "IO Datapath",
            "IO System Test",
            "IPU",
            "ISP",
            "Linux",
            "Linux Driver",
            "Manufacturing",
            "MCTP",
            "Memory (MC/PHY)",
            "Memory tuning",
            "Modern Standby",
            "MP2",
            "Multimedia",
            "NBIO",
            "Network",
            "Non-GFX Driver",
            "Operating System",
            "PCIe",
            "Performance",
            "PMFW",
            "Power",
            "PSP",
            "RAID",
            "RAS",
            "Remote Management",
            "Resets",
            "SATA",
            "SBIOS",
            "Scan",
            "Security",
            "Signal Integrity",
            "Silicon",
            "SLT",
            "SMU",
            "Socket Issues",
            "SPI/eSPI",
            "Stability",
            "System Hang",
            "SystemInteg",
            "Test Scripts",
            "Thermal/Mechanical",
            "Tools - HW",
            "Tools - SW",
            "UMC",
            "USB 2.0/3.0",
            "USB 3.2",
            "USB4",
            "VBIOS",
            "VCN",
            "Vendor",
            "Virtualization",
            "WHQL",
            "XGMI",
        ],
    ),
    (
        "GPU",
        &[
            "Board Engineering",
            "Diags",
            "Diags-GPU",
            "Exercisers",
            "External IO",
            "IFWI",
            "Internal IO",
            "MTAG",
            "Perf",
            "Platform",
            "SW/MLSE",
            "Sys Int",
            "Sys Mgmt Ras/Security",
            "Workloads",
        ],
    ),
];

fn coded_table(kind: FieldKind) -> Option<&'static [(&'static str, &'static str)]> {
    match kind {
        FieldKind::Project => Some(PROJECTS),
        FieldKind::Program => Some(PROGRAMS),
        FieldKind::Priority => Some(PRIORITIES),
        _ => None,
    }
}

fn flat_table(kind: FieldKind) -> Option<&'static [&'static str]> {
    match kind {
        FieldKind::Severity => Some(SEVERITIES),
        FieldKind::TriageCategory => Some(TRIAGE_CATEGORIES),
        FieldKind::SiliconRevision => Some(SILICON_REVISIONS),
        _ => None,
    }
}

fn dependent_table(kind: FieldKind) -> Option<&'static [(&'static str, &'static [&'static str])]> {
    match kind {
        FieldKind::System => Some(SYSTEMS),
        FieldKind::TriageAssignment => Some(TRIAGE_ASSIGNMENTS),
        _ => None,
    }
}

/// Resolve a code to its canonical label for a non-dependent field.
///
/// Codes match case-insensitively; a value that is already a canonical
/// label passes through unchanged. Anything else is a `Validation` error
/// naming the field and enumerating the valid codes.
pub fn resolve(kind: FieldKind, code: &str) -> Result<String, AgentError> {
    let trimmed = code.trim();

    if let Some(table) = coded_table(kind) {
        let upper = trimmed.to_uppercase();
        if let Some((_, label)) = table.iter().find(|(c, _)| *c == upper) {
            return Ok((*label).to_string());
        }
        if let Some((_, label)) = table.iter().find(|(_, l)| *l == trimmed) {
            return Ok((*label).to_string());
        }
        let codes: Vec<&str> = table.iter().map(|(c, _)| *c).collect();
        return Err(AgentError::validation(format!(
            "Invalid {} '{}'. Must be one of {:?}.",
            kind.label(),
            trimmed,
            codes
        )));
    }

    if let Some(values) = flat_table(kind) {
        if let Some(value) = values.iter().find(|v| v.eq_ignore_ascii_case(trimmed)) {
            return Ok((*value).to_string());
        }
        return Err(AgentError::validation(format!(
            "Invalid {} '{}'. Must be one of {:?}.",
            kind.label(),
            trimmed,
            values
        )));
    }

    Err(AgentError::validation(format!(
        "The {} field depends on {}; validate it through its parent value.",
        kind.label(),
        kind.parent().map(|p| p.label()).unwrap_or("another field")
    )))
}

/// Resolve a program value (code or canonical label) back to its code.
pub fn program_code(value: &str) -> Option<&'static str> {
    let trimmed = value.trim();
    let upper = trimmed.to_uppercase();
    PROGRAMS
        .iter()
        .find(|(code, label)| *code == upper || *label == trimmed)
        .map(|(code, _)| *code)
}

/// Valid options for a field, resolved against a parent value where the
/// vocabulary is dependent. An unset or unrecognized parent yields `None`
/// so callers can decide to prompt for the parent first.
pub fn valid_options(kind: FieldKind, parent: Option<&str>) -> Option<Vec<String>> {
    if let Some(table) = coded_table(kind) {
        return Some(table.iter().map(|(c, _)| (*c).to_string()).collect());
    }
    if let Some(values) = flat_table(kind) {
        return Some(values.iter().map(|v| (*v).to_string()).collect());
    }

    let table = dependent_table(kind)?;
    let parent = parent?;
    let parent_key = match kind {
        FieldKind::System => program_code(parent)?.to_string(),
        _ => parent.trim().to_uppercase(),
    };
    table
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(&parent_key))
        .map(|(_, values)| values.iter().map(|v| (*v).to_string()).collect())
}

/// Validate a dependent field's value against its parent-resolved set,
/// returning the canonical casing.
pub fn validate_dependent(
    kind: FieldKind,
    parent: &str,
    value: &str,
) -> Result<String, AgentError> {
    let parent_kind = kind.parent().unwrap_or(kind);
    let options = valid_options(kind, Some(parent)).ok_or_else(|| {
        AgentError::validation(format!(
            "Cannot validate {} until a valid {} is set.",
            kind.label(),
            parent_kind.label()
        ))
    })?;

    let trimmed = value.trim();
    options
        .iter()
        .find(|v| v.eq_ignore_ascii_case(trimmed))
        .cloned()
        .ok_or_else(|| {
            AgentError::validation(format!(
                "Invalid {} '{}' for {} '{}'. Must be one of {:?}.",
                kind.label(),
                trimmed,
                parent_kind.label(),
                parent,
                options
            ))
        })
}

/// Field-kind tag for a draft field name, if the field is vocabulary
/// constrained.
pub fn kind_for_draft_field(field: &str) -> Option<FieldKind> {
    match field {
        "project" => Some(FieldKind::Project),
        "program" => Some(FieldKind::Program),
        "system" => Some(FieldKind::System),
        "severity" => Some(FieldKind::Severity),
        "triage_category" => Some(FieldKind::TriageCategory),
        "triage_assignment" => Some(FieldKind::TriageAssignment),
        "silicon_revision" => Some(FieldKind::SiliconRevision),
        _ => None,
    }
}

/// Program codes for prompt construction.
pub fn program_codes() -> Vec<String> {
    PROGRAMS.iter().map(|(c, _)| (*c).to_string()).collect()
}

/// Priority codes for prompt construction.
pub fn priority_codes() -> Vec<String> {
    PRIORITIES.iter().map(|(c, _)| (*c).to_string()).collect()
}

/// Project codes for prompt construction.
pub fn project_codes() -> Vec<String> {
    PROJECTS.iter().map(|(c, _)| (*c).to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_program_code() {
        assert_eq!(
            resolve(FieldKind::Program, "STXH").unwrap(),
            "Strix Halo [PRG-000391]"
        );
        // Case-insensitive on codes.
        assert_eq!(
            resolve(FieldKind::Program, "stxh").unwrap(),
            "Strix Halo [PRG-000391]"
        );
    }

    #[test]
    fn test_resolve_passes_canonical_label_through() {
        assert_eq!(
            resolve(FieldKind::Program, "Strix Halo [PRG-000391]").unwrap(),
            "Strix Halo [PRG-000391]"
        );
        assert_eq!(
            resolve(FieldKind::Priority, "P2 (Must Solve)").unwrap(),
            "P2 (Must Solve)"
        );
    }

    #[test]
    fn test_resolve_unknown_code_names_field_and_options() {
        let err = resolve(FieldKind::Program, "ZZZ").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("program"));
        assert!(message.contains("STXH"));
    }

    #[test]
    fn test_resolve_severity_case_insensitive() {
        assert_eq!(resolve(FieldKind::Severity, "critical").unwrap(), "Critical");
        assert!(resolve(FieldKind::Severity, "Fatal").is_err());
    }

    #[test]
    fn test_dependent_options_require_known_parent() {
        let systems = valid_options(FieldKind::System, Some("STXH")).unwrap();
        assert_eq!(systems.len(), 2);
        assert!(systems[0].contains("Strix Halo"));

        // Label form of the parent works too.
        assert!(valid_options(FieldKind::System, Some("Strix Halo [PRG-000391]")).is_some());

        // Unknown or unset parent: None, not an error.
        assert!(valid_options(FieldKind::System, Some("NOPE")).is_none());
        assert!(valid_options(FieldKind::System, None).is_none());
        // Known program without board definitions: None as well.
        assert!(valid_options(FieldKind::System, Some("GNR")).is_none());
    }

    #[test]
    fn test_triage_assignments_per_category() {
        let apu = valid_options(FieldKind::TriageAssignment, Some("APU")).unwrap();
        assert_eq!(apu.len(), 2);
        let cpu = valid_options(FieldKind::TriageAssignment, Some("CPU")).unwrap();
        assert!(cpu.iter().any(|v| v == "BIOS"));
    }

    #[test]
    fn test_validate_dependent_membership() {
        let system =
            validate_dependent(FieldKind::System, "STXH", "system-strix halo reference board")
                .unwrap();
        assert_eq!(system, "System-Strix Halo Reference Board");

        let err = validate_dependent(FieldKind::System, "STXH", "System-Strix1 FP8 APU")
            .unwrap_err();
        assert!(err.to_string().contains("STXH"));
    }

    #[test]
    fn test_kind_for_draft_field() {
        assert_eq!(kind_for_draft_field("program"), Some(FieldKind::Program));
        assert_eq!(
            kind_for_draft_field("triage_assignment"),
            Some(FieldKind::TriageAssignment)
        );
        assert_eq!(kind_for_draft_field("bios_version"), None);
    }
}
