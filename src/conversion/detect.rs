use crate::collaborators::{GuardedCompletion, TextCompletion};
use crate::protocol::{DetectionMethod, FormatDetection};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

/// Directory levels scanned below a directory input.
pub const SCAN_DEPTH: usize = 2;
const MAX_LISTED_FILES: usize = 40;

struct FormatRule {
    format: &'static str,
    suffixes: &'static [&'static str],
    /// When set, the file name must also contain this fragment.
    fragment: Option<&'static str>,
}

impl FormatRule {
    fn matches(&self, name: &str) -> bool {
        self.suffixes.iter().any(|suffix| name.ends_with(suffix))
            && self.fragment.is_none_or(|fragment| name.contains(fragment))
    }
}

const FORMAT_RULES: &[FormatRule] = &[
    FormatRule {
        format: "SpikeGLX",
        suffixes: &[".ap.bin", ".lf.bin", ".nidq.bin", ".ap.meta", ".lf.meta", ".nidq.meta"],
        fragment: None,
    },
    FormatRule {
        format: "OpenEphys",
        suffixes: &["structure.oebin", ".continuous", ".openephys"],
        fragment: None,
    },
    FormatRule {
        format: "Intan",
        suffixes: &[".rhd", ".rhs"],
        fragment: None,
    },
    FormatRule {
        format: "Blackrock",
        suffixes: &[".ns1", ".ns2", ".ns3", ".ns4", ".ns5", ".ns6", ".nev"],
        fragment: None,
    },
    FormatRule {
        format: "Plexon",
        suffixes: &[".plx", ".pl2"],
        fragment: None,
    },
    FormatRule {
        format: "Neuralynx",
        suffixes: &[".ncs", ".nse", ".ntt"],
        fragment: None,
    },
    FormatRule {
        format: "AxonABF",
        suffixes: &[".abf"],
        fragment: None,
    },
    FormatRule {
        format: "Spike2",
        suffixes: &[".smr", ".smrx"],
        fragment: None,
    },
    FormatRule {
        format: "TDT",
        suffixes: &[".tev", ".tsq", ".tbk"],
        fragment: None,
    },
    FormatRule {
        format: "NeuroScope",
        suffixes: &[".eeg", ".lfp", ".clu.1", ".res.1"],
        fragment: None,
    },
    FormatRule {
        format: "MEArec",
        suffixes: &[".h5"],
        fragment: Some("mearec"),
    },
];

pub fn known_formats() -> Vec<String> {
    FORMAT_RULES
        .iter()
        .map(|rule| rule.format.to_string())
        .collect()
}

/// Case-insensitive lookup returning the catalog spelling.
pub fn canonical_format(raw: &str) -> Option<&'static str> {
    let wanted = raw.trim();
    FORMAT_RULES
        .iter()
        .map(|rule| rule.format)
        .find(|format| format.eq_ignore_ascii_case(wanted))
}

/// Lower-cased file names of `input`, or of the files up to
/// [`SCAN_DEPTH`] levels below it when it is a directory.
pub fn list_file_names(input: &Path) -> std::io::Result<Vec<String>> {
    let mut names = Vec::new();
    if input.is_dir() {
        collect_names(input, Path::new(""), 0, &mut names)?;
    } else {
        let metadata = fs::metadata(input)?;
        if metadata.is_file() {
            if let Some(name) = input.file_name() {
                names.push(name.to_string_lossy().to_ascii_lowercase());
            }
        }
    }
    names.sort();
    Ok(names)
}

fn collect_names(
    dir: &Path,
    prefix: &Path,
    depth: usize,
    names: &mut Vec<String>,
) -> std::io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let relative = prefix.join(entry.file_name());
        if path.is_dir() {
            if depth < SCAN_DEPTH {
                collect_names(&path, &relative, depth + 1, names)?;
            }
        } else {
            names.push(relative.to_string_lossy().to_ascii_lowercase());
        }
    }
    Ok(())
}

/// Total size of the input file, or of the files the scan would visit.
pub fn input_size_bytes(input: &Path) -> u64 {
    fn walk(dir: &Path, depth: usize) -> u64 {
        let Ok(entries) = fs::read_dir(dir) else {
            return 0;
        };
        entries
            .filter_map(Result::ok)
            .map(|entry| {
                let path = entry.path();
                if path.is_dir() {
                    if depth < SCAN_DEPTH {
                        walk(&path, depth + 1)
                    } else {
                        0
                    }
                } else {
                    entry.metadata().map(|m| m.len()).unwrap_or(0)
                }
            })
            .sum()
    }
    if input.is_dir() {
        walk(input, 0)
    } else {
        fs::metadata(input).map(|m| m.len()).unwrap_or(0)
    }
}

/// Deterministic classification by file naming. Exactly one matching
/// format is a confident answer; anything else is ambiguous.
pub fn detect_by_pattern(names: &[String]) -> FormatDetection {
    let matched: BTreeSet<&'static str> = names
        .iter()
        .flat_map(|name| {
            FORMAT_RULES
                .iter()
                .filter(move |rule| rule.matches(name))
                .map(|rule| rule.format)
        })
        .collect();
    let mut candidates: Vec<String> = matched.iter().map(|f| f.to_string()).collect();
    if candidates.len() == 1 {
        let format = candidates.remove(0);
        return FormatDetection::high(format, DetectionMethod::Pattern);
    }
    FormatDetection::ambiguous(candidates)
}

#[derive(Debug, Deserialize)]
struct Classification {
    format: String,
    confidence: f64,
}

/// Reads `{"format": .., "confidence": ..}` or `format: X` / `confidence: N`
/// lines. Confidence may be a fraction or a percentage.
fn parse_classification(raw: &str) -> Option<(String, u8)> {
    let trimmed = raw.trim();
    let parsed = serde_json::from_str::<Classification>(trimmed)
        .ok()
        .map(|c| (c.format, c.confidence))
        .or_else(|| {
            let mut format = None;
            let mut confidence = None;
            for line in trimmed.lines() {
                let Some((key, value)) = line.split_once(':') else {
                    continue;
                };
                let value = value.trim();
                match key.trim().to_ascii_lowercase().as_str() {
                    "format" => format = Some(value.to_string()),
                    "confidence" => {
                        confidence = value.trim_end_matches('%').trim().parse::<f64>().ok()
                    }
                    _ => {}
                }
            }
            Some((format?, confidence?))
        })?;
    let (format, confidence) = parsed;
    // Percentages are the requested scale; only a proper fraction reads as one.
    let percent = if confidence > 0.0 && confidence < 1.0 {
        confidence * 100.0
    } else {
        confidence
    };
    if !percent.is_finite() || percent < 0.0 {
        return None;
    }
    Some((format, percent.round().min(100.0) as u8))
}

fn classification_prompt(names: &[String]) -> String {
    let listing = names
        .iter()
        .take(MAX_LISTED_FILES)
        .map(|name| format!("- {name}"))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Identify the electrophysiology acquisition format of a recording.\n\
         Known formats: {}.\n\
         Files:\n{listing}\n\
         Answer with JSON: {{\"format\": \"<one known format>\", \"confidence\": <0-100>}}",
        known_formats().join(", ")
    )
}

/// Completion first, trusted only above `threshold` and only for a catalog
/// format; pattern matching otherwise.
pub fn detect_format(
    names: &[String],
    completion: &GuardedCompletion,
    threshold: u8,
) -> FormatDetection {
    if !names.is_empty() {
        if let Ok(answer) = completion.complete(&classification_prompt(names)) {
            if let Some((format, confidence)) = parse_classification(&answer) {
                if confidence > threshold {
                    if let Some(format) = canonical_format(&format) {
                        return FormatDetection::high(format, DetectionMethod::Completion);
                    }
                }
            }
        }
    }
    detect_by_pattern(names)
}
