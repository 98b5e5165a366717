#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldGroup {
    File,
    Subject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    /// Key inside the structured group when it differs from `name`.
    pub structured_key: &'static str,
    pub group: FieldGroup,
    pub prompt: &'static str,
    pub example: &'static str,
}

const fn file(name: &'static str, prompt: &'static str, example: &'static str) -> FieldSpec {
    FieldSpec {
        name,
        structured_key: name,
        group: FieldGroup::File,
        prompt,
        example,
    }
}

const fn subject(
    name: &'static str,
    structured_key: &'static str,
    prompt: &'static str,
    example: &'static str,
) -> FieldSpec {
    FieldSpec {
        name,
        structured_key,
        group: FieldGroup::Subject,
        prompt,
        example,
    }
}

pub const FIELD_CATALOG: &[FieldSpec] = &[
    file(
        "session_description",
        "Briefly describe what happened in this recording session.",
        "Head-fixed mouse performing a visual discrimination task",
    ),
    file(
        "session_start_time",
        "When did the recording session start (date, time and timezone)?",
        "2024-03-15T14:30:00-05:00",
    ),
    file(
        "identifier",
        "Provide a unique identifier for this file.",
        "m01-2024-03-15-probe0",
    ),
    file(
        "experimenter",
        "Who performed the experiment? Use 'Last, First' per person.",
        "Doe, Jane",
    ),
    file(
        "institution",
        "Which institution was the data recorded at?",
        "University of Example",
    ),
    file("lab", "Which lab recorded the data?", "Systems Neuroscience Lab"),
    file(
        "experiment_description",
        "Describe the overall experiment this session belongs to.",
        "Chronic Neuropixels recordings in V1 during learning",
    ),
    file(
        "keywords",
        "List keywords that describe this dataset.",
        "visual cortex, neuropixels",
    ),
    file(
        "related_publications",
        "List DOIs of publications related to this data.",
        "doi:10.1000/xyz123",
    ),
    file(
        "session_id",
        "Provide a lab-specific identifier for this session.",
        "session-007",
    ),
    subject(
        "subject_id",
        "subject_id",
        "What is the subject's identifier?",
        "m01",
    ),
    subject(
        "species",
        "species",
        "What species is the subject? Use the binomial name.",
        "Mus musculus",
    ),
    subject(
        "sex",
        "sex",
        "What is the subject's sex (M, F, U or O)?",
        "F",
    ),
    subject(
        "age",
        "age",
        "How old was the subject at the session, as an ISO 8601 duration?",
        "P90D",
    ),
    subject(
        "date_of_birth",
        "date_of_birth",
        "What is the subject's date of birth?",
        "2023-12-16T00:00:00+00:00",
    ),
    subject(
        "genotype",
        "genotype",
        "What is the subject's genotype?",
        "Ai32/Ai32; PV-Cre/wt",
    ),
    subject("strain", "strain", "What strain is the subject?", "C57BL/6J"),
    subject(
        "weight",
        "weight",
        "What did the subject weigh, with units?",
        "25 g",
    ),
    subject(
        "subject_description",
        "description",
        "Describe the subject.",
        "Implanted with a head plate at P60",
    ),
];

pub fn field_spec(name: &str) -> Option<&'static FieldSpec> {
    FIELD_CATALOG.iter().find(|spec| spec.name == name)
}

/// Resolves free text such as a validator location (`/general/subject/species`)
/// to a catalog field name.
pub fn resolve_field(text: &str) -> Option<&'static str> {
    let lowered = text.to_ascii_lowercase();
    let last_segment = lowered
        .rsplit(['/', '.', ':'])
        .find(|segment| !segment.trim().is_empty())
        .unwrap_or(lowered.as_str())
        .trim();
    if let Some(spec) = field_spec(last_segment) {
        return Some(spec.name);
    }
    if lowered.contains("subject") && last_segment == "description" {
        return Some("subject_description");
    }
    let tokens: Vec<&str> = lowered
        .split(|ch: char| !(ch.is_ascii_alphanumeric() || ch == '_'))
        .filter(|token| !token.is_empty())
        .collect();
    FIELD_CATALOG
        .iter()
        .filter(|spec| tokens.contains(&spec.name))
        .max_by_key(|spec| spec.name.len())
        .map(|spec| spec.name)
}
