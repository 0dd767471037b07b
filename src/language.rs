//! Language requests and their resolution against installed models.
//!
//! Callers speak a mix of ISO 639-1 codes (`en`, `fr`) and engine model
//! names (`eng`, `fra`). We normalize everything to model names, validate
//! against the installed set, and fail the whole job on the first code we
//! cannot satisfy. No page work happens on an unresolved request.

use std::collections::BTreeSet;

use crate::error::JobError;

/// ISO 639-1 aliases for the model names our engines install.
const LANGUAGE_ALIASES: &[(&str, &str)] = &[
    ("ar", "ara"),
    ("da", "dan"),
    ("de", "deu"),
    ("en", "eng"),
    ("es", "spa"),
    ("fi", "fin"),
    ("fr", "fra"),
    ("it", "ita"),
    ("ja", "jpn"),
    ("ko", "kor"),
    ("nl", "nld"),
    ("pl", "pol"),
    ("pt", "por"),
    ("ru", "rus"),
    ("sv", "swe"),
    ("tr", "tur"),
    ("zh", "chi_sim"),
];

/// What the caller asked for, before validation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum LanguageRequest {
    /// No languages given. Use the configured fallback.
    #[default]
    Default,

    /// Automatic detection was requested. We do not detect languages from
    /// pixels, so this resolves to the fallback with a warning flag on the
    /// result.
    Auto,

    /// An explicit ordered list of language codes.
    Explicit(Vec<String>),
}

impl LanguageRequest {
    /// Parse a comma-separated request string, e.g. `"eng,fra"` or `"auto"`.
    pub fn parse(raw: &str) -> Self {
        let entries = raw
            .split(',')
            .map(|code| code.trim().to_owned())
            .filter(|code| !code.is_empty())
            .collect::<Vec<_>>();
        Self::from_entries(entries)
    }

    /// Build a request from a list of codes, if any.
    ///
    /// A missing or empty list means "use the default". A list containing
    /// only `auto` is the automatic-detection request. `auto` mixed with
    /// explicit codes is left in place and rejected during resolution, the
    /// same as any other unknown code.
    pub fn from_entries(entries: Vec<String>) -> Self {
        if entries.is_empty() {
            LanguageRequest::Default
        } else if entries.len() == 1 && entries[0].eq_ignore_ascii_case("auto") {
            LanguageRequest::Auto
        } else {
            LanguageRequest::Explicit(entries)
        }
    }
}

/// An ordered, validated, non-empty set of recognition languages.
///
/// Codes are engine model names, deduplicated with first occurrence
/// winning. Only [`resolve`] constructs these, so holding a `LanguageSet`
/// means validation already happened.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LanguageSet {
    codes: Vec<String>,
}

impl LanguageSet {
    /// The resolved model names, in request order.
    pub fn codes(&self) -> &[String] {
        &self.codes
    }
}

impl std::fmt::Display for LanguageSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.codes.join(","))
    }
}

/// A resolved language set plus whether we substituted the fallback for an
/// `auto` request.
#[derive(Clone, Debug)]
pub struct ResolvedLanguages {
    pub set: LanguageSet,
    pub fallback_applied: bool,
}

/// Map one caller-supplied code to an engine model name.
fn normalize(code: &str) -> String {
    let code = code.trim().to_lowercase();
    for (alias, model) in LANGUAGE_ALIASES {
        if code == *alias {
            return (*model).to_owned();
        }
    }
    code
}

/// Resolve a language request against the installed model set.
///
/// Pure function: the installed set is captured once when the pipeline is
/// built and passed in here. The first entry that does not normalize to an
/// installed model fails the job.
pub fn resolve(
    request: &LanguageRequest,
    installed: &BTreeSet<String>,
    fallback: &str,
) -> Result<ResolvedLanguages, JobError> {
    let (entries, fallback_applied) = match request {
        LanguageRequest::Default => (vec![fallback.to_owned()], false),
        LanguageRequest::Auto => (vec![fallback.to_owned()], true),
        LanguageRequest::Explicit(entries) => (entries.clone(), false),
    };

    let mut codes = Vec::with_capacity(entries.len());
    let mut seen = BTreeSet::new();
    for entry in &entries {
        let model = normalize(entry);
        if !installed.contains(&model) {
            return Err(JobError::UnsupportedLanguage(entry.trim().to_owned()));
        }
        if seen.insert(model.clone()) {
            codes.push(model);
        }
    }

    Ok(ResolvedLanguages {
        set: LanguageSet { codes },
        fallback_applied,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn installed(codes: &[&str]) -> BTreeSet<String> {
        codes.iter().map(|code| (*code).to_owned()).collect()
    }

    #[test]
    fn parses_comma_separated_lists() {
        assert_eq!(
            LanguageRequest::parse("eng, fra"),
            LanguageRequest::Explicit(vec!["eng".to_owned(), "fra".to_owned()])
        );
        assert_eq!(LanguageRequest::parse("auto"), LanguageRequest::Auto);
        assert_eq!(LanguageRequest::parse("  "), LanguageRequest::Default);
    }

    #[test]
    fn resolves_iso_aliases() {
        let resolved = resolve(
            &LanguageRequest::Explicit(vec![" EN ".to_owned(), "fr".to_owned()]),
            &installed(&["eng", "fra"]),
            "eng",
        )
        .unwrap();
        assert_eq!(resolved.set.codes(), ["eng", "fra"]);
        assert!(!resolved.fallback_applied);
    }

    #[test]
    fn preserves_order_and_drops_duplicates() {
        let resolved = resolve(
            &LanguageRequest::Explicit(vec![
                "fra".to_owned(),
                "eng".to_owned(),
                "fr".to_owned(),
            ]),
            &installed(&["eng", "fra"]),
            "eng",
        )
        .unwrap();
        assert_eq!(resolved.set.codes(), ["fra", "eng"]);
    }

    #[test]
    fn fails_on_first_unknown_code() {
        let err = resolve(
            &LanguageRequest::Explicit(vec!["eng".to_owned(), "xx".to_owned()]),
            &installed(&["eng"]),
            "eng",
        )
        .unwrap_err();
        match err {
            JobError::UnsupportedLanguage(code) => assert_eq!(code, "xx"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn auto_falls_back_with_warning() {
        let resolved =
            resolve(&LanguageRequest::Auto, &installed(&["eng"]), "eng").unwrap();
        assert_eq!(resolved.set.codes(), ["eng"]);
        assert!(resolved.fallback_applied);
    }

    #[test]
    fn absent_request_uses_fallback_without_warning() {
        let resolved =
            resolve(&LanguageRequest::Default, &installed(&["eng"]), "eng").unwrap();
        assert_eq!(resolved.set.codes(), ["eng"]);
        assert!(!resolved.fallback_applied);
    }

    #[test]
    fn auto_mixed_into_a_list_is_rejected() {
        let err = resolve(
            &LanguageRequest::Explicit(vec!["eng".to_owned(), "auto".to_owned()]),
            &installed(&["eng"]),
            "eng",
        )
        .unwrap_err();
        assert!(matches!(err, JobError::UnsupportedLanguage(code) if code == "auto"));
    }

    #[test]
    fn uninstalled_fallback_is_an_error() {
        let err = resolve(&LanguageRequest::Default, &installed(&["fra"]), "eng")
            .unwrap_err();
        assert!(matches!(err, JobError::UnsupportedLanguage(code) if code == "eng"));
    }
}
