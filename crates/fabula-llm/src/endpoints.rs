//! Candidate endpoint enumeration.
//!
//! OpenAI-compatible gateways disagree about where the version segment
//! lives: some want `base=https://host` then `POST /v1/chat/completions`,
//! others want `base=https://host/v1` then `POST /chat/completions`.
//! This module produces the ordered, de-duplicated set of absolute URLs
//! to try for a (base, path) pair without ever doubling the segment into
//! `/v1/v1/...`. The same logic covers Gemini's `/v1beta` placement.

use crate::config::normalize_base_url;
use crate::policy;

/// Build the ordered candidate URLs for one logical call.
///
/// `version_segment` is `"v1"` for OpenAI-compatible paths and `"v1beta"`
/// for Gemini ones. At most two candidates come back: the form with the
/// segment first when the base did not already carry it, the bare form
/// otherwise.
pub fn candidate_urls(base_url: &str, version_segment: &str, path: &str) -> Vec<String> {
    let b = normalize_base_url(base_url);
    let seg_suffix = format!("/{}", version_segment);

    let mut bases: Vec<String> = vec![b.clone()];
    if let Some(stripped) = b.strip_suffix(&seg_suffix) {
        bases.push(stripped.to_string());
    }

    let mut candidates: Vec<String> = Vec::new();
    for bb in bases {
        if bb.is_empty() {
            continue;
        }
        let urls: Vec<String> = if bb.ends_with(&seg_suffix) {
            vec![format!("{}/{}", bb, path)]
        } else {
            // Prefer the versioned form first (most common), then bare.
            vec![
                format!("{}/{}/{}", bb, version_segment, path),
                format!("{}/{}", bb, path),
            ]
        };
        for url in urls {
            if !candidates.contains(&url) {
                candidates.push(url);
            }
        }
    }
    candidates
}

/// Candidates for an OpenAI-compatible logical path such as
/// `chat/completions` or `responses`.
///
/// Traffic-sensitive gateways get exactly one documented candidate; path
/// probing against them has been observed to trip abuse heuristics.
pub fn openai_candidates(base_url: &str, path: &str) -> Vec<String> {
    let b = normalize_base_url(base_url);
    if policy::is_sensitive_gateway(&b) {
        let base = b.strip_suffix("/v1").unwrap_or(&b);
        return vec![format!("{}/v1/{}", base, path)];
    }
    candidate_urls(&b, "v1", path)
}

/// Candidates for a Gemini `models/{model}:generateContent` call.
pub fn gemini_candidates(base_url: &str, model: &str, api_key: &str) -> Vec<String> {
    let path = format!("models/{}:generateContent?key={}", model, api_key);
    let b = normalize_base_url(base_url);
    if policy::is_sensitive_gateway(&b) {
        let base = b.strip_suffix("/v1beta").unwrap_or(&b);
        return vec![format!("{}/v1beta/{}", base, path)];
    }
    candidate_urls(&b, "v1beta", &path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_base_prefers_versioned_form() {
        let urls = candidate_urls("https://api.openai.com", "v1", "chat/completions");
        assert_eq!(
            urls,
            vec![
                "https://api.openai.com/v1/chat/completions",
                "https://api.openai.com/chat/completions",
            ]
        );
    }

    #[test]
    fn test_versioned_base_gets_complementary_form() {
        let urls = candidate_urls("https://api.openai.com/v1", "v1", "chat/completions");
        assert_eq!(
            urls,
            vec![
                "https://api.openai.com/v1/chat/completions",
                "https://api.openai.com/chat/completions",
            ]
        );
    }

    #[test]
    fn test_never_produces_duplicated_segment() {
        for base in [
            "https://host",
            "https://host/",
            "https://host/v1",
            "https://host/v1/",
            "host/v1",
            "\"https://host/v1\"",
        ] {
            for path in ["chat/completions", "responses"] {
                for url in candidate_urls(base, "v1", path) {
                    assert!(!url.contains("/v1/v1"), "{} from base {}", url, base);
                }
            }
        }
    }

    #[test]
    fn test_at_most_two_candidates_and_no_duplicates() {
        for base in ["https://host", "https://host/v1"] {
            let urls = candidate_urls(base, "v1", "responses");
            assert!(urls.len() <= 2, "{:?}", urls);
            let mut deduped = urls.clone();
            deduped.dedup();
            assert_eq!(urls, deduped);
        }
    }

    #[test]
    fn test_v1beta_segment_for_gemini() {
        let urls = candidate_urls(
            "https://generativelanguage.googleapis.com",
            "v1beta",
            "models/gemini-1.5-flash:generateContent?key=k",
        );
        assert_eq!(urls.len(), 2);
        assert!(urls[0].contains("/v1beta/models/"));
        assert!(!urls[1].contains("/v1beta"));
        for url in &urls {
            assert!(!url.contains("/v1beta/v1beta"));
        }
    }

    #[test]
    fn test_sensitive_gateway_gets_single_candidate() {
        let urls = openai_candidates("https://www.packyapi.com", "chat/completions");
        assert_eq!(urls, vec!["https://www.packyapi.com/v1/chat/completions"]);

        let urls = openai_candidates("https://www.packyapi.com/v1", "chat/completions");
        assert_eq!(urls, vec!["https://www.packyapi.com/v1/chat/completions"]);

        let urls = gemini_candidates("https://www.packyapi.com", "gemini-1.5-flash", "k");
        assert_eq!(
            urls,
            vec!["https://www.packyapi.com/v1beta/models/gemini-1.5-flash:generateContent?key=k"]
        );
    }

    #[test]
    fn test_gemini_candidates_carry_key_param() {
        let urls = gemini_candidates(
            "https://generativelanguage.googleapis.com",
            "gemini-1.5-flash",
            "secret",
        );
        for url in urls {
            assert!(url.ends_with(":generateContent?key=secret"));
        }
    }
}
