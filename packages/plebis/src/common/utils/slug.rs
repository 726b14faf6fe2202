use std::collections::HashSet;

/// Turn a title into a URL slug: ASCII, lowercase, words joined by `-`.
///
/// Accented Latin letters are folded to their base letter so that
/// "Participación Ciudadana" becomes `participacion-ciudadana`.
pub fn parameterize(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_dash = false;

    for c in text.chars() {
        let folded = fold_accent(c);
        for f in folded.chars() {
            if f.is_ascii_alphanumeric() {
                if pending_dash && !slug.is_empty() {
                    slug.push('-');
                }
                pending_dash = false;
                slug.push(f.to_ascii_lowercase());
            } else {
                pending_dash = true;
            }
        }
    }

    slug
}

fn fold_accent(c: char) -> String {
    let base = match c {
        'á' | 'à' | 'â' | 'ä' | 'ã' | 'å' => "a",
        'Á' | 'À' | 'Â' | 'Ä' | 'Ã' | 'Å' => "A",
        'é' | 'è' | 'ê' | 'ë' => "e",
        'É' | 'È' | 'Ê' | 'Ë' => "E",
        'í' | 'ì' | 'î' | 'ï' => "i",
        'Í' | 'Ì' | 'Î' | 'Ï' => "I",
        'ó' | 'ò' | 'ô' | 'ö' | 'õ' => "o",
        'Ó' | 'Ò' | 'Ô' | 'Ö' | 'Õ' => "O",
        'ú' | 'ù' | 'û' | 'ü' => "u",
        'Ú' | 'Ù' | 'Û' | 'Ü' => "U",
        'ñ' => "n",
        'Ñ' => "N",
        'ç' => "c",
        'Ç' => "C",
        'ß' => "ss",
        'æ' => "ae",
        'Æ' => "AE",
        'œ' => "oe",
        'Œ' => "OE",
        _ => return c.to_string(),
    };
    base.to_string()
}

/// Pick the first free slug among `candidates`.
///
/// Candidates are parameterized first and blank ones skipped. When every
/// candidate is taken, the first one gets a numeric suffix starting at 2.
/// Returns `None` only when no candidate produces a non-empty slug.
pub fn resolve_slug<S: AsRef<str>>(candidates: &[S], taken: &HashSet<String>) -> Option<String> {
    let slugs: Vec<String> = candidates
        .iter()
        .map(|c| parameterize(c.as_ref()))
        .filter(|s| !s.is_empty())
        .collect();

    let first = slugs.first()?.clone();

    if let Some(free) = slugs.into_iter().find(|s| !taken.contains(s)) {
        return Some(free);
    }

    (2..)
        .map(|n| format!("{}-{}", first, n))
        .find(|s| !taken.contains(s))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn taken(slugs: &[&str]) -> HashSet<String> {
        slugs.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parameterize_joins_words_with_dashes() {
        assert_eq!(parameterize("Test Category"), "test-category");
        assert_eq!(parameterize("  Updated   Name!! "), "updated-name");
        assert_eq!(parameterize("Special chars: @#$% & <>"), "special-chars");
    }

    #[test]
    fn parameterize_folds_spanish_accents() {
        assert_eq!(parameterize("Participación Ciudadana"), "participacion-ciudadana");
        assert_eq!(parameterize("Año Nuevo en Logroño"), "ano-nuevo-en-logrono");
    }

    #[test]
    fn parameterize_drops_non_latin_text() {
        assert_eq!(parameterize("特殊"), "");
    }

    #[test]
    fn first_free_candidate_wins() {
        let candidates = ["Duplicate Title", "Duplicate Title 2024"];
        assert_eq!(
            resolve_slug(&candidates, &taken(&[])).as_deref(),
            Some("duplicate-title")
        );
        assert_eq!(
            resolve_slug(&candidates, &taken(&["duplicate-title"])).as_deref(),
            Some("duplicate-title-2024")
        );
    }

    #[test]
    fn numeric_suffix_when_all_candidates_are_taken() {
        let taken = taken(&["duplicate", "duplicate-2"]);
        assert_eq!(resolve_slug(&["Duplicate"], &taken).as_deref(), Some("duplicate-3"));
    }

    #[test]
    fn blank_candidates_are_skipped() {
        assert_eq!(resolve_slug(&["", "!!!"], &taken(&[])), None);
        assert_eq!(resolve_slug(&["!!!", "Fallback"], &taken(&[])).as_deref(), Some("fallback"));
    }
}
