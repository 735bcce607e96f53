//! Slug and ID helpers shared by the Git engine and workflows.

use uuid::Uuid;

/// Convert text to a URL-safe slug (lowercase, hyphens only).
///
/// Non-alphanumeric runs collapse to a single hyphen; leading/trailing
/// hyphens are trimmed. Used for workpad branch names (`pads/<slug>-<id>`)
/// and CI/rollback workpad titles.
pub fn slugify(text: &str) -> String {
    let lower = text.to_lowercase();
    let mut slug = String::new();
    let mut prev_hyphen = false;

    for c in lower.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c);
            prev_hyphen = false;
        } else if !prev_hyphen {
            slug.push('-');
            prev_hyphen = true;
        }
    }

    slug.trim_matches('-').to_string()
}

/// Random 6-8 char suffix used to keep workpad branch names unique even when
/// two workpads share the same title slug (§4.1). Derived from a UUID v4
/// rather than pulling in a dedicated RNG crate, since the engine already
/// depends on `uuid` for record identifiers.
pub fn short_id() -> String {
    let raw = Uuid::new_v4().simple().to_string();
    let len = 6 + (raw.as_bytes()[0] as usize % 3); // 6..=8
    raw[..len].to_string()
}

/// Compute the deterministic workpad branch name: `pads/<slug>-<shortid>`.
pub fn workpad_branch_name(title: &str) -> String {
    let slug = slugify(title);
    let slug = if slug.is_empty() { "pad".to_string() } else { slug };
    format!("pads/{}-{}", slug, short_id())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_basic() {
        assert_eq!(slugify("Hello World"), "hello-world");
    }

    #[test]
    fn slugify_special_chars() {
        assert_eq!(slugify("Fix Bug #1!"), "fix-bug-1");
    }

    #[test]
    fn slugify_multiple_separators() {
        assert_eq!(slugify("hello   world"), "hello-world");
    }

    #[test]
    fn slugify_leading_trailing() {
        assert_eq!(slugify("  hello  "), "hello");
    }

    #[test]
    fn slugify_empty_falls_back_in_branch_name() {
        let branch = workpad_branch_name("!!!");
        assert!(branch.starts_with("pads/pad-"));
    }

    #[test]
    fn short_id_length_in_range() {
        for _ in 0..50 {
            let id = short_id();
            assert!(id.len() >= 6 && id.len() <= 8);
            assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
        }
    }

    #[test]
    fn workpad_branch_name_has_pads_prefix() {
        let branch = workpad_branch_name("Add docs");
        assert!(branch.starts_with("pads/add-docs-"));
    }
}
