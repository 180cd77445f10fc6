//! Study Record - a named research theme grouping experiments

/// A study: a named collection of related experiments.
///
/// Only the README is persisted; the display name is its first-level heading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Study {
    slug: String,
    name: String,
    readme: String,
}

impl Study {
    /// Create a study with a freshly rendered README.
    #[must_use]
    pub fn new(slug: impl Into<String>, name: impl Into<String>) -> Self {
        let name = name.into();
        let readme = render_readme(&name);
        Self {
            slug: slug.into(),
            name,
            readme,
        }
    }

    /// Rebuild a study from its README contents.
    #[must_use]
    pub fn from_readme(slug: impl Into<String>, readme: impl Into<String>) -> Self {
        let slug = slug.into();
        let readme = readme.into();
        let name = readme
            .lines()
            .find_map(|line| line.strip_prefix("# "))
            .map_or_else(|| slug.clone(), |heading| heading.trim().to_string());
        Self { slug, name, readme }
    }

    /// Get the filesystem-safe slug.
    #[must_use]
    pub fn slug(&self) -> &str {
        &self.slug
    }

    /// Get the display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the README contents.
    #[must_use]
    pub fn readme(&self) -> &str {
        &self.readme
    }
}

fn render_readme(name: &str) -> String {
    format!(
        "# {name}\n\
         \n\
         ## Goals\n\
         \n\
         <!-- What are you trying to learn or achieve? -->\n\
         \n\
         ## Hypotheses\n\
         \n\
         <!-- What do you expect to find? -->\n\
         \n\
         ## Background\n\
         \n\
         <!-- Relevant context, prior work, references -->\n\
         \n\
         ## Key Findings\n\
         \n\
         <!-- Updated as experiments complete -->\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_study_readme_round_trip() {
        let study = Study::new("sparse-attention", "Sparse Attention");
        let reloaded = Study::from_readme("sparse-attention", study.readme());
        assert_eq!(reloaded.name(), "Sparse Attention");
        assert!(study.readme().contains("## Hypotheses"));
    }

    #[test]
    fn test_name_falls_back_to_slug() {
        let study = Study::from_readme("misc", "no heading here\n");
        assert_eq!(study.name(), "misc");
    }
}
