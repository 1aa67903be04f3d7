//! Server-design guide.
//!
//! Static reference text the planner can consult. Sections are indexed by
//! their `##` headings; lookups are case-insensitive and accept substrings.

use std::path::Path;

const DEFAULT_GUIDE: &str = include_str!("../assets/design_guide.md");

#[derive(Debug, Clone)]
struct Section {
    title: String,
    body: String,
}

#[derive(Debug, Clone)]
pub struct DesignGuide {
    sections: Vec<Section>,
}

impl DesignGuide {
    pub fn embedded() -> Self {
        Self::from_markdown(DEFAULT_GUIDE)
    }

    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| anyhow::anyhow!("read design guide {}: {e}", path.display()))?;
        let guide = Self::from_markdown(&contents);
        if guide.sections.is_empty() {
            return Err(anyhow::anyhow!(
                "design guide {} has no '##' sections",
                path.display()
            ));
        }
        Ok(guide)
    }

    pub fn from_markdown(markdown: &str) -> Self {
        let mut sections = Vec::new();
        let mut current: Option<Section> = None;
        for line in markdown.lines() {
            if let Some(title) = line.strip_prefix("## ") {
                if let Some(section) = current.take() {
                    sections.push(section);
                }
                current = Some(Section {
                    title: title.trim().to_string(),
                    body: String::new(),
                });
            } else if let Some(section) = current.as_mut() {
                section.body.push_str(line);
                section.body.push('\n');
            }
        }
        if let Some(section) = current {
            sections.push(section);
        }
        for section in &mut sections {
            section.body = section.body.trim().to_string();
        }
        Self { sections }
    }

    pub fn section_titles(&self) -> Vec<String> {
        self.sections.iter().map(|s| s.title.clone()).collect()
    }

    /// Exact title match first, then unique substring match.
    pub fn section(&self, query: &str) -> Option<(String, String)> {
        let query = query.trim().to_ascii_lowercase();
        if let Some(s) = self
            .sections
            .iter()
            .find(|s| s.title.to_ascii_lowercase() == query)
        {
            return Some((s.title.clone(), s.body.clone()));
        }
        let matches: Vec<&Section> = self
            .sections
            .iter()
            .filter(|s| s.title.to_ascii_lowercase().contains(&query))
            .collect();
        match matches.as_slice() {
            [only] => Some((only.title.clone(), only.body.clone())),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_guide_has_sections() {
        let guide = DesignGuide::embedded();
        let titles = guide.section_titles();
        assert!(titles.iter().any(|t| t == "Permission Strategy"));
        assert!(titles.iter().any(|t| t == "Naming Conventions"));
    }

    #[test]
    fn lookup_is_case_insensitive_and_fuzzy() {
        let guide = DesignGuide::embedded();
        let (title, body) = guide.section("permission strategy").expect("exact");
        assert_eq!(title, "Permission Strategy");
        assert!(!body.is_empty());

        let (title, _) = guide.section("onboarding").expect("substring");
        assert_eq!(title, "Onboarding Flow");
    }

    #[test]
    fn ambiguous_substring_returns_none() {
        let guide = DesignGuide::from_markdown("## Channel Counts\na\n## Channel Order\nb\n");
        assert!(guide.section("channel").is_none());
        assert!(guide.section("channel counts").is_some());
    }
}
