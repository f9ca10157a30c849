// src/source/categorize.rs
use crate::config::CategoryRule;

pub const OTHER_CATEGORY: &str = "other";

/// Maps free text (title, tag, keyword) to a category label.
pub trait Categorizer: Send + Sync {
    fn categorize(&self, text: &str) -> String;
}

/// First rule with a keyword contained in the text wins; otherwise `other`.
#[derive(Debug, Clone)]
pub struct KeywordCategorizer {
    rules: Vec<CategoryRule>,
}

impl KeywordCategorizer {
    pub fn new(rules: Vec<CategoryRule>) -> Self {
        let rules = rules
            .into_iter()
            .map(|r| CategoryRule {
                name: r.name,
                keywords: r
                    .keywords
                    .into_iter()
                    .map(|k| k.trim().to_lowercase())
                    .filter(|k| !k.is_empty())
                    .collect(),
            })
            .collect();
        Self { rules }
    }
}

impl Categorizer for KeywordCategorizer {
    fn categorize(&self, text: &str) -> String {
        let t = text.to_lowercase();
        self.rules
            .iter()
            .find(|r| r.keywords.iter().any(|k| t.contains(k.as_str())))
            .map(|r| r.name.clone())
            .unwrap_or_else(|| OTHER_CATEGORY.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;

    #[test]
    fn first_matching_rule_wins() {
        let c = KeywordCategorizer::new(PipelineConfig::default().categories);
        assert_eq!(c.categorize("冬季穿搭分享"), "fashion");
        assert_eq!(c.categorize("护肤心得"), "beauty");
        assert_eq!(c.categorize("Weekend SKINCARE routine"), "beauty");
        assert_eq!(c.categorize("旅行攻略"), "travel");
        assert_eq!(c.categorize("random words"), OTHER_CATEGORY);
    }
}
