//! Site discovery: sitemap location and resolution, plus the
//! politeness pacing every remote fetch goes through.
mod ratelimit;
mod sitemap;

pub use ratelimit::RateLimiter;
pub use sitemap::SitemapCrawler;

/// A discovered URL not yet classified as recipe or non-recipe.
///
/// Identity is the URL alone; `priority` is advisory ordering hint and
/// never participates in equality or hashing. Candidates are rebuilt on
/// every discovery pass — only their URLs survive into durable state.
#[derive(Debug, Clone, Eq)]
pub struct Candidate {
    pub url: String,
    pub priority: i32,
}

impl Candidate {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            priority: 0,
        }
    }
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.url == other.url
    }
}

impl std::hash::Hash for Candidate {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.url.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_candidate_identity_ignores_priority() {
        let a = Candidate {
            url: "https://a.example/soup".to_string(),
            priority: 0,
        };
        let b = Candidate {
            url: "https://a.example/soup".to_string(),
            priority: 9,
        };
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(!set.insert(b)); // same URL dedupes
    }
}
