//! Tag vocabulary: the three categories and their permitted tags.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A taxonomy category. The set is fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Category {
    Format,
    Theme,
    Track,
}

impl Category {
    /// All categories in presentation order.
    pub const ALL: [Category; 3] = [Category::Format, Category::Theme, Category::Track];

    /// JSON key used in taxonomy files and tag payloads.
    pub fn key(&self) -> &'static str {
        match self {
            Self::Format => "Format",
            Self::Theme => "Theme",
            Self::Track => "Track",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Permitted tags per category. Order is presentation only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Taxonomy {
    #[serde(rename = "Format")]
    pub format: Vec<String>,
    #[serde(rename = "Theme")]
    pub theme: Vec<String>,
    #[serde(rename = "Track")]
    pub track: Vec<String>,
}

impl Taxonomy {
    pub fn tags(&self, category: Category) -> &[String] {
        match category {
            Category::Format => &self.format,
            Category::Theme => &self.theme,
            Category::Track => &self.track,
        }
    }

    pub fn contains(&self, category: Category, tag: &str) -> bool {
        self.tags(category).iter().any(|t| t == tag)
    }

    /// Categories that have no permitted tags at all.
    pub fn empty_categories(&self) -> Vec<Category> {
        Category::ALL
            .into_iter()
            .filter(|c| self.tags(*c).is_empty())
            .collect()
    }

    /// Enumeration of every category and its members, as shown to the model.
    pub fn prompt_listing(&self) -> String {
        let mut out = String::new();
        for category in Category::ALL {
            out.push_str(&format!("\n{category}:\n"));
            for tag in self.tags(category) {
                out.push_str(&format!("- {tag}\n"));
            }
        }
        out
    }
}

impl Default for Taxonomy {
    /// Built-in taxonomy for a narrative history podcast.
    fn default() -> Self {
        fn owned(tags: &[&str]) -> Vec<String> {
            tags.iter().map(|t| (*t).to_string()).collect()
        }

        Self {
            format: owned(&["Series Episodes", "Standalone Episodes", "RIHC Series"]),
            theme: owned(&[
                "Ancient & Classical Civilizations",
                "Medieval & Renaissance Europe",
                "Empire, Colonialism & Exploration",
                "Modern Political History & Leadership",
                "Military History & Battles",
                "Cultural, Social & Intellectual History",
                "Science, Technology & Economic History",
                "Religious, Ideological & Philosophical History",
                "Historical Mysteries, Conspiracies & Scandals",
                "Regional & National Histories",
            ]),
            track: owned(&[
                "Roman Track",
                "Medieval & Renaissance Track",
                "Colonialism & Exploration Track",
                "American History Track",
                "Military & Battles Track",
                "Modern Political History Track",
                "Cultural & Social History Track",
                "Science, Technology & Economic History Track",
                "Religious & Ideological History Track",
                "Historical Mysteries & Conspiracies Track",
                "British History Track",
                "Global Empires Track",
                "World Wars Track",
                "Ancient Civilizations Track",
                "Regional Spotlight: Latin America Track",
                "Regional Spotlight: Asia & the Middle East Track",
                "Regional Spotlight: Europe Track",
                "Regional Spotlight: Africa Track",
                "Historical Figures Track",
                "The RIHC Bonus Track",
                "Archive Editions Track",
                "Contemporary Issues Through History Track",
            ]),
        }
    }
}
