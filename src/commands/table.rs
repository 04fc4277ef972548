//! Static voice command table
//!
//! Phrases are matched by substring containment against the normalized
//! transcript. Every matching entry fires, in table order, so overlapping
//! phrases are not deduplicated.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A named page of the portfolio site
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Destination {
    Home,
    About,
    Skills,
    Projects,
    Resume,
    Contact,
    Blog,
    AiChat,
    ResumeAnalyzer,
    Analytics,
}

impl Destination {
    /// Route path the front end navigates to
    pub fn path(&self) -> &'static str {
        match self {
            Destination::Home => "/",
            Destination::About => "/about",
            Destination::Skills => "/skills",
            Destination::Projects => "/projects",
            Destination::Resume => "/resume",
            Destination::Contact => "/contact",
            Destination::Blog => "/blog",
            Destination::AiChat => "/ai-chat",
            Destination::ResumeAnalyzer => "/resume-analyzer",
            Destination::Analytics => "/analytics",
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Destination::Home => "home",
            Destination::About => "about",
            Destination::Skills => "skills",
            Destination::Projects => "projects",
            Destination::Resume => "resume",
            Destination::Contact => "contact",
            Destination::Blog => "blog",
            Destination::AiChat => "ai-chat",
            Destination::ResumeAnalyzer => "resume-analyzer",
            Destination::Analytics => "analytics",
        };
        f.write_str(name)
    }
}

/// Where a scroll command moves the viewport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrollTarget {
    Top,
    Bottom,
}

impl fmt::Display for ScrollTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScrollTarget::Top => f.write_str("top"),
            ScrollTarget::Bottom => f.write_str("bottom"),
        }
    }
}

/// What a matched phrase does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "target", rename_all = "snake_case")]
pub enum Action {
    Navigate(Destination),
    Scroll(ScrollTarget),
    StopListening,
    Help,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Navigate(dest) => write!(f, "navigate({})", dest),
            Action::Scroll(target) => write!(f, "scroll({})", target),
            Action::StopListening => write!(f, "stop"),
            Action::Help => write!(f, "help"),
        }
    }
}

/// One row of the command table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandEntry {
    /// Trigger phrase, lowercase, no punctuation
    pub phrase: String,
    pub action: Action,
    /// Human-readable line used in the help listing
    pub description: String,
}

/// Ordered phrase -> action table
#[derive(Debug, Clone)]
pub struct CommandTable {
    entries: Vec<CommandEntry>,
}

const BUILTIN: &[(&str, Action, &str)] = &[
    ("go home", Action::Navigate(Destination::Home), "Navigate to home page"),
    ("go to about", Action::Navigate(Destination::About), "Navigate to about page"),
    ("go to skills", Action::Navigate(Destination::Skills), "Navigate to skills page"),
    ("go to projects", Action::Navigate(Destination::Projects), "Navigate to projects page"),
    ("go to resume", Action::Navigate(Destination::Resume), "Navigate to resume page"),
    ("go to contact", Action::Navigate(Destination::Contact), "Navigate to contact page"),
    ("go to blog", Action::Navigate(Destination::Blog), "Navigate to blog page"),
    ("open ai chat", Action::Navigate(Destination::AiChat), "Open AI chatbot"),
    ("analyze resume", Action::Navigate(Destination::ResumeAnalyzer), "Open resume analyzer"),
    ("show analytics", Action::Navigate(Destination::Analytics), "Open analytics dashboard"),
    ("scroll up", Action::Scroll(ScrollTarget::Top), "Scroll to top"),
    ("scroll down", Action::Scroll(ScrollTarget::Bottom), "Scroll to bottom"),
    ("stop listening", Action::StopListening, "Stop voice recognition"),
    ("help", Action::Help, "Show this help message"),
];

impl CommandTable {
    /// The fixed table shipped with the site
    pub fn builtin() -> Self {
        Self::from_entries(BUILTIN.iter().map(|(phrase, action, description)| CommandEntry {
            phrase: (*phrase).to_string(),
            action: *action,
            description: (*description).to_string(),
        }))
    }

    /// Build a table from entries, keeping their order
    pub fn from_entries(entries: impl IntoIterator<Item = CommandEntry>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    pub fn entries(&self) -> &[CommandEntry] {
        &self.entries
    }

    /// All entries whose phrase occurs in `normalized`, in table order
    pub fn matches<'a>(&'a self, normalized: &'a str) -> impl Iterator<Item = &'a CommandEntry> + 'a {
        self.entries
            .iter()
            .filter(move |entry| normalized.contains(entry.phrase.as_str()))
    }

    /// Static help listing of every supported phrase
    pub fn help_text(&self) -> String {
        let mut text = String::from("Available voice commands:");
        for entry in &self.entries {
            text.push_str("\n- \"");
            text.push_str(&capitalize(&entry.phrase));
            text.push_str("\" - ");
            text.push_str(&entry.description);
        }
        text
    }
}

impl Default for CommandTable {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Lowercase and trim a raw transcript before matching
pub fn normalize(text: &str) -> String {
    text.to_lowercase().trim().to_string()
}

fn capitalize(phrase: &str) -> String {
    let mut chars = phrase.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
