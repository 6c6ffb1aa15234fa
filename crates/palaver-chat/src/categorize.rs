//! Tool and request categorization.
//!
//! Maps tool/provider names or free-text requests to semantic categories,
//! used only to produce human-readable phase labels. Stateless.

use regex::Regex;
use std::sync::LazyLock;

use palaver_core::types::{Phase, ToolCategory, ToolInfo};

// =============================================================================
// Pattern tables (compiled once, reused across calls)
// =============================================================================

/// Known tool/provider name fragments per category, matched case-insensitively
/// as substrings of the normalized name.
static NAME_FRAGMENTS: &[(ToolCategory, &[&str])] = &[
    (
        ToolCategory::Email,
        &["gmail", "outlook_mail", "smtp", "imap", "mail", "sendgrid"],
    ),
    (
        ToolCategory::Web,
        &["web_search", "browser", "serp", "bing", "google_search", "fetch_url", "crawl"],
    ),
    (
        ToolCategory::Docs,
        &["notion", "google_docs", "confluence", "docs", "document", "pages"],
    ),
    (
        ToolCategory::Calendar,
        &["calendar", "gcal", "scheduling", "booking"],
    ),
    (
        ToolCategory::Messaging,
        &["slack", "discord", "teams", "telegram", "whatsapp", "sms"],
    ),
    (
        ToolCategory::Files,
        &["drive", "dropbox", "s3", "box", "file_store", "storage"],
    ),
];

struct TextPatterns {
    email: Vec<Regex>,
    web: Vec<Regex>,
    docs: Vec<Regex>,
    calendar: Vec<Regex>,
    messaging: Vec<Regex>,
    files: Vec<Regex>,
}

static TEXT_PATTERNS: LazyLock<TextPatterns> = LazyLock::new(|| {
    let mk = |pats: &[&str]| -> Vec<Regex> {
        pats.iter()
            .map(|p| Regex::new(p).expect("Invalid category regex"))
            .collect()
    };

    TextPatterns {
        email: mk(&[
            r"(?i)\bemail\b",
            r"(?i)\binbox\b",
            r"(?i)\bsend\s+(?:a\s+)?mail\b",
            r"(?i)\bunread\s+messages?\b",
        ]),
        web: mk(&[
            r"(?i)\bsearch\s+(?:the\s+)?web\b",
            r"(?i)\blook\s+up\b",
            r"(?i)\bgoogle\b",
            r"(?i)\blatest\s+news\b",
            r"(?i)\bonline\b",
        ]),
        docs: mk(&[
            r"(?i)\bdocs?\b",
            r"(?i)\bdocuments?\b",
            r"(?i)\bnotion\b",
            r"(?i)\bwrite-?up\b",
            r"(?i)\bsummar(?:y|ize)\s+(?:the|my|this)\s+\w*\s*(?:doc|file|report)\b",
        ]),
        calendar: mk(&[
            r"(?i)\bcalendar\b",
            r"(?i)\bschedule\b",
            r"(?i)\bmeetings?\b",
            r"(?i)\bappointments?\b",
        ]),
        messaging: mk(&[
            r"(?i)\bslack\b",
            r"(?i)\bdiscord\b",
            r"(?i)\bmessage\s+(?:the\s+)?channel\b",
            r"(?i)\bdm\b",
        ]),
        files: mk(&[
            r"(?i)\bfiles?\b",
            r"(?i)\bfolders?\b",
            r"(?i)\bdrive\b",
            r"(?i)\bupload(?:ed|s)?\b",
        ]),
    }
});

const CATEGORY_ORDER: [ToolCategory; 6] = [
    ToolCategory::Email,
    ToolCategory::Web,
    ToolCategory::Docs,
    ToolCategory::Calendar,
    ToolCategory::Messaging,
    ToolCategory::Files,
];

// =============================================================================
// Categorization
// =============================================================================

/// Categorize a tool by its name and optional provider.
///
/// Returns zero or more categories in a stable order.
pub fn categorize_tool(tool_name: &str, provider: Option<&str>) -> Vec<ToolCategory> {
    let haystack = match provider {
        Some(provider) => format!("{} {}", tool_name, provider).to_lowercase(),
        None => tool_name.to_lowercase(),
    };

    let mut categories = Vec::new();
    for (category, fragments) in NAME_FRAGMENTS {
        if fragments.iter().any(|f| haystack.contains(f)) {
            categories.push(*category);
        }
    }
    categories
}

/// Categorize a free-text request.
pub fn categorize_text(text: &str) -> Vec<ToolCategory> {
    let patterns = &*TEXT_PATTERNS;
    let sets: [(&ToolCategory, &Vec<Regex>); 6] = [
        (&CATEGORY_ORDER[0], &patterns.email),
        (&CATEGORY_ORDER[1], &patterns.web),
        (&CATEGORY_ORDER[2], &patterns.docs),
        (&CATEGORY_ORDER[3], &patterns.calendar),
        (&CATEGORY_ORDER[4], &patterns.messaging),
        (&CATEGORY_ORDER[5], &patterns.files),
    ];

    let mut categories = Vec::new();
    for (category, regexes) in sets {
        if regexes.iter().any(|re| re.is_match(text)) {
            categories.push(*category);
        }
    }
    categories
}

/// Human-readable label for a phase, specialized by the tool's category.
pub fn phase_label(phase: Phase, tool: Option<&ToolInfo>) -> String {
    match phase {
        Phase::Thinking => "Thinking".to_string(),
        Phase::AnalyzingTools => "Deciding which tools to use".to_string(),
        Phase::ExecutingTool => match tool {
            Some(tool) => {
                let categories = categorize_tool(&tool.tool_name, tool.provider.as_deref());
                match categories.first() {
                    Some(ToolCategory::Email) => "Working with email".to_string(),
                    Some(ToolCategory::Web) => "Searching the web".to_string(),
                    Some(ToolCategory::Docs) => "Reading your documents".to_string(),
                    Some(ToolCategory::Calendar) => "Checking your calendar".to_string(),
                    Some(ToolCategory::Messaging) => "Reaching your channels".to_string(),
                    Some(ToolCategory::Files) => "Going through your files".to_string(),
                    None => format!("Running {}", tool.tool_name),
                }
            }
            None => "Running a tool".to_string(),
        },
        Phase::ProcessingResults => "Reviewing tool results".to_string(),
        Phase::GeneratingResponse => "Writing a response".to_string(),
        Phase::Completed => "Done".to_string(),
        Phase::Failed => "Stopped".to_string(),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use palaver_core::types::ToolStatus;

    fn tool(name: &str, provider: Option<&str>) -> ToolInfo {
        ToolInfo {
            tool_name: name.to_string(),
            provider: provider.map(|p| p.to_string()),
            status: ToolStatus::Running,
        }
    }

    // ---- Name categorization ----

    #[test]
    fn test_categorize_tool_email() {
        assert_eq!(
            categorize_tool("gmail_send", None),
            vec![ToolCategory::Email]
        );
        assert_eq!(
            categorize_tool("compose", Some("smtp")),
            vec![ToolCategory::Email]
        );
    }

    #[test]
    fn test_categorize_tool_web() {
        assert_eq!(categorize_tool("web_search", None), vec![ToolCategory::Web]);
        assert_eq!(
            categorize_tool("fetch_url", Some("browser")),
            vec![ToolCategory::Web]
        );
    }

    #[test]
    fn test_categorize_tool_case_insensitive() {
        assert_eq!(categorize_tool("Gmail_Send", None), vec![ToolCategory::Email]);
        assert_eq!(
            categorize_tool("NOTION_PAGES", None),
            vec![ToolCategory::Docs]
        );
    }

    #[test]
    fn test_categorize_tool_unknown_is_empty() {
        assert!(categorize_tool("calculator", None).is_empty());
        assert!(categorize_tool("", None).is_empty());
    }

    #[test]
    fn test_categorize_tool_multiple_categories() {
        // A provider can pull in a second category.
        let categories = categorize_tool("google_search", Some("drive"));
        assert!(categories.contains(&ToolCategory::Web));
        assert!(categories.contains(&ToolCategory::Files));
    }

    // ---- Text categorization ----

    #[test]
    fn test_categorize_text_email() {
        assert_eq!(
            categorize_text("check my inbox for the invoice"),
            vec![ToolCategory::Email]
        );
    }

    #[test]
    fn test_categorize_text_web() {
        assert_eq!(
            categorize_text("search the web for rust release notes"),
            vec![ToolCategory::Web]
        );
        assert_eq!(
            categorize_text("can you look up the population of Lisbon"),
            vec![ToolCategory::Web]
        );
    }

    #[test]
    fn test_categorize_text_calendar() {
        assert_eq!(
            categorize_text("what meetings do I have tomorrow"),
            vec![ToolCategory::Calendar]
        );
    }

    #[test]
    fn test_categorize_text_plain_chat_is_empty() {
        assert!(categorize_text("hello, how are you?").is_empty());
        assert!(categorize_text("write me a haiku about autumn").is_empty());
    }

    #[test]
    fn test_categorize_text_multiple() {
        let categories = categorize_text("email the doc to the team");
        assert!(categories.contains(&ToolCategory::Email));
        assert!(categories.contains(&ToolCategory::Docs));
    }

    // ---- Labels ----

    #[test]
    fn test_phase_label_plain_phases() {
        assert_eq!(phase_label(Phase::Thinking, None), "Thinking");
        assert_eq!(
            phase_label(Phase::AnalyzingTools, None),
            "Deciding which tools to use"
        );
        assert_eq!(
            phase_label(Phase::GeneratingResponse, None),
            "Writing a response"
        );
        assert_eq!(phase_label(Phase::Completed, None), "Done");
        assert_eq!(phase_label(Phase::Failed, None), "Stopped");
    }

    #[test]
    fn test_phase_label_tool_specialized() {
        assert_eq!(
            phase_label(Phase::ExecutingTool, Some(&tool("web_search", None))),
            "Searching the web"
        );
        assert_eq!(
            phase_label(Phase::ExecutingTool, Some(&tool("gmail_send", None))),
            "Working with email"
        );
        assert_eq!(
            phase_label(Phase::ExecutingTool, Some(&tool("notion_pages", None))),
            "Reading your documents"
        );
    }

    #[test]
    fn test_phase_label_unknown_tool_names_it() {
        assert_eq!(
            phase_label(Phase::ExecutingTool, Some(&tool("calculator", None))),
            "Running calculator"
        );
    }

    #[test]
    fn test_phase_label_no_tool() {
        assert_eq!(phase_label(Phase::ExecutingTool, None), "Running a tool");
    }
}
