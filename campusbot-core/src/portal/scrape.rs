//! HTML scraping for portal pages
//!
//! The academic summary page renders its course grid client-side; the rows
//! only exist as a literal inside a `<script>` tag. Extraction is a ladder of
//! [`ScrapeStrategy`] values tried in order per script, each a pure function
//! from script text to courses. Rows keep their batch and semester when the
//! page includes them.

use crate::config::ScrapeConfig;
use crate::error::{Error, Result};
use crate::types::{CourseGrade, NO_GRADE};
use regex::Regex;

use super::records::{
    term_courses_from_rows, TermCourse, BATCH_KEYS, COURSE_CODE_KEYS, COURSE_TITLE_KEYS,
    LETTER_GRADE_KEYS, SEMESTER_KEYS,
};

/// One way of pulling course rows out of script text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrapeStrategy {
    /// Parse the array assigned to `dataSource` as JSON
    DataSourceJson,
    /// Regex over `{...}` literals mentioning a course title
    LooseObjects,
}

impl ScrapeStrategy {
    /// Ladder order
    pub const ALL: [ScrapeStrategy; 2] = [ScrapeStrategy::DataSourceJson, ScrapeStrategy::LooseObjects];

    pub fn as_str(&self) -> &'static str {
        match self {
            ScrapeStrategy::DataSourceJson => "data_source_json",
            ScrapeStrategy::LooseObjects => "loose_objects",
        }
    }
}

/// Compiled scraping patterns.
#[derive(Debug, Clone)]
pub struct Scraper {
    token_field: String,
    script_markers: Vec<String>,
    data_source: Regex,
    script_tag: Regex,
    input_tag: Regex,
    loose_object: Regex,
    code_fields: Vec<Regex>,
    title_fields: Vec<Regex>,
    grade_fields: Vec<Regex>,
    batch_fields: Vec<Regex>,
    semester_fields: Vec<Regex>,
}

/// `Key: "value"` / `"Key" = 'value'` matcher for one key.
fn field_regex(key: &str) -> Result<Regex> {
    let pattern = format!(r#"\b{}["']?\s*[:=]\s*["']([^"']*)["']"#, regex::escape(key));
    compile(&pattern)
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| Error::Config(format!("invalid scrape pattern {pattern:?}: {e}")))
}

fn field_regexes(keys: &[&str]) -> Result<Vec<Regex>> {
    keys.iter().map(|key| field_regex(key)).collect()
}

/// Like [`field_regex`] but the digits may be unquoted.
fn number_field_regexes(keys: &[&str]) -> Result<Vec<Regex>> {
    keys.iter()
        .map(|key| compile(&format!(r#"\b{}["']?\s*[:=]\s*["']?(\d+)"#, regex::escape(key))))
        .collect()
}

impl Scraper {
    pub fn new(config: &ScrapeConfig) -> Result<Self> {
        let title_alternation = COURSE_TITLE_KEYS
            .iter()
            .map(|k| regex::escape(k))
            .collect::<Vec<_>>()
            .join("|");

        Ok(Self {
            token_field: config.token_field.clone(),
            script_markers: config.script_markers.clone(),
            data_source: compile(&config.data_source_pattern)?,
            script_tag: compile(r"(?is)<script\b[^>]*>(.*?)</script>")?,
            input_tag: compile(r"(?is)<input\b[^>]*>")?,
            loose_object: compile(&format!(r"\{{[^{{}}]*(?:{title_alternation})[^{{}}]*\}}"))?,
            code_fields: field_regexes(COURSE_CODE_KEYS)?,
            title_fields: field_regexes(COURSE_TITLE_KEYS)?,
            grade_fields: field_regexes(LETTER_GRADE_KEYS)?,
            batch_fields: number_field_regexes(BATCH_KEYS)?,
            semester_fields: field_regexes(SEMESTER_KEYS)?,
        })
    }

    /// Name of the anti-forgery form field
    pub fn token_field(&self) -> &str {
        &self.token_field
    }

    /// Value of the hidden anti-forgery input on a form page.
    pub fn form_token(&self, html: &str) -> Option<String> {
        self.input_tag
            .find_iter(html)
            .map(|m| m.as_str())
            .filter(|tag| attribute(tag, "name").as_deref() == Some(self.token_field.as_str()))
            .find_map(|tag| attribute(tag, "value"))
            .filter(|token| !token.is_empty())
    }

    /// Bodies of `<script>` tags that contain one of the configured markers.
    pub fn candidate_scripts<'a>(&self, html: &'a str) -> Vec<&'a str> {
        self.script_tag
            .captures_iter(html)
            .filter_map(|caps| caps.get(1))
            .map(|m| m.as_str())
            .filter(|body| self.script_markers.iter().any(|marker| body.contains(marker.as_str())))
            .collect()
    }

    /// Run the strategy ladder over every candidate script and collect the
    /// courses. Empty when nothing on the page is recognizable.
    pub fn scrape_courses(&self, html: &str) -> Vec<TermCourse> {
        let mut courses = Vec::new();
        for script in self.candidate_scripts(html) {
            for strategy in ScrapeStrategy::ALL {
                let found = self.apply(strategy, script);
                if !found.is_empty() {
                    tracing::debug!(
                        strategy = strategy.as_str(),
                        count = found.len(),
                        "Scraped courses from script"
                    );
                    courses.extend(found);
                    break;
                }
            }
        }
        courses
    }

    pub fn apply(&self, strategy: ScrapeStrategy, script: &str) -> Vec<TermCourse> {
        match strategy {
            ScrapeStrategy::DataSourceJson => self.data_source_json(script),
            ScrapeStrategy::LooseObjects => self.loose_objects(script),
        }
    }

    fn data_source_json(&self, script: &str) -> Vec<TermCourse> {
        let Some(literal) = self.data_source_literal(script) else {
            return Vec::new();
        };
        match serde_json::from_str::<Vec<serde_json::Value>>(literal) {
            Ok(rows) => term_courses_from_rows(&rows),
            Err(e) => {
                tracing::debug!(error = %e, "dataSource literal is not valid JSON");
                Vec::new()
            }
        }
    }

    /// The balanced `[...]` literal that follows the `dataSource` locator.
    fn data_source_literal<'a>(&self, script: &'a str) -> Option<&'a str> {
        self.data_source
            .find_iter(script)
            .find_map(|m| balanced_array(&script[m.end()..]))
    }

    fn loose_objects(&self, script: &str) -> Vec<TermCourse> {
        self.loose_object
            .find_iter(script)
            .filter_map(|m| {
                let object = m.as_str();
                let title = first_capture(&self.title_fields, object)?;
                Some(TermCourse {
                    batch_year: first_capture(&self.batch_fields, object)
                        .and_then(|year| year.parse().ok()),
                    semester: first_capture(&self.semester_fields, object),
                    course: CourseGrade {
                        code: first_capture(&self.code_fields, object).unwrap_or_default(),
                        title,
                        letter_grade: first_capture(&self.grade_fields, object)
                            .unwrap_or_else(|| NO_GRADE.to_string()),
                    },
                })
            })
            .collect()
    }
}

/// First non-empty capture across the regexes, in order.
fn first_capture(fields: &[Regex], text: &str) -> Option<String> {
    fields.iter().find_map(|re| {
        re.captures(text)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|s| !s.is_empty())
    })
}

/// Attribute value from a single tag, quoted with either quote style.
fn attribute(tag: &str, name: &str) -> Option<String> {
    let lower = tag.to_ascii_lowercase();
    let needle = name.to_ascii_lowercase();
    let mut search_from = 0;
    while let Some(pos) = lower[search_from..].find(&needle) {
        let start = search_from + pos;
        search_from = start + needle.len();
        let preceded_ok = lower[..start]
            .chars()
            .next_back()
            .map_or(true, |c| c.is_whitespace());
        let rest = tag[search_from..].trim_start();
        if !preceded_ok || !rest.starts_with('=') {
            continue;
        }
        let rest = rest[1..].trim_start();
        let quote = rest.chars().next()?;
        if quote == '"' || quote == '\'' {
            let body = &rest[1..];
            return body.find(quote).map(|end| body[..end].to_string());
        }
        let end = rest
            .find(|c: char| c.is_whitespace() || c == '>' || c == '/')
            .unwrap_or(rest.len());
        return Some(rest[..end].to_string());
    }
    None
}

/// The `[...]` literal at the start of `text` (after whitespace), tracking
/// nesting and skipping brackets inside string literals.
fn balanced_array(text: &str) -> Option<&str> {
    let offset = text.len() - text.trim_start().len();
    let body = &text[offset..];
    if !body.starts_with('[') {
        return None;
    }

    let mut depth = 0usize;
    let mut in_string: Option<char> = None;
    let mut escaped = false;
    for (i, c) in body.char_indices() {
        if let Some(quote) = in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == quote {
                in_string = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => in_string = Some(c),
            '[' | '{' => depth += 1,
            ']' | '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(&body[..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scraper() -> Scraper {
        Scraper::new(&ScrapeConfig::default()).unwrap()
    }

    #[test]
    fn test_form_token_any_attribute_order() {
        let html = r#"
            <form method="post">
              <input type="text" name="Username" value="" />
              <input value="CfDJ8-token_value" type="hidden" name="__RequestVerificationToken">
            </form>"#;
        assert_eq!(scraper().form_token(html).as_deref(), Some("CfDJ8-token_value"));
    }

    #[test]
    fn test_form_token_missing_or_empty() {
        let s = scraper();
        assert_eq!(s.form_token("<form><input name='Username'></form>"), None);
        assert_eq!(
            s.form_token(r#"<input name="__RequestVerificationToken" value="">"#),
            None
        );
    }

    #[test]
    fn test_data_source_json_with_nested_brackets() {
        let script = r#"
            DevExpress.ui.dxDataGrid({
                "caption": "Detail Registration",
                "dataSource": [
                    {"CourseCode": "CoSc2051", "CourseTitle": "Object Oriented Programming [Java]", "Letter": "A"},
                    {"Code": "Math1041", "CourseName": "Applied Mathematics I", "Grade": "B+"}
                ],
                "columns": ["CourseCode"]
            });"#;
        let courses = scraper().apply(ScrapeStrategy::DataSourceJson, script);
        assert_eq!(courses.len(), 2);
        assert_eq!(courses[0].course.title, "Object Oriented Programming [Java]");
        assert_eq!(courses[1].course.code, "Math1041");
        assert_eq!(courses[1].course.letter_grade, "B+");
    }

    #[test]
    fn test_loose_objects_when_not_json() {
        // single quotes and bare keys break JSON parsing
        let script = r#"
            var grid = { dataSource: [
                { CourseCode: 'Eng1011', CourseTitle: 'Communicative English', Letter: 'A-' },
                { CourseTitle: 'Civics', StudentGrade: 'B' }
            ] };"#;
        let s = scraper();
        assert!(s.apply(ScrapeStrategy::DataSourceJson, script).is_empty());

        let courses = s.apply(ScrapeStrategy::LooseObjects, script);
        assert_eq!(courses.len(), 2);
        assert_eq!(courses[0].course.code, "Eng1011");
        assert_eq!(courses[0].course.letter_grade, "A-");
        assert_eq!(courses[1].course.code, "");
        assert_eq!(courses[1].course.letter_grade, "B");
    }

    #[test]
    fn test_rows_keep_their_term() {
        let s = scraper();
        let json_script = r#"grid({"dataSource": [
            {"Batch": 2, "Semester": "I", "CourseCode": "CoSc2051", "CourseTitle": "OOP", "LetterGrade": "A"},
            {"CourseCode": "Eng1011", "CourseTitle": "Communicative English", "LetterGrade": "B"}
        ]});"#;
        let courses = s.apply(ScrapeStrategy::DataSourceJson, json_script);
        assert_eq!(courses[0].batch_year, Some(2));
        assert_eq!(courses[0].semester.as_deref(), Some("I"));
        assert!(!courses[1].is_tagged());

        let loose_script = r#"var grid = { dataSource: [
            { AcademicYear: 3, Semester: 'II', CourseCode: 'CoSc3025', CourseTitle: 'Operating Systems' }
        ] };"#;
        let courses = s.apply(ScrapeStrategy::LooseObjects, loose_script);
        assert_eq!(courses.len(), 1);
        assert_eq!(courses[0].batch_year, Some(3));
        assert_eq!(courses[0].semester.as_deref(), Some("II"));
        assert_eq!(courses[0].course.letter_grade, "-");
    }

    #[test]
    fn test_scrape_courses_ignores_unmarked_scripts() {
        let html = r##"
            <html><body>
            <script>var dataSrc = [{"CourseTitle": "Decoy"}];</script>
            <script type="text/javascript">
              $("#grid").dxDataGrid({"dataSource":[{"CourseCode":"CoSc3025","CourseTitle":"Operating Systems","LetterGrade":"A"}]});
            </script>
            </body></html>"##;
        let courses = scraper().scrape_courses(html);
        assert_eq!(courses.len(), 1);
        assert_eq!(courses[0].course.code, "CoSc3025");
    }

    #[test]
    fn test_scrape_courses_nothing_found() {
        assert!(scraper().scrape_courses("<html><p>Login</p></html>").is_empty());
    }

    #[test]
    fn test_balanced_array() {
        assert_eq!(balanced_array("  [1, [2], \"]\"] tail"), Some("[1, [2], \"]\"]"));
        assert_eq!(balanced_array("[1, 2"), None);
        assert_eq!(balanced_array("{}"), None);
    }
}
