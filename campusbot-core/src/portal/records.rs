//! Mapping portal JSON rows into domain records
//!
//! The portal is inconsistent about key names, so every field is read through
//! an ordered list of candidate keys. The first key holding a non-empty value
//! wins; later keys are never consulted.

use crate::types::{semester_number, CourseGrade, RegistrationRecord, NO_GRADE};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;

pub(crate) const CURRICULUM_CODE_KEYS: &[&str] = &["CurriculumTblCode", "CurriculumCode"];
pub(crate) const STUDENT_CURRICULUM_CODE_KEYS: &[&str] =
    &["StudentCurriculumTblCode", "StudentCurriculumCode"];

pub(crate) const COURSE_CODE_KEYS: &[&str] = &["CourseCode", "Code"];
pub(crate) const COURSE_TITLE_KEYS: &[&str] = &["CourseTitle", "CourseName", "Title"];
pub(crate) const LETTER_GRADE_KEYS: &[&str] = &["LetterGrade", "Letter", "Grade", "StudentGrade"];

pub(crate) const BATCH_KEYS: &[&str] = &["Batch", "AcademicYear", "Year"];
pub(crate) const SEMESTER_KEYS: &[&str] = &["Semester"];
const CGPA_KEYS: &[&str] = &["CGPA", "Cgpa"];
const SGPA_KEYS: &[&str] = &["SGPA", "Sgpa", "GPA"];
const STATUS_KEYS: &[&str] = &["FinalStatus", "RegCondition", "Status"];
const REGISTRATION_CODE_KEYS: &[&str] = &["RegistrationCode", "RegistrationTblCode"];
const REGISTRATION_DATE_KEYS: &[&str] = &["RegistrationDate", "RegisteredDate"];
const EMBEDDED_COURSES_KEYS: &[&str] = &["Courses", "CourseList"];

/// Render a scalar as text. Strings are trimmed; null, empty strings and
/// non-scalars yield `None`.
fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// First non-empty value among `keys`, in order.
pub(crate) fn first_text(row: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| row.get(*key))
        .find_map(scalar_text)
}

fn first_int(row: &Value, keys: &[&str]) -> Option<i64> {
    keys.iter().filter_map(|key| row.get(*key)).find_map(|v| match v {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

/// Read one course row; `None` when the row has neither a code nor a title.
pub fn course_from_value(row: &Value) -> Option<CourseGrade> {
    if !row.is_object() {
        return None;
    }
    let code = first_text(row, COURSE_CODE_KEYS);
    let title = first_text(row, COURSE_TITLE_KEYS);
    if code.is_none() && title.is_none() {
        return None;
    }
    Some(CourseGrade {
        code: code.unwrap_or_default(),
        title: title.unwrap_or_default(),
        letter_grade: first_text(row, LETTER_GRADE_KEYS).unwrap_or_else(|| NO_GRADE.to_string()),
    })
}

/// Read every recognizable course row, skipping the rest.
pub fn courses_from_rows(rows: &[Value]) -> Vec<CourseGrade> {
    rows.iter().filter_map(course_from_value).collect()
}

/// A course row from a page that lists several terms at once, with the term
/// it belongs to when the row carries one.
#[derive(Debug, Clone, PartialEq)]
pub struct TermCourse {
    pub batch_year: Option<i64>,
    pub semester: Option<String>,
    pub course: CourseGrade,
}

impl TermCourse {
    pub fn is_tagged(&self) -> bool {
        self.batch_year.is_some() || self.semester.is_some()
    }

    /// Whether a tagged row belongs to `record`. Semesters compare by number
    /// so "II" and "2" agree.
    pub fn belongs_to(&self, record: &RegistrationRecord) -> bool {
        let year_matches = self
            .batch_year
            .map_or(true, |year| record.batch_year == Some(year));
        let semester_matches = self.semester.as_deref().map_or(true, |semester| {
            match (semester_number(semester), record.semester.as_deref()) {
                (Some(n), Some(other)) => semester_number(other) == Some(n),
                (None, Some(other)) => other.eq_ignore_ascii_case(semester),
                (_, None) => false,
            }
        });
        self.is_tagged() && year_matches && semester_matches
    }
}

pub fn term_course_from_value(row: &Value) -> Option<TermCourse> {
    Some(TermCourse {
        batch_year: first_int(row, BATCH_KEYS),
        semester: first_text(row, SEMESTER_KEYS),
        course: course_from_value(row)?,
    })
}

pub fn term_courses_from_rows(rows: &[Value]) -> Vec<TermCourse> {
    rows.iter().filter_map(term_course_from_value).collect()
}

/// Read one registration row.
pub fn registration_from_value(row: &Value) -> RegistrationRecord {
    let courses = EMBEDDED_COURSES_KEYS
        .iter()
        .filter_map(|key| row.get(*key))
        .find_map(Value::as_array)
        .map(|rows| courses_from_rows(rows))
        .unwrap_or_default();

    RegistrationRecord {
        batch_year: first_int(row, BATCH_KEYS),
        semester: first_text(row, SEMESTER_KEYS),
        cgpa: first_text(row, CGPA_KEYS),
        semester_gpa: first_text(row, SGPA_KEYS),
        status: first_text(row, STATUS_KEYS),
        registration_code: first_text(row, REGISTRATION_CODE_KEYS),
        registered_at: first_text(row, REGISTRATION_DATE_KEYS)
            .as_deref()
            .and_then(parse_portal_date),
        courses,
        raw: row.clone(),
    }
}

/// Parse the date shapes the portal emits: ASP.NET `/Date(ms)/`, RFC 3339,
/// ISO without zone, plain dates and US-style `M/D/YYYY`.
pub fn parse_portal_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();

    if let Some(inner) = raw
        .strip_prefix("/Date(")
        .and_then(|s| s.strip_suffix(")/"))
    {
        // Offset suffixes like "+0300" are ignored; the millis are UTC already
        let millis_end = inner
            .char_indices()
            .skip(1)
            .find(|(_, c)| *c == '+' || *c == '-')
            .map(|(i, _)| i)
            .unwrap_or(inner.len());
        let millis: i64 = inner[..millis_end].parse().ok()?;
        return Utc.timestamp_millis_opt(millis).single();
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    for fmt in [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S",
        "%m/%d/%Y %I:%M:%S %p",
        "%m/%d/%Y %H:%M:%S",
    ] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }

    for fmt in ["%Y-%m-%d", "%m/%d/%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(raw, fmt) {
            return date
                .and_hms_opt(0, 0, 0)
                .map(|naive| Utc.from_utc_datetime(&naive));
        }
    }

    None
}

/// Sort newest registration first. Stable: equal dates keep source order.
/// Rows without a parseable date sort after all dated rows.
pub fn sort_latest_first(records: &mut [RegistrationRecord]) {
    records.sort_by(|a, b| match (a.registered_at, b.registered_at) {
        (Some(a), Some(b)) => b.cmp(&a),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });
}

/// The `data` array of a portal JSON envelope (`{"data": [...]}`), or the
/// payload itself when it is already an array.
pub fn data_rows(payload: &Value) -> Option<&Vec<Value>> {
    payload
        .get("data")
        .and_then(Value::as_array)
        .or_else(|| payload.as_array())
}
