//! Reply text for the chat and the CLI.

use chrono::{DateTime, Utc};

use crate::error::{ErrorKind, PortalError};
use crate::portal::GradeFlowOutcome;
use crate::types::{CourseGrade, DetailLevel, ExtractionParams, NormalizedGrade, RegistrationEvent, NOT_AVAILABLE};

const SEPARATOR: &str = "\n\n---\n\n";

pub const NO_GRADE_RECORDS: &str = "I successfully accessed the portal, but I couldn't find any grade records for the specified year/semester.";

pub const LOGIN_SUCCEEDED: &str =
    "Login successful! I've saved your session securely. You can now ask for your grades or other portal info.";

pub const CONNECT_INSTRUCTIONS: &str = "I need access to your student portal to fetch your grades and course information.\n\n\
How to connect:\n\
1. Send `login <portal username> <portal password>` in this chat, or\n\
2. Run `campusbot portal connect <portal username>`\n\n\
Once connected, I can help with grades, courses and other academic information.";

pub const RECONNECT_INSTRUCTIONS: &str = "I'm having trouble accessing your grades from the portal. This usually means your saved session has expired or your portal password has changed.\n\n\
To reconnect:\n\
1. Run `campusbot portal disconnect`\n\
2. Connect again with `login <portal username> <portal password>` or `campusbot portal connect <portal username>`";

pub const ASSISTANT_UNAVAILABLE: &str =
    "I couldn't generate an answer right now. Please try again later.";

/// Render grade records as a single reply.
///
/// With a course filter only the matching course lines are shown, from any
/// term. Otherwise each term gets its GPA summary, plus a course breakdown
/// when detail was requested. Never returns an empty string.
pub fn format_grades(grades: &[NormalizedGrade], params: &ExtractionParams) -> String {
    match params.course_filter.as_deref() {
        Some(filter) => format_course_matches(grades, filter),
        None if grades.is_empty() => NO_GRADE_RECORDS.to_string(),
        None => {
            let parts: Vec<String> = grades
                .iter()
                .map(|grade| format_term(grade, params.detail_level))
                .collect();
            format!("Here are your results:\n\n{}", parts.join(SEPARATOR))
        }
    }
}

fn term_header(grade: &NormalizedGrade) -> String {
    format!(
        "Year {}, Semester {}",
        grade
            .batch_year
            .map(|y| y.to_string())
            .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
        grade.semester.as_deref().unwrap_or(NOT_AVAILABLE)
    )
}

fn course_line(course: &CourseGrade) -> String {
    let title = if course.title.is_empty() {
        "Unknown Course"
    } else {
        course.title.as_str()
    };
    format!("{} ({}): {}", title, course.code, course.letter_grade)
}

fn format_term(grade: &NormalizedGrade, detail_level: DetailLevel) -> String {
    let mut text = format!(
        "{}\n• GPA: {}\n• CGPA: {}\n• Status: {}",
        term_header(grade),
        grade.semester_gpa,
        grade.cgpa,
        grade.status
    );

    if detail_level == DetailLevel::Detailed {
        if grade.courses.is_empty() {
            text.push_str("\n\n(No detailed course information available for this semester)");
        } else {
            text.push_str("\n\nCourse Breakdown:\n");
            let lines: Vec<String> = grade
                .courses
                .iter()
                .map(|c| format!("• {}", course_line(c)))
                .collect();
            text.push_str(&lines.join("\n"));
        }
    }
    text
}

fn format_course_matches(grades: &[NormalizedGrade], filter: &str) -> String {
    let needle = filter.to_lowercase();
    let parts: Vec<String> = grades
        .iter()
        .filter_map(|grade| {
            let lines: Vec<String> = grade
                .courses
                .iter()
                .filter(|c| {
                    c.title.to_lowercase().contains(&needle) || c.code.to_lowercase().contains(&needle)
                })
                .map(course_line)
                .collect();
            (!lines.is_empty()).then(|| format!("{}\n{}", term_header(grade), lines.join("\n")))
        })
        .collect();

    if parts.is_empty() {
        format!(
            "I couldn't find any course matching \"{}\" in your records.",
            filter
        )
    } else {
        parts.join(SEPARATOR)
    }
}

/// Reply for any way a grade request can end.
pub fn format_grade_outcome(outcome: &GradeFlowOutcome, params: &ExtractionParams) -> String {
    match outcome {
        GradeFlowOutcome::Grades { grades, .. } => format_grades(grades, params),
        GradeFlowOutcome::NotConnected => CONNECT_INSTRUCTIONS.to_string(),
        GradeFlowOutcome::ReconnectRequired { .. } => RECONNECT_INSTRUCTIONS.to_string(),
        GradeFlowOutcome::NoMatchingTerm { year, semester } => no_matching_term(*year, *semester),
    }
}

pub fn no_matching_term(year: Option<i64>, semester: Option<u8>) -> String {
    let err = PortalError::NoMatchingTerm { year, semester };
    let mut message = err.to_string();
    if let Some(first) = message.get(0..1) {
        message.replace_range(0..1, &first.to_uppercase());
    }
    format!("{}. Try asking without a year or semester to see your latest results.", message)
}

/// Login failure in plain words, without upstream detail.
pub fn login_failed(error: &PortalError) -> String {
    let reason = match error {
        PortalError::InvalidCredentials => "the portal rejected that username or password",
        PortalError::TokenNotFound => "the portal login page could not be read",
        _ => match error.kind() {
            ErrorKind::UpstreamUnavailable => "the portal is not responding right now",
            _ => "the portal returned an unexpected response",
        },
    };
    format!("Login failed: {}.", reason)
}

pub fn format_event_date(ts: DateTime<Utc>) -> String {
    ts.format("%b %-d, %Y %H:%M UTC").to_string()
}

pub fn format_registration_event(event: &RegistrationEvent) -> String {
    format!(
        "{} — Registration runs from {} to {}. Location: {}. {}",
        event.title,
        format_event_date(event.start_at),
        format_event_date(event.end_at),
        event.location.as_deref().unwrap_or("not specified"),
        event.description.as_deref().unwrap_or_default()
    )
    .trim()
    .to_string()
}

/// Format a timestamp as relative time (e.g., "2m ago").
pub fn format_relative_time(ts: DateTime<Utc>) -> String {
    let duration = Utc::now().signed_duration_since(ts);

    if duration.num_seconds() < 0 {
        "just now".to_string()
    } else if duration.num_seconds() < 60 {
        format!("{}s ago", duration.num_seconds())
    } else if duration.num_minutes() < 60 {
        format!("{}m ago", duration.num_minutes())
    } else if duration.num_hours() < 24 {
        format!("{}h ago", duration.num_hours())
    } else if duration.num_days() < 7 {
        format!("{}d ago", duration.num_days())
    } else {
        ts.format("%b %d").to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn course(code: &str, title: &str, grade: &str) -> CourseGrade {
        CourseGrade {
            code: code.to_string(),
            title: title.to_string(),
            letter_grade: grade.to_string(),
        }
    }

    fn term(year: i64, semester: &str, courses: Vec<CourseGrade>) -> NormalizedGrade {
        NormalizedGrade {
            cgpa: "3.40".to_string(),
            semester_gpa: "3.55".to_string(),
            status: "Promoted".to_string(),
            batch_year: Some(year),
            semester: Some(semester.to_string()),
            courses,
            raw: serde_json::Value::Null,
        }
    }

    fn history() -> Vec<NormalizedGrade> {
        vec![
            term(3, "I", vec![course("CoSc3025", "Operating Systems", "A")]),
            term(
                2,
                "I",
                vec![
                    course("CoSc2051", "Object Oriented Programming", "A-"),
                    course("Math2041", "Linear Algebra", "B"),
                ],
            ),
            term(1, "I", vec![course("Eng1011", "Communicative English", "B+")]),
        ]
    }

    #[test]
    fn test_course_filter_shows_only_matches() {
        let params = ExtractionParams {
            course_filter: Some("object oriented programming".to_string()),
            ..Default::default()
        }
        .normalized();
        let reply = format_grades(&history(), &params);
        assert_eq!(
            reply,
            "Year 2, Semester I\nObject Oriented Programming (CoSc2051): A-"
        );
        assert!(!reply.contains("Linear Algebra"));
        assert!(!reply.contains("GPA"));
    }

    #[test]
    fn test_course_filter_matches_code_across_terms() {
        let params = ExtractionParams {
            course_filter: Some("cosc".to_string()),
            ..Default::default()
        };
        let reply = format_grades(&history(), &params);
        assert_eq!(reply.matches(SEPARATOR).count(), 1);
        assert!(reply.contains("Operating Systems (CoSc3025): A"));
    }

    #[test]
    fn test_course_filter_no_match_names_filter() {
        let params = ExtractionParams {
            course_filter: Some("Astrophysics".to_string()),
            ..Default::default()
        };
        assert_eq!(
            format_grades(&history(), &params),
            "I couldn't find any course matching \"Astrophysics\" in your records."
        );
        // no records at all still names the course
        assert_eq!(
            format_grades(&[], &params),
            "I couldn't find any course matching \"Astrophysics\" in your records."
        );
    }

    #[test]
    fn test_summary_and_detailed() {
        let grades = vec![history().remove(0), term(2, "II", Vec::new())];
        let summary = format_grades(&grades, &ExtractionParams::default());
        assert!(summary.starts_with("Here are your results:\n\nYear 3, Semester I\n• GPA: 3.55\n• CGPA: 3.40\n• Status: Promoted"));
        assert!(!summary.contains("Course Breakdown"));

        let detailed = format_grades(
            &grades,
            &ExtractionParams {
                detail_level: DetailLevel::Detailed,
                ..Default::default()
            },
        );
        assert!(detailed.contains("Course Breakdown:\n• Operating Systems (CoSc3025): A"));
        assert!(detailed.contains("(No detailed course information available for this semester)"));
    }

    #[test]
    fn test_placeholder_record_and_empty() {
        let reply = format_grades(&[NormalizedGrade::not_available()], &ExtractionParams::default());
        assert!(reply.contains("Year N/A, Semester N/A"));
        assert_eq!(format_grades(&[], &ExtractionParams::default()), NO_GRADE_RECORDS);
    }

    #[test]
    fn test_unknown_course_title() {
        assert_eq!(course_line(&course("X1", "", "-")), "Unknown Course (X1): -");
    }

    #[test]
    fn test_no_matching_term_message() {
        assert!(no_matching_term(Some(3), Some(2)).starts_with("Could not find grades for Year 3, Semester 2."));
    }

    #[test]
    fn test_grade_outcome_replies() {
        let params = ExtractionParams::default();
        assert_eq!(
            format_grade_outcome(&GradeFlowOutcome::NotConnected, &params),
            CONNECT_INSTRUCTIONS
        );
        assert_eq!(
            format_grade_outcome(&GradeFlowOutcome::ReconnectRequired { error: None }, &params),
            RECONNECT_INSTRUCTIONS
        );
        let grades = GradeFlowOutcome::Grades {
            grades: Vec::new(),
            session_refreshed: true,
        };
        assert_eq!(format_grade_outcome(&grades, &params), NO_GRADE_RECORDS);
    }

    #[test]
    fn test_login_failed_is_plain() {
        let status = PortalError::Status {
            status: 500,
            endpoint: "Account/Login".to_string(),
        };
        assert!(!login_failed(&status).contains("Account/Login"));
        assert_eq!(
            login_failed(&PortalError::InvalidCredentials),
            "Login failed: the portal rejected that username or password."
        );
    }

    #[test]
    fn test_registration_event_reply() {
        let event = RegistrationEvent {
            id: 1,
            title: "Second semester registration".to_string(),
            description: None,
            start_at: Utc.with_ymd_and_hms(2025, 2, 3, 8, 0, 0).unwrap(),
            end_at: Utc.with_ymd_and_hms(2025, 2, 7, 17, 30, 0).unwrap(),
            location: Some("Registrar office".to_string()),
        };
        assert_eq!(
            format_registration_event(&event),
            "Second semester registration — Registration runs from Feb 3, 2025 08:00 UTC to Feb 7, 2025 17:30 UTC. Location: Registrar office."
        );
    }
}
