//! Grade discovery and normalization
//!
//! The portal exposes grades only through a chain of internal endpoints, each
//! keyed by an identifier read from the previous one:
//!
//! 1. curriculum info → `curriculum_code`
//! 2. student basic info → `student_curriculum_code`
//! 3. registration history → one row per registered term
//!
//! Course-level grades have no stable endpoint at all. For each selected term
//! the extractor walks a ladder: configured detail endpoints in order, then
//! the by-registration-code endpoint, then the scraped academic summary page,
//! then any courses embedded in the registration row. A term whose ladder
//! comes up empty is still returned, with no courses.
//!
//! The summary page lists courses from many terms on one page. Rows that
//! name their batch and semester go to that term only. Rows that don't go to
//! a single term: the newest selected term with grades, else the newest.

use futures::future::join_all;
use serde_json::Value;
use tokio::sync::OnceCell;

use crate::config::{PortalConfig, PortalEndpoints};
use crate::error::{PortalError, Result};
use crate::types::{
    semester_number, CourseGrade, DetailLevel, ExtractionParams, NormalizedGrade, PortalSession,
    RegistrationRecord, NOT_AVAILABLE,
};

use super::endpoints::{render, TemplateVars};
use super::records::{
    courses_from_rows, first_text, registration_from_value, sort_latest_first,
    term_courses_from_rows, TermCourse, CURRICULUM_CODE_KEYS, STUDENT_CURRICULUM_CODE_KEYS,
};
use super::scrape::Scraper;
use super::{PortalApi, PortalPayload};

type PortalResult<T> = std::result::Result<T, PortalError>;

/// Retrieves and normalizes grade records for one student.
pub struct GradeExtractor {
    endpoints: PortalEndpoints,
    scraper: Scraper,
}

impl GradeExtractor {
    pub fn new(config: &PortalConfig) -> Result<Self> {
        Ok(Self {
            endpoints: config.endpoints.clone(),
            scraper: Scraper::new(&config.scrape)?,
        })
    }

    /// Fetch the terms selected by `params`, newest first.
    ///
    /// Fails on the first discovery step that fails; never retries. A student
    /// with no registrations yields a single `N/A` placeholder.
    pub async fn fetch_grades(
        &self,
        api: &dyn PortalApi,
        session: &PortalSession,
        params: &ExtractionParams,
    ) -> PortalResult<Vec<NormalizedGrade>> {
        let params = params.clone().normalized();

        let curriculum_rows = self
            .fetch_rows(api, session, &self.endpoints.curriculum_info)
            .await?
            .unwrap_or_default();
        let curriculum_code = curriculum_rows
            .first()
            .and_then(|row| first_text(row, CURRICULUM_CODE_KEYS))
            .ok_or(PortalError::CurriculumNotFound)?;
        tracing::debug!(%curriculum_code, "Found curriculum");

        let vars = TemplateVars {
            curriculum_code: Some(&curriculum_code),
            ..Default::default()
        };
        let basic_info_endpoint = render(&self.endpoints.student_basic_info, &vars)
            .ok_or(PortalError::StudentInfoNotFound)?;
        let student_rows = self
            .fetch_rows(api, session, &basic_info_endpoint)
            .await?
            .unwrap_or_default();
        let student_curriculum_code = student_rows
            .first()
            .and_then(|row| first_text(row, STUDENT_CURRICULUM_CODE_KEYS))
            .ok_or(PortalError::StudentInfoNotFound)?;
        tracing::debug!(%student_curriculum_code, "Found student curriculum");

        let vars = TemplateVars {
            curriculum_code: Some(&curriculum_code),
            student_curriculum_code: Some(&student_curriculum_code),
            ..Default::default()
        };
        let history_endpoint = render(&self.endpoints.registration_history, &vars)
            .ok_or(PortalError::RegistrationUnavailable)?;
        let registration_rows = self
            .fetch_rows(api, session, &history_endpoint)
            .await?
            .ok_or(PortalError::RegistrationUnavailable)?;

        if registration_rows.is_empty() {
            tracing::info!("Student has no registrations");
            return Ok(vec![NormalizedGrade::not_available()]);
        }

        let mut records: Vec<RegistrationRecord> = registration_rows
            .iter()
            .map(registration_from_value)
            .collect();
        sort_latest_first(&mut records);

        let selected = select_records(&records, &params)?;
        tracing::info!(
            registrations = records.len(),
            selected = selected.len(),
            detail_level = params.detail_level.as_str(),
            course_filter = params.course_filter.is_some(),
            "Selected registrations"
        );

        let ids = DiscoveredIds {
            curriculum_code: &curriculum_code,
            student_curriculum_code: &student_curriculum_code,
        };
        let summary_page = OnceCell::new();
        let untagged_owner = untagged_summary_owner(&selected);
        let (ids, summary_page, detailed) = (
            &ids,
            &summary_page,
            params.detail_level == DetailLevel::Detailed,
        );

        // Detail lookups are independent; join_all keeps selection order
        let grades = join_all(selected.into_iter().enumerate().map(|(index, record)| async move {
            let mut courses = Vec::new();
            if detailed {
                let owns_untagged = untagged_owner == Some(index);
                courses = self
                    .course_details(api, session, ids, record, summary_page, owns_untagged)
                    .await;
            }
            if courses.is_empty() && !record.courses.is_empty() {
                tracing::debug!("Using courses embedded in the registration row");
                courses = record.courses.clone();
            }
            normalize(record, courses)
        }))
        .await;

        Ok(grades)
    }

    /// `Ok(None)` when the JSON has no data array; HTML where JSON was
    /// expected (usually the login page after expiry) is a decode failure.
    async fn fetch_rows(
        &self,
        api: &dyn PortalApi,
        session: &PortalSession,
        endpoint: &str,
    ) -> PortalResult<Option<Vec<Value>>> {
        match api.fetch(session, endpoint).await? {
            PortalPayload::Json(value) => Ok(super::records::data_rows(&value).cloned()),
            PortalPayload::Html(_) => Err(PortalError::Decode {
                endpoint: endpoint.to_string(),
                message: "expected JSON, got HTML".to_string(),
            }),
        }
    }

    async fn course_details(
        &self,
        api: &dyn PortalApi,
        session: &PortalSession,
        ids: &DiscoveredIds<'_>,
        record: &RegistrationRecord,
        summary_page: &OnceCell<Vec<TermCourse>>,
        owns_untagged: bool,
    ) -> Vec<CourseGrade> {
        let vars = TemplateVars {
            curriculum_code: Some(ids.curriculum_code),
            student_curriculum_code: Some(ids.student_curriculum_code),
            batch: record.batch_year,
            semester: record.semester.as_deref(),
            registration_code: record.registration_code.as_deref(),
        };

        for template in &self.endpoints.detail_patterns {
            let Some(endpoint) = render(template, &vars) else {
                continue;
            };
            let courses = self.courses_from_endpoint(api, session, &endpoint).await;
            if !courses.is_empty() {
                tracing::info!(endpoint = %endpoint, count = courses.len(), "Found course detail");
                return courses;
            }
        }

        if let Some(endpoint) = render(&self.endpoints.registered_courses, &vars) {
            let courses = self.courses_from_endpoint(api, session, &endpoint).await;
            if !courses.is_empty() {
                tracing::info!(count = courses.len(), "Found courses by registration code");
                return courses;
            }
        }

        // The summary page is the same for every term, so fetch it once
        let scraped = summary_page
            .get_or_init(|| self.scrape_summary_page(api, session))
            .await;
        courses_for_term(scraped, record, owns_untagged)
    }

    async fn courses_from_endpoint(
        &self,
        api: &dyn PortalApi,
        session: &PortalSession,
        endpoint: &str,
    ) -> Vec<CourseGrade> {
        match api.fetch(session, endpoint).await {
            Ok(payload) => payload
                .rows()
                .map(|rows| courses_from_rows(rows))
                .unwrap_or_default(),
            Err(e) => {
                tracing::debug!(endpoint, error = %e, "Detail endpoint failed");
                Vec::new()
            }
        }
    }

    async fn scrape_summary_page(
        &self,
        api: &dyn PortalApi,
        session: &PortalSession,
    ) -> Vec<TermCourse> {
        let endpoint = self.endpoints.academic_summary.as_str();
        let courses = match api.fetch(session, endpoint).await {
            Ok(PortalPayload::Html(html)) => self.scraper.scrape_courses(&html),
            Ok(PortalPayload::Json(value)) => super::records::data_rows(&value)
                .map(|rows| term_courses_from_rows(rows))
                .unwrap_or_default(),
            Err(e) => {
                tracing::warn!(endpoint, error = %e, "Academic summary page unavailable");
                Vec::new()
            }
        };
        if courses.is_empty() {
            tracing::info!("No course detail available from any source");
        } else {
            tracing::info!(count = courses.len(), "Scraped courses from academic summary");
        }
        courses
    }
}

/// Index of the selected term that receives summary rows without a term.
fn untagged_summary_owner(selected: &[&RegistrationRecord]) -> Option<usize> {
    selected
        .iter()
        .position(|record| record.has_grades())
        .or_else(|| (!selected.is_empty()).then_some(0))
}

/// The scraped summary rows that belong to `record`.
fn courses_for_term(
    scraped: &[TermCourse],
    record: &RegistrationRecord,
    owns_untagged: bool,
) -> Vec<CourseGrade> {
    scraped
        .iter()
        .filter(|row| {
            if row.is_tagged() {
                row.belongs_to(record)
            } else {
                owns_untagged
            }
        })
        .map(|row| row.course.clone())
        .collect()
}

struct DiscoveredIds<'a> {
    curriculum_code: &'a str,
    student_curriculum_code: &'a str,
}

/// Choose which registrations to report, from a list sorted newest first.
///
/// 1. Year and/or semester given: every exact match, or `NoMatchingTerm`.
/// 2. Course filter given: all registrations, since the course may be in any term.
/// 3. Otherwise: the newest registration with a CGPA or SGPA, else the newest.
pub fn select_records<'a>(
    records: &'a [RegistrationRecord],
    params: &ExtractionParams,
) -> PortalResult<Vec<&'a RegistrationRecord>> {
    if params.has_term_filter() {
        let matches: Vec<_> = records
            .iter()
            .filter(|record| matches_term(record, params))
            .collect();
        if matches.is_empty() {
            return Err(PortalError::NoMatchingTerm {
                year: params.year,
                semester: params.semester,
            });
        }
        return Ok(matches);
    }

    if params.course_filter.is_some() {
        return Ok(records.iter().collect());
    }

    Ok(records
        .iter()
        .find(|record| record.has_grades())
        .or_else(|| records.first())
        .into_iter()
        .collect())
}

fn matches_term(record: &RegistrationRecord, params: &ExtractionParams) -> bool {
    let year_matches = params
        .year
        .map_or(true, |year| record.batch_year == Some(year));
    let semester_matches = params.semester.map_or(true, |semester| {
        record.semester.as_deref().and_then(semester_number) == Some(semester)
    });
    year_matches && semester_matches
}

fn normalize(record: &RegistrationRecord, courses: Vec<CourseGrade>) -> NormalizedGrade {
    let or_na = |value: &Option<String>| value.clone().unwrap_or_else(|| NOT_AVAILABLE.to_string());
    NormalizedGrade {
        cgpa: or_na(&record.cgpa),
        semester_gpa: or_na(&record.semester_gpa),
        status: or_na(&record.status),
        batch_year: record.batch_year,
        semester: record.semester.clone(),
        courses,
        raw: record.raw.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::portal::records::registration_from_value;
    use serde_json::json;

    fn records() -> Vec<RegistrationRecord> {
        // already newest first
        [
            json!({"Batch": 3, "Semester": "II", "CGPA": null, "SGPA": null, "RegistrationDate": "2024-02-01"}),
            json!({"Batch": 3, "Semester": "I", "CGPA": "3.40", "SGPA": "3.55", "RegistrationDate": "2023-09-01"}),
            json!({"Batch": 2, "Semester": "II", "CGPA": "3.31", "SGPA": "3.20", "RegistrationDate": "2023-02-01"}),
            json!({"Batch": 2, "Semester": "I", "CGPA": "3.35", "SGPA": "3.35", "RegistrationDate": "2022-09-01"}),
        ]
        .iter()
        .map(registration_from_value)
        .collect()
    }

    fn label(record: &RegistrationRecord) -> (i64, String) {
        (record.batch_year.unwrap(), record.semester.clone().unwrap())
    }

    #[test]
    fn test_default_picks_latest_with_grades() {
        let records = records();
        let selected = select_records(&records, &ExtractionParams::default()).unwrap();
        assert_eq!(selected.len(), 1);
        assert_eq!(label(selected[0]), (3, "I".to_string()));
    }

    #[test]
    fn test_default_falls_back_to_first_without_grades() {
        let records: Vec<_> = records().into_iter().take(1).collect();
        let selected = select_records(&records, &ExtractionParams::default()).unwrap();
        assert_eq!(label(selected[0]), (3, "II".to_string()));
    }

    #[test]
    fn test_course_filter_scans_all_terms() {
        let records = records();
        let params = ExtractionParams {
            course_filter: Some("english".to_string()),
            ..Default::default()
        };
        assert_eq!(select_records(&records, &params).unwrap().len(), 4);
    }

    #[test]
    fn test_term_filter_roman_arabic_symmetry() {
        let records = records();
        let params = ExtractionParams {
            year: Some(2),
            semester: Some(2),
            ..Default::default()
        };
        let selected = select_records(&records, &params).unwrap();
        assert_eq!(selected.len(), 1);
        assert_eq!(label(selected[0]), (2, "II".to_string()));

        // stored arabic, requested 2 → matches too
        let arabic = vec![registration_from_value(
            &json!({"Batch": 1, "Semester": "2", "RegistrationDate": "2021-01-01"}),
        )];
        let params = ExtractionParams {
            semester: Some(2),
            ..Default::default()
        };
        assert_eq!(select_records(&arabic, &params).unwrap().len(), 1);
    }

    #[test]
    fn test_term_filter_overrides_course_filter() {
        let records = records();
        let params = ExtractionParams {
            year: Some(3),
            course_filter: Some("english".to_string()),
            ..Default::default()
        };
        assert_eq!(select_records(&records, &params).unwrap().len(), 2);
    }

    #[test]
    fn test_no_matching_term() {
        let records = records();
        let params = ExtractionParams {
            year: Some(5),
            semester: Some(1),
            ..Default::default()
        };
        assert_eq!(
            select_records(&records, &params).unwrap_err(),
            PortalError::NoMatchingTerm {
                year: Some(5),
                semester: Some(1)
            }
        );
    }

    #[test]
    fn test_untagged_summary_rows_go_to_newest_graded_term() {
        let records = records();
        let selected: Vec<_> = records.iter().collect();
        // the newest term has no GPA yet
        assert_eq!(untagged_summary_owner(&selected), Some(1));
        assert_eq!(untagged_summary_owner(&selected[..1]), Some(0));
        assert_eq!(untagged_summary_owner(&[]), None);
    }

    #[test]
    fn test_summary_rows_split_by_term() {
        let records = records();
        let scraped = term_courses_from_rows(&[
            json!({"Batch": 2, "Semester": "I", "CourseCode": "Math2052", "LetterGrade": "B"}),
            json!({"Batch": 3, "Semester": "1", "CourseCode": "CoSc3025", "LetterGrade": "A"}),
            json!({"CourseCode": "Eng1011", "LetterGrade": "A-"}),
        ]);

        let codes = |courses: Vec<CourseGrade>| -> Vec<String> {
            courses.into_iter().map(|c| c.code).collect()
        };
        assert_eq!(codes(courses_for_term(&scraped, &records[1], true)), ["CoSc3025", "Eng1011"]);
        assert_eq!(codes(courses_for_term(&scraped, &records[3], false)), ["Math2052"]);
        assert!(courses_for_term(&scraped, &records[2], false).is_empty());
    }

    #[test]
    fn test_normalize_fills_sentinels() {
        let record = registration_from_value(&json!({"Batch": 1, "Semester": "I"}));
        let grade = normalize(&record, Vec::new());
        assert_eq!(grade.cgpa, "N/A");
        assert_eq!(grade.semester_gpa, "N/A");
        assert_eq!(grade.status, "N/A");
        assert_eq!(grade.batch_year, Some(1));
    }
}
