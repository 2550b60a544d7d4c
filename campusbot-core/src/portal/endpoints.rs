//! Endpoint template rendering

/// Values substituted into endpoint templates.
#[derive(Debug, Clone, Default)]
pub struct TemplateVars<'a> {
    pub curriculum_code: Option<&'a str>,
    pub student_curriculum_code: Option<&'a str>,
    pub batch: Option<i64>,
    pub semester: Option<&'a str>,
    pub registration_code: Option<&'a str>,
}

/// Replace `{placeholder}`s with URL-encoded values.
///
/// Returns `None` if the template references a placeholder with no value, so
/// callers can skip endpoints they cannot address.
pub fn render(template: &str, vars: &TemplateVars<'_>) -> Option<String> {
    let batch = vars.batch.map(|b| b.to_string());
    let substitutions: [(&str, Option<&str>); 5] = [
        ("{curriculum_code}", vars.curriculum_code),
        ("{student_curriculum_code}", vars.student_curriculum_code),
        ("{batch}", batch.as_deref()),
        ("{semester}", vars.semester),
        ("{registration_code}", vars.registration_code),
    ];

    let mut rendered = template.to_string();
    for (placeholder, value) in substitutions {
        if rendered.contains(placeholder) {
            let value = value?;
            rendered = rendered.replace(placeholder, &urlencoding::encode(value));
        }
    }
    Some(rendered)
}
