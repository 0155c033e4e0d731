use crate::{error::ValidationIssue, store::TimetableInput};

const WEEKDAYS: [&str; 7] = [
    "monday",
    "tuesday",
    "wednesday",
    "thursday",
    "friday",
    "saturday",
    "sunday",
];

/// Check a create/update body. An empty result means the input is valid.
///
/// Rules, each reported as `(field, rule)`:
/// - `required`: every field is non-blank
/// - `weekday`: `day` names a day of the week, any case
/// - `time_format`: `start_time`/`end_time` are `HH:MM` or `HH:MM:SS`
/// - `after_start`: `end_time` is later than `start_time`
pub fn validate(input: &TimetableInput) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    let fields = [
        ("class_name", input.class_name.as_str()),
        ("day", input.day.as_str()),
        ("start_time", input.start_time.as_str()),
        ("end_time", input.end_time.as_str()),
        ("subject", input.subject.as_str()),
    ];
    for (field, value) in fields {
        if value.trim().is_empty() {
            issues.push(ValidationIssue {
                field,
                rule: "required",
            });
        }
    }

    let day = input.day.trim();
    if !day.is_empty() && !WEEKDAYS.contains(&day.to_ascii_lowercase().as_str()) {
        issues.push(ValidationIssue {
            field: "day",
            rule: "weekday",
        });
    }

    let start = check_time("start_time", &input.start_time, &mut issues);
    let end = check_time("end_time", &input.end_time, &mut issues);
    if let (Some(start), Some(end)) = (start, end)
        && end <= start
    {
        issues.push(ValidationIssue {
            field: "end_time",
            rule: "after_start",
        });
    }

    issues
}

fn check_time(
    field: &'static str,
    value: &str,
    issues: &mut Vec<ValidationIssue>,
) -> Option<u32> {
    let value = value.trim();
    let parsed = parse_time(value);
    if !value.is_empty() && parsed.is_none() {
        issues.push(ValidationIssue {
            field,
            rule: "time_format",
        });
    }
    parsed
}

/// Seconds since midnight for `HH:MM` or `HH:MM:SS`.
fn parse_time(value: &str) -> Option<u32> {
    let mut parts = value.split(':');
    let hours = two_digits(parts.next()?, 23)?;
    let minutes = two_digits(parts.next()?, 59)?;
    let seconds = match parts.next() {
        Some(s) => two_digits(s, 59)?,
        None => 0,
    };
    if parts.next().is_some() {
        return None;
    }
    Some(hours * 3600 + minutes * 60 + seconds)
}

fn two_digits(s: &str, max: u32) -> Option<u32> {
    if s.len() != 2 || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok().filter(|n| *n <= max)
}
