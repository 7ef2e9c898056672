use crate::blockers::Progress;

pub const DEFAULT_STATUS_MESSAGE: &str = "Please wait...";

/// Builds the progress line shown while blockers drain.
pub fn status_text(message: &str, progress: &Progress) -> String {
    if progress.remaining > 0.0 {
        format!(
            "{} ({}/{})",
            message,
            format_units(progress.completed()),
            format_units(progress.expected)
        )
    } else {
        message.to_string()
    }
}

fn format_units(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        format!("{:.2}", value)
    }
}
