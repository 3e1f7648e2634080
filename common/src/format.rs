// Display helpers shared by the front ends

/// Seconds as `HH:MM:SS`, or `D-HH:MM:SS` from one day up.
/// Negative and non-finite input renders as `00:00:00`.
pub fn format_time(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds as u64
    } else {
        0
    };
    let days = total / 86_400;
    let hours = total % 86_400 / 3_600;
    let minutes = total % 3_600 / 60;
    let secs = total % 60;

    if days > 0 {
        format!("{}-{:02}:{:02}:{:02}", days, hours, minutes, secs)
    } else {
        format!("{:02}:{:02}:{:02}", hours, minutes, secs)
    }
}

/// First dot-separated label of a host name
pub fn short_name(host: &str) -> &str {
    host.split('.').next().unwrap_or(host)
}
