//! Visitor helpers: ids, user-agent screening, device labels

use super::models::Settings;
use crate::uploads::random_alphanumeric;

/// Fresh visitor id: `user_` followed by 10 alphanumerics.
pub fn generate_user_id() -> String {
    format!("user_{}", random_alphanumeric(10))
}

/// Agents shorter than this are treated as scripts when filtering is on.
const MIN_USER_AGENT_LEN: usize = 10;

/// Whether a request with this user agent may use the visitor endpoints.
pub fn is_allowed_user_agent(user_agent: &str, settings: &Settings) -> bool {
    if user_agent.is_empty() {
        return false;
    }
    if !settings.enable_user_agent_filter {
        return true;
    }

    let lowered = user_agent.to_lowercase();
    if settings
        .blocked_keywords()
        .iter()
        .any(|k| lowered.contains(k.as_str()))
    {
        return false;
    }

    user_agent.chars().count() >= MIN_USER_AGENT_LEN
}

/// Human-readable device label shown on the staff dashboard.
pub fn detect_device_type(user_agent: Option<&str>) -> &'static str {
    let ua = match user_agent {
        Some(ua) if !ua.is_empty() => ua.to_lowercase(),
        _ => return "未知设备",
    };
    let has = |needle: &str| ua.contains(needle);

    const MOBILE: [&str; 7] = [
        "mobile",
        "android",
        "iphone",
        "ipad",
        "ipod",
        "blackberry",
        "windows phone",
    ];
    const DESKTOP: [&str; 4] = ["windows", "macintosh", "linux", "chromeos"];

    if MOBILE.iter().any(|m| has(m)) {
        if has("android") {
            "Android手机"
        } else if has("iphone") {
            "iPhone"
        } else if has("ipad") {
            "iPad"
        } else {
            "移动设备"
        }
    } else if DESKTOP.iter().any(|d| has(d)) {
        if has("windows") {
            "Windows桌面"
        } else if has("macintosh") {
            "Mac桌面"
        } else if has("linux") {
            "Linux桌面"
        } else if has("chromeos") {
            "Chrome OS"
        } else {
            "桌面设备"
        }
    } else {
        "其他设备"
    }
}
