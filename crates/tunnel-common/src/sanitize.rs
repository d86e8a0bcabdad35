//! Log sanitization
//!
//! Untrusted values (IPs, emails, header fragments) are sanitized before
//! they reach the log stream to prevent log injection.

use std::net::IpAddr;

/// Longest sanitized value emitted to logs
const MAX_LOG_LEN: usize = 64;

/// Strip control characters and cap length
pub fn sanitize_log(value: &str) -> String {
    value
        .chars()
        .filter(|c| !c.is_control())
        .take(MAX_LOG_LEN)
        .collect()
}

/// Parse an untrusted string as an IP address
pub fn validate_ip(value: &str) -> Option<IpAddr> {
    value.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_control_characters() {
        let dirty = "10.0.0.1\r\nFAKE LOG LINE\x1b[31m";
        let clean = sanitize_log(dirty);
        assert!(!clean.contains('\n'));
        assert!(!clean.contains('\r'));
        assert!(!clean.contains('\x1b'));
        assert!(clean.starts_with("10.0.0.1"));
    }

    #[test]
    fn test_caps_length() {
        let long = "a".repeat(500);
        assert_eq!(sanitize_log(&long).len(), MAX_LOG_LEN);
    }

    #[test]
    fn test_validate_ip() {
        assert!(validate_ip("192.168.0.1").is_some());
        assert!(validate_ip(" 2001:db8::1 ").is_some());
        assert!(validate_ip("not-an-ip").is_none());
        assert!(validate_ip("10.0.0.1; DROP TABLE").is_none());
    }
}
