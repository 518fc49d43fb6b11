//! Display masking for node addresses.

use std::sync::OnceLock;

use regex::Regex;

/// Mask a host for display.
///
/// IPv4 addresses keep their last two octets (`***.***.3.4`). Host names keep
/// only their last label (`***.***.com`). Fingerprints are never computed
/// from the masked form.
pub fn mask_host(host: &str) -> String {
    let host = host.trim();
    if host.is_empty() {
        return String::new();
    }

    static IPV4: OnceLock<Regex> = OnceLock::new();
    let re = IPV4
        .get_or_init(|| Regex::new(r"^(\d{1,3})\.(\d{1,3})\.(\d{1,3})\.(\d{1,3})$").unwrap());

    if let Some(caps) = re.captures(host) {
        let in_range = (1..=4).all(|i| caps[i].parse::<u8>().is_ok());
        if in_range {
            return format!("***.***.{}.{}", &caps[3], &caps[4]);
        }
    }

    match host.rsplit_once('.') {
        Some((head, last)) => {
            let stars = vec!["***"; head.split('.').count()].join(".");
            format!("{}.{}", stars, last)
        }
        None => "***".to_string(),
    }
}
