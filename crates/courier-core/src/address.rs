//! Recipient address helpers.
//!
//! Addresses on the messaging network look like `user@server`. Internally the
//! protocol also produces device-scoped forms such as `201234567890:12@s.whatsapp.net`,
//! which callers never want to see.

use regex::Regex;
use std::sync::LazyLock;

/// Server suffix for ordinary user accounts.
pub const DEFAULT_USER_SERVER: &str = "s.whatsapp.net";

/// Matches a device suffix (`:<digits>@`) inside a raw address.
static DEVICE_SUFFIX_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r":\d+@").unwrap());

/// A decoded address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Jid {
    pub user: String,
    pub device: Option<u16>,
    pub server: String,
}

/// Split a raw address into its parts.
///
/// Returns `None` when there is no `@`. The user part drops any `_agent` or
/// `:device` suffix; a non-numeric device suffix is ignored.
pub fn jid_decode(raw: &str) -> Option<Jid> {
    let (combined, server) = raw.split_once('@')?;
    let (user_agent, device) = match combined.split_once(':') {
        Some((user_agent, device)) => (user_agent, device.parse().ok()),
        None => (combined, None),
    };
    let user = user_agent.split('_').next().unwrap_or_default();

    Some(Jid {
        user: user.to_string(),
        device,
        server: server.to_string(),
    })
}

/// Canonicalize a device-scoped address to `user@server`.
///
/// Anything without a `:<digits>@` device suffix (including the empty string)
/// is returned unchanged, as is an address that fails to decode into a
/// non-empty user and server.
pub fn decode_address(raw: &str) -> String {
    if !DEVICE_SUFFIX_RE.is_match(raw) {
        return raw.to_string();
    }

    match jid_decode(raw) {
        Some(jid) if !jid.user.is_empty() && !jid.server.is_empty() => {
            format!("{}@{}", jid.user, jid.server)
        }
        _ => raw.to_string(),
    }
}

/// Turn caller input into a deliverable address.
///
/// Input that already contains `@` is trusted as-is. Otherwise every non-digit
/// is stripped (`+20 123-456` becomes `20123456`) and the default user server
/// is appended.
pub fn normalize_recipient(raw: &str) -> String {
    if raw.contains('@') {
        return raw.to_string();
    }

    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    format!("{digits}@{DEFAULT_USER_SERVER}")
}

#[cfg(test)]
mod tests {
    use super::*;

    mod jid_decode {
        use super::*;

        #[test]
        fn splits_user_device_and_server() {
            let jid = jid_decode("201234567890:12@s.whatsapp.net").unwrap();
            assert_eq!(jid.user, "201234567890");
            assert_eq!(jid.device, Some(12));
            assert_eq!(jid.server, "s.whatsapp.net");
        }

        #[test]
        fn drops_agent_suffix() {
            let jid = jid_decode("201234567890_1:3@s.whatsapp.net").unwrap();
            assert_eq!(jid.user, "201234567890");
            assert_eq!(jid.device, Some(3));
        }

        #[test]
        fn plain_address_has_no_device() {
            let jid = jid_decode("120363025246125888@g.us").unwrap();
            assert_eq!(jid.user, "120363025246125888");
            assert_eq!(jid.device, None);
            assert_eq!(jid.server, "g.us");
        }

        #[test]
        fn missing_separator_is_none() {
            assert!(jid_decode("201234567890").is_none());
            assert!(jid_decode("").is_none());
        }
    }

    mod decode_address {
        use super::*;

        #[test]
        fn strips_device_suffix() {
            assert_eq!(
                decode_address("201234567890:12@s.whatsapp.net"),
                "201234567890@s.whatsapp.net"
            );
        }

        #[test]
        fn passes_canonical_address_through() {
            assert_eq!(
                decode_address("201234567890@s.whatsapp.net"),
                "201234567890@s.whatsapp.net"
            );
        }

        #[test]
        fn passes_empty_input_through() {
            assert_eq!(decode_address(""), "");
        }

        #[test]
        fn non_numeric_suffix_is_not_a_device() {
            assert_eq!(decode_address("abc:def@server"), "abc:def@server");
        }

        #[test]
        fn undecodable_user_is_left_alone() {
            assert_eq!(decode_address(":12@s.whatsapp.net"), ":12@s.whatsapp.net");
        }
    }

    mod normalize_recipient {
        use super::*;

        #[test]
        fn appends_default_server_to_digits() {
            assert_eq!(
                normalize_recipient("201234567890"),
                "201234567890@s.whatsapp.net"
            );
        }

        #[test]
        fn strips_formatting_characters() {
            assert_eq!(
                normalize_recipient("+20 (123) 456-7890"),
                "201234567890@s.whatsapp.net"
            );
        }

        #[test]
        fn keeps_already_addressed_input() {
            assert_eq!(
                normalize_recipient("120363025246125888@g.us"),
                "120363025246125888@g.us"
            );
        }
    }
}
