//! Maps `Box<dyn Error>` from the transport boundary to typed `LinkError`.
//!
//! `waterer_traits::Transport` returns `Box<dyn Error + Send + Sync>`; this
//! module converts those, with an optional feature-gated path for
//! `waterer_hardware::HwError` downcasting.

use crate::error::LinkError;

/// Map a transport error raised while running `command`.
pub fn map_transport_error(command: &str, e: &(dyn std::error::Error + 'static)) -> LinkError {
    #[cfg(feature = "hardware-errors")]
    {
        if let Some(hw) = e.downcast_ref::<waterer_hardware::error::HwError>() {
            return match hw {
                waterer_hardware::error::HwError::Timeout => LinkError::NoResponse {
                    command: command.to_owned(),
                },
                other => LinkError::Transport {
                    command: command.to_owned(),
                    reason: other.to_string(),
                },
            };
        }
    }

    // Fallback: string-based detection
    let s = e.to_string();
    if s.to_lowercase().contains("timeout") || s.to_lowercase().contains("timed out") {
        LinkError::NoResponse {
            command: command.to_owned(),
        }
    } else {
        LinkError::Transport {
            command: command.to_owned(),
            reason: s,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_become_no_response() {
        let e = std::io::Error::new(std::io::ErrorKind::TimedOut, "operation timed out");
        assert!(matches!(
            map_transport_error("ok", &e),
            LinkError::NoResponse { .. }
        ));
    }

    #[cfg(feature = "hardware-errors")]
    #[test]
    fn hw_errors_are_downcast() {
        let e = waterer_hardware::error::HwError::Serial("unplugged".into());
        match map_transport_error("hx 10", &e) {
            LinkError::Transport { command, reason } => {
                assert_eq!(command, "hx 10");
                assert!(reason.contains("unplugged"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
