//! Payment processor names used by mobile clients.

use core::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A store billing processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentProcessor {
    /// Google Play Billing.
    #[serde(rename = "android-iap")]
    AndroidIap,
    /// Apple App Store in-app purchase.
    #[serde(rename = "ios-iap")]
    IosIap,
}

/// Error returned when a processor name is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown payment processor: {0}")]
pub struct UnknownProcessor(pub String);

impl PaymentProcessor {
    /// Every supported processor.
    pub const ALL: [Self; 2] = [Self::AndroidIap, Self::IosIap];

    /// Wire name (`android-iap`, `ios-iap`).
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::AndroidIap => "android-iap",
            Self::IosIap => "ios-iap",
        }
    }

    /// Name with each dash-separated word capitalised, used in operator-facing
    /// log lines (`Android-Iap`).
    #[must_use]
    pub fn title(&self) -> String {
        self.name()
            .split('-')
            .map(|word| {
                let mut chars = word.chars();
                chars.next().map_or_else(String::new, |first| {
                    first.to_uppercase().chain(chars).collect()
                })
            })
            .collect::<Vec<_>>()
            .join("-")
    }
}

impl fmt::Display for PaymentProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PaymentProcessor {
    type Err = UnknownProcessor;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|processor| processor.name() == s.trim())
            .ok_or_else(|| UnknownProcessor(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_names() {
        assert_eq!("android-iap".parse(), Ok(PaymentProcessor::AndroidIap));
        assert_eq!("ios-iap".parse(), Ok(PaymentProcessor::IosIap));
        assert!("paypal".parse::<PaymentProcessor>().is_err());
    }

    #[test]
    fn test_title() {
        assert_eq!(PaymentProcessor::AndroidIap.title(), "Android-Iap");
        assert_eq!(PaymentProcessor::IosIap.title(), "Ios-Iap");
    }

    #[test]
    fn test_serde_uses_wire_name() {
        let json = serde_json::to_string(&PaymentProcessor::IosIap).unwrap_or_default();
        assert_eq!(json, "\"ios-iap\"");
    }
}
