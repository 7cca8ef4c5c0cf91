//! Device pairing input.
//!
//! When the stored credentials are not registered, the session manager links
//! the device with a pairing code instead of a QR scan. That needs a phone
//! number from somewhere; [`PairingInput`] abstracts where.

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PairingError {
    #[error("No phone number available for pairing: {0}")]
    Unavailable(String),

    #[error("Invalid phone number for pairing: {0:?}")]
    InvalidPhoneNumber(String),
}

/// Supplies the phone number to pair with.
#[async_trait]
pub trait PairingInput: Send + Sync {
    async fn phone_number(&self) -> Result<String, PairingError>;
}

/// A number fixed at startup (flag or environment).
#[derive(Debug, Clone)]
pub struct StaticPairingInput {
    phone_number: String,
}

impl StaticPairingInput {
    pub fn new(phone_number: impl Into<String>) -> Self {
        Self {
            phone_number: phone_number.into(),
        }
    }
}

#[async_trait]
impl PairingInput for StaticPairingInput {
    async fn phone_number(&self) -> Result<String, PairingError> {
        Ok(self.phone_number.clone())
    }
}

/// Prompts the operator on stdout and reads one line from stdin.
#[derive(Debug, Clone, Default)]
pub struct ConsolePairingInput;

#[async_trait]
impl PairingInput for ConsolePairingInput {
    async fn phone_number(&self) -> Result<String, PairingError> {
        let mut stdout = tokio::io::stdout();
        stdout
            .write_all(b"Number:\n")
            .await
            .map_err(|e| PairingError::Unavailable(e.to_string()))?;
        stdout
            .flush()
            .await
            .map_err(|e| PairingError::Unavailable(e.to_string()))?;

        let mut line = String::new();
        let read = BufReader::new(tokio::io::stdin())
            .read_line(&mut line)
            .await
            .map_err(|e| PairingError::Unavailable(e.to_string()))?;
        if read == 0 {
            return Err(PairingError::Unavailable("stdin closed".to_string()));
        }

        Ok(line.trim().to_string())
    }
}

/// Reduce operator input to the digits the network expects.
pub fn sanitize_phone_number(raw: &str) -> Result<String, PairingError> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return Err(PairingError::InvalidPhoneNumber(raw.to_string()));
    }
    Ok(digits)
}

/// Group a pairing code in blocks of four: `ABCD1234` -> `ABCD-1234`.
pub fn format_pairing_code(code: &str) -> String {
    code.chars()
        .collect::<Vec<_>>()
        .chunks(4)
        .map(|chunk| chunk.iter().collect::<String>())
        .collect::<Vec<_>>()
        .join("-")
}

#[cfg(test)]
mod tests {
    use super::*;

    mod format_pairing_code {
        use super::*;

        #[test]
        fn splits_eight_characters() {
            assert_eq!(format_pairing_code("ABCD1234"), "ABCD-1234");
        }

        #[test]
        fn keeps_short_tail() {
            assert_eq!(format_pairing_code("ABCDEFGHIJ"), "ABCD-EFGH-IJ");
        }

        #[test]
        fn short_code_is_unchanged() {
            assert_eq!(format_pairing_code("ABC"), "ABC");
        }

        #[test]
        fn empty_code_is_empty() {
            assert_eq!(format_pairing_code(""), "");
        }
    }

    mod sanitize_phone_number {
        use super::*;

        #[test]
        fn strips_formatting() {
            assert_eq!(sanitize_phone_number("+20 123-456 7890").unwrap(), "201234567890");
        }

        #[test]
        fn rejects_input_without_digits() {
            assert_eq!(
                sanitize_phone_number("none"),
                Err(PairingError::InvalidPhoneNumber("none".to_string()))
            );
        }
    }

    #[tokio::test]
    async fn static_input_returns_configured_number() {
        let input = StaticPairingInput::new("201234567890");
        assert_eq!(input.phone_number().await.unwrap(), "201234567890");
    }
}
