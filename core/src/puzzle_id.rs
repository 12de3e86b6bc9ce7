use std::fmt;

pub const PUZZLE_ID_LEN: usize = 7;
/// No `0`, `1`, `l`, `I` or `O`, so ids survive being read aloud.
pub const PUZZLE_ID_ALPHABET: &str = "23456789abcdefghijkmnopqrstuvwxyzABCDEFGHJKLMNPQRSTUVWXYZ";

pub fn is_valid_puzzle_id(value: &str) -> bool {
    PuzzleId::parse(value).is_ok()
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PuzzleId(String);

impl PuzzleId {
    pub fn parse(value: &str) -> Result<Self, PuzzleIdError> {
        let found = value.chars().count();
        if found != PUZZLE_ID_LEN {
            return Err(PuzzleIdError::InvalidLength {
                expected: PUZZLE_ID_LEN,
                found,
            });
        }
        if let Some((index, ch)) = value
            .chars()
            .enumerate()
            .find(|(_, ch)| !PUZZLE_ID_ALPHABET.contains(*ch))
        {
            return Err(PuzzleIdError::InvalidCharacter { ch, index });
        }
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PuzzleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for PuzzleId {
    type Err = PuzzleIdError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PuzzleIdError {
    #[error("puzzle id must be {expected} chars, got {found}")]
    InvalidLength { expected: usize, found: usize },
    #[error("invalid character '{ch}' at position {index}")]
    InvalidCharacter { ch: char, index: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_alphabet_ids() {
        let id = PuzzleId::parse("ab23XYz").unwrap();
        assert_eq!(id.to_string(), "ab23XYz");
        assert!(is_valid_puzzle_id("2222222"));
    }

    #[test]
    fn rejects_ambiguous_characters_and_lengths() {
        assert_eq!(
            PuzzleId::parse("abc0def"),
            Err(PuzzleIdError::InvalidCharacter { ch: '0', index: 3 })
        );
        assert_eq!(
            "abc".parse::<PuzzleId>(),
            Err(PuzzleIdError::InvalidLength {
                expected: PUZZLE_ID_LEN,
                found: 3
            })
        );
        assert!(!is_valid_puzzle_id("lIO2345"));
    }
}
