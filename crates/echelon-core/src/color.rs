use serde::Serialize;
use thiserror::Error;

/// ANSI escape that resets all attributes.
pub const RESET_SEQUENCE: &str = "\x1b[0m";

/// The eight standard ANSI foreground colors, numbered as in `ESC[3{n}m`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AnsiColor {
    Black = 0,
    Red = 1,
    Green = 2,
    Yellow = 3,
    Blue = 4,
    Magenta = 5,
    Cyan = 6,
    White = 7,
}

/// A raw color code outside the supported `0..=7` range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ColorError {
    #[error("ANSI color code {0} is out of range (expected 0-7, or negative for none)")]
    OutOfRange(i32),
}

impl AnsiColor {
    /// All colors in code order.
    pub const ALL: [AnsiColor; 8] = [
        AnsiColor::Black,
        AnsiColor::Red,
        AnsiColor::Green,
        AnsiColor::Yellow,
        AnsiColor::Blue,
        AnsiColor::Magenta,
        AnsiColor::Cyan,
        AnsiColor::White,
    ];

    /// Numeric code of this color (0-7).
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Resolve a raw color code.
    ///
    /// Negative codes mean "no color" and resolve to `Ok(None)`. Codes above 7
    /// have no standard foreground escape and are rejected.
    pub fn from_code(code: i32) -> Result<Option<AnsiColor>, ColorError> {
        if code < 0 {
            return Ok(None);
        }
        usize::try_from(code)
            .ok()
            .and_then(|idx| Self::ALL.get(idx).copied())
            .map(Some)
            .ok_or(ColorError::OutOfRange(code))
    }

    /// The `ESC[3{n}m` foreground escape for this color.
    pub fn sequence(self) -> String {
        format!("\x1b[3{}m", self.code())
    }
}

/// Escape that starts a colored run; an unset color falls back to a reset.
pub fn start_sequence(color: Option<AnsiColor>) -> String {
    match color {
        Some(color) => color.sequence(),
        None => RESET_SEQUENCE.to_string(),
    }
}

/// Wrap `text` in the start escape for `color` followed by a reset.
pub fn colorize(text: &str, color: Option<AnsiColor>) -> String {
    format!("{}{}{}", start_sequence(color), text, RESET_SEQUENCE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_code_negative_is_no_color() {
        assert_eq!(AnsiColor::from_code(-1), Ok(None));
        assert_eq!(AnsiColor::from_code(i32::MIN), Ok(None));
    }

    #[test]
    fn test_from_code_in_range() {
        assert_eq!(AnsiColor::from_code(0), Ok(Some(AnsiColor::Black)));
        assert_eq!(AnsiColor::from_code(2), Ok(Some(AnsiColor::Green)));
        assert_eq!(AnsiColor::from_code(7), Ok(Some(AnsiColor::White)));
    }

    #[test]
    fn test_from_code_out_of_range() {
        assert_eq!(AnsiColor::from_code(8), Err(ColorError::OutOfRange(8)));
        assert_eq!(
            AnsiColor::from_code(i32::MAX),
            Err(ColorError::OutOfRange(i32::MAX))
        );
    }

    #[test]
    fn test_sequences() {
        assert_eq!(AnsiColor::Red.sequence(), "\x1b[31m");
        assert_eq!(AnsiColor::White.sequence(), "\x1b[37m");
        assert_eq!(start_sequence(None), RESET_SEQUENCE);
    }

    #[test]
    fn test_colorize_wraps_with_reset() {
        assert_eq!(
            colorize("build", Some(AnsiColor::Green)),
            "\x1b[32mbuild\x1b[0m"
        );
        assert_eq!(colorize("build", None), "\x1b[0mbuild\x1b[0m");
    }

    #[test]
    fn test_codes_match_all_order() {
        for (idx, color) in AnsiColor::ALL.iter().enumerate() {
            assert_eq!(color.code() as usize, idx);
        }
    }
}
