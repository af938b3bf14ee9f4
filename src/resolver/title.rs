//! Episode title parsing: show name, season label and episode label

use crate::config::SeasonTable;
use crate::error::{Error, Result};
use crate::utils::sanitize_filename;
use regex::Regex;
use std::sync::LazyLock;

#[allow(clippy::expect_used)]
static BRACKETED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.*)\[([^\[\]]*)\]\s*$").expect("static pattern compiles"));

/// Pieces of an episode title
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTitle {
    /// Show name without the season label
    pub show_title: String,
    /// Season label found in the title
    pub season_hint: Option<String>,
    /// Episode label, zero-padded to two digits when numeric
    pub episode_label: String,
}

/// Split a raw title into show, season label and episode label
///
/// Accepts `Name [label]` and `Name label`. The longest label from `seasons`
/// found in the name is removed from it and returned as the season hint.
pub fn parse_title(raw: &str, seasons: &SeasonTable) -> Result<ParsedTitle> {
    let clean = sanitize_filename(raw);
    let clean = clean.trim();

    let (name, label) = match BRACKETED.captures(clean) {
        Some(caps) => (
            caps.get(1).map_or("", |m| m.as_str()).trim().to_string(),
            caps.get(2).map_or("", |m| m.as_str()).trim().to_string(),
        ),
        None => match clean.rsplit_once(char::is_whitespace) {
            Some((name, label)) => (name.trim().to_string(), label.trim().to_string()),
            None => {
                return Err(Error::Parse(format!(
                    "title '{}' has no episode label",
                    raw
                )));
            }
        },
    };

    if label.is_empty() {
        return Err(Error::Parse(format!("title '{}' has an empty episode label", raw)));
    }

    let (show_title, season_hint) = match seasons.find_label_in(&name) {
        Some(season) => (collapse_spaces(&name.replace(season, " ")), Some(season.to_string())),
        None => (collapse_spaces(&name), None),
    };

    if show_title.is_empty() {
        return Err(Error::Parse(format!("title '{}' has no show name", raw)));
    }

    Ok(ParsedTitle {
        show_title,
        season_hint,
        episode_label: pad_episode(&label),
    })
}

fn collapse_spaces(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// `1` becomes `01`; non-numeric labels (`SP`, `12.5`) are kept as they are
pub fn pad_episode(label: &str) -> String {
    if !label.is_empty() && label.chars().all(|c| c.is_ascii_digit()) {
        match label.parse::<u64>() {
            Ok(n) => format!("{:02}", n),
            Err(_) => label.to_string(),
        }
    } else {
        label.to_string()
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn table() -> SeasonTable {
        [("第二季", "02"), ("第三季", "03")].into_iter().collect()
    }

    #[test]
    fn plain_title_with_season_label() {
        let parsed = parse_title("Show 第二季 01", &table()).unwrap();
        assert_eq!(parsed.show_title, "Show");
        assert_eq!(parsed.season_hint.as_deref(), Some("第二季"));
        assert_eq!(parsed.episode_label, "01");
    }

    #[test]
    fn bracketed_title() {
        let parsed = parse_title("進擊的巨人 第三季 [7]", &table()).unwrap();
        assert_eq!(parsed.show_title, "進擊的巨人");
        assert_eq!(parsed.season_hint.as_deref(), Some("第三季"));
        assert_eq!(parsed.episode_label, "07");
    }

    #[test]
    fn no_season_label_leaves_hint_absent() {
        let parsed = parse_title("Show 12", &table()).unwrap();
        assert_eq!(parsed.show_title, "Show");
        assert_eq!(parsed.season_hint, None);
        assert_eq!(parsed.episode_label, "12");
    }

    #[test]
    fn non_numeric_labels_are_kept() {
        assert_eq!(parse_title("Show [SP]", &table()).unwrap().episode_label, "SP");
        assert_eq!(parse_title("Show [12.5]", &table()).unwrap().episode_label, "12.5");
    }

    #[test]
    fn illegal_characters_are_removed() {
        let parsed = parse_title("Re:Zero? <Show> [01]", &table()).unwrap();
        assert_eq!(parsed.show_title, "ReZero Show");
    }

    #[test]
    fn single_token_title_is_rejected() {
        let err = parse_title("Show", &table()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parse);
    }

    #[test]
    fn title_that_is_only_a_season_is_rejected() {
        let err = parse_title("第二季 [01]", &table()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parse);
    }

    #[test]
    fn pad_episode_handles_large_numbers() {
        assert_eq!(pad_episode("5"), "05");
        assert_eq!(pad_episode("105"), "105");
        assert_eq!(pad_episode("007"), "07");
    }
}
