//! Parsing of `esxcli network firewall ruleset list` output
//!
//! ```text
//! Name                Enabled
//! ------------------  -------
//! sshServer           true
//! syslog              false
//! ```

use super::Ruleset;
use crate::error::ParseError;

const EXPECTED_COLUMNS: usize = 2;

pub fn parse_ruleset_list(stdout: &str) -> Result<Vec<Ruleset>, ParseError> {
    let mut rulesets = Vec::new();
    let mut header_seen = false;

    for (idx, line) in stdout.lines().enumerate() {
        let line_no = idx + 1;
        let columns: Vec<&str> = line.split_whitespace().collect();

        if columns.is_empty() || is_separator(&columns) {
            continue;
        }
        if !header_seen && rulesets.is_empty() && is_header(&columns) {
            header_seen = true;
            continue;
        }
        if columns.len() != EXPECTED_COLUMNS {
            return Err(ParseError::new(
                line_no,
                format!("expected {} columns, found {}", EXPECTED_COLUMNS, columns.len()),
            ));
        }

        let enabled = parse_enabled(columns[1]).ok_or_else(|| {
            ParseError::new(line_no, format!("invalid Enabled value '{}'", columns[1]))
        })?;
        rulesets.push(Ruleset {
            name: columns[0].to_string(),
            enabled,
        });
    }

    Ok(rulesets)
}

fn is_header(columns: &[&str]) -> bool {
    columns.len() == EXPECTED_COLUMNS
        && columns[0].eq_ignore_ascii_case("name")
        && columns[1].eq_ignore_ascii_case("enabled")
}

fn is_separator(columns: &[&str]) -> bool {
    columns.iter().all(|c| c.chars().all(|ch| ch == '-'))
}

fn parse_enabled(value: &str) -> Option<bool> {
    if value.eq_ignore_ascii_case("true") {
        Some(true)
    } else if value.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ruleset(name: &str, enabled: bool) -> Ruleset {
        Ruleset {
            name: name.to_string(),
            enabled,
        }
    }

    #[test]
    fn test_minimal_listing() {
        let parsed = parse_ruleset_list("Name Enabled\nsyslog true\nsshServer false\n").unwrap();
        assert_eq!(parsed, vec![ruleset("syslog", true), ruleset("sshServer", false)]);
    }

    #[test]
    fn test_real_esxcli_layout() {
        let stdout = "\
Name                Enabled
------------------  -------
sshServer              true
sshClient             false
nfsClient             false
dhcp                   true

";
        let parsed = parse_ruleset_list(stdout).unwrap();
        assert_eq!(parsed.len(), 4);
        assert_eq!(parsed[0], ruleset("sshServer", true));
        assert_eq!(parsed[3], ruleset("dhcp", true));
    }

    #[test]
    fn test_empty_output_is_empty_listing() {
        assert!(parse_ruleset_list("").unwrap().is_empty());
        assert!(parse_ruleset_list("Name Enabled\n\n").unwrap().is_empty());
    }

    #[test]
    fn test_wrong_column_count_reports_line() {
        let err = parse_ruleset_list("Name Enabled\nsyslog true\nbroken\n").unwrap_err();
        assert_eq!(err.line, 3);
        assert!(err.reason.contains("found 1"));
    }

    #[test]
    fn test_header_after_data_is_rejected() {
        let err = parse_ruleset_list("syslog true\nName Enabled\n").unwrap_err();
        assert_eq!(err.line, 2);
    }

    #[test]
    fn test_non_boolean_enabled_is_rejected() {
        let err = parse_ruleset_list("syslog maybe\n").unwrap_err();
        assert!(err.reason.contains("maybe"));
    }
}
