//! Pay-command grammar
//!
//! Recognizes `<verb> pay <target> [...]` where `<verb>` is one of the
//! PlayerPoints command aliases. Anything else is not a pay command and is
//! ignored by the caller; the grammar match is the only validation.

/// Command aliases that accept a `pay` subcommand
pub const PAY_VERBS: [&str; 3] = ["/p", "/points", "/playerpoints"];

const PAY_SUBCOMMAND: &str = "pay";

/// A recognized pay command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayCommand<'a> {
    /// Target identity as typed by the issuer (case preserved)
    pub target: &'a str,
    /// Remaining arguments (usually the amount), unparsed
    pub rest: Option<&'a str>,
}

/// Parse raw command text. Returns `None` when the text is not a pay command.
pub fn parse_pay_command(raw: &str) -> Option<PayCommand<'_>> {
    let mut parts = raw.trim_start().splitn(4, char::is_whitespace);

    let verb = parts.next()?;
    if !PAY_VERBS.iter().any(|v| v.eq_ignore_ascii_case(verb)) {
        return None;
    }

    let sub = parts.next()?;
    if !sub.eq_ignore_ascii_case(PAY_SUBCOMMAND) {
        return None;
    }

    let target = parts.next().filter(|t| !t.is_empty())?;
    let rest = parts.next().map(str::trim).filter(|r| !r.is_empty());

    Some(PayCommand { target, rest })
}
