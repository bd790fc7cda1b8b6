//! Agent chat message parsing.
//!
//! A bot agent asks the embed to run a search by sending a message of the
//! form `COVEO|search|<query words...>`. Messages arrive HTML-escaped, so
//! they are decoded before the prefix check. Anything without the prefix is
//! plain text; messages from non-agents are not interpreted.

/// Prefix marking a command message.
pub const COMMAND_PREFIX: &str = "COVEO|";
const COMMAND_DELIMITER: char = '|';
const SEARCH_ACTION: &str = "search";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatMessage {
    /// Run a search for this query.
    UserQuery(String),
    /// Display as-is.
    PlainText(String),
    /// Not for us (non-agent sender, or an unknown command).
    Ignored,
}

/// Classify a message. `from_agent` is false for end-user messages.
pub fn parse_message(raw: &str, from_agent: bool) -> ChatMessage {
    if !from_agent {
        return ChatMessage::Ignored;
    }

    let decoded = html_decode(raw);
    if !decoded.starts_with(COMMAND_PREFIX) {
        return ChatMessage::PlainText(decoded);
    }

    let parts: Vec<&str> = decoded.split(COMMAND_DELIMITER).collect();
    match parts.get(1) {
        Some(&SEARCH_ACTION) => ChatMessage::UserQuery(parts[2..].join(" ")),
        _ => ChatMessage::Ignored,
    }
}

/// Decode the HTML entities a chat transport escapes.
///
/// Covers decimal/hex numeric references, the markup escapes, typographic
/// punctuation, and the Latin-1 letters and symbols. Names outside that table
/// are left verbatim.
pub fn html_decode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        match tail.find(';').and_then(|end| decode_entity(&tail[1..end]).map(|c| (c, end))) {
            Some((c, end)) => {
                out.push(c);
                rest = &tail[end + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_entity(name: &str) -> Option<char> {
    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some('\u{a0}'),
        _ => named_entity(name).or_else(|| numeric_entity(name)),
    }
}

fn numeric_entity(name: &str) -> Option<char> {
    let digits = name.strip_prefix('#')?;
    let code = match digits.strip_prefix('x').or_else(|| digits.strip_prefix('X')) {
        Some(hex) => u32::from_str_radix(hex, 16).ok()?,
        None => digits.parse::<u32>().ok()?,
    };
    char::from_u32(code)
}

// Punctuation and symbols beyond the markup escapes.
const SYMBOL_ENTITIES: &[(&str, char)] = &[
    ("lsquo", '\u{2018}'),
    ("rsquo", '\u{2019}'),
    ("sbquo", '\u{201a}'),
    ("ldquo", '\u{201c}'),
    ("rdquo", '\u{201d}'),
    ("bdquo", '\u{201e}'),
    ("ndash", '\u{2013}'),
    ("mdash", '\u{2014}'),
    ("hellip", '\u{2026}'),
    ("bull", '\u{2022}'),
    ("lsaquo", '\u{2039}'),
    ("rsaquo", '\u{203a}'),
    ("dagger", '\u{2020}'),
    ("Dagger", '\u{2021}'),
    ("permil", '\u{2030}'),
    ("prime", '\u{2032}'),
    ("Prime", '\u{2033}'),
    ("trade", '\u{2122}'),
    ("euro", '\u{20ac}'),
    ("larr", '\u{2190}'),
    ("rarr", '\u{2192}'),
    ("uarr", '\u{2191}'),
    ("darr", '\u{2193}'),
    ("ensp", '\u{2002}'),
    ("emsp", '\u{2003}'),
    ("thinsp", '\u{2009}'),
    ("zwnj", '\u{200c}'),
    ("zwj", '\u{200d}'),
    ("OElig", '\u{152}'),
    ("oelig", '\u{153}'),
    ("Scaron", '\u{160}'),
    ("scaron", '\u{161}'),
    ("Yuml", '\u{178}'),
    ("fnof", '\u{192}'),
    ("circ", '\u{2c6}'),
    ("tilde", '\u{2dc}'),
];

// HTML 4 Latin-1 entity names, in code point order from U+00A1.
const LATIN1_ENTITIES: [&str; 95] = [
    "iexcl", "cent", "pound", "curren", "yen", "brvbar", "sect", "uml", "copy", "ordf", "laquo",
    "not", "shy", "reg", "macr", "deg", "plusmn", "sup2", "sup3", "acute", "micro", "para",
    "middot", "cedil", "sup1", "ordm", "raquo", "frac14", "frac12", "frac34", "iquest", "Agrave",
    "Aacute", "Acirc", "Atilde", "Auml", "Aring", "AElig", "Ccedil", "Egrave", "Eacute", "Ecirc",
    "Euml", "Igrave", "Iacute", "Icirc", "Iuml", "ETH", "Ntilde", "Ograve", "Oacute", "Ocirc",
    "Otilde", "Ouml", "times", "Oslash", "Ugrave", "Uacute", "Ucirc", "Uuml", "Yacute", "THORN",
    "szlig", "agrave", "aacute", "acirc", "atilde", "auml", "aring", "aelig", "ccedil", "egrave",
    "eacute", "ecirc", "euml", "igrave", "iacute", "icirc", "iuml", "eth", "ntilde", "ograve",
    "oacute", "ocirc", "otilde", "ouml", "divide", "oslash", "ugrave", "uacute", "ucirc", "uuml",
    "yacute", "thorn", "yuml",
];

fn named_entity(name: &str) -> Option<char> {
    if let Some(&(_, c)) = SYMBOL_ENTITIES.iter().find(|(n, _)| *n == name) {
        return Some(c);
    }
    let offset = LATIN1_ENTITIES.iter().position(|n| *n == name)?;
    char::from_u32(0xa1 + offset as u32)
}
