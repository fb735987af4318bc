/// PostgreSQL の識別子長上限 (NAMEDATALEN - 1)。
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// Quote a SQL identifier to prevent injection.
/// Doubles any internal double-quotes and wraps in double-quotes.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// `[A-Za-z_][A-Za-z0-9_]*` かつ 63 バイト以下であること。
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    name.len() <= MAX_IDENTIFIER_LEN
        && (first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_identifier_escapes_quotes() {
        assert_eq!(quote_identifier("orders"), "\"orders\"");
        assert_eq!(quote_identifier("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn test_is_valid_identifier() {
        assert!(is_valid_identifier("orders"));
        assert!(is_valid_identifier("_Order_Lines2"));
        assert!(!is_valid_identifier(""));
        assert!(!is_valid_identifier("2orders"));
        assert!(!is_valid_identifier("orders; DROP TABLE x"));
        assert!(!is_valid_identifier("or\"ders"));
        assert!(!is_valid_identifier("zähler"));
        assert!(!is_valid_identifier(&"a".repeat(64)));
        assert!(is_valid_identifier(&"a".repeat(63)));
    }
}
