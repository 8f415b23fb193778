//! Comment stripping, statement batching, and tokenizing for the SQL
//! front end (§6, §10).

/// Strips `--` line comments and `/* ... */` block comments, leaving
/// comment-free SQL text (quote contents are left untouched).
pub fn strip_comments(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let bytes = sql.as_bytes();
    let mut i = 0;
    let mut in_string: Option<char> = None;
    while i < bytes.len() {
        let c = bytes[i] as char;
        if let Some(quote) = in_string {
            out.push(c);
            if c == quote {
                in_string = None;
            }
            i += 1;
            continue;
        }
        match c {
            '\'' | '"' => {
                in_string = Some(c);
                out.push(c);
                i += 1;
            }
            '-' if bytes.get(i + 1) == Some(&b'-') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            '/' if bytes.get(i + 1) == Some(&b'*') => {
                i += 2;
                while i + 1 < bytes.len() && !(bytes[i] == b'*' && bytes[i + 1] == b'/') {
                    i += 1;
                }
                i += 2;
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }
    out
}

/// Splits `sql` on top-level `;` — a `;` inside a quoted string does not
/// split the batch (§10 statement batching). Empty/whitespace-only
/// statements are dropped.
pub fn split_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut in_string: Option<char> = None;
    for c in sql.chars() {
        match in_string {
            Some(quote) => {
                current.push(c);
                if c == quote {
                    in_string = None;
                }
            }
            None => match c {
                '\'' | '"' => {
                    in_string = Some(c);
                    current.push(c);
                }
                ';' => {
                    statements.push(std::mem::take(&mut current));
                }
                _ => current.push(c),
            },
        }
    }
    if !current.trim().is_empty() {
        statements.push(current);
    }
    statements
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Word(String),
    Str(String),
    Num(String),
    Punct(char),
}

impl Token {
    pub fn is_word_ci(&self, word: &str) -> bool {
        matches!(self, Token::Word(w) if w.eq_ignore_ascii_case(word))
    }
}

/// Tokenizes one already comment-stripped statement. Quoted strings keep
/// their content (quotes stripped); numbers include an optional leading
/// `-` and a single `.`; everything else is split on whitespace and the
/// punctuation characters used by the grammar.
pub fn tokenize(stmt: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = stmt.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c == '\'' || c == '"' {
            let quote = c;
            i += 1;
            let mut s = String::new();
            while i < chars.len() && chars[i] != quote {
                s.push(chars[i]);
                i += 1;
            }
            i += 1; // closing quote
            tokens.push(Token::Str(s));
            continue;
        }
        if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit())) {
            let start = i;
            if c == '-' {
                i += 1;
            }
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            tokens.push(Token::Num(chars[start..i].iter().collect()));
            continue;
        }
        if c.is_alphanumeric() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            tokens.push(Token::Word(chars[start..i].iter().collect()));
            continue;
        }
        match c {
            '(' | ')' | ',' | '=' | '<' | '>' | '*' | ';' | '[' | ']' => {
                if (c == '<' || c == '>') && chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Punct(if c == '<' { '\u{2264}' } else { '\u{2265}' }));
                    i += 2;
                    continue;
                }
                tokens.push(Token::Punct(c));
                i += 1;
            }
            _ => {
                i += 1;
            }
        }
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_line_and_block_comments() {
        let sql = "SELECT 1; -- trailing\n/* block */ SELECT 2;";
        let stripped = strip_comments(sql);
        assert!(!stripped.contains("trailing"));
        assert!(!stripped.contains("block"));
    }

    #[test]
    fn split_ignores_semicolon_inside_quotes() {
        let stmts = split_statements("INSERT INTO t VALUES ('a;b'); SELECT * FROM t;");
        assert_eq!(stmts.len(), 2);
        assert!(stmts[0].contains("a;b"));
    }

    #[test]
    fn tokenize_handles_comparison_operators() {
        let tokens = tokenize("precio >= 10.5");
        assert_eq!(
            tokens,
            vec![
                Token::Word("precio".into()),
                Token::Punct('\u{2265}'),
                Token::Num("10.5".into()),
            ]
        );
    }

    #[test]
    fn tokenize_strings_and_points() {
        let tokens = tokenize("RADIUS(loc, '(0, 0)', 2)");
        assert_eq!(tokens[0], Token::Word("RADIUS".into()));
        assert_eq!(tokens[1], Token::Punct('('));
        assert!(tokens.contains(&Token::Str("(0, 0)".into())));
    }
}
