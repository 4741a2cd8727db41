//! Tokenizer for search expressions.
//!
//! Tokens carry the byte offset of their first character so parse errors
//! can be highlighted at the right place in the source string.

use crate::error::{Result, ShelfError};

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    LParen,
    RParen,
    /// `/tag` — an album reference.
    Album(String),
    /// `@name` — an attribute reference.
    Attribute(String),
    /// A quoted string with escapes resolved.
    Str(String),
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Not,
    Exactly,
    Bareword(String),
    Eof,
}

/// A token plus the offset where it started.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub offset: usize,
}

fn is_word_start(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn is_word_continue(c: char) -> bool {
    is_word_start(c) || c == '-'
}

/// Split an expression into tokens. The final element is always `Eof`.
pub fn tokenize(input: &str) -> Result<Vec<Spanned>> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(offset, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        let token = match c {
            '(' => {
                chars.next();
                Token::LParen
            }
            ')' => {
                chars.next();
                Token::RParen
            }
            '/' => {
                chars.next();
                Token::Album(take_word(&mut chars).ok_or(ShelfError::BadToken(offset))?)
            }
            '@' => {
                chars.next();
                Token::Attribute(take_word(&mut chars).ok_or(ShelfError::BadToken(offset))?)
            }
            '"' => {
                chars.next();
                Token::Str(take_string(&mut chars, offset)?)
            }
            '=' => {
                chars.next();
                Token::Eq
            }
            '!' => {
                chars.next();
                match chars.peek() {
                    Some(&(_, '=')) => {
                        chars.next();
                        Token::Ne
                    }
                    _ => return Err(ShelfError::BadToken(offset)),
                }
            }
            '<' => {
                chars.next();
                if let Some(&(_, '=')) = chars.peek() {
                    chars.next();
                    Token::Le
                } else {
                    Token::Lt
                }
            }
            '>' => {
                chars.next();
                if let Some(&(_, '=')) = chars.peek() {
                    chars.next();
                    Token::Ge
                } else {
                    Token::Gt
                }
            }
            c if is_word_start(c) => {
                let word = take_word(&mut chars).ok_or(ShelfError::BadToken(offset))?;
                keyword_or_bareword(word)
            }
            _ => return Err(ShelfError::BadToken(offset)),
        };
        tokens.push(Spanned { token, offset });
    }
    tokens.push(Spanned {
        token: Token::Eof,
        offset: input.len(),
    });
    Ok(tokens)
}

/// Keywords are matched case-insensitively; anything else is a bareword.
fn keyword_or_bareword(word: String) -> Token {
    match word.to_lowercase().as_str() {
        "and" => Token::And,
        "or" => Token::Or,
        "not" => Token::Not,
        "exactly" => Token::Exactly,
        _ => Token::Bareword(word),
    }
}

fn take_word(chars: &mut std::iter::Peekable<std::str::CharIndices>) -> Option<String> {
    let mut word = String::new();
    match chars.peek() {
        Some(&(_, c)) if is_word_start(c) => {
            word.push(c);
            chars.next();
        }
        _ => return None,
    }
    while let Some(&(_, c)) = chars.peek() {
        if is_word_continue(c) {
            word.push(c);
            chars.next();
        } else {
            break;
        }
    }
    Some(word)
}

/// Consume a quoted string body; the opening quote is already eaten.
/// Backslash escapes the next character (used for `\"` and `\\`).
fn take_string(
    chars: &mut std::iter::Peekable<std::str::CharIndices>,
    start: usize,
) -> Result<String> {
    let mut value = String::new();
    while let Some((_, c)) = chars.next() {
        match c {
            '"' => return Ok(value),
            '\\' => match chars.next() {
                Some((_, escaped)) => value.push(escaped),
                None => return Err(ShelfError::UnterminatedString(start)),
            },
            c => value.push(c),
        }
    }
    Err(ShelfError::UnterminatedString(start))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<Token> {
        tokenize(input).unwrap().into_iter().map(|s| s.token).collect()
    }

    #[test]
    fn words_albums_attributes() {
        assert_eq!(
            kinds("beach /summer-04 @foo"),
            vec![
                Token::Bareword("beach".into()),
                Token::Album("summer-04".into()),
                Token::Attribute("foo".into()),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn keywords_are_case_insensitive() {
        assert_eq!(
            kinds("AND Or not eXactly"),
            vec![Token::And, Token::Or, Token::Not, Token::Exactly, Token::Eof]
        );
        // Words that merely start with a keyword stay barewords.
        assert_eq!(
            kinds("android"),
            vec![Token::Bareword("android".into()), Token::Eof]
        );
    }

    #[test]
    fn operators() {
        assert_eq!(
            kinds("= != < <= > >="),
            vec![
                Token::Eq,
                Token::Ne,
                Token::Lt,
                Token::Le,
                Token::Gt,
                Token::Ge,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn quoted_strings_resolve_escapes() {
        assert_eq!(
            kinds(r#""hej \"ju\"" "back\\slash""#),
            vec![
                Token::Str(r#"hej "ju""#.into()),
                Token::Str(r"back\slash".into()),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn unterminated_string_reports_start_offset() {
        let err = tokenize(r#"a "unfinished"#).unwrap_err();
        match err {
            ShelfError::UnterminatedString(offset) => assert_eq!(offset, 2),
            other => panic!("unexpected error: {other}"),
        }
        assert!(matches!(
            tokenize(r#""\"\\\""#).unwrap_err(),
            ShelfError::UnterminatedString(0)
        ));
    }

    #[test]
    fn bad_token_reports_offset() {
        match tokenize("a and +").unwrap_err() {
            ShelfError::BadToken(offset) => assert_eq!(offset, 6),
            other => panic!("unexpected error: {other}"),
        }
        assert!(matches!(tokenize("+"), Err(ShelfError::BadToken(0))));
        // A bare `!` is not a token; only `!=` is.
        assert!(matches!(tokenize("a ! b"), Err(ShelfError::BadToken(2))));
    }
}
