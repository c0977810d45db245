use arcstr::{ArcStr, Substr};

/// One whitespace-delimited token plus its source position. The newline
/// character is its own token: it terminates `\ ...` comments and is
/// otherwise a no-op for the compiler.
#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    pub text: Substr,
    /// 1-based source line.
    pub line: usize,
    /// 0-based column of the token's first character.
    pub col: usize,
}

impl Token {
    pub fn is(&self, word: &str) -> bool {
        self.text.as_str() == word
    }
}

/// Split the source on ASCII whitespace. Tokens are substrings of the shared
/// source buffer, so error reporting can point back into the original text.
pub fn tokenize(source: &ArcStr) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut start = 0;
    let mut tokcol = 0;
    let mut full = false;
    let mut line = 1;
    let mut col = 0;
    for (at, c) in source.char_indices() {
        match c {
            ' ' | '\r' | '\t' | '\x0b' | '\x0c' => {
                if full {
                    tokens.push(Token { text: source.substr(start..at), line, col: tokcol });
                    full = false;
                }
            }
            '\n' => {
                if full {
                    tokens.push(Token { text: source.substr(start..at), line, col: tokcol });
                    full = false;
                }
                tokens.push(Token { text: source.substr(at..at + 1), line, col });
                line += 1;
                col = 0;
                continue;
            }
            _ => {
                if !full {
                    start = at;
                    tokcol = col;
                    full = true;
                }
            }
        }
        col += 1;
    }
    if full {
        tokens.push(Token { text: source.substr(start..), line, col: tokcol });
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(src: &str) -> Vec<String> {
        let src = ArcStr::from(src);
        tokenize(&src).iter().map(|t| t.text.to_string()).collect()
    }

    #[test]
    fn test_split() {
        assert_eq!(Vec::<String>::new(), words(""));
        assert_eq!(Vec::<String>::new(), words("  \t \r "));
        assert_eq!(vec!["1", "2", "+"], words("1 2 +"));
        assert_eq!(vec!["dup", "\n", "drop"], words("dup\ndrop"));
        assert_eq!(vec![":", "f", "1", ";"], words(" : f\t1 ; "));
        assert_eq!(vec!["\n", "\n"], words("\n\n"));
    }

    #[test]
    fn test_trailing_word() {
        assert_eq!(vec!["halt"], words("halt"));
        assert_eq!(vec!["1", "\n", "2"], words("1\n2"));
    }

    #[test]
    fn test_positions() {
        let src = ArcStr::from("1 2\n  add");
        let toks = tokenize(&src);
        assert_eq!(4, toks.len());
        assert_eq!((1, 0), (toks[0].line, toks[0].col));
        assert_eq!((1, 2), (toks[1].line, toks[1].col));
        assert!(toks[2].is("\n"));
        assert_eq!((2, 2), (toks[3].line, toks[3].col));
        assert!(toks[3].is("add"));
    }

    #[test]
    fn test_substr_ranges() {
        let src = ArcStr::from("ab cd");
        let toks = tokenize(&src);
        assert_eq!(0..2, toks[0].text.range());
        assert_eq!(3..5, toks[1].text.range());
    }
}
